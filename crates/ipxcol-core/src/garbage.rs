//! Garbage message: deferred, ordered destruction.
//!
//! A stage that replaces an object still referenced by messages it has
//! already forwarded (for example a redefined template) must not free the
//! object immediately. Instead it wraps the object in a [`GarbageMessage`]
//! and passes it on the same FIFO channel, behind every message that might
//! still read the object. The last consumer destroys the garbage message,
//! which runs the destructor.
//!
//! # Ownership
//!
//! Creating the message moves the object into it; the destructor closure
//! captures everything needed to free it, so channels and consumers need no
//! knowledge of the payload type.

use std::fmt;

type Destructor = Box<dyn FnOnce() + Send + 'static>;

/// Envelope carrying an object and its cleanup action down the pipeline.
pub struct GarbageMessage {
    /// Pending cleanup. `None` once destroyed or leaked.
    destructor: Option<Destructor>,
    /// Name of the wrapped type (for logging).
    type_name: &'static str,
}

impl GarbageMessage {
    /// Wraps `object`; `destructor` is invoked with it exactly once when the
    /// message is destroyed.
    pub fn new<T, F>(object: T, destructor: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            destructor: Some(Box::new(move || destructor(object))),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Wraps `object`, releasing it with its own `Drop` implementation.
    pub fn from_owned<T>(object: T) -> Self
    where
        T: Send + 'static,
    {
        Self::new(object, drop)
    }

    /// Returns the type name of the wrapped object.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if the destructor has not run yet.
    pub fn is_pending(&self) -> bool {
        self.destructor.is_some()
    }

    /// Destroys the wrapped object now.
    ///
    /// Consumes the message, so it can not be destroyed twice.
    pub fn destroy(mut self) {
        self.run_destructor();
    }

    /// Disarms the destructor and keeps the object alive forever.
    ///
    /// Used when the message can not be scheduled behind the messages that
    /// may reference the object: a permanent leak is preferred over freeing
    /// memory that a later stage could still read.
    pub fn leak(mut self) {
        if let Some(destructor) = self.destructor.take() {
            std::mem::forget(destructor);
        }
    }

    fn run_destructor(&mut self) {
        if let Some(destructor) = self.destructor.take() {
            destructor();
        }
    }
}

impl Drop for GarbageMessage {
    fn drop(&mut self) {
        self.run_destructor();
    }
}

impl fmt::Debug for GarbageMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GarbageMessage")
            .field("type_name", &self.type_name)
            .field("pending", &self.is_pending())
            .finish()
    }
}
