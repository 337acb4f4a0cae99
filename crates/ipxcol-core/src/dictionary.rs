//! Information-element dictionary.
//!
//! Maps (enterprise number, element id) to the semantic definition used to
//! interpret template fields. The dictionary is shared read-only as
//! `Arc<IeDictionary>` and replaced as a whole on reload.
//!
//! File format:
//!
//! ```toml
//! revision = 3
//!
//! [[element]]
//! pen = 0
//! id = 8
//! name = "sourceIPv4Address"
//! data_type = "ipv4Address"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// Key of an information element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementKey {
    /// Private enterprise number (0 for IANA elements).
    pub pen: u32,
    /// Element identifier.
    pub id: u16,
}

/// Definition of an information element.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ElementDef {
    /// Element name.
    pub name: String,
    /// Abstract data type (e.g. "unsigned32", "ipv4Address").
    pub data_type: String,
}

#[derive(Debug, Deserialize)]
struct ElementEntry {
    #[serde(default)]
    pen: u32,
    id: u16,
    name: String,
    data_type: String,
}

#[derive(Debug, Deserialize)]
struct DictionaryFile {
    #[serde(default)]
    revision: u64,
    #[serde(default, rename = "element")]
    elements: Vec<ElementEntry>,
}

/// Information-element dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IeDictionary {
    revision: u64,
    elements: BTreeMap<ElementKey, ElementDef>,
}

impl IeDictionary {
    /// Creates an empty dictionary with the given revision.
    pub fn new(revision: u64) -> Self {
        Self {
            revision,
            elements: BTreeMap::new(),
        }
    }

    /// Parses a dictionary from TOML text.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let file: DictionaryFile = toml::from_str(text)?;
        let mut dict = Self::new(file.revision);
        for entry in file.elements {
            let key = ElementKey {
                pen: entry.pen,
                id: entry.id,
            };
            if entry.id & 0x8000 != 0 {
                return Err(ConfigError::invalid(
                    "element.id",
                    format!("{} uses the enterprise bit, put the number in 'pen'", entry.id),
                ));
            }
            let def = ElementDef {
                name: entry.name,
                data_type: entry.data_type,
            };
            if dict.elements.insert(key, def).is_some() {
                return Err(ConfigError::invalid(
                    "element",
                    format!("duplicate definition of {}:{}", key.pen, key.id),
                ));
            }
        }
        Ok(dict)
    }

    /// Loads a dictionary from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Adds or replaces a definition.
    pub fn insert(&mut self, pen: u32, id: u16, def: ElementDef) {
        self.elements.insert(ElementKey { pen, id }, def);
    }

    /// Looks up a definition.
    pub fn lookup(&self, pen: u32, id: u16) -> Option<&ElementDef> {
        self.elements.get(&ElementKey { pen, id })
    }

    /// Returns the revision number.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Returns the number of definitions.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if there are no definitions.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        revision = 2

        [[element]]
        id = 8
        name = "sourceIPv4Address"
        data_type = "ipv4Address"

        [[element]]
        pen = 8057
        id = 1000
        name = "flowDirection"
        data_type = "unsigned8"
    "#;

    #[test]
    fn test_parse_dictionary() {
        let dict = IeDictionary::from_toml_str(SAMPLE).unwrap();
        assert_eq!(dict.revision(), 2);
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.lookup(0, 8).unwrap().name, "sourceIPv4Address");
        assert_eq!(dict.lookup(8057, 1000).unwrap().data_type, "unsigned8");
        assert!(dict.lookup(0, 1000).is_none());
    }

    #[test]
    fn test_insert_replaces_definition() {
        let mut dict = IeDictionary::from_toml_str(SAMPLE).unwrap();
        dict.insert(
            0,
            8,
            ElementDef {
                name: "sourceIPv4Address".to_string(),
                data_type: "octetArray".to_string(),
            },
        );
        dict.insert(
            0,
            12,
            ElementDef {
                name: "destinationIPv4Address".to_string(),
                data_type: "ipv4Address".to_string(),
            },
        );
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.revision(), 2);
        assert_eq!(dict.lookup(0, 8).unwrap().data_type, "octetArray");
        assert_eq!(dict.lookup(0, 12).unwrap().name, "destinationIPv4Address");
    }

    #[test]
    fn test_duplicate_rejected() {
        let text = r#"
            [[element]]
            id = 1
            name = "octetDeltaCount"
            data_type = "unsigned64"

            [[element]]
            id = 1
            name = "again"
            data_type = "unsigned64"
        "#;
        let err = IeDictionary::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_enterprise_bit_rejected() {
        let text = r#"
            [[element]]
            id = 32769
            name = "bad"
            data_type = "octetArray"
        "#;
        assert!(IeDictionary::from_toml_str(text).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let dict = IeDictionary::load(file.path()).unwrap();
        assert_eq!(dict.len(), 2);

        let err = IeDictionary::load("/nonexistent/ie.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
