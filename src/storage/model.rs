//! Schema of the persisted object graph.

use crate::error::{Result, StackError};
use crate::types::{ObjectRecord, Properties};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// One entity of the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeSet<String>,
}

impl EntityDescription {
    pub fn new<I, S>(name: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ModelFile {
    entities: Vec<EntityDescription>,
}

/// What auto-migration removed from a store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationStats {
    pub dropped_objects: usize,
    pub stripped_attributes: usize,
}

/// The set of entities a store may hold.
#[derive(Clone, Debug)]
pub struct Model {
    entities: BTreeMap<String, EntityDescription>,
    fingerprint: String,
}

impl Model {
    /// Load a model from its JSON description.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StackError::ModelNotFound(path.display().to_string()));
        }
        let data = fs::read(path)?;
        let file: ModelFile =
            serde_json::from_slice(&data).map_err(|e| StackError::InvalidModel(e.to_string()))?;
        Self::from_entities(file.entities)
    }

    /// Build a model from entity descriptions.
    pub fn from_entities(entities: Vec<EntityDescription>) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        for entity in entities {
            if entity.name.is_empty() {
                return Err(StackError::InvalidModel("entity with empty name".into()));
            }
            if by_name.contains_key(&entity.name) {
                return Err(StackError::InvalidModel(format!(
                    "duplicate entity: {}",
                    entity.name
                )));
            }
            by_name.insert(entity.name.clone(), entity);
        }

        // BTree ordering makes the serialized form canonical.
        let canonical = serde_json::to_vec(&by_name)?;
        let fingerprint = hex::encode(Sha256::digest(&canonical));

        Ok(Self {
            entities: by_name,
            fingerprint,
        })
    }

    /// Write the JSON description of this model to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = ModelFile {
            entities: self.entities.values().cloned().collect(),
        };
        fs::write(path, serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.get(name)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// SHA-256 (hex) of the canonical model description.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Check that a record only uses declared entities and attributes.
    pub fn validate(&self, record: &ObjectRecord) -> Result<()> {
        let entity = self.entity(&record.entity).ok_or_else(|| StackError::Validation {
            entity: record.entity.clone(),
            message: "entity is not part of the model".into(),
        })?;

        if let Some(key) = record
            .properties
            .keys()
            .find(|key| !entity.attributes.contains(*key))
        {
            return Err(StackError::Validation {
                entity: record.entity.clone(),
                message: format!("unknown attribute `{}`", key),
            });
        }

        Ok(())
    }

    /// Bring objects written under another model in line with this one.
    pub(crate) fn migrate(&self, objects: &mut BTreeMap<u64, ObjectRecord>) -> MigrationStats {
        let mut stats = MigrationStats::default();

        objects.retain(|_, record| match self.entity(&record.entity) {
            Some(entity) => {
                let before = record.properties.len();
                let kept: Properties = std::mem::take(&mut record.properties)
                    .into_iter()
                    .filter(|(key, _)| entity.attributes.contains(key))
                    .collect();
                stats.stripped_attributes += before - kept.len();
                record.properties = kept;
                true
            }
            None => {
                stats.dropped_objects += 1;
                false
            }
        });

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shop_model() -> Model {
        Model::from_entities(vec![
            EntityDescription::new("Widget", ["name", "size"]),
            EntityDescription::new("Gadget", ["label"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let reversed = Model::from_entities(vec![
            EntityDescription::new("Gadget", ["label"]),
            EntityDescription::new("Widget", ["size", "name"]),
        ])
        .unwrap();
        assert_eq!(shop_model().fingerprint(), reversed.fingerprint());
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let result = Model::from_entities(vec![
            EntityDescription::new("Widget", ["name"]),
            EntityDescription::new("Widget", ["size"]),
        ]);
        assert!(matches!(result, Err(StackError::InvalidModel(_))));
    }

    #[test]
    fn test_validate() {
        let model = shop_model();

        let mut props = Properties::new();
        props.insert("name".into(), json!("a"));
        assert!(model.validate(&ObjectRecord::new("Widget", props.clone())).is_ok());

        assert!(matches!(
            model.validate(&ObjectRecord::new("Sprocket", props.clone())),
            Err(StackError::Validation { .. })
        ));

        props.insert("colour".into(), json!("red"));
        assert!(matches!(
            model.validate(&ObjectRecord::new("Widget", props)),
            Err(StackError::Validation { .. })
        ));
    }

    #[test]
    fn test_migrate_drops_removed_entities_and_attributes() {
        let model = shop_model();
        let mut objects = BTreeMap::new();

        let mut widget = Properties::new();
        widget.insert("name".into(), json!("w"));
        widget.insert("legacy".into(), json!(true));
        objects.insert(1, ObjectRecord::new("Widget", widget));
        objects.insert(2, ObjectRecord::new("Removed", Properties::new()));

        let stats = model.migrate(&mut objects);
        assert_eq!(stats.dropped_objects, 1);
        assert_eq!(stats.stripped_attributes, 1);
        assert_eq!(objects.len(), 1);
        assert!(!objects[&1].properties.contains_key("legacy"));
    }

    #[test]
    fn test_missing_model_file() {
        let result = Model::load("/nonexistent/model.json");
        assert!(matches!(result, Err(StackError::ModelNotFound(_))));
    }

    #[test]
    fn test_saved_model_keeps_fingerprint() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        let model = Model::from_entities(vec![
            EntityDescription::new("Widget", ["name", "size"]),
            EntityDescription::new("Gadget", ["label"]),
        ])
        .unwrap();

        model.save(&path).unwrap();
        assert_eq!(Model::load(&path).unwrap().fingerprint(), model.fingerprint());
    }
}
