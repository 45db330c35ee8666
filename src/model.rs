use std::collections::BTreeMap;

use camino::Utf8PathBuf;

use crate::error::MindbidsError;
use crate::table::Table;

/// The payload backing one entity: either a file already on disk or an
/// in-memory table. Exactly one kind, enforced by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    File(Utf8PathBuf),
    Table(Table),
}

/// One placeable output artifact with its BIDS-style placement metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub subject_id: String,
    pub datatype: String,
    pub task_name: String,
    pub suffix: String,
    pub session_id: Option<String>,
    pub run_id: Option<String>,
    pub metadata: Option<BTreeMap<String, String>>,
    payload: Payload,
}

impl Entity {
    /// Checked constructor over optional payload halves. Both or neither set
    /// fails with `InvalidEntity`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subject_id: impl Into<String>,
        datatype: impl Into<String>,
        task_name: impl Into<String>,
        suffix: impl Into<String>,
        file_path: Option<Utf8PathBuf>,
        tabular_data: Option<Table>,
        run_id: Option<String>,
        session_id: Option<String>,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<Self, MindbidsError> {
        let payload = match (file_path, tabular_data) {
            (Some(path), None) => Payload::File(path),
            (None, Some(table)) => Payload::Table(table),
            (Some(_), Some(_)) => {
                return Err(MindbidsError::InvalidEntity(
                    "entity has both a file path and tabular data".to_string(),
                ));
            }
            (None, None) => {
                return Err(MindbidsError::InvalidEntity(
                    "entity has neither a file path nor tabular data".to_string(),
                ));
            }
        };
        Ok(Self {
            subject_id: subject_id.into(),
            datatype: datatype.into(),
            task_name: task_name.into(),
            suffix: suffix.into(),
            session_id,
            run_id,
            metadata,
            payload,
        })
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_file_resource(&self) -> bool {
        matches!(self.payload, Payload::File(_))
    }

    pub fn is_tabular_data(&self) -> bool {
        matches!(self.payload, Payload::Table(_))
    }
}

/// Immutable dataset snapshot: entities in insertion order plus the
/// dataset-level description mapping. Derived facts are computed on demand.
#[derive(Debug, Clone)]
pub struct Model {
    entities: Vec<Entity>,
    dataset_description: BTreeMap<String, String>,
}

impl Model {
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn dataset_description(&self) -> &BTreeMap<String, String> {
        &self.dataset_description
    }

    /// Unique subject ids, sorted for deterministic output.
    pub fn subject_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entities
            .iter()
            .map(|entity| entity.subject_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn has_sessions(&self) -> bool {
        self.entities.iter().any(|entity| entity.session_id.is_some())
    }
}

/// Resource handed to [`Builder::add`]: classified into the matching payload
/// variant at the call site rather than inspected at write time.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    File(Utf8PathBuf),
    Table(Table),
}

/// Accumulates entities and a dataset description into a [`Model`].
///
/// Every builder starts from fresh empty containers; `build` deep-copies, so
/// a snapshot is unaffected by later `add` calls.
#[derive(Debug, Default)]
pub struct Builder {
    entities: Vec<Entity>,
    dataset_description: BTreeMap<String, String>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        subject_id: impl Into<String>,
        datatype: impl Into<String>,
        task_name: impl Into<String>,
        suffix: impl Into<String>,
        resource: Resource,
        run_id: Option<String>,
        session_id: Option<String>,
        metadata: Option<BTreeMap<String, String>>,
    ) -> Result<&mut Self, MindbidsError> {
        let (file_path, tabular_data) = match resource {
            Resource::File(path) => (Some(path), None),
            Resource::Table(table) => (None, Some(table)),
        };
        self.entities.push(Entity::new(
            subject_id,
            datatype,
            task_name,
            suffix,
            file_path,
            tabular_data,
            run_id,
            session_id,
            metadata,
        )?);
        Ok(self)
    }

    /// Merge `{Name, BIDSVersion}` plus arbitrary fields into the dataset
    /// description. Later calls overwrite like-named keys.
    pub fn add_dataset_description(
        &mut self,
        name: &str,
        bids_version: &str,
        fields: BTreeMap<String, String>,
    ) -> &mut Self {
        self.dataset_description
            .insert("Name".to_string(), name.to_string());
        self.dataset_description
            .insert("BIDSVersion".to_string(), bids_version.to_string());
        self.dataset_description.extend(fields);
        self
    }

    pub fn build(&self) -> Model {
        Model {
            entities: self.entities.clone(),
            dataset_description: self.dataset_description.clone(),
        }
    }
}
