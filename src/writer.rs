use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::MindbidsError;
use crate::layout::BidsLayout;
use crate::model::{Builder, Entity, Model, Payload};
use crate::table::Table;

/// Policy governing writes into a destination that already exists.
///
/// `RenameEntities` and `NewSession` are declared but not implemented; the
/// writer fails fast with `NotSupported` for them. `Unknown` is a sentinel
/// meaning the caller has not chosen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MergeStrategy {
    Unknown,
    NoMerge,
    Overwrite,
    Keep,
    RenameEntities,
    NewSession,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeStrategy::Unknown => "unknown",
            MergeStrategy::NoMerge => "no-merge",
            MergeStrategy::Overwrite => "overwrite",
            MergeStrategy::Keep => "keep",
            MergeStrategy::RenameEntities => "rename-entities",
            MergeStrategy::NewSession => "new-session",
        };
        write!(f, "{name}")
    }
}

impl FromStr for MergeStrategy {
    type Err = MindbidsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "unknown" => Ok(MergeStrategy::Unknown),
            "no-merge" => Ok(MergeStrategy::NoMerge),
            "overwrite" => Ok(MergeStrategy::Overwrite),
            "keep" => Ok(MergeStrategy::Keep),
            "rename-entities" => Ok(MergeStrategy::RenameEntities),
            "new-session" => Ok(MergeStrategy::NewSession),
            _ => Err(MindbidsError::InvalidStrategy(value.to_string())),
        }
    }
}

/// Materializes a [`Model`] under a root directory, merging JSON/TSV side
/// files and resolving per-entity conflicts according to the strategy.
///
/// The write is a single sequential pass: the first failure aborts it and
/// files already on disk are not rolled back.
pub struct BidsWriter {
    root: Utf8PathBuf,
    strategy: MergeStrategy,
    layout: BidsLayout,
}

impl BidsWriter {
    pub fn new(root: impl Into<Utf8PathBuf>, strategy: MergeStrategy) -> Self {
        Self::with_layout(root, strategy, BidsLayout::default())
    }

    pub fn with_layout(
        root: impl Into<Utf8PathBuf>,
        strategy: MergeStrategy,
        layout: BidsLayout,
    ) -> Self {
        Self {
            root: root.into(),
            strategy,
            layout,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn write_builder(&self, builder: &Builder) -> Result<(), MindbidsError> {
        self.write(&builder.build())
    }

    pub fn write(&self, model: &Model) -> Result<(), MindbidsError> {
        info!(root = %self.root, strategy = %self.strategy, "writing dataset");
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| MindbidsError::Filesystem(err.to_string()))?;
        if !self.root_is_empty()? {
            match self.strategy {
                MergeStrategy::Unknown => {
                    return Err(MindbidsError::MergeStrategyRequired(self.root.clone()));
                }
                MergeStrategy::NoMerge => {
                    return Err(MindbidsError::RootNotEmpty(self.root.clone()));
                }
                _ => {}
            }
        }

        let description_path = self.root.join("dataset_description.json");
        if !description_path.as_std_path().exists() || self.layout.merge_dataset_description {
            debug!("writing dataset_description.json");
            merge_json(&description_path, model.dataset_description())?;
        }

        let participants_path = self.root.join("participants.tsv");
        if !participants_path.as_std_path().exists() || self.layout.merge_participants_tsv {
            debug!("writing participants.tsv");
            let participants = Table::single_column("participant", model.subject_ids());
            merge_tsv(&participants_path, &participants)?;
        }

        for entity in model.entities() {
            self.write_entity(entity)?;
        }
        Ok(())
    }

    fn root_is_empty(&self) -> Result<bool, MindbidsError> {
        let mut entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| MindbidsError::Filesystem(err.to_string()))?;
        Ok(entries.next().is_none())
    }

    fn write_entity(&self, entity: &Entity) -> Result<(), MindbidsError> {
        let dest = self.root.join(self.layout.entity_path(entity));
        debug!(subject = %entity.subject_id, path = %dest, "writing entity");
        match self.strategy {
            MergeStrategy::Overwrite => self.write_payload(entity, &dest),
            MergeStrategy::NoMerge => {
                if dest.as_std_path().exists() {
                    return Err(MindbidsError::EntityConflict(dest));
                }
                self.write_payload(entity, &dest)
            }
            MergeStrategy::Keep => {
                if dest.as_std_path().exists() {
                    debug!(path = %dest, "keeping existing file");
                    return Ok(());
                }
                self.write_payload(entity, &dest)
            }
            MergeStrategy::RenameEntities | MergeStrategy::NewSession => {
                Err(MindbidsError::NotSupported(self.strategy))
            }
            MergeStrategy::Unknown => Err(MindbidsError::MergeStrategyRequired(self.root.clone())),
        }
    }

    fn write_payload(&self, entity: &Entity, dest: &Utf8Path) -> Result<(), MindbidsError> {
        match entity.payload() {
            Payload::File(source) => {
                if !source.as_std_path().exists() {
                    return Err(MindbidsError::MissingInput(source.clone()));
                }
                copy_atomic(source, dest)?;
            }
            Payload::Table(table) => {
                write_atomic(dest, table.to_tsv().as_bytes())?;
            }
        }
        if let Some(metadata) = &entity.metadata {
            let sidecar = self.root.join(self.layout.entity_metadata_path(entity));
            merge_json(&sidecar, metadata)?;
        }
        Ok(())
    }
}

/// Shallow-merge `data` over the JSON object at `path` (new values win),
/// writing back pretty-printed.
fn merge_json(path: &Utf8Path, data: &BTreeMap<String, String>) -> Result<(), MindbidsError> {
    let mut merged = if path.as_std_path().exists() {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| MindbidsError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str::<Map<String, Value>>(&content).map_err(|err| MindbidsError::Json {
            path: path.to_owned(),
            message: err.to_string(),
        })?
    } else {
        Map::new()
    };
    for (key, value) in data {
        merged.insert(key.clone(), Value::String(value.clone()));
    }
    let bytes = serde_json::to_vec_pretty(&Value::Object(merged))
        .map_err(|err| MindbidsError::Filesystem(err.to_string()))?;
    write_atomic(path, &bytes)
}

/// Append `data`'s rows to the table at `path` (pure concatenation, no
/// dedup), writing back tab-separated with header.
fn merge_tsv(path: &Utf8Path, data: &Table) -> Result<(), MindbidsError> {
    let table = if path.as_std_path().exists() {
        let mut existing = Table::from_tsv_path(path)?;
        existing.append_rows(data);
        existing
    } else {
        data.clone()
    };
    write_atomic(path, table.to_tsv().as_bytes())
}

/// Write `content` to `dest` through a temp file in the destination
/// directory, so a failed write never leaves a truncated artifact.
fn write_atomic(dest: &Utf8Path, content: &[u8]) -> Result<(), MindbidsError> {
    let mut temp = dest_temp(dest)?;
    temp.write_all(content)
        .map_err(|err| MindbidsError::Filesystem(format!("write {dest}: {err}")))?;
    persist(temp, dest)
}

fn copy_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), MindbidsError> {
    let temp = dest_temp(dest)?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| MindbidsError::Filesystem(format!("copy {source} to {dest}: {err}")))?;
    persist(temp, dest)
}

fn dest_temp(dest: &Utf8Path) -> Result<NamedTempFile, MindbidsError> {
    let parent = dest
        .parent()
        .ok_or_else(|| MindbidsError::Filesystem(format!("no parent directory for {dest}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| MindbidsError::Filesystem(format!("create {parent}: {err}")))?;
    tempfile::Builder::new()
        .prefix(".mindbids-")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| MindbidsError::Filesystem(format!("temp file in {parent}: {err}")))
}

fn persist(temp: NamedTempFile, dest: &Utf8Path) -> Result<(), MindbidsError> {
    if dest.as_std_path().exists() {
        fs::remove_file(dest.as_std_path())
            .map_err(|err| MindbidsError::Filesystem(format!("replace {dest}: {err}")))?;
    }
    temp.persist(dest.as_std_path())
        .map_err(|err| MindbidsError::Filesystem(format!("persist {dest}: {err}")))?;
    Ok(())
}
