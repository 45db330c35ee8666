use camino::Utf8PathBuf;

use crate::model::Entity;

pub type LabelFn = fn(&Entity) -> String;

/// Path-formatting configuration for the writer: pure, deterministic label
/// functions plus the side-file merge gates.
///
/// Entities with a session id are placed under their session directory;
/// entities without one go directly under the subject directory. Mixed
/// models are permitted.
#[derive(Debug, Clone)]
pub struct BidsLayout {
    pub subject_formatter: LabelFn,
    pub session_formatter: LabelFn,
    pub filename_formatter: LabelFn,
    pub merge_dataset_description: bool,
    pub merge_participants_tsv: bool,
}

impl Default for BidsLayout {
    fn default() -> Self {
        Self {
            subject_formatter: default_subject_label,
            session_formatter: default_session_label,
            filename_formatter: default_filename,
            merge_dataset_description: true,
            merge_participants_tsv: true,
        }
    }
}

impl BidsLayout {
    /// `<subject-label>[/<session-label>]/<datatype>`
    pub fn entity_dir(&self, entity: &Entity) -> Utf8PathBuf {
        let mut dir = Utf8PathBuf::from((self.subject_formatter)(entity));
        if entity.session_id.is_some() {
            dir.push((self.session_formatter)(entity));
        }
        dir.push(&entity.datatype);
        dir
    }

    pub fn entity_path(&self, entity: &Entity) -> Utf8PathBuf {
        self.entity_dir(entity).join((self.filename_formatter)(entity))
    }

    /// Sidecar path: the entity path with its extension replaced by `json`.
    pub fn entity_metadata_path(&self, entity: &Entity) -> Utf8PathBuf {
        self.entity_path(entity).with_extension("json")
    }
}

fn default_subject_label(entity: &Entity) -> String {
    format!("sub-{}", entity.subject_id)
}

fn default_session_label(entity: &Entity) -> String {
    match &entity.session_id {
        Some(session) => format!("ses-{session}"),
        None => String::new(),
    }
}

fn default_filename(entity: &Entity) -> String {
    let mut parts = vec![format!("sub-{}", entity.subject_id)];
    if let Some(session) = &entity.session_id {
        parts.push(format!("ses-{session}"));
    }
    parts.push(format!("task-{}", entity.task_name));
    if let Some(run) = &entity.run_id {
        parts.push(format!("run-{run}"));
    }
    let mut name = parts.join("_");
    name.push_str(&entity.suffix);
    name
}
