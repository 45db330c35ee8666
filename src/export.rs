use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info};

use crate::archive;
use crate::error::MindbidsError;
use crate::model::{Builder, Model, Resource};
use crate::table::Table;

const REPORT_FILENAME: &str = "report.csv";
const DRAWING_RESPONSES_PREFIX: &str = "drawing-responses-";
const MEDIA_RESPONSES_PREFIX: &str = "media-responses-";
const TRAILS_RESPONSES_PREFIX: &str = "trails-responses-";

const STUDY_ID_ITEM: &str = "study_id";
const BIDS_VERSION: &str = "1.9.0";

/// Report columns copied verbatim into entity sidecar metadata, with their
/// sidecar key.
const METADATA_COLUMNS: &[(&str, &str)] = &[
    ("id", "mindlogger_id"),
    ("activity_scheduled_time", "activity_scheduled_time"),
    ("flag", "flag"),
    ("secret_user_id", "secret_user_id"),
    ("userId", "user_id"),
    ("activity_id", "activity_id"),
    ("activity_name", "activity_name"),
    ("activity_flow_id", "activity_flow_id"),
    ("activity_flow_name", "activity_flow_name"),
    ("item_id", "item_id"),
    ("item", "item"),
    ("response", "response"),
    ("prompt", "prompt"),
    ("options", "options"),
    ("version", "version"),
    ("rawScore", "raw_score"),
    ("reviewing_id", "reviewing_id"),
    ("event_id", "event_id"),
    ("timezone_offset", "timezone_offset"),
];

/// Millisecond-epoch columns rendered as RFC 3339 UTC in the sidecar.
const TIMESTAMP_COLUMNS: &[(&str, &str)] = &[
    ("activity_start_time", "activity_start_time"),
    ("activity_end_time", "activity_end_time"),
];

/// A MindLogger export directory opened for conversion: the parsed report
/// plus the extracted response archives.
#[derive(Debug)]
pub struct MindloggerExport {
    report: Table,
    drawing_dir: Utf8PathBuf,
    media_dir: Utf8PathBuf,
    trails_dir: Utf8PathBuf,
}

impl MindloggerExport {
    /// Locate `report.csv` and the three response archives, validate and
    /// extract each archive next to itself.
    pub fn open(export_dir: &Utf8Path) -> Result<Self, MindbidsError> {
        if !export_dir.as_std_path().is_dir() {
            return Err(MindbidsError::MissingInput(export_dir.to_owned()));
        }

        let report_path = export_dir.join(REPORT_FILENAME);
        if !report_path.as_std_path().is_file() {
            return Err(MindbidsError::MissingInput(report_path));
        }
        let report = Table::from_csv_path(&report_path)?;
        info!(rows = report.rows().len(), "parsed export report");

        let drawing_dir = extract_responses(export_dir, DRAWING_RESPONSES_PREFIX)?;
        let media_dir = extract_responses(export_dir, MEDIA_RESPONSES_PREFIX)?;
        let trails_dir = extract_responses(export_dir, TRAILS_RESPONSES_PREFIX)?;

        Ok(Self {
            report,
            drawing_dir,
            media_dir,
            trails_dir,
        })
    }

    /// Build a dataset model from the report rows.
    ///
    /// `study_id` item rows carry the subject id for their neighbours: the
    /// row directly below a carrier belongs to that carrier, every other row
    /// takes the next carrier below it, and rows after the last carrier keep
    /// it. Carrier rows themselves produce no entity.
    pub fn to_model(&self, dataset_name: &str) -> Result<Model, MindbidsError> {
        let subject_ids = self.subject_ids_per_row()?;
        let mut builder = Builder::new();
        builder.add_dataset_description(
            dataset_name,
            BIDS_VERSION,
            BTreeMap::from([(
                "GeneratedBy".to_string(),
                format!("mindbids/{}", env!("CARGO_PKG_VERSION")),
            )]),
        );

        for (index, subject_id) in subject_ids.iter().enumerate() {
            let item = self.report.value(index, "item").unwrap_or_default();
            if item == STUDY_ID_ITEM || item.is_empty() {
                continue;
            }
            let response = self.report.value(index, "response").unwrap_or_default();
            let (resource, suffix) = self.parse_response(response)?;
            debug!(subject = %subject_id, item = %item, suffix = %suffix, "adding entity");
            builder.add(
                subject_id.clone(),
                "beh",
                item,
                suffix,
                resource,
                None,
                None,
                Some(self.row_metadata(index)),
            )?;
        }
        Ok(builder.build())
    }

    fn subject_ids_per_row(&self) -> Result<Vec<String>, MindbidsError> {
        let rows = self.report.rows().len();
        let carriers: Vec<Option<String>> = (0..rows)
            .map(|index| {
                (self.report.value(index, "item") == Some(STUDY_ID_ITEM)).then(|| {
                    self.report
                        .value(index, "response")
                        .unwrap_or_default()
                        .trim()
                        .to_string()
                })
            })
            .collect();
        let first = carriers.iter().flatten().next().cloned().ok_or_else(|| {
            MindbidsError::ExportParse("report contains no study_id item".to_string())
        })?;

        // The row directly below a carrier belongs to it.
        let mut attributed = carriers.clone();
        for index in 1..rows {
            if attributed[index].is_none() {
                attributed[index] = carriers[index - 1].clone();
            }
        }
        // Remaining rows take the next carrier below them.
        let mut next: Option<String> = None;
        for slot in attributed.iter_mut().rev() {
            match slot {
                Some(id) => next = Some(id.clone()),
                None => *slot = next.clone(),
            }
        }
        // Rows after the last carrier keep it.
        let mut last = first;
        Ok(attributed
            .into_iter()
            .map(|id| match id {
                Some(id) => {
                    last = id.clone();
                    id
                }
                None => last.clone(),
            })
            .collect())
    }

    /// Resolve a report response string to a resource and file suffix.
    fn parse_response(&self, response: &str) -> Result<(Resource, String), MindbidsError> {
        if let Some(value) = response.strip_prefix("value:") {
            let table = Table::single_column("value", vec![value.trim().to_string()]);
            return Ok((Resource::Table(table), ".tsv".to_string()));
        }
        if response.ends_with(".csv") {
            let path = self.find_artifact(response)?;
            let table = Table::from_csv_path(&path)?;
            return Ok((Resource::Table(table), ".tsv".to_string()));
        }
        let path = self.find_artifact(response)?;
        let suffix = path
            .extension()
            .map(|ext| format!(".{ext}"))
            .ok_or_else(|| MindbidsError::UnsupportedResourceType(response.to_string()))?;
        Ok((Resource::File(path), suffix))
    }

    /// Search the extracted media, drawing, and trails directories for a file
    /// with the given name. Exactly one hit is required.
    fn find_artifact(&self, name: &str) -> Result<Utf8PathBuf, MindbidsError> {
        let mut matches = Vec::new();
        for dir in [&self.media_dir, &self.drawing_dir, &self.trails_dir] {
            matches.extend(find_by_name(dir, name)?);
        }
        match matches.len() {
            0 => Err(MindbidsError::ResponseNotFound(name.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(MindbidsError::AmbiguousResponse(name.to_string())),
        }
    }

    fn row_metadata(&self, index: usize) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        for (column, key) in METADATA_COLUMNS {
            if let Some(value) = self.report.value(index, column) {
                metadata.insert((*key).to_string(), value.to_string());
            }
        }
        for (column, key) in TIMESTAMP_COLUMNS {
            if let Some(value) = self.report.value(index, column) {
                let rendered = ms_epoch_to_rfc3339(value).unwrap_or_else(|| value.to_string());
                metadata.insert((*key).to_string(), rendered);
            }
        }
        metadata
    }
}

/// Find the single `<prefix>*.zip` archive in `export_dir` and extract it
/// into a directory named after the archive stem. Returns the extraction dir.
fn extract_responses(export_dir: &Utf8Path, prefix: &str) -> Result<Utf8PathBuf, MindbidsError> {
    let regex = Regex::new(&format!(r"^{}.*\.zip$", regex::escape(prefix)))
        .map_err(|err| MindbidsError::Filesystem(err.to_string()))?;
    let mut candidates = Vec::new();
    let entries = fs::read_dir(export_dir.as_std_path())
        .map_err(|err| MindbidsError::Filesystem(format!("read {export_dir}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| MindbidsError::Filesystem(err.to_string()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if regex.is_match(name) {
            candidates.push(export_dir.join(name));
        }
    }
    candidates.sort();
    let archive = candidates
        .into_iter()
        .next()
        .ok_or_else(|| MindbidsError::MissingInput(export_dir.join(format!("{prefix}*.zip"))))?;

    let stem = archive
        .file_stem()
        .ok_or_else(|| MindbidsError::Filesystem(format!("invalid archive name: {archive}")))?;
    let target_dir = export_dir.join(stem);
    info!(archive = %archive, target = %target_dir, "extracting responses archive");
    fs::create_dir_all(target_dir.as_std_path())
        .map_err(|err| MindbidsError::Filesystem(err.to_string()))?;
    archive::extract(&archive, &target_dir)?;
    Ok(target_dir)
}

fn find_by_name(dir: &Utf8Path, name: &str) -> Result<Vec<Utf8PathBuf>, MindbidsError> {
    let mut matches = Vec::new();
    let mut stack = vec![dir.to_owned()];
    while let Some(current) = stack.pop() {
        let entries = fs::read_dir(current.as_std_path())
            .map_err(|err| MindbidsError::Filesystem(format!("read {current}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| MindbidsError::Filesystem(err.to_string()))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let path = current.join(file_name);
            if path.as_std_path().is_dir() {
                stack.push(path);
            } else if file_name == name {
                matches.push(path);
            }
        }
    }
    matches.sort();
    Ok(matches)
}

fn ms_epoch_to_rfc3339(raw: &str) -> Option<String> {
    let millis = raw.trim().parse::<i64>().ok()?;
    DateTime::<Utc>::from_timestamp_millis(millis).map(|stamp| stamp.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_epoch_renders_utc() {
        let rendered = ms_epoch_to_rfc3339("1700000000000").unwrap();
        assert!(rendered.starts_with("2023-11-14T"));
        assert!(rendered.ends_with("+00:00"));
    }

    #[test]
    fn ms_epoch_rejects_non_numeric() {
        assert_eq!(ms_epoch_to_rfc3339("yesterday"), None);
    }
}
