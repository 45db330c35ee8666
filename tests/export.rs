use std::fs;
use std::io::Write;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use mindbids::error::MindbidsError;
use mindbids::export::MindloggerExport;
use mindbids::writer::{BidsWriter, MergeStrategy};

fn write_zip(path: &Utf8Path, files: &[(&str, &[u8])]) {
    let file = fs::File::create(path.as_std_path()).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
}

/// A minimal export: one report with a pre-carrier row, a study_id carrier,
/// a value response, a csv response, and a media response.
fn sample_export(temp: &tempfile::TempDir) -> Utf8PathBuf {
    let export_dir = Utf8PathBuf::from_path_buf(temp.path().join("export")).unwrap();
    fs::create_dir_all(export_dir.as_std_path()).unwrap();

    let report = "\
id,item,response\n\
r0,survey_q,value: 5\n\
r1,study_id,S01\n\
r2,draw_item,abc-trail1.csv\n\
r3,video_item,clip.mp4\n";
    fs::write(export_dir.join("report.csv").as_std_path(), report).unwrap();

    write_zip(
        &export_dir.join("drawing-responses-2024.zip"),
        &[("sketch.svg", b"<svg/>".as_slice())],
    );
    write_zip(
        &export_dir.join("media-responses-2024.zip"),
        &[("clip.mp4", b"media-bytes".as_slice())],
    );
    write_zip(
        &export_dir.join("trails-responses-2024.zip"),
        &[("abc-trail1.csv", b"x,y\n1,2\n3,4\n".as_slice())],
    );
    export_dir
}

#[test]
fn open_fails_without_report() {
    let temp = tempfile::tempdir().unwrap();
    let export_dir = Utf8PathBuf::from_path_buf(temp.path().join("export")).unwrap();
    fs::create_dir_all(export_dir.as_std_path()).unwrap();

    let err = MindloggerExport::open(&export_dir).unwrap_err();
    assert_matches!(err, MindbidsError::MissingInput(path) if path.ends_with("report.csv"));
}

#[test]
fn open_fails_without_responses_archive() {
    let temp = tempfile::tempdir().unwrap();
    let export_dir = sample_export(&temp);
    fs::remove_file(export_dir.join("media-responses-2024.zip").as_std_path()).unwrap();

    let err = MindloggerExport::open(&export_dir).unwrap_err();
    assert_matches!(err, MindbidsError::MissingInput(path) if path.as_str().contains("media-responses-"));
}

#[test]
fn responses_resolve_to_the_expected_payloads() {
    let temp = tempfile::tempdir().unwrap();
    let export = MindloggerExport::open(&sample_export(&temp)).unwrap();
    let model = export.to_model("Oak export").unwrap();

    // study_id carrier row produces no entity.
    assert_eq!(model.entities().len(), 3);
    assert_eq!(model.subject_ids(), ["S01"]);
    assert!(!model.has_sessions());

    let value_entity = &model.entities()[0];
    assert_eq!(value_entity.task_name, "survey_q");
    assert_eq!(value_entity.suffix, ".tsv");
    assert!(value_entity.is_tabular_data());

    let csv_entity = &model.entities()[1];
    assert_eq!(csv_entity.task_name, "draw_item");
    assert_eq!(csv_entity.suffix, ".tsv");
    assert!(csv_entity.is_tabular_data());

    let media_entity = &model.entities()[2];
    assert_eq!(media_entity.task_name, "video_item");
    assert_eq!(media_entity.suffix, ".mp4");
    assert!(media_entity.is_file_resource());
}

#[test]
fn rows_before_the_first_study_id_are_backfilled() {
    let temp = tempfile::tempdir().unwrap();
    let export = MindloggerExport::open(&sample_export(&temp)).unwrap();
    let model = export.to_model("Oak export").unwrap();

    // The value row precedes the study_id carrier in the report.
    assert_eq!(model.entities()[0].subject_id, "S01");
}

#[test]
fn rows_between_carriers_take_the_next_study_id_below() {
    let temp = tempfile::tempdir().unwrap();
    let export_dir = sample_export(&temp);
    // The row directly below a carrier belongs to that carrier; the
    // remaining rows belong to the next carrier below them.
    let report = "\
id,item,response\n\
r0,study_id,S01\n\
r1,draw_item,abc-trail1.csv\n\
r2,video_item,clip.mp4\n\
r3,study_id,S02\n\
r4,survey_q,value: 7\n";
    fs::write(export_dir.join("report.csv").as_std_path(), report).unwrap();

    let export = MindloggerExport::open(&export_dir).unwrap();
    let model = export.to_model("Oak export").unwrap();

    assert_eq!(model.subject_ids(), ["S01", "S02"]);
    let subjects: Vec<(&str, &str)> = model
        .entities()
        .iter()
        .map(|entity| (entity.task_name.as_str(), entity.subject_id.as_str()))
        .collect();
    assert_eq!(
        subjects,
        [
            ("draw_item", "S01"),
            ("video_item", "S02"),
            ("survey_q", "S02"),
        ]
    );
}

#[test]
fn report_without_study_id_fails() {
    let temp = tempfile::tempdir().unwrap();
    let export_dir = sample_export(&temp);
    fs::write(
        export_dir.join("report.csv").as_std_path(),
        "id,item,response\nr0,survey_q,value: 5\n",
    )
    .unwrap();

    let export = MindloggerExport::open(&export_dir).unwrap();
    let err = export.to_model("Oak export").unwrap_err();
    assert_matches!(err, MindbidsError::ExportParse(_));
}

#[test]
fn unknown_artifact_reports_not_found() {
    let temp = tempfile::tempdir().unwrap();
    let export_dir = sample_export(&temp);
    fs::write(
        export_dir.join("report.csv").as_std_path(),
        "id,item,response\nr0,study_id,S01\nr1,video_item,nope.mp4\n",
    )
    .unwrap();

    let export = MindloggerExport::open(&export_dir).unwrap();
    let err = export.to_model("Oak export").unwrap_err();
    assert_matches!(err, MindbidsError::ResponseNotFound(name) if name == "nope.mp4");
}

#[test]
fn artifact_in_multiple_archives_is_ambiguous() {
    let temp = tempfile::tempdir().unwrap();
    let export_dir = sample_export(&temp);
    // clip.mp4 in both media and drawing archives.
    write_zip(
        &export_dir.join("drawing-responses-2024.zip"),
        &[("clip.mp4", b"other".as_slice())],
    );

    let export = MindloggerExport::open(&export_dir).unwrap();
    let err = export.to_model("Oak export").unwrap_err();
    assert_matches!(err, MindbidsError::AmbiguousResponse(name) if name == "clip.mp4");
}

#[test]
fn end_to_end_export_to_dataset() {
    let temp = tempfile::tempdir().unwrap();
    let export = MindloggerExport::open(&sample_export(&temp)).unwrap();
    let model = export.to_model("Oak export").unwrap();

    let root = Utf8PathBuf::from_path_buf(temp.path().join("bids")).unwrap();
    BidsWriter::new(root.clone(), MergeStrategy::Overwrite)
        .write(&model)
        .unwrap();

    let description =
        fs::read_to_string(root.join("dataset_description.json").as_std_path()).unwrap();
    let description: serde_json::Value = serde_json::from_str(&description).unwrap();
    assert_eq!(description["Name"], "Oak export");
    assert_eq!(description["BIDSVersion"], "1.9.0");

    let participants = fs::read_to_string(root.join("participants.tsv").as_std_path()).unwrap();
    assert_eq!(participants, "participant\nS01\n");

    let drawing =
        fs::read_to_string(root.join("sub-S01/beh/sub-S01_task-draw_item.tsv").as_std_path())
            .unwrap();
    assert_eq!(drawing, "x\ty\n1\t2\n3\t4\n");

    let media = fs::read(
        root.join("sub-S01/beh/sub-S01_task-video_item.mp4")
            .as_std_path(),
    )
    .unwrap();
    assert_eq!(media, b"media-bytes");

    // Sidecar carries the report row's metadata.
    let sidecar =
        fs::read_to_string(root.join("sub-S01/beh/sub-S01_task-video_item.json").as_std_path())
            .unwrap();
    let sidecar: serde_json::Value = serde_json::from_str(&sidecar).unwrap();
    assert_eq!(sidecar["mindlogger_id"], "r3");
    assert_eq!(sidecar["response"], "clip.mp4");
}
