use std::fs;
use std::io;

use camino::Utf8Path;
use zip::ZipArchive;

use crate::error::MindbidsError;

/// Extract a responses archive into `target_dir`.
///
/// The whole archive is checked first: every entry must decompress and must
/// stay inside the extraction directory. Nothing is written until the check
/// passes, so a truncated or hostile archive leaves no partial extraction.
pub fn extract(archive_path: &Utf8Path, target_dir: &Utf8Path) -> Result<(), MindbidsError> {
    let file = fs::File::open(archive_path.as_std_path()).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            MindbidsError::MissingInput(archive_path.to_owned())
        } else {
            archive_error(archive_path, err.to_string())
        }
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| archive_error(archive_path, err.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| archive_error(archive_path, err.to_string()))?;
        if entry.enclosed_name().is_none() {
            return Err(archive_error(
                archive_path,
                format!("entry {} escapes the extraction directory", entry.name()),
            ));
        }
        if !entry.is_dir() {
            io::copy(&mut entry, &mut io::sink())
                .map_err(|err| archive_error(archive_path, err.to_string()))?;
        }
    }

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| archive_error(archive_path, err.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let dest = target_dir.as_std_path().join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&dest).map_err(|err| MindbidsError::Filesystem(err.to_string()))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|err| MindbidsError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&dest).map_err(|err| MindbidsError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| MindbidsError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

fn archive_error(path: &Utf8Path, message: String) -> MindbidsError {
    MindbidsError::Archive {
        path: path.to_owned(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

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

    #[test]
    fn extracts_nested_entries() {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let archive_path = base.join("responses.zip");
        write_zip(
            &archive_path,
            &[("top.csv", b"a,b\n".as_slice()), ("nested/clip.mp4", b"media".as_slice())],
        );

        let target = base.join("out");
        extract(&archive_path, &target).unwrap();
        assert_eq!(fs::read(target.join("top.csv").as_std_path()).unwrap(), b"a,b\n");
        assert_eq!(
            fs::read(target.join("nested/clip.mp4").as_std_path()).unwrap(),
            b"media"
        );
    }

    #[test]
    fn rejects_entries_escaping_the_target() {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let archive_path = base.join("responses.zip");
        write_zip(
            &archive_path,
            &[("../evil.txt", b"x".as_slice()), ("ok.txt", b"y".as_slice())],
        );

        let target = base.join("out");
        let err = extract(&archive_path, &target).unwrap_err();
        assert_matches!(err, MindbidsError::Archive { .. });
        // Checked before anything is written.
        assert!(!target.as_std_path().exists());
    }

    #[test]
    fn missing_archive_is_missing_input() {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let err = extract(&base.join("gone.zip"), &base.join("out")).unwrap_err();
        assert_matches!(err, MindbidsError::MissingInput(path) if path.ends_with("gone.zip"));
    }
}
