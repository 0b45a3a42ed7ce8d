use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::domain::DatasetFilename;
use crate::error::MirrorError;
use crate::table::{DatasetRecord, DatasetTable};

/// Scans the local mirror tree into a dataset table with a `file_path`
/// column.
///
/// Unrecognized filenames are skipped silently. File symlinks are statted
/// through to the target; directory symlinks are not followed, so a cyclic
/// link cannot loop the walk.
pub fn scan_tree(root: &Utf8Path) -> Result<DatasetTable, MirrorError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| MirrorError::Filesystem(format!("read {dir}: {err}")))?;
        for entry in entries {
            let entry = entry.map_err(|err| MirrorError::Filesystem(err.to_string()))?;
            let path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|path| MirrorError::Filesystem(format!("non-utf8 path {path:?}")))?;
            // Only real directories recurse; the dir check must not
            // follow links.
            let link_metadata = fs::symlink_metadata(path.as_std_path())
                .map_err(|err| MirrorError::Filesystem(format!("stat {path}: {err}")))?;
            if link_metadata.is_dir() {
                stack.push(path);
                continue;
            }
            let metadata = fs::metadata(path.as_std_path())
                .map_err(|err| MirrorError::Filesystem(format!("stat {path}: {err}")))?;
            if metadata.is_file() {
                files.push((path, metadata.len()));
            }
        }
    }
    files.sort();

    let mut table = DatasetTable::new();
    for (path, size) in files {
        let Some(name) = path.file_name() else {
            continue;
        };
        let Some(parsed) = DatasetFilename::parse(name) else {
            debug!(%path, "skipping unrecognized file");
            continue;
        };
        let (instrument, level) = dsid_tokens(&parsed.dsid);
        table.push(DatasetRecord {
            file_name: name.to_string(),
            item_id: parsed.item_id.clone(),
            item_version: parsed.version as i64,
            file_size: size as i64,
            begin_time_fn: parsed.begin_time(),
            instrument,
            processing_level: level,
            file_path: Some(path),
            ..DatasetRecord::default()
        });
    }
    Ok(table)
}

/// Instrument and level tokens read off the DSID string.
///
/// Works for any recognized filename, including those whose DSID is not a
/// valid dataset identifier; such rows never match a subset rule but stay
/// visible to the diff.
fn dsid_tokens(dsid: &str) -> (String, String) {
    let mut parts = dsid.splitn(3, '_');
    let _source = parts.next();
    let level = parts.next().unwrap_or("").to_string();
    let descriptor = parts.next().unwrap_or("");
    let instrument = descriptor.split('-').next().unwrap_or("").to_string();
    (instrument, level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_recognized_files_only() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap();
        let nested = root.join("epd/L1/2020/08/13");
        fs::create_dir_all(nested.as_std_path()).unwrap();
        fs::write(
            nested.join("solo_L1_epd-sis-a-rates-slow_20200813_V02.cdf").as_std_path(),
            vec![0u8; 120],
        )
        .unwrap();
        fs::write(root.join("README.txt").as_std_path(), b"notes").unwrap();

        let table = scan_tree(root).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.file_sizes(), [120]);
        assert_eq!(table.instruments(), ["EPD"]);
        assert_eq!(table.processing_levels(), ["L1"]);
        assert!(table.file_paths()[0]
            .as_ref()
            .unwrap()
            .ends_with("solo_L1_epd-sis-a-rates-slow_20200813_V02.cdf"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = scan_tree(Utf8Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, MirrorError::Filesystem(_)));
    }

    #[test]
    fn unknown_level_files_are_visible() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap();
        fs::write(
            root.join("solo_L0_swa-eas_20200813_V01.cdf").as_std_path(),
            vec![0u8; 10],
        )
        .unwrap();

        let table = scan_tree(root).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.instruments(), ["SWA"]);
        assert_eq!(table.processing_levels(), ["L0"]);
    }

    #[cfg(unix)]
    #[test]
    fn cyclic_directory_symlink_does_not_loop() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap();
        let nested = root.join("epd");
        fs::create_dir_all(nested.as_std_path()).unwrap();
        fs::write(
            nested
                .join("solo_L1_epd-sis-a-rates-slow_20200813_V02.cdf")
                .as_std_path(),
            b"data",
        )
        .unwrap();
        std::os::unix::fs::symlink(root.as_std_path(), nested.join("loop").as_std_path())
            .unwrap();

        let table = scan_tree(root).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn file_symlinks_stat_the_target() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(temp.path()).unwrap();
        let target = root.join("target.bin");
        fs::write(target.as_std_path(), vec![0u8; 64]).unwrap();
        std::os::unix::fs::symlink(
            target.as_std_path(),
            root.join("solo_L1_mag_20200813_V02.cdf").as_std_path(),
        )
        .unwrap();

        let table = scan_tree(root).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.file_sizes(), [64]);
    }
}
