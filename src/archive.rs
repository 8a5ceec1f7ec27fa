// Archive builder: bundle matching .log files into a compressed ZIP
//
// Pure function of (base_name, pid, timestamp) over the filesystem at call
// time. Originals are always left in place.

use crate::filestore::path_with_suffix;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("base name must not be empty")]
    EmptyBaseName,
    #[error("timestamp must not be empty")]
    EmptyTimestamp,
    #[error("no log files found for {0}")]
    NoCandidates(PathBuf),
    #[error("all candidate log files were empty")]
    NothingToArchive,
    #[error("failed to create archive {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("failed to add {path} to archive: {source}")]
    Append { path: PathBuf, source: io::Error },
    #[error("failed to finish archive: {0}")]
    Finish(#[source] io::Error),
}

/// Create `<base>_<pid>_<timestamp>.zip` from every non-empty `.log` file
/// whose name starts with the final component of `base_name`.
///
/// Fails without leaving an archive behind when the inputs are empty, no
/// candidate exists, every candidate is empty, or the archive cannot be
/// written out.
pub fn create_archive(
    base_name: &Path,
    process_id: u32,
    timestamp: &str,
) -> Result<PathBuf, ArchiveError> {
    if base_name.as_os_str().is_empty() {
        return Err(ArchiveError::EmptyBaseName);
    }
    if timestamp.is_empty() {
        return Err(ArchiveError::EmptyTimestamp);
    }

    let candidates = collect_log_files(base_name);
    if candidates.is_empty() {
        return Err(ArchiveError::NoCandidates(base_name.to_owned()));
    }

    let archive_path = path_with_suffix(base_name, &format!("_{process_id}_{timestamp}.zip"));
    let file = File::create(&archive_path).map_err(|source| ArchiveError::Create {
        path: archive_path.clone(),
        source,
    })?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut added = 0usize;
    for candidate in &candidates {
        let size = match fs::metadata(candidate) {
            Ok(metadata) => metadata.len(),
            // Unreadable candidates are skipped, matching the scan policy
            Err(_) => continue,
        };
        if size == 0 {
            continue;
        }

        if let Err(source) = append_entry(&mut zip, candidate, options) {
            discard(zip, &archive_path);
            return Err(ArchiveError::Append {
                path: candidate.clone(),
                source,
            });
        }
        added += 1;
    }

    if added == 0 {
        discard(zip, &archive_path);
        return Err(ArchiveError::NothingToArchive);
    }

    if let Err(error) = zip.finish() {
        let _ = fs::remove_file(&archive_path);
        return Err(ArchiveError::Finish(error.into()));
    }
    Ok(archive_path)
}

/// Stream one file into the archive under its basename, never reading the
/// whole file into memory.
fn append_entry(
    zip: &mut ZipWriter<File>,
    path: &Path,
    options: SimpleFileOptions,
) -> Result<(), io::Error> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    zip.start_file(name, options)?;
    let mut source = File::open(path)?;
    io::copy(&mut source, zip)?;
    Ok(())
}

fn discard(zip: ZipWriter<File>, archive_path: &Path) {
    drop(zip);
    let _ = fs::remove_file(archive_path);
}

/// Regular `.log` files in `base_name`'s directory whose filename begins
/// with the bare filename component of `base_name`, sorted by name.
fn collect_log_files(base_name: &Path) -> Vec<PathBuf> {
    let stem = match base_name.file_name() {
        Some(stem) => stem.to_string_lossy().into_owned(),
        None => return Vec::new(),
    };
    let dir = match base_name.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path.extension().map(|e| e == "log").unwrap_or(false)
                && path
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with(&stem))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn base_in(dir: &TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    #[test]
    fn test_archive_skips_empty_and_preserves_originals() {
        let dir = TempDir::new().unwrap();
        let base = base_in(&dir, "B");

        fs::write(dir.path().join("B.log"), b"primary contents").unwrap();
        fs::write(dir.path().join("B.1.log"), b"rotated contents").unwrap();
        fs::write(dir.path().join("B.2.log"), b"").unwrap();

        let archive = create_archive(&base, 77, "20240101000000").unwrap();
        assert_eq!(archive, dir.path().join("B_77_20240101000000.zip"));

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["B.1.log", "B.log"]);

        let mut contents = String::new();
        zip.by_name("B.log")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "primary contents");

        // Originals stay in place
        assert!(dir.path().join("B.log").exists());
        assert!(dir.path().join("B.1.log").exists());
        assert!(dir.path().join("B.2.log").exists());
    }

    #[test]
    fn test_empty_timestamp_rejected_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let base = base_in(&dir, "B");
        fs::write(dir.path().join("B.log"), b"data").unwrap();

        let result = create_archive(&base, 1, "");
        assert!(matches!(result, Err(ArchiveError::EmptyTimestamp)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_empty_base_name_rejected() {
        let result = create_archive(Path::new(""), 1, "20240101000000");
        assert!(matches!(result, Err(ArchiveError::EmptyBaseName)));
    }

    #[test]
    fn test_no_candidates_fails() {
        let dir = TempDir::new().unwrap();
        let base = base_in(&dir, "missing");

        let result = create_archive(&base, 1, "20240101000000");
        assert!(matches!(result, Err(ArchiveError::NoCandidates(_))));
    }

    #[test]
    fn test_all_empty_candidates_leaves_no_archive() {
        let dir = TempDir::new().unwrap();
        let base = base_in(&dir, "B");
        fs::write(dir.path().join("B.log"), b"").unwrap();

        let result = create_archive(&base, 9, "20240101000000");
        assert!(matches!(result, Err(ArchiveError::NothingToArchive)));
        assert!(!dir.path().join("B_9_20240101000000.zip").exists());
    }

    #[test]
    fn test_unrelated_files_are_not_archived() {
        let dir = TempDir::new().unwrap();
        let base = base_in(&dir, "B");

        fs::write(dir.path().join("B.log"), b"mine").unwrap();
        fs::write(dir.path().join("other.log"), b"not mine").unwrap();
        fs::write(dir.path().join("B.txt"), b"wrong extension").unwrap();

        let archive = create_archive(&base, 5, "20240101000000").unwrap();
        let zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
    }
}
