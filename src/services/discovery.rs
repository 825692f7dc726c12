//! Candidate file discovery.
//!
//! CSV lines watch one flat directory and are processed oldest-first by
//! modification time. XML lines walk their whole root; the walk order is
//! whatever the filesystem yields.

use crate::models::FileType;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::time::SystemTime;
use walkdir::WalkDir;

/// `*.csv` files directly inside `dir`, oldest modification first
pub fn list_csv_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to list source directory: {}", dir))?;

    let mut files: Vec<(Utf8PathBuf, SystemTime)> = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry in {}: {}", dir, e);
                continue;
            }
        };

        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            tracing::warn!("Skipping non UTF-8 path in {}", dir);
            continue;
        };
        if !path.as_str().ends_with(".csv") {
            continue;
        }

        // The writer may remove or rename the file between listing and stat
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((path, modified));
    }

    files.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    Ok(files.into_iter().map(|(path, _)| path).collect())
}

/// Every `*.xml` file (extension case-insensitive) below `root`
pub fn find_xml_files(root: &Utf8Path) -> Vec<Utf8PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping unreadable entry under {}: {}", root, e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        })
        .collect()
}

/// Candidates for one poll tick of a line
pub fn discover(file_type: FileType, dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    match file_type {
        FileType::Csv => list_csv_files(dir),
        FileType::Xml => Ok(find_xml_files(dir)),
    }
}
