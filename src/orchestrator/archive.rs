//! Artifact extraction confined to a destination directory.

use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::warn;
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error during extraction: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of one extraction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractReport {
    pub written: usize,
    /// Entry names refused by the path guard.
    pub rejected: Vec<String>,
}

/// Returns `name` as a relative path that cannot leave its parent, or `None`
/// if it is empty, absolute, or has a `..` component.
pub fn safe_relative(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

/// Extracts a zip held in memory into `dest`.
///
/// Entries that would land outside `dest` are skipped with a warning; they
/// never abort the extraction.
pub fn extract_zip(data: &[u8], dest: &Path) -> Result<ExtractReport, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;
    let mut report = ExtractReport::default();
    fs::create_dir_all(dest)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();

        let Some(relative) = safe_relative(&name) else {
            warn!(entry = %name, dest = %dest.display(), "Skipping unsafe archive entry");
            report.rejected.push(name);
            continue;
        };
        let target = dest.join(&relative);
        if !target.starts_with(dest) {
            warn!(entry = %name, dest = %dest.display(), "Skipping archive entry outside destination");
            report.rejected.push(name);
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        report.written += 1;
    }

    Ok(report)
}

/// Copies the contents of `src` (not `src` itself) into `dst`, recursively.
///
/// Top-level entries named in `reserved` are left behind; their names are
/// returned.
pub fn copy_dir_contents(src: &Path, dst: &Path, reserved: &[&str]) -> io::Result<Vec<String>> {
    fs::create_dir_all(dst)?;
    let mut withheld = Vec::new();
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if reserved.iter().any(|r| name.as_os_str() == *r) {
            withheld.push(name.to_string_lossy().into_owned());
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir_contents(&from, &to, &[])?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    withheld.sort();
    Ok(withheld)
}

#[cfg(test)]
pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
