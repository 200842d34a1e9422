use std::fs;
use std::io::{Cursor, Read};

use camino::{Utf8Path, Utf8PathBuf};
use zip::ZipArchive;

use crate::error::PgxError;

/// Reads one named member out of an in-memory zip archive.
pub fn extract_entry(archive: &[u8], name: &str) -> Result<Vec<u8>, PgxError> {
    let mut archive =
        ZipArchive::new(Cursor::new(archive)).map_err(|err| PgxError::Archive(err.to_string()))?;
    let mut entry = archive
        .by_name(name)
        .map_err(|err| PgxError::Archive(format!("{name}: {err}")))?;
    if entry.enclosed_name().is_none() {
        return Err(PgxError::Archive(
            "zip entry path traversal detected".to_string(),
        ));
    }
    // The declared size comes from the archive header and is not trusted.
    let mut content = Vec::new();
    entry
        .read_to_end(&mut content)
        .map_err(|err| PgxError::Archive(format!("{name}: {err}")))?;
    Ok(content)
}

/// Writes through a temp file in the destination directory so readers never
/// observe a half-written file.
pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), PgxError> {
    let parent = parent_dir(path);
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| PgxError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix("kira-pgx-file")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| PgxError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), content).map_err(|err| PgxError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| PgxError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Only regular files are removed; anything else at `path` is left alone.
pub fn remove_if_exists(path: &Utf8Path) -> Result<bool, PgxError> {
    if !path.as_std_path().is_file() {
        return Ok(false);
    }
    fs::remove_file(path.as_std_path()).map_err(|err| PgxError::Filesystem(err.to_string()))?;
    Ok(true)
}

/// `path` itself when free, otherwise the first `path_N` that is.
pub fn unique_path(path: Utf8PathBuf) -> Utf8PathBuf {
    if !path.as_std_path().exists() {
        return path;
    }
    let mut counter = 1u32;
    loop {
        let candidate = Utf8PathBuf::from(format!("{path}_{counter}"));
        if !candidate.as_std_path().exists() {
            return candidate;
        }
        counter += 1;
    }
}

fn parent_dir(path: &Utf8Path) -> &Utf8Path {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    }
}
