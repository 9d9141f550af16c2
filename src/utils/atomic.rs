//! Crash-safe file replacement
//!
//! Used for the durable channel's acknowledgment mark and log compaction.
//!
//! # Pattern
//!
//! 1. Write the new content to a sibling `.tmp` file
//! 2. `sync_all()` the temp file
//! 3. Rename it over the destination
//! 4. Sync the parent directory so the rename itself is durable
//!
//! A reader either sees the old file or the new one, never a partial write.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Temp file used while replacing `path`
pub fn temp_path_for(path: &Path) -> PathBuf {
    path.with_extension("tmp")
}

/// Atomically replace `path` with `content`
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> io::Result<()> {
    atomic_write_with(path, |writer| writer.write_all(content))
}

/// Atomically replace `path` with whatever `write_fn` produces
///
/// The writer is buffered; large rewrites never need to be assembled in
/// memory first.
pub fn atomic_write_with<P, F>(path: P, write_fn: F) -> io::Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let path = path.as_ref();
    let temp_path = temp_path_for(path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(&temp_path)?);
    if let Err(e) = write_fn(&mut writer).and_then(|()| writer.flush()) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    sync_parent_dir(path)
}

/// Flush directory metadata (renames, creations) for the parent of `path`
#[cfg(unix)]
pub fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
pub fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Remove `.tmp` leftovers of interrupted replacements in `dir`
///
/// Call on startup, before the directory's files are read.
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> io::Result<usize> {
    let dir = dir.as_ref();
    let mut cleaned = 0;

    if !dir.exists() {
        return Ok(0);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "tmp") {
            fs::remove_file(&path)?;
            cleaned += 1;
        }
    }

    Ok(cleaned)
}
