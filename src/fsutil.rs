// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Filesystem helpers shared by backup, restore and migration

use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

fn walk_error(e: walkdir::Error) -> io::Error {
    let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
    e.into_io_error()
        .unwrap_or_else(|| io::Error::other(format!("filesystem loop at {}", path)))
}

/// Copies the contents of `src` into `dst`, keeping modes and symlinks.
/// Top-level names in `exclude` are skipped. Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &[&str]) -> io::Result<usize> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.depth() != 1 || !exclude.iter().any(|name| entry.file_name() == *name));
    for entry in walker {
        let entry = entry.map_err(walk_error)?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            let mode = entry.metadata().map_err(walk_error)?.permissions().mode();
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
        } else if file_type.is_symlink() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            symlink(fs::read_link(entry.path())?, &target)?;
        } else if file_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            // fs::copy carries the permission bits over
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Restricts every regular file below `dir` to mode 0600
pub fn make_private(dir: &Path) -> io::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut changed = 0;
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(walk_error)?;
        if entry.file_type().is_file() {
            fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o600))?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// A not-yet-existing sibling of `path`: `.<name>.<tag>-<uuid>`
pub fn sibling_path(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    let file_name = format!(".{}.{}-{}", name, tag, uuid::Uuid::new_v4().simple());
    match path.parent() {
        Some(parent) => parent.join(file_name),
        None => PathBuf::from(file_name),
    }
}

/// Replaces `path` with `bytes` through a temporary sibling and a rename.
/// The previous file's mode is kept.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp = sibling_path(path, "tmp");
    let result = (|| {
        let mut file = fs::File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        if let Ok(meta) = fs::metadata(path) {
            fs::set_permissions(&temp, meta.permissions())?;
        }
        fs::rename(&temp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest over every path, file content and symlink below `root`, in a
/// stable order. A missing root digests as the empty tree.
pub fn tree_digest(root: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    if root.exists() {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(walk_error)?;
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update([0]);
            if entry.file_type().is_file() {
                hasher.update(sha256_file(entry.path())?.as_bytes());
            } else if entry.file_type().is_symlink() {
                hasher.update(fs::read_link(entry.path())?.to_string_lossy().as_bytes());
            }
            hasher.update([0]);
        }
    }
    Ok(hex::encode(hasher.finalize()))
}
