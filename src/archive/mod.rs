// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Archive store — thin wrapper over a ZIP container
//!
//! Knows nothing about configuration semantics: it writes files and folders
//! under archive paths, lists and reads entries back, and extracts the whole
//! container into a directory. Writing and reading are separate types because
//! the `zip` crate keeps them apart.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, Write};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Why an archive counts as empty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyArchive {
    /// Zero bytes were supplied
    ZeroLength,
    /// The container is readable but lists no files
    NoFiles,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive is empty ({0:?})")]
    Empty(EmptyArchive),
    #[error("archive is not a valid ZIP container: {0}")]
    Corrupt(#[from] zip::result::ZipError),
    #[error("archive entry escapes the destination: {0}")]
    UnsafePath(String),
    #[error("archive entry collides with another entry: {0}")]
    Conflict(String),
    #[error("archive expands beyond {0} bytes")]
    TooLarge(u64),
    #[error("archive entry not found: {0}")]
    MissingEntry(String),
    #[error("archive already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("archive I/O error: {0}")]
    Io(#[from] io::Error),
}

/// How an archive file on disk is opened for writing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Fail if the file already exists
    Create,
    /// Truncate any existing file
    Overwrite,
}

/// Default cap on the bytes a reader decompresses
pub const DEFAULT_SIZE_LIMIT: u64 = 256 * 1024 * 1024;

/// Longest symlink target taken from an archive
const MAX_LINK_TARGET: u64 = 4096;

/// Largest buffer reserved up front from a size the archive claims
const MAX_PREALLOC: u64 = 1024 * 1024;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

fn dir_options() -> SimpleFileOptions {
    SimpleFileOptions::default().unix_permissions(0o755)
}

/// Normalises an archive path: forward slashes, no leading or trailing separator.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

// ─── Writing ───

pub struct ArchiveWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    dirs: BTreeSet<String>,
    files: usize,
}

impl ArchiveWriter<File> {
    /// Open an archive file on disk
    pub fn create(path: &Path, mode: OpenMode) -> Result<Self, ArchiveError> {
        let mut options = OpenOptions::new();
        options.write(true);
        match mode {
            OpenMode::Create => options.create_new(true),
            OpenMode::Overwrite => options.create(true).truncate(true),
        };
        let file = options.open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                ArchiveError::AlreadyExists(path.to_path_buf())
            } else {
                ArchiveError::Io(e)
            }
        })?;
        Ok(Self::new(file))
    }
}

impl ArchiveWriter<Cursor<Vec<u8>>> {
    pub fn in_memory() -> Self {
        Self::new(Cursor::new(Vec::new()))
    }
}

impl<W: Write + Seek> ArchiveWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            zip: ZipWriter::new(inner),
            dirs: BTreeSet::new(),
            files: 0,
        }
    }

    /// Number of file entries written so far
    pub fn file_count(&self) -> usize {
        self.files
    }

    /// Adds every level of `directory` as a directory entry (`a/`, `a/b/`, ...)
    pub fn add_empty_folder(&mut self, directory: &str) -> Result<(), ArchiveError> {
        let directory = normalize(directory);
        if directory.is_empty() {
            return Ok(());
        }
        let mut current = String::new();
        for token in directory.split('/') {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(token);
            let entry = format!("{}/", current);
            if self.dirs.insert(entry.clone()) {
                self.zip.add_directory(entry, dir_options())?;
            }
        }
        Ok(())
    }

    fn add_parent_folders(&mut self, archive_path: &str) -> Result<(), ArchiveError> {
        if let Some((parent, _)) = archive_path.rsplit_once('/') {
            self.add_empty_folder(parent)?;
        }
        Ok(())
    }

    /// Adds a file from its contents
    pub fn add_file(&mut self, bytes: &[u8], archive_path: &str) -> Result<(), ArchiveError> {
        let archive_path = normalize(archive_path);
        self.add_parent_folders(&archive_path)?;
        self.zip.start_file(archive_path.as_str(), file_options())?;
        self.zip.write_all(bytes)?;
        self.files += 1;
        debug!("Archived {} ({} bytes)", archive_path, bytes.len());
        Ok(())
    }

    /// Adds a symbolic link entry pointing at `target`
    pub fn add_symlink(&mut self, archive_path: &str, target: &str) -> Result<(), ArchiveError> {
        let archive_path = normalize(archive_path);
        self.add_parent_folders(&archive_path)?;
        self.zip.add_symlink(archive_path.as_str(), target, SimpleFileOptions::default())?;
        self.files += 1;
        debug!("Archived link {} -> {}", archive_path, target);
        Ok(())
    }

    /// Adds a file from disk
    pub fn add_file_from_path(&mut self, source: &Path, archive_path: &str) -> Result<(), ArchiveError> {
        let bytes = fs::read(source)?;
        self.add_file(&bytes, archive_path)
    }

    /// Recursively mirrors `source_dir` under `namespace`, keeping empty
    /// directories and symlinks (stored as links, never followed).
    /// Top-level names listed in `exclude` are skipped.
    /// Returns the number of files and links added.
    pub fn add_folder(&mut self, source_dir: &Path, namespace: &str, exclude: &[&str]) -> Result<usize, ArchiveError> {
        let namespace = normalize(namespace);
        self.add_empty_folder(&namespace)?;
        let mut added = 0;
        let walker = WalkDir::new(source_dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() != 1
                    || !exclude.iter().any(|name| entry.file_name() == *name)
            });
        for entry in walker {
            let entry = entry.map_err(|e| {
                ArchiveError::Io(e.into_io_error().unwrap_or_else(|| io::Error::other("walk failed")))
            })?;
            let rel = entry.path().strip_prefix(source_dir).unwrap_or(entry.path());
            let rel = rel.to_string_lossy().replace('\\', "/");
            let archive_path = if namespace.is_empty() {
                rel
            } else {
                format!("{}/{}", namespace, rel)
            };
            if entry.file_type().is_dir() {
                self.add_empty_folder(&archive_path)?;
            } else if entry.file_type().is_symlink() {
                let target = fs::read_link(entry.path())?;
                self.add_symlink(&archive_path, &target.to_string_lossy())?;
                added += 1;
            } else if entry.file_type().is_file() {
                self.add_file_from_path(entry.path(), &archive_path)?;
                added += 1;
            }
        }
        Ok(added)
    }

    /// Finalises the container and hands back the underlying writer
    pub fn close(self) -> Result<W, ArchiveError> {
        Ok(self.zip.finish()?)
    }
}

// ─── Reading ───

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Symlink,
}

/// A file or link written into the extraction directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedEntry {
    /// Path relative to the extraction directory, `/`-separated
    pub path: String,
    pub kind: EntryKind,
}

/// Splits a raw entry name into its relative path and whether it names a
/// directory. Only plain `a/b/c` names pass: no empty, `.` or `..`
/// segments, no leading separator, no backslashes.
fn entry_path(raw: &str) -> Option<(&str, bool)> {
    let (name, is_dir) = match raw.strip_suffix('/') {
        Some(name) => (name, true),
        None => (raw, false),
    };
    let plain = !name.is_empty()
        && !name.contains(['\\', '\0'])
        && name.split('/').all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    plain.then_some((name, is_dir))
}

fn is_symlink(unix_mode: Option<u32>) -> bool {
    unix_mode.is_some_and(|mode| mode & S_IFMT == S_IFLNK)
}

/// Names claimed so far during one extraction
#[derive(Default)]
struct EntryTree {
    dirs: BTreeSet<String>,
    leaves: BTreeSet<String>,
}

impl EntryTree {
    fn add_dir(&mut self, name: &str) -> Result<(), ArchiveError> {
        self.claim_parents(name)?;
        if self.leaves.contains(name) {
            return Err(ArchiveError::Conflict(name.to_string()));
        }
        self.dirs.insert(name.to_string());
        Ok(())
    }

    /// Files and links: unique, and nothing may live below them
    fn add_leaf(&mut self, name: &str) -> Result<(), ArchiveError> {
        self.claim_parents(name)?;
        if self.dirs.contains(name) || !self.leaves.insert(name.to_string()) {
            return Err(ArchiveError::Conflict(name.to_string()));
        }
        Ok(())
    }

    fn claim_parents(&mut self, name: &str) -> Result<(), ArchiveError> {
        for (end, _) in name.match_indices('/') {
            let parent = &name[..end];
            if self.leaves.contains(parent) {
                return Err(ArchiveError::Conflict(name.to_string()));
            }
            self.dirs.insert(parent.to_string());
        }
        Ok(())
    }
}

pub struct ArchiveReader<R: Read + Seek> {
    zip: ZipArchive<R>,
    size_limit: u64,
}

impl ArchiveReader<File> {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(ArchiveError::Empty(EmptyArchive::ZeroLength));
        }
        Self::from_reader(file)
    }
}

impl ArchiveReader<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ArchiveError> {
        if bytes.is_empty() {
            return Err(ArchiveError::Empty(EmptyArchive::ZeroLength));
        }
        Self::from_reader(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> ArchiveReader<R> {
    fn from_reader(reader: R) -> Result<Self, ArchiveError> {
        let reader = Self {
            zip: ZipArchive::new(reader)?,
            size_limit: DEFAULT_SIZE_LIMIT,
        };
        if reader.list_files().is_empty() {
            return Err(ArchiveError::Empty(EmptyArchive::NoFiles));
        }
        Ok(reader)
    }

    /// Caps the decompressed bytes of one `read_file` or a whole `extract_all`
    pub fn with_size_limit(mut self, limit: u64) -> Self {
        self.size_limit = limit;
        self
    }

    /// File entries only, trimmed of separators, sorted
    pub fn list_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self
            .zip
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(normalize)
            .filter(|name| !name.is_empty())
            .collect();
        files.sort();
        files
    }

    /// Case-insensitive lookup. A path ending in `/` matches a directory
    /// entry or any entry below it.
    pub fn exists(&self, archive_path: &str) -> bool {
        let wanted = archive_path.replace('\\', "/").trim_start_matches('/').to_lowercase();
        if wanted.is_empty() {
            return false;
        }
        self.zip.file_names().any(|name| {
            let name = name.trim_start_matches('/').to_lowercase();
            if wanted.ends_with('/') {
                name.starts_with(&wanted)
            } else {
                name == wanted || name.trim_end_matches('/') == wanted
            }
        })
    }

    /// True only if every path exists
    pub fn exists_all<I, S>(&self, archive_paths: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        archive_paths.into_iter().all(|path| self.exists(path.as_ref()))
    }

    pub fn read_file(&mut self, archive_path: &str) -> Result<Vec<u8>, ArchiveError> {
        let limit = self.size_limit;
        let name = normalize(archive_path);
        let index = self
            .zip
            .index_for_name(&name)
            .or_else(|| self.zip.index_for_name(&format!("/{}", name)))
            .ok_or_else(|| ArchiveError::MissingEntry(name.clone()))?;
        let mut entry = self.zip.by_index(index)?;
        if entry.size() > limit {
            return Err(ArchiveError::TooLarge(limit));
        }
        let mut buf = Vec::with_capacity(entry.size().min(MAX_PREALLOC) as usize);
        (&mut entry).take(limit + 1).read_to_end(&mut buf)?;
        if buf.len() as u64 > limit {
            return Err(ArchiveError::TooLarge(limit));
        }
        Ok(buf)
    }

    /// Extracts every entry below `destination` and returns what was
    /// written, sorted by path. Names that are not plain relative paths,
    /// entries that collide, and archives expanding past the size limit
    /// are refused.
    pub fn extract_all(&mut self, destination: &Path) -> Result<Vec<StagedEntry>, ArchiveError> {
        fs::create_dir_all(destination)?;
        let limit = self.size_limit;
        let mut tree = EntryTree::default();
        let mut staged = Vec::new();
        let mut total: u64 = 0;

        for index in 0..self.zip.len() {
            let mut entry = self.zip.by_index(index)?;
            let raw = entry.name().to_string();
            if entry.enclosed_name().is_none() {
                return Err(ArchiveError::UnsafePath(raw));
            }
            let (name, is_dir) = entry_path(&raw).ok_or_else(|| ArchiveError::UnsafePath(raw.clone()))?;
            let target = destination.join(name);
            if is_dir {
                tree.add_dir(name)?;
                fs::create_dir_all(&target)?;
                continue;
            }
            tree.add_leaf(name)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            let budget = limit.saturating_sub(total);
            if entry.size() > budget {
                return Err(ArchiveError::TooLarge(limit));
            }
            let kind = if is_symlink(entry.unix_mode()) {
                let mut link = Vec::new();
                (&mut entry).take(MAX_LINK_TARGET + 1).read_to_end(&mut link)?;
                let link = String::from_utf8(link)
                    .ok()
                    .filter(|link| !link.is_empty() && !link.contains('\0') && link.len() as u64 <= MAX_LINK_TARGET)
                    .ok_or_else(|| ArchiveError::UnsafePath(raw.clone()))?;
                symlink(&link, &target)?;
                total += link.len() as u64;
                EntryKind::Symlink
            } else {
                let mut out = File::create(&target)?;
                let copied = io::copy(&mut (&mut entry).take(budget + 1), &mut out)?;
                if copied > budget {
                    return Err(ArchiveError::TooLarge(limit));
                }
                total += copied;
                EntryKind::File
            };
            staged.push(StagedEntry { path: name.to_string(), kind });
        }
        staged.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Extracted {} entries ({} bytes) to {}", staged.len(), total, destination.display());
        Ok(staged)
    }
}
