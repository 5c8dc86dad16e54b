// Copyright 2022 Debox Developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//
use std::fmt::{Debug, Formatter};
use std::io::{Error, ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Trait that defines the interface for interaction with the backing storage.
///
/// Paths handed to the trait are normalized, slash-rooted paths relative to the
/// storage root (`"/"`, `"/docs/a.txt"`). Implementations own path-traversal
/// safety for their backing store.
#[async_trait]
pub trait StorageApi: Send + Sync + Debug {
    /// Display entry status.
    async fn metadata(&self, path: &str) -> Result<StorageEntry, Error>;

    /// Check whether an entry exists.
    async fn exists(&self, path: &str) -> bool {
        self.metadata(path).await.is_ok()
    }

    /// List the direct children of a directory.
    async fn read_dir(&self, path: &str) -> Result<Vec<StorageEntry>, Error>;

    /// Read up to `count` bytes of a file starting at `offset`.
    async fn read(&self, path: &str, offset: u64, count: usize) -> Result<Bytes, Error>;

    /// Open a file for writing, creating it if needed. Without `append` the
    /// file is truncated.
    async fn open_write(&self, path: &str, append: bool) -> Result<Box<dyn StorageFile>, Error>;

    /// Make a directory. The parent must exist.
    async fn mkdir(&self, path: &str) -> Result<(), Error>;

    /// Move files and directories.
    async fn rename(&self, path: &str, dest: &str) -> Result<(), Error>;

    /// Remove a file.
    async fn remove(&self, path: &str) -> Result<(), Error>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &str) -> Result<(), Error>;
}

/// An open write handle, kept alive across the chunks of one upload.
#[async_trait]
pub trait StorageFile: Send + Debug {
    async fn write_bytes(&mut self, data: Bytes) -> Result<(), Error>;

    async fn flush(&mut self) -> Result<(), Error>;
}

/// Storage entity representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    /// Normalized path of the entity.
    pub path: String,

    /// Last path segment, empty for the root.
    pub name: String,

    /// Time of entity modification.
    pub mtime: SystemTime,

    /// Whether the entity is a directory.
    pub is_dir: bool,

    /// Whether the entity is reached through a symbolic link. Recursive
    /// listings do not descend into linked directories.
    pub is_link: bool,

    /// Size of the entity in bytes.
    pub size: u64,
}

impl StorageEntry {
    fn from_metadata(path: &str, meta: &std::fs::Metadata, is_link: bool) -> Self {
        Self {
            path: path.to_string(),
            name: file_name(path),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_dir: meta.is_dir(),
            is_link,
            size: if meta.is_dir() { 0 } else { meta.len() },
        }
    }
}

/// The default storage: a directory tree on the local filesystem.
pub struct LocalApi {
    root: PathBuf,
}

impl LocalApi {
    /// Creates a `LocalApi` serving the directory at `root`.
    ///
    /// The root is canonicalized once so containment checks compare like with like.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Box<LocalApi>, Error> {
        let root = std::fs::canonicalize(root)?;
        if !root.is_dir() {
            return Err(Error::new(ErrorKind::InvalidInput, "storage root is not a directory"));
        }
        Ok(Box::new(LocalApi { root }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a storage path onto the host filesystem, refusing anything that
    /// would land outside the root.
    async fn host_path(&self, path: &str) -> Result<PathBuf, Error> {
        let mut host = self.root.clone();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(segment) => host.push(segment),
                Component::CurDir => {}
                _ => return Err(escape_error(path)),
            }
        }

        // Symlinks may still point elsewhere; resolve the deepest existing ancestor.
        for ancestor in host.ancestors() {
            match fs::canonicalize(ancestor).await {
                Ok(real) if real.starts_with(&self.root) => return Ok(host),
                Ok(_) => return Err(escape_error(path)),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Err(escape_error(path))
    }
}

impl Debug for LocalApi {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalApi({})", self.root.display())
    }
}

#[async_trait]
impl StorageApi for LocalApi {
    async fn metadata(&self, path: &str) -> Result<StorageEntry, Error> {
        trace!("LFS: metadata {:?}", path);
        let host = self.host_path(path).await?;
        let is_link = fs::symlink_metadata(&host).await?.file_type().is_symlink();
        let meta = fs::metadata(&host).await?;
        Ok(StorageEntry::from_metadata(&normalize_path(path), &meta, is_link))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<StorageEntry>, Error> {
        trace!("LFS: read_dir {:?}", path);
        let path = normalize_path(path);
        let host = self.host_path(&path).await?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&host).await?;
        while let Some(child) = dir.next_entry().await? {
            let name = match child.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    warn!("LFS: skipping non utf-8 entry {:?} in {:?}", name, path);
                    continue;
                }
            };
            let is_link = child.file_type().await.map(|t| t.is_symlink()).unwrap_or(false);
            // Follows symlinks like the classifier does.
            match fs::metadata(child.path()).await {
                Ok(meta) => entries.push(StorageEntry::from_metadata(
                    &concat_path(&path, &name),
                    &meta,
                    is_link,
                )),
                Err(e) => warn!("LFS: skipping {:?} in {:?}: {}", name, path, e),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &str, offset: u64, count: usize) -> Result<Bytes, Error> {
        trace!("LFS: read {:?} ({} bytes at {})", path, count, offset);
        let host = self.host_path(path).await?;
        let mut file = File::open(&host).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(count);
        file.take(count as u64).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn open_write(&self, path: &str, append: bool) -> Result<Box<dyn StorageFile>, Error> {
        trace!("LFS: open_write {:?} append={}", path, append);
        let host = self.host_path(path).await?;
        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options.open(&host).await?;
        Ok(Box::new(LocalFile { path: normalize_path(path), file }))
    }

    async fn mkdir(&self, path: &str) -> Result<(), Error> {
        trace!("LFS: mkdir {:?}", path);
        let host = self.host_path(path).await?;
        fs::create_dir(&host).await
    }

    async fn rename(&self, path: &str, dest: &str) -> Result<(), Error> {
        trace!("LFS: rename {:?} {:?}", path, dest);
        let from = self.host_path(path).await?;
        let to = self.host_path(dest).await?;
        if from == self.root || to == self.root {
            return Err(Error::new(ErrorKind::PermissionDenied, "cannot move the storage root"));
        }
        fs::rename(&from, &to).await
    }

    async fn remove(&self, path: &str) -> Result<(), Error> {
        trace!("LFS: remove {:?}", path);
        let host = self.host_path(path).await?;
        fs::remove_file(&host).await
    }

    async fn rmdir(&self, path: &str) -> Result<(), Error> {
        trace!("LFS: rmdir {:?}", path);
        let host = self.host_path(path).await?;
        if host == self.root {
            return Err(Error::new(ErrorKind::PermissionDenied, "cannot remove the storage root"));
        }
        fs::remove_dir(&host).await
    }
}

#[derive(Debug)]
struct LocalFile {
    path: String,
    file: File,
}

#[async_trait]
impl StorageFile for LocalFile {
    async fn write_bytes(&mut self, data: Bytes) -> Result<(), Error> {
        trace!("LF: write_bytes {:?} ({} bytes)", self.path, data.len());
        self.file.write_all(&data).await
    }

    async fn flush(&mut self) -> Result<(), Error> {
        trace!("LF: flush {:?}", self.path);
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

#[inline]
fn escape_error(path: &str) -> Error {
    Error::new(ErrorKind::PermissionDenied, format!("path escapes storage root: {}", path))
}

#[inline]
fn concat_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

#[inline]
fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or_default().to_string()
}

#[inline]
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let api = LocalApi::new(dir.path()).unwrap();

        let mut file = api.open_write("/a.txt", false).await.unwrap();
        file.write_bytes(Bytes::from_static(b"hello ")).await.unwrap();
        file.write_bytes(Bytes::from_static(b"world")).await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let entry = api.metadata("/a.txt").await.unwrap();
        assert_eq!(entry.name, "a.txt");
        assert_eq!(entry.size, 11);
        assert!(!entry.is_dir);
        assert_eq!(&api.read("/a.txt", 6, 100).await.unwrap()[..], b"world");
    }

    #[tokio::test]
    async fn lists_children_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let api = LocalApi::new(dir.path()).unwrap();

        let entries = api.read_dir("/").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["/a", "/b.txt"]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].size, 2);
    }

    #[tokio::test]
    async fn refuses_parent_components() {
        let dir = tempfile::tempdir().unwrap();
        let api = LocalApi::new(dir.path()).unwrap();
        let err = api.metadata("/../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn refuses_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), b"x").unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let api = LocalApi::new(dir.path()).unwrap();

        let err = api.metadata("/link/secret").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn marks_symlinked_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();
        let api = LocalApi::new(dir.path()).unwrap();

        let entries = api.read_dir("/").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir && entries[0].is_link);
        assert!(entries[1].is_dir && !entries[1].is_link);
        assert!(api.metadata("/loop").await.unwrap().is_link);
        assert!(!api.metadata("/").await.unwrap().is_link);
    }

    #[tokio::test]
    async fn root_cannot_be_removed() {
        let dir = tempfile::tempdir().unwrap();
        let api = LocalApi::new(dir.path()).unwrap();
        assert!(api.rmdir("/").await.is_err());
        assert!(dir.path().exists());
    }
}
