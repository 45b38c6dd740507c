//! [`FilesystemPort`] backed by the local filesystem.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

use compact_str::CompactString;

use crate::fs::{Entry, FileKind, FilesystemPort, InodeInfo, Metadata, TrashRecord};
use crate::FsError;

/// Largest buffer allocated for a single `copy_chunk` call.
const MAX_CHUNK_BUFFER: u64 = 8 * 1024 * 1024;

/// Where trashed items go.
#[derive(Debug, Clone, Default)]
pub enum TrashBackend {
    /// The desktop trash, via the `trash` crate.
    #[default]
    System,
    /// A plain directory; each item is renamed into it next to a
    /// `.trashinfo` file recording its original path.
    Directory(PathBuf),
    /// No trash; every trash request fails with `Unsupported`.
    Disabled,
}

/// The local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalFs {
    trash: TrashBackend,
}

impl LocalFs {
    /// Create a local filesystem using the desktop trash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different trash backend.
    pub fn with_trash(mut self, trash: TrashBackend) -> Self {
        self.trash = trash;
        self
    }

    fn trash_into_dir(&self, dir: &Path, path: &Path) -> Result<TrashRecord, FsError> {
        fs::create_dir_all(dir).map_err(|e| FsError::io(dir, e))?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "item".to_string());

        let mut location = dir.join(&name);
        let mut n = 1;
        while fs::symlink_metadata(&location).is_ok() {
            location = dir.join(format!("{name}.{n}"));
            n += 1;
        }

        if let Err(e) = fs::rename(path, &location) {
            return Err(match FsError::io(path, e) {
                FsError::CrossDevice { path } => FsError::Unsupported { path },
                other => other,
            });
        }

        let record = TrashRecord::now(path, Some(location.clone()));
        let mut info_path = location.into_os_string();
        info_path.push(".trashinfo");
        let info = format!(
            "[Trash Info]\nPath={}\nDeletionDate={}\n",
            path.display(),
            record.trashed_at.format("%Y-%m-%dT%H:%M:%S")
        );
        if let Err(e) = fs::write(&info_path, info) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write trash info");
        }

        Ok(record)
    }
}

impl FilesystemPort for LocalFs {
    fn stat(&self, path: &Path, follow_symlinks: bool) -> Result<Metadata, FsError> {
        let metadata = if follow_symlinks {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        }
        .map_err(|e| FsError::io(path, e))?;

        Ok(convert_metadata(&metadata))
    }

    fn list(&self, dir: &Path) -> Result<Vec<Entry>, FsError> {
        let entries = fs::read_dir(dir).map_err(|e| FsError::io(dir, e))?;

        let mut result = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FsError::io(dir, e))?;
            let kind = match entry.file_type() {
                Ok(ft) => convert_file_type(&ft),
                Err(e) => return Err(FsError::io(entry.path(), e)),
            };
            result.push(Entry {
                name: CompactString::from(entry.file_name().to_string_lossy()),
                path: entry.path(),
                kind,
            });
        }
        Ok(result)
    }

    fn copy_chunk(&self, src: &Path, dst: &Path, offset: u64, len: u64) -> Result<u64, FsError> {
        let mut input = File::open(src).map_err(|e| FsError::io(src, e))?;
        input
            .seek(SeekFrom::Start(offset))
            .map_err(|e| FsError::io(src, e))?;

        let mut output = if offset == 0 {
            File::create(dst)
        } else {
            OpenOptions::new().write(true).open(dst)
        }
        .map_err(|e| FsError::io(dst, e))?;
        output
            .seek(SeekFrom::Start(offset))
            .map_err(|e| FsError::io(dst, e))?;

        let mut buffer = vec![0u8; len.min(MAX_CHUNK_BUFFER) as usize];
        let mut written = 0u64;
        while written < len {
            let want = ((len - written) as usize).min(buffer.len());
            let read = input
                .read(&mut buffer[..want])
                .map_err(|e| FsError::io(src, e))?;
            if read == 0 {
                break;
            }
            output
                .write_all(&buffer[..read])
                .map_err(|e| FsError::io(dst, e))?;
            written += read as u64;
        }

        Ok(written)
    }

    fn copy_attributes(&self, src: &Path, dst: &Path) -> Result<(), FsError> {
        let permissions = fs::metadata(src)
            .map_err(|e| FsError::io(src, e))?
            .permissions();
        fs::set_permissions(dst, permissions).map_err(|e| FsError::io(dst, e))
    }

    fn create_dir(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir(path).map_err(|e| FsError::io(path, e))
    }

    fn rename(&self, src: &Path, dst: &Path) -> Result<(), FsError> {
        if fs::symlink_metadata(dst).is_ok() {
            return Err(FsError::Exists {
                path: dst.to_path_buf(),
            });
        }
        fs::rename(src, dst).map_err(|e| match FsError::io(src, e) {
            FsError::CrossDevice { .. } => FsError::CrossDevice {
                path: dst.to_path_buf(),
            },
            other => other,
        })
    }

    #[cfg(unix)]
    fn symlink(&self, target: &Path, link: &Path) -> Result<(), FsError> {
        std::os::unix::fs::symlink(target, link).map_err(|e| FsError::io(link, e))
    }

    #[cfg(windows)]
    fn symlink(&self, target: &Path, link: &Path) -> Result<(), FsError> {
        let result = if target.is_dir() {
            std::os::windows::fs::symlink_dir(target, link)
        } else {
            std::os::windows::fs::symlink_file(target, link)
        };
        result.map_err(|e| FsError::io(link, e))
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf, FsError> {
        fs::read_link(path).map_err(|e| FsError::io(path, e))
    }

    fn trash(&self, path: &Path) -> Result<TrashRecord, FsError> {
        // Report a missing source as such rather than as a trash failure.
        fs::symlink_metadata(path).map_err(|e| FsError::io(path, e))?;

        match &self.trash {
            TrashBackend::System => match trash::delete(path) {
                Ok(()) => Ok(TrashRecord::now(path, None)),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "system trash refused item");
                    Err(FsError::Unsupported {
                        path: path.to_path_buf(),
                    })
                }
            },
            TrashBackend::Directory(dir) => self.trash_into_dir(dir, path),
            TrashBackend::Disabled => Err(FsError::Unsupported {
                path: path.to_path_buf(),
            }),
        }
    }

    fn delete(&self, path: &Path) -> Result<(), FsError> {
        let metadata = fs::symlink_metadata(path).map_err(|e| FsError::io(path, e))?;
        if metadata.is_dir() {
            fs::remove_dir(path).map_err(|e| FsError::io(path, e))
        } else {
            fs::remove_file(path).map_err(|e| FsError::io(path, e))
        }
    }

    #[cfg(unix)]
    fn free_space(&self, dir: &Path) -> Result<u64, FsError> {
        let stats = nix::sys::statvfs::statvfs(dir)
            .map_err(|errno| FsError::io(dir, std::io::Error::from(errno)))?;
        let fragment_size = stats.fragment_size() as u64;
        let available = stats.blocks_available() as u64;
        Ok(((available as u128).saturating_mul(fragment_size as u128)).min(u64::MAX as u128) as u64)
    }

    #[cfg(not(unix))]
    fn free_space(&self, dir: &Path) -> Result<u64, FsError> {
        Err(FsError::Unsupported {
            path: dir.to_path_buf(),
        })
    }
}

fn convert_file_type(ft: &fs::FileType) -> FileKind {
    if ft.is_symlink() {
        FileKind::Symlink
    } else if ft.is_dir() {
        FileKind::Directory
    } else if ft.is_file() {
        FileKind::File
    } else {
        FileKind::Other
    }
}

fn convert_metadata(metadata: &fs::Metadata) -> Metadata {
    let kind = convert_file_type(&metadata.file_type());
    Metadata {
        kind,
        size: if kind.is_dir() { 0 } else { metadata.len() },
        modified: metadata.modified().ok(),
        inode: inode_info(metadata),
    }
}

#[cfg(unix)]
fn inode_info(metadata: &fs::Metadata) -> Option<InodeInfo> {
    Some(InodeInfo::new(metadata.ino(), metadata.dev()))
}

#[cfg(not(unix))]
fn inode_info(_metadata: &fs::Metadata) -> Option<InodeInfo> {
    None
}
