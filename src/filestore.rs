//! Filestore abstraction used by the CFDP entity.
//!
//! All operations work on paths relative to a configured root directory. The [NativeFilestore]
//! refuses paths which would escape that root.
#[cfg(feature = "std")]
pub use std_mod::*;

use crate::util::ByteConversionError;

#[derive(Debug, thiserror::Error)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
#[non_exhaustive]
pub enum FilestoreError {
    #[error("file does not exist")]
    FileDoesNotExist,
    #[error("file already exists")]
    FileAlreadyExists,
    #[error("directory does not exist")]
    DirDoesNotExist,
    #[error("permission error")]
    Permission,
    #[error("is not a file")]
    IsNotFile,
    #[error("is not a directory")]
    IsNotDirectory,
    #[error("path escapes the filestore root")]
    PathEscapesRoot,
    #[error("byte conversion: {0}")]
    ByteConversion(#[from] ByteConversionError),
    #[error("IO error: {0}")]
    #[cfg(feature = "std")]
    Io(#[from] std::io::Error),
    #[error("utf8 error")]
    Utf8Error,
    #[error("other error")]
    Other,
}

/// Byte-granularity storage operations backing a CFDP entity.
///
/// This decouples the protocol handlers from the underlying filesystem, which also allows
/// plugging in a non-OS backend for targets without a standard filesystem.
pub trait VirtualFilestore {
    /// Read the whole file into a byte buffer.
    #[cfg(feature = "alloc")]
    fn read_all(&self, file_path: &str) -> Result<alloc::vec::Vec<u8>, FilestoreError>;

    /// Write the full buffer to the given file, creating the file and any intermediate
    /// directories as necessary.
    fn write_all(&self, file_path: &str, data: &[u8]) -> Result<(), FilestoreError>;

    fn create_file(&self, file_path: &str) -> Result<(), FilestoreError>;

    fn remove_file(&self, file_path: &str) -> Result<(), FilestoreError>;

    fn rename(&self, old_path: &str, new_path: &str) -> Result<(), FilestoreError>;

    /// Append the contents of the source file to the target file.
    fn append(&self, target_path: &str, source_path: &str) -> Result<(), FilestoreError>;

    /// Replace the contents of the target file with the contents of the source file.
    fn replace(&self, target_path: &str, source_path: &str) -> Result<(), FilestoreError>;

    fn create_dir(&self, dir_path: &str) -> Result<(), FilestoreError>;

    fn remove_dir(&self, dir_path: &str, all: bool) -> Result<(), FilestoreError>;

    fn exists(&self, path: &str) -> Result<bool, FilestoreError>;

    fn is_file(&self, path: &str) -> Result<bool, FilestoreError>;

    fn is_dir(&self, path: &str) -> Result<bool, FilestoreError> {
        Ok(!self.is_file(path)?)
    }

    fn file_size(&self, path: &str) -> Result<u64, FilestoreError>;
}

#[cfg(feature = "std")]
pub mod std_mod {
    use super::*;
    use std::{
        fs::{self, File, OpenOptions},
        io::{Read, Write},
        path::{Component, Path, PathBuf},
        vec::Vec,
    };

    /// Filestore implementation which uses the native filesystem, rooted at a configured
    /// directory.
    ///
    /// All paths are interpreted relative to the root. Absolute paths and paths with parent
    /// directory components are rejected with [FilestoreError::PathEscapesRoot] so a peer can
    /// not direct file operations outside of the configured directory.
    #[derive(Debug, Clone)]
    pub struct NativeFilestore {
        root: PathBuf,
    }

    impl NativeFilestore {
        pub fn new(root: impl Into<PathBuf>) -> Self {
            Self { root: root.into() }
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        fn resolve(&self, path: &str) -> Result<PathBuf, FilestoreError> {
            let path = Path::new(path);
            if path.is_absolute() {
                return Err(FilestoreError::PathEscapesRoot);
            }
            for component in path.components() {
                match component {
                    Component::Normal(_) | Component::CurDir => (),
                    _ => return Err(FilestoreError::PathEscapesRoot),
                }
            }
            Ok(self.root.join(path))
        }
    }

    impl VirtualFilestore for NativeFilestore {
        fn read_all(&self, file_path: &str) -> Result<Vec<u8>, FilestoreError> {
            let path = self.resolve(file_path)?;
            if !path.exists() {
                return Err(FilestoreError::FileDoesNotExist);
            }
            if !path.is_file() {
                return Err(FilestoreError::IsNotFile);
            }
            let mut data = Vec::new();
            File::open(path)?.read_to_end(&mut data)?;
            Ok(data)
        }

        fn write_all(&self, file_path: &str, data: &[u8]) -> Result<(), FilestoreError> {
            let path = self.resolve(file_path)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = File::create(path)?;
            file.write_all(data)?;
            Ok(())
        }

        fn create_file(&self, file_path: &str) -> Result<(), FilestoreError> {
            let path = self.resolve(file_path)?;
            if path.exists() {
                return Err(FilestoreError::FileAlreadyExists);
            }
            File::create(path)?;
            Ok(())
        }

        fn remove_file(&self, file_path: &str) -> Result<(), FilestoreError> {
            let path = self.resolve(file_path)?;
            if !path.exists() {
                return Err(FilestoreError::FileDoesNotExist);
            }
            if !path.is_file() {
                return Err(FilestoreError::IsNotFile);
            }
            fs::remove_file(path)?;
            Ok(())
        }

        fn rename(&self, old_path: &str, new_path: &str) -> Result<(), FilestoreError> {
            let old_path = self.resolve(old_path)?;
            let new_path = self.resolve(new_path)?;
            if !old_path.exists() {
                return Err(FilestoreError::FileDoesNotExist);
            }
            fs::rename(old_path, new_path)?;
            Ok(())
        }

        fn append(&self, target_path: &str, source_path: &str) -> Result<(), FilestoreError> {
            let source = self.resolve(source_path)?;
            let target = self.resolve(target_path)?;
            if !source.exists() || !target.exists() {
                return Err(FilestoreError::FileDoesNotExist);
            }
            let mut data = Vec::new();
            File::open(source)?.read_to_end(&mut data)?;
            let mut file = OpenOptions::new().append(true).open(target)?;
            file.write_all(&data)?;
            Ok(())
        }

        fn replace(&self, target_path: &str, source_path: &str) -> Result<(), FilestoreError> {
            let source = self.resolve(source_path)?;
            let target = self.resolve(target_path)?;
            if !source.exists() {
                return Err(FilestoreError::FileDoesNotExist);
            }
            fs::copy(source, target)?;
            Ok(())
        }

        fn create_dir(&self, dir_path: &str) -> Result<(), FilestoreError> {
            fs::create_dir(self.resolve(dir_path)?)?;
            Ok(())
        }

        fn remove_dir(&self, dir_path: &str, all: bool) -> Result<(), FilestoreError> {
            let path = self.resolve(dir_path)?;
            if !path.exists() {
                return Err(FilestoreError::DirDoesNotExist);
            }
            if !path.is_dir() {
                return Err(FilestoreError::IsNotDirectory);
            }
            if !all {
                fs::remove_dir(path)?;
                return Ok(());
            }
            fs::remove_dir_all(path)?;
            Ok(())
        }

        fn exists(&self, path: &str) -> Result<bool, FilestoreError> {
            Ok(self.resolve(path)?.exists())
        }

        fn is_file(&self, path: &str) -> Result<bool, FilestoreError> {
            let path = self.resolve(path)?;
            if !path.exists() {
                return Err(FilestoreError::FileDoesNotExist);
            }
            Ok(path.is_file())
        }

        fn file_size(&self, path: &str) -> Result<u64, FilestoreError> {
            let path = self.resolve(path)?;
            if !path.exists() {
                return Err(FilestoreError::FileDoesNotExist);
            }
            if !path.is_file() {
                return Err(FilestoreError::IsNotFile);
            }
            Ok(path.metadata()?.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_exists() {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let fs_store = NativeFilestore::new(tmpdir.path());
        assert!(!fs_store.exists("test.txt").unwrap());
        fs_store.create_file("test.txt").unwrap();
        assert!(fs_store.exists("test.txt").unwrap());
        assert!(fs_store.is_file("test.txt").unwrap());
    }

    #[test]
    fn test_create_existing_file_fails() {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let fs_store = NativeFilestore::new(tmpdir.path());
        fs_store.create_file("test.txt").unwrap();
        let error = fs_store.create_file("test.txt").unwrap_err();
        assert!(matches!(error, FilestoreError::FileAlreadyExists));
    }

    #[test]
    fn test_write_and_read_all() {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let fs_store = NativeFilestore::new(tmpdir.path());
        fs_store.write_all("test.bin", &[1, 2, 3, 4]).unwrap();
        assert_eq!(fs_store.read_all("test.bin").unwrap(), [1, 2, 3, 4]);
        assert_eq!(fs_store.file_size("test.bin").unwrap(), 4);
    }

    #[test]
    fn test_write_all_creates_intermediate_dirs() {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let fs_store = NativeFilestore::new(tmpdir.path());
        fs_store.write_all("a/b/test.bin", &[1, 2]).unwrap();
        assert_eq!(fs_store.read_all("a/b/test.bin").unwrap(), [1, 2]);
        assert!(fs_store.is_dir("a/b").unwrap());
    }

    #[test]
    fn test_remove_file() {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let fs_store = NativeFilestore::new(tmpdir.path());
        fs_store.create_file("test.txt").unwrap();
        fs_store.remove_file("test.txt").unwrap();
        assert!(!fs_store.exists("test.txt").unwrap());
    }

    #[test]
    fn test_rename() {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let fs_store = NativeFilestore::new(tmpdir.path());
        fs_store.write_all("old.txt", b"content").unwrap();
        fs_store.rename("old.txt", "new.txt").unwrap();
        assert!(!fs_store.exists("old.txt").unwrap());
        assert_eq!(fs_store.read_all("new.txt").unwrap(), b"content");
    }

    #[test]
    fn test_append() {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let fs_store = NativeFilestore::new(tmpdir.path());
        fs_store.write_all("target.txt", b"hello ").unwrap();
        fs_store.write_all("source.txt", b"world").unwrap();
        fs_store.append("target.txt", "source.txt").unwrap();
        assert_eq!(fs_store.read_all("target.txt").unwrap(), b"hello world");
    }

    #[test]
    fn test_replace() {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let fs_store = NativeFilestore::new(tmpdir.path());
        fs_store.write_all("target.txt", b"old content").unwrap();
        fs_store.write_all("source.txt", b"new").unwrap();
        fs_store.replace("target.txt", "source.txt").unwrap();
        assert_eq!(fs_store.read_all("target.txt").unwrap(), b"new");
    }

    #[test]
    fn test_dir_handling() {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let fs_store = NativeFilestore::new(tmpdir.path());
        fs_store.create_dir("testdir").unwrap();
        assert!(fs_store.exists("testdir").unwrap());
        assert!(fs_store.is_dir("testdir").unwrap());
        fs_store.write_all("testdir/file.txt", b"x").unwrap();
        let error = fs_store.remove_dir("testdir", false).unwrap_err();
        assert!(matches!(error, FilestoreError::Io(_)));
        fs_store.remove_dir("testdir", true).unwrap();
        assert!(!fs_store.exists("testdir").unwrap());
    }

    #[test]
    fn test_path_traversal_rejected() {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let fs_store = NativeFilestore::new(tmpdir.path());
        let error = fs_store.exists("../escape.txt").unwrap_err();
        assert!(matches!(error, FilestoreError::PathEscapesRoot));
        let error = fs_store.write_all("/absolute.txt", &[1]).unwrap_err();
        assert!(matches!(error, FilestoreError::PathEscapesRoot));
        let error = fs_store.read_all("a/../../escape.txt").unwrap_err();
        assert!(matches!(error, FilestoreError::PathEscapesRoot));
    }

    #[test]
    fn test_read_all_missing_file() {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let fs_store = NativeFilestore::new(tmpdir.path());
        let error = fs_store.read_all("missing.txt").unwrap_err();
        assert!(matches!(error, FilestoreError::FileDoesNotExist));
    }

    #[test]
    fn test_file_size_of_dir_fails() {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let fs_store = NativeFilestore::new(tmpdir.path());
        fs::create_dir(tmpdir.path().join("somedir")).unwrap();
        let error = fs_store.file_size("somedir").unwrap_err();
        assert!(matches!(error, FilestoreError::IsNotFile));
    }
}
