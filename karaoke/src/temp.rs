//! Temporary artifact management.
//!
//! Every file a run creates lives under one work directory and is named by an
//! opaque token, never by the uploaded file's name. [`TempArtifact`] is the
//! scoped handle for such a file: it removes the file when dropped unless
//! ownership is handed off with [`TempArtifact::into_path`].

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How many fresh tokens to try before giving up on an allocation.
const MAX_ALLOCATION_ATTEMPTS: usize = 16;

/// Source of the unique component of temporary file names.
pub trait TokenSource: Send + Sync {
    fn next_token(&self) -> String;
}

/// Random UUID v4 tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTokens;

impl TokenSource for RandomTokens {
    fn next_token(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Hands out collision-free paths under a work directory.
#[derive(Clone)]
pub struct TempManager {
    root: PathBuf,
    tokens: Arc<dyn TokenSource>,
}

impl std::fmt::Debug for TempManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempManager").field("root", &self.root).finish()
    }
}

impl TempManager {
    /// Create a manager rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_tokens(root, RandomTokens)
    }

    pub fn with_tokens(root: impl Into<PathBuf>, tokens: impl TokenSource + 'static) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            tokens: Arc::new(tokens),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a fresh file path ending in `suffix` (e.g. `".m4a"`).
    ///
    /// The file is created empty so no concurrent allocation can claim the
    /// same name; tools invoked later simply overwrite it.
    pub fn allocate(&self, suffix: &str) -> Result<TempArtifact> {
        self.reserve(suffix, |path| {
            OpenOptions::new().write(true).create_new(true).open(path).map(drop)
        })
    }

    /// Reserve a fresh, empty directory.
    pub fn allocate_dir(&self, suffix: &str) -> Result<TempArtifact> {
        self.reserve(suffix, |path| fs::create_dir(path))
    }

    fn reserve(
        &self,
        suffix: &str,
        create: impl Fn(&Path) -> std::io::Result<()>,
    ) -> Result<TempArtifact> {
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let token = self.tokens.next_token();
            let path = self.root.join(format!("{token}{suffix}"));
            match create(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "allocated temp artifact");
                    return Ok(TempArtifact::new(path));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), "temp name collision, drawing a new token");
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Err(Error::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!(
                "could not allocate a unique temp path in {} after {MAX_ALLOCATION_ATTEMPTS} attempts",
                self.root.display()
            ),
        )))
    }

    /// Delete a file or directory if it exists. Never fails.
    pub fn release(path: &Path) {
        let result = match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!(path = %path.display(), "released temp artifact"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to clean up temp artifact"),
        }
    }
}

/// RAII guard that removes a temp file or directory when dropped.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    armed: bool,
}

impl TempArtifact {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hand ownership of the file to the caller; it will no longer be deleted.
    pub fn into_path(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }

    /// Delete now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl AsRef<Path> for TempArtifact {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.armed {
            TempManager::release(&self.path);
        }
    }
}

/// Move a file, falling back to copy + delete across filesystems.
pub fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
