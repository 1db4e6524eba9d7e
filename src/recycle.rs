//! Recoverable deletes

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Removes a file in a way the operator can undo
pub trait RecycleBin: Send + Sync {
    fn recycle(&self, path: &Path) -> Result<()>;
}

/// The desktop's own trash / recycle bin, without confirmation prompts
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRecycleBin;

impl RecycleBin for SystemRecycleBin {
    fn recycle(&self, path: &Path) -> Result<()> {
        trash::delete(path).with_context(|| format!("failed to move {} to the trash", path.display()))
    }
}

/// Moves deleted files into a holding folder instead of the system trash
///
/// Used on headless machines without a desktop trash. Name clashes get a
/// numeric suffix so nothing in the holding folder is overwritten.
#[derive(Debug, Clone)]
pub struct HoldingFolder {
    dir: PathBuf,
}

impl HoldingFolder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn free_target(&self, file_name: &str) -> PathBuf {
        let candidate = self.dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{}", ext)),
            None => (file_name, String::new()),
        };
        (1u32..)
            .map(|n| self.dir.join(format!("{} ({}){}", stem, n, ext)))
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }
}

impl RecycleBin for HoldingFolder {
    fn recycle(&self, path: &Path) -> Result<()> {
        if !path.is_file() {
            bail!("{} is not a file", path.display());
        }
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("{} has no usable file name", path.display()))?;

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create holding folder {}", self.dir.display()))?;
        let target = self.free_target(file_name);
        fs::rename(path, &target).with_context(|| {
            format!("failed to move {} to {}", path.display(), target.display())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holding_folder_keeps_both_copies() {
        let dir = tempfile::tempdir().unwrap();
        let bin = HoldingFolder::new(dir.path().join("bin"));

        for content in ["first", "second"] {
            let path = dir.path().join("face.png");
            fs::write(&path, content).unwrap();
            bin.recycle(&path).unwrap();
            assert!(!path.exists());
        }

        assert_eq!(fs::read_to_string(bin.dir().join("face.png")).unwrap(), "first");
        assert_eq!(fs::read_to_string(bin.dir().join("face (1).png")).unwrap(), "second");
    }

    #[test]
    fn test_holding_folder_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let bin = HoldingFolder::new(dir.path().join("bin"));
        assert!(bin.recycle(&dir.path().join("missing.png")).is_err());
    }
}
