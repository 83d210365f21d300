use std::fs;
use std::io;
use std::path::PathBuf;

/// Reads the current size of an artifact. `Ok(None)` means the artifact does not exist.
pub trait ArtifactProbe {
    fn size_of(&self, path: &str) -> io::Result<Option<u64>>;
}

/// Probe over the local filesystem, optionally rooted at a base directory.
#[derive(Debug, Clone, Default)]
pub struct LocalFsProbe {
    root: Option<PathBuf>,
}

impl LocalFsProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        }
    }
}

impl ArtifactProbe for LocalFsProbe {
    fn size_of(&self, path: &str) -> io::Result<Option<u64>> {
        match fs::metadata(self.resolve(path)) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}
