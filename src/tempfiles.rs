//! Scoped acquisition of temporary files.

use crate::Result;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// A list of temporary files removed when the scope is dropped.
///
/// Every path handed out by [`TempScope::create`] stays valid until the
/// scope goes out of scope; removal failures on drop are ignored.
#[derive(Debug, Default)]
pub struct TempScope {
    files: Vec<NamedTempFile>,
}

impl TempScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a temporary file, optionally with initial contents, and
    /// return its path.
    pub fn create(&mut self, contents: Option<&[u8]>) -> Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix("offload-bundle-")
            .suffix(".tmp")
            .tempfile()?;
        if let Some(contents) = contents {
            file.write_all(contents)?;
            file.flush()?;
        }
        let path = file.path().to_path_buf();
        self.files.push(file);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_removed_on_drop() {
        let paths = {
            let mut scope = TempScope::new();
            let a = scope.create(Some(b"\0")).unwrap();
            let b = scope.create(None).unwrap();
            assert_eq!(std::fs::read(&a).unwrap(), b"\0");
            assert!(b.exists());
            vec![a, b]
        };
        for path in paths {
            assert!(!path.exists());
        }
    }
}
