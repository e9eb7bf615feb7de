use std::path::Path;

use crate::error::IndexerError;
use crate::exec::Exec;
use crate::model::Fingerprint;

/// Wraps a configured hash executable, returning a content fingerprint
/// for a single file. Per spec §4.2, hashing is always delegated to an
/// external tool rather than computed in-process.
pub struct Hasher<'a> {
    pub bin: &'a str,
}

impl<'a> Hasher<'a> {
    pub fn new(bin: &'a str) -> Self {
        Hasher { bin }
    }

    pub fn hash(&self, path: &Path) -> Result<Fingerprint, IndexerError> {
        let args = vec![path.to_string_lossy().into_owned()];
        let output = Exec::run(self.bin, &args).map_err(|e| IndexerError::HashFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        output
            .stdout
            .split_whitespace()
            .next()
            .map(|s| s.to_lowercase())
            .ok_or_else(|| IndexerError::HashFailed {
                path: path.to_path_buf(),
                reason: "hash tool produced no output".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_takes_first_whitespace_token_lowercased() {
        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(script, "#!/bin/sh\necho 'ABCDEF  somefile'").unwrap();
        let path = script.path();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(path, perms).unwrap();
        }

        let hasher = Hasher::new(path.to_str().unwrap());
        let target = tempfile::NamedTempFile::new().unwrap();
        let fp = hasher.hash(target.path()).unwrap();
        assert_eq!(fp, "abcdef");
    }

    #[test]
    fn hash_fails_when_binary_missing() {
        let hasher = Hasher::new("/nonexistent/hash/tool");
        let result = hasher.hash(Path::new("/tmp/whatever"));
        assert!(result.is_err());
    }
}
