use std::io::Read;
use std::path::Path;

use crate::error::{ConfigError, Result};

/// Bounds applied when reading configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLimits {
    /// Maximum bytes accepted per file.
    pub max_file_size: usize,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self {
            max_file_size: 256 * 1024,
        }
    }
}

/// Read a configuration file as UTF-8 text.
///
/// Refuses symlinks, non-regular files, files replaced between the metadata
/// check and the open, and files larger than `limits.max_file_size`.
pub fn read_config_file(path: &Path, limits: LoadLimits) -> Result<String> {
    let load_failed = |message: String| ConfigError::LoadFailed {
        path: path.to_path_buf(),
        message,
    };

    let path_metadata = std::fs::symlink_metadata(path).map_err(|err| load_failed(err.to_string()))?;
    let file_type = path_metadata.file_type();
    if file_type.is_symlink() {
        return Err(load_failed("refusing to load symlink".to_string()));
    }
    if !file_type.is_file() {
        return Err(load_failed("not a regular file".to_string()));
    }

    let file = std::fs::File::open(path).map_err(|err| load_failed(format!("open failed: {err}")))?;
    let opened_metadata = file
        .metadata()
        .map_err(|err| load_failed(err.to_string()))?;

    #[cfg(unix)]
    {
        if !same_file_identity(&path_metadata, &opened_metadata) {
            return Err(load_failed("file changed during load".to_string()));
        }
    }

    if opened_metadata.len() > limits.max_file_size as u64 {
        return Err(load_failed(format!(
            "file too large ({} bytes, max {})",
            opened_metadata.len(),
            limits.max_file_size
        )));
    }

    let read_limit = u64::try_from(limits.max_file_size.saturating_add(1)).unwrap_or(u64::MAX);
    let mut content = String::new();
    file.take(read_limit)
        .read_to_string(&mut content)
        .map_err(|err| load_failed(format!("read failed: {err}")))?;
    if content.len() > limits.max_file_size {
        return Err(load_failed("file too large while reading".to_string()));
    }

    Ok(content)
}

#[cfg(unix)]
fn same_file_identity(
    path_metadata: &std::fs::Metadata,
    opened_metadata: &std::fs::Metadata,
) -> bool {
    use std::os::unix::fs::MetadataExt;
    path_metadata.dev() == opened_metadata.dev() && path_metadata.ino() == opened_metadata.ino()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;

    use super::*;

    pub(crate) fn make_temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "mmwcap-config-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn reads_regular_file() {
        let dir = make_temp_dir("regular");
        let path = dir.join("system.json");
        std::fs::write(&path, "{}").unwrap();

        assert_eq!(read_config_file(&path, LoadLimits::default()).unwrap(), "{}");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rejects_oversized_file() {
        let dir = make_temp_dir("oversized");
        let path = dir.join("big.cfg");
        std::fs::write(&path, vec![b'%'; 128]).unwrap();

        let limits = LoadLimits { max_file_size: 64 };
        let err = read_config_file(&path, limits).unwrap_err();
        assert!(err.to_string().contains("too large"), "{err}");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rejects_directory_and_missing_file() {
        let dir = make_temp_dir("not-file");
        assert!(matches!(
            read_config_file(&dir, LoadLimits::default()),
            Err(ConfigError::LoadFailed { .. })
        ));
        assert!(matches!(
            read_config_file(&dir.join("absent.json"), LoadLimits::default()),
            Err(ConfigError::LoadFailed { .. })
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn refuses_symlink() {
        let dir = make_temp_dir("symlink");
        let target = dir.join("real.json");
        let link = dir.join("link.json");
        std::fs::write(&target, "{}").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = read_config_file(&link, LoadLimits::default()).unwrap_err();
        assert!(err.to_string().contains("symlink"), "{err}");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
