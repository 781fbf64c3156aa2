//! Validation functions for configuration values.

use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::Path;

pub fn validate_path_component<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() {
        return Err(ValidationError::new("InvalidPathComponent")
            .with_message("must not be empty".into()));
    }

    if !is_sanitized(name) {
        return Err(ValidationError::new("InvalidPathComponent").with_message(
            format!(
                "{:?} is not a valid directory name, try sanitizing like {:?}",
                name,
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_backup_root<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.as_os_str().is_empty() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message("backup root must not be empty".into()));
    }

    if dir.exists() && !dir.is_dir() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} is not a directory", dir).into()));
    }

    Ok(())
}

pub fn validate_remote_root<S: AsRef<str>>(root: S) -> Result<(), ValidationError> {
    if !root.as_ref().starts_with('/') {
        return Err(ValidationError::new("InvalidRemoteRoot")
            .with_message(format!("{:?} must be an absolute path", root.as_ref()).into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_component() {
        assert!(validate_path_component("db01").is_ok());
        assert!(validate_path_component("").is_err());
        assert!(validate_path_component("a/b").is_err());
    }

    #[test]
    fn test_backup_root() {
        let temp_dir = TempDir::new().unwrap();
        assert!(validate_backup_root(temp_dir.path()).is_ok());
        assert!(validate_backup_root(temp_dir.path().join("not-yet-created")).is_ok());
        assert!(validate_backup_root("").is_err());

        let file = temp_dir.path().join("file");
        std::fs::write(&file, "x").unwrap();
        assert!(validate_backup_root(&file).is_err());
    }

    #[test]
    fn test_remote_root() {
        assert!(validate_remote_root("/").is_ok());
        assert!(validate_remote_root("/backups").is_ok());
        assert!(validate_remote_root("backups").is_err());
    }
}
