use std::path::{Component, Path, PathBuf};

/// Maximum allowed path length for security
const MAX_PATH_LENGTH: usize = 4096;

/// Validate that a configured path is safe and doesn't contain suspicious patterns
pub fn validate_path(path: &str) -> Result<(), String> {
    // Check path length
    if path.len() > MAX_PATH_LENGTH {
        return Err(format!("Path too long (max {MAX_PATH_LENGTH} bytes)"));
    }

    // Check for null bytes
    if path.bytes().any(|b| b == 0) {
        return Err("Path contains null bytes".to_string());
    }

    // Check for obvious path traversal attempts
    if path.contains("../") || path.contains("..\\") {
        return Err("Path traversal detected (../)".to_string());
    }

    // Check for suspicious patterns
    if path.contains('$') || path.contains('`') {
        return Err("Path contains suspicious characters".to_string());
    }

    Ok(())
}

/// A library root nested inside its own source would be re-ingested forever.
pub fn ensure_target_outside_source(source: &Path, target: &Path) -> Result<(), String> {
    if target.starts_with(source) {
        return Err(format!(
            "{} is inside watched directory {}",
            target.display(),
            source.display()
        ));
    }
    Ok(())
}

/// Join a rendered relative path onto `root`, refusing anything that escapes it.
///
/// Works lexically so the destination does not have to exist yet.
pub fn join_within_root(root: &Path, relative: &Path) -> Result<PathBuf, String> {
    let mut joined = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err("Path traversal detected: rendered name contains `..`".to_string())
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err("Rendered name must be relative to the target root".to_string())
            }
        }
    }
    Ok(joined)
}

/// Validate that a path exists and is accessible
pub fn verify_path_exists(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!("Path does not exist: {}", path.display()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_path_rejects_traversal() {
        assert!(validate_path("../etc/passwd").is_err());
        assert!(validate_path("..\\windows\\system32").is_err());
    }

    #[test]
    fn test_validate_path_rejects_null_bytes() {
        assert!(validate_path("test\0file").is_err());
    }

    #[test]
    fn test_validate_path_accepts_valid() {
        assert!(validate_path("/tmp/test").is_ok());
        assert!(validate_path("C:\\Users\\test").is_ok());
    }

    #[test]
    fn test_target_inside_source_rejected() {
        let source = Path::new("/downloads");
        assert!(ensure_target_outside_source(source, Path::new("/downloads/lib")).is_err());
        assert!(ensure_target_outside_source(source, Path::new("/downloads")).is_err());
        assert!(ensure_target_outside_source(source, Path::new("/downloads-lib")).is_ok());
    }

    #[test]
    fn test_join_within_root_blocks_traversal() {
        let root = Path::new("/library/Actor/ABC-123");
        let joined = join_within_root(root, Path::new("2023 Title/2023 Title.mp4")).unwrap();
        assert_eq!(joined, root.join("2023 Title").join("2023 Title.mp4"));

        assert!(join_within_root(root, Path::new("../../etc/passwd")).is_err());
        assert!(join_within_root(root, Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_verify_path_exists() {
        let temp_dir = TempDir::new().unwrap();
        assert!(verify_path_exists(temp_dir.path()).is_ok());
        assert!(verify_path_exists(&temp_dir.path().join("missing")).is_err());
    }
}
