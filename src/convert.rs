//! External FB2→EPUB converter invocation.
//!
//! The built-in converter handles FB2 natively; operators who prefer a
//! different tool can disable it and point `convert.converter_path` at
//! a binary invoked as `converter <input.fb2> <output.epub>`.

use std::path::Path;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

/// Run the external converter over in-memory FB2 bytes and return the
/// produced EPUB.
pub fn fb2_to_epub(converter: &Path, fb2_data: &[u8]) -> Result<Vec<u8>, ConverterError> {
    let temp_dir = temp_work_dir();
    std::fs::create_dir_all(&temp_dir).map_err(ConverterError::CreateTempDir)?;
    let _cleanup = TempDirCleanup(temp_dir.clone());

    let input = temp_dir.join("input.fb2");
    let output = temp_dir.join("output.epub");
    std::fs::write(&input, fb2_data).map_err(ConverterError::WriteInput)?;

    let status = Command::new(converter)
        .arg(&input)
        .arg(&output)
        .status()
        .map_err(ConverterError::Spawn)?;

    if !status.success() {
        return Err(ConverterError::ExitStatus(status.code()));
    }

    std::fs::read(&output).map_err(ConverterError::ReadOutput)
}

fn temp_work_dir() -> std::path::PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!("tinyopds-convert-{}-{now}", std::process::id()))
}

struct TempDirCleanup(std::path::PathBuf);

impl Drop for TempDirCleanup {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            tracing::debug!("Failed to cleanup temp converter dir {:?}: {}", self.0, e);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConverterError {
    #[error("failed to create temp dir: {0}")]
    CreateTempDir(std::io::Error),
    #[error("failed to write temp input FB2: {0}")]
    WriteInput(std::io::Error),
    #[error("failed to start converter: {0}")]
    Spawn(std::io::Error),
    #[error("converter exited with status {0:?}")]
    ExitStatus(Option<i32>),
    #[error("failed to read converted EPUB: {0}")]
    ReadOutput(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_external_converter_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "conv.sh", "#!/bin/sh\ncp \"$1\" \"$2\"\n");

        let out = fb2_to_epub(&script, b"fb2-payload").unwrap();
        assert_eq!(out, b"fb2-payload");
    }

    #[cfg(unix)]
    #[test]
    fn test_external_converter_failure_status() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "fail.sh", "#!/bin/sh\nexit 3\n");

        let err = fb2_to_epub(&script, b"x").unwrap_err();
        assert!(matches!(err, ConverterError::ExitStatus(Some(3))));
    }

    #[test]
    fn test_missing_converter_binary() {
        let err = fb2_to_epub(Path::new("/definitely-missing-converter"), b"x").unwrap_err();
        assert!(matches!(err, ConverterError::Spawn(_)));
    }
}
