//! `write_files`

use super::PlacedFile;
use crate::CloudInitError;
use crate::config::WriteFileConfig;
use tracing::debug;

/// Decode one entry into the file to place
///
/// Content is kept byte-for-byte; no substitution is applied.
pub fn compile(file: &WriteFileConfig) -> Result<PlacedFile, CloudInitError> {
    if file.path.is_empty() {
        return Err(CloudInitError::config("write_files entry without a path"));
    }
    let content = file.decoded_content()?;
    let mode = file.permissions()?;
    debug!(
        "Decoded {} bytes for {} (encoding {:?})",
        content.len(),
        file.path,
        file.encoding
    );

    Ok(PlacedFile {
        path: file.path.clone().into(),
        content,
        mode,
        owner: file.owner.clone(),
    })
}

/// Decode every entry, failing on the first bad one
pub fn compile_all(files: &[WriteFileConfig]) -> Result<Vec<PlacedFile>, CloudInitError> {
    files.iter().map(compile).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::MockSystem;
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn entry(path: &str, content: &str, encoding: &str) -> WriteFileConfig {
        WriteFileConfig {
            path: path.to_string(),
            content: content.to_string(),
            encoding: encoding.to_string(),
            ..Default::default()
        }
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_plain_content_is_verbatim() {
        let text = "line one\n$public_ipv4 stays\n\ttabs\n";
        let file = compile(&entry("/etc/motd", text, "")).unwrap();
        assert_eq!(file.content, text.as_bytes());
        assert_eq!(file.mode, 0o644);
    }

    #[test]
    fn test_gzip_base64() {
        let packed = BASE64.encode(gzip(b"compressed\n"));
        let file = compile(&entry("/tmp/x", &packed, "gzip+base64")).unwrap();
        assert_eq!(file.content, b"compressed\n");
    }

    #[test]
    fn test_unknown_encoding_and_bad_mode() {
        assert!(compile(&entry("/tmp/x", "abc", "rot13")).is_err());

        let mut bad_mode = entry("/tmp/x", "abc", "");
        bad_mode.permissions = "0x644".to_string();
        assert!(compile(&bad_mode).is_err());
    }

    #[tokio::test]
    async fn test_place_under_root() {
        let dir = TempDir::new().unwrap();
        let mut config = entry("/opt/bin/tool", "aGk=", "base64");
        config.permissions = "0755".to_string();

        let files = compile_all(&[config]).unwrap();
        let path = files[0].place(dir.path(), &MockSystem::default()).await.unwrap();

        assert_eq!(path, dir.path().join("opt/bin/tool"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hi");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
