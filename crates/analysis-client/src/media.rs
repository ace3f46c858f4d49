//! Media file validation before upload.

use std::path::{Path, PathBuf};

use crate::error::ClientError;

/// Largest file the service accepts.
pub const MAX_MEDIA_BYTES: u64 = 500 * 1024 * 1024;

/// Accepted container formats and their MIME types.
const ALLOWED_FORMATS: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("mkv", "video/x-matroska"),
];

/// A local media file that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub file_name: String,
    pub extension: String,
    pub mime: &'static str,
    pub size: u64,
}

fn mime_for(extension: &str) -> Option<&'static str> {
    ALLOWED_FORMATS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
}

/// Check extension and size of a media file.
pub async fn inspect_media(path: &Path) -> Result<MediaFile, ClientError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    let mime = mime_for(&extension).ok_or_else(|| ClientError::UnsupportedFormat {
        extension: extension.clone(),
    })?;

    let size = tokio::fs::metadata(path).await?.len();
    if size == 0 {
        return Err(ClientError::EmptyFile(path.to_path_buf()));
    }
    if size > MAX_MEDIA_BYTES {
        return Err(ClientError::FileTooLarge {
            size,
            max: MAX_MEDIA_BYTES,
        });
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("upload.{}", extension));

    Ok(MediaFile {
        path: path.to_path_buf(),
        file_name,
        extension,
        mime,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accepts_known_container_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Session-01.MOV");
        std::fs::write(&path, b"not really a movie").unwrap();

        let media = inspect_media(&path).await.unwrap();
        assert_eq!(media.extension, "mov");
        assert_eq!(media.mime, "video/quicktime");
        assert_eq!(media.file_name, "Session-01.MOV");
        assert_eq!(media.size, 18);
    }

    #[tokio::test]
    async fn test_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.webm");
        std::fs::write(&path, b"data").unwrap();

        let err = inspect_media(&path).await.unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedFormat { ref extension } if extension == "webm"));
    }

    #[tokio::test]
    async fn test_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"").unwrap();

        assert!(matches!(
            inspect_media(&path).await.unwrap_err(),
            ClientError::EmptyFile(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = inspect_media(Path::new("/nonexistent/clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
