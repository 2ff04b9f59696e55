use std::path::{Path, PathBuf};

use mime_guess::mime;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use vqa_backend::{ImageUpload, ProcessingMode};

/// Image picked by the user but not yet sent.
#[derive(Clone, PartialEq, Eq)]
pub struct SelectedImage {
    file_name: String,
    mime_type: String,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for SelectedImage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SelectedImage")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}

impl SelectedImage {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, ImageSelectionError> {
        let file_name = file_name.into();
        let mime_type = mime_type.into();

        ensure!(
            mime_type
                .parse::<mime::Mime>()
                .is_ok_and(|parsed| parsed.type_() == mime::IMAGE),
            NotAnImageSnafu {
                stage: "select-image-mime",
                file_name: file_name.clone(),
                mime_type,
            }
        );
        ensure!(
            !bytes.is_empty(),
            EmptyImageSnafu {
                stage: "select-image-bytes",
                file_name,
            }
        );

        Ok(Self {
            file_name,
            mime_type,
            bytes,
        })
    }

    /// Reads an image from disk, guessing its MIME type from the extension.
    pub async fn load(path: &Path) -> Result<Self, ImageSelectionError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context(MissingFileNameSnafu {
                stage: "load-image-file-name",
                path: path.to_path_buf(),
            })?;
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let bytes = tokio::fs::read(path).await.context(ReadImageSnafu {
            stage: "load-image-read",
            path: path.to_path_buf(),
        })?;

        Self::new(file_name, mime_type, bytes)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// One-line preview, e.g. `cat.png (image/png, 12.1 KiB)`.
    pub fn preview(&self) -> String {
        format!(
            "{} ({}, {})",
            self.file_name,
            self.mime_type,
            human_size(self.bytes.len())
        )
    }

    pub fn into_upload(self) -> ImageUpload {
        ImageUpload {
            file_name: self.file_name,
            mime_type: self.mime_type,
            bytes: self.bytes,
        }
    }
}

fn human_size(size: usize) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;

    let size_f = size as f64;
    if size_f < KIB {
        format!("{size} B")
    } else if size_f < MIB {
        format!("{:.1} KiB", size_f / KIB)
    } else {
        format!("{:.1} MiB", size_f / MIB)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ImageSelectionError {
    #[snafu(display("path {path:?} has no file name"))]
    MissingFileName { stage: &'static str, path: PathBuf },
    #[snafu(display("failed to read image at {path:?} on `{stage}`: {source}"))]
    ReadImage {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("'{file_name}' is not an image ({mime_type})"))]
    NotAnImage {
        stage: &'static str,
        file_name: String,
        mime_type: String,
    },
    #[snafu(display("'{file_name}' is empty"))]
    EmptyImage {
        stage: &'static str,
        file_name: String,
    },
}

/// Transient, unsubmitted input state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Draft {
    pub question: String,
    pub image: Option<SelectedImage>,
    pub mode: ProcessingMode,
    pub instruction: String,
    pub search_enabled: bool,
}

impl Draft {
    pub fn new(mode: ProcessingMode, search_enabled: bool) -> Self {
        Self {
            mode,
            search_enabled,
            ..Self::default()
        }
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_image_mime_types() {
        let error = SelectedImage::new("notes.txt", "text/plain", b"hello".to_vec()).unwrap_err();
        assert!(matches!(error, ImageSelectionError::NotAnImage { .. }));
    }

    #[test]
    fn rejects_empty_payloads() {
        let error = SelectedImage::new("cat.png", "image/png", Vec::new()).unwrap_err();
        assert!(matches!(error, ImageSelectionError::EmptyImage { .. }));
    }

    #[test]
    fn preview_reports_name_type_and_size() {
        let image = SelectedImage::new("cat.png", "image/png", vec![0; 2048]).unwrap();
        assert_eq!(image.preview(), "cat.png (image/png, 2.0 KiB)");
        assert_eq!(human_size(12), "12 B");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0 MiB");
    }

    #[tokio::test]
    async fn load_guesses_mime_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.JPG");
        std::fs::write(&path, b"jpeg-bytes").unwrap();

        let image = SelectedImage::load(&path).await.unwrap();
        assert_eq!(image.file_name(), "photo.JPG");
        assert_eq!(image.mime_type(), "image/jpeg");
        assert_eq!(image.size_bytes(), 10);
    }

    #[tokio::test]
    async fn load_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let error = SelectedImage::load(&dir.path().join("missing.png"))
            .await
            .unwrap_err();
        assert!(matches!(error, ImageSelectionError::ReadImage { .. }));
    }
}
