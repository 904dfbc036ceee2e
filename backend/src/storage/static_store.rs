use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const UPLOADS_DIR: &str = "uploads";
pub const RESULTS_DIR: &str = "results";
pub const URL_PREFIX: &str = "/static";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },
    #[error("Invalid stored file name: {0}")]
    InvalidName(String),
}

/// A file under the static root, addressable both on disk and by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub path: PathBuf,
    pub url: String,
}

/// Local static root laid out as `uploads/<uuid>.<ext>` and
/// `results/gradcam_<uuid>.png`.
#[derive(Debug, Clone)]
pub struct StaticStore {
    root: PathBuf,
}

impl StaticStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn ensure_layout(&self) -> Result<(), StorageError> {
        fs::create_dir_all(self.uploads_dir())?;
        fs::create_dir_all(self.results_dir())?;
        Ok(())
    }

    pub fn extract_file_extension(mime_type: &str) -> Option<&'static str> {
        match mime_type {
            "image/jpeg" | "image/jpg" => Some("jpg"),
            "image/png" => Some("png"),
            "image/webp" => Some("webp"),
            "image/gif" => Some("gif"),
            "image/bmp" => Some("bmp"),
            "image/tiff" => Some("tiff"),
            _ => None,
        }
    }

    /// Extension for a stored upload: the client's, if it is a plain short
    /// alphanumeric suffix, else one derived from the content type.
    pub fn choose_extension(filename: Option<&str>, mime_type: &str) -> String {
        let from_name = filename
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && ext.len() <= 10)
            .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()));
        match from_name {
            Some(ext) => ext.to_ascii_lowercase(),
            None => Self::extract_file_extension(mime_type)
                .unwrap_or("bin")
                .to_string(),
        }
    }

    pub fn validate_image_size(size: usize, max: usize) -> Result<(), StorageError> {
        if size > max {
            return Err(StorageError::FileTooLarge { size, max });
        }
        Ok(())
    }

    /// Writes the upload under a fresh UUID. `create_new` makes a collision
    /// an error rather than an overwrite.
    pub fn save_upload(&self, data: &[u8], extension: &str) -> Result<StoredFile, StorageError> {
        let name = format!("{}.{}", Uuid::new_v4(), extension);
        let path = self.uploads_dir().join(&name);
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let written = file.write_all(data).and_then(|()| file.flush());
        drop(file);
        discard_on_error(&path, written)?;
        Ok(StoredFile {
            url: format!("{}/{}/{}", URL_PREFIX, UPLOADS_DIR, name),
            name,
            path,
        })
    }

    /// Where the Grad-CAM rendering of `upload` goes. Nothing is written.
    pub fn gradcam_slot(&self, upload: &StoredFile) -> Result<StoredFile, StorageError> {
        let stem = Path::new(&upload.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| StorageError::InvalidName(upload.name.clone()))?;
        let name = format!("gradcam_{}.png", stem);
        Ok(StoredFile {
            path: self.results_dir().join(&name),
            url: format!("{}/{}/{}", URL_PREFIX, RESULTS_DIR, name),
            name,
        })
    }
}

/// Removes a partially written file so a failed write leaves nothing behind.
fn discard_on_error(path: &Path, written: std::io::Result<()>) -> Result<(), StorageError> {
    if let Err(e) = written {
        if let Err(remove_err) = fs::remove_file(path) {
            log::warn!(
                "Failed to remove partial upload {}: {}",
                path.display(),
                remove_err
            );
        }
        return Err(StorageError::Io(e));
    }
    Ok(())
}
