use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageReader;
use roofsketch_contracts::payload::{mime_for_path, ImageMime, UploadedImage};

/// Smallest accepted width and height, in pixels.
pub const MIN_DIMENSION: u32 = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unsupported format. Use JPG, PNG, or WEBP.")]
    UnsupportedFormat { declared: Option<String> },
    #[error("Error reading file.")]
    ReadError(String),
    #[error("Failed to process image data.")]
    DecodeError(String),
    #[error("Image too small. Min {}x{}px.", MIN_DIMENSION, MIN_DIMENSION)]
    TooSmall { width: u32, height: u32 },
}

impl ValidationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::ReadError(_) => "read_error",
            Self::DecodeError(_) => "decode_error",
            Self::TooSmall { .. } => "too_small",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::UnsupportedFormat { declared } => declared
                .clone()
                .unwrap_or_else(|| "unknown media type".to_string()),
            Self::ReadError(detail) | Self::DecodeError(detail) => detail.clone(),
            Self::TooSmall { width, height } => format!("{width}x{height}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RawSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// A file as handed over by the user, before anything about it is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    name: String,
    declared_type: Option<String>,
    source: RawSource,
}

impl RawFile {
    /// Declared media type comes from the file extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.to_string_lossy().to_string(),
            declared_type: mime_for_path(&path).map(str::to_string),
            source: RawSource::Path(path),
        }
    }

    pub fn from_bytes(
        name: impl Into<String>,
        declared_type: Option<&str>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.map(str::to_string),
            source: RawSource::Bytes(bytes.into()),
        }
    }

    pub fn with_declared_type(mut self, declared_type: Option<&str>) -> Self {
        self.declared_type = declared_type.map(str::to_string);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_type(&self) -> Option<&str> {
        self.declared_type.as_deref()
    }

    fn read(&self) -> Result<Vec<u8>, ValidationError> {
        match &self.source {
            RawSource::Bytes(bytes) => Ok(bytes.clone()),
            RawSource::Path(path) => read_path(path),
        }
    }
}

fn read_path(path: &Path) -> Result<Vec<u8>, ValidationError> {
    fs::read(path).map_err(|err| ValidationError::ReadError(format!("{}: {err}", path.display())))
}

/// Type check, full read, then a full decode for the dimensions. Blocking; the
/// session runs it off its own thread.
pub fn validate(file: &RawFile) -> Result<UploadedImage, ValidationError> {
    let Some(mime) = file.declared_type().and_then(ImageMime::from_declared) else {
        return Err(ValidationError::UnsupportedFormat {
            declared: file.declared_type.clone(),
        });
    };
    let bytes = file.read()?;
    let (width, height) = probe_dimensions(&bytes)?;
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(ValidationError::TooSmall { width, height });
    }
    Ok(UploadedImage {
        bytes,
        mime,
        width,
        height,
    })
}

/// Decodes the whole image; a sound header over a truncated or corrupt body
/// still fails here.
fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), ValidationError> {
    let decoded = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| ValidationError::DecodeError(err.to_string()))?
        .decode()
        .map_err(|err| ValidationError::DecodeError(err.to_string()))?;
    Ok((decoded.width(), decoded.height()))
}
