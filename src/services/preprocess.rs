use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;

/// Linear scale applied to both dimensions before recognition.
pub const DOWNSCALE_FACTOR: f64 = 0.5;

/// Grayscale image ready for the OCR engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    gray: GrayImage,
}

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.gray
    }

    /// Encode as PNG for engines that take an encoded image.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(self.gray.clone()).write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }
}

/// Read and normalize the image at `path`.
pub fn preprocess_file(path: &Path) -> Result<NormalizedImage, PreprocessError> {
    let bytes = std::fs::read(path).map_err(|source| PreprocessError::Read {
        path: path.display().to_string(),
        source,
    })?;
    preprocess_bytes(&bytes)
}

/// Decode `bytes`, halve both dimensions and convert to grayscale.
pub fn preprocess_bytes(bytes: &[u8]) -> Result<NormalizedImage, PreprocessError> {
    let img = image::load_from_memory(bytes).map_err(PreprocessError::Decode)?;

    let (width, height) = scaled_dimensions(img.width(), img.height());
    let small = img.resize_exact(width, height, FilterType::Triangle);

    Ok(NormalizedImage {
        gray: small.to_luma8(),
    })
}

/// Dimensions after downscaling, rounded half-up and never below one pixel.
pub fn scaled_dimensions(width: u32, height: u32) -> (u32, u32) {
    let scale = |v: u32| ((f64::from(v) * DOWNSCALE_FACTOR).round() as u32).max(1);
    (scale(width), scale(height))
}

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("unreadable image: could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unreadable image: decode failed: {0}")]
    Decode(#[from] image::ImageError),
}
