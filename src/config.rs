//! Configuration for image generation, record packaging and worker pools

use crate::error::{ImageinaryError, Result};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Default image width in pixels
pub const DEFAULT_WIDTH: u32 = 1920;
/// Default image height in pixels
pub const DEFAULT_HEIGHT: u32 = 1080;
/// Default number of images placed in one record file
pub const DEFAULT_IMAGES_PER_FILE: usize = 1000;
/// Default number of tasks a worker takes per split
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Canonical image formats the generator can write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    /// JPEG, written as RGB since the container has no alpha channel
    Jpg,
    /// Windows bitmap, written as RGBA
    Bmp,
    /// PNG, written as RGBA
    #[default]
    Png,
}

impl ImageFormat {
    /// Every canonical format
    pub const ALL: [ImageFormat; 3] = [Self::Jpg, Self::Bmp, Self::Png];

    /// Map a user supplied format name onto a canonical format.
    ///
    /// Matching is case-insensitive. `jpeg` and `bitmap` are accepted as
    /// aliases. Anything unrecognized falls back to PNG.
    pub fn from_name(name: &str) -> Self {
        Self::parse(name).unwrap_or(Self::Png)
    }

    /// Strict variant of [`ImageFormat::from_name`] returning `None` for unknown names
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpg),
            "bmp" | "bitmap" => Some(Self::Bmp),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    /// File extension written after the image index
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Bmp => "bmp",
            Self::Png => "png",
        }
    }

    /// Whether images of this format carry an alpha channel
    pub fn has_alpha(&self) -> bool {
        !matches!(self, Self::Jpg)
    }

    /// Encoder used by the `image` crate
    pub fn encoder_format(&self) -> image::ImageFormat {
        match self {
            Self::Jpg => image::ImageFormat::Jpeg,
            Self::Bmp => image::ImageFormat::Bmp,
            Self::Png => image::ImageFormat::Png,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Parameters for a batch of synthetic images
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub output_path: PathBuf,
    pub filename_prefix: String,
    pub width: u32,
    pub height: u32,
    pub count: u64,
    pub image_format: ImageFormat,
    pub seed: u64,
}

impl GenerationRequest {
    /// Create a request for a single default-sized image
    pub fn new(
        output_path: impl Into<PathBuf>,
        filename_prefix: impl Into<String>,
        image_format: ImageFormat,
    ) -> Self {
        Self {
            output_path: output_path.into(),
            filename_prefix: filename_prefix.into(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            count: 1,
            image_format,
            seed: 0,
        }
    }

    /// Set the image dimensions
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the number of images
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Set the base random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Path every image file name is appended to
    pub fn base_path(&self) -> PathBuf {
        self.output_path.join(&self.filename_prefix)
    }

    /// Check the request before any worker is started
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ImageinaryError::invalid_config(format!(
                "image dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.count == 0 {
            return Err(ImageinaryError::invalid_config(
                "image count must be positive",
            ));
        }
        Ok(())
    }
}

/// Parameters for packaging a directory of images into record files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRequest {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub name_prefix: String,
    pub images_per_file: usize,
}

impl RecordRequest {
    /// Create a request using the default number of images per file
    pub fn new(
        source_path: impl Into<PathBuf>,
        dest_path: impl Into<PathBuf>,
        name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            dest_path: dest_path.into(),
            name_prefix: name_prefix.into(),
            images_per_file: DEFAULT_IMAGES_PER_FILE,
        }
    }

    /// Set the number of images stored per record file
    pub fn with_images_per_file(mut self, images_per_file: usize) -> Self {
        self.images_per_file = images_per_file;
        self
    }

    /// Path every record file name is appended to
    pub fn combined_prefix(&self) -> PathBuf {
        self.dest_path.join(&self.name_prefix)
    }

    /// Check the request before any worker is started
    pub fn validate(&self) -> Result<()> {
        if self.images_per_file == 0 {
            return Err(ImageinaryError::invalid_config(
                "images per record file must be positive",
            ));
        }
        if self.name_prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(ImageinaryError::invalid_config(format!(
                "record name {:?} must not contain a path separator",
                self.name_prefix
            )));
        }
        Ok(())
    }

    /// Fail with a configuration error if the source directory is missing
    pub fn check_source_exists(&self) -> Result<()> {
        if self.source_path.is_dir() {
            Ok(())
        } else {
            Err(ImageinaryError::MissingSourceDirectory(
                self.source_path.clone(),
            ))
        }
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads
    pub pool_size: usize,
    /// Minimum number of tasks handed to a worker at once
    pub chunk_size: usize,
}

impl PoolConfig {
    /// Pool sized to the host's available parallelism
    pub fn new() -> Self {
        Self {
            pool_size: available_workers(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the number of workers, zero keeps the detected default
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        if pool_size > 0 {
            self.pool_size = pool_size;
        }
        self
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Single worker, used for strictly sequential runs
    pub fn single() -> Self {
        Self::new().with_pool_size(1)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of processing units available to this process
pub fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Append `suffix` to the final component of `base` without inserting a separator
pub(crate) fn append_to_path(base: &Path, suffix: &str) -> PathBuf {
    let mut raw = base.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}
