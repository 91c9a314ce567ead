//! Reproducible random image generation

use crate::config::{append_to_path, GenerationRequest, ImageFormat, PoolConfig};
use crate::dispatch::WorkDispatcher;
use crate::error::{ImageinaryError, Result};
use image::{DynamicImage, RgbImage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result of an image generation run
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub output_dir: PathBuf,
    pub count: u64,
    pub image_format: ImageFormat,
    pub workers: usize,
    pub elapsed: Duration,
}

impl GenerationResult {
    /// Print a summary of the generation
    pub fn print_summary(&self) {
        println!(
            "Created {} {} files in {} seconds",
            self.count,
            self.image_format,
            self.elapsed.as_secs_f64()
        );
    }
}

/// Draw the raw RGB samples for image `index`.
///
/// The stream is reseeded with `seed + index` before any value is drawn, so
/// the pixels of an index never depend on which worker produced it or in what
/// order. Samples are uniform in `[0, 1)`, scaled by 255 and truncated.
pub fn generate_pixels(width: u32, height: u32, seed: u64, index: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index));
    let uniform = Uniform::new(0.0f64, 1.0);
    let len = width as usize * height as usize * 3;

    (0..len)
        .map(|_| (uniform.sample(&mut rng) * 255.0) as u8)
        .collect()
}

/// Path of image `index` below `base_path`, e.g. `out/tmp_` -> `out/tmp_12.png`
pub fn image_path(base_path: &Path, index: u64, format: ImageFormat) -> PathBuf {
    append_to_path(base_path, &format!("{}.{}", index, format.extension()))
}

/// Generate and write a single image, returning the path written
pub fn generate_image(
    base_path: &Path,
    width: u32,
    height: u32,
    seed: u64,
    format: ImageFormat,
    index: u64,
) -> Result<PathBuf> {
    let pixels = generate_pixels(width, height, seed, index);
    let rgb = RgbImage::from_raw(width, height, pixels).ok_or_else(|| {
        ImageinaryError::invalid_config(format!("pixel buffer does not fit {width}x{height}"))
    })?;

    let path = image_path(base_path, index, format);
    if format.has_alpha() {
        DynamicImage::ImageRgb8(rgb)
            .to_rgba8()
            .save_with_format(&path, format.encoder_format())?;
    } else {
        rgb.save_with_format(&path, format.encoder_format())?;
    }

    Ok(path)
}

/// Generates a directory of synthetic images in parallel
pub struct ImageGenerator {
    request: GenerationRequest,
    pool: PoolConfig,
    progress: bool,
}

impl ImageGenerator {
    /// Create a new image generator using a host-sized pool
    pub fn new(request: GenerationRequest) -> Self {
        Self {
            request,
            pool: PoolConfig::new(),
            progress: false,
        }
    }

    /// Set the worker pool configuration
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Enable progress bar
    pub fn with_progress(mut self) -> Self {
        self.progress = true;
        self
    }

    /// Request this generator was built for
    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    /// Write every requested image and report the elapsed time
    pub fn generate(&self) -> Result<GenerationResult> {
        let request = &self.request;
        request.validate()?;

        tracing::info!(
            count = request.count,
            format = %request.image_format,
            width = request.width,
            height = request.height,
            path = %request.output_path.display(),
            "creating images with base filename {}",
            request.filename_prefix
        );

        fs::create_dir_all(&request.output_path)?;
        let base_path = request.base_path();

        let mut dispatcher = WorkDispatcher::new(self.pool);
        if self.progress {
            dispatcher = dispatcher.with_progress();
        }

        let indices: Vec<u64> = (0..request.count).collect();
        let report = dispatcher.run(indices, |index| {
            generate_image(
                &base_path,
                request.width,
                request.height,
                request.seed,
                request.image_format,
                index,
            )
            .map(|path| tracing::trace!(path = %path.display(), "image written"))
        })?;

        Ok(GenerationResult {
            output_dir: request.output_path.clone(),
            count: request.count,
            image_format: request.image_format,
            workers: report.workers,
            elapsed: report.elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pixels_are_reproducible() {
        let a = generate_pixels(8, 4, 42, 3);
        let b = generate_pixels(8, 4, 42, 3);
        assert_eq!(a.len(), 8 * 4 * 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_index_offsets_the_seed() {
        // seed 10 / index 5 and seed 15 / index 0 share a stream
        assert_eq!(generate_pixels(4, 4, 10, 5), generate_pixels(4, 4, 15, 0));
        assert_ne!(generate_pixels(4, 4, 10, 5), generate_pixels(4, 4, 10, 6));
    }

    #[test]
    fn test_image_path_has_no_padding() {
        let base = Path::new("/out").join("img_");
        assert_eq!(
            image_path(&base, 7, ImageFormat::Jpg),
            PathBuf::from("/out/img_7.jpg")
        );
    }

    #[test]
    fn test_generate_image_channels() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("img_");

        let jpg = generate_image(&base, 16, 8, 0, ImageFormat::Jpg, 0).unwrap();
        let png = generate_image(&base, 16, 8, 0, ImageFormat::Png, 1).unwrap();

        let jpg = image::open(jpg).unwrap();
        let png = image::open(png).unwrap();
        assert_eq!(jpg.color(), image::ColorType::Rgb8);
        assert_eq!(png.color(), image::ColorType::Rgba8);
        assert_eq!((png.width(), png.height()), (16, 8));
    }

    #[test]
    fn test_png_round_trips_generated_pixels() {
        let temp_dir = tempdir().unwrap();
        let base = temp_dir.path().join("img_");
        let path = generate_image(&base, 5, 3, 9, ImageFormat::Png, 2).unwrap();

        let decoded = image::open(path).unwrap().to_rgb8();
        assert_eq!(decoded.into_raw(), generate_pixels(5, 3, 9, 2));
    }

    #[test]
    fn test_generation_creates_output_dir() {
        let temp_dir = tempdir().unwrap();
        let out = temp_dir.path().join("nested");
        let request = GenerationRequest::new(&out, "tmp_", ImageFormat::Bmp)
            .with_dimensions(4, 4)
            .with_count(3);

        let result = ImageGenerator::new(request)
            .with_pool(PoolConfig::single())
            .generate()
            .unwrap();

        assert_eq!(result.count, 3);
        for i in 0..3 {
            assert!(out.join(format!("tmp_{i}.bmp")).exists());
        }
    }
}
