//! Record container backends and the record packaging pipeline

use crate::config::{PoolConfig, RecordRequest};
use crate::dispatch::WorkDispatcher;
use crate::error::{ImageinaryError, Result};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Record container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordBackend {
    /// Indexed `.rec` / `.idx` pairs, one per shard
    RecordIo,
    /// Length-delimited `tf.train.Example` files
    TfRecord,
}

impl RecordBackend {
    /// Display name of the format
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordIo => "RecordIO",
            Self::TfRecord => "TFRecord",
        }
    }

    /// Cargo feature that compiles this backend in
    pub fn feature(&self) -> &'static str {
        match self {
            Self::RecordIo => "recordio",
            Self::TfRecord => "tfrecord",
        }
    }

    /// Whether the backend is part of this build
    pub fn is_available(&self) -> bool {
        match self {
            Self::RecordIo => cfg!(feature = "recordio"),
            Self::TfRecord => cfg!(feature = "tfrecord"),
        }
    }
}

impl fmt::Display for RecordBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A container format able to package a listing of source images
pub trait ContainerWriter: Send + Sync {
    /// Format written by this implementation
    fn backend(&self) -> RecordBackend;

    /// Package `files` (names relative to the request's source directory) and
    /// return the number of container files written
    fn write_containers(
        &self,
        request: &RecordRequest,
        files: Vec<String>,
        dispatcher: &WorkDispatcher,
    ) -> Result<usize>;
}

/// Resolve a backend to its writer, or report it as unavailable in this build
pub fn select_writer(backend: RecordBackend) -> Result<Box<dyn ContainerWriter>> {
    match backend {
        #[cfg(feature = "recordio")]
        RecordBackend::RecordIo => Ok(Box::new(crate::recordio::RecordIoContainer)),
        #[cfg(feature = "tfrecord")]
        RecordBackend::TfRecord => Ok(Box::new(crate::tfrecord::TfRecordContainer)),
        #[allow(unreachable_patterns)]
        other => Err(ImageinaryError::BackendUnavailable {
            backend: other.as_str(),
            feature: other.feature(),
        }),
    }
}

/// Names of the regular files in `dir`, in directory listing order
pub fn list_image_files(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().into_string().map_err(|raw| {
            ImageinaryError::with_context(
                format!("listing {}", dir.display()),
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("file name {:?} is not valid UTF-8", raw.to_string_lossy()),
                ),
            )
        })?;
        files.push(name);
    }
    Ok(files)
}

/// Size of the first listed image and of all images in a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectoryInfo {
    pub first_image_size: u64,
    pub directory_size: u64,
    pub files: usize,
}

impl DirectoryInfo {
    /// Print the sizes in bytes
    pub fn print(&self, path: &Path) {
        println!(
            "First image size from {}, in bytes: {}",
            path.display(),
            self.first_image_size
        );
        println!(
            "Directory {} size, in bytes: {}",
            path.display(),
            self.directory_size
        );
    }
}

/// Measure the files directly inside `dir`; subdirectories are skipped
pub fn directory_info(dir: &Path) -> Result<DirectoryInfo> {
    let mut info = DirectoryInfo::default();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let size = fs::metadata(&path)?.len();
        if info.files == 0 {
            info.first_image_size = size;
        }
        info.directory_size += size;
        info.files += 1;
    }
    Ok(info)
}

/// Result of a record packaging run
#[derive(Debug, Clone)]
pub struct RecordResult {
    pub dest_dir: PathBuf,
    pub backend: RecordBackend,
    pub images: usize,
    pub files_written: usize,
    pub source_info: DirectoryInfo,
    pub elapsed: Duration,
}

impl RecordResult {
    /// Print a summary of the run
    pub fn print_summary(&self) {
        println!(
            "Wrote {} {} files from {} images to {}",
            self.files_written,
            self.backend,
            self.images,
            self.dest_dir.display()
        );
        println!("Completed in {} seconds", self.elapsed.as_secs_f64());
    }
}

/// Packages a directory of images into record containers
pub struct RecordBuilder {
    request: RecordRequest,
    backend: RecordBackend,
    pool: PoolConfig,
    progress: bool,
}

impl RecordBuilder {
    /// Create a builder; shards are handed to workers one at a time
    pub fn new(request: RecordRequest, backend: RecordBackend) -> Self {
        Self {
            request,
            backend,
            pool: PoolConfig::new().with_chunk_size(1),
            progress: false,
        }
    }

    /// Set the worker pool size.
    ///
    /// The chunk size of `pool` is ignored: each shard is always its own
    /// unit of work, so shards never queue behind each other on one worker.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool.with_chunk_size(1);
        self
    }

    /// Pool configuration used for shard writers
    pub fn pool(&self) -> PoolConfig {
        self.pool
    }

    /// Enable progress bar
    pub fn with_progress(mut self) -> Self {
        self.progress = true;
        self
    }

    /// Validate, then write every container.
    ///
    /// Configuration problems (unavailable backend, bad request, missing
    /// source directory) are reported before the destination is touched.
    pub fn build(&self) -> Result<RecordResult> {
        let request = &self.request;
        let writer = select_writer(self.backend)?;
        request.validate()?;
        request.check_source_exists()?;

        tracing::info!(
            backend = %self.backend,
            source = %request.source_path.display(),
            dest = %request.dest_path.display(),
            images_per_file = request.images_per_file,
            "creating record files with base filename {}",
            request.name_prefix
        );

        fs::create_dir_all(&request.dest_path)?;
        let source_info = directory_info(&request.source_path)?;
        tracing::info!(
            first_image_size = source_info.first_image_size,
            directory_size = source_info.directory_size,
            "source directory measured"
        );

        let files = list_image_files(&request.source_path)?;
        let images = files.len();

        let mut dispatcher = WorkDispatcher::new(self.pool);
        if self.progress {
            dispatcher = dispatcher.with_progress();
        }

        let start = Instant::now();
        let files_written = writer.write_containers(request, files, &dispatcher)?;
        let elapsed = start.elapsed();

        Ok(RecordResult {
            dest_dir: request.dest_path.clone(),
            backend: writer.backend(),
            images,
            files_written,
            source_info,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_backend_names() {
        assert_eq!(RecordBackend::RecordIo.to_string(), "RecordIO");
        assert_eq!(RecordBackend::TfRecord.feature(), "tfrecord");
    }

    #[test]
    fn test_select_writer_matches_build_features() {
        for backend in [RecordBackend::RecordIo, RecordBackend::TfRecord] {
            match select_writer(backend) {
                Ok(writer) => {
                    assert!(backend.is_available());
                    assert_eq!(writer.backend(), backend);
                }
                Err(err) => {
                    assert!(!backend.is_available());
                    assert!(matches!(err, ImageinaryError::BackendUnavailable { .. }));
                }
            }
        }
    }

    #[test]
    fn test_listing_skips_directories() {
        let temp_dir = tempdir().unwrap();
        fs::create_dir(temp_dir.path().join("nested")).unwrap();
        fs::write(temp_dir.path().join("a_1.png"), [0u8; 10]).unwrap();
        fs::write(temp_dir.path().join("a_2.png"), [0u8; 5]).unwrap();

        let mut files = list_image_files(temp_dir.path()).unwrap();
        files.sort();
        assert_eq!(files, vec!["a_1.png".to_string(), "a_2.png".to_string()]);

        let info = directory_info(temp_dir.path()).unwrap();
        assert_eq!(info.files, 2);
        assert_eq!(info.directory_size, 15);
        assert!(info.first_image_size == 10 || info.first_image_size == 5);
    }

    #[test]
    fn test_with_pool_keeps_one_shard_per_chunk() {
        let request = RecordRequest::new("in", "out", "rec_");
        let builder = RecordBuilder::new(request, RecordBackend::RecordIo)
            .with_pool(PoolConfig::new().with_pool_size(3));
        assert_eq!(builder.pool().chunk_size, 1);
        assert_eq!(builder.pool().pool_size, 3);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_name_is_not_a_malformed_index() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join(OsStr::from_bytes(b"img_\xff7.png")), b"x").unwrap();

        let err = list_image_files(temp_dir.path()).unwrap_err();
        assert!(matches!(err, ImageinaryError::WithContext { .. }), "{err:?}");
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[test]
    fn test_missing_source_creates_nothing() {
        let temp_dir = tempdir().unwrap();
        let dest = temp_dir.path().join("out");
        let request = RecordRequest::new(temp_dir.path().join("missing"), &dest, "rec_");

        for backend in [RecordBackend::RecordIo, RecordBackend::TfRecord] {
            let err = RecordBuilder::new(request.clone(), backend)
                .build()
                .unwrap_err();
            assert!(err.is_config_error());
        }
        assert!(!dest.exists());
    }

    #[test]
    fn test_zero_images_per_file_is_config_error() {
        let temp_dir = tempdir().unwrap();
        let request = RecordRequest::new(temp_dir.path(), temp_dir.path().join("out"), "rec_")
            .with_images_per_file(0);
        let err = RecordBuilder::new(request, RecordBackend::TfRecord)
            .build()
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
