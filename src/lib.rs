//! imageinary - reproducible synthetic image datasets for data-loading benchmarks
//!
//! This crate generates random images and packages them into the record
//! containers deep-learning input pipelines read, so loaders can be stress
//! tested without a real corpus.
//!
//! # Features
//!
//! - **Reproducible images**: image `n` is seeded with `seed + n`, so output is
//!   identical for any worker count or scheduling order
//! - **Formats**: JPEG (RGB), PNG and BMP (RGBA)
//! - **RecordIO**: sharded `.rec` / `.idx` pairs with O(1) key lookup
//!   (cargo feature `recordio`)
//! - **TFRecord**: `tf.train.Example` records grouped per file
//!   (cargo feature `tfrecord`)
//! - **Parallel**: a fixed-size Rayon pool sized to the host by default
//!
//! # Example
//!
//! ```rust,no_run
//! use imageinary::{GenerationRequest, ImageFormat, ImageGenerator};
//! use imageinary::{RecordBackend, RecordBuilder, RecordRequest};
//!
//! let request = GenerationRequest::new("./images", "sample_", ImageFormat::Jpg)
//!     .with_dimensions(640, 480)
//!     .with_count(100);
//! ImageGenerator::new(request).generate()?;
//!
//! let records = RecordRequest::new("./images", "./records", "sample_record_")
//!     .with_images_per_file(10);
//! RecordBuilder::new(records, RecordBackend::RecordIo).build()?;
//! # Ok::<(), imageinary::ImageinaryError>(())
//! ```

pub mod config;
pub mod container;
pub mod dispatch;
pub mod error;
pub mod generator;
#[cfg(feature = "recordio")]
pub mod recordio;
pub mod sharding;
#[cfg(feature = "tfrecord")]
pub mod tfrecord;

pub use config::{GenerationRequest, ImageFormat, PoolConfig, RecordRequest};
pub use container::{ContainerWriter, RecordBackend, RecordBuilder, RecordResult};
pub use dispatch::{DispatchReport, WorkDispatcher};
pub use error::{ImageinaryError, Result};
pub use generator::{GenerationResult, ImageGenerator};
pub use sharding::{partition, ShardDescriptor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{GenerationRequest, ImageFormat, PoolConfig, RecordRequest};
    pub use crate::container::{RecordBackend, RecordBuilder};
    pub use crate::error::Result;
    pub use crate::generator::ImageGenerator;
}
