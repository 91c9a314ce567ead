//! Partitioning of an ordered file list into record shards

use crate::error::{ImageinaryError, Result};
use std::iter::FusedIterator;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// One contiguous slice of the source listing, destined for one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescriptor {
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub name_prefix: String,
    pub file_names: Vec<String>,
    pub shard_index: usize,
}

impl ShardDescriptor {
    /// Number of images in this shard
    pub fn len(&self) -> usize {
        self.file_names.len()
    }

    /// Whether the shard holds no images
    pub fn is_empty(&self) -> bool {
        self.file_names.is_empty()
    }

    /// Full path of a source image in this shard
    pub fn source_file(&self, file_name: &str) -> PathBuf {
        self.source_dir.join(file_name)
    }
}

/// Number of shards needed for `len` files, `ceil(len / shard_size)`
pub fn num_shards(len: usize, shard_size: usize) -> usize {
    if shard_size == 0 {
        0
    } else {
        len.div_ceil(shard_size)
    }
}

/// Index range of shard `shard_index`
pub fn shard_bounds(len: usize, shard_size: usize, shard_index: usize) -> Range<usize> {
    let start = (shard_index * shard_size).min(len);
    let end = (start + shard_size).min(len);
    start..end
}

/// Lazily yields [`ShardDescriptor`]s over a borrowed file list
#[derive(Debug, Clone)]
pub struct Shards<'a> {
    source_dir: &'a Path,
    dest_dir: &'a Path,
    name_prefix: &'a str,
    files: &'a [String],
    shard_size: usize,
    next: usize,
    total: usize,
}

impl Iterator for Shards<'_> {
    type Item = ShardDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let shard_index = self.next;
        self.next += 1;

        let range = shard_bounds(self.files.len(), self.shard_size, shard_index);
        Some(ShardDescriptor {
            source_dir: self.source_dir.to_path_buf(),
            dest_dir: self.dest_dir.to_path_buf(),
            name_prefix: self.name_prefix.to_string(),
            file_names: self.files[range].to_vec(),
            shard_index,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Shards<'_> {}

impl FusedIterator for Shards<'_> {}

/// Split `files` into contiguous shards of at most `shard_size` entries.
///
/// Listing order is preserved and only the final shard may be short. A zero
/// shard size is rejected.
pub fn partition<'a>(
    source_dir: &'a Path,
    dest_dir: &'a Path,
    name_prefix: &'a str,
    files: &'a [String],
    shard_size: usize,
) -> Result<Shards<'a>> {
    if shard_size == 0 {
        return Err(ImageinaryError::invalid_config(
            "shard size must be positive",
        ));
    }

    Ok(Shards {
        source_dir,
        dest_dir,
        name_prefix,
        files,
        shard_size,
        next: 0,
        total: num_shards(files.len(), shard_size),
    })
}
