//! TFRecord containers of `tf.train.Example` messages.
//!
//! Every record is framed as `u64 length | u32 masked crc of length | data |
//! u32 masked crc of data`, little-endian, using CRC-32C.

use crate::config::{append_to_path, RecordRequest};
use crate::container::{ContainerWriter, RecordBackend};
use crate::dispatch::WorkDispatcher;
use crate::error::{ImageinaryError, Result};
use prost::Message;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Feature key holding the encoded image bytes
pub const IMAGE_ENCODED_KEY: &str = "image/encoded";
/// Feature key holding the class label
pub const IMAGE_LABEL_KEY: &str = "image/class/label";

const MASK_DELTA: u32 = 0xa282_ead8;

/// Protobuf messages mirroring `tensorflow/core/example/{example,feature}.proto`
pub mod proto {
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct BytesList {
        #[prost(bytes = "vec", repeated, tag = "1")]
        pub value: Vec<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FloatList {
        #[prost(float, repeated, tag = "1")]
        pub value: Vec<f32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Int64List {
        #[prost(int64, repeated, tag = "1")]
        pub value: Vec<i64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Feature {
        #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
        pub kind: Option<feature::Kind>,
    }

    pub mod feature {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Kind {
            #[prost(message, tag = "1")]
            BytesList(super::BytesList),
            #[prost(message, tag = "2")]
            FloatList(super::FloatList),
            #[prost(message, tag = "3")]
            Int64List(super::Int64List),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Features {
        #[prost(map = "string, message", tag = "1")]
        pub feature: HashMap<String, Feature>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Example {
        #[prost(message, optional, tag = "1")]
        pub features: Option<Features>,
    }
}

use proto::feature::Kind;
use proto::{BytesList, Example, Feature, Features, Int64List};

/// Build the example stored for one image
pub fn image_example(image: Vec<u8>, label: i64) -> Example {
    let mut features = Features::default();
    features.feature.insert(
        IMAGE_ENCODED_KEY.to_string(),
        Feature {
            kind: Some(Kind::BytesList(BytesList { value: vec![image] })),
        },
    );
    features.feature.insert(
        IMAGE_LABEL_KEY.to_string(),
        Feature {
            kind: Some(Kind::Int64List(Int64List { value: vec![label] })),
        },
    );

    Example {
        features: Some(features),
    }
}

/// Encoded image bytes and label of an example written by [`image_example`]
pub fn read_image_example(example: &Example) -> Option<(&[u8], i64)> {
    let features = &example.features.as_ref()?.feature;
    let image = match features.get(IMAGE_ENCODED_KEY)?.kind.as_ref()? {
        Kind::BytesList(list) => list.value.first()?.as_slice(),
        _ => return None,
    };
    let label = match features.get(IMAGE_LABEL_KEY)?.kind.as_ref()? {
        Kind::Int64List(list) => *list.value.first()?,
        _ => return None,
    };
    Some((image, label))
}

/// CRC-32C of `data`, rotated and offset as TFRecord stores it
pub fn masked_crc32c(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Path of record file `n`, e.g. `out/train_` -> `out/train_3`
pub fn record_path(combined_prefix: &Path, n: usize) -> PathBuf {
    append_to_path(combined_prefix, &n.to_string())
}

/// Sequential TFRecord file writer
pub struct TfRecordWriter {
    out: BufWriter<File>,
    path: PathBuf,
    records: usize,
}

impl TfRecordWriter {
    /// Create (or truncate) a record file
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        Ok(Self {
            out: BufWriter::new(File::create(&path)?),
            path,
            records: 0,
        })
    }

    /// Append one framed record
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let length = (data.len() as u64).to_le_bytes();
        self.out.write_all(&length)?;
        self.out.write_all(&masked_crc32c(&length).to_le_bytes())?;
        self.out.write_all(data)?;
        self.out.write_all(&masked_crc32c(data).to_le_bytes())?;
        self.records += 1;
        Ok(())
    }

    /// Number of records written so far
    pub fn records(&self) -> usize {
        self.records
    }

    /// Flush and close, returning the number of records written
    pub fn finish(mut self) -> Result<usize> {
        self.out.flush()?;
        tracing::debug!(path = %self.path.display(), records = self.records, "TFRecord file written");
        Ok(self.records)
    }
}

/// Sequential TFRecord reader verifying both checksums of every record
pub struct TfRecordReader {
    input: BufReader<File>,
    path: PathBuf,
}

impl TfRecordReader {
    /// Open a record file
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        Ok(Self {
            input: BufReader::new(File::open(&path)?),
            path,
        })
    }

    /// Read the next record, `None` at end of file
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut length = [0u8; 8];
        match self.input.read_exact(&mut length) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        self.check_crc(&length, "length")?;

        let len = usize::try_from(u64::from_le_bytes(length)).map_err(|_| {
            ImageinaryError::corrupt_record(&self.path, "record length overflows usize")
        })?;
        let mut data = vec![0u8; len];
        self.input.read_exact(&mut data)?;
        self.check_crc(&data, "data")?;

        Ok(Some(data))
    }

    fn check_crc(&mut self, bytes: &[u8], what: &str) -> Result<()> {
        let mut stored = [0u8; 4];
        self.input.read_exact(&mut stored)?;
        if u32::from_le_bytes(stored) == masked_crc32c(bytes) {
            Ok(())
        } else {
            Err(ImageinaryError::corrupt_record(
                &self.path,
                format!("{what} checksum mismatch"),
            ))
        }
    }
}

impl Iterator for TfRecordReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Count the records in a TFRecord file
pub fn count_records(path: impl Into<PathBuf>) -> Result<usize> {
    TfRecordReader::open(path)?.try_fold(0, |count, record| record.map(|_| count + 1))
}

/// Write `files` into `{dest_dir}/{name_prefix}{n}` files of `group_size` examples.
///
/// The first file is opened before iterating. A new file is started when the
/// running image count exceeds `group_size`, so `k * group_size` images give
/// exactly `k` files. Returns the number of files written.
pub fn write_group<I>(
    source_dir: &Path,
    dest_dir: &Path,
    name_prefix: &str,
    files: I,
    group_size: usize,
) -> Result<usize>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    write_group_with(source_dir, dest_dir, name_prefix, files, group_size, || {})
}

/// [`write_group`], calling `on_image` after each image is written
pub fn write_group_with<I, F>(
    source_dir: &Path,
    dest_dir: &Path,
    name_prefix: &str,
    files: I,
    group_size: usize,
    mut on_image: F,
) -> Result<usize>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
    F: FnMut(),
{
    if group_size == 0 {
        return Err(ImageinaryError::invalid_config(
            "images per record file must be positive",
        ));
    }

    let combined_prefix = dest_dir.join(name_prefix);
    let mut image_count = 0;
    let mut record = 0;
    let mut writer = TfRecordWriter::create(record_path(&combined_prefix, record))?;

    for file_name in files {
        image_count += 1;
        if image_count > group_size {
            image_count = 1;
            writer.finish()?;
            record += 1;
            writer = TfRecordWriter::create(record_path(&combined_prefix, record))?;
        }

        let path = source_dir.join(file_name.as_ref());
        let image = fs::read(&path).map_err(|e| {
            ImageinaryError::with_context(format!("reading {}", path.display()), e)
        })?;
        writer.write(&image_example(image, 0).encode_to_vec())?;
        on_image();
    }

    writer.finish()?;
    Ok(record + 1)
}

/// Writes groups of images into TFRecord files on the calling thread.
///
/// The dispatcher's worker pool is unused; only its progress bar is driven.
#[derive(Debug, Default, Clone, Copy)]
pub struct TfRecordContainer;

impl ContainerWriter for TfRecordContainer {
    fn backend(&self) -> RecordBackend {
        RecordBackend::TfRecord
    }

    fn write_containers(
        &self,
        request: &RecordRequest,
        files: Vec<String>,
        dispatcher: &WorkDispatcher,
    ) -> Result<usize> {
        let progress = dispatcher.progress_for(files.len());
        let outcome = write_group_with(
            &request.source_path,
            &request.dest_path,
            &request.name_prefix,
            files,
            request.images_per_file,
            || {
                if let Some(pb) = &progress {
                    pb.inc(1);
                }
            },
        );
        dispatcher.finish_progress(&outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use tempfile::tempdir;

    #[test]
    fn test_masked_crc_of_empty_input() {
        assert_eq!(masked_crc32c(&[]), MASK_DELTA);
    }

    #[test]
    fn test_example_round_trip() {
        let example = image_example(vec![1, 2, 3], 0);
        let decoded = Example::decode(example.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, example);
        assert_eq!(read_image_example(&decoded), Some((&[1u8, 2, 3][..], 0)));
    }

    #[test]
    fn test_reader_detects_corruption() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("bad");

        let mut writer = TfRecordWriter::create(&path).unwrap();
        writer.write(b"payload").unwrap();
        writer.finish().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[12] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let mut reader = TfRecordReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_record(),
            Err(ImageinaryError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn test_writer_framing() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("frame");

        let mut writer = TfRecordWriter::create(&path).unwrap();
        writer.write(b"abc").unwrap();
        writer.write(b"").unwrap();
        assert_eq!(writer.finish().unwrap(), 2);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), (8 + 4 + 3 + 4) + (8 + 4 + 4));
        assert_eq!(u64::from_le_bytes(bytes[0..8].try_into().unwrap()), 3);

        let records: Vec<Vec<u8>> = TfRecordReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records, vec![b"abc".to_vec(), Vec::new()]);
    }

    #[test]
    fn test_group_boundaries() {
        let temp_dir = tempdir().unwrap();
        let source = temp_dir.path().join("in");
        let dest = temp_dir.path().join("out");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&dest).unwrap();

        let files: Vec<String> = (0..7).map(|i| format!("img_{i}.png")).collect();
        for name in &files {
            fs::write(source.join(name), name.as_bytes()).unwrap();
        }

        let written = write_group(&source, &dest, "train_", &files, 3).unwrap();
        assert_eq!(written, 3);
        assert_eq!(count_records(dest.join("train_0")).unwrap(), 3);
        assert_eq!(count_records(dest.join("train_1")).unwrap(), 3);
        assert_eq!(count_records(dest.join("train_2")).unwrap(), 1);

        let first = TfRecordReader::open(dest.join("train_1")).unwrap().next().unwrap().unwrap();
        let example = Example::decode(first.as_slice()).unwrap();
        let (image, label) = read_image_example(&example).unwrap();
        assert_eq!(image, b"img_3.png");
        assert_eq!(label, 0);
    }

    #[test]
    fn test_container_drives_progress() {
        let temp_dir = tempdir().unwrap();
        let source = temp_dir.path().join("in");
        fs::create_dir_all(&source).unwrap();
        let files: Vec<String> = (0..5).map(|i| format!("img_{i}.png")).collect();
        for name in &files {
            fs::write(source.join(name), b"x").unwrap();
        }
        let dest = temp_dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        let request = RecordRequest::new(&source, &dest, "r_").with_images_per_file(2);
        let dispatcher = WorkDispatcher::new(PoolConfig::single()).with_progress();
        assert_eq!(TfRecordContainer.write_containers(&request, files, &dispatcher).unwrap(), 3);

        let pb = dispatcher.progress_bar().unwrap();
        assert_eq!(pb.position(), 5);
        assert_eq!(pb.length(), Some(5));
        assert!(pb.is_finished());
    }

    #[test]
    fn test_exact_multiple_gives_no_trailing_file() {
        let temp_dir = tempdir().unwrap();
        let files: Vec<String> = (0..4).map(|i| format!("{i}.jpg")).collect();
        for name in &files {
            fs::write(temp_dir.path().join(name), b"x").unwrap();
        }
        let dest = temp_dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();

        assert_eq!(write_group(temp_dir.path(), &dest, "r", &files, 2).unwrap(), 2);
        assert!(!dest.join("r2").exists());
    }
}
