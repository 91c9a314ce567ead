//! MXNet-compatible indexed RecordIO containers.
//!
//! A shard is stored as a data file (`.rec`) holding framed records and a
//! text index (`.idx`) mapping each image index to the byte offset of its
//! record, so any key can be read without scanning the data file.
//!
//! Each frame is `magic | lrec | payload | padding`, all little-endian, where
//! `lrec` packs a 3-bit continuation flag above a 29-bit length. Payloads that
//! contain the magic word on a 4-byte boundary are split around it.

use crate::config::{append_to_path, RecordRequest};
use crate::container::{ContainerWriter, RecordBackend};
use crate::dispatch::WorkDispatcher;
use crate::error::{ImageinaryError, Result};
use crate::sharding::{partition, ShardDescriptor};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Frame marker preceding every record part
pub const RECORDIO_MAGIC: u32 = 0xced7_230a;
/// Size of the packed [`RecordHeader`]
pub const HEADER_SIZE: usize = 24;

const LENGTH_BITS: u32 = 29;
const LENGTH_MASK: u32 = (1 << LENGTH_BITS) - 1;

// Continuation flags
const CFLAG_WHOLE: u32 = 0;
const CFLAG_FIRST: u32 = 1;
const CFLAG_MIDDLE: u32 = 2;
const CFLAG_LAST: u32 = 3;

/// Fixed header packed in front of every image payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordHeader {
    pub flag: u32,
    pub label: f32,
    pub id: u64,
    pub id2: u64,
}

impl RecordHeader {
    /// Header for an unlabeled image keyed by `id`
    pub fn for_image(id: u64) -> Self {
        Self {
            flag: 0,
            label: 0.0,
            id,
            id2: 0,
        }
    }

    /// Serialize as `u32 flag | f32 label | u64 id | u64 id2`
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.flag.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.label.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.id.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.id2.to_le_bytes());
        bytes
    }

    /// Parse a header from the front of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..HEADER_SIZE)?;
        Some(Self {
            flag: u32::from_le_bytes(bytes[0..4].try_into().ok()?),
            label: f32::from_le_bytes(bytes[4..8].try_into().ok()?),
            id: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            id2: u64::from_le_bytes(bytes[16..24].try_into().ok()?),
        })
    }
}

/// Prefix `payload` with its header
pub fn pack(header: &RecordHeader, payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(HEADER_SIZE + payload.len());
    record.extend_from_slice(&header.to_bytes());
    record.extend_from_slice(payload);
    record
}

/// Split a packed record into header and payload
pub fn unpack(record: &[u8]) -> Option<(RecordHeader, &[u8])> {
    let header = RecordHeader::from_bytes(record)?;
    Some((header, &record[HEADER_SIZE..]))
}

/// Integer key of an image file: the first run of ASCII digits in its name.
///
/// `tmp_640x480_12.jpg` yields 640; the first match is kept on purpose.
pub fn extract_image_index(file_name: &str) -> Result<u64> {
    let malformed = || ImageinaryError::MalformedFilename(file_name.to_string());

    let start = file_name
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(malformed)?;
    let digits = &file_name[start..];
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());

    digits[..end].parse().map_err(|_| malformed())
}

fn encode_lrec(cflag: u32, length: u32) -> u32 {
    (cflag << LENGTH_BITS) | length
}

fn decode_lrec(lrec: u32) -> (u32, u32) {
    (lrec >> LENGTH_BITS, lrec & LENGTH_MASK)
}

fn padding(length: usize) -> usize {
    (4 - length % 4) % 4
}

/// Writes a `.rec` data file together with its `.idx` index
pub struct IndexedRecordWriter {
    data: BufWriter<File>,
    index: BufWriter<File>,
    data_path: PathBuf,
    index_path: PathBuf,
    position: u64,
    records: usize,
}

impl IndexedRecordWriter {
    /// Create (or truncate) both files
    pub fn create(index_path: impl Into<PathBuf>, data_path: impl Into<PathBuf>) -> Result<Self> {
        let index_path = index_path.into();
        let data_path = data_path.into();
        let open = |path: &Path| {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
        };

        Ok(Self {
            data: BufWriter::new(open(&data_path)?),
            index: BufWriter::new(open(&index_path)?),
            data_path,
            index_path,
            position: 0,
            records: 0,
        })
    }

    /// Append `record` and index it under `key`
    pub fn write_idx(&mut self, key: u64, record: &[u8]) -> Result<()> {
        let offset = self.position;
        self.write_record(record)?;
        writeln!(self.index, "{key}\t{offset}")?;
        self.records += 1;
        Ok(())
    }

    /// Number of records written so far
    pub fn records(&self) -> usize {
        self.records
    }

    fn write_record(&mut self, record: &[u8]) -> Result<()> {
        if record.len() > LENGTH_MASK as usize {
            return Err(ImageinaryError::invalid_config(format!(
                "record of {} bytes exceeds the RecordIO limit of {} bytes",
                record.len(),
                LENGTH_MASK
            )));
        }

        let magic = RECORDIO_MAGIC.to_le_bytes();
        let mut start = 0;
        for (word, chunk) in record.chunks_exact(4).enumerate() {
            if chunk == magic.as_slice() {
                let at = word * 4;
                let cflag = if start == 0 { CFLAG_FIRST } else { CFLAG_MIDDLE };
                self.write_frame(cflag, &record[start..at])?;
                start = at + 4;
            }
        }

        let cflag = if start == 0 { CFLAG_WHOLE } else { CFLAG_LAST };
        self.write_frame(cflag, &record[start..])?;
        Ok(())
    }

    fn write_frame(&mut self, cflag: u32, part: &[u8]) -> io::Result<()> {
        // Length was bounds-checked against LENGTH_MASK by the caller.
        let lrec = encode_lrec(cflag, part.len() as u32);
        let pad = padding(part.len());

        self.data.write_all(&RECORDIO_MAGIC.to_le_bytes())?;
        self.data.write_all(&lrec.to_le_bytes())?;
        self.data.write_all(part)?;
        self.data.write_all(&[0u8; 3][..pad])?;

        self.position += (8 + part.len() + pad) as u64;
        Ok(())
    }

    /// Flush both files and return `(data_path, index_path)`
    pub fn finish(mut self) -> Result<(PathBuf, PathBuf)> {
        self.data.flush()?;
        self.index.flush()?;
        Ok((self.data_path, self.index_path))
    }
}

/// Random access reader over a `.rec` / `.idx` pair
pub struct IndexedRecordReader {
    data: BufReader<File>,
    data_path: PathBuf,
    offsets: HashMap<u64, u64>,
    keys: Vec<u64>,
}

impl IndexedRecordReader {
    /// Open a data file and load its index into memory
    pub fn open(index_path: impl AsRef<Path>, data_path: impl AsRef<Path>) -> Result<Self> {
        let index_path = index_path.as_ref();
        let data_path = data_path.as_ref().to_path_buf();

        let mut offsets = HashMap::new();
        let mut keys = Vec::new();
        for line in BufReader::new(File::open(index_path)?).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = line
                .split_once('\t')
                .and_then(|(key, pos)| {
                    Some((
                        key.trim().parse::<u64>().ok()?,
                        pos.trim().parse::<u64>().ok()?,
                    ))
                });
            let (key, pos) = parsed.ok_or_else(|| {
                ImageinaryError::corrupt_record(index_path, format!("bad index line {line:?}"))
            })?;
            offsets.insert(key, pos);
            keys.push(key);
        }

        Ok(Self {
            data: BufReader::new(File::open(&data_path)?),
            data_path,
            offsets,
            keys,
        })
    }

    /// Keys in index order
    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    /// Number of indexed records
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Read the record stored under `key`
    pub fn read_idx(&mut self, key: u64) -> Result<Option<Vec<u8>>> {
        let Some(&offset) = self.offsets.get(&key) else {
            return Ok(None);
        };
        self.data.seek(SeekFrom::Start(offset))?;
        self.read_record()
    }

    /// Read the record at the current position, `None` at end of file
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let magic = RECORDIO_MAGIC.to_le_bytes();
        let mut record = Vec::new();
        let mut first = true;

        loop {
            let mut head = [0u8; 8];
            match self.data.read_exact(&mut head) {
                Ok(()) => {}
                Err(err) if first && err.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(None)
                }
                Err(err) => return Err(err.into()),
            }
            first = false;

            if head[0..4] != magic {
                return Err(ImageinaryError::corrupt_record(
                    &self.data_path,
                    "missing RecordIO magic",
                ));
            }
            let lrec = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
            let (cflag, length) = decode_lrec(lrec);

            let start = record.len();
            record.resize(start + length as usize, 0);
            self.data.read_exact(&mut record[start..])?;
            let mut pad = [0u8; 3];
            self.data.read_exact(&mut pad[..padding(length as usize)])?;

            match cflag {
                CFLAG_WHOLE | CFLAG_LAST => return Ok(Some(record)),
                CFLAG_FIRST | CFLAG_MIDDLE => record.extend_from_slice(&magic),
                other => {
                    return Err(ImageinaryError::corrupt_record(
                        &self.data_path,
                        format!("invalid continuation flag {other}"),
                    ))
                }
            }
        }
    }
}

/// `(data_path, index_path)` for a shard
pub fn shard_paths(shard: &ShardDescriptor) -> (PathBuf, PathBuf) {
    let combined = shard.dest_dir.join(&shard.name_prefix);
    (
        append_to_path(&combined, &format!("{}.rec", shard.shard_index)),
        append_to_path(&combined, &format!("{}.idx", shard.shard_index)),
    )
}

/// Pack every image of `shard` into its own `.rec` / `.idx` pair
pub fn write_shard(shard: &ShardDescriptor) -> Result<(PathBuf, PathBuf)> {
    let (data_path, index_path) = shard_paths(shard);
    let mut writer = IndexedRecordWriter::create(&index_path, &data_path)?;

    for file_name in &shard.file_names {
        let key = extract_image_index(file_name)?;
        let path = shard.source_file(file_name);
        let image = fs::read(&path).map_err(|e| {
            ImageinaryError::with_context(format!("reading {}", path.display()), e)
        })?;
        writer.write_idx(key, &pack(&RecordHeader::for_image(key), &image))?;
    }

    tracing::debug!(
        shard = shard.shard_index,
        records = writer.records(),
        path = %data_path.display(),
        "RecordIO shard written"
    );
    writer.finish()
}

/// Shards the listing and writes one RecordIO pair per shard in parallel
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordIoContainer;

impl ContainerWriter for RecordIoContainer {
    fn backend(&self) -> RecordBackend {
        RecordBackend::RecordIo
    }

    fn write_containers(
        &self,
        request: &RecordRequest,
        files: Vec<String>,
        dispatcher: &WorkDispatcher,
    ) -> Result<usize> {
        let shards: Vec<ShardDescriptor> = partition(
            &request.source_path,
            &request.dest_path,
            &request.name_prefix,
            &files,
            request.images_per_file,
        )?
        .collect();
        let num_shards = shards.len();

        dispatcher.run(shards, |shard| write_shard(&shard).map(|_| ()))?;
        Ok(num_shards * 2)
    }
}
