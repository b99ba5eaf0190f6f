//! Random-access record file
//!
//! Layout (little-endian):
//!
//! ```text
//! header   "RFLW" | u16 version | u16 reserved
//! payloads tagged, possibly compressed, bincode records
//! index    per record: u64 offset | u32 length | u32 crc32c
//! footer   u64 index offset | u64 record count | u32 index crc32c | "RFLW"
//! ```
//!
//! The index sits at a fixed offset computed from the footer, so any
//! record is located with one index lookup regardless of its position.

use bytes::{Buf, BufMut, BytesMut};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::compression::{self, CompressionConfig};
use crate::error::{RecordFlowError, Result};
use crate::features::{decode_record, encode_record, Record};
use crate::metrics::standard;

/// Magic bytes at both ends of every record file
pub const MAGIC: &[u8; 4] = b"RFLW";

/// Current on-disk format version
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 8;
const INDEX_ENTRY_LEN: usize = 16;
const FOOTER_LEN: usize = 24;

/// What a finished writer produced
#[derive(Debug, Clone)]
pub struct RecordFileSummary {
    pub path: PathBuf,
    pub num_records: u64,
    pub num_bytes: u64,
    /// Checksum of the index block
    pub crc32c: u32,
}

/// Sequential writer producing a random-access record file
///
/// Data goes to `<path>.tmp` and is renamed into place by [`finish`],
/// so a reader never observes a partially written file.
///
/// [`finish`]: RecordFileWriter::finish
pub struct RecordFileWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    file: BufWriter<File>,
    compression: CompressionConfig,
    offset: u64,
    index: BytesMut,
    num_records: u64,
    /// Payload bytes before compression
    encoded_bytes: u64,
}

impl RecordFileWriter {
    /// Create the temporary file and write the header
    pub fn create(path: impl AsRef<Path>, compression: CompressionConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = BufWriter::new(File::create(&tmp_path)?);
        let mut header = BytesMut::with_capacity(HEADER_LEN);
        header.put_slice(MAGIC);
        header.put_u16_le(FORMAT_VERSION);
        header.put_u16_le(0);
        file.write_all(&header)?;

        Ok(Self {
            path,
            tmp_path,
            file,
            compression,
            offset: HEADER_LEN as u64,
            index: BytesMut::new(),
            num_records: 0,
            encoded_bytes: 0,
        })
    }

    /// Append a record, returning its position
    pub fn append(&mut self, record: &Record) -> Result<u64> {
        let encoded = encode_record(record)?;
        let payload = compression::compress(&encoded, &self.compression)?;
        let length = u32::try_from(payload.len()).map_err(|_| RecordFlowError::Codec {
            message: format!("record of {} bytes exceeds the 4 GiB limit", payload.len()),
        })?;

        self.file.write_all(&payload)?;
        self.index.put_u64_le(self.offset);
        self.index.put_u32_le(length);
        self.index.put_u32_le(crc32c::crc32c(&payload));

        self.offset += payload.len() as u64;
        self.encoded_bytes += encoded.len() as u64;
        let position = self.num_records;
        self.num_records += 1;
        standard::RECORDS_WRITTEN.inc();
        Ok(position)
    }

    /// Number of records appended so far
    pub fn len(&self) -> u64 {
        self.num_records
    }

    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    /// Encoded bytes over stored payload bytes for the records so far
    pub fn compression_ratio(&self) -> f64 {
        let stored = self.offset - HEADER_LEN as u64;
        compression::compression_ratio(self.encoded_bytes as usize, stored as usize)
    }

    /// Write index and footer, sync, and move the file into place
    pub fn finish(mut self) -> Result<RecordFileSummary> {
        let index_crc = crc32c::crc32c(&self.index);
        self.file.write_all(&self.index)?;

        let mut footer = BytesMut::with_capacity(FOOTER_LEN);
        footer.put_u64_le(self.offset);
        footer.put_u64_le(self.num_records);
        footer.put_u32_le(index_crc);
        footer.put_slice(MAGIC);
        self.file.write_all(&footer)?;

        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        let ratio = self.compression_ratio();
        drop(self.file);
        fs::rename(&self.tmp_path, &self.path)?;

        let num_bytes = self.offset + self.index.len() as u64 + FOOTER_LEN as u64;
        debug!(
            "Finished record file {} ({} records, {} bytes, ratio {:.2})",
            self.path.display(),
            self.num_records,
            num_bytes,
            ratio
        );

        Ok(RecordFileSummary {
            path: self.path,
            num_records: self.num_records,
            num_bytes,
            crc32c: index_crc,
        })
    }
}

/// Memory-mapped reader with constant-time positional access
///
/// The mapping is read-only, so one reader can serve many threads.
pub struct RecordFileReader {
    path: PathBuf,
    mmap: Mmap,
    index_offset: usize,
    num_records: usize,
}

impl RecordFileReader {
    /// Map a record file and validate header, footer and index
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len() as usize;

        if file_len < HEADER_LEN + FOOTER_LEN {
            return Err(RecordFlowError::Truncated {
                path,
                reason: format!("{} bytes is smaller than header and footer", file_len),
            });
        }

        // SAFETY: the mapping is read-only and record files are never
        // modified in place after the writer renames them.
        let mmap = unsafe { Mmap::map(&file) }?;

        let mut header = &mmap[..HEADER_LEN];
        if &header[..4] != MAGIC {
            return Err(RecordFlowError::BadMagic { path });
        }
        header.advance(4);
        let version = header.get_u16_le();
        if version > FORMAT_VERSION {
            return Err(RecordFlowError::UnsupportedVersion {
                path,
                found: version,
                supported: FORMAT_VERSION,
            });
        }

        let mut footer = &mmap[file_len - FOOTER_LEN..];
        let index_offset = footer.get_u64_le() as usize;
        let num_records = footer.get_u64_le() as usize;
        let index_crc = footer.get_u32_le();
        if footer != MAGIC {
            return Err(RecordFlowError::BadMagic { path });
        }

        let index_end = num_records
            .checked_mul(INDEX_ENTRY_LEN)
            .and_then(|n| n.checked_add(index_offset));
        if index_offset < HEADER_LEN || index_end != Some(file_len - FOOTER_LEN) {
            return Err(RecordFlowError::Truncated {
                path,
                reason: format!(
                    "index of {} records at offset {} does not fit {} bytes",
                    num_records, index_offset, file_len
                ),
            });
        }

        let actual = crc32c::crc32c(&mmap[index_offset..file_len - FOOTER_LEN]);
        if actual != index_crc {
            return Err(RecordFlowError::ChecksumMismatch {
                path,
                position: num_records as u64,
                expected: index_crc,
                actual,
            });
        }

        debug!("Opened record file {} ({} records)", path.display(), num_records);

        Ok(Self {
            path,
            mmap,
            index_offset,
            num_records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in the file
    pub fn len(&self) -> usize {
        self.num_records
    }

    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    /// Checksummed payload at `position`, still compressed
    pub fn read_payload(&self, position: usize) -> Result<&[u8]> {
        if position >= self.num_records {
            return Err(RecordFlowError::PositionOutOfRange {
                position,
                len: self.num_records,
            });
        }

        let entry_start = self.index_offset + position * INDEX_ENTRY_LEN;
        let mut entry = &self.mmap[entry_start..entry_start + INDEX_ENTRY_LEN];
        let offset = entry.get_u64_le() as usize;
        let length = entry.get_u32_le() as usize;
        let expected = entry.get_u32_le();

        let end = offset.checked_add(length).unwrap_or(usize::MAX);
        if offset < HEADER_LEN || end > self.index_offset {
            return Err(RecordFlowError::Truncated {
                path: self.path.clone(),
                reason: format!("record {} spans {}..{} outside data block", position, offset, end),
            });
        }

        let payload = &self.mmap[offset..end];
        let actual = crc32c::crc32c(payload);
        if actual != expected {
            return Err(RecordFlowError::ChecksumMismatch {
                path: self.path.clone(),
                position: position as u64,
                expected,
                actual,
            });
        }
        Ok(payload)
    }

    /// Decode the record at `position`
    pub fn read(&self, position: usize) -> Result<Record> {
        let _timer = standard::READ_DURATION.start_timer();
        let payload = self.read_payload(position)?;
        let record = decode_record(&compression::decompress(payload)?)?;

        standard::RECORDS_READ.inc();
        standard::BYTES_READ.inc_by(payload.len() as u64);
        Ok(record)
    }

    /// Iterate all records in file order
    pub fn iter(&self) -> impl Iterator<Item = Result<Record>> + '_ {
        (0..self.num_records).map(move |i| self.read(i))
    }
}

impl std::fmt::Debug for RecordFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFileReader")
            .field("path", &self.path)
            .field("num_records", &self.num_records)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionAlgorithm;

    fn write_file(dir: &Path, n: i64, compression: CompressionConfig) -> RecordFileSummary {
        let mut writer = RecordFileWriter::create(dir.join("data.rflw"), compression).unwrap();
        for i in 0..n {
            let pos = writer
                .append(&Record::new().with("id", i).with("text", format!("row {}", i)))
                .unwrap();
            assert_eq!(pos, i as u64);
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_random_access() {
        let dir = tempfile::tempdir().unwrap();
        let summary = write_file(dir.path(), 100, CompressionConfig::default());
        assert_eq!(summary.num_records, 100);
        assert!(!dir.path().join("data.rflw.tmp").exists());

        let reader = RecordFileReader::open(&summary.path).unwrap();
        assert_eq!(reader.len(), 100);
        for position in [99, 0, 57, 3] {
            let record = reader.read(position).unwrap();
            assert_eq!(record.get("id").and_then(|v| v.as_int()), Some(position as i64));
        }
        assert!(matches!(
            reader.read(100),
            Err(RecordFlowError::PositionOutOfRange { position: 100, len: 100 })
        ));
    }

    #[test]
    fn test_writer_compression_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let text = "abc".repeat(500);
        let config = CompressionConfig { min_size: 0, ..CompressionConfig::new(CompressionAlgorithm::Zstd) };

        let mut writer = RecordFileWriter::create(dir.path().join("zstd.rflw"), config).unwrap();
        assert_eq!(writer.compression_ratio(), 0.0);
        for _ in 0..4 {
            writer.append(&Record::new().with("text", text.clone())).unwrap();
        }
        assert!(writer.compression_ratio() > 4.0);

        let mut plain = RecordFileWriter::create(dir.path().join("plain.rflw"), CompressionConfig::default()).unwrap();
        plain.append(&Record::new().with("text", text)).unwrap();
        let ratio = plain.compression_ratio();
        assert!(ratio > 0.9 && ratio <= 1.0, "ratio {}", ratio);
    }

    #[test]
    fn test_compressed_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = CompressionConfig { min_size: 0, ..CompressionConfig::new(CompressionAlgorithm::Zstd) };
        let summary = write_file(dir.path(), 10, config);

        let reader = RecordFileReader::open(&summary.path).unwrap();
        let texts: Vec<String> = reader
            .iter()
            .map(|r| r.unwrap().get("text").and_then(|v| v.as_text()).unwrap().to_string())
            .collect();
        assert_eq!(texts[9], "row 9");
    }

    #[test]
    fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let summary = write_file(dir.path(), 0, CompressionConfig::default());
        let reader = RecordFileReader::open(&summary.path).unwrap();
        assert!(reader.is_empty());
        assert!(reader.read(0).is_err());
    }

    #[test]
    fn test_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let summary = write_file(dir.path(), 4, CompressionConfig::default());

        let mut bytes = fs::read(&summary.path).unwrap();
        bytes[HEADER_LEN + 2] ^= 0xFF;
        fs::write(&summary.path, &bytes).unwrap();

        let reader = RecordFileReader::open(&summary.path).unwrap();
        let err = reader.read(0).unwrap_err();
        assert!(err.is_corruption(), "unexpected error {:?}", err);
        assert!(reader.read(3).is_ok());
        drop(reader);

        fs::write(&summary.path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(RecordFileReader::open(&summary.path).unwrap_err().is_corruption());
    }
}
