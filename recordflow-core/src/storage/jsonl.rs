//! JSON Lines shard files
//!
//! Sequential interchange format: one serialized record per line. It has
//! no index, so it cannot back a random-access data source.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::record_file::RecordFileSummary;
use crate::error::{RecordFlowError, Result};
use crate::features::Record;
use crate::metrics::standard;

/// Writer for `.jsonl` shards, renamed into place on finish
pub struct JsonLinesWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    file: BufWriter<File>,
    num_records: u64,
    num_bytes: u64,
    crc: u32,
}

impl JsonLinesWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        let file = BufWriter::new(File::create(&tmp_path)?);
        Ok(Self {
            path,
            tmp_path,
            file,
            num_records: 0,
            num_bytes: 0,
            crc: 0,
        })
    }

    pub fn append(&mut self, record: &Record) -> Result<u64> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.crc = crc32c::crc32c_append(self.crc, &line);
        self.num_bytes += line.len() as u64;

        let position = self.num_records;
        self.num_records += 1;
        standard::RECORDS_WRITTEN.inc();
        Ok(position)
    }

    pub fn finish(mut self) -> Result<RecordFileSummary> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        drop(self.file);
        fs::rename(&self.tmp_path, &self.path)?;
        Ok(RecordFileSummary {
            path: self.path,
            num_records: self.num_records,
            num_bytes: self.num_bytes,
            crc32c: self.crc,
        })
    }
}

/// Iterate the records of a `.jsonl` shard in order
pub fn read_json_lines(path: impl AsRef<Path>) -> Result<impl Iterator<Item = Result<Record>>> {
    let path = path.as_ref().to_path_buf();
    let reader = BufReader::new(File::open(&path)?);
    Ok(reader
        .lines()
        .enumerate()
        .filter(|(_, line)| line.as_ref().map(|l| !l.trim().is_empty()).unwrap_or(true))
        .map(move |(idx, line)| {
            let line = line?;
            serde_json::from_str::<Record>(&line).map_err(|e| RecordFlowError::BadInput {
                path: path.clone(),
                line: idx + 1,
                reason: e.to_string(),
            })
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonLinesWriter::create(dir.path().join("a.jsonl")).unwrap();
        writer.append(&Record::new().with("id", 1i64).with("blob", vec![7u8, 8])).unwrap();
        writer.append(&Record::new().with("id", 2i64).with("blob", Vec::<u8>::new())).unwrap();
        let summary = writer.finish().unwrap();
        assert_eq!(summary.num_records, 2);

        let records: Vec<Record> = read_json_lines(&summary.path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("blob").and_then(|v| v.as_bytes()), Some(&[7u8, 8][..]));
    }
}
