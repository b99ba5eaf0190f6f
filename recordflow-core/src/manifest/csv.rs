//! Minimal CSV reader for manifest inputs
//!
//! Handles a header row, double-quoted fields and `""` escapes. Quoted
//! fields may not span lines.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use crate::error::{RecordFlowError, Result};

/// Streaming reader yielding one row of cells per line
pub struct CsvReader {
    path: PathBuf,
    header: Vec<String>,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    delimiter: char,
}

impl CsvReader {
    /// Open a file and consume its header row
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut lines = BufReader::new(File::open(&path)?).lines();
        let header_line = lines.next().transpose()?.ok_or_else(|| RecordFlowError::BadInput {
            path: path.clone(),
            line: 1,
            reason: "empty CSV, expected a header row".into(),
        })?;

        let delimiter = ',';
        let header = split_row(header_line.trim_start_matches('\u{feff}'), delimiter).map_err(|reason| {
            RecordFlowError::BadInput {
                path: path.clone(),
                line: 1,
                reason,
            }
        })?;

        Ok(Self {
            path,
            header,
            lines,
            line_no: 1,
            delimiter,
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Index of a named column
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Line number of the row most recently returned
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for CsvReader {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let row = split_row(&line, self.delimiter).and_then(|cells| {
                if cells.len() == self.header.len() {
                    Ok(cells)
                } else {
                    Err(format!(
                        "{} columns, expected {}",
                        cells.len(),
                        self.header.len()
                    ))
                }
            });
            return Some(row.map_err(|reason| RecordFlowError::BadInput {
                path: self.path.clone(),
                line: self.line_no,
                reason,
            }));
        }
    }
}

/// Split one line into cells
fn split_row(line: &str, delimiter: char) -> std::result::Result<Vec<String>, String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    cell.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if cell.is_empty() => in_quotes = true,
            c if c == delimiter && !in_quotes => cells.push(std::mem::take(&mut cell)),
            '\r' if !in_quotes && chars.peek().is_none() => {}
            c => cell.push(c),
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".into());
    }
    cells.push(cell);
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_split_row_quotes() {
        assert_eq!(split_row("a,b,c", ',').unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            split_row(r#"1,"hello, world","say ""hi""""#, ',').unwrap(),
            vec!["1", "hello, world", r#"say "hi""#]
        );
        assert_eq!(split_row("x,,", ',').unwrap(), vec!["x", "", ""]);
        assert!(split_row(r#""open"#, ',').is_err());
    }

    #[test]
    fn test_reader_rows_and_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,name").unwrap();
        writeln!(file, "1,alpha").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "2,beta,extra").unwrap();

        let mut reader = CsvReader::open(file.path()).unwrap();
        assert_eq!(reader.column("name"), Some(1));
        assert_eq!(reader.next().unwrap().unwrap(), vec!["1", "alpha"]);
        match reader.next().unwrap() {
            Err(RecordFlowError::BadInput { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected bad input, got {:?}", other),
        }
        assert!(reader.next().is_none());
    }
}
