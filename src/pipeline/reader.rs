//! Scan log input: file opening and line batching

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Read buffer for scan logs
const READ_BUFFER_SIZE: usize = 1 << 20;

/// A run of consecutive lines from the log
#[derive(Debug, Clone, Default)]
pub struct LineBatch {
    /// Position of the batch in the input, starting at 0
    pub seq: u64,
    pub lines: Vec<String>,
}

/// Open a scan log, transparently decompressing `.gz` files
pub fn open_input(path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    let gzipped = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));

    if gzipped {
        Ok(Box::new(BufReader::with_capacity(
            READ_BUFFER_SIZE,
            MultiGzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file)))
    }
}

/// Splits a line stream into fixed-size batches
///
/// Invalid UTF-8 is replaced rather than treated as an error; the parser
/// will usually reject such a line and it is counted as skipped.
pub struct BatchReader<R> {
    source: R,
    batch_lines: usize,
    next_seq: u64,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> BatchReader<R> {
    pub fn new(source: R, batch_lines: usize) -> Self {
        Self {
            source,
            batch_lines: batch_lines.max(1),
            next_seq: 0,
            buf: Vec::with_capacity(4096),
            done: false,
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        if self.source.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

impl<R: BufRead> Iterator for BatchReader<R> {
    type Item = io::Result<LineBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut lines = Vec::with_capacity(self.batch_lines);
        while lines.len() < self.batch_lines {
            match self.read_line() {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        if lines.is_empty() {
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        Some(Ok(LineBatch { seq, lines }))
    }
}
