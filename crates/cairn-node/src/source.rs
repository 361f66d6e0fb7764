//! JSON-lines block feed.
//!
//! Each non-blank line is one block: `{"height": n, "transactions": [...]}`.
//! Heights must be strictly increasing. The file is read forward only, so
//! ranges must be requested in ascending, non-overlapping order, which is
//! how the clustering driver walks them.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use cairn_core::error::SourceError;
use cairn_core::traits::TransactionSource;
use cairn_core::types::BlockView;

pub struct JsonlSource<R: BufRead> {
    reader: R,
    line: usize,
    /// First block at or beyond the end of the last requested range.
    peeked: Option<BlockView>,
    last_height: Option<u64>,
    /// Lowest height a new request may start at.
    cursor: u64,
}

impl JsonlSource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let file = File::open(path.as_ref())
            .map_err(|e| SourceError::Io(format!("{}: {e}", path.as_ref().display())))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonlSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            peeked: None,
            last_height: None,
            cursor: 0,
        }
    }

    /// Height of the last block read from the underlying stream.
    pub fn last_height(&self) -> Option<u64> {
        self.last_height
    }

    fn next_block(&mut self) -> Result<Option<BlockView>, SourceError> {
        if let Some(block) = self.peeked.take() {
            return Ok(Some(block));
        }
        let mut buf = String::new();
        loop {
            buf.clear();
            let read = self
                .reader
                .read_line(&mut buf)
                .map_err(|e| SourceError::Io(e.to_string()))?;
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;
            if buf.trim().is_empty() {
                continue;
            }
            let block: BlockView =
                serde_json::from_str(buf.trim_end()).map_err(|e| SourceError::Parse {
                    line: self.line,
                    message: e.to_string(),
                })?;
            if let Some(previous) = self.last_height {
                if block.height <= previous {
                    return Err(SourceError::OutOfOrder {
                        previous,
                        got: block.height,
                    });
                }
            }
            self.last_height = Some(block.height);
            return Ok(Some(block));
        }
    }
}

impl<R: BufRead> TransactionSource for JsonlSource<R> {
    fn blocks(&mut self, from: u64, to: u64) -> Result<Vec<BlockView>, SourceError> {
        if from < self.cursor {
            return Err(SourceError::Rewind {
                from,
                to,
                cursor: self.cursor,
            });
        }
        let mut blocks = Vec::new();
        while let Some(block) = self.next_block()? {
            if block.height >= to {
                self.peeked = Some(block);
                break;
            }
            if block.height >= from {
                blocks.push(block);
            }
        }
        self.cursor = to;
        tracing::trace!(from, to, blocks = blocks.len(), "blocks read");
        Ok(blocks)
    }
}
