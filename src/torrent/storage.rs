//! Output file management: pre-allocation and offset writes.
//!
//! The torrent's logical byte stream is the concatenation of its declared
//! files. A verified piece arrives as one contiguous buffer at a logical
//! offset; the writer splits it across whichever files the range covers and
//! writes each chunk at its per-file position. Positional writes
//! (`write_all_at`) mean no seek state is shared between writers, and the
//! mutex keeps piece commits from interleaving.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Error;

use super::metainfo::Metainfo;

struct OutputFile {
    file: File,
    /// Offset of this file's first byte in the logical stream.
    start: u64,
    length: u64,
}

/// Pre-allocated output files, writable at logical offsets.
pub struct Storage {
    files: Mutex<Vec<OutputFile>>,
}

impl Storage {
    /// Creates parent directories and pre-allocates every declared file to
    /// its full length under `root`.
    pub fn create(root: &Path, metainfo: &Metainfo) -> Result<Self, Error> {
        let mut files = Vec::with_capacity(metainfo.files().len());
        let mut start = 0u64;

        for entry in metainfo.files() {
            let path = root.join(&entry.path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path)?;
            file.set_len(entry.length)?;
            debug!(path = %path.display(), length = entry.length, "pre-allocated");

            files.push(OutputFile {
                file,
                start,
                length: entry.length,
            });
            start += entry.length;
        }

        Ok(Self {
            files: Mutex::new(files),
        })
    }

    /// Writes `data` at `logical_offset` in the concatenated stream,
    /// splitting across file boundaries as needed. One piece's write commits
    /// as a unit with respect to other callers.
    pub async fn write_piece(&self, logical_offset: u64, data: &[u8]) -> Result<(), Error> {
        let files = self.files.lock().await;

        let mut offset = logical_offset;
        let mut remaining = data;

        for output in files.iter() {
            if remaining.is_empty() {
                break;
            }
            let end = output.start + output.length;
            if offset >= end {
                continue;
            }

            let within = offset - output.start;
            let take = ((output.length - within) as usize).min(remaining.len());
            let (chunk, rest) = remaining.split_at(take);
            output.file.write_all_at(chunk, within)?;

            offset += take as u64;
            remaining = rest;
        }

        if !remaining.is_empty() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "write past the end of the declared files",
            )));
        }
        Ok(())
    }
}
