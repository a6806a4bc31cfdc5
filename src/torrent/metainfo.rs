//! BitTorrent metainfo file parser and typed view.
//!
//! A torrent file (also known as a metainfo file) is a bencoded dictionary
//! describing the content to download:
//!
//! - `announce`: URL of the tracker that coordinates peers
//! - `announce-list`: optional backup trackers (list of lists of URLs)
//! - `info`: the integrity-critical subtree:
//!   - `name`: suggested file name (single-file) or directory name (multi-file)
//!   - `piece length`: bytes per piece
//!   - `pieces`: concatenated 20-byte SHA-1 hashes, one per piece
//!   - `length` (single-file) or `files` (multi-file)
//!
//! The SHA-1 of the canonically re-encoded `info` subtree is the info hash,
//! the torrent's identity in every tracker and peer exchange. That is why
//! parsing goes through the byte-exact hand codec rather than a derived
//! struct: a typed struct would silently drop unknown `info` keys and
//! produce the wrong hash.

use std::fmt::Display;
use std::path::PathBuf;

use sha1::{Digest, Sha1};

use crate::bencode::{BValue, Bencode};
use crate::error::Error;

/// One output file declared by the torrent, with its position implied by the
/// declaration order: logical bytes are the concatenation of all files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Length of this file in bytes.
    pub length: u64,
    /// Path to materialize, relative to the output directory. For multi-file
    /// torrents this is rooted at the torrent name.
    pub path: PathBuf,
}

/// Immutable, validated view over a parsed metainfo file.
#[derive(Debug, Clone)]
pub struct Metainfo {
    announce: Vec<String>,
    info_hash: [u8; 20],
    name: String,
    piece_length: u64,
    total_length: u64,
    piece_hashes: Vec<[u8; 20]>,
    files: Vec<FileEntry>,
    creation_date: Option<i64>,
    created_by: Option<String>,
    comment: Option<String>,
}

impl Metainfo {
    /// Parses and validates a metainfo file from its raw bytes.
    ///
    /// # Errors
    ///
    /// Fails on malformed bencode, on a missing `info`, `name`,
    /// `piece length`, `pieces`, or `length`/`files` key, and on a `pieces`
    /// string whose length is not a multiple of 20.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let (root, _) = Bencode::decode(bytes)?;
        let info = root.get(b"info").ok_or(Error::MissingField("info"))?;

        let info_hash: [u8; 20] = {
            let mut hasher = Sha1::new();
            hasher.update(Bencode::encode(info));
            hasher.finalize().into()
        };

        let name = info
            .get(b"name")
            .and_then(BValue::as_str)
            .ok_or(Error::MissingField("name"))?
            .to_owned();

        let piece_length = info
            .get(b"piece length")
            .and_then(BValue::as_int)
            .filter(|&n| n > 0)
            .ok_or(Error::MissingField("piece length"))? as u64;

        let pieces = info
            .get(b"pieces")
            .and_then(BValue::as_bytes)
            .ok_or(Error::MissingField("pieces"))?;
        if pieces.len() % 20 != 0 {
            return Err(Error::InvalidField("pieces"));
        }
        let piece_hashes: Vec<[u8; 20]> = pieces
            .chunks_exact(20)
            .map(|chunk| chunk.try_into().expect("chunks are 20 bytes"))
            .collect();

        let files = Self::parse_files(info, &name)?;
        let total_length: u64 = files.iter().map(|f| f.length).sum();

        // The hash count must agree with the declared lengths, or pieces
        // past the end of the stream would be planned.
        if piece_hashes.len() != total_length.div_ceil(piece_length) as usize {
            return Err(Error::InvalidField("pieces"));
        }

        Ok(Self {
            announce: Self::parse_announce(&root),
            info_hash,
            name,
            piece_length,
            total_length,
            piece_hashes,
            files,
            creation_date: root.get(b"creation date").and_then(BValue::as_int),
            created_by: root
                .get(b"created by")
                .and_then(BValue::as_str)
                .map(str::to_owned),
            comment: root
                .get(b"comment")
                .and_then(BValue::as_str)
                .map(str::to_owned),
        })
    }

    /// Primary tracker first, then `announce-list` flattened in declared
    /// order, deduplicated preserving the first occurrence.
    fn parse_announce(root: &BValue) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        let mut push = |url: &str| {
            if !urls.iter().any(|u| u == url) {
                urls.push(url.to_owned());
            }
        };

        if let Some(primary) = root.get(b"announce").and_then(BValue::as_str) {
            push(primary);
        }
        for tier in root
            .get(b"announce-list")
            .and_then(BValue::as_list)
            .unwrap_or(&[])
        {
            for url in tier.as_list().unwrap_or(&[]) {
                if let Some(url) = url.as_str() {
                    push(url);
                }
            }
        }
        urls
    }

    /// Single-file mode yields one entry named after the torrent; multi-file
    /// mode yields each declared file rooted at the torrent name.
    fn parse_files(info: &BValue, name: &str) -> Result<Vec<FileEntry>, Error> {
        if let Some(length) = info.get(b"length").and_then(BValue::as_int) {
            return Ok(vec![FileEntry {
                length: length as u64,
                path: PathBuf::from(name),
            }]);
        }

        let files = info
            .get(b"files")
            .and_then(BValue::as_list)
            .ok_or(Error::MissingField("length or files"))?;

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let length = file
                .get(b"length")
                .and_then(BValue::as_int)
                .ok_or(Error::MissingField("files.length"))? as u64;
            let components = file
                .get(b"path")
                .and_then(BValue::as_list)
                .ok_or(Error::MissingField("files.path"))?;
            if components.is_empty() {
                return Err(Error::InvalidField("files.path"));
            }

            let mut path = PathBuf::from(name);
            for component in components {
                path.push(
                    component
                        .as_str()
                        .ok_or(Error::InvalidField("files.path"))?,
                );
            }
            entries.push(FileEntry { length, path });
        }
        Ok(entries)
    }

    /// Tracker URLs in announce order, deduplicated.
    pub fn announce_urls(&self) -> &[String] {
        &self.announce
    }

    /// SHA-1 of the canonical re-encoding of the `info` subtree.
    pub fn info_hash(&self) -> [u8; 20] {
        self.info_hash
    }

    /// Name of the file (single-file) or top-level directory (multi-file).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of bytes in each piece except possibly the last.
    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    /// Total length of all declared files.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Expected SHA-1 hashes, indexable by piece.
    pub fn piece_hashes(&self) -> &[[u8; 20]] {
        &self.piece_hashes
    }

    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Declared files in logical-stream order.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }
}

impl Display for Metainfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "name:         {}", self.name)?;
        writeln!(f, "info hash:    {}", hex::encode(self.info_hash))?;
        writeln!(f, "total length: {} bytes", self.total_length)?;
        writeln!(f, "piece length: {} bytes", self.piece_length)?;
        writeln!(f, "pieces:       {}", self.piece_hashes.len())?;
        for url in &self.announce {
            writeln!(f, "tracker:      {}", url)?;
        }
        if let Some(date) = self.creation_date {
            writeln!(f, "created:      {}", date)?;
        }
        if let Some(by) = &self.created_by {
            writeln!(f, "created by:   {}", by)?;
        }
        if let Some(comment) = &self.comment {
            writeln!(f, "comment:      {}", comment)?;
        }
        for file in &self.files {
            writeln!(f, "file:         {} ({} bytes)", file.path.display(), file.length)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal single-file metainfo with two pieces.
    fn single_file_fixture() -> Vec<u8> {
        let pieces: Vec<u8> = (0..40).collect();
        let mut buf = Vec::new();
        buf.extend_from_slice(b"d8:announce26:http://tracker.example/ann13:announce-listll26:http://tracker.example/annel25:http://backup.example/annee4:infod6:lengthi40960e4:name8:demo.bin12:piece lengthi32768e6:pieces40:");
        buf.extend_from_slice(&pieces);
        buf.extend_from_slice(b"ee");
        buf
    }

    #[test]
    fn test_parses_single_file() {
        let meta = Metainfo::from_bytes(&single_file_fixture()).unwrap();
        assert_eq!(meta.name(), "demo.bin");
        assert_eq!(meta.piece_length(), 32768);
        assert_eq!(meta.total_length(), 40960);
        assert_eq!(meta.num_pieces(), 2);
        assert_eq!(meta.piece_hashes()[1][0], 20);
        assert_eq!(
            meta.files(),
            &[FileEntry {
                length: 40960,
                path: PathBuf::from("demo.bin"),
            }]
        );
    }

    #[test]
    fn test_announce_urls_deduplicated_in_order() {
        let meta = Metainfo::from_bytes(&single_file_fixture()).unwrap();
        assert_eq!(
            meta.announce_urls(),
            &[
                "http://tracker.example/ann".to_owned(),
                "http://backup.example/ann".to_owned(),
            ]
        );
    }

    #[test]
    fn test_info_hash_matches_manual_encoding() {
        let bytes = single_file_fixture();
        let meta = Metainfo::from_bytes(&bytes).unwrap();

        // The info subtree starts right after the "4:info" key.
        let start = bytes
            .windows(6)
            .position(|w| w == b"4:info")
            .unwrap()
            + 6;
        let info_bytes = &bytes[start..bytes.len() - 1];
        let mut hasher = Sha1::new();
        hasher.update(info_bytes);
        let expected: [u8; 20] = hasher.finalize().into();

        assert_eq!(meta.info_hash(), expected);
    }

    #[test]
    fn test_info_hash_sensitive_to_info_bytes() {
        let bytes = single_file_fixture();
        let baseline = Metainfo::from_bytes(&bytes).unwrap().info_hash();

        // Change one byte of the pieces string inside the info subtree.
        let mut mutated = bytes.clone();
        let idx = mutated
            .windows(9)
            .position(|w| w == b"6:pieces4")
            .unwrap()
            + 12;
        mutated[idx] ^= 0xff;
        let changed = Metainfo::from_bytes(&mutated).unwrap().info_hash();

        assert_ne!(baseline, changed);
    }

    #[test]
    fn test_multi_file_paths_rooted_at_name() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"d8:announce18:http://t.example/a4:infod5:filesld6:lengthi100e4:pathl1:a5:b.txteed6:lengthi50e4:pathl5:c.bineee4:name4:demo12:piece lengthi16384e6:pieces20:");
        buf.extend_from_slice(&[0u8; 20]);
        buf.extend_from_slice(b"ee");

        let meta = Metainfo::from_bytes(&buf).unwrap();
        assert_eq!(meta.total_length(), 150);
        assert_eq!(
            meta.files(),
            &[
                FileEntry {
                    length: 100,
                    path: PathBuf::from("demo/a/b.txt"),
                },
                FileEntry {
                    length: 50,
                    path: PathBuf::from("demo/c.bin"),
                },
            ]
        );
    }

    #[test]
    fn test_missing_fields_are_fatal() {
        assert!(matches!(
            Metainfo::from_bytes(b"de"),
            Err(Error::MissingField("info"))
        ));
        assert!(matches!(
            Metainfo::from_bytes(b"d4:infodee"),
            Err(Error::MissingField("name"))
        ));
        // name and piece length present, pieces missing
        assert!(matches!(
            Metainfo::from_bytes(b"d4:infod4:name1:x12:piece lengthi16384eee"),
            Err(Error::MissingField("pieces"))
        ));
    }

    #[test]
    fn test_piece_count_must_match_declared_lengths() {
        // 40 bytes of hashes claim two pieces, but length/piece length only
        // accounts for one.
        let mut buf = Vec::new();
        buf.extend_from_slice(b"d4:infod6:lengthi10e4:name1:x12:piece lengthi16384e6:pieces40:");
        buf.extend_from_slice(&[0u8; 40]);
        buf.extend_from_slice(b"ee");
        assert!(matches!(
            Metainfo::from_bytes(&buf),
            Err(Error::InvalidField("pieces"))
        ));
    }

    #[test]
    fn test_ragged_pieces_length_is_fatal() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"d4:infod6:lengthi10e4:name1:x12:piece lengthi16384e6:pieces19:");
        buf.extend_from_slice(&[0u8; 19]);
        buf.extend_from_slice(b"ee");
        assert!(matches!(
            Metainfo::from_bytes(&buf),
            Err(Error::InvalidField("pieces"))
        ));
    }
}
