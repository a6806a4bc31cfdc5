//! Piece and block planning, and the shared download work queue.
//!
//! The logical byte stream is cut into fixed-size pieces (the last one may be
//! shorter), each carrying the expected SHA-1 hash from the metainfo. Pieces
//! are further cut into 16 KiB request blocks, the unit of the peer wire
//! `request`/`piece` messages.
//!
//! The planner is the only place download work changes hands: workers pop
//! pending pieces, put them back on failure, and mark them complete after
//! verification. Popping moves the `Piece` value out, so at most one worker
//! can ever hold a given piece.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::metainfo::Metainfo;

/// Request block size: 2^14 bytes, the de-facto maximum honored by peers.
pub const BLOCK_SIZE: u32 = 1 << 14;

/// One 16 KiB-or-smaller slice of a piece, the unit of a wire request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Index of the piece this block belongs to.
    pub piece_index: u32,
    /// Byte offset of the block inside its piece.
    pub begin: u32,
    /// Block length in bytes.
    pub length: u32,
}

/// One piece of the torrent: its place in the logical stream and the hash
/// its reassembled bytes must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub index: u32,
    /// Byte offset of the piece in the logical stream.
    pub offset: u64,
    /// Piece size in bytes; equals the piece length except possibly for the
    /// final piece.
    pub size: u32,
    /// Expected SHA-1 of the reassembled piece.
    pub hash: [u8; 20],
}

impl Piece {
    /// The piece's request blocks in `begin` order: uniform 16 KiB blocks
    /// with the final block absorbing the remainder.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        let index = self.index;
        let size = self.size;
        (0..self.num_blocks()).map(move |k| {
            let begin = k as u32 * BLOCK_SIZE;
            Block {
                piece_index: index,
                begin,
                length: (size - begin).min(BLOCK_SIZE),
            }
        })
    }

    pub fn num_blocks(&self) -> usize {
        self.size.div_ceil(BLOCK_SIZE) as usize
    }
}

/// Shared piece queue with completion tracking.
///
/// `remaining` counts pieces that are not yet acquired, whether pending in
/// the queue or in flight with a worker; the download is done when it
/// reaches zero.
#[derive(Debug)]
pub struct Planner {
    queue: Mutex<VecDeque<Piece>>,
    remaining: AtomicUsize,
    total: usize,
}

impl Planner {
    /// Builds the full piece plan from the metainfo, served in ascending
    /// index order.
    pub fn new(metainfo: &Metainfo) -> Self {
        let piece_length = metainfo.piece_length();
        let total_length = metainfo.total_length();

        let queue: VecDeque<Piece> = metainfo
            .piece_hashes()
            .iter()
            .enumerate()
            .map(|(i, hash)| {
                let offset = i as u64 * piece_length;
                Piece {
                    index: i as u32,
                    offset,
                    size: total_length.saturating_sub(offset).min(piece_length) as u32,
                    hash: *hash,
                }
            })
            .collect();

        let total = queue.len();
        Self {
            queue: Mutex::new(queue),
            remaining: AtomicUsize::new(total),
            total,
        }
    }

    /// Pops the next pending piece, or `None` when nothing is pending.
    /// A `None` does not mean the download is finished: pieces may still be
    /// in flight with other workers.
    pub fn next(&self) -> Option<Piece> {
        self.queue.lock().expect("planner lock poisoned").pop_front()
    }

    /// Returns an in-flight piece to the pending queue, at the tail so other
    /// pieces are not starved.
    pub fn put_back(&self, piece: Piece) {
        self.queue.lock().expect("planner lock poisoned").push_back(piece);
    }

    /// Records a verified, written piece. Consumes the piece: once complete
    /// it can never re-enter the queue.
    pub fn mark_complete(&self, piece: Piece) {
        drop(piece);
        self.remaining.fetch_sub(1, Ordering::SeqCst);
    }

    /// Pieces not yet acquired (pending plus in flight).
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn done(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::metainfo::Metainfo;

    fn metainfo(total_length: u64, piece_length: u64) -> Metainfo {
        let num_pieces = total_length.div_ceil(piece_length) as usize;
        let mut buf = Vec::new();
        buf.extend_from_slice(
            format!(
                "d4:infod6:lengthi{}e4:name4:data12:piece lengthi{}e6:pieces{}:",
                total_length,
                piece_length,
                num_pieces * 20
            )
            .as_bytes(),
        );
        buf.extend(std::iter::repeat(0u8).take(num_pieces * 20));
        buf.extend_from_slice(b"ee");
        Metainfo::from_bytes(&buf).unwrap()
    }

    #[test]
    fn test_piece_plan_with_short_final_piece() {
        // total=50000, piece_length=16384 -> sizes [16384, 16384, 16384, 848]
        let planner = Planner::new(&metainfo(50000, 16384));
        assert_eq!(planner.total(), 4);

        let sizes: Vec<u32> = std::iter::from_fn(|| planner.next())
            .map(|p| p.size)
            .collect();
        assert_eq!(sizes, vec![16384, 16384, 16384, 848]);
    }

    #[test]
    fn test_single_block_pieces() {
        let planner = Planner::new(&metainfo(50000, 16384));
        let piece0 = planner.next().unwrap();
        let blocks: Vec<Block> = piece0.blocks().collect();
        assert_eq!(
            blocks,
            vec![Block {
                piece_index: 0,
                begin: 0,
                length: 16384
            }]
        );

        planner.next().unwrap();
        planner.next().unwrap();
        let piece3 = planner.next().unwrap();
        let blocks: Vec<Block> = piece3.blocks().collect();
        assert_eq!(
            blocks,
            vec![Block {
                piece_index: 3,
                begin: 0,
                length: 848
            }]
        );
    }

    #[test]
    fn test_block_plan_for_irregular_piece_length() {
        // piece_length=40000 -> blocks [16384, 16384, 7232] in each full piece
        let planner = Planner::new(&metainfo(80000, 40000));
        let piece = planner.next().unwrap();
        let lengths: Vec<u32> = piece.blocks().map(|b| b.length).collect();
        assert_eq!(lengths, vec![16384, 16384, 7232]);
        assert_eq!(lengths.iter().sum::<u32>(), piece.size);
    }

    #[test]
    fn test_block_sizes_sum_to_piece_size() {
        let planner = Planner::new(&metainfo(123_456, 32768));
        let mut total = 0u64;
        while let Some(piece) = planner.next() {
            assert_eq!(piece.blocks().map(|b| b.length).sum::<u32>(), piece.size);
            total += piece.size as u64;
        }
        assert_eq!(total, 123_456);
    }

    #[test]
    fn test_pieces_served_in_ascending_order_with_offsets() {
        let planner = Planner::new(&metainfo(50000, 16384));
        let mut expected_offset = 0u64;
        for expected_index in 0..4u32 {
            let piece = planner.next().unwrap();
            assert_eq!(piece.index, expected_index);
            assert_eq!(piece.offset, expected_offset);
            expected_offset += piece.size as u64;
        }
        assert!(planner.next().is_none());
    }

    #[test]
    fn test_put_back_and_completion_tracking() {
        let planner = Planner::new(&metainfo(50000, 16384));
        assert_eq!(planner.remaining(), 4);

        let piece = planner.next().unwrap();
        // In flight: not pending, still remaining.
        assert_eq!(planner.remaining(), 4);

        planner.put_back(piece.clone());
        // Put-backs go to the tail.
        let indices: Vec<u32> = std::iter::from_fn(|| planner.next())
            .map(|p| p.index)
            .collect();
        assert_eq!(indices, vec![1, 2, 3, 0]);

        planner.mark_complete(piece);
        assert_eq!(planner.remaining(), 3);
        assert!(!planner.done());
    }

    #[test]
    fn test_exact_multiple_has_full_final_piece() {
        let planner = Planner::new(&metainfo(32768, 16384));
        let sizes: Vec<u32> = std::iter::from_fn(|| planner.next())
            .map(|p| p.size)
            .collect();
        assert_eq!(sizes, vec![16384, 16384]);
    }
}
