//! Byte and piece arithmetic for a torrent's concatenated data.

use std::ops::{Range, RangeInclusive};

use super::{PieceIndex, SwarmFile};

/// Piece geometry of a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TorrentLayout {
    pub piece_length: u64,
    pub total_length: u64,
    pub piece_count: u32,
}

impl TorrentLayout {
    /// Creates a layout; the last piece may be shorter than `piece_length`.
    pub fn new(piece_length: u64, total_length: u64) -> Self {
        let piece_length = piece_length.max(1);
        let piece_count = total_length.div_ceil(piece_length) as u32;
        Self {
            piece_length,
            total_length,
            piece_count,
        }
    }

    /// Byte range covered by a piece; empty for indices past the end.
    pub fn piece_span(&self, index: PieceIndex) -> Range<u64> {
        if index.0 >= self.piece_count {
            return self.total_length..self.total_length;
        }
        let start = u64::from(index.0) * self.piece_length;
        let end = (start + self.piece_length).min(self.total_length);
        start..end
    }

    pub fn piece_size(&self, index: PieceIndex) -> u64 {
        let span = self.piece_span(index);
        span.end - span.start
    }

    /// Pieces covering `len` bytes starting at torrent offset `start`.
    ///
    /// Returns an empty range when `len` is zero or `start` is past the end.
    pub fn pieces_for_range(&self, start: u64, len: u64) -> RangeInclusive<u32> {
        if len == 0 || start >= self.total_length {
            return RangeInclusive::new(1, 0);
        }
        let end = (start + len).min(self.total_length) - 1;
        let first = (start / self.piece_length) as u32;
        let last = (end / self.piece_length) as u32;
        first..=last
    }

    /// Pieces overlapping one file of the torrent.
    pub fn file_span(&self, file: &SwarmFile) -> FileSpan {
        let pieces = self.pieces_for_range(file.offset, file.length);
        if pieces.is_empty() {
            return FileSpan { first: 0, count: 0 };
        }
        FileSpan {
            first: *pieces.start(),
            count: pieces.end() - pieces.start() + 1,
        }
    }
}

/// Contiguous run of pieces backing one file.
///
/// Maps torrent-wide piece indices to file-relative ones so the file's first
/// piece is index 0 regardless of where the file sits in the torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    pub first: u32,
    pub count: u32,
}

impl FileSpan {
    /// File-relative index of a torrent piece, if the piece overlaps the file.
    pub fn to_relative(&self, index: PieceIndex) -> Option<u32> {
        index
            .0
            .checked_sub(self.first)
            .filter(|relative| *relative < self.count)
    }

    pub fn to_global(&self, relative: u32) -> PieceIndex {
        PieceIndex(self.first + relative)
    }
}

/// Part of a torrent byte range that falls inside one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSegment {
    pub file_index: usize,
    /// Offset within the file
    pub file_offset: u64,
    /// Offset within the requested range
    pub range_offset: u64,
    pub len: u64,
}

/// Splits the torrent byte range `start..start + len` across `files`.
///
/// Files are expected in torrent order with contiguous offsets.
pub fn file_segments(files: &[SwarmFile], start: u64, len: u64) -> Vec<FileSegment> {
    let end = start + len;
    files
        .iter()
        .enumerate()
        .filter_map(|(file_index, file)| {
            let file_end = file.offset + file.length;
            let seg_start = start.max(file.offset);
            let seg_end = end.min(file_end);
            (seg_start < seg_end).then(|| FileSegment {
                file_index,
                file_offset: seg_start - file.offset,
                range_offset: seg_start - start,
                len: seg_end - seg_start,
            })
        })
        .collect()
}
