use std::sync::Arc;

use crate::model::buffer::{Piece, StringBuffer};
use crate::primitives::strings::{complete_utf8_len, into_string};

/// Forward-only reader over the document as it was when the snapshot was taken.
///
/// Holds the piece list and shared handles to the buffers; edits made to the
/// tree afterwards copy the change buffer instead of touching these.
#[derive(Debug, Clone)]
pub struct PieceTreeSnapshot {
    pieces: Vec<Piece>,
    buffers: Vec<Arc<StringBuffer>>,
    index: usize,
    bom: String,
    // bytes of a character whose sequence continues in the next piece
    pending: Vec<u8>,
}

impl PieceTreeSnapshot {
    pub(crate) fn new(pieces: Vec<Piece>, buffers: Vec<Arc<StringBuffer>>, bom: String) -> Self {
        PieceTreeSnapshot {
            pieces,
            buffers,
            index: 0,
            bom,
            pending: Vec::new(),
        }
    }

    fn piece_content(&self, piece: &Piece) -> &[u8] {
        let buffer = &self.buffers[piece.buffer_index];
        let start = buffer.offset_of(piece.start);
        let end = buffer.offset_of(piece.end);
        &buffer.data[start..end]
    }

    /// Next chunk of text, `None` once exhausted. The first chunk carries the
    /// BOM. A character split across pieces is returned whole with the later chunk.
    pub fn read(&mut self) -> Option<String> {
        if self.pieces.is_empty() {
            if self.index == 0 {
                self.index += 1;
                return Some(std::mem::take(&mut self.bom));
            }
            return None;
        }

        while self.index < self.pieces.len() {
            let mut chunk = std::mem::take(&mut self.pending);
            if self.index == 0 {
                chunk = std::mem::take(&mut self.bom).into_bytes();
            }
            chunk.extend_from_slice(self.piece_content(&self.pieces[self.index]));
            self.index += 1;

            if self.index < self.pieces.len() {
                let complete = complete_utf8_len(&chunk);
                self.pending = chunk.split_off(complete);
            }
            if !chunk.is_empty() {
                return Some(into_string(chunk));
            }
        }
        None
    }

    /// Drain the rest of the snapshot into one string
    pub fn read_to_string(&mut self) -> String {
        let mut text = String::new();
        while let Some(chunk) = self.read() {
            text.push_str(&chunk);
        }
        text
    }
}

impl Iterator for PieceTreeSnapshot {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(chunks: &[&str], bom: &str) -> PieceTreeSnapshot {
        let mut buffers = vec![Arc::new(StringBuffer::empty())];
        let mut pieces = Vec::new();
        for chunk in chunks {
            let buffer = StringBuffer::new(chunk.as_bytes().to_vec());
            pieces.push(buffer.whole_piece(buffers.len()));
            buffers.push(Arc::new(buffer));
        }
        PieceTreeSnapshot::new(pieces, buffers, bom.to_string())
    }

    #[test]
    fn test_empty_snapshot_yields_bom_once() {
        let mut snap = snapshot(&[], "\u{FEFF}");
        assert_eq!(snap.read().as_deref(), Some("\u{FEFF}"));
        assert_eq!(snap.read(), None);
        assert_eq!(snap.read(), None);
    }

    #[test]
    fn test_first_chunk_carries_bom() {
        let mut snap = snapshot(&["ab", "c\n"], "\u{FEFF}");
        assert_eq!(snap.read().as_deref(), Some("\u{FEFF}ab"));
        assert_eq!(snap.read().as_deref(), Some("c\n"));
        assert_eq!(snap.read(), None);
    }

    #[test]
    fn test_iterator_collects_all_chunks() {
        let snap = snapshot(&["one", "two", "three"], "");
        assert_eq!(snap.collect::<String>(), "onetwothree");
    }

    #[test]
    fn test_character_split_across_pieces() {
        let euro = "€".as_bytes();
        let mut buffers = vec![Arc::new(StringBuffer::empty())];
        let mut pieces = Vec::new();
        for chunk in [&[b'a', euro[0]][..], &euro[1..2], &[euro[2], b'b'][..]] {
            let buffer = StringBuffer::new(chunk.to_vec());
            pieces.push(buffer.whole_piece(buffers.len()));
            buffers.push(Arc::new(buffer));
        }
        let mut snap = PieceTreeSnapshot::new(pieces, buffers, String::new());

        assert_eq!(snap.read().as_deref(), Some("a"));
        assert_eq!(snap.read().as_deref(), Some("€b"));
        assert_eq!(snap.read(), None);
    }

    #[test]
    fn test_split_character_survives_edits() {
        use crate::model::piece_tree::PieceTreeBase;

        let mut tree = PieceTreeBase::new(vec![StringBuffer::new("a€b".as_bytes().to_vec())], "\n", false);
        tree.insert(2, "x", false);
        tree.delete(2, 1);
        let snap = tree.create_snapshot("");
        assert_eq!(snap.collect::<String>(), "a€b");
    }
}
