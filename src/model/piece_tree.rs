//! The piece tree: a buffer pool indexed by an augmented red-black tree.
//!
//! Buffer 0 is the append-only change buffer; every other buffer is written
//! once (initial chunks, or inserted text too large for the change buffer).
//! The tree holds one [`Piece`] per node in document order.
//!
//! All offsets and columns are UTF-8 byte counts. Lines and columns are
//! 1-based, offsets 0-based.

mod search;

pub use search::{CancellationToken, LineFeedCounter, NeverCancel};

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::BufferConfig;
use crate::model::buffer::{create_line_starts_fast, safe_split_point, BufferCursor, Piece, StringBuffer};
use crate::model::rb_tree::{NodeId, RbTree, SENTINEL};
use crate::model::search_cache::{CacheEntry, PieceTreeSearchCache};
use crate::model::snapshot::PieceTreeSnapshot;
use crate::primitives::range::{Position, Range};
use crate::primitives::strings::{into_string, replace_line_terminators};

/// Largest text appended to the change buffer in one go, and the size
/// large inserted texts are cut into.
pub const AVERAGE_BUFFER_SIZE: usize = 65535;

/// A resolved document location: the node, how far into its piece, and where the node starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePosition {
    pub node: NodeId,
    pub remainder: usize,
    pub node_start_offset: usize,
}

#[derive(Debug, Clone, Default)]
struct VisitedLine {
    line_number: usize,
    value: String,
}

fn starts_with_lf(text: &[u8]) -> bool {
    text.first() == Some(&b'\n')
}

fn ends_with_cr(text: &[u8]) -> bool {
    text.last() == Some(&b'\r')
}

fn strip_trailing_eol(text: &[u8]) -> &[u8] {
    if text.ends_with(b"\r\n") {
        &text[..text.len() - 2]
    } else if text.ends_with(b"\n") || text.ends_with(b"\r") {
        &text[..text.len() - 1]
    } else {
        text
    }
}

#[derive(Debug)]
pub struct PieceTreeBase {
    tree: RbTree,
    buffers: Vec<Arc<StringBuffer>>,
    line_cnt: usize,
    length: usize,
    eol: String,
    eol_normalized: bool,
    last_change_buffer_pos: BufferCursor,
    last_visited_line: Mutex<VisitedLine>,
    search_cache: PieceTreeSearchCache,
    average_buffer_size: usize,
}

impl PieceTreeBase {
    /// Build a tree over `chunks`, each becoming one immutable buffer
    pub fn new(chunks: Vec<StringBuffer>, eol: &str, eol_normalized: bool) -> Self {
        Self::with_config(chunks, eol, eol_normalized, &BufferConfig::default())
    }

    pub fn with_config(
        chunks: Vec<StringBuffer>,
        eol: &str,
        eol_normalized: bool,
        config: &BufferConfig,
    ) -> Self {
        let mut tree = PieceTreeBase {
            tree: RbTree::new(),
            buffers: Vec::new(),
            line_cnt: 1,
            length: 0,
            eol: eol.to_string(),
            eol_normalized,
            last_change_buffer_pos: BufferCursor::default(),
            last_visited_line: Mutex::new(VisitedLine::default()),
            search_cache: PieceTreeSearchCache::new(config.search_cache_limit),
            average_buffer_size: config.chunk_size.max(2),
        };
        tree.create(chunks, eol, eol_normalized);
        tracing::debug!(
            buffers = tree.buffers.len(),
            length = tree.length,
            lines = tree.line_cnt,
            "created piece tree"
        );
        tree
    }

    fn create(&mut self, chunks: Vec<StringBuffer>, eol: &str, eol_normalized: bool) {
        self.tree = RbTree::new();
        self.buffers = vec![Arc::new(StringBuffer::empty())];
        self.line_cnt = 1;
        self.length = 0;
        self.eol = eol.to_string();
        self.eol_normalized = eol_normalized;
        self.last_change_buffer_pos = BufferCursor::default();

        let mut last_node = SENTINEL;
        for mut chunk in chunks {
            if chunk.is_empty() {
                continue;
            }
            if chunk.line_starts.is_empty() {
                chunk.line_starts = create_line_starts_fast(&chunk.data);
            }
            let piece = chunk.whole_piece(self.buffers.len());
            self.buffers.push(Arc::new(chunk));
            last_node = self.tree.insert_right(last_node, piece);
        }

        self.search_cache.clear();
        self.reset_last_visited_line();
        self.compute_buffer_metadata();
    }

    fn normalize_eol(&mut self, eol: &str) {
        let min = self.average_buffer_size - self.average_buffer_size / 3;
        let max = min * 2;

        let mut temp_chunk: Vec<u8> = Vec::new();
        let mut chunks = Vec::new();

        for id in self.tree.iter() {
            let content = self.node_content(id);
            if temp_chunk.len() <= min || temp_chunk.len() + content.len() < max {
                temp_chunk.extend_from_slice(content);
                continue;
            }

            // flush anyways
            let text = replace_line_terminators(&temp_chunk, eol.as_bytes());
            chunks.push(StringBuffer::new(text));
            temp_chunk.clear();
            temp_chunk.extend_from_slice(content);
        }

        if !temp_chunk.is_empty() {
            let text = replace_line_terminators(&temp_chunk, eol.as_bytes());
            chunks.push(StringBuffer::new(text));
        }

        tracing::debug!(chunks = chunks.len(), eol = ?eol, "normalized line endings");
        self.create(chunks, eol, true);
    }

    pub fn get_eol(&self) -> &str {
        &self.eol
    }

    /// Switch the document line ending, rewriting every terminator
    pub fn set_eol(&mut self, eol: &str) {
        self.eol = eol.to_string();
        self.normalize_eol(eol);
    }

    pub fn is_eol_normalized(&self) -> bool {
        self.eol_normalized
    }

    /// Take a point-in-time reader over the current pieces
    pub fn create_snapshot(&self, bom: &str) -> PieceTreeSnapshot {
        let pieces = self
            .tree
            .iter()
            .map(|id| *self.tree.piece(id))
            .collect();
        PieceTreeSnapshot::new(pieces, self.buffers.clone(), bom.to_string())
    }

    /// Content equality, independent of how either tree is split into pieces
    pub fn equal(&self, other: &PieceTreeBase) -> bool {
        if self.length != other.length || self.line_cnt != other.line_cnt {
            return false;
        }

        let mut offset = 0;
        for id in self.tree.iter() {
            let content = self.node_content(id);
            let len = content.len();
            let (Some(start), Some(end)) = (other.node_at(offset), other.node_at(offset + len))
            else {
                return false;
            };
            let value = other.value_in_range_bytes(start, end);
            offset += len;
            if content != value.as_slice() {
                return false;
            }
        }
        true
    }

    /// Offset of a 1-based (line, column); out-of-range input is clamped
    pub fn get_offset_at(&self, line_number: usize, column: usize) -> usize {
        let mut line = line_number.max(1);
        let column = column.max(1);
        let mut left_len = 0;
        let mut x = self.tree.root;

        while x != SENTINEL {
            let node = self.tree.node(x);
            if node.left != SENTINEL && node.lf_left + 1 >= line {
                x = node.left;
            } else if node.lf_left + node.piece.line_feed_cnt + 1 >= line {
                left_len += node.size_left;
                // line >= 2
                let accumulated =
                    self.get_accumulated_value(x, line as isize - node.lf_left as isize - 2);
                left_len += accumulated + column - 1;
                return left_len.min(self.length);
            } else {
                line -= node.lf_left + node.piece.line_feed_cnt;
                left_len += node.size_left + node.piece.length;
                x = node.right;
            }
        }

        left_len
    }

    /// 1-based position of an offset; offsets past the end are clamped
    pub fn get_position_at(&self, offset: usize) -> Position {
        let mut offset = offset.min(self.length);
        let original_offset = offset;
        let mut x = self.tree.root;
        let mut lf_cnt = 0;

        while x != SENTINEL {
            let node = self.tree.node(x);
            if node.size_left != 0 && node.size_left >= offset {
                x = node.left;
            } else if node.size_left + node.piece.length >= offset {
                let (index, remainder) = self.get_index_of(x, offset - node.size_left);

                lf_cnt += node.lf_left + index;

                if index == 0 {
                    let line_start_offset = self.get_offset_at(lf_cnt + 1, 1);
                    let column = original_offset.saturating_sub(line_start_offset);
                    return Position::new(lf_cnt + 1, column + 1);
                }

                return Position::new(lf_cnt + 1, remainder + 1);
            } else {
                offset -= node.size_left + node.piece.length;
                lf_cnt += node.lf_left + node.piece.line_feed_cnt;

                if node.right == SENTINEL {
                    // last node
                    let line_start_offset = self.get_offset_at(lf_cnt + 1, 1);
                    let column = (original_offset - offset).saturating_sub(line_start_offset);
                    return Position::new(lf_cnt + 1, column + 1);
                }
                x = node.right;
            }
        }

        Position::new(1, 1)
    }

    /// Text inside `range`, with line terminators as stored
    pub fn get_value_in_range(&self, range: &Range) -> String {
        into_string(self.range_bytes(range))
    }

    /// Text inside `range` with every line terminator rewritten to `eol`
    pub fn get_value_in_range_with_eol(&self, range: &Range, eol: &str) -> String {
        let value = self.range_bytes(range);
        if eol != self.eol || !self.eol_normalized {
            return into_string(replace_line_terminators(&value, eol.as_bytes()));
        }
        into_string(value)
    }

    fn range_bytes(&self, range: &Range) -> Vec<u8> {
        if range.is_empty() {
            return Vec::new();
        }

        let start = self
            .node_at2(range.start_line, range.start_column)
            .or_else(|| self.node_at(self.length));
        let end = self
            .node_at2(range.end_line, range.end_column)
            .or_else(|| self.node_at(self.length));
        match (start, end) {
            (Some(start), Some(end)) => self.value_in_range_bytes(start, end),
            _ => Vec::new(),
        }
    }

    fn value_in_range_bytes(&self, start: NodePosition, end: NodePosition) -> Vec<u8> {
        if start.node == end.node {
            let piece = self.tree.piece(start.node);
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = buffer.offset_of(piece.start);
            if end.remainder <= start.remainder {
                return Vec::new();
            }
            return buffer.data[start_offset + start.remainder..start_offset + end.remainder]
                .to_vec();
        }

        let mut x = start.node;
        let piece = self.tree.piece(x);
        let buffer = &self.buffers[piece.buffer_index];
        let start_offset = buffer.offset_of(piece.start);
        let mut ret =
            buffer.data[start_offset + start.remainder..start_offset + piece.length].to_vec();

        x = self.tree.next(x);
        while x != SENTINEL {
            let piece = self.tree.piece(x);
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = buffer.offset_of(piece.start);

            if x == end.node {
                ret.extend_from_slice(&buffer.data[start_offset..start_offset + end.remainder]);
                break;
            }
            ret.extend_from_slice(&buffer.data[start_offset..start_offset + piece.length]);

            x = self.tree.next(x);
        }

        ret
    }

    /// Every line of the document, without terminators
    pub fn get_lines_content(&self) -> Vec<String> {
        let mut lines: Vec<Vec<u8>> = Vec::new();
        let mut current_line: Vec<u8> = Vec::new();
        let mut dangling_cr = false;
        let eol_len = self.eol.len();

        for id in self.tree.iter() {
            let piece = *self.tree.piece(id);
            let mut piece_length = piece.length;
            if piece_length == 0 {
                continue;
            }

            let buffer = &self.buffers[piece.buffer_index];
            let data = &buffer.data;
            let line_starts = &buffer.line_starts;

            let mut piece_start_line = piece.start.line;
            let piece_end_line = piece.end.line;
            let mut piece_start_offset = line_starts[piece_start_line] + piece.start.column;

            if dangling_cr {
                if data[piece_start_offset] == b'\n' {
                    // pretend the \n was in the previous piece
                    piece_start_offset += 1;
                    piece_length -= 1;
                    piece_start_line += 1;
                }
                lines.push(std::mem::take(&mut current_line));
                dangling_cr = false;
                if piece_length == 0 {
                    continue;
                }
            }

            if piece_start_line == piece_end_line {
                // this piece has no new lines
                let piece_end = piece_start_offset + piece_length;
                if !self.eol_normalized && data[piece_end - 1] == b'\r' {
                    dangling_cr = true;
                    current_line.extend_from_slice(&data[piece_start_offset..piece_end - 1]);
                } else {
                    current_line.extend_from_slice(&data[piece_start_offset..piece_end]);
                }
                continue;
            }

            // the text before the first line start in this piece
            let next_line_start = line_starts[piece_start_line + 1];
            if self.eol_normalized {
                let end = next_line_start
                    .saturating_sub(eol_len)
                    .max(piece_start_offset);
                current_line.extend_from_slice(&data[piece_start_offset..end]);
            } else {
                current_line.extend_from_slice(strip_trailing_eol(
                    &data[piece_start_offset..next_line_start],
                ));
            }
            lines.push(std::mem::take(&mut current_line));

            for line in piece_start_line + 1..piece_end_line {
                let segment = &data[line_starts[line]..line_starts[line + 1]];
                let content = if self.eol_normalized {
                    &segment[..segment.len().saturating_sub(eol_len)]
                } else {
                    strip_trailing_eol(segment)
                };
                lines.push(content.to_vec());
            }

            let last_line_start = line_starts[piece_end_line];
            if !self.eol_normalized && data[last_line_start + piece.end.column - 1] == b'\r' {
                dangling_cr = true;
                if piece.end.column == 0 {
                    // the last line ended with a \r: undo its push, the next piece decides
                    current_line = lines.pop().unwrap_or_default();
                } else {
                    current_line =
                        data[last_line_start..last_line_start + piece.end.column - 1].to_vec();
                }
            } else {
                current_line =
                    data[last_line_start..last_line_start + piece.end.column].to_vec();
            }
        }

        if dangling_cr {
            lines.push(std::mem::take(&mut current_line));
        }
        lines.push(current_line);

        lines.into_iter().map(into_string).collect()
    }

    pub fn get_length(&self) -> usize {
        self.length
    }

    pub fn get_line_count(&self) -> usize {
        self.line_cnt
    }

    fn visited_line(&self) -> MutexGuard<'_, VisitedLine> {
        self.last_visited_line
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn reset_last_visited_line(&self) {
        let mut visited = self.visited_line();
        visited.line_number = 0;
        visited.value.clear();
    }

    /// Content of a line without its terminator. The line is clamped into
    /// `[1, line_count]`.
    pub fn get_line_content(&self, line_number: usize) -> String {
        let line_number = line_number.clamp(1, self.line_cnt);
        {
            let visited = self.visited_line();
            if visited.line_number == line_number {
                return visited.value.clone();
            }
        }

        let value = if line_number == self.line_cnt {
            self.get_line_raw_content(line_number, 0)
        } else if self.eol_normalized {
            self.get_line_raw_content(line_number, self.eol.len())
        } else {
            let raw = self.line_raw_bytes(line_number, 0);
            into_string(strip_trailing_eol(&raw).to_vec())
        };

        let mut visited = self.visited_line();
        visited.line_number = line_number;
        visited.value = value.clone();
        value
    }

    pub fn get_line_content_with_eol(&self, line_number: usize) -> String {
        let mut content = self.get_line_content(line_number);
        content.push_str(&self.eol);
        content
    }

    fn char_code_at(&self, pos: NodePosition) -> u8 {
        let piece = self.tree.piece(pos.node);
        if pos.remainder == piece.length {
            // the byte we want is at the head of the next node
            let next = self.tree.next(pos.node);
            if next == SENTINEL {
                return 0;
            }
            let piece = self.tree.piece(next);
            let buffer = &self.buffers[piece.buffer_index];
            return buffer.data[buffer.offset_of(piece.start)];
        }

        let buffer = &self.buffers[piece.buffer_index];
        buffer.data[buffer.offset_of(piece.start) + pos.remainder]
    }

    /// Byte at 0-based `index` of a line, 0 when there is none
    pub fn get_line_char_code(&self, line_number: usize, index: usize) -> u8 {
        match self.node_at2(line_number.max(1), index + 1) {
            Some(pos) => self.char_code_at(pos),
            None => 0,
        }
    }

    /// Byte at `offset`, 0 at or past the end of the document
    pub fn get_char_code(&self, offset: usize) -> u8 {
        match self.node_at(offset) {
            Some(pos) => self.char_code_at(pos),
            None => 0,
        }
    }

    /// Byte length of a line, without its terminator
    pub fn get_line_length(&self, line_number: usize) -> usize {
        let line_number = line_number.clamp(1, self.line_cnt);
        if line_number == self.line_cnt {
            let start_offset = self.get_offset_at(line_number, 1);
            return self.length - start_offset;
        }
        (self.get_offset_at(line_number + 1, 1) - self.get_offset_at(line_number, 1))
            .saturating_sub(self.eol.len())
    }

    /// The rest of the piece that contains `offset`, or the whole next
    /// piece when `offset` sits exactly at a piece end.
    pub fn get_nearest_chunk(&self, offset: usize) -> String {
        let Some(pos) = self.node_at(offset) else {
            return String::new();
        };
        let piece = self.tree.piece(pos.node);
        if pos.remainder == piece.length {
            // the offset is at the head of next node
            let next = self.tree.next(pos.node);
            if next == SENTINEL {
                return String::new();
            }
            return into_string(self.node_content(next).to_vec());
        }

        let buffer = &self.buffers[piece.buffer_index];
        let start_offset = buffer.offset_of(piece.start);
        into_string(
            buffer.data[start_offset + pos.remainder..start_offset + piece.length].to_vec(),
        )
    }

    /// Insert `text` at `offset` (clamped to the document length).
    ///
    /// `eol_normalized` states that `text` already uses the document line
    /// ending; passing `false` once disables the normalized fast paths for good.
    pub fn insert(&mut self, offset: usize, text: &str, eol_normalized: bool) {
        self.eol_normalized = self.eol_normalized && eol_normalized;
        self.reset_last_visited_line();
        if text.is_empty() {
            return;
        }
        let offset = offset.min(self.length);
        let mut value = text.to_string();

        if self.tree.root != SENTINEL {
            let Some(NodePosition {
                node,
                remainder,
                node_start_offset,
            }) = self.node_at(offset)
            else {
                return;
            };
            let piece = *self.tree.piece(node);
            let buffer_index = piece.buffer_index;
            let insert_pos_in_buffer = self.position_in_buffer(node, remainder);

            if piece.buffer_index == 0
                && piece.end == self.last_change_buffer_pos
                && node_start_offset + piece.length == offset
                && value.len() < self.average_buffer_size
            {
                // typing at the end of the change buffer
                self.append_to_node(node, &value);
                self.search_cache.validate(&self.tree, offset);
                self.compute_buffer_metadata();
                return;
            }

            if node_start_offset == offset {
                self.insert_content_to_node_left(value, node);
            } else if node_start_offset + piece.length > offset {
                // inserting into the middle of a node
                let mut nodes_to_del = Vec::new();
                let mut new_right_piece = Piece::new(
                    buffer_index,
                    insert_pos_in_buffer,
                    piece.end,
                    self.get_line_feed_cnt(buffer_index, insert_pos_in_buffer, piece.end),
                    self.offset_in_buffer(buffer_index, piece.end)
                        - self.offset_in_buffer(buffer_index, insert_pos_in_buffer),
                );

                if self.should_check_crlf() && ends_with_cr(value.as_bytes()) {
                    let head_of_right = self.node_char_code_at(node, remainder);
                    if head_of_right == Some(b'\n') {
                        let new_start = BufferCursor::new(new_right_piece.start.line + 1, 0);
                        new_right_piece = Piece::new(
                            new_right_piece.buffer_index,
                            new_start,
                            new_right_piece.end,
                            self.get_line_feed_cnt(
                                new_right_piece.buffer_index,
                                new_start,
                                new_right_piece.end,
                            ),
                            new_right_piece.length - 1,
                        );
                        value.push('\n');
                    }
                }

                // reuse node for content before insertion point
                if self.should_check_crlf() && starts_with_lf(value.as_bytes()) {
                    let tail_of_left = self.node_char_code_at(node, remainder - 1);
                    if tail_of_left == Some(b'\r') {
                        let previous_pos = self.position_in_buffer(node, remainder - 1);
                        self.delete_node_tail(node, previous_pos);
                        value.insert(0, '\r');

                        if self.tree.piece(node).length == 0 {
                            nodes_to_del.push(node);
                        }
                    } else {
                        self.delete_node_tail(node, insert_pos_in_buffer);
                    }
                } else {
                    self.delete_node_tail(node, insert_pos_in_buffer);
                }

                let new_pieces = self.create_new_pieces(&value);
                if new_right_piece.length > 0 {
                    self.tree.insert_right(node, new_right_piece);
                }

                let mut tmp_node = node;
                for piece in new_pieces {
                    tmp_node = self.tree.insert_right(tmp_node, piece);
                }
                self.delete_nodes(&nodes_to_del);
            } else {
                self.insert_content_to_node_right(value, node);
            }
            self.search_cache.validate(&self.tree, offset);
        } else {
            // empty tree: the new pieces become the whole document
            let pieces = self.create_new_pieces(&value);
            let mut node = SENTINEL;
            for (k, piece) in pieces.into_iter().enumerate() {
                node = if k == 0 {
                    self.tree.insert_left(SENTINEL, piece)
                } else {
                    self.tree.insert_right(node, piece)
                };
            }
        }

        self.compute_buffer_metadata();
    }

    /// Delete `cnt` bytes starting at `offset`. A zero count or an empty tree is a no-op.
    pub fn delete(&mut self, offset: usize, cnt: usize) {
        self.reset_last_visited_line();

        if cnt == 0 || self.tree.root == SENTINEL || offset >= self.length {
            return;
        }
        let cnt = cnt.min(self.length - offset);

        let (Some(start_position), Some(end_position)) =
            (self.node_at(offset), self.node_at(offset + cnt))
        else {
            return;
        };
        let start_node = start_position.node;
        let end_node = end_position.node;

        if start_node == end_node {
            let start_split_pos = self.position_in_buffer(start_node, start_position.remainder);
            let end_split_pos = self.position_in_buffer(start_node, end_position.remainder);
            let node_length = self.tree.piece(start_node).length;

            if start_position.node_start_offset == offset {
                if cnt == node_length {
                    // delete node
                    let next = self.tree.next(start_node);
                    self.rb_delete(start_node);
                    self.validate_crlf_with_prev_node(next);
                } else {
                    self.delete_node_head(start_node, end_split_pos);
                    self.search_cache.validate(&self.tree, offset);
                    self.validate_crlf_with_prev_node(start_node);
                }
            } else if start_position.node_start_offset + node_length == offset + cnt {
                self.delete_node_tail(start_node, start_split_pos);
                self.validate_crlf_with_next_node(start_node);
            } else {
                // delete content in the middle, this node will be split in two
                self.shrink_node(start_node, start_split_pos, end_split_pos);
            }
            self.search_cache.validate(&self.tree, offset);
            self.compute_buffer_metadata();
            return;
        }

        let mut nodes_to_del = Vec::new();

        let start_split_pos = self.position_in_buffer(start_node, start_position.remainder);
        self.delete_node_tail(start_node, start_split_pos);
        self.search_cache.validate(&self.tree, offset);
        if self.tree.piece(start_node).length == 0 {
            nodes_to_del.push(start_node);
        }

        // update last touched node
        let end_split_pos = self.position_in_buffer(end_node, end_position.remainder);
        self.delete_node_head(end_node, end_split_pos);
        if self.tree.piece(end_node).length == 0 {
            nodes_to_del.push(end_node);
        }

        // delete nodes in between
        let mut node = self.tree.next(start_node);
        while node != SENTINEL && node != end_node {
            nodes_to_del.push(node);
            node = self.tree.next(node);
        }

        let prev = if self.tree.piece(start_node).length == 0 {
            self.tree.prev(start_node)
        } else {
            start_node
        };
        self.delete_nodes(&nodes_to_del);
        self.validate_crlf_with_next_node(prev);
        self.search_cache.validate(&self.tree, offset);
        self.compute_buffer_metadata();
    }

    fn insert_content_to_node_left(&mut self, mut value: String, node: NodeId) {
        // we are inserting content to the beginning of node
        let mut nodes_to_del = Vec::new();
        if self.should_check_crlf()
            && ends_with_cr(value.as_bytes())
            && self.start_with_lf_node(node)
        {
            // move `\n` to new node
            let piece = *self.tree.piece(node);
            let new_start = BufferCursor::new(piece.start.line + 1, 0);
            let n_piece = Piece::new(
                piece.buffer_index,
                new_start,
                piece.end,
                self.get_line_feed_cnt(piece.buffer_index, new_start, piece.end),
                piece.length - 1,
            );

            self.tree.set_piece(node, n_piece);
            value.push('\n');
            self.tree.update_tree_metadata(node, -1, -1);

            if n_piece.length == 0 {
                nodes_to_del.push(node);
            }
        }

        let new_pieces = self.create_new_pieces(&value);
        let mut new_node = node;
        for piece in new_pieces.into_iter().rev() {
            new_node = self.tree.insert_left(new_node, piece);
        }
        self.validate_crlf_with_prev_node(new_node);
        self.delete_nodes(&nodes_to_del);
    }

    fn insert_content_to_node_right(&mut self, mut value: String, node: NodeId) {
        // we are inserting to the right of this node
        if self.adjust_carriage_return_from_next(value.as_bytes(), node) {
            // move \n to the new node
            value.push('\n');
        }

        let new_pieces = self.create_new_pieces(&value);
        let mut new_node = SENTINEL;
        let mut tmp_node = node;
        for piece in new_pieces {
            tmp_node = self.tree.insert_right(tmp_node, piece);
            if new_node == SENTINEL {
                new_node = tmp_node;
            }
        }

        self.validate_crlf_with_prev_node(new_node);
    }

    /// Buffer cursor of the byte `remainder` bytes into `node`'s piece
    fn position_in_buffer(&self, node: NodeId, remainder: usize) -> BufferCursor {
        let piece = self.tree.piece(node);
        let line_starts = &self.buffers[piece.buffer_index].line_starts;

        let start_offset = line_starts[piece.start.line] + piece.start.column;
        let offset = start_offset + remainder;

        // binary search offset between start and end line
        let mut low = piece.start.line;
        let mut high = piece.end.line;

        let mut mid = 0;
        let mut mid_start = 0;

        while low <= high {
            mid = (low + high) / 2;
            mid_start = line_starts[mid];

            if mid == high {
                break;
            }

            let mid_stop = line_starts[mid + 1];

            if offset < mid_start {
                high = mid - 1;
            } else if offset >= mid_stop {
                low = mid + 1;
            } else {
                break;
            }
        }

        BufferCursor::new(mid, offset - mid_start)
    }

    /// Line breaks between two cursors of one buffer
    fn get_line_feed_cnt(&self, buffer_index: usize, start: BufferCursor, end: BufferCursor) -> usize {
        // Where `start` sits does not matter: abc\r|\n, abc|\r, abc|\n and
        // abc|\r\n all have one line break after it. For `end` in abc\r|\n the
        // \r has to be counted as well.
        if end.column == 0 {
            return end.line - start.line;
        }

        let buffer = &self.buffers[buffer_index];
        let line_starts = &buffer.line_starts;
        if end.line == line_starts.len() - 1 {
            // no line break after end, otherwise there would be one more line start
            return end.line - start.line;
        }

        let next_line_start_offset = line_starts[end.line + 1];
        let end_offset = line_starts[end.line] + end.column;
        if next_line_start_offset > end_offset + 1 {
            // more than one byte after end, so it cannot be \n
            return end.line - start.line;
        }
        // the byte at end_offset is \n; end.column > 0 so the byte before it exists
        if buffer.data[end_offset - 1] == b'\r' {
            end.line - start.line + 1
        } else {
            end.line - start.line
        }
    }

    #[inline]
    fn offset_in_buffer(&self, buffer_index: usize, cursor: BufferCursor) -> usize {
        self.buffers[buffer_index].offset_of(cursor)
    }

    fn rb_delete(&mut self, node: NodeId) {
        self.tree.delete(node);
        self.search_cache.forget(node);
    }

    fn delete_nodes(&mut self, nodes: &[NodeId]) {
        for &node in nodes {
            self.rb_delete(node);
        }
    }

    fn create_new_pieces(&mut self, value: &str) -> Vec<Piece> {
        let mut text = value.as_bytes();
        if text.len() > self.average_buffer_size {
            // large content makes slicing and byte lookups slow, so split it
            // into write-once buffers just like line-ending normalization does
            let mut new_pieces = Vec::new();
            while text.len() > self.average_buffer_size {
                let split = safe_split_point(text, self.average_buffer_size);
                let (head, rest) = text.split_at(split);
                let buffer = StringBuffer::new(head.to_vec());
                new_pieces.push(buffer.whole_piece(self.buffers.len()));
                self.buffers.push(Arc::new(buffer));
                text = rest;
            }

            if !text.is_empty() {
                let buffer = StringBuffer::new(text.to_vec());
                new_pieces.push(buffer.whole_piece(self.buffers.len()));
                self.buffers.push(Arc::new(buffer));
            }

            tracing::trace!(
                bytes = value.len(),
                pieces = new_pieces.len(),
                "split large insert into new buffers"
            );
            return new_pieces;
        }

        let mut line_starts = create_line_starts_fast(text);
        let mut start = self.last_change_buffer_pos;

        let change_buffer = Arc::make_mut(&mut self.buffers[0]);
        let mut start_offset = change_buffer.data.len();
        let ends_at_line_start = change_buffer.line_starts.last() == Some(&start_offset);

        if ends_at_line_start
            && start_offset != 0
            && starts_with_lf(text)
            && ends_with_cr(&change_buffer.data)
        {
            // keep the stored \r and the new \n apart so they stay two line breaks
            start = BufferCursor::new(start.line, start.column + 1);

            for line_start in line_starts.iter_mut() {
                *line_start += start_offset + 1;
            }
            change_buffer.line_starts.extend_from_slice(&line_starts[1..]);
            change_buffer.data.push(b'_');
            change_buffer.data.extend_from_slice(text);
            start_offset += 1;
        } else {
            if start_offset != 0 {
                for line_start in line_starts.iter_mut() {
                    *line_start += start_offset;
                }
            }
            change_buffer.line_starts.extend_from_slice(&line_starts[1..]);
            change_buffer.data.extend_from_slice(text);
        }

        let end_offset = change_buffer.data.len();
        let end_pos = change_buffer.end_cursor();
        let new_piece = Piece::new(
            0,
            start,
            end_pos,
            self.get_line_feed_cnt(0, start, end_pos),
            end_offset - start_offset,
        );
        self.last_change_buffer_pos = end_pos;
        vec![new_piece]
    }

    /// The whole document as stored, terminators included
    pub fn get_lines_raw_content(&self) -> String {
        let mut ret = Vec::with_capacity(self.length);
        for id in self.tree.iter() {
            ret.extend_from_slice(self.node_content(id));
        }
        into_string(ret)
    }

    /// Content of a line including its terminator, minus `end_offset`
    /// trailing bytes when the line is not the last one.
    pub fn get_line_raw_content(&self, line_number: usize, end_offset: usize) -> String {
        into_string(self.line_raw_bytes(line_number, end_offset))
    }

    fn line_raw_bytes(&self, line: usize, end_offset: usize) -> Vec<u8> {
        let mut x = self.tree.root;
        let mut line_number = line.max(1);
        let mut ret = Vec::new();

        if let Some(cache) = self.search_cache.get2(&self.tree, line_number) {
            x = cache.node;
            let piece = *self.tree.piece(x);
            let prev_accumulated = self.get_accumulated_value(
                x,
                line_number as isize - cache.node_start_line_number as isize - 1,
            );
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = buffer.offset_of(piece.start);
            if cache.node_start_line_number + piece.line_feed_cnt == line_number {
                ret.extend_from_slice(
                    &buffer.data[start_offset + prev_accumulated..start_offset + piece.length],
                );
            } else {
                let accumulated = self.get_accumulated_value(
                    x,
                    line_number as isize - cache.node_start_line_number as isize,
                );
                let from = start_offset + prev_accumulated;
                let to = (start_offset + accumulated).saturating_sub(end_offset).max(from);
                return buffer.data[from..to].to_vec();
            }
        } else {
            let mut node_start_offset = 0;
            let original_line_number = line_number;
            while x != SENTINEL {
                let node = self.tree.node(x);
                if node.left != SENTINEL && node.lf_left >= line_number - 1 {
                    x = node.left;
                } else if node.lf_left + node.piece.line_feed_cnt > line_number - 1 {
                    let prev_accumulated = self
                        .get_accumulated_value(x, line_number as isize - node.lf_left as isize - 2);
                    let accumulated = self
                        .get_accumulated_value(x, line_number as isize - node.lf_left as isize - 1);
                    let buffer = &self.buffers[node.piece.buffer_index];
                    let start_offset = buffer.offset_of(node.piece.start);
                    node_start_offset += node.size_left;
                    self.search_cache.set(CacheEntry {
                        node: x,
                        node_start_offset,
                        node_start_line_number: original_line_number
                            - (line_number - 1 - node.lf_left),
                    });

                    let from = start_offset + prev_accumulated;
                    let to = (start_offset + accumulated).saturating_sub(end_offset).max(from);
                    return buffer.data[from..to].to_vec();
                } else if node.lf_left + node.piece.line_feed_cnt == line_number - 1 {
                    let prev_accumulated = self
                        .get_accumulated_value(x, line_number as isize - node.lf_left as isize - 2);
                    let buffer = &self.buffers[node.piece.buffer_index];
                    let start_offset = buffer.offset_of(node.piece.start);
                    if node.piece.length > prev_accumulated {
                        ret.extend_from_slice(
                            &buffer.data
                                [start_offset + prev_accumulated..start_offset + node.piece.length],
                        );
                    }
                    break;
                } else {
                    line_number -= node.lf_left + node.piece.line_feed_cnt;
                    node_start_offset += node.size_left + node.piece.length;
                    x = node.right;
                }
            }
        }

        if x == SENTINEL {
            return ret;
        }

        // search in order, to find the node that holds the end of the line
        x = self.tree.next(x);
        while x != SENTINEL {
            let piece = self.tree.piece(x);
            let buffer = &self.buffers[piece.buffer_index];
            let start_offset = buffer.offset_of(piece.start);

            if piece.line_feed_cnt > 0 {
                let accumulated = self.get_accumulated_value(x, 0);
                let to = (start_offset + accumulated)
                    .saturating_sub(end_offset)
                    .max(start_offset);
                ret.extend_from_slice(&buffer.data[start_offset..to]);
                return ret;
            }
            ret.extend_from_slice(&buffer.data[start_offset..start_offset + piece.length]);

            x = self.tree.next(x);
        }

        ret
    }

    fn compute_buffer_metadata(&mut self) {
        let mut x = self.tree.root;

        let mut lf_cnt = 1;
        let mut len = 0;

        while x != SENTINEL {
            let node = self.tree.node(x);
            lf_cnt += node.lf_left + node.piece.line_feed_cnt;
            len += node.size_left + node.piece.length;
            x = node.right;
        }

        self.line_cnt = lf_cnt;
        self.length = len;
        self.search_cache.validate(&self.tree, self.length);
    }

    /// (line breaks before, column) of the byte `accumulated_value` bytes into `node`
    fn get_index_of(&self, node: NodeId, accumulated_value: usize) -> (usize, usize) {
        let piece = *self.tree.piece(node);
        let pos = self.position_in_buffer(node, accumulated_value);
        let line_cnt = pos.line - piece.start.line;

        if self.offset_in_buffer(piece.buffer_index, piece.end)
            - self.offset_in_buffer(piece.buffer_index, piece.start)
            == accumulated_value
        {
            // at the end of this node, so a CRLF check is necessary
            let real_line_cnt = self.get_line_feed_cnt(piece.buffer_index, piece.start, pos);
            if real_line_cnt != line_cnt {
                return (real_line_cnt, 0);
            }
        }

        (line_cnt, pos.column)
    }

    /// Byte distance from the piece start to the start of its `index + 1`th line
    fn get_accumulated_value(&self, node: NodeId, index: isize) -> usize {
        if index < 0 {
            return 0;
        }
        let piece = self.tree.piece(node);
        let line_starts = &self.buffers[piece.buffer_index].line_starts;
        let expected_line_start_index = piece.start.line + index as usize + 1;
        if expected_line_start_index > piece.end.line {
            line_starts[piece.end.line] + piece.end.column
                - line_starts[piece.start.line]
                - piece.start.column
        } else {
            line_starts[expected_line_start_index]
                - line_starts[piece.start.line]
                - piece.start.column
        }
    }

    fn delete_node_tail(&mut self, node: NodeId, pos: BufferCursor) {
        let piece = *self.tree.piece(node);
        let original_lf_cnt = piece.line_feed_cnt;
        let original_end_offset = self.offset_in_buffer(piece.buffer_index, piece.end);

        let new_end = pos;
        let new_end_offset = self.offset_in_buffer(piece.buffer_index, new_end);
        let new_line_feed_cnt = self.get_line_feed_cnt(piece.buffer_index, piece.start, new_end);

        let lf_delta = new_line_feed_cnt as isize - original_lf_cnt as isize;
        let size_delta = new_end_offset as isize - original_end_offset as isize;
        let new_length = piece.length.wrapping_add_signed(size_delta);

        self.tree.set_piece(
            node,
            Piece::new(
                piece.buffer_index,
                piece.start,
                new_end,
                new_line_feed_cnt,
                new_length,
            ),
        );

        self.tree.update_tree_metadata(node, size_delta, lf_delta);
    }

    fn delete_node_head(&mut self, node: NodeId, pos: BufferCursor) {
        let piece = *self.tree.piece(node);
        let original_lf_cnt = piece.line_feed_cnt;
        let original_start_offset = self.offset_in_buffer(piece.buffer_index, piece.start);

        let new_start = pos;
        let new_line_feed_cnt = self.get_line_feed_cnt(piece.buffer_index, new_start, piece.end);
        let new_start_offset = self.offset_in_buffer(piece.buffer_index, new_start);
        let lf_delta = new_line_feed_cnt as isize - original_lf_cnt as isize;
        let size_delta = original_start_offset as isize - new_start_offset as isize;
        let new_length = piece.length.wrapping_add_signed(size_delta);

        self.tree.set_piece(
            node,
            Piece::new(
                piece.buffer_index,
                new_start,
                piece.end,
                new_line_feed_cnt,
                new_length,
            ),
        );

        self.tree.update_tree_metadata(node, size_delta, lf_delta);
    }

    fn shrink_node(&mut self, node: NodeId, start: BufferCursor, end: BufferCursor) {
        let piece = *self.tree.piece(node);
        let original_start_pos = piece.start;
        let original_end_pos = piece.end;

        // old piece keeps [original start, start)
        let old_length = piece.length;
        let old_lf_cnt = piece.line_feed_cnt;
        let new_end = start;
        let new_line_feed_cnt = self.get_line_feed_cnt(piece.buffer_index, piece.start, new_end);
        let new_length = self.offset_in_buffer(piece.buffer_index, start)
            - self.offset_in_buffer(piece.buffer_index, original_start_pos);

        self.tree.set_piece(
            node,
            Piece::new(
                piece.buffer_index,
                piece.start,
                new_end,
                new_line_feed_cnt,
                new_length,
            ),
        );

        self.tree.update_tree_metadata(
            node,
            new_length as isize - old_length as isize,
            new_line_feed_cnt as isize - old_lf_cnt as isize,
        );

        // new right piece holds [end, original end)
        let new_piece = Piece::new(
            piece.buffer_index,
            end,
            original_end_pos,
            self.get_line_feed_cnt(piece.buffer_index, end, original_end_pos),
            self.offset_in_buffer(piece.buffer_index, original_end_pos)
                - self.offset_in_buffer(piece.buffer_index, end),
        );

        let new_node = self.tree.insert_right(node, new_piece);
        self.validate_crlf_with_prev_node(new_node);
    }

    fn append_to_node(&mut self, node: NodeId, text: &str) {
        let mut value = text.to_string();
        if self.adjust_carriage_return_from_next(value.as_bytes(), node) {
            value.push('\n');
        }

        let hit_crlf = self.should_check_crlf()
            && starts_with_lf(value.as_bytes())
            && self.end_with_cr_node(node);

        let change_buffer = Arc::make_mut(&mut self.buffers[0]);
        let start_offset = change_buffer.data.len();
        change_buffer.data.extend_from_slice(value.as_bytes());
        let mut line_starts = create_line_starts_fast(value.as_bytes());
        for line_start in line_starts.iter_mut() {
            *line_start += start_offset;
        }
        if hit_crlf {
            // the stored \r and the new \n merge into one line break
            let prev_start_offset = change_buffer.line_starts[change_buffer.line_starts.len() - 2];
            change_buffer.line_starts.pop();
            self.last_change_buffer_pos = BufferCursor::new(
                self.last_change_buffer_pos.line - 1,
                start_offset - prev_start_offset,
            );
        }

        change_buffer.line_starts.extend_from_slice(&line_starts[1..]);
        let new_end = change_buffer.end_cursor();

        let piece = *self.tree.piece(node);
        let new_length = piece.length + value.len();
        let new_line_feed_cnt = self.get_line_feed_cnt(0, piece.start, new_end);
        let lf_delta = new_line_feed_cnt as isize - piece.line_feed_cnt as isize;

        self.tree.set_piece(
            node,
            Piece::new(
                piece.buffer_index,
                piece.start,
                new_end,
                new_line_feed_cnt,
                new_length,
            ),
        );

        self.last_change_buffer_pos = new_end;
        self.tree
            .update_tree_metadata(node, value.len() as isize, lf_delta);
    }

    /// Resolve a document offset; a position at a piece boundary resolves to
    /// the end of the earlier piece.
    pub(crate) fn node_at(&self, index: usize) -> Option<NodePosition> {
        if let Some(cache) = self.search_cache.get(&self.tree, index) {
            return Some(NodePosition {
                node: cache.node,
                remainder: index - cache.node_start_offset,
                node_start_offset: cache.node_start_offset,
            });
        }

        let mut x = self.tree.root;
        let mut offset = index;
        let mut node_start_offset = 0;

        while x != SENTINEL {
            let node = self.tree.node(x);
            if node.size_left > offset {
                x = node.left;
            } else if node.size_left + node.piece.length >= offset {
                node_start_offset += node.size_left;
                self.search_cache.set(CacheEntry {
                    node: x,
                    node_start_offset,
                    node_start_line_number: 0,
                });
                return Some(NodePosition {
                    node: x,
                    remainder: offset - node.size_left,
                    node_start_offset,
                });
            } else {
                offset -= node.size_left + node.piece.length;
                node_start_offset += node.size_left + node.piece.length;
                x = node.right;
            }
        }
        None
    }

    /// Resolve a 1-based (line, column). Columns past the line end resolve
    /// to the end of that line, terminator included.
    pub(crate) fn node_at2(&self, line_number: usize, column: usize) -> Option<NodePosition> {
        let mut x = self.tree.root;
        let mut line_number = line_number.max(1);
        let mut column = column.max(1);
        let mut node_start_offset = 0;

        while x != SENTINEL {
            let node = self.tree.node(x);
            if node.left != SENTINEL && node.lf_left >= line_number - 1 {
                x = node.left;
            } else if node.lf_left + node.piece.line_feed_cnt > line_number - 1 {
                let prev_accumulated = self
                    .get_accumulated_value(x, line_number as isize - node.lf_left as isize - 2);
                let accumulated = self
                    .get_accumulated_value(x, line_number as isize - node.lf_left as isize - 1);
                node_start_offset += node.size_left;

                return Some(NodePosition {
                    node: x,
                    remainder: (prev_accumulated + column - 1).min(accumulated),
                    node_start_offset,
                });
            } else if node.lf_left + node.piece.line_feed_cnt == line_number - 1 {
                let prev_accumulated = self
                    .get_accumulated_value(x, line_number as isize - node.lf_left as isize - 2);
                if prev_accumulated + column - 1 <= node.piece.length {
                    return Some(NodePosition {
                        node: x,
                        remainder: prev_accumulated + column - 1,
                        node_start_offset: node_start_offset + node.size_left,
                    });
                }
                column -= node.piece.length - prev_accumulated;
                break;
            } else {
                line_number -= node.lf_left + node.piece.line_feed_cnt;
                node_start_offset += node.size_left + node.piece.length;
                x = node.right;
            }
        }

        if x == SENTINEL {
            return None;
        }

        // search in order, to find the node that holds the column
        x = self.tree.next(x);
        while x != SENTINEL {
            let piece = self.tree.piece(x);
            if piece.line_feed_cnt > 0 {
                let accumulated = self.get_accumulated_value(x, 0);
                return Some(NodePosition {
                    node: x,
                    remainder: (column - 1).min(accumulated),
                    node_start_offset: self.tree.offset_of(x),
                });
            } else if piece.length >= column - 1 {
                return Some(NodePosition {
                    node: x,
                    remainder: column - 1,
                    node_start_offset: self.tree.offset_of(x),
                });
            } else {
                column -= piece.length;
            }

            x = self.tree.next(x);
        }

        None
    }

    fn node_char_code_at(&self, node: NodeId, offset: usize) -> Option<u8> {
        let piece = self.tree.piece(node);
        if piece.line_feed_cnt < 1 {
            return None;
        }
        let buffer = &self.buffers[piece.buffer_index];
        buffer.data.get(buffer.offset_of(piece.start) + offset).copied()
    }

    fn should_check_crlf(&self) -> bool {
        !(self.eol_normalized && self.eol == "\n")
    }

    fn start_with_lf_node(&self, node: NodeId) -> bool {
        if node == SENTINEL || self.tree.piece(node).line_feed_cnt == 0 {
            return false;
        }

        let piece = self.tree.piece(node);
        let buffer = &self.buffers[piece.buffer_index];
        let line = piece.start.line;
        let start_offset = buffer.line_starts[line] + piece.start.column;
        if line == buffer.line_starts.len() - 1 {
            // last line, so there is no line feed at the end of this line
            return false;
        }
        let next_line_offset = buffer.line_starts[line + 1];
        if next_line_offset > start_offset + 1 {
            return false;
        }

        buffer.data[start_offset] == b'\n'
    }

    fn end_with_cr_node(&self, node: NodeId) -> bool {
        if node == SENTINEL || self.tree.piece(node).line_feed_cnt == 0 {
            return false;
        }
        let length = self.tree.piece(node).length;
        self.node_char_code_at(node, length - 1) == Some(b'\r')
    }

    fn validate_crlf_with_prev_node(&mut self, next_node: NodeId) {
        if self.should_check_crlf() && self.start_with_lf_node(next_node) {
            let node = self.tree.prev(next_node);
            if self.end_with_cr_node(node) {
                self.fix_crlf(node, next_node);
            }
        }
    }

    fn validate_crlf_with_next_node(&mut self, node: NodeId) {
        if self.should_check_crlf() && self.end_with_cr_node(node) {
            let next_node = self.tree.next(node);
            if self.start_with_lf_node(next_node) {
                self.fix_crlf(node, next_node);
            }
        }
    }

    /// `prev` ends with \r and `next` starts with \n: cut both and put a
    /// fresh \r\n piece between them.
    fn fix_crlf(&mut self, prev: NodeId, next: NodeId) {
        let mut nodes_to_del = Vec::new();

        let prev_piece = *self.tree.piece(prev);
        let line_starts = &self.buffers[prev_piece.buffer_index].line_starts;
        let new_end = if prev_piece.end.column == 0 {
            // the last line ends with \r, not \r\n
            BufferCursor::new(
                prev_piece.end.line - 1,
                line_starts[prev_piece.end.line] - line_starts[prev_piece.end.line - 1] - 1,
            )
        } else {
            // \r\n
            BufferCursor::new(prev_piece.end.line, prev_piece.end.column - 1)
        };

        let prev_new_length = prev_piece.length - 1;
        self.tree.set_piece(
            prev,
            Piece::new(
                prev_piece.buffer_index,
                prev_piece.start,
                new_end,
                prev_piece.line_feed_cnt - 1,
                prev_new_length,
            ),
        );
        self.tree.update_tree_metadata(prev, -1, -1);
        if prev_new_length == 0 {
            nodes_to_del.push(prev);
        }

        let next_piece = *self.tree.piece(next);
        let new_start = BufferCursor::new(next_piece.start.line + 1, 0);
        let new_length = next_piece.length - 1;
        let new_line_feed_cnt =
            self.get_line_feed_cnt(next_piece.buffer_index, new_start, next_piece.end);
        self.tree.set_piece(
            next,
            Piece::new(
                next_piece.buffer_index,
                new_start,
                next_piece.end,
                new_line_feed_cnt,
                new_length,
            ),
        );
        self.tree.update_tree_metadata(next, -1, -1);
        if new_length == 0 {
            nodes_to_del.push(next);
        }

        // create new piece which contains \r\n
        let pieces = self.create_new_pieces("\r\n");
        self.tree.insert_right(prev, pieces[0]);

        self.delete_nodes(&nodes_to_del);
    }

    /// If `value` ends with \r and the node after `node` starts with \n,
    /// take the \n away from that node and report it.
    fn adjust_carriage_return_from_next(&mut self, value: &[u8], node: NodeId) -> bool {
        if self.should_check_crlf() && ends_with_cr(value) {
            let next_node = self.tree.next(node);
            if self.start_with_lf_node(next_node) {
                // move `\n` forward
                let piece = *self.tree.piece(next_node);
                if piece.length == 1 {
                    self.rb_delete(next_node);
                } else {
                    let new_start = BufferCursor::new(piece.start.line + 1, 0);
                    let new_line_feed_cnt =
                        self.get_line_feed_cnt(piece.buffer_index, new_start, piece.end);
                    self.tree.set_piece(
                        next_node,
                        Piece::new(
                            piece.buffer_index,
                            new_start,
                            piece.end,
                            new_line_feed_cnt,
                            piece.length - 1,
                        ),
                    );
                    self.tree.update_tree_metadata(next_node, -1, -1);
                }
                return true;
            }
        }

        false
    }

    fn node_content(&self, node: NodeId) -> &[u8] {
        if node == SENTINEL {
            return &[];
        }
        let piece = self.tree.piece(node);
        let buffer = &self.buffers[piece.buffer_index];
        let start = buffer.offset_of(piece.start);
        let end = buffer.offset_of(piece.end);
        &buffer.data[start..end]
    }

    /// Number of pieces currently in the tree
    pub fn piece_count(&self) -> usize {
        self.tree.iter().count()
    }

    /// Number of buffers in the pool, the change buffer included
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Verify every structural invariant: red-black shape, cached
    /// aggregates, piece metadata against the buffers, document totals and
    /// that no `\r\n` pair is split across two pieces.
    pub fn check_invariants(&self) -> Result<(), String> {
        let stats = self.tree.check_invariants()?;
        if stats.total_bytes != self.length {
            return Err(format!(
                "cached length {} but the pieces hold {} bytes",
                self.length, stats.total_bytes
            ));
        }
        if stats.line_feed_count + 1 != self.line_cnt {
            return Err(format!(
                "cached line count {} but the pieces hold {} line breaks",
                self.line_cnt, stats.line_feed_count
            ));
        }

        let mut prev_ends_with_cr = false;
        for id in self.tree.iter() {
            let piece = *self.tree.piece(id);
            let start = self.offset_in_buffer(piece.buffer_index, piece.start);
            let end = self.offset_in_buffer(piece.buffer_index, piece.end);
            if end - start != piece.length {
                return Err(format!(
                    "piece length {} does not match its span of {} bytes",
                    piece.length,
                    end - start
                ));
            }
            let line_feeds = self.get_line_feed_cnt(piece.buffer_index, piece.start, piece.end);
            if line_feeds != piece.line_feed_cnt {
                return Err(format!(
                    "piece line feed count {} does not match a recount of {line_feeds}",
                    piece.line_feed_cnt
                ));
            }
            let content = self.node_content(id);
            if prev_ends_with_cr && starts_with_lf(content) {
                return Err("a \\r\\n pair is split across two pieces".to_string());
            }
            if !content.is_empty() {
                prev_ends_with_cr = ends_with_cr(content);
            }
        }
        Ok(())
    }

}

impl Clone for PieceTreeBase {
    fn clone(&self) -> Self {
        PieceTreeBase {
            tree: self.tree.clone(),
            buffers: self.buffers.clone(),
            line_cnt: self.line_cnt,
            length: self.length,
            eol: self.eol.clone(),
            eol_normalized: self.eol_normalized,
            last_change_buffer_pos: self.last_change_buffer_pos,
            last_visited_line: Mutex::new(self.visited_line().clone()),
            search_cache: self.search_cache.clone(),
            average_buffer_size: self.average_buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_from(chunks: &[&str]) -> PieceTreeBase {
        let buffers = chunks
            .iter()
            .map(|chunk| StringBuffer::new(chunk.as_bytes().to_vec()))
            .collect();
        PieceTreeBase::new(buffers, "\n", false)
    }

    fn small_chunks_tree(text: &str, chunk_size: usize) -> PieceTreeBase {
        let config = BufferConfig {
            chunk_size,
            ..BufferConfig::default()
        };
        PieceTreeBase::with_config(vec![StringBuffer::new(text.as_bytes().to_vec())], "\n", false, &config)
    }

    #[test]
    fn test_empty_tree() {
        let tree = tree_from(&[]);
        assert_eq!(tree.get_length(), 0);
        assert_eq!(tree.get_line_count(), 1);
        assert_eq!(tree.get_lines_raw_content(), "");
        assert_eq!(tree.get_line_content(1), "");
        assert_eq!(tree.get_position_at(0), Position::new(1, 1));
        assert_eq!(tree.get_offset_at(1, 1), 0);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_basic_insert_delete() {
        let mut tree = tree_from(&["This is a document with some text."]);
        tree.insert(34, "This is some more text to insert at offset 34.", false);
        assert_eq!(
            tree.get_lines_raw_content(),
            "This is a document with some text.This is some more text to insert at offset 34."
        );
        tree.delete(42, 5);
        assert_eq!(
            tree.get_lines_raw_content(),
            "This is a document with some text.This is more text to insert at offset 34."
        );
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_insert_into_empty_tree() {
        let mut tree = tree_from(&[]);
        tree.insert(0, "hello\nworld", false);
        assert_eq!(tree.get_lines_raw_content(), "hello\nworld");
        assert_eq!(tree.get_line_count(), 2);
        assert_eq!(tree.get_line_content(2), "world");
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_offset_and_position() {
        let tree = tree_from(&["a\nb\nc\nde"]);
        assert_eq!(tree.get_offset_at(1, 1), 0);
        assert_eq!(tree.get_offset_at(2, 1), 2);
        assert_eq!(tree.get_offset_at(4, 2), 7);
        assert_eq!(tree.get_position_at(0), Position::new(1, 1));
        assert_eq!(tree.get_position_at(1), Position::new(1, 2));
        assert_eq!(tree.get_position_at(2), Position::new(2, 1));
        assert_eq!(tree.get_position_at(8), Position::new(4, 3));
        // clamped
        assert_eq!(tree.get_position_at(100), Position::new(4, 3));
        assert_eq!(tree.get_offset_at(100, 1), 8);
    }

    #[test]
    fn test_line_content_and_length() {
        let mut tree = tree_from(&["a\nb\nc\nde"]);
        tree.insert(8, "fh\ni\njk", false);
        tree.delete(7, 2);
        assert_eq!(tree.get_lines_raw_content(), "a\nb\nc\ndh\ni\njk");
        assert_eq!(tree.get_line_count(), 6);
        assert_eq!(tree.get_line_content(4), "dh");
        assert_eq!(tree.get_line_content(6), "jk");
        assert_eq!(tree.get_line_length(4), 2);
        assert_eq!(tree.get_line_length(6), 2);
        assert_eq!(
            tree.get_lines_content(),
            vec!["a", "b", "c", "dh", "i", "jk"]
        );
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_crlf_is_never_split_on_insert() {
        let mut tree = tree_from(&["a\r"]);
        tree.insert(2, "\nb", false);
        assert_eq!(tree.get_lines_raw_content(), "a\r\nb");
        assert_eq!(tree.get_line_count(), 2);
        tree.check_invariants().unwrap();

        let mut tree = tree_from(&["\nb"]);
        tree.insert(0, "a\r", false);
        assert_eq!(tree.get_lines_raw_content(), "a\r\nb");
        assert_eq!(tree.get_line_count(), 2);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_crlf_is_never_split_on_delete() {
        let mut tree = tree_from(&["a\rx\nb"]);
        tree.delete(2, 1);
        assert_eq!(tree.get_lines_raw_content(), "a\r\nb");
        assert_eq!(tree.get_line_count(), 2);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_crlf_chunk_stress_sequence() {
        let mut tree = tree_from(&["a"]);
        let mut reference = String::from("a");
        let ops: &[(bool, usize, &str, usize)] = &[
            (false, 0, "", 1),
            (true, 0, "\r\r\n\n", 0),
            (false, 3, "", 1),
            (true, 2, "\n\n\ra", 0),
            (false, 4, "", 1),
            (true, 2, "\n\r\r\r", 0),
            (true, 3, "\n\n\r\r", 0),
            (false, 1, "", 8),
        ];
        for &(is_insert, offset, text, count) in ops {
            if is_insert {
                tree.insert(offset, text, false);
                reference.insert_str(offset, text);
            } else {
                tree.delete(offset, count);
                reference.replace_range(offset..offset + count, "");
            }
            assert_eq!(tree.get_lines_raw_content(), reference);
            tree.check_invariants().unwrap();
        }
    }

    #[test]
    fn test_large_insert_is_split_into_buffers() {
        let mut tree = small_chunks_tree("", 16);
        let text = "0123456789\r\n".repeat(10);
        tree.insert(0, &text, false);
        assert_eq!(tree.get_lines_raw_content(), text);
        assert!(tree.buffer_count() > 2);
        assert_eq!(tree.get_line_count(), 11);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_get_value_in_range() {
        let tree = tree_from(&["abc\ndef\r\nghi"]);
        assert_eq!(tree.get_value_in_range(&Range::new(1, 2, 2, 3)), "bc\nde");
        assert_eq!(tree.get_value_in_range(&Range::new(2, 1, 3, 4)), "def\r\nghi");
        assert_eq!(
            tree.get_value_in_range_with_eol(&Range::new(1, 1, 3, 4), "\n"),
            "abc\ndef\nghi"
        );
        assert_eq!(tree.get_value_in_range(&Range::new(2, 2, 2, 2)), "");
    }

    #[test]
    fn test_nearest_chunk() {
        let mut tree = tree_from(&["012345678"]);
        tree.insert(3, "ABC", false);
        assert_eq!(tree.get_lines_raw_content(), "012ABC345678");
        assert_eq!(tree.get_nearest_chunk(3), "ABC");
        assert_eq!(tree.get_nearest_chunk(6), "345678");

        tree.delete(9, 1);
        assert_eq!(tree.get_lines_raw_content(), "012ABC34578");
        assert_eq!(tree.get_nearest_chunk(6), "345");
        assert_eq!(tree.get_nearest_chunk(9), "78");
        assert_eq!(tree.get_nearest_chunk(11), "");
    }

    #[test]
    fn test_char_codes() {
        let tree = tree_from(&["ab\ncd"]);
        assert_eq!(tree.get_char_code(0), b'a');
        assert_eq!(tree.get_char_code(2), b'\n');
        assert_eq!(tree.get_char_code(5), 0);
        assert_eq!(tree.get_line_char_code(2, 1), b'd');
    }

    #[test]
    fn test_set_eol_rewrites_terminators() {
        let mut tree = tree_from(&["a\nb\r\nc\rd"]);
        tree.set_eol("\r\n");
        assert_eq!(tree.get_lines_raw_content(), "a\r\nb\r\nc\r\nd");
        assert_eq!(tree.get_line_count(), 4);
        assert!(tree.is_eol_normalized());
        assert_eq!(tree.get_line_content(2), "b");
        assert_eq!(tree.get_line_length(2), 1);
        tree.check_invariants().unwrap();

        tree.set_eol("\n");
        assert_eq!(tree.get_lines_raw_content(), "a\nb\nc\nd");
    }

    #[test]
    fn test_equal_ignores_piece_layout() {
        let a = tree_from(&["abc", "def"]);
        let mut b = tree_from(&["ab"]);
        b.insert(2, "cdef", false);
        assert!(a.equal(&b));
        b.insert(0, "x", false);
        assert!(!a.equal(&b));
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_edits() {
        let mut tree = tree_from(&["abc", "def"]);
        let mut snapshot = tree.create_snapshot("");
        tree.insert(3, "XYZ", false);
        tree.delete(0, 1);
        let mut text = String::new();
        while let Some(chunk) = snapshot.read() {
            text.push_str(&chunk);
        }
        assert_eq!(text, "abcdef");
    }

    #[test]
    fn test_search_cache_survives_edits() {
        let mut tree = tree_from(&["line1\nline2\nline3\n"]);
        assert_eq!(tree.get_line_content(2), "line2");
        tree.insert(0, "zero\n", false);
        assert_eq!(tree.get_line_content(2), "line1");
        assert_eq!(tree.get_line_content(3), "line2");
        tree.delete(0, 5);
        assert_eq!(tree.get_line_content(2), "line2");
        assert_eq!(tree.get_line_content(4), "");
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Operation {
        Insert { offset: usize, text: String },
        Delete { offset: usize, len: usize },
    }

    fn text_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                3 => Just("a"),
                1 => Just("b"),
                2 => Just("\r"),
                2 => Just("\n"),
                1 => Just("\r\n"),
            ],
            1..8,
        )
        .prop_map(|parts| parts.concat())
    }

    fn operation_strategy() -> impl Strategy<Value = Vec<Operation>> {
        prop::collection::vec(
            prop_oneof![
                3 => (0usize..200, text_strategy())
                    .prop_map(|(offset, text)| Operation::Insert { offset, text }),
                2 => (0usize..200, 1usize..10)
                    .prop_map(|(offset, len)| Operation::Delete { offset, len }),
            ],
            1..60,
        )
    }

    fn apply(tree: &mut PieceTreeBase, reference: &mut String, op: &Operation) {
        match op {
            Operation::Insert { offset, text } => {
                let offset = (*offset).min(reference.len());
                tree.insert(offset, text, false);
                reference.insert_str(offset, text);
            }
            Operation::Delete { offset, len } => {
                if *offset < reference.len() {
                    let end = (*offset + *len).min(reference.len());
                    tree.delete(*offset, *len);
                    reference.replace_range(*offset..end, "");
                }
            }
        }
    }

    proptest! {
        #[test]
        fn prop_content_matches_reference(operations in operation_strategy()) {
            let mut tree = PieceTreeBase::new(Vec::new(), "\n", false);
            let mut reference = String::new();
            for op in &operations {
                apply(&mut tree, &mut reference, op);
                prop_assert_eq!(tree.get_lines_raw_content(), reference.clone());
                prop_assert_eq!(tree.get_length(), reference.len());
            }
        }

        #[test]
        fn prop_invariants_hold_after_every_mutation(operations in operation_strategy()) {
            let mut tree = PieceTreeBase::new(
                vec![StringBuffer::new(b"initial\r\ncontent\n".to_vec())],
                "\n",
                false,
            );
            let mut reference = String::from("initial\r\ncontent\n");
            for op in &operations {
                apply(&mut tree, &mut reference, op);
                if let Err(e) = tree.check_invariants() {
                    prop_assert!(false, "invariant violated after {:?}: {}", op, e);
                }
            }
        }

        #[test]
        fn prop_offset_position_inverse(operations in operation_strategy()) {
            let mut tree = PieceTreeBase::new(Vec::new(), "\n", false);
            let mut reference = String::new();
            for op in &operations {
                apply(&mut tree, &mut reference, op);
            }
            let bytes = reference.as_bytes();
            for offset in 0..=reference.len() {
                // the middle of a \r\n pair is not addressable
                if offset > 0 && offset < bytes.len() && bytes[offset - 1] == b'\r' && bytes[offset] == b'\n' {
                    continue;
                }
                let pos = tree.get_position_at(offset);
                prop_assert_eq!(tree.get_offset_at(pos.line_number, pos.column), offset);
            }
        }

        #[test]
        fn prop_position_offset_inverse(operations in operation_strategy()) {
            let mut tree = PieceTreeBase::new(Vec::new(), "\n", false);
            let mut reference = String::new();
            for op in &operations {
                apply(&mut tree, &mut reference, op);
            }
            let mut line_start = 0;
            for (i, line) in split_lines(&reference).iter().enumerate() {
                let line_number = i + 1;
                for column in 1..=line.len() + 1 {
                    let offset = tree.get_offset_at(line_number, column);
                    prop_assert_eq!(offset, line_start + column - 1);
                    prop_assert_eq!(tree.get_position_at(offset), Position::new(line_number, column));
                }
                line_start += line.len();
                let rest = &reference.as_bytes()[line_start..];
                line_start += if rest.starts_with(b"\r\n") { 2 } else { 1 };
            }
        }

        #[test]
        fn prop_snapshot_unaffected_by_later_edits(
            operations in operation_strategy(),
            later in operation_strategy(),
        ) {
            let mut tree = PieceTreeBase::new(
                vec![StringBuffer::new(b"seed\ntext".to_vec())],
                "\n",
                false,
            );
            let mut reference = String::from("seed\ntext");
            for op in &operations {
                apply(&mut tree, &mut reference, op);
            }
            let snapshot = tree.create_snapshot("");
            let frozen = reference.clone();

            for op in &later {
                apply(&mut tree, &mut reference, op);
            }
            prop_assert_eq!(snapshot.collect::<String>(), frozen);
            prop_assert_eq!(tree.get_lines_raw_content(), reference);
        }

        #[test]
        fn prop_lines_match_reference(operations in operation_strategy()) {
            let mut tree = PieceTreeBase::new(Vec::new(), "\n", false);
            let mut reference = String::new();
            for op in &operations {
                apply(&mut tree, &mut reference, op);
            }
            let expected: Vec<String> = split_lines(&reference);
            prop_assert_eq!(tree.get_line_count(), expected.len());
            prop_assert_eq!(tree.get_lines_content(), expected.clone());
            for (i, line) in expected.iter().enumerate() {
                prop_assert_eq!(&tree.get_line_content(i + 1), line);
            }
        }
    }

    fn split_lines(text: &str) -> Vec<String> {
        let bytes = text.as_bytes();
        let mut lines = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\r' => {
                    lines.push(text[start..i].to_string());
                    if i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
                        i += 1;
                    }
                    start = i + 1;
                }
                b'\n' => {
                    lines.push(text[start..i].to_string());
                    start = i + 1;
                }
                _ => {}
            }
            i += 1;
        }
        lines.push(text[start..].to_string());
        lines
    }
}
