use std::sync::atomic::{AtomicBool, Ordering};

use regex::bytes::Regex;

use super::{strip_trailing_eol, PieceTreeBase};
use crate::model::buffer::BufferCursor;
use crate::model::rb_tree::NodeId;
use crate::primitives::range::Range;
use crate::primitives::strings::count_eol;

/// Cooperative cancellation, polled once per match or loop iteration
pub trait CancellationToken {
    fn is_cancelled(&self) -> bool;
}

impl<F: Fn() -> bool> CancellationToken for F {
    fn is_cancelled(&self) -> bool {
        self()
    }
}

impl CancellationToken for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// A token that is never cancelled
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancellationToken for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Offsets of every `\n` in a text, for mapping positions in `\n`-joined
/// text back to a `\r\n` document
#[derive(Debug, Clone)]
pub struct LineFeedCounter {
    line_feeds_offsets: Vec<usize>,
}

impl LineFeedCounter {
    pub fn new(text: &[u8]) -> Self {
        let line_feeds_offsets = text
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\n')
            .map(|(i, _)| i)
            .collect();
        LineFeedCounter { line_feeds_offsets }
    }

    /// Number of `\n` strictly before `offset`
    pub fn find_line_feed_count_before_offset(&self, offset: usize) -> usize {
        self.line_feeds_offsets.partition_point(|&lf| lf < offset)
    }
}

impl PieceTreeBase {
    fn multiline_match_range(
        &self,
        delta_offset: usize,
        lf_counter: Option<&LineFeedCounter>,
        match_index: usize,
        match_length: usize,
    ) -> Range {
        let (start_offset, end_offset) = match lf_counter {
            Some(lf_counter) => {
                // add as many \r as there were \n
                let lf_before_match = lf_counter.find_line_feed_count_before_offset(match_index);
                let start_offset = delta_offset + match_index + lf_before_match;
                let lf_before_end =
                    lf_counter.find_line_feed_count_before_offset(match_index + match_length);
                let lf_in_match = lf_before_end - lf_before_match;
                (start_offset, start_offset + match_length + lf_in_match)
            }
            None => {
                let start_offset = delta_offset + match_index;
                (start_offset, start_offset + match_length)
            }
        };

        let start = self.get_position_at(start_offset);
        let end = self.get_position_at(end_offset);
        Range::from_positions(start, end)
    }

    /// Run `regex` once over the whole range with every line terminator
    /// presented as `\n`, so patterns may span lines.
    pub fn find_matches_by_multiline(
        &self,
        regex: &Regex,
        search_range: &Range,
        limit_result_count: usize,
        cancel: &dyn CancellationToken,
    ) -> Vec<Range> {
        let delta_offset = self.get_offset_at(search_range.start_line, search_range.start_column);

        // \n matches the line ending of both LF and CRLF documents this way;
        // multiline_match_range puts the missing \r back
        let text = self
            .get_value_in_range_with_eol(search_range, "\n")
            .into_bytes();
        let lf_counter = (self.get_eol() == "\r\n").then(|| LineFeedCounter::new(&text));

        let mut result = Vec::new();
        for m in regex.find_iter(&text) {
            if result.len() >= limit_result_count || cancel.is_cancelled() {
                break;
            }
            result.push(self.multiline_match_range(
                delta_offset,
                lf_counter.as_ref(),
                m.start(),
                m.len(),
            ));
        }
        result
    }

    /// Match `regex` against each line of the node between the two cursors.
    /// Lines are cut before their terminator so a match never leaves its line.
    #[allow(clippy::too_many_arguments)]
    fn find_matches_in_node(
        &self,
        node: NodeId,
        regex: &Regex,
        start_line_number: usize,
        start_column: usize,
        start_cursor: BufferCursor,
        end_cursor: BufferCursor,
        limit_result_count: usize,
        result: &mut Vec<Range>,
        cancel: &dyn CancellationToken,
    ) {
        let piece = self.tree.piece(node);
        let buffer = &self.buffers[piece.buffer_index];
        let start = buffer.offset_of(start_cursor);
        let end = buffer.offset_of(end_cursor);

        for line in start_cursor.line..=end_cursor.line {
            if cancel.is_cancelled() || result.len() >= limit_result_count {
                return;
            }

            let line_start = buffer.line_starts[line];
            let from = if line == start_cursor.line { start } else { line_start };
            if from > end || (line > start_cursor.line && from == end) {
                return;
            }
            let content_end = match buffer.line_starts.get(line + 1) {
                Some(&next_line_start) => {
                    line_start + strip_trailing_eol(&buffer.data[line_start..next_line_start]).len()
                }
                None => buffer.data.len(),
            };
            let to = content_end.min(end);
            if from > to {
                continue;
            }

            let delta_offset = if line == start_cursor.line {
                start_column.saturating_sub(1)
            } else {
                0
            };
            self.find_matches_in_line(
                &buffer.data[from..to],
                regex,
                start_line_number + (line - start_cursor.line),
                delta_offset,
                result,
                limit_result_count,
            );
        }
    }

    /// Run `regex` over the range one line at a time; matches never span lines
    pub fn find_matches_line_by_line(
        &self,
        regex: &Regex,
        search_range: &Range,
        limit_result_count: usize,
        cancel: &dyn CancellationToken,
    ) -> Vec<Range> {
        let mut result = Vec::new();

        let Some(mut start_position) =
            self.node_at2(search_range.start_line, search_range.start_column)
        else {
            return result;
        };
        let Some(end_position) = self.node_at2(search_range.end_line, search_range.end_column)
        else {
            return result;
        };
        let mut start = self.position_in_buffer(start_position.node, start_position.remainder);
        let end = self.position_in_buffer(end_position.node, end_position.remainder);

        if start_position.node == end_position.node {
            self.find_matches_in_node(
                start_position.node,
                regex,
                search_range.start_line,
                search_range.start_column,
                start,
                end,
                limit_result_count,
                &mut result,
                cancel,
            );
            return result;
        }

        let mut start_line_number = search_range.start_line;

        let mut current_node = start_position.node;
        while current_node != end_position.node {
            if cancel.is_cancelled() {
                return result;
            }
            let piece = *self.tree.piece(current_node);
            let line_break_cnt = self.get_line_feed_cnt(piece.buffer_index, start, piece.end);

            if line_break_cnt >= 1 {
                // last line break position
                let buffer = &self.buffers[piece.buffer_index];
                let start_offset_in_buffer = buffer.offset_of(piece.start);
                let next_line_start_offset = buffer.line_starts[start.line + line_break_cnt];
                let start_column = if start_line_number == search_range.start_line {
                    search_range.start_column
                } else {
                    1
                };
                let node_end = self.position_in_buffer(
                    current_node,
                    next_line_start_offset - start_offset_in_buffer,
                );
                self.find_matches_in_node(
                    current_node,
                    regex,
                    start_line_number,
                    start_column,
                    start,
                    node_end,
                    limit_result_count,
                    &mut result,
                    cancel,
                );

                if result.len() >= limit_result_count {
                    return result;
                }

                start_line_number += line_break_cnt;
            }

            let start_column = if start_line_number == search_range.start_line {
                search_range.start_column.saturating_sub(1)
            } else {
                0
            };
            // search for the remaining content
            if start_line_number == search_range.end_line {
                let line = self.get_line_content(start_line_number).into_bytes();
                let to = search_range.end_column.saturating_sub(1).min(line.len());
                let from = start_column.min(to);
                self.find_matches_in_line(
                    &line[from..to],
                    regex,
                    search_range.end_line,
                    start_column,
                    &mut result,
                    limit_result_count,
                );
                return result;
            }

            let line = self.get_line_content(start_line_number).into_bytes();
            let from = start_column.min(line.len());
            self.find_matches_in_line(
                &line[from..],
                regex,
                start_line_number,
                start_column,
                &mut result,
                limit_result_count,
            );

            if result.len() >= limit_result_count {
                return result;
            }

            start_line_number += 1;
            let Some(next_position) = self.node_at2(start_line_number, 1) else {
                return result;
            };
            start_position = next_position;
            current_node = start_position.node;
            start = self.position_in_buffer(start_position.node, start_position.remainder);
        }

        if start_line_number == search_range.end_line {
            let start_column = if start_line_number == search_range.start_line {
                search_range.start_column.saturating_sub(1)
            } else {
                0
            };
            let line = self.get_line_content(start_line_number).into_bytes();
            let to = search_range.end_column.saturating_sub(1).min(line.len());
            let from = start_column.min(to);
            self.find_matches_in_line(
                &line[from..to],
                regex,
                search_range.end_line,
                start_column,
                &mut result,
                limit_result_count,
            );
            return result;
        }

        let start_column = if start_line_number == search_range.start_line {
            search_range.start_column
        } else {
            1
        };
        self.find_matches_in_node(
            end_position.node,
            regex,
            start_line_number,
            start_column,
            start,
            end,
            limit_result_count,
            &mut result,
            cancel,
        );
        result
    }

    fn find_matches_in_line(
        &self,
        text: &[u8],
        regex: &Regex,
        line_number: usize,
        delta_offset: usize,
        result: &mut Vec<Range>,
        limit_result_count: usize,
    ) {
        for m in regex.find_iter(text) {
            if result.len() >= limit_result_count {
                break;
            }
            result.push(Range::new(
                line_number,
                m.start() + 1 + delta_offset,
                line_number,
                m.end() + 1 + delta_offset,
            ));
        }
    }

    /// Plain substring search. `search_text` may span several lines, in
    /// which case it only matches from the first line of a window.
    pub fn find_matches_by_word(
        &self,
        search_text: &str,
        search_range: &Range,
        limit_result_count: usize,
        cancel: &dyn CancellationToken,
    ) -> Vec<Range> {
        let mut result = Vec::new();
        if search_text.is_empty() {
            return result;
        }

        let counter = count_eol(search_text);
        let lines = counter.eol_count;
        let last_line_length = counter.last_line_length;

        let mut line_number = search_range.start_line.max(1);
        let last_line = search_range.end_line.min(self.line_cnt);

        while line_number + lines <= last_line {
            if cancel.is_cancelled() || result.len() >= limit_result_count {
                break;
            }
            let window = Range::new(
                line_number,
                1,
                line_number + lines,
                self.get_line_length(line_number + lines) + 1,
            );
            let text = self.get_value_in_range(&window);

            let mut last_match_index = text.find(search_text);
            let delta_count = if last_match_index.is_some() { lines + 1 } else { 1 };

            while let Some(index) = last_match_index {
                if result.len() >= limit_result_count || cancel.is_cancelled() {
                    break;
                }
                // a multi-line match ends on the last line of the window
                let start_offset = if lines > 0 { 0 } else { index };
                result.push(Range::new(
                    line_number,
                    index + 1,
                    line_number + lines,
                    start_offset + last_line_length + 1,
                ));

                let next_from = index + last_line_length.max(1);
                last_match_index = text
                    .get(next_from..)
                    .and_then(|rest| rest.find(search_text))
                    .map(|found| found + next_from);
            }

            line_number += delta_count;
        }

        result
    }
}
