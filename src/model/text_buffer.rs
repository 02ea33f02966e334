//! The document façade: queries, search and batched edits over a [`PieceTreeBase`].

use std::fmt;

use regex::bytes::Regex;

use crate::config::BufferConfig;
use crate::model::buffer::StringBuffer;
use crate::model::edit::{
    ApplyEditsResult, ContentChange, EditError, EndOfLine, ReverseEditOperation,
    SingleEditOperation, ValidatedEditOperation,
};
use crate::model::piece_tree::{CancellationToken, PieceTreeBase};
use crate::model::snapshot::PieceTreeSnapshot;
use crate::model::text_change::TextChange;
use crate::primitives::range::{Position, Range};
use crate::primitives::strings::{
    contains_rtl, contains_unusual_line_terminators, count_eol, first_non_whitespace_index,
    into_string, is_basic_ascii, last_non_whitespace_index, normalize_eol,
};

/// What to look for with [`PieceTreeTextBuffer::find`]
#[derive(Debug, Clone)]
pub enum SearchQuery {
    /// A pattern matched within single lines
    Regex(Regex),
    /// A pattern run over the whole range at once; `\n` matches any line ending
    MultilineRegex(Regex),
    /// A literal string, possibly spanning lines
    Word(String),
}

#[derive(Debug, Clone)]
pub struct PieceTreeTextBuffer {
    piece_tree: PieceTreeBase,
    bom: String,
    might_contain_rtl: bool,
    might_contain_unusual_line_terminators: bool,
    might_contain_non_basic_ascii: bool,
    reduce_operations_threshold: usize,
}

impl PieceTreeTextBuffer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        chunks: Vec<StringBuffer>,
        bom: String,
        eol: &str,
        contains_rtl: bool,
        contains_unusual_line_terminators: bool,
        is_basic_ascii: bool,
        eol_normalized: bool,
        config: &BufferConfig,
    ) -> Self {
        PieceTreeTextBuffer {
            piece_tree: PieceTreeBase::with_config(chunks, eol, eol_normalized, config),
            bom,
            might_contain_rtl: contains_rtl,
            might_contain_unusual_line_terminators: contains_unusual_line_terminators,
            might_contain_non_basic_ascii: !is_basic_ascii,
            reduce_operations_threshold: config.reduce_operations_threshold,
        }
    }

    /// Same BOM, same line ending and same content
    pub fn equals(&self, other: &PieceTreeTextBuffer) -> bool {
        self.bom == other.bom
            && self.get_eol() == other.get_eol()
            && self.piece_tree.equal(&other.piece_tree)
    }

    pub fn might_contain_rtl(&self) -> bool {
        self.might_contain_rtl
    }

    pub fn might_contain_unusual_line_terminators(&self) -> bool {
        self.might_contain_unusual_line_terminators
    }

    pub fn reset_might_contain_unusual_line_terminators(&mut self) {
        self.might_contain_unusual_line_terminators = false;
    }

    pub fn might_contain_non_basic_ascii(&self) -> bool {
        self.might_contain_non_basic_ascii
    }

    pub fn get_bom(&self) -> &str {
        &self.bom
    }

    pub fn piece_tree(&self) -> &PieceTreeBase {
        &self.piece_tree
    }

    pub fn create_snapshot(&self, preserve_bom: bool) -> PieceTreeSnapshot {
        let bom = if preserve_bom { self.bom.as_str() } else { "" };
        self.piece_tree.create_snapshot(bom)
    }

    pub fn get_length(&self) -> usize {
        self.piece_tree.get_length()
    }

    pub fn get_offset_at(&self, line_number: usize, column: usize) -> usize {
        self.piece_tree.get_offset_at(line_number, column)
    }

    pub fn get_position_at(&self, offset: usize) -> Position {
        self.piece_tree.get_position_at(offset)
    }

    pub fn get_range_at(&self, start: usize, length: usize) -> Range {
        let start_position = self.get_position_at(start);
        let end_position = self.get_position_at(start + length);
        Range::from_positions(start_position, end_position)
    }

    /// Text of `range` using the document line ending
    pub fn get_value_in_range(&self, range: &Range) -> String {
        self.piece_tree
            .get_value_in_range_with_eol(range, self.piece_tree.get_eol())
    }

    /// Text of `range` with line endings chosen by `eol`
    pub fn get_value_in_range_with_eol(
        &self,
        range: &Range,
        eol: EndOfLine,
    ) -> Result<String, EditError> {
        let line_ending = self.get_end_of_line(eol)?;
        Ok(self.piece_tree.get_value_in_range_with_eol(range, line_ending))
    }

    pub fn get_value_length_in_range(&self, range: &Range) -> usize {
        if range.is_empty() {
            return 0;
        }

        if range.start_line == range.end_line {
            return range.end_column.saturating_sub(range.start_column);
        }

        let start_offset = self.get_offset_at(range.start_line, range.start_column);
        let end_offset = self.get_offset_at(range.end_line, range.end_column);
        end_offset.saturating_sub(start_offset)
    }

    /// Number of characters (not bytes) in `range`, counting each line break as `eol`
    pub fn get_character_count_in_range(
        &self,
        range: &Range,
        eol: EndOfLine,
    ) -> Result<usize, EditError> {
        let line_ending = self.get_end_of_line(eol)?;
        if !self.might_contain_non_basic_ascii {
            return Ok(self.get_value_length_in_range(range));
        }

        // count by iterating
        let mut result = 0;
        let from_line = range.start_line;
        let to_line = range.end_line;
        for line_number in from_line..=to_line {
            let line = self.get_line_content(line_number).into_bytes();
            let to = if line_number == to_line {
                range.end_column.saturating_sub(1).min(line.len())
            } else {
                line.len()
            };
            let from = if line_number == from_line {
                range.start_column.saturating_sub(1).min(to)
            } else {
                0
            };
            result += into_string(line[from..to].to_vec()).chars().count();
        }

        result += line_ending.len() * (to_line - from_line);
        Ok(result)
    }

    pub fn get_line_count(&self) -> usize {
        self.piece_tree.get_line_count()
    }

    pub fn get_lines_content(&self) -> Vec<String> {
        self.piece_tree.get_lines_content()
    }

    pub fn get_line_content(&self, line_number: usize) -> String {
        self.piece_tree.get_line_content(line_number)
    }

    pub fn get_line_content_with_eol(&self, line_number: usize) -> String {
        self.piece_tree.get_line_content_with_eol(line_number)
    }

    pub fn get_line_char_code(&self, line_number: usize, index: usize) -> u8 {
        self.piece_tree.get_line_char_code(line_number, index)
    }

    pub fn get_char_code(&self, offset: usize) -> u8 {
        self.piece_tree.get_char_code(offset)
    }

    pub fn get_line_length(&self, line_number: usize) -> usize {
        self.piece_tree.get_line_length(line_number)
    }

    pub fn get_line_min_column(&self, _line_number: usize) -> usize {
        1
    }

    pub fn get_line_max_column(&self, line_number: usize) -> usize {
        self.get_line_length(line_number) + 1
    }

    /// 1-based column of the first byte that is not a space or tab, 0 for a blank line
    pub fn get_line_first_non_whitespace_column(&self, line_number: usize) -> usize {
        first_non_whitespace_index(&self.get_line_content(line_number)).map_or(0, |i| i + 1)
    }

    /// 1-based column just after the last byte that is not a space or tab, 0 for a blank line
    pub fn get_line_last_non_whitespace_column(&self, line_number: usize) -> usize {
        last_non_whitespace_index(&self.get_line_content(line_number)).map_or(0, |i| i + 2)
    }

    /// Text following `offset` up to the end of the piece holding it
    pub fn get_nearest_chunk(&self, offset: usize) -> String {
        self.piece_tree.get_nearest_chunk(offset)
    }

    fn get_end_of_line(&self, eol: EndOfLine) -> Result<&str, EditError> {
        match eol {
            EndOfLine::Lf => Ok("\n"),
            EndOfLine::Crlf => Ok("\r\n"),
            EndOfLine::TextDefined => Ok(self.get_eol()),
            EndOfLine::Invalid => Err(EditError::UnknownEndOfLine(eol)),
        }
    }

    /// Rewrite every line ending to `eol`
    pub fn set_eol(&mut self, eol: EndOfLine) -> Result<(), EditError> {
        let line_ending = self.get_end_of_line(eol)?.to_string();
        self.piece_tree.set_eol(&line_ending);
        Ok(())
    }

    pub fn get_eol(&self) -> &str {
        self.piece_tree.get_eol()
    }

    /// Clamp `range` into the document: lines to `[1, line_count]`, columns
    /// to `[1, max_column]` of their line
    pub fn validate_range(&self, range: &Range) -> Range {
        let start = self.validate_position(range.start_position());
        let end = self.validate_position(range.end_position());
        Range::from_positions(start, end)
    }

    fn validate_position(&self, position: Position) -> Position {
        let line_count = self.get_line_count();
        let line_number = position.line_number.clamp(1, line_count);
        let max_column = self.get_line_max_column(line_number);
        Position::new(line_number, position.column.clamp(1, max_column))
    }

    pub fn find(
        &self,
        query: &SearchQuery,
        search_range: &Range,
        limit_result_count: usize,
        cancel: &dyn CancellationToken,
    ) -> Vec<Range> {
        let search_range = &self.validate_range(search_range);
        let result = match query {
            SearchQuery::Regex(regex) => self.piece_tree.find_matches_line_by_line(
                regex,
                search_range,
                limit_result_count,
                cancel,
            ),
            SearchQuery::MultilineRegex(regex) => self.piece_tree.find_matches_by_multiline(
                regex,
                search_range,
                limit_result_count,
                cancel,
            ),
            SearchQuery::Word(word) => self.piece_tree.find_matches_by_word(
                word,
                search_range,
                limit_result_count,
                cancel,
            ),
        };
        tracing::trace!(range = %search_range, matches = result.len(), "search finished");
        result
    }

    /// Apply a batch of edits, all expressed against the current document.
    ///
    /// Nothing is changed when two ranges overlap; touching ranges are fine.
    pub fn apply_edits(
        &mut self,
        raw_operations: &[SingleEditOperation],
        record_trim_auto_whitespace: bool,
        compute_undo_edits: bool,
    ) -> Result<ApplyEditsResult, EditError> {
        let mut might_contain_rtl = self.might_contain_rtl;
        let mut might_contain_unusual_line_terminators =
            self.might_contain_unusual_line_terminators;
        let mut might_contain_non_basic_ascii = self.might_contain_non_basic_ascii;
        let can_reduce_operations = raw_operations.len() >= self.reduce_operations_threshold
            && raw_operations.iter().all(|op| op.identifier.is_none());

        let buffer_eol = self.get_eol().to_string();
        let expected_eol = EndOfLine::from_eol_str(&buffer_eol);

        let mut operations = Vec::with_capacity(raw_operations.len());
        for (i, op) in raw_operations.iter().enumerate() {
            let text = op.text.as_deref().unwrap_or("");
            let counter = count_eol(text);

            let valid_text = if text.is_empty() {
                String::new()
            } else {
                let text_might_contain_non_basic_ascii = if might_contain_non_basic_ascii {
                    true
                } else {
                    might_contain_non_basic_ascii = !is_basic_ascii(text);
                    might_contain_non_basic_ascii
                };
                if !might_contain_rtl && text_might_contain_non_basic_ascii {
                    // check if the new inserted text contains RTL
                    might_contain_rtl = contains_rtl(text);
                }
                if !might_contain_unusual_line_terminators && text_might_contain_non_basic_ascii {
                    might_contain_unusual_line_terminators =
                        contains_unusual_line_terminators(text);
                }

                if counter.eol == EndOfLine::TextDefined || counter.eol == expected_eol {
                    text.to_string()
                } else {
                    normalize_eol(text, &buffer_eol)
                }
            };

            let validated_range = self.validate_range(&op.range);
            operations.push(ValidatedEditOperation {
                sort_index: i,
                identifier: op.identifier,
                range: validated_range,
                range_offset: self
                    .get_offset_at(validated_range.start_line, validated_range.start_column),
                range_length: self.get_value_length_in_range(&validated_range),
                text: valid_text,
                eol_count: counter.eol_count,
                first_line_length: counter.first_line_length,
                last_line_length: counter.last_line_length,
                force_move_markers: op.force_move_markers,
                is_auto_whitespace_edit: op.is_auto_whitespace_edit,
            });
        }

        // sort operations ascending
        operations.sort_by(|a, b| {
            Range::compare_ranges_using_ends(&a.range, &b.range)
                .then(a.sort_index.cmp(&b.sort_index))
        });

        let mut has_touching_ranges = false;
        for pair in operations.windows(2) {
            let range_end = pair[0].range.end_position();
            let next_range_start = pair[1].range.start_position();

            if next_range_start.is_before_or_equal(&range_end) {
                if next_range_start.is_before(&range_end) {
                    tracing::debug!(
                        first = %pair[0].range,
                        second = %pair[1].range,
                        "rejecting overlapping edits"
                    );
                    return Err(EditError::OverlappingRanges {
                        first: pair[0].range,
                        second: pair[1].range,
                    });
                }
                has_touching_ranges = true;
            }
        }

        if can_reduce_operations {
            tracing::debug!(
                operations = operations.len(),
                "collapsing edits into a single operation"
            );
            operations = vec![self.to_single_edit_operation(&operations)];
        }

        // delta encode operations
        let reverse_ranges = if compute_undo_edits || record_trim_auto_whitespace {
            Self::get_inverse_edit_ranges(&operations)
        } else {
            Vec::new()
        };

        let mut new_trim_auto_whitespace_candidates: Vec<(usize, String)> = Vec::new();
        if record_trim_auto_whitespace {
            for (op, reverse_range) in operations.iter().zip(&reverse_ranges) {
                if !(op.is_auto_whitespace_edit && op.range.is_empty()) {
                    continue;
                }
                // record the future line numbers that might be auto whitespace
                // removal candidates on the next edit
                for line_number in reverse_range.start_line..=reverse_range.end_line {
                    let mut current_line_content = String::new();
                    if line_number == reverse_range.start_line {
                        current_line_content = self.get_line_content(op.range.start_line);
                        if first_non_whitespace_index(&current_line_content).is_some() {
                            continue;
                        }
                    }
                    new_trim_auto_whitespace_candidates.push((line_number, current_line_content));
                }
            }
        }

        let mut reverse_operations = None;
        if compute_undo_edits {
            let mut reverse_range_delta_offset: isize = 0;
            let mut reverse_ops = Vec::with_capacity(operations.len());
            for (op, reverse_range) in operations.iter().zip(&reverse_ranges) {
                let buffer_text = self.get_value_in_range(&op.range);
                let reverse_range_offset =
                    op.range_offset.wrapping_add_signed(reverse_range_delta_offset);
                reverse_range_delta_offset += op.text.len() as isize - buffer_text.len() as isize;

                reverse_ops.push(ReverseEditOperation {
                    sort_index: op.sort_index,
                    identifier: op.identifier,
                    range: *reverse_range,
                    text_change: TextChange::new(
                        op.range_offset,
                        &buffer_text,
                        reverse_range_offset,
                        &op.text,
                    ),
                    text: buffer_text,
                });
            }

            // only sort when the order is not significant
            if !has_touching_ranges {
                reverse_ops.sort_by_key(|op| op.sort_index);
            }
            reverse_operations = Some(reverse_ops);
        }

        self.might_contain_rtl = might_contain_rtl;
        self.might_contain_unusual_line_terminators = might_contain_unusual_line_terminators;
        self.might_contain_non_basic_ascii = might_contain_non_basic_ascii;

        let changes = self.do_apply_edits(operations);

        let mut trim_auto_whitespace_line_numbers = None;
        if record_trim_auto_whitespace && !new_trim_auto_whitespace_candidates.is_empty() {
            // descending, for the next edit
            new_trim_auto_whitespace_candidates.sort_by(|a, b| b.0.cmp(&a.0));

            let mut line_numbers = Vec::new();
            for (i, (line_number, prev_content)) in
                new_trim_auto_whitespace_candidates.iter().enumerate()
            {
                if i > 0 && new_trim_auto_whitespace_candidates[i - 1].0 == *line_number {
                    // do not have the same line number twice
                    continue;
                }

                let line_content = self.get_line_content(*line_number);
                if line_content.is_empty()
                    || line_content == *prev_content
                    || first_non_whitespace_index(&line_content).is_some()
                {
                    continue;
                }

                line_numbers.push(*line_number);
            }
            trim_auto_whitespace_line_numbers = Some(line_numbers);
        }

        tracing::debug!(
            operations = raw_operations.len(),
            changes = changes.len(),
            length = self.get_length(),
            "applied edits"
        );

        Ok(ApplyEditsResult {
            changes,
            reverse_edits: reverse_operations,
            trim_auto_whitespace_line_numbers,
        })
    }

    /// One edit equivalent to `operations`, which must be validated and
    /// sorted ascending. Its text is the new text interleaved with the
    /// untouched text between the original ranges.
    pub fn to_single_edit_operation(
        &self,
        operations: &[ValidatedEditOperation],
    ) -> ValidatedEditOperation {
        let Some((first, last)) = operations.first().zip(operations.last()) else {
            return ValidatedEditOperation {
                sort_index: 0,
                identifier: None,
                range: Range::new(1, 1, 1, 1),
                range_offset: 0,
                range_length: 0,
                text: String::new(),
                eol_count: 0,
                first_line_length: 0,
                last_line_length: 0,
                force_move_markers: false,
                is_auto_whitespace_edit: false,
            };
        };

        let mut force_move_markers = false;
        let entire_edit_range = Range::new(
            first.range.start_line,
            first.range.start_column,
            last.range.end_line,
            last.range.end_column,
        );
        let mut last_end_line_number = first.range.start_line;
        let mut last_end_column = first.range.start_column;
        let mut result = String::new();

        for op in operations {
            let range = op.range;

            force_move_markers = force_move_markers || op.force_move_markers;

            // (1) old text
            result.push_str(&self.get_value_in_range(&Range::new(
                last_end_line_number,
                last_end_column,
                range.start_line,
                range.start_column,
            )));

            // (2) new text
            result.push_str(&op.text);

            last_end_line_number = range.end_line;
            last_end_column = range.end_column;
        }

        let counter = count_eol(&result);
        ValidatedEditOperation {
            sort_index: 0,
            identifier: first.identifier,
            range: entire_edit_range,
            range_offset: self.get_offset_at(entire_edit_range.start_line, entire_edit_range.start_column),
            range_length: self.get_value_length_in_range(&entire_edit_range),
            text: result,
            eol_count: counter.eol_count,
            first_line_length: counter.first_line_length,
            last_line_length: counter.last_line_length,
            force_move_markers,
            is_auto_whitespace_edit: false,
        }
    }

    fn do_apply_edits(&mut self, mut operations: Vec<ValidatedEditOperation>) -> Vec<ContentChange> {
        // bottom to top, so earlier offsets stay valid
        operations.sort_by(|a, b| {
            Range::compare_ranges_using_ends(&b.range, &a.range)
                .then(b.sort_index.cmp(&a.sort_index))
        });

        let mut changes = Vec::with_capacity(operations.len());
        for op in operations {
            self.piece_tree.delete(op.range_offset, op.range_length);

            if !op.text.is_empty() {
                self.piece_tree.insert(op.range_offset, &op.text, true);
            }

            changes.push(ContentChange {
                range: op.range,
                range_offset: op.range_offset,
                range_length: op.range_length,
                text: op.text,
                force_move_markers: op.force_move_markers,
            });
        }
        changes
    }

    /// Where `text` ends up when it replaces `range`
    pub fn get_inverse_edit_range(range: &Range, text: &str) -> Range {
        let start_line = range.start_line;
        let start_column = range.start_column;
        if text.is_empty() {
            // nothing to insert
            return Range::new(start_line, start_column, start_line, start_column);
        }

        let counter = count_eol(text);
        if counter.eol_count == 0 {
            Range::new(
                start_line,
                start_column,
                start_line,
                start_column + counter.first_line_length,
            )
        } else {
            Range::new(
                start_line,
                start_column,
                start_line + counter.eol_count,
                counter.last_line_length + 1,
            )
        }
    }

    /// The ranges each operation's text occupies once the whole batch is
    /// applied. `operations` must be validated and sorted ascending.
    pub fn get_inverse_edit_ranges(operations: &[ValidatedEditOperation]) -> Vec<Range> {
        let mut result = Vec::with_capacity(operations.len());

        let mut prev_op_end_line_number = 0;
        let mut prev_op_end_column = 0;
        let mut prev_op: Option<&ValidatedEditOperation> = None;
        for op in operations {
            let (start_line_number, start_column) = match prev_op {
                Some(prev) if prev.range.end_line == op.range.start_line => (
                    prev_op_end_line_number,
                    prev_op_end_column + (op.range.start_column - prev.range.end_column),
                ),
                Some(prev) => (
                    prev_op_end_line_number + (op.range.start_line - prev.range.end_line),
                    op.range.start_column,
                ),
                None => (op.range.start_line, op.range.start_column),
            };

            let result_range = if op.text.is_empty() {
                Range::new(start_line_number, start_column, start_line_number, start_column)
            } else if op.eol_count == 0 {
                // single line insert
                Range::new(
                    start_line_number,
                    start_column,
                    start_line_number,
                    start_column + op.first_line_length,
                )
            } else {
                Range::new(
                    start_line_number,
                    start_column,
                    start_line_number + op.eol_count,
                    op.last_line_length + 1,
                )
            };

            prev_op_end_line_number = result_range.end_line;
            prev_op_end_column = result_range.end_column;

            result.push(result_range);
            prev_op = Some(op);
        }

        result
    }
}

impl fmt::Display for PieceTreeTextBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in self.create_snapshot(false) {
            f.write_str(&chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultEol;
    use crate::model::builder::PieceTreeTextBufferBuilder;
    use crate::model::piece_tree::NeverCancel;

    fn buffer(text: &str) -> PieceTreeTextBuffer {
        let mut builder = PieceTreeTextBufferBuilder::new();
        builder.accept_chunk(text);
        builder.build(DefaultEol::Lf, true)
    }

    fn validated(
        buffer: &PieceTreeTextBuffer,
        range: Range,
        text: &str,
        sort_index: usize,
    ) -> ValidatedEditOperation {
        let counter = count_eol(text);
        ValidatedEditOperation {
            sort_index,
            identifier: None,
            range,
            range_offset: buffer.get_offset_at(range.start_line, range.start_column),
            range_length: buffer.get_value_length_in_range(&range),
            text: text.to_string(),
            eol_count: counter.eol_count,
            first_line_length: counter.first_line_length,
            last_line_length: counter.last_line_length,
            force_move_markers: false,
            is_auto_whitespace_edit: false,
        }
    }

    #[test]
    fn test_apply_edits_touching_ranges() {
        let mut buf = buffer("abcdef");
        let result = buf
            .apply_edits(
                &[
                    SingleEditOperation::new(Range::new(1, 1, 1, 3), Some("X")),
                    SingleEditOperation::new(Range::new(1, 3, 1, 5), Some("Y")),
                ],
                false,
                true,
            )
            .unwrap();
        assert_eq!(buf.to_string(), "XYef");
        assert_eq!(result.changes.len(), 2);
        // applied bottom to top
        assert_eq!(result.changes[0].range, Range::new(1, 3, 1, 5));
        let reverse = result.reverse_edits.unwrap();
        assert_eq!(reverse[0].range, Range::new(1, 1, 1, 2));
        assert_eq!(reverse[0].text, "ab");
        assert_eq!(reverse[1].range, Range::new(1, 2, 1, 3));
        assert_eq!(reverse[1].text, "cd");
    }

    #[test]
    fn test_apply_edits_rejects_overlap_without_changes() {
        let mut buf = buffer("abcdef");
        let err = buf
            .apply_edits(
                &[
                    SingleEditOperation::new(Range::new(1, 1, 1, 4), Some("X")),
                    SingleEditOperation::new(Range::new(1, 3, 1, 5), Some("Y")),
                ],
                false,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, EditError::OverlappingRanges { .. }));
        assert_eq!(buf.to_string(), "abcdef");
    }

    #[test]
    fn test_undo_round_trip() {
        let mut buf = buffer("line one\nline two\nline three");
        let result = buf
            .apply_edits(
                &[
                    SingleEditOperation::new(Range::new(1, 6, 1, 9), Some("1\nand a half")),
                    SingleEditOperation::delete(Range::new(2, 1, 3, 6)),
                ],
                false,
                true,
            )
            .unwrap();
        assert_eq!(buf.to_string(), "line 1\nand a half\nthree");

        let undo: Vec<SingleEditOperation> = result
            .reverse_edits
            .unwrap()
            .iter()
            .map(ReverseEditOperation::to_edit_operation)
            .collect();
        buf.apply_edits(&undo, false, false).unwrap();
        assert_eq!(buf.to_string(), "line one\nline two\nline three");
    }

    #[test]
    fn test_inserted_text_takes_document_line_ending() {
        let mut builder = PieceTreeTextBufferBuilder::new();
        builder.accept_chunk("a\r\nb");
        let mut buf = builder.build(DefaultEol::Lf, true);
        assert_eq!(buf.get_eol(), "\r\n");

        buf.apply_edits(&[SingleEditOperation::insert(2, 2, "\nc\nd")], false, false)
            .unwrap();
        assert_eq!(buf.to_string(), "a\r\nb\r\nc\r\nd");
        assert_eq!(buf.get_line_count(), 4);
    }

    #[test]
    fn test_flags_are_monotonic() {
        let mut buf = buffer("plain");
        assert!(!buf.might_contain_non_basic_ascii());
        buf.apply_edits(&[SingleEditOperation::insert(1, 1, "שלום\u{2028}")], false, false)
            .unwrap();
        assert!(buf.might_contain_non_basic_ascii());
        assert!(buf.might_contain_rtl());
        assert!(buf.might_contain_unusual_line_terminators());

        buf.apply_edits(&[SingleEditOperation::delete(Range::new(1, 1, 1, 12))], false, false)
            .unwrap();
        assert!(buf.might_contain_rtl());

        buf.reset_might_contain_unusual_line_terminators();
        assert!(!buf.might_contain_unusual_line_terminators());
    }

    #[test]
    fn test_validate_range_clamps() {
        let buf = buffer("ab\ncde");
        assert_eq!(buf.validate_range(&Range::new(0, 0, 9, 9)), Range::new(1, 1, 2, 4));
        assert_eq!(buf.validate_range(&Range::new(1, 7, 2, 2)), Range::new(1, 3, 2, 2));
    }

    #[test]
    fn test_inverse_edit_ranges() {
        let buf = buffer("line1\nline2\nline3\nline4");
        let ops = vec![
            validated(&buf, Range::new(1, 1, 1, 1), "a\nbb", 0),
            validated(&buf, Range::new(1, 3, 2, 2), "", 1),
            validated(&buf, Range::new(3, 2, 3, 4), "xyz", 2),
        ];
        assert_eq!(
            PieceTreeTextBuffer::get_inverse_edit_ranges(&ops),
            vec![
                Range::new(1, 1, 2, 3),
                Range::new(2, 5, 2, 5),
                Range::new(3, 2, 3, 5),
            ]
        );
        assert_eq!(
            PieceTreeTextBuffer::get_inverse_edit_range(&Range::new(2, 4, 3, 1), "ab\ncd"),
            Range::new(2, 4, 3, 3)
        );
    }

    #[test]
    fn test_to_single_edit_operation() {
        let buf = buffer("My First Line\nMy Second Line\nThird Line");
        let ops = vec![
            validated(&buf, Range::new(1, 1, 1, 3), "Your", 0),
            validated(&buf, Range::new(1, 4, 1, 4), "Interesting ", 1),
            validated(&buf, Range::new(2, 3, 2, 6), "", 2),
        ];
        let single = buf.to_single_edit_operation(&ops);
        assert_eq!(single.range, Range::new(1, 1, 2, 6));
        assert_eq!(single.range_offset, 0);
        assert_eq!(single.range_length, 19);
        assert_eq!(single.text, "Your Interesting First Line\nMy");
        assert_eq!(single.eol_count, 1);
    }

    #[test]
    fn test_reduced_batch_matches_individual_edits() {
        let text = "x".repeat(40);
        let config = BufferConfig {
            reduce_operations_threshold: 5,
            ..BufferConfig::default()
        };
        let mut builder = PieceTreeTextBufferBuilder::with_config(config);
        builder.accept_chunk(&text);
        let mut reduced = builder.build(DefaultEol::Lf, true);
        let mut plain = buffer(&text);

        let ops: Vec<SingleEditOperation> = (0..8)
            .map(|i| SingleEditOperation::new(Range::new(1, 1 + i * 4, 1, 2 + i * 4), Some("\n")))
            .collect();
        let result = reduced.apply_edits(&ops, false, false).unwrap();
        assert_eq!(result.changes.len(), 1);
        plain.apply_edits(&ops, false, false).unwrap();
        assert_eq!(reduced.to_string(), plain.to_string());
        assert_eq!(reduced.get_line_count(), 9);
    }

    #[test]
    fn test_trim_auto_whitespace_candidates() {
        let mut buf = buffer("a\n\nb");
        let result = buf
            .apply_edits(
                &[SingleEditOperation::insert(2, 1, "    ").with_auto_whitespace(true)],
                true,
                false,
            )
            .unwrap();
        assert_eq!(result.trim_auto_whitespace_line_numbers, Some(vec![2]));

        let result = buf
            .apply_edits(
                &[SingleEditOperation::insert(1, 2, "x").with_auto_whitespace(true)],
                true,
                false,
            )
            .unwrap();
        assert_eq!(result.trim_auto_whitespace_line_numbers, None);
    }

    #[test]
    fn test_line_queries() {
        let buf = buffer("  hello \t\n\t\n");
        assert_eq!(buf.get_line_first_non_whitespace_column(1), 3);
        assert_eq!(buf.get_line_last_non_whitespace_column(1), 8);
        assert_eq!(buf.get_line_first_non_whitespace_column(2), 0);
        assert_eq!(buf.get_line_max_column(1), 10);
        assert_eq!(buf.get_line_min_column(3), 1);
        assert_eq!(buf.get_line_content_with_eol(2), "\t\n");
        assert_eq!(buf.get_range_at(2, 9), Range::new(1, 3, 2, 2));
    }

    #[test]
    fn test_character_count_counts_chars() {
        let buf = buffer("héllo\nwörld");
        let range = Range::new(1, 1, 2, 7);
        assert_eq!(buf.get_value_length_in_range(&range), 13);
        assert_eq!(buf.get_character_count_in_range(&range, EndOfLine::Lf).unwrap(), 11);
        assert_eq!(buf.get_character_count_in_range(&range, EndOfLine::Crlf).unwrap(), 12);
        assert!(buf
            .get_character_count_in_range(&range, EndOfLine::Invalid)
            .is_err());
    }

    #[test]
    fn test_find_dispatches_on_query() {
        let buf = buffer("foo\nbar foo");
        let all = Range::new(1, 1, 2, 8);
        let word = buf.find(&SearchQuery::Word("foo".into()), &all, 10, &NeverCancel);
        assert_eq!(word, vec![Range::new(1, 1, 1, 4), Range::new(2, 5, 2, 8)]);

        let multi = buf.find(
            &SearchQuery::MultilineRegex(Regex::new(r"o\nb").unwrap()),
            &all,
            10,
            &NeverCancel,
        );
        assert_eq!(multi, vec![Range::new(1, 3, 2, 2)]);

        let single = buf.find(
            &SearchQuery::Regex(Regex::new(r"o\nb").unwrap()),
            &all,
            10,
            &NeverCancel,
        );
        assert!(single.is_empty());
    }

    #[test]
    fn test_find_clamps_the_search_range() {
        let buf = buffer("foo\nbar foo");
        let regex = SearchQuery::Regex(Regex::new("o+").unwrap());

        let ret = buf.find(&regex, &Range::new(0, 0, 9, 99), 10, &NeverCancel);
        assert_eq!(ret, vec![Range::new(1, 2, 1, 4), Range::new(2, 6, 2, 8)]);

        let ret = buf.find(&regex, &Range::new(1, 0, 1, 0), 10, &NeverCancel);
        assert!(ret.is_empty());

        let word = buf.find(&SearchQuery::Word("bar".into()), &Range::new(2, 0, 2, 0), 10, &NeverCancel);
        assert_eq!(word, vec![Range::new(2, 1, 2, 4)]);
    }

    #[test]
    fn test_set_eol_and_equals() {
        let mut a = buffer("a\nb");
        let b = buffer("a\nb");
        assert!(a.equals(&b));
        a.set_eol(EndOfLine::Crlf).unwrap();
        assert!(!a.equals(&b));
        assert_eq!(a.to_string(), "a\r\nb");
        assert!(matches!(
            a.set_eol(EndOfLine::Invalid),
            Err(EditError::UnknownEndOfLine(EndOfLine::Invalid))
        ));
    }
}
