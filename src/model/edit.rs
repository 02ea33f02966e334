use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::text_change::TextChange;
use crate::primitives::range::Range;

/// Line ending of a text or preferred by a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOfLine {
    /// Use whatever the text buffer already uses (also: text without any terminator)
    TextDefined,
    /// `\n`
    Lf,
    /// `\r\n`
    Crlf,
    /// A bare `\r`, or a mix of terminators
    Invalid,
}

impl EndOfLine {
    /// The terminator string, `None` for the variants that do not name one
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            EndOfLine::Lf => Some("\n"),
            EndOfLine::Crlf => Some("\r\n"),
            EndOfLine::TextDefined | EndOfLine::Invalid => None,
        }
    }

    pub fn from_eol_str(eol: &str) -> Self {
        match eol {
            "\n" => EndOfLine::Lf,
            "\r\n" => EndOfLine::Crlf,
            _ => EndOfLine::Invalid,
        }
    }
}

/// Groups edit operations that belong together (e.g. one undo stop)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Identifier {
    pub major: u32,
    pub minor: u32,
}

/// One edit as supplied by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleEditOperation {
    /// The range to replace; empty for a pure insert
    pub range: Range,
    /// Replacement text; `None` or empty for a pure delete
    pub text: Option<String>,
    #[serde(default)]
    pub identifier: Option<Identifier>,
    /// Insert semantics: markers at a collapsed range move with the text
    #[serde(default)]
    pub force_move_markers: bool,
    /// The text is whitespace the editor added on its own and may trim later
    #[serde(default)]
    pub is_auto_whitespace_edit: bool,
}

impl SingleEditOperation {
    pub fn new(range: Range, text: Option<&str>) -> Self {
        SingleEditOperation {
            range,
            text: text.map(str::to_string),
            identifier: None,
            force_move_markers: false,
            is_auto_whitespace_edit: false,
        }
    }

    pub fn insert(line_number: usize, column: usize, text: &str) -> Self {
        Self::new(Range::new(line_number, column, line_number, column), Some(text))
    }

    pub fn delete(range: Range) -> Self {
        Self::new(range, None)
    }

    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn with_force_move_markers(mut self, force_move_markers: bool) -> Self {
        self.force_move_markers = force_move_markers;
        self
    }

    pub fn with_auto_whitespace(mut self, is_auto_whitespace_edit: bool) -> Self {
        self.is_auto_whitespace_edit = is_auto_whitespace_edit;
        self
    }
}

/// An edit resolved against the current document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEditOperation {
    pub sort_index: usize,
    pub identifier: Option<Identifier>,
    pub range: Range,
    pub range_offset: usize,
    pub range_length: usize,
    /// Replacement text with line endings already matching the document
    pub text: String,
    pub eol_count: usize,
    pub first_line_length: usize,
    pub last_line_length: usize,
    pub force_move_markers: bool,
    pub is_auto_whitespace_edit: bool,
}

/// The edit that undoes one applied edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseEditOperation {
    pub sort_index: usize,
    pub identifier: Option<Identifier>,
    /// Where the replacement text ended up
    pub range: Range,
    /// The text that was replaced
    pub text: String,
    pub text_change: TextChange,
}

impl ReverseEditOperation {
    /// Feed this reverse edit back into `apply_edits`
    pub fn to_edit_operation(&self) -> SingleEditOperation {
        SingleEditOperation {
            range: self.range,
            text: Some(self.text.clone()),
            identifier: self.identifier,
            force_move_markers: false,
            is_auto_whitespace_edit: false,
        }
    }
}

/// One change as it was applied to the document, in application order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChange {
    pub range: Range,
    pub range_offset: usize,
    pub range_length: usize,
    pub text: String,
    pub force_move_markers: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplyEditsResult {
    pub changes: Vec<ContentChange>,
    pub reverse_edits: Option<Vec<ReverseEditOperation>>,
    pub trim_auto_whitespace_line_numbers: Option<Vec<usize>>,
}

/// Contract violations reported by edit operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    /// Two ranges of one `apply_edits` call overlap
    OverlappingRanges { first: Range, second: Range },
    /// A line ending preference that does not name `\n` or `\r\n`
    UnknownEndOfLine(EndOfLine),
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditError::OverlappingRanges { first, second } => {
                write!(f, "Overlapping ranges are not allowed: {first} and {second}")
            }
            EditError::UnknownEndOfLine(eol) => write!(f, "Unknown end of line: {eol:?}"),
        }
    }
}

impl std::error::Error for EditError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_line_strings() {
        assert_eq!(EndOfLine::Lf.as_str(), Some("\n"));
        assert_eq!(EndOfLine::Crlf.as_str(), Some("\r\n"));
        assert_eq!(EndOfLine::Invalid.as_str(), None);
        assert_eq!(EndOfLine::from_eol_str("\r\n"), EndOfLine::Crlf);
        assert_eq!(EndOfLine::from_eol_str("\r"), EndOfLine::Invalid);
    }

    #[test]
    fn test_edit_error_display() {
        let err = EditError::OverlappingRanges {
            first: Range::new(1, 1, 1, 3),
            second: Range::new(1, 2, 1, 4),
        };
        assert_eq!(
            err.to_string(),
            "Overlapping ranges are not allowed: [1,1 -> 1,3] and [1,2 -> 1,4]"
        );
    }

    #[test]
    fn test_operation_json_defaults() {
        let json = r#"{"range":{"start_line":1,"start_column":1,"end_line":1,"end_column":1},"text":"x"}"#;
        let op: SingleEditOperation = serde_json::from_str(json).unwrap();
        assert_eq!(op, SingleEditOperation::insert(1, 1, "x"));
    }
}
