//! Offset-based text changes and the compressor that folds two consecutive
//! batches of them into one.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::primitives::strings::escape_new_line;

/// Replacement of `old_text` at `old_position` (before the batch) with
/// `new_text` at `new_position` (after the batch)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChange {
    pub old_position: usize,
    pub old_text: String,
    pub new_position: usize,
    pub new_text: String,
}

impl TextChange {
    pub fn new(old_position: usize, old_text: &str, new_position: usize, new_text: &str) -> Self {
        TextChange {
            old_position,
            old_text: old_text.to_string(),
            new_position,
            new_text: new_text.to_string(),
        }
    }

    pub fn old_length(&self) -> usize {
        self.old_text.len()
    }

    pub fn old_end(&self) -> usize {
        self.old_position + self.old_text.len()
    }

    pub fn new_length(&self) -> usize {
        self.new_text.len()
    }

    pub fn new_end(&self) -> usize {
        self.new_position + self.new_text.len()
    }

    fn length_delta(&self) -> isize {
        self.new_length() as isize - self.old_length() as isize
    }
}

impl fmt::Display for TextChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.old_text.is_empty() {
            return write!(
                f,
                "(insert@{} \"{}\")",
                self.old_position,
                escape_new_line(&self.new_text)
            );
        }
        if self.new_text.is_empty() {
            return write!(
                f,
                "(delete@{} \"{}\")",
                self.old_position,
                escape_new_line(&self.old_text)
            );
        }
        write!(
            f,
            "(replace@{} \"{}\" with \"{}\")",
            self.old_position,
            escape_new_line(&self.old_text),
            escape_new_line(&self.new_text)
        )
    }
}

/// Fold `curr`, applied right after `prev`, into a single equivalent batch
pub fn compress_consecutive_text_changes(
    prev: Option<&[TextChange]>,
    curr: Vec<TextChange>,
) -> Vec<TextChange> {
    match prev {
        None | Some([]) => curr,
        Some(prev) => TextChangeCompressor::new(prev, &curr).compress(),
    }
}

fn split_text(text: &str, offset: usize) -> (String, String) {
    let offset = offset.min(text.len());
    if text.is_char_boundary(offset) {
        let (head, tail) = text.split_at(offset);
        return (head.to_string(), tail.to_string());
    }
    let (head, tail) = text.as_bytes().split_at(offset);
    (
        String::from_utf8_lossy(head).into_owned(),
        String::from_utf8_lossy(tail).into_owned(),
    )
}

struct TextChangeCompressor<'a> {
    prev_edits: &'a [TextChange],
    curr_edits: &'a [TextChange],
    result: Vec<TextChange>,
    prev_delta_offset: isize,
    curr_delta_offset: isize,
}

impl<'a> TextChangeCompressor<'a> {
    fn new(prev_edits: &'a [TextChange], curr_edits: &'a [TextChange]) -> Self {
        TextChangeCompressor {
            prev_edits,
            curr_edits,
            result: Vec::new(),
            prev_delta_offset: 0,
            curr_delta_offset: 0,
        }
    }

    fn compress(mut self) -> Vec<TextChange> {
        let mut prev_index = 0;
        let mut curr_index = 0;

        let mut prev_edit = self.prev_edits.get(prev_index).cloned();
        let mut curr_edit = self.curr_edits.get(curr_index).cloned();

        while prev_index < self.prev_edits.len() || curr_index < self.curr_edits.len() {
            let (prev, curr) = match (prev_edit.take(), curr_edit.take()) {
                (None, Some(curr)) => {
                    self.accept_curr(&curr);
                    curr_index += 1;
                    curr_edit = self.curr_edits.get(curr_index).cloned();
                    continue;
                }
                (Some(prev), None) => {
                    self.accept_prev(&prev);
                    prev_index += 1;
                    prev_edit = self.prev_edits.get(prev_index).cloned();
                    continue;
                }
                (None, None) => break,
                (Some(prev), Some(curr)) => (prev, curr),
            };

            if curr.old_end() <= prev.new_position {
                self.accept_curr(&curr);
                curr_index += 1;
                curr_edit = self.curr_edits.get(curr_index).cloned();
                prev_edit = Some(prev);
                continue;
            }

            if prev.new_end() <= curr.old_position {
                self.accept_prev(&prev);
                prev_index += 1;
                prev_edit = self.prev_edits.get(prev_index).cloned();
                curr_edit = Some(curr);
                continue;
            }

            if curr.old_position < prev.new_position {
                let (head, tail) = split_curr(&curr, prev.new_position - curr.old_position);
                self.accept_curr(&head);
                curr_edit = Some(tail);
                prev_edit = Some(prev);
                continue;
            }

            if prev.new_position < curr.old_position {
                let (head, tail) = split_prev(&prev, curr.old_position - prev.new_position);
                self.accept_prev(&head);
                prev_edit = Some(tail);
                curr_edit = Some(curr);
                continue;
            }

            // curr.old_position == prev.new_position
            let (merge_prev, merge_curr);
            if curr.old_end() == prev.new_end() {
                prev_index += 1;
                curr_index += 1;
                prev_edit = self.prev_edits.get(prev_index).cloned();
                curr_edit = self.curr_edits.get(curr_index).cloned();
                merge_prev = prev;
                merge_curr = curr;
            } else if curr.old_end() < prev.new_end() {
                let (head, tail) = split_prev(&prev, curr.old_length());
                curr_index += 1;
                curr_edit = self.curr_edits.get(curr_index).cloned();
                prev_edit = Some(tail);
                merge_prev = head;
                merge_curr = curr;
            } else {
                let (head, tail) = split_curr(&curr, prev.new_length());
                prev_index += 1;
                prev_edit = self.prev_edits.get(prev_index).cloned();
                curr_edit = Some(tail);
                merge_prev = prev;
                merge_curr = head;
            }

            self.result.push(TextChange {
                old_position: merge_prev.old_position,
                old_text: merge_prev.old_text.clone(),
                new_position: merge_curr.new_position,
                new_text: merge_curr.new_text.clone(),
            });
            self.prev_delta_offset += merge_prev.length_delta();
            self.curr_delta_offset += merge_curr.length_delta();
        }

        remove_no_ops(merge(self.result))
    }

    fn accept_curr(&mut self, curr: &TextChange) {
        // rebase onto the document before `prev`
        self.result.push(TextChange {
            old_position: curr.old_position.wrapping_add_signed(-self.prev_delta_offset),
            old_text: curr.old_text.clone(),
            new_position: curr.new_position,
            new_text: curr.new_text.clone(),
        });
        self.curr_delta_offset += curr.length_delta();
    }

    fn accept_prev(&mut self, prev: &TextChange) {
        // rebase onto the document after `curr`
        self.result.push(TextChange {
            old_position: prev.old_position,
            old_text: prev.old_text.clone(),
            new_position: prev.new_position.wrapping_add_signed(self.curr_delta_offset),
            new_text: prev.new_text.clone(),
        });
        self.prev_delta_offset += prev.length_delta();
    }
}

fn split_prev(edit: &TextChange, offset: usize) -> (TextChange, TextChange) {
    let (pre_text, post_text) = split_text(&edit.new_text, offset);
    (
        TextChange {
            old_position: edit.old_position,
            old_text: edit.old_text.clone(),
            new_position: edit.new_position,
            new_text: pre_text,
        },
        TextChange {
            old_position: edit.old_end(),
            old_text: String::new(),
            new_position: edit.new_position + offset,
            new_text: post_text,
        },
    )
}

fn split_curr(edit: &TextChange, offset: usize) -> (TextChange, TextChange) {
    let (pre_text, post_text) = split_text(&edit.old_text, offset);
    (
        TextChange {
            old_position: edit.old_position,
            old_text: pre_text,
            new_position: edit.new_position,
            new_text: edit.new_text.clone(),
        },
        TextChange {
            old_position: edit.old_position + offset,
            old_text: post_text,
            new_position: edit.new_end(),
            new_text: String::new(),
        },
    )
}

fn merge(edits: Vec<TextChange>) -> Vec<TextChange> {
    let mut result: Vec<TextChange> = Vec::with_capacity(edits.len());
    for curr in edits {
        match result.last_mut() {
            Some(prev) if prev.old_end() == curr.old_position => {
                prev.old_text.push_str(&curr.old_text);
                prev.new_text.push_str(&curr.new_text);
            }
            _ => result.push(curr),
        }
    }
    result
}

fn remove_no_ops(edits: Vec<TextChange>) -> Vec<TextChange> {
    edits
        .into_iter()
        .filter(|edit| edit.old_text != edit.new_text)
        .collect()
}
