//! Accumulates raw text chunks and turns them into a [`PieceTreeTextBuffer`].

use crate::config::{BufferConfig, DefaultEol};
use crate::model::buffer::{create_line_starts, StringBuffer};
use crate::model::text_buffer::PieceTreeTextBuffer;
use crate::primitives::strings::{
    contains_rtl, contains_unusual_line_terminators, replace_line_terminators,
    starts_with_utf8_bom, UTF8_BOM,
};

/// Collects a document delivered in chunks (e.g. while reading a file)
#[derive(Debug, Default)]
pub struct PieceTreeTextBufferBuilder {
    chunks: Vec<StringBuffer>,
    bom: String,
    /// The previous chunk ended in `\r`, which has not been stored yet
    has_previous_cr: bool,
    cr: usize,
    lf: usize,
    crlf: usize,
    contains_rtl: bool,
    contains_unusual_line_terminators: bool,
    is_basic_ascii: bool,
    config: BufferConfig,
}

impl PieceTreeTextBufferBuilder {
    pub fn new() -> Self {
        Self::with_config(BufferConfig::default())
    }

    pub fn with_config(config: BufferConfig) -> Self {
        PieceTreeTextBufferBuilder {
            is_basic_ascii: true,
            config,
            ..Default::default()
        }
    }

    pub fn accept_chunk(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }

        let mut chunk = text;
        if self.chunks.is_empty() && !self.has_previous_cr && starts_with_utf8_bom(chunk) {
            self.bom = UTF8_BOM.to_string();
            chunk = &chunk[UTF8_BOM.len()..];
        }

        match chunk.strip_suffix('\r') {
            Some(head) => {
                // keep the `\r` back, the next chunk may start with `\n`
                self.accept_chunk1(head, false);
                self.has_previous_cr = true;
            }
            None => {
                self.accept_chunk1(chunk, false);
                self.has_previous_cr = false;
            }
        }
    }

    fn accept_chunk1(&mut self, chunk: &str, allow_empty_strings: bool) {
        if self.has_previous_cr {
            let mut joined = String::with_capacity(chunk.len() + 1);
            joined.push('\r');
            joined.push_str(chunk);
            self.accept_chunk2(joined);
        } else if allow_empty_strings || !chunk.is_empty() {
            self.accept_chunk2(chunk.to_string());
        }
    }

    fn accept_chunk2(&mut self, chunk: String) {
        let line_starts = create_line_starts(chunk.as_bytes());
        self.cr += line_starts.cr;
        self.lf += line_starts.lf;
        self.crlf += line_starts.crlf;

        if !line_starts.is_basic_ascii {
            self.is_basic_ascii = false;
            if !self.contains_rtl {
                self.contains_rtl = contains_rtl(&chunk);
            }
            if !self.contains_unusual_line_terminators {
                self.contains_unusual_line_terminators = contains_unusual_line_terminators(&chunk);
            }
        }

        self.chunks.push(StringBuffer::with_line_starts(
            chunk.into_bytes(),
            line_starts.line_starts,
        ));
    }

    fn get_eol(&self, default_eol: DefaultEol) -> &'static str {
        let total_eol_count = self.cr + self.lf + self.crlf;
        let total_cr_count = self.cr + self.crlf;
        if total_eol_count == 0 {
            // empty file or a single line
            return default_eol.as_str();
        }
        if total_cr_count > total_eol_count / 2 {
            // more than half of the lines end in \r\n
            return "\r\n";
        }
        "\n"
    }

    /// Finish the document. `default_eol` applies only when the text has no
    /// line terminator; with `normalize_eol` every terminator is rewritten to
    /// the detected one.
    pub fn build(mut self, default_eol: DefaultEol, normalize_eol: bool) -> PieceTreeTextBuffer {
        if self.has_previous_cr {
            self.has_previous_cr = false;
            match self.chunks.last_mut() {
                Some(last) => {
                    let mut data = std::mem::take(&mut last.data);
                    data.push(b'\r');
                    *last = StringBuffer::new(data);
                    self.cr += 1;
                }
                None => self.accept_chunk2("\r".to_string()),
            }
        }

        if self.chunks.is_empty() {
            self.accept_chunk2(String::new());
        }

        let eol = self.get_eol(default_eol);

        let needs_normalization = (eol == "\r\n" && (self.cr > 0 || self.lf > 0))
            || (eol == "\n" && (self.cr > 0 || self.crlf > 0));
        if normalize_eol && needs_normalization {
            for chunk in self.chunks.iter_mut() {
                let data = replace_line_terminators(&chunk.data, eol.as_bytes());
                *chunk = StringBuffer::new(data);
            }
        }

        tracing::debug!(
            chunks = self.chunks.len(),
            cr = self.cr,
            lf = self.lf,
            crlf = self.crlf,
            eol = ?eol,
            normalized = normalize_eol && needs_normalization,
            "building text buffer"
        );

        PieceTreeTextBuffer::new(
            self.chunks,
            self.bom,
            eol,
            self.contains_rtl,
            self.contains_unusual_line_terminators,
            self.is_basic_ascii,
            normalize_eol,
            &self.config,
        )
    }

    /// Build with the line ending preferences of the builder's config
    pub fn build_with_config_defaults(self) -> PieceTreeTextBuffer {
        let default_eol = self.config.default_eol;
        let normalize_eol = self.config.normalize_eol;
        self.build(default_eol, normalize_eol)
    }
}
