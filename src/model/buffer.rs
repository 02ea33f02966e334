/// A position inside one string buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferCursor {
    pub line: usize,   // 0-indexed line within the buffer
    pub column: usize, // Byte offset from that line's start
}

impl BufferCursor {
    pub fn new(line: usize, column: usize) -> Self {
        BufferCursor { line, column }
    }
}

/// An immutable description of a span of text inside one buffer.
///
/// Nodes never share a `Piece`: splitting or trimming a node stores a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Piece {
    /// Index into the buffer pool; 0 is the append-only change buffer
    pub buffer_index: usize,
    pub start: BufferCursor,
    pub end: BufferCursor,
    /// Line breaks between `start` and `end`, a `\r\n` counting once
    pub line_feed_cnt: usize,
    /// Byte length of the span
    pub length: usize,
}

impl Piece {
    pub fn new(
        buffer_index: usize,
        start: BufferCursor,
        end: BufferCursor,
        line_feed_cnt: usize,
        length: usize,
    ) -> Self {
        Piece {
            buffer_index,
            start,
            end,
            line_feed_cnt,
            length,
        }
    }
}

/// Line starts of a text together with its terminator statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineStarts {
    pub line_starts: Vec<usize>,
    pub cr: usize,
    pub lf: usize,
    pub crlf: usize,
    pub is_basic_ascii: bool,
}

/// Compute the offsets where each line of `text` begins.
///
/// `\r\n`, `\r` and `\n` each end a line; offset 0 is always included.
pub fn create_line_starts_fast(text: &[u8]) -> Vec<usize> {
    let mut r = vec![0];
    let len = text.len();
    let mut i = 0;
    while i < len {
        match text[i] {
            b'\r' => {
                if i + 1 < len && text[i + 1] == b'\n' {
                    r.push(i + 2);
                    i += 1;
                } else {
                    r.push(i + 1);
                }
            }
            b'\n' => r.push(i + 1),
            _ => {}
        }
        i += 1;
    }
    r
}

/// Like `create_line_starts_fast`, also counting each terminator kind and
/// whether the text is basic ASCII (tab or 0x20..=0x7E besides terminators).
pub fn create_line_starts(text: &[u8]) -> LineStarts {
    let mut r = vec![0];
    let mut cr = 0;
    let mut lf = 0;
    let mut crlf = 0;
    let mut is_basic_ascii = true;

    let len = text.len();
    let mut i = 0;
    while i < len {
        let chr = text[i];
        match chr {
            b'\r' => {
                if i + 1 < len && text[i + 1] == b'\n' {
                    crlf += 1;
                    r.push(i + 2);
                    i += 1;
                } else {
                    cr += 1;
                    r.push(i + 1);
                }
            }
            b'\n' => {
                lf += 1;
                r.push(i + 1);
            }
            _ => {
                if is_basic_ascii && chr != b'\t' && !(32..=126).contains(&chr) {
                    is_basic_ascii = false;
                }
            }
        }
        i += 1;
    }

    LineStarts {
        line_starts: r,
        cr,
        lf,
        crlf,
        is_basic_ascii,
    }
}

/// A string buffer containing a chunk of text data and its line metadata.
/// This is the storage unit that pieces point into.
#[derive(Debug, Clone, Default)]
pub struct StringBuffer {
    /// The actual text data
    pub data: Vec<u8>,
    /// Byte offsets where each line starts within this buffer.
    /// line_starts[0] is always 0.
    pub line_starts: Vec<usize>,
}

impl StringBuffer {
    /// Create a buffer, computing its line starts
    pub fn new(data: Vec<u8>) -> Self {
        let line_starts = create_line_starts_fast(&data);
        StringBuffer { data, line_starts }
    }

    /// Create a buffer from already computed line starts
    pub fn with_line_starts(data: Vec<u8>, line_starts: Vec<usize>) -> Self {
        StringBuffer { data, line_starts }
    }

    pub fn empty() -> Self {
        StringBuffer {
            data: Vec::new(),
            line_starts: vec![0],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Absolute offset of a cursor inside this buffer
    #[inline]
    pub fn offset_of(&self, cursor: BufferCursor) -> usize {
        self.line_starts[cursor.line] + cursor.column
    }

    /// Cursor at the very end of this buffer
    pub fn end_cursor(&self) -> BufferCursor {
        let last = self.line_starts.len() - 1;
        BufferCursor::new(last, self.data.len() - self.line_starts[last])
    }

    /// A piece spanning the whole buffer
    pub fn whole_piece(&self, buffer_index: usize) -> Piece {
        Piece::new(
            buffer_index,
            BufferCursor::new(0, 0),
            self.end_cursor(),
            self.line_starts.len() - 1,
            self.data.len(),
        )
    }
}

/// Split point that keeps `\r\n` pairs and UTF-8 sequences whole. It is at
/// or before `max` unless the first character or line break is longer than
/// `max`, in which case the split lands right after it.
pub(crate) fn safe_split_point(text: &[u8], max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }
    let is_continuation = |byte: u8| (byte & 0xC0) == 0x80;

    let mut split = max;
    while split > 0 && is_continuation(text[split]) {
        split -= 1;
    }
    if split == 0 {
        split = 1;
        while split < text.len() && is_continuation(text[split]) {
            split += 1;
        }
        return split;
    }

    if text[split - 1] == b'\r' {
        if split > 1 {
            split -= 1;
        } else if text[split] == b'\n' {
            split += 1;
        }
    }
    split
}
