use regex::Regex;
use std::sync::OnceLock;

use crate::model::edit::EndOfLine;

/// The byte order mark, as it appears at the start of a decoded document
pub const UTF8_BOM: &str = "\u{FEFF}";

/// Line-terminator statistics for a piece of text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextCounter {
    /// Number of line terminators (`\r\n` counts once)
    pub eol_count: usize,
    /// Byte length of the first line, without its terminator
    pub first_line_length: usize,
    /// Byte length of the last line
    pub last_line_length: usize,
    /// Terminator kind: `TextDefined` when there is none, `Invalid` for a
    /// bare `\r` or a mix of `\n` and `\r\n`
    pub eol: EndOfLine,
}

fn merge_eol(seen: EndOfLine, found: EndOfLine) -> EndOfLine {
    match seen {
        EndOfLine::TextDefined => found,
        seen if seen == found => found,
        _ => EndOfLine::Invalid,
    }
}

/// Count the line terminators of `text`.
///
/// `\r\n` is one terminator. A bare `\r`, or a mix of `\n` and `\r\n`,
/// marks the text as `Invalid` since it matches neither supported ending.
pub fn count_eol(text: &str) -> TextCounter {
    let bytes = text.as_bytes();
    let len = bytes.len();

    let mut eol_count = 0;
    let mut first_line_length = 0;
    let mut last_line_start = 0;
    let mut eol = EndOfLine::TextDefined;

    let mut i = 0;
    while i < len {
        match bytes[i] {
            b'\r' => {
                if eol_count == 0 {
                    first_line_length = i;
                }
                eol_count += 1;
                if i + 1 < len && bytes[i + 1] == b'\n' {
                    eol = merge_eol(eol, EndOfLine::Crlf);
                    i += 1;
                } else {
                    eol = EndOfLine::Invalid;
                }
                last_line_start = i + 1;
            }
            b'\n' => {
                eol = merge_eol(eol, EndOfLine::Lf);
                if eol_count == 0 {
                    first_line_length = i;
                }
                eol_count += 1;
                last_line_start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    if eol_count == 0 {
        first_line_length = len;
    }

    TextCounter {
        eol_count,
        first_line_length,
        last_line_length: len - last_line_start,
        eol,
    }
}

/// True if `text` only holds tab, CR, LF and printable ASCII (0x20..=0x7E)
pub fn is_basic_ascii(text: &str) -> bool {
    text.bytes()
        .all(|b| b == b'\t' || b == b'\n' || b == b'\r' || (0x20..=0x7E).contains(&b))
}

fn rtl_regex() -> &'static Regex {
    static RTL: OnceLock<Regex> = OnceLock::new();
    RTL.get_or_init(|| {
        // Code points classified as "R" or "AL"
        Regex::new(concat!(
            "[\u{05BE}\u{05C0}\u{05C3}\u{05C6}\u{05D0}-\u{05F4}\u{0608}\u{060B}\u{060D}",
            "\u{061B}-\u{064A}\u{066D}-\u{066F}\u{0671}-\u{06D5}\u{06E5}\u{06E6}\u{06EE}",
            "\u{06EF}\u{06FA}-\u{0710}\u{0712}-\u{072F}\u{074D}-\u{07A5}\u{07B1}-\u{07EA}",
            "\u{07F4}\u{07F5}\u{07FA}-\u{0815}\u{081A}\u{0824}\u{0828}\u{0830}-\u{0858}",
            "\u{085E}-\u{08BD}\u{200F}\u{FB1D}\u{FB1F}-\u{FB28}\u{FB2A}-\u{FD3D}",
            "\u{FD50}-\u{FDFC}\u{FE70}-\u{FEFC}",
            "\u{10800}-\u{1091B}\u{10920}-\u{10A00}\u{10A10}-\u{10A33}\u{10A40}-\u{10AE4}",
            "\u{10AEB}-\u{10B35}\u{10B40}-\u{10BFF}\u{10C00}-\u{10CFF}",
            "\u{1E800}-\u{1E8CF}\u{1E900}-\u{1E943}\u{1E950}-\u{1E9FF}\u{1EC00}-\u{1EEBB}]"
        ))
        .unwrap_or_else(|e| panic!("invalid RTL character class: {e}"))
    })
}

/// Returns true if `text` contains a right-to-left character
pub fn contains_rtl(text: &str) -> bool {
    rtl_regex().is_match(text)
}

/// Returns true if `text` contains LINE SEPARATOR or PARAGRAPH SEPARATOR
pub fn contains_unusual_line_terminators(text: &str) -> bool {
    text.contains(['\u{2028}', '\u{2029}'])
}

pub fn starts_with_utf8_bom(text: &str) -> bool {
    text.starts_with(UTF8_BOM)
}

/// Index of the first byte that is neither space nor tab
pub fn first_non_whitespace_index(text: &str) -> Option<usize> {
    text.bytes().position(|b| b != b' ' && b != b'\t')
}

/// Index of the last byte that is neither space nor tab
pub fn last_non_whitespace_index(text: &str) -> Option<usize> {
    text.bytes().rposition(|b| b != b' ' && b != b'\t')
}

/// Replace every `\r\n`, `\r` and `\n` in `text` with `eol`
pub fn normalize_eol(text: &str, eol: &str) -> String {
    into_string(replace_line_terminators(text.as_bytes(), eol.as_bytes()))
}

/// Byte-level form of [`normalize_eol`]; multi-byte sequences pass through untouched
pub fn replace_line_terminators(bytes: &[u8], eol: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut run_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                out.extend_from_slice(&bytes[run_start..i]);
                out.extend_from_slice(eol);
                if i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
                    i += 1;
                }
                run_start = i + 1;
            }
            b'\n' => {
                out.extend_from_slice(&bytes[run_start..i]);
                out.extend_from_slice(eol);
                run_start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    out.extend_from_slice(&bytes[run_start..]);
    out
}

/// Make line terminators visible, for debug output
pub fn escape_new_line(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}

/// Convert raw document bytes to a `String` without copying when they are valid UTF-8
pub fn into_string(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Length of `bytes` without a multi-byte sequence cut off at its end
pub fn complete_utf8_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for i in (len.saturating_sub(4)..len).rev() {
        let width = match bytes[i] {
            0x80..=0xBF => continue,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if i + width > len { i } else { len };
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_eol() {
        let counter = count_eol("");
        assert_eq!(counter.eol_count, 0);
        assert_eq!(counter.eol, EndOfLine::TextDefined);

        let counter = count_eol("hello");
        assert_eq!(counter.eol_count, 0);
        assert_eq!(counter.first_line_length, 5);
        assert_eq!(counter.last_line_length, 5);

        let counter = count_eol("ab\ncde\r\nf");
        assert_eq!(counter.eol_count, 2);
        assert_eq!(counter.first_line_length, 2);
        assert_eq!(counter.last_line_length, 1);
        // mixed terminators cannot be kept as they are
        assert_eq!(counter.eol, EndOfLine::Invalid);

        let counter = count_eol("ab\r\ncd\r\n");
        assert_eq!(counter.eol_count, 2);
        assert_eq!(counter.eol, EndOfLine::Crlf);

        let counter = count_eol("a\rb");
        assert_eq!(counter.eol_count, 1);
        assert_eq!(counter.eol, EndOfLine::Invalid);

        let counter = count_eol("x\n");
        assert_eq!(counter.eol, EndOfLine::Lf);
        assert_eq!(counter.last_line_length, 0);
    }

    #[test]
    fn test_basic_ascii() {
        assert!(is_basic_ascii(""));
        assert!(is_basic_ascii("hello\tworld\r\n~"));
        assert!(!is_basic_ascii("héllo"));
        assert!(!is_basic_ascii("\u{7}"));
    }

    #[test]
    fn test_contains_rtl() {
        assert!(!contains_rtl("hello world"));
        assert!(contains_rtl("Hello עברית"));
        assert!(contains_rtl("مرحبا"));
        assert!(!contains_rtl("日本語"));
    }

    #[test]
    fn test_unusual_line_terminators() {
        assert!(!contains_unusual_line_terminators("a\nb\r\nc"));
        assert!(contains_unusual_line_terminators("a\u{2028}b"));
        assert!(contains_unusual_line_terminators("a\u{2029}b"));
    }

    #[test]
    fn test_non_whitespace_indices() {
        assert_eq!(first_non_whitespace_index("  \tabc "), Some(3));
        assert_eq!(first_non_whitespace_index(" \t "), None);
        assert_eq!(last_non_whitespace_index("  abc \t"), Some(4));
        assert_eq!(last_non_whitespace_index(""), None);
    }

    #[test]
    fn test_normalize_eol() {
        assert_eq!(normalize_eol("a\r\nb\rc\nd", "\n"), "a\nb\nc\nd");
        assert_eq!(normalize_eol("a\nb\n", "\r\n"), "a\r\nb\r\n");
        assert_eq!(normalize_eol("\r\r\n\n", "\n"), "\n\n\n");
        assert_eq!(normalize_eol("plain", "\r\n"), "plain");
    }

    #[test]
    fn test_complete_utf8_len() {
        let euro = "€".as_bytes();
        assert_eq!(complete_utf8_len(b""), 0);
        assert_eq!(complete_utf8_len(b"abc"), 3);
        assert_eq!(complete_utf8_len(euro), 3);
        assert_eq!(complete_utf8_len(&euro[..2]), 0);
        assert_eq!(complete_utf8_len(&[b'a', euro[0]]), 1);
        assert_eq!(complete_utf8_len("a😀".as_bytes()), 5);
        assert_eq!(complete_utf8_len(&"a😀".as_bytes()[..4]), 1);
    }
}
