use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A 1-based position in the document (line number and byte column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line_number: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line_number: usize, column: usize) -> Self {
        Position {
            line_number,
            column,
        }
    }

    /// True if this position is strictly before `other`
    pub fn is_before(&self, other: &Position) -> bool {
        self < other
    }

    /// True if this position is before `other` or equal to it
    pub fn is_before_or_equal(&self, other: &Position) -> bool {
        self <= other
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.line_number
            .cmp(&other.line_number)
            .then(self.column.cmp(&other.column))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.line_number, self.column)
    }
}

/// A range in the document. (start_line, start_column) is always <= (end_line, end_column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl Range {
    /// Create a range, swapping the endpoints if they were given in reverse order
    pub fn new(start_line: usize, start_column: usize, end_line: usize, end_column: usize) -> Self {
        if start_line > end_line || (start_line == end_line && start_column > end_column) {
            Range {
                start_line: end_line,
                start_column: end_column,
                end_line: start_line,
                end_column: start_column,
            }
        } else {
            Range {
                start_line,
                start_column,
                end_line,
                end_column,
            }
        }
    }

    pub fn from_positions(start: Position, end: Position) -> Self {
        Range::new(start.line_number, start.column, end.line_number, end.column)
    }

    pub fn start_position(&self) -> Position {
        Position::new(self.start_line, self.start_column)
    }

    pub fn end_position(&self) -> Position {
        Position::new(self.end_line, self.end_column)
    }

    pub fn is_empty(&self) -> bool {
        self.start_line == self.end_line && self.start_column == self.end_column
    }

    pub fn spans_multiple_lines(&self) -> bool {
        self.end_line > self.start_line
    }

    pub fn collapse_to_start(&self) -> Range {
        Range::new(
            self.start_line,
            self.start_column,
            self.start_line,
            self.start_column,
        )
    }

    /// Test if `position` is in this range. Positions at the edges are inside.
    pub fn contains_position(&self, position: Position) -> bool {
        if position.line_number < self.start_line || position.line_number > self.end_line {
            return false;
        }
        if position.line_number == self.start_line && position.column < self.start_column {
            return false;
        }
        if position.line_number == self.end_line && position.column > self.end_column {
            return false;
        }
        true
    }

    /// Test if `other` is in this range. Equal ranges contain each other.
    pub fn contains_range(&self, other: &Range) -> bool {
        if other.start_line < self.start_line || other.end_line < self.start_line {
            return false;
        }
        if other.start_line > self.end_line || other.end_line > self.end_line {
            return false;
        }
        if other.start_line == self.start_line && other.start_column < self.start_column {
            return false;
        }
        if other.end_line == self.end_line && other.end_column > self.end_column {
            return false;
        }
        true
    }

    /// Like `contains_range`, but `other` may not touch the edges of this range
    pub fn strict_contains_range(&self, other: &Range) -> bool {
        if other.start_line < self.start_line || other.end_line < self.start_line {
            return false;
        }
        if other.start_line > self.end_line || other.end_line > self.end_line {
            return false;
        }
        if other.start_line == self.start_line && other.start_column <= self.start_column {
            return false;
        }
        if other.end_line == self.end_line && other.end_column >= self.end_column {
            return false;
        }
        true
    }

    /// The smallest range covering both ranges
    pub fn plus_range(&self, other: &Range) -> Range {
        let start = self.start_position().min(other.start_position());
        let end = self.end_position().max(other.end_position());
        Range::from_positions(start, end)
    }

    /// The intersection of both ranges, `None` when they do not meet
    pub fn intersect_ranges(&self, other: &Range) -> Option<Range> {
        let start = self.start_position().max(other.start_position());
        let end = self.end_position().min(other.end_position());
        if start > end {
            return None;
        }
        Some(Range::from_positions(start, end))
    }

    /// True if the ranges intersect or share an edge
    pub fn are_intersecting_or_touching(a: &Range, b: &Range) -> bool {
        if a.end_line < b.start_line || (a.end_line == b.start_line && a.end_column < b.start_column)
        {
            return false;
        }
        if b.end_line < a.start_line || (b.end_line == a.start_line && b.end_column < a.start_column)
        {
            return false;
        }
        true
    }

    /// True if the ranges intersect. Ranges that only touch do not intersect.
    pub fn are_intersecting(a: &Range, b: &Range) -> bool {
        if a.end_line < b.start_line
            || (a.end_line == b.start_line && a.end_column <= b.start_column)
        {
            return false;
        }
        if b.end_line < a.start_line
            || (b.end_line == a.start_line && b.end_column <= a.start_column)
        {
            return false;
        }
        true
    }

    /// Order by start position, then by end position
    pub fn compare_ranges_using_starts(a: &Range, b: &Range) -> Ordering {
        a.start_position()
            .cmp(&b.start_position())
            .then(a.end_position().cmp(&b.end_position()))
    }

    /// Order by end position, then by start position
    pub fn compare_ranges_using_ends(a: &Range, b: &Range) -> Ordering {
        a.end_position()
            .cmp(&b.end_position())
            .then(a.start_position().cmp(&b.start_position()))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{} -> {},{}]",
            self.start_line, self.start_column, self.end_line, self.end_column
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_direction() {
        let r = Range::new(3, 5, 1, 2);
        assert_eq!(r, Range::new(1, 2, 3, 5));
        assert_eq!(r.start_position(), Position::new(1, 2));
    }

    #[test]
    fn test_contains_position() {
        let r = Range::new(2, 2, 5, 10);
        assert!(!r.contains_position(Position::new(1, 3)));
        assert!(!r.contains_position(Position::new(2, 1)));
        assert!(r.contains_position(Position::new(2, 2)));
        assert!(r.contains_position(Position::new(3, 1)));
        assert!(r.contains_position(Position::new(5, 10)));
        assert!(!r.contains_position(Position::new(5, 11)));
    }

    #[test]
    fn test_contains_range() {
        let r = Range::new(2, 2, 5, 10);
        assert!(r.contains_range(&Range::new(2, 2, 5, 10)));
        assert!(r.contains_range(&Range::new(3, 1, 4, 4)));
        assert!(!r.contains_range(&Range::new(2, 1, 3, 2)));
        assert!(!r.strict_contains_range(&Range::new(2, 2, 3, 2)));
        assert!(r.strict_contains_range(&Range::new(2, 3, 5, 9)));
    }

    #[test]
    fn test_intersection_and_union() {
        let a = Range::new(1, 1, 2, 5);
        let b = Range::new(2, 3, 4, 1);
        assert_eq!(a.plus_range(&b), Range::new(1, 1, 4, 1));
        assert_eq!(a.intersect_ranges(&b), Some(Range::new(2, 3, 2, 5)));
        assert_eq!(a.intersect_ranges(&Range::new(3, 1, 3, 2)), None);
    }

    #[test]
    fn test_touching_vs_intersecting() {
        let a = Range::new(1, 1, 1, 5);
        let touching = Range::new(1, 5, 1, 8);
        let overlapping = Range::new(1, 4, 1, 8);
        assert!(Range::are_intersecting_or_touching(&a, &touching));
        assert!(!Range::are_intersecting(&a, &touching));
        assert!(Range::are_intersecting(&a, &overlapping));
    }

    #[test]
    fn test_compare_ranges() {
        let a = Range::new(1, 1, 1, 5);
        let b = Range::new(1, 2, 1, 5);
        let c = Range::new(1, 1, 2, 1);
        assert_eq!(Range::compare_ranges_using_ends(&a, &b), Ordering::Less);
        assert_eq!(Range::compare_ranges_using_ends(&c, &a), Ordering::Greater);
        assert_eq!(Range::compare_ranges_using_starts(&a, &b), Ordering::Less);
        assert_eq!(Range::compare_ranges_using_starts(&a, &c), Ordering::Less);
    }
}
