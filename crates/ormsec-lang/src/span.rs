//! Source locations for error reporting.

/// A byte range in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Span {
    /// Start byte offset.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

impl Span {
    /// Create a new span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Create a span covering both spans.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the span covers no input.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// An empty span located at the end of `source`.
    pub fn eof(source: &str) -> Self {
        Span::new(source.len(), source.len())
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span {
            start: range.start,
            end: range.end,
        }
    }
}

/// A 1-based line/column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    /// Resolve the position of a byte offset in `source`.
    pub fn of(source: &str, offset: usize) -> Self {
        let (line, column) = offset_to_line_col(source, offset);
        Self { line, column }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Convert a byte offset to line/column.
pub fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;

    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }

        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge() {
        let merged = Span::new(7, 12).merge(Span::new(2, 9));
        assert_eq!(merged, Span::new(2, 12));
        assert_eq!(merged.len(), 10);
    }

    #[test]
    fn test_position_of_offset() {
        let source = "GRANT READ ACCESS\nTO Document d\n  WHERE d.owner = CURRENT_PRINCIPAL";

        assert_eq!(Position::of(source, 0), Position { line: 1, column: 1 });
        assert_eq!(Position::of(source, 18), Position { line: 2, column: 1 });
        assert_eq!(Position::of(source, 34), Position { line: 3, column: 3 });
        assert_eq!(Position::of(source, 34).to_string(), "3:3");
    }

    #[test]
    fn test_eof_span() {
        let span = Span::eof("SELECT d");
        assert!(span.is_empty());
        assert_eq!(span.start, 8);
    }
}
