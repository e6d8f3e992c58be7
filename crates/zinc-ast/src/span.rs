//! Source location tracking for diagnostics.
//!
//! Spans are compact `Copy` values pointing into source files managed by the
//! upstream parser. Nodes synthesized by the analyser (enum auxiliaries,
//! coercion calls, the objective declaration) carry an *introduced* span so
//! diagnostics can distinguish user code from generated code.

use serde::{Deserialize, Serialize};

/// Compact source location reference.
///
/// Points to a byte range in a source file. The `introduced` flag marks
/// spans of compiler-generated nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Index of the source file (assigned by the parser's source map)
    pub file_id: u16,
    /// Byte offset of start position
    pub start: u32,
    /// Byte offset of end position (exclusive)
    pub end: u32,
    /// Cached 1-based line number of the start position
    pub start_line: u16,
    /// True for compiler-generated nodes
    pub introduced: bool,
}

impl Span {
    /// Create a new span.
    pub fn new(file_id: u16, start: u32, end: u32, start_line: u16) -> Self {
        Self {
            file_id,
            start,
            end,
            start_line,
            introduced: false,
        }
    }

    /// Create a span for a compiler-generated node.
    pub fn introduced() -> Self {
        Self {
            file_id: 0,
            start: 0,
            end: 0,
            start_line: 0,
            introduced: true,
        }
    }

    /// Derive an introduced span that keeps this span's location.
    ///
    /// Used when a generated node should still point at the user code it
    /// was derived from (e.g. the rewritten enum right-hand side).
    pub fn introduce(mut self) -> Self {
        self.introduced = true;
        self
    }

    /// Check if this span is zero-length.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Merge two spans (returns span covering both).
    pub fn merge(&self, other: &Span) -> Span {
        if self.introduced {
            return *other;
        }
        if other.introduced {
            return *self;
        }
        Span {
            file_id: self.file_id,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            start_line: self.start_line.min(other.start_line),
            introduced: false,
        }
    }
}

impl Default for Span {
    fn default() -> Self {
        Span::introduced()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge() {
        let a = Span::new(0, 4, 10, 1);
        let b = Span::new(0, 12, 20, 2);
        let m = a.merge(&b);
        assert_eq!(m.start, 4);
        assert_eq!(m.end, 20);
        assert_eq!(m.start_line, 1);
    }

    #[test]
    fn test_introduced_merge_keeps_real_location() {
        let real = Span::new(0, 4, 10, 1);
        let synth = Span::introduced();
        assert_eq!(real.merge(&synth), real);
        assert_eq!(synth.merge(&real), real);
    }

    #[test]
    fn test_introduce_preserves_location() {
        let s = Span::new(1, 5, 9, 3).introduce();
        assert!(s.introduced);
        assert_eq!(s.start, 5);
        assert_eq!(s.file_id, 1);
    }
}
