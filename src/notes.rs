//! C9 — Notes & diagnostics.
//!
//! An append-only, per-object list of damage/status findings. Every
//! filesystem and archive engine owns one of these; it is the user-visible
//! surface for everything the spec calls "informational" (§7): bitmap
//! disagreements, cross-linked files, a WOZ CRC mismatch, and so on. Notes
//! never cause an operation to fail by themselves -- they are collected
//! so a caller (or the grinder, C10) can decide what to do about them.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Note {
    pub severity: Severity,
    pub message: String,
}

/// Append-only collection of [`Note`]s owned by a disk image, filesystem,
/// or archive. Cloned cheaply enough for the analyzer to compare candidate
/// parses by note count (spec.md §4.5: "ambiguity is broken by which
/// filesystem has fewer notes").
#[derive(Debug, Clone, Default)]
pub struct Notes {
    entries: Vec<Note>,
}

impl Notes {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, severity: Severity, message: impl Into<String>) {
        self.entries.push(Note { severity, message: message.into() });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(Severity::Info, message);
    }
    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message);
    }
    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn all(&self) -> &[Note] {
        &self.entries
    }

    pub fn by_severity(&self, severity: Severity) -> impl Iterator<Item = &Note> {
        self.entries.iter().filter(move |n| n.severity == severity)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.by_severity(severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    pub fn merge(&mut self, other: &Notes) {
        self.entries.extend(other.entries.iter().cloned());
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_notes_wins_style_comparison() {
        let mut a = Notes::new();
        a.warn("bitmap disagreement");
        let mut b = Notes::new();
        b.warn("bitmap disagreement");
        b.error("cross-linked file");
        assert!(a.len() < b.len());
        assert!(!a.has_errors());
        assert!(b.has_errors());
    }

    #[test]
    fn severity_filter() {
        let mut n = Notes::new();
        n.info("scan started");
        n.warn("orphaned block 44");
        n.warn("orphaned block 80");
        n.error("bad T/S pointer");
        assert_eq!(n.count(Severity::Warning), 2);
        assert_eq!(n.count(Severity::Error), 1);
        assert_eq!(n.count(Severity::Info), 1);
    }
}
