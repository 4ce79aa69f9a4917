//! Application hooks (spec.md §6: "applications pass an `AppHook`").
//!
//! The library never reads environment variables or config files; a
//! caller that wants to vary behavior (point test fixtures at a
//! different root, turn on permissive validation, capture a debug
//! dump) passes one of these in. Every field defaults to off.

use std::path::PathBuf;

/// Option bag passed by value into entry points that can use it.
/// Construct with [`AppHook::default`] and set only the fields a given
/// call site cares about.
#[derive(Clone, Debug, Default)]
pub struct AppHook {
    /// Root directory test fixtures are resolved against, when a caller
    /// wants to point at a corpus outside the crate's own `tests/`.
    pub test_data_root: Option<PathBuf>,
    /// Relax signature/checksum validation that would otherwise reject
    /// a marginally non-conformant image during `prepare_file_access`.
    pub permissive: bool,
    /// When set, engines that support it append a one-line trace of
    /// each allocator decision to this buffer instead of discarding it.
    pub debug_dump: Option<Vec<String>>,
}

impl AppHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permissive(mut self, permissive: bool) -> Self {
        self.permissive = permissive;
        self
    }

    pub fn with_debug_dump(mut self) -> Self {
        self.debug_dump = Some(Vec::new());
        self
    }

    pub(crate) fn trace(&mut self, line: impl Into<String>) {
        if let Some(buf) = &mut self.debug_dump {
            buf.push(line.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hook_is_inert() {
        let hook = AppHook::new();
        assert!(hook.test_data_root.is_none());
        assert!(!hook.permissive);
        assert!(hook.debug_dump.is_none());
    }

    #[test]
    fn debug_dump_collects_trace_lines() {
        let mut hook = AppHook::new().with_debug_dump();
        hook.trace("allocated block 12");
        assert_eq!(hook.debug_dump.unwrap(), vec!["allocated block 12".to_string()]);
    }
}
