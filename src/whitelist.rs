//! The non-freeing symbol whitelist consulted by the Free-Finder analysis.
//!
//! Exposed as a caller-mutable set: a host driver can inject additional
//! entries before the first call-site scan runs.

use crate::common::fx_hash::FxHashSet;

/// Initial non-freeing whitelist contents.
const DEFAULT_WHITELIST: &[&str] =
    &["malloc", "mm_alloc", "mm_array_alloc", "printf", "abort", "exit", "srand", "atoi", "atol"];

/// Host-extensible configuration for the Free-Finder analysis.
#[derive(Debug, Clone)]
pub struct WhitelistConfig {
    names: FxHashSet<String>,
}

impl Default for WhitelistConfig {
    fn default() -> Self {
        Self { names: DEFAULT_WHITELIST.iter().map(|s| s.to_string()).collect() }
    }
}

impl WhitelistConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an additional non-freeing external symbol. Must be called
    /// before the Free-Finder's first call-site scan to take effect.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Augments this whitelist with `module_name`'s own key-check helper
    /// names.
    pub fn augment_for_module(&mut self, module_name: &str) {
        for name in crate::capabilities::module_check_helper_names(module_name) {
            self.names.insert(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_whitelist_contains_known_entries() {
        let wl = WhitelistConfig::default();
        for name in DEFAULT_WHITELIST {
            assert!(wl.contains(name), "missing default whitelist entry {name}");
        }
        assert!(!wl.contains("free"));
    }

    #[test]
    fn augmentation_adds_per_module_check_helpers() {
        let mut wl = WhitelistConfig::default();
        wl.augment_for_module("mymod");
        assert!(wl.contains("mymod_MMPtrKeyCheck"));
        assert!(wl.contains("mymod_MMArrayPtrKeyCheck"));
    }

    #[test]
    fn caller_can_extend_before_scan() {
        let mut wl = WhitelistConfig::default();
        assert!(!wl.contains("my_safe_free_wrapper"));
        wl.insert("my_safe_free_wrapper");
        assert!(wl.contains("my_safe_free_wrapper"));
    }
}
