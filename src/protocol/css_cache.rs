//! Thread-safe stylesheet cache for the host side of the protocol.
//!
//! The host records the last stylesheet it sent for each component, so a
//! hot-reload only produces an `UPDATE_CSS` when the text actually changed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Stylesheet text keyed by component name.
#[derive(Debug, Clone)]
pub struct StylesheetCache {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl StylesheetCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store `css` for a component. Returns `false` when it equals the
    /// cached text.
    pub fn store(&self, component: &str, css: &str) -> bool {
        let mut map = self.inner.write().expect("stylesheet cache poisoned");
        if map.get(component).map(String::as_str) == Some(css) {
            return false;
        }
        map.insert(component.to_string(), css.to_string());
        true
    }

    pub fn get(&self, component: &str) -> Option<String> {
        let map = self.inner.read().expect("stylesheet cache poisoned");
        map.get(component).cloned()
    }

    pub fn remove(&self, component: &str) -> Option<String> {
        let mut map = self.inner.write().expect("stylesheet cache poisoned");
        map.remove(component)
    }

    /// Forget everything. Used when the sandbox restarts.
    pub fn clear(&self) {
        let mut map = self.inner.write().expect("stylesheet cache poisoned");
        map.clear();
    }

    pub fn len(&self) -> usize {
        let map = self.inner.read().expect("stylesheet cache poisoned");
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StylesheetCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_reports_changes_only() {
        let cache = StylesheetCache::new();
        assert!(cache.store("Button", ".a { color: red }"));
        assert!(!cache.store("Button", ".a { color: red }"));
        assert!(cache.store("Button", ".a { color: blue }"));
        assert_eq!(cache.get("Button"), Some(".a { color: blue }".into()));
    }

    #[test]
    fn removal_forces_next_store() {
        let cache = StylesheetCache::new();
        cache.store("Card", "x");
        cache.remove("Card");
        assert_eq!(cache.get("Card"), None);
        assert!(cache.store("Card", "x"));
    }

    #[test]
    fn clear_and_remove() {
        let cache = StylesheetCache::new();
        cache.store("a", "1");
        cache.store("b", "2");
        assert_eq!(cache.remove("a"), Some("1".into()));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn shared_between_threads() {
        use std::thread;

        let cache = StylesheetCache::new();
        let cache_clone = cache.clone();

        let handle = thread::spawn(move || {
            cache_clone.store("thread", "data");
        });

        handle.join().unwrap();
        assert_eq!(cache.get("thread"), Some("data".into()));
    }
}
