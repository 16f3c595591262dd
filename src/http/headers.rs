use smallvec::SmallVec;
use std::sync::Arc;

/// Maximum inline headers before heap allocation.
///
/// Most requests carry ≤16 headers, so the common case stays on the stack.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Order-preserving HTTP header multimap.
///
/// Lookups are case-insensitive per RFC 7230; insertion order and duplicate
/// entries are preserved so multi-valued headers survive the bridge intact.
/// Header names use `Arc<str>` because the same names repeat on every
/// request and an `Arc` clone is an atomic increment, not a copy.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((Arc::from(name), value.into()));
    }

    /// Replace every value for `name` with a single entry.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.entries.push((Arc::from(name), value.into()));
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_ref(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut h = HeaderMap::new();
        h.append("Content-Type", "application/json");
        assert_eq!(h.get("content-type"), Some("application/json"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("application/json"));
        assert!(h.contains("Content-type"));
    }

    #[test]
    fn test_duplicates_preserved_in_order() {
        let mut h = HeaderMap::new();
        h.append("Set-Cookie", "a=1");
        h.append("X-Other", "x");
        h.append("set-cookie", "b=2");
        let values: Vec<&str> = h.get_all("Set-Cookie").collect();
        assert_eq!(values, vec!["a=1", "b=2"]);
        assert_eq!(h.get("Set-Cookie"), Some("a=1"));
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn test_set_replaces_all_values() {
        let mut h = HeaderMap::new();
        h.append("Connection", "keep-alive");
        h.append("connection", "upgrade");
        h.set("Connection", "close");
        let values: Vec<&str> = h.get_all("Connection").collect();
        assert_eq!(values, vec!["close"]);
    }

    #[test]
    fn test_remove_drops_every_value() {
        let mut h = HeaderMap::new();
        h.append("X-A", "1");
        h.append("x-a", "2");
        h.remove("X-A");
        assert!(h.is_empty());
    }
}
