//! In-memory caches
//!
//! These caches are volatile and owned by a single store instance.
//! Uses Moka for bounded concurrent caching.

use std::collections::HashSet;
use std::sync::Arc;

use moka::sync::Cache;

// =============================================================================
// Content Cache
// =============================================================================

/// Decoded status content, keyed by the raw HTML it was decoded from
///
/// Cloning is cheap and shares the underlying cache, so the store hands a
/// clone to every observer instead of exposing a process-wide cache.
#[derive(Clone)]
pub struct ContentCache {
    /// Raw HTML -> plain text
    entries: Cache<String, Arc<str>>,
}

impl ContentCache {
    /// Create new content cache
    ///
    /// # Arguments
    /// * `max_items` - Maximum number of decoded bodies to keep
    pub fn new(max_items: u64) -> Self {
        let entries = Cache::builder().max_capacity(max_items).build();

        Self { entries }
    }

    /// Plain text of an HTML status body
    pub fn plain_text(&self, html: &str) -> Arc<str> {
        use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

        if let Some(text) = self.entries.get(html) {
            CACHE_HITS_TOTAL.with_label_values(&["content"]).inc();
            return text;
        }

        CACHE_MISSES_TOTAL.with_label_values(&["content"]).inc();
        let text: Arc<str> = Arc::from(html_to_plain_text(html));
        self.entries.insert(html.to_string(), text.clone());
        text
    }

    /// Number of cached entries (approximate, for diagnostics)
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

/// Strip markup from status HTML, keeping paragraph and line breaks.
fn html_to_plain_text(html: &str) -> String {
    let with_breaks = html
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("</p>", "\n");
    let stripped = ammonia::Builder::empty()
        .clean_content_tags(HashSet::from(["script", "style"]))
        .clean(&with_breaks)
        .to_string();
    let decoded = html_escape::decode_html_entities(&stripped);

    decoded.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_decodes_entities() {
        let cache = ContentCache::new(16);
        let text = cache.plain_text(
            "<p>Fish &amp; chips</p><p>with <a href=\"https://example.com\">#tags</a></p>",
        );
        assert_eq!(&*text, "Fish & chips\nwith #tags");
    }

    #[test]
    fn script_and_style_bodies_are_dropped() {
        let cache = ContentCache::new(16);
        let text = cache.plain_text(
            "<p>hello</p><script>alert('cat')</script><style>.cat { color: red }</style>",
        );
        assert_eq!(&*text, "hello");
    }

    #[test]
    fn repeated_lookup_returns_shared_value() {
        let cache = ContentCache::new(16);
        let first = cache.plain_text("<p>hello</p>");
        let second = cache.plain_text("<p>hello</p>");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
