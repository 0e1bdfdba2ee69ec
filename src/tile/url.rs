//! Round-robin tile URL builder.
//!
//! Browsers limit parallel connections per host, so tile servers are usually
//! reachable under several subdomains (`a.tile…`, `b.tile…`, `c.tile…`).
//! The builder spreads tile URLs over those hosts in rotation.
//!
//! The rotation is tracked per calling thread: every thread starts at the
//! first base URL and walks the list in order, no matter how many URLs other
//! threads build in the meantime. Async tasks, which may migrate between
//! worker threads, should take their own [`UrlCursor`] instead.
//!
//! A thread forgets the rotation of dropped builders the next time it meets a
//! builder it has not used before, so each thread tracks at most the live
//! builders plus the one being added.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::error::ConfigError;

use super::code::TileCode;

/// Default OpenStreetMap subdomains.
pub const DEFAULT_SUBDOMAINS: [&str; 3] = ["a", "b", "c"];

/// Default OpenStreetMap URL template.
pub const DEFAULT_TEMPLATE: &str = "http://{s}.tile.openstreetmap.org";

/// Default tile image extension.
pub const DEFAULT_EXTENSION: &str = "png";

static NEXT_BUILDER_ID: AtomicU64 = AtomicU64::new(0);

/// One thread's position in one builder's rotation.
struct Slot {
    alive: Weak<()>,
    next: usize,
}

thread_local! {
    // builder id -> rotation of this thread
    static ROTATION: RefCell<HashMap<u64, Slot>> = RefCell::new(HashMap::new());
}

/// Builds tile URLs over a list of base URLs in round-robin order.
#[derive(Debug)]
pub struct RoundRobinUrlBuilder {
    id: u64,
    // Thread rotations hold a weak handle; once it dangles they are pruned.
    alive: Arc<()>,
    base_urls: Vec<String>,
    extension: String,
}

impl RoundRobinUrlBuilder {
    /// Create a builder over the given base URLs (no trailing slash needed).
    pub fn new(
        base_urls: Vec<String>,
        extension: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        if base_urls.is_empty() {
            return Err(ConfigError::NoBaseUrls);
        }
        Ok(Self {
            id: NEXT_BUILDER_ID.fetch_add(1, Ordering::Relaxed),
            alive: Arc::new(()),
            base_urls: base_urls
                .into_iter()
                .map(|url| url.trim_end_matches('/').to_string())
                .collect(),
            extension: extension.into(),
        })
    }

    /// Create a builder by expanding `{s}` in `template` with each subdomain.
    pub fn from_template(
        template: &str,
        subdomains: &[&str],
        extension: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let base_urls = subdomains
            .iter()
            .map(|s| template.replace("{s}", s))
            .collect();
        Self::new(base_urls, extension)
    }

    /// The configured base URLs, in rotation order.
    pub fn base_urls(&self) -> &[String] {
        &self.base_urls
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Build the URL for a tile using the calling thread's next base URL.
    pub fn build_url(&self, level: u32, x: i32, y: i32) -> String {
        let index = ROTATION.with(|rotation| {
            let mut rotation = rotation.borrow_mut();
            if !rotation.contains_key(&self.id) {
                rotation.retain(|_, slot| slot.alive.strong_count() > 0);
            }
            let slot = rotation.entry(self.id).or_insert_with(|| Slot {
                alive: Arc::downgrade(&self.alive),
                next: 0,
            });
            let current = slot.next % self.base_urls.len();
            slot.next = (current + 1) % self.base_urls.len();
            current
        });
        self.format(index, level, x, y)
    }

    /// Build the URL for a tile code using the calling thread's rotation.
    pub fn build_url_for(&self, code: &TileCode) -> String {
        self.build_url(code.level, code.x, code.y)
    }

    /// An independent rotation starting at the first base URL.
    pub fn cursor(&self) -> UrlCursor<'_> {
        UrlCursor {
            builder: self,
            next: 0,
        }
    }

    fn format(&self, index: usize, level: u32, x: i32, y: i32) -> String {
        format!(
            "{}/{}/{}/{}.{}",
            self.base_urls[index], level, x, y, self.extension
        )
    }
}

impl Default for RoundRobinUrlBuilder {
    fn default() -> Self {
        Self {
            id: NEXT_BUILDER_ID.fetch_add(1, Ordering::Relaxed),
            alive: Arc::new(()),
            base_urls: DEFAULT_SUBDOMAINS
                .iter()
                .map(|s| DEFAULT_TEMPLATE.replace("{s}", s))
                .collect(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

/// Owned rotation over a builder's base URLs, seeded at index 0.
#[derive(Debug)]
pub struct UrlCursor<'a> {
    builder: &'a RoundRobinUrlBuilder,
    next: usize,
}

impl UrlCursor<'_> {
    pub fn build_url(&mut self, level: u32, x: i32, y: i32) -> String {
        let index = self.next;
        self.next = (self.next + 1) % self.builder.base_urls.len();
        self.builder.format(index, level, x, y)
    }
}
