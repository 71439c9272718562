//! Pagination constraints and page-link decisions.
//!
//! The core decides *whether* prev/next links exist; the URL shape is owned
//! by an injected rewriter (the caller's routing layer).

use serde::{Deserialize, Serialize};

/// Limit/offset constraints, bounds-checked by the caller-facing layer and
/// consumed here as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemConstraints {
    pub limit: i64,
    pub offset: i64,
}

impl ItemConstraints {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }
}

/// A hypermedia link attached to responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    pub rel: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLinkRel {
    Prev,
    Next,
}

impl PageLinkRel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageLinkRel::Prev => "prev",
            PageLinkRel::Next => "next",
        }
    }
}

/// Forward/backward links for the current page, either of which may be absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLinks {
    pub prev: Option<Link>,
    pub next: Option<Link>,
}

impl PageLinks {
    pub fn into_vec(self) -> Vec<Link> {
        self.prev.into_iter().chain(self.next).collect()
    }
}

/// URL rewriter for one pagination direction: current URL in, page URL out
pub type PageUrlRewriter = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Decides page-link presence for a request and delegates URL construction
/// to the injected rewriters.
pub struct PageLinkGenerator {
    offset: i64,
    current_url: String,
    media_type: Option<String>,
    prev_url: PageUrlRewriter,
    next_url: PageUrlRewriter,
}

impl PageLinkGenerator {
    pub fn new(
        offset: i64,
        current_url: impl Into<String>,
        media_type: Option<String>,
        prev_url: PageUrlRewriter,
        next_url: PageUrlRewriter,
    ) -> Self {
        Self {
            offset,
            current_url: current_url.into(),
            media_type,
            prev_url,
            next_url,
        }
    }

    /// Prev exists iff the page has an offset; next exists iff rows beyond
    /// the current page remain (`total - returned > offset`).
    pub fn links(&self, total_count: i64, returned_count: i64) -> PageLinks {
        let mut links = PageLinks::default();
        if self.offset > 0 {
            links.prev = Some(Link {
                href: (self.prev_url)(&self.current_url),
                rel: PageLinkRel::Prev.as_str().to_string(),
                media_type: self.media_type.clone(),
                title: Some("Previous Page".to_string()),
            });
        }
        if total_count - returned_count > self.offset {
            links.next = Some(Link {
                href: (self.next_url)(&self.current_url),
                rel: PageLinkRel::Next.as_str().to_string(),
                media_type: self.media_type.clone(),
                title: Some("Next Page".to_string()),
            });
        }
        links
    }
}
