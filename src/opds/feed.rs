//! Typed feed model.
//!
//! Handlers build a [`Feed`]; the Atom renderer and the browser HTML
//! renderer both consume it, so catalog logic lives in exactly one
//! place.

use serde::Serialize;

/// OPDS Atom content types.
pub const ATOM_XML: &str = "application/atom+xml;charset=utf-8";
pub const NAV_TYPE: &str = "application/atom+xml;profile=opds-catalog;kind=navigation";
pub const ACQ_TYPE: &str = "application/atom+xml;profile=opds-catalog";
pub const OPENSEARCH_TYPE: &str = "application/opensearchdescription+xml";

/// OPDS link relations.
pub const REL_ACQUISITION: &str = "http://opds-spec.org/acquisition/open-access";
pub const REL_IMAGE: &str = "http://opds-spec.org/image";
pub const REL_THUMBNAIL: &str = "http://opds-spec.org/thumbnail";

#[derive(Debug, Clone, Serialize)]
pub struct FeedLink {
    pub href: String,
    pub rel: String,
    pub link_type: String,
    pub title: Option<String>,
}

impl FeedLink {
    pub fn new(href: impl Into<String>, rel: &str, link_type: &str) -> Self {
        Self {
            href: href.into(),
            rel: rel.to_string(),
            link_type: link_type.to_string(),
            title: None,
        }
    }
}

/// Extra per-entry data the HTML renderer shows for books.
#[derive(Debug, Clone, Serialize)]
pub struct BookInfo {
    pub format: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub id: String,
    pub title: String,
    pub updated: String,
    /// Plain-text content/description; empty means omitted.
    pub content: String,
    pub authors: Vec<String>,
    /// `(term, label)` category pairs.
    pub categories: Vec<(String, String)>,
    pub links: Vec<FeedLink>,
    pub book: Option<BookInfo>,
}

impl Entry {
    pub fn nav(id: &str, title: &str, href: &str, content: &str, updated: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            updated: updated.to_string(),
            content: content.to_string(),
            authors: Vec::new(),
            categories: Vec::new(),
            links: vec![FeedLink::new(href, "subsection", NAV_TYPE)],
            book: None,
        }
    }

    /// First navigation or acquisition href, for the HTML renderer.
    pub fn primary_href(&self) -> Option<&str> {
        self.links.first().map(|l| l.href.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Feed {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub updated: String,
    pub self_href: String,
    pub links: Vec<FeedLink>,
    pub entries: Vec<Entry>,
}

impl Feed {
    pub fn new(id: &str, title: &str, self_href: &str, updated: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            subtitle: String::new(),
            updated: updated.to_string(),
            self_href: self_href.to_string(),
            links: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn add_link(&mut self, href: &str, rel: &str, link_type: &str) {
        self.links.push(FeedLink::new(href, rel, link_type));
    }

    /// rel=prev / rel=next links for a paginated listing.
    pub fn add_pagination(&mut self, prev_href: Option<String>, next_href: Option<String>) {
        if let Some(prev) = prev_href {
            let mut link = FeedLink::new(prev, "prev", ACQ_TYPE);
            link.title = Some("Previous Page".to_string());
            self.links.push(link);
        }
        if let Some(next) = next_href {
            let mut link = FeedLink::new(next, "next", ACQ_TYPE);
            link.title = Some("Next Page".to_string());
            self.links.push(link);
        }
    }

    pub fn prev_href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "prev")
            .map(|l| l.href.as_str())
    }

    pub fn next_href(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "next")
            .map(|l| l.href.as_str())
    }
}
