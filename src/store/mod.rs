//! The book catalog seam.
//!
//! The indexer that scans a library and extracts metadata lives outside
//! this server; the router only ever sees the [`BookStore`] trait. The
//! bundled [`MemoryStore`] serves a pre-built catalog.

pub mod memory;

pub use memory::MemoryStore;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Format of the stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    Fb2,
    Epub,
}

/// One catalog record. Immutable once the server starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    /// Opaque id, used as the URL key and EPUB identifier.
    pub id: String,
    pub title: String,
    /// IETF language tag; empty means "en".
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub authors: Vec<String>,
    /// Publication date; `None` covers the "year ≤ 1" convention.
    #[serde(default)]
    pub book_date: Option<NaiveDate>,
    /// Date the book entered the library, drives the "new books" feeds.
    #[serde(default)]
    pub added: Option<NaiveDate>,
    /// Path on disk, or `container@entry` for a file inside a ZIP.
    pub file_path: String,
    pub format: BookFormat,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub series_index: Option<i32>,
    #[serde(default)]
    pub annotation: String,
    #[serde(default)]
    pub size: u64,
}

impl Book {
    pub fn language_or_default(&self) -> &str {
        if self.language.is_empty() {
            "en"
        } else {
            &self.language
        }
    }

    pub fn first_author(&self) -> Option<&str> {
        self.authors.first().map(String::as_str)
    }
}

/// One node of the genre tree.
#[derive(Debug, Clone)]
pub struct Genre {
    pub id: String,
    pub name: String,
    pub children: Vec<Genre>,
}

/// A page-sized slice plus the total match count.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }

    pub fn has_next(&self, page: usize, per_page: usize) -> bool {
        (page + 1) * per_page < self.total
    }
}

/// Which listing of an author's books to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorBooks {
    /// All books, title-sorted.
    Alphabetic,
    /// All books, date-sorted (newest first).
    ByDate,
    /// Books that belong to no series.
    NoSeries,
}

/// What a search query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    Book,
    Author,
    Series,
}

impl SearchType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "book" | "books" => Some(Self::Book),
            "author" | "authors" => Some(Self::Author),
            "series" => Some(Self::Series),
            _ => None,
        }
    }
}

/// The narrow interface the OPDS router consumes.
pub trait BookStore: Send + Sync {
    fn get_book(&self, id: &str) -> Option<Book>;
    fn count(&self) -> usize;

    fn new_by_date(&self, page: usize, per_page: usize) -> Page<Book>;
    fn new_by_title(&self, page: usize, per_page: usize) -> Page<Book>;

    /// Next-character buckets under `prefix`, with author counts.
    fn author_prefixes(&self, prefix: &str) -> Vec<(String, usize)>;
    /// Author display names whose sort key starts with `prefix`.
    fn authors_by_prefix(&self, prefix: &str) -> Vec<String>;
    fn books_by_author(
        &self,
        author: &str,
        mode: AuthorBooks,
        page: usize,
        per_page: usize,
    ) -> Page<Book>;
    /// Series the author has books in, with book counts.
    fn author_series(&self, author: &str) -> Vec<(String, usize)>;

    fn series_prefixes(&self, prefix: &str) -> Vec<(String, usize)>;
    fn series_by_prefix(&self, prefix: &str) -> Vec<String>;
    fn books_in_series(&self, series: &str, page: usize, per_page: usize) -> Page<Book>;

    fn genre_tree(&self) -> Vec<Genre>;
    fn books_by_genre(&self, genre_id: &str, page: usize, per_page: usize) -> Page<Book>;

    fn search_books(&self, term: &str, page: usize, per_page: usize) -> Page<Book>;
    fn search_authors(&self, term: &str) -> Vec<String>;
    fn search_series(&self, term: &str) -> Vec<String>;
}
