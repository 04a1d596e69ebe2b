use std::collections::BTreeMap;
use std::path::Path;

use super::{AuthorBooks, Book, BookStore, Genre, Page};
use crate::text::sort::sort_key;
use crate::text::soundex::sounds_like;

/// An in-memory catalog fed from a JSON file the external indexer
/// produces (an array of [`Book`] records).
pub struct MemoryStore {
    books: Vec<Book>,
    cyrillic_first: bool,
}

impl MemoryStore {
    pub fn new(books: Vec<Book>, cyrillic_first: bool) -> Self {
        Self {
            books,
            cyrillic_first,
        }
    }

    /// Load a catalog JSON file.
    pub fn load_catalog(path: &Path, cyrillic_first: bool) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|e| CatalogError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let books: Vec<Book> =
            serde_json::from_str(&content).map_err(|e| CatalogError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(Self::new(books, cyrillic_first))
    }

    fn sorted_names<F>(&self, extract: F) -> Vec<String>
    where
        F: Fn(&Book) -> Vec<&str>,
    {
        let mut names: Vec<String> = self
            .books
            .iter()
            .flat_map(|b| extract(b).into_iter().map(str::to_string))
            .collect();
        names.sort_by_cached_key(|n| sort_key(n, self.cyrillic_first));
        names.dedup();
        names
    }

    fn prefix_groups(names: &[String], prefix: &str) -> Vec<(String, usize)> {
        let prefix_upper = prefix.to_uppercase();
        let mut groups: BTreeMap<String, usize> = BTreeMap::new();
        for name in names {
            if !starts_with_ci(name, &prefix_upper) {
                continue;
            }
            let next: String = name
                .chars()
                .take(prefix.chars().count() + 1)
                .collect::<String>()
                .to_uppercase();
            *groups.entry(next).or_default() += 1;
        }
        groups.into_iter().collect()
    }

    fn page_of(mut books: Vec<Book>, page: usize, per_page: usize) -> Page<Book> {
        let total = books.len();
        let start = page * per_page;
        let items = if start >= total {
            Vec::new()
        } else {
            books.drain(start..(start + per_page).min(total)).collect()
        };
        Page { items, total }
    }

    fn sort_by_title(&self, books: &mut [Book]) {
        books.sort_by_cached_key(|b| sort_key(&b.title, self.cyrillic_first));
    }
}

fn starts_with_ci(name: &str, prefix_upper: &str) -> bool {
    let head: String = name
        .chars()
        .take(prefix_upper.chars().count())
        .collect::<String>()
        .to_uppercase();
    head == *prefix_upper
}

fn matches_term(value: &str, term: &str) -> bool {
    let value_lower = value.to_lowercase();
    let term_lower = term.to_lowercase();
    if value_lower.contains(&term_lower) {
        return true;
    }
    value_lower
        .split_whitespace()
        .any(|word| sounds_like(word, &term_lower))
}

impl BookStore for MemoryStore {
    fn get_book(&self, id: &str) -> Option<Book> {
        self.books.iter().find(|b| b.id == id).cloned()
    }

    fn count(&self) -> usize {
        self.books.len()
    }

    fn new_by_date(&self, page: usize, per_page: usize) -> Page<Book> {
        let mut books = self.books.clone();
        books.sort_by_key(|b| std::cmp::Reverse(b.added.or(b.book_date)));
        Self::page_of(books, page, per_page)
    }

    fn new_by_title(&self, page: usize, per_page: usize) -> Page<Book> {
        let mut books = self.books.clone();
        self.sort_by_title(&mut books);
        Self::page_of(books, page, per_page)
    }

    fn author_prefixes(&self, prefix: &str) -> Vec<(String, usize)> {
        let names = self.sorted_names(|b| b.authors.iter().map(String::as_str).collect());
        Self::prefix_groups(&names, prefix)
    }

    fn authors_by_prefix(&self, prefix: &str) -> Vec<String> {
        let prefix_upper = prefix.to_uppercase();
        self.sorted_names(|b| b.authors.iter().map(String::as_str).collect())
            .into_iter()
            .filter(|n| starts_with_ci(n, &prefix_upper))
            .collect()
    }

    fn books_by_author(
        &self,
        author: &str,
        mode: AuthorBooks,
        page: usize,
        per_page: usize,
    ) -> Page<Book> {
        let mut books: Vec<Book> = self
            .books
            .iter()
            .filter(|b| b.authors.iter().any(|a| a == author))
            .filter(|b| mode != AuthorBooks::NoSeries || b.series.is_none())
            .cloned()
            .collect();
        match mode {
            AuthorBooks::ByDate => {
                books.sort_by_key(|b| std::cmp::Reverse(b.book_date));
            }
            _ => self.sort_by_title(&mut books),
        }
        Self::page_of(books, page, per_page)
    }

    fn author_series(&self, author: &str) -> Vec<(String, usize)> {
        let mut series: BTreeMap<String, usize> = BTreeMap::new();
        for book in &self.books {
            if book.authors.iter().any(|a| a == author)
                && let Some(s) = &book.series
            {
                *series.entry(s.clone()).or_default() += 1;
            }
        }
        series.into_iter().collect()
    }

    fn series_prefixes(&self, prefix: &str) -> Vec<(String, usize)> {
        let names = self.sorted_names(|b| b.series.as_deref().into_iter().collect());
        Self::prefix_groups(&names, prefix)
    }

    fn series_by_prefix(&self, prefix: &str) -> Vec<String> {
        let prefix_upper = prefix.to_uppercase();
        self.sorted_names(|b| b.series.as_deref().into_iter().collect())
            .into_iter()
            .filter(|n| starts_with_ci(n, &prefix_upper))
            .collect()
    }

    fn books_in_series(&self, series: &str, page: usize, per_page: usize) -> Page<Book> {
        let mut books: Vec<Book> = self
            .books
            .iter()
            .filter(|b| b.series.as_deref() == Some(series))
            .cloned()
            .collect();
        books.sort_by_key(|b| (b.series_index.unwrap_or(i32::MAX), b.title.clone()));
        Self::page_of(books, page, per_page)
    }

    fn genre_tree(&self) -> Vec<Genre> {
        // Genre ids follow the FB2 convention of `family_detail`; the
        // tree groups them by family.
        let mut families: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for book in &self.books {
            for genre in &book.genres {
                let family = genre.split('_').next().unwrap_or(genre).to_string();
                let entry = families.entry(family).or_default();
                if !entry.contains(genre) {
                    entry.push(genre.clone());
                }
            }
        }
        families
            .into_iter()
            .map(|(family, mut ids)| {
                ids.sort();
                Genre {
                    id: family.clone(),
                    name: genre_label(&family),
                    children: ids
                        .into_iter()
                        .map(|id| Genre {
                            name: genre_label(&id),
                            id,
                            children: Vec::new(),
                        })
                        .collect(),
                }
            })
            .collect()
    }

    fn books_by_genre(&self, genre_id: &str, page: usize, per_page: usize) -> Page<Book> {
        let mut books: Vec<Book> = self
            .books
            .iter()
            .filter(|b| {
                b.genres
                    .iter()
                    .any(|g| g == genre_id || g.split('_').next() == Some(genre_id))
            })
            .cloned()
            .collect();
        self.sort_by_title(&mut books);
        Self::page_of(books, page, per_page)
    }

    fn search_books(&self, term: &str, page: usize, per_page: usize) -> Page<Book> {
        let mut books: Vec<Book> = self
            .books
            .iter()
            .filter(|b| matches_term(&b.title, term))
            .cloned()
            .collect();
        self.sort_by_title(&mut books);
        Self::page_of(books, page, per_page)
    }

    fn search_authors(&self, term: &str) -> Vec<String> {
        self.sorted_names(|b| b.authors.iter().map(String::as_str).collect())
            .into_iter()
            .filter(|a| matches_term(a, term))
            .collect()
    }

    fn search_series(&self, term: &str) -> Vec<String> {
        self.sorted_names(|b| b.series.as_deref().into_iter().collect())
            .into_iter()
            .filter(|s| matches_term(s, term))
            .collect()
    }
}

/// Human label for a genre id: underscores to spaces, first letter up.
fn genre_label(id: &str) -> String {
    let spaced = id.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => spaced,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse catalog {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },
}

#[cfg(test)]
pub fn sample_books() -> Vec<Book> {
    use super::BookFormat;
    use chrono::NaiveDate;

    let book = |id: &str,
                title: &str,
                author: &str,
                series: Option<&str>,
                genre: &str,
                year: i32| Book {
        id: id.to_string(),
        title: title.to_string(),
        language: "en".to_string(),
        authors: vec![author.to_string()],
        book_date: NaiveDate::from_ymd_opt(year, 1, 1),
        added: NaiveDate::from_ymd_opt(2024, 1, year.rem_euclid(28) as u32 + 1),
        file_path: format!("{id}.fb2"),
        format: BookFormat::Fb2,
        genres: vec![genre.to_string()],
        series: series.map(str::to_string),
        series_index: series.map(|_| 1),
        annotation: String::new(),
        size: 1000,
    };

    vec![
        book("b1", "Foundation", "Isaac Asimov", Some("Foundation"), "sf", 1951),
        book("b2", "Foundation and Empire", "Isaac Asimov", Some("Foundation"), "sf", 1952),
        book("b3", "The Caves of Steel", "Isaac Asimov", None, "sf_detective", 1954),
        book("b4", "Dune", "Frank Herbert", Some("Dune"), "sf", 1965),
        book("b5", "Война и мир", "Лев Толстой", None, "prose_classic", 1869),
    ]
}
