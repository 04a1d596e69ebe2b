//! Catalog feed builders and the OPDS (Atom) endpoint handlers.
//!
//! Builders are synchronous and return the typed [`Feed`] model; the
//! handlers here render it as Atom, the `web` module renders the same
//! feeds as HTML.

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header, request::Parts};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::AppError;
use crate::i18n;
use crate::state::AppState;
use crate::store::{AuthorBooks, Book, Page, SearchType};
use crate::text::translit;

use super::atom::{self, UriRewrite};
use super::feed::{
    ATOM_XML, BookInfo, Entry, Feed, FeedLink, OPENSEARCH_TYPE, REL_ACQUISITION, REL_IMAGE,
    REL_THUMBNAIL,
};

pub const DEFAULT_UPDATED: &str = "2024-01-01T00:00:00Z";

/// Which rendition of a feed the client gets. Requests under the web
/// prefix carry [`OutputMode::Html`] as a request extension; everything
/// else is Atom.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    #[default]
    Atom,
    Html,
}

impl<S> FromRequestParts<S> for OutputMode
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<OutputMode>().copied().unwrap_or_default())
    }
}

/// Per-request feed parameters.
pub struct BuildCtx<'a> {
    pub state: &'a AppState,
    pub lang: String,
    pub per_page: usize,
    /// Whether the client reads FB2 natively (UA match, or web mode).
    pub accepts_fb2: bool,
}

impl<'a> BuildCtx<'a> {
    pub fn opds(state: &'a AppState, headers: &HeaderMap) -> Self {
        let ua = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let accepts_fb2 = state
            .config
            .opds
            .fb2_clients
            .iter()
            .any(|client| ua.contains(client.as_str()));
        Self {
            state,
            lang: detect_lang(headers, state),
            per_page: state.config.opds.items_per_opds_page.max(1),
            accepts_fb2,
        }
    }

    pub fn web(state: &'a AppState, headers: &HeaderMap) -> Self {
        Self {
            state,
            lang: detect_lang(headers, state),
            per_page: state.config.opds.items_per_web_page.max(1),
            accepts_fb2: true,
        }
    }

    pub fn for_mode(state: &'a AppState, headers: &HeaderMap, mode: OutputMode) -> Self {
        match mode {
            OutputMode::Atom => Self::opds(state, headers),
            OutputMode::Html => Self::web(state, headers),
        }
    }

    fn tr(&self, key: &str, fallback: &str) -> String {
        i18n::tr(&self.state.translations, &self.lang, "opds", key, fallback)
    }
}

/// Primary language from Accept-Language, falling back to the
/// configured default.
pub fn detect_lang(headers: &HeaderMap, state: &AppState) -> String {
    if let Some(accept) = headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
    {
        let primary = accept.split(',').next().unwrap_or("");
        let lang = primary.split(['-', ';']).next().unwrap_or("").trim();
        if !lang.is_empty() && lang.chars().all(|c| c.is_ascii_alphanumeric()) {
            return lang.to_lowercase();
        }
    }
    state.config.web.language.clone()
}

#[derive(Deserialize, Default)]
pub struct PageQuery {
    #[serde(rename = "pageNumber")]
    pub page_number: Option<usize>,
}

#[derive(Deserialize, Default)]
pub struct SearchQuery {
    #[serde(rename = "searchTerm")]
    pub search_term: Option<String>,
    #[serde(rename = "searchType")]
    pub search_type: Option<String>,
    #[serde(rename = "pageNumber")]
    pub page_number: Option<usize>,
}

// ---------------------------------------------------------------- builders

/// Root catalog: one navigation entry per enabled menu section.
pub fn build_root(ctx: &BuildCtx) -> Feed {
    let state = ctx.state;
    let mut feed = Feed::new("tag:root", &state.config.opds.server_name, "/", DEFAULT_UPDATED);
    feed.subtitle = i18n::books_count(&state.translations, &ctx.lang, state.store.count() as u64);

    let sections: [(&str, &str, String, String); 5] = [
        (
            "newdate",
            "/newdate/0",
            ctx.tr("root_new_date", "New books (by date)"),
            ctx.tr("content_new_date", "Recently added, newest first"),
        ),
        (
            "newtitle",
            "/newtitle/0",
            ctx.tr("root_new_title", "New books (by title)"),
            ctx.tr("content_new_title", "Recently added, sorted by title"),
        ),
        (
            "authorsindex",
            "/authorsindex",
            ctx.tr("root_authors", "By authors"),
            ctx.tr("content_authors", "Browse authors alphabetically"),
        ),
        (
            "sequencesindex",
            "/sequencesindex",
            ctx.tr("root_series", "By series"),
            ctx.tr("content_series", "Browse book series"),
        ),
        (
            "genres",
            "/genres",
            ctx.tr("root_genres", "By genres"),
            ctx.tr("content_genres", "Browse the genre tree"),
        ),
    ];

    for (i, (key, href, title, content)) in sections.iter().enumerate() {
        if state.menu.enabled(key) {
            feed.entries.push(Entry::nav(
                &format!("m:{}", i + 1),
                title,
                href,
                content,
                DEFAULT_UPDATED,
            ));
        }
    }
    feed
}

/// New-books feeds, `/newdate/{page}` and `/newtitle/{page}`.
pub fn build_new_books(ctx: &BuildCtx, by_date: bool, page: usize) -> Feed {
    let state = ctx.state;
    let (key, title) = if by_date {
        ("newdate", ctx.tr("root_new_date", "New books (by date)"))
    } else {
        ("newtitle", ctx.tr("root_new_title", "New books (by title)"))
    };
    let books = if by_date {
        state.store.new_by_date(page, ctx.per_page)
    } else {
        state.store.new_by_title(page, ctx.per_page)
    };

    let mut feed = Feed::new(
        &format!("tag:{key}:{page}"),
        &title,
        &format!("/{key}/{page}"),
        DEFAULT_UPDATED,
    );
    paginate_path(&mut feed, &format!("/{key}"), page, ctx.per_page, &books);
    push_book_entries(ctx, &mut feed, &books.items);
    feed
}

/// `/authorsindex[/{prefix}]`: alphabetic buckets until a bucket is
/// small enough to list, then paginated author entries.
pub fn build_authors_index(ctx: &BuildCtx, prefix: &str, page: usize) -> Feed {
    let state = ctx.state;
    let title = ctx.tr("root_authors", "By authors");
    let self_href = if prefix.is_empty() {
        "/authorsindex".to_string()
    } else {
        format!("/authorsindex/{}", urlencoding::encode(prefix))
    };
    let mut feed = Feed::new(
        &format!("tag:authors:{prefix}"),
        &title,
        &self_href,
        DEFAULT_UPDATED,
    );

    let authors = state.store.authors_by_prefix(prefix);
    let split = state.config.opds.split_items.max(1);

    if authors.len() > split {
        // Too many names: drill one letter deeper.
        for (bucket, count) in state.store.author_prefixes(prefix) {
            let href = format!("/authorsindex/{}", urlencoding::encode(&bucket));
            let content =
                i18n::books_count(&state.translations, &ctx.lang, count as u64);
            feed.entries.push(Entry::nav(
                &format!("a:p:{bucket}"),
                &bucket,
                &href,
                &content,
                DEFAULT_UPDATED,
            ));
        }
        return feed;
    }

    let total = authors.len();
    let start = (page * ctx.per_page).min(total);
    let end = (start + ctx.per_page).min(total);
    let details_enabled = state.menu.enabled("author-details");
    for name in &authors[start..end] {
        // With author-details disabled the index links straight to the
        // title-sorted book list.
        let href = if details_enabled {
            format!("/author-details/{}", urlencoding::encode(name))
        } else {
            format!("/author-alphabetic/{}", urlencoding::encode(name))
        };
        feed.entries.push(Entry::nav(
            &format!("a:{name}"),
            name,
            &href,
            "",
            DEFAULT_UPDATED,
        ));
    }
    paginate_query(&mut feed, &self_href, page, ctx.per_page, total);
    feed
}

/// `/author-details/{name}`: menu page for one author.
pub fn build_author_details(ctx: &BuildCtx, name: &str) -> Result<Feed, AppError> {
    let state = ctx.state;
    let books = state
        .store
        .books_by_author(name, AuthorBooks::Alphabetic, 0, 1);
    if books.total == 0 {
        return Err(AppError::NotFound(format!("author {name}")));
    }

    let encoded = urlencoding::encode(name).into_owned();
    let mut feed = Feed::new(
        &format!("tag:author:{name}"),
        name,
        &format!("/author-details/{encoded}"),
        DEFAULT_UPDATED,
    );

    let sections: [(&str, String, String); 4] = [
        (
            "author-series",
            format!("/author-series/{encoded}"),
            ctx.tr("author_series", "Books by series"),
        ),
        (
            "author-no-series",
            format!("/author-no-series/{encoded}"),
            ctx.tr("author_no_series", "Books without series"),
        ),
        (
            "author-alphabetic",
            format!("/author-alphabetic/{encoded}"),
            ctx.tr("author_alphabetic", "All books by title"),
        ),
        (
            "author-by-date",
            format!("/author-by-date/{encoded}"),
            ctx.tr("author_by_date", "All books by date"),
        ),
    ];
    for (i, (key, href, title)) in sections.iter().enumerate() {
        if state.menu.enabled(key) {
            feed.entries.push(Entry::nav(
                &format!("ad:{}", i + 1),
                title,
                href,
                "",
                DEFAULT_UPDATED,
            ));
        }
    }
    Ok(feed)
}

/// `/author-series/{name}`: the series an author contributes to.
pub fn build_author_series(ctx: &BuildCtx, name: &str) -> Result<Feed, AppError> {
    let state = ctx.state;
    let series = state.store.author_series(name);
    if series.is_empty() {
        return Err(AppError::NotFound(format!("series of {name}")));
    }

    let mut feed = Feed::new(
        &format!("tag:author:{name}:series"),
        &format!("{name}: {}", ctx.tr("author_series", "Books by series")),
        &format!("/author-series/{}", urlencoding::encode(name)),
        DEFAULT_UPDATED,
    );
    for (series_name, count) in series {
        let content = i18n::books_count(&state.translations, &ctx.lang, count as u64);
        feed.entries.push(Entry::nav(
            &format!("as:{series_name}"),
            &series_name,
            &format!("/sequence/{}", urlencoding::encode(&series_name)),
            &content,
            DEFAULT_UPDATED,
        ));
    }
    Ok(feed)
}

/// The three author book listings.
pub fn build_author_books(
    ctx: &BuildCtx,
    name: &str,
    mode: AuthorBooks,
    page: usize,
) -> Result<Feed, AppError> {
    let state = ctx.state;
    let books = state.store.books_by_author(name, mode, page, ctx.per_page);
    if books.total == 0 && page == 0 {
        return Err(AppError::NotFound(format!("books of {name}")));
    }

    let (segment, title_key, fallback) = match mode {
        AuthorBooks::Alphabetic => ("author-alphabetic", "author_alphabetic", "All books by title"),
        AuthorBooks::ByDate => ("author-by-date", "author_by_date", "All books by date"),
        AuthorBooks::NoSeries => ("author-no-series", "author_no_series", "Books without series"),
    };
    let encoded = urlencoding::encode(name).into_owned();
    let self_href = format!("/{segment}/{encoded}");
    let mut feed = Feed::new(
        &format!("tag:author:{name}:{segment}:{page}"),
        &format!("{name}: {}", ctx.tr(title_key, fallback)),
        &self_href,
        DEFAULT_UPDATED,
    );
    paginate_query(&mut feed, &self_href, page, ctx.per_page, books.total);
    push_book_entries(ctx, &mut feed, &books.items);
    Ok(feed)
}

/// `/sequencesindex[/{prefix}]`: series buckets.
pub fn build_series_index(ctx: &BuildCtx, prefix: &str, page: usize) -> Feed {
    let state = ctx.state;
    let title = ctx.tr("root_series", "By series");
    let self_href = if prefix.is_empty() {
        "/sequencesindex".to_string()
    } else {
        format!("/sequencesindex/{}", urlencoding::encode(prefix))
    };
    let mut feed = Feed::new(
        &format!("tag:series:{prefix}"),
        &title,
        &self_href,
        DEFAULT_UPDATED,
    );

    let series = state.store.series_by_prefix(prefix);
    let split = state.config.opds.split_items.max(1);
    if series.len() > split {
        for (bucket, count) in state.store.series_prefixes(prefix) {
            let href = format!("/sequencesindex/{}", urlencoding::encode(&bucket));
            let content = i18n::books_count(&state.translations, &ctx.lang, count as u64);
            feed.entries.push(Entry::nav(
                &format!("s:p:{bucket}"),
                &bucket,
                &href,
                &content,
                DEFAULT_UPDATED,
            ));
        }
        return feed;
    }

    let total = series.len();
    let start = (page * ctx.per_page).min(total);
    let end = (start + ctx.per_page).min(total);
    for name in &series[start..end] {
        feed.entries.push(Entry::nav(
            &format!("s:{name}"),
            name,
            &format!("/sequence/{}", urlencoding::encode(name)),
            "",
            DEFAULT_UPDATED,
        ));
    }
    paginate_query(&mut feed, &self_href, page, ctx.per_page, total);
    feed
}

/// `/sequence/{name}`: books of one series in series order.
pub fn build_series_books(ctx: &BuildCtx, name: &str, page: usize) -> Result<Feed, AppError> {
    let state = ctx.state;
    let books = state.store.books_in_series(name, page, ctx.per_page);
    if books.total == 0 && page == 0 {
        return Err(AppError::NotFound(format!("series {name}")));
    }

    let self_href = format!("/sequence/{}", urlencoding::encode(name));
    let mut feed = Feed::new(
        &format!("tag:sequence:{name}:{page}"),
        name,
        &self_href,
        DEFAULT_UPDATED,
    );
    paginate_query(&mut feed, &self_href, page, ctx.per_page, books.total);
    push_book_entries(ctx, &mut feed, &books.items);
    Ok(feed)
}

/// `/genres[/{path}]`: the genre tree, one level at a time.
pub fn build_genres(ctx: &BuildCtx, path: Option<&str>) -> Result<Feed, AppError> {
    let state = ctx.state;
    let tree = state.store.genre_tree();

    let (title, nodes) = match path {
        None => (ctx.tr("root_genres", "By genres"), tree),
        Some(family) => {
            let node = tree
                .into_iter()
                .find(|g| g.id == family)
                .ok_or_else(|| AppError::NotFound(format!("genre {family}")))?;
            (node.name.clone(), node.children)
        }
    };

    let self_href = match path {
        None => "/genres".to_string(),
        Some(p) => format!("/genres/{}", urlencoding::encode(p)),
    };
    let mut feed = Feed::new(
        &format!("tag:genres:{}", path.unwrap_or("")),
        &title,
        &self_href,
        DEFAULT_UPDATED,
    );
    for node in nodes {
        let href = if node.children.is_empty() {
            format!("/genre/{}", urlencoding::encode(&node.id))
        } else {
            format!("/genres/{}", urlencoding::encode(&node.id))
        };
        feed.entries.push(Entry::nav(
            &format!("g:{}", node.id),
            &node.name,
            &href,
            "",
            DEFAULT_UPDATED,
        ));
    }
    Ok(feed)
}

/// `/genre/{id}`: books of one genre.
pub fn build_genre_books(ctx: &BuildCtx, id: &str, page: usize) -> Result<Feed, AppError> {
    let state = ctx.state;
    let books = state.store.books_by_genre(id, page, ctx.per_page);
    if books.total == 0 && page == 0 {
        return Err(AppError::NotFound(format!("genre {id}")));
    }

    let self_href = format!("/genre/{}", urlencoding::encode(id));
    let mut feed = Feed::new(
        &format!("tag:genre:{id}:{page}"),
        id,
        &self_href,
        DEFAULT_UPDATED,
    );
    paginate_query(&mut feed, &self_href, page, ctx.per_page, books.total);
    push_book_entries(ctx, &mut feed, &books.items);
    Ok(feed)
}

/// Initial search: offer the three search types for a term.
pub fn build_search_types(ctx: &BuildCtx, term: &str) -> Feed {
    let encoded = urlencoding::encode(term).into_owned();
    let mut feed = Feed::new(
        &format!("tag:search:{term}"),
        &ctx.tr("search_placeholder", "Search"),
        &format!("/search?searchTerm={encoded}"),
        DEFAULT_UPDATED,
    );
    let options = [
        ("author", ctx.tr("search_authors", "Search in authors")),
        ("book", ctx.tr("search_books", "Search in books")),
        ("series", ctx.tr("search_series", "Search in series")),
    ];
    for (stype, title) in options {
        feed.entries.push(Entry::nav(
            &format!("sr:{stype}"),
            &title,
            &format!("/search?searchType={stype}&searchTerm={encoded}"),
            "",
            DEFAULT_UPDATED,
        ));
    }
    feed
}

/// Typed, paginated search results.
pub fn build_search_results(
    ctx: &BuildCtx,
    stype: SearchType,
    term: &str,
    page: usize,
) -> Feed {
    let state = ctx.state;
    let encoded = urlencoding::encode(term).into_owned();
    let type_str = match stype {
        SearchType::Author => "author",
        SearchType::Book => "book",
        SearchType::Series => "series",
    };
    let self_href = format!("/search?searchType={type_str}&searchTerm={encoded}");
    let mut feed = Feed::new(
        &format!("tag:search:{type_str}:{term}:{page}"),
        term,
        &self_href,
        DEFAULT_UPDATED,
    );

    match stype {
        SearchType::Book => {
            let books = state.store.search_books(term, page, ctx.per_page);
            let prev = (page > 0)
                .then(|| format!("{self_href}&pageNumber={}", page - 1));
            let next = books
                .has_next(page, ctx.per_page)
                .then(|| format!("{self_href}&pageNumber={}", page + 1));
            feed.add_pagination(prev, next);
            push_book_entries(ctx, &mut feed, &books.items);
        }
        SearchType::Author => {
            let details_enabled = state.menu.enabled("author-details");
            for name in state.store.search_authors(term) {
                let href = if details_enabled {
                    format!("/author-details/{}", urlencoding::encode(&name))
                } else {
                    format!("/author-alphabetic/{}", urlencoding::encode(&name))
                };
                feed.entries.push(Entry::nav(
                    &format!("a:{name}"),
                    &name,
                    &href,
                    "",
                    DEFAULT_UPDATED,
                ));
            }
        }
        SearchType::Series => {
            for name in state.store.search_series(term) {
                feed.entries.push(Entry::nav(
                    &format!("s:{name}"),
                    &name,
                    &format!("/sequence/{}", urlencoding::encode(&name)),
                    "",
                    DEFAULT_UPDATED,
                ));
            }
        }
    }
    feed
}

/// One acquisition entry per book.
fn push_book_entries(ctx: &BuildCtx, feed: &mut Feed, books: &[Book]) {
    for book in books {
        feed.entries.push(book_entry(ctx, book));
    }
}

fn book_entry(ctx: &BuildCtx, book: &Book) -> Entry {
    let stem = translit::fb2_entry_name(book.first_author(), &book.title, &book.id);
    let stem = stem.trim_end_matches(".fb2").to_string();
    let mut links = Vec::new();

    match book.format {
        crate::store::BookFormat::Fb2 => {
            if ctx.accepts_fb2 {
                links.push(FeedLink::new(
                    format!("/{}/{stem}.fb2.zip", book.id),
                    REL_ACQUISITION,
                    "application/fb2+zip",
                ));
            }
            links.push(FeedLink::new(
                format!("/{}/{stem}.epub", book.id),
                REL_ACQUISITION,
                "application/epub+zip",
            ));
            links.push(FeedLink::new(
                format!("/{}/{stem}.mobi", book.id),
                REL_ACQUISITION,
                "application/x-mobipocket-ebook",
            ));
        }
        crate::store::BookFormat::Epub => {
            links.push(FeedLink::new(
                format!("/{}/{stem}.epub", book.id),
                REL_ACQUISITION,
                "application/epub+zip",
            ));
        }
    }
    links.push(FeedLink::new(
        format!("/cover/{}.jpeg", book.id),
        REL_IMAGE,
        "image/jpeg",
    ));
    links.push(FeedLink::new(
        format!("/thumbnail/{}.jpeg", book.id),
        REL_THUMBNAIL,
        "image/jpeg",
    ));

    let format = match book.format {
        crate::store::BookFormat::Fb2 => "fb2",
        crate::store::BookFormat::Epub => "epub",
    };

    Entry {
        id: format!("tag:book:{}", book.id),
        title: book.title.clone(),
        updated: book
            .book_date
            .map(|d| format!("{d}T00:00:00Z"))
            .unwrap_or_else(|| DEFAULT_UPDATED.to_string()),
        content: book.annotation.clone(),
        authors: book.authors.clone(),
        categories: book
            .genres
            .iter()
            .map(|g| (g.clone(), g.replace('_', " ")))
            .collect(),
        links,
        book: Some(BookInfo {
            format: format.to_string(),
            size: book.size,
        }),
    }
}

/// Path-style pagination: `{base}/{page}`.
fn paginate_path(feed: &mut Feed, base: &str, page: usize, per_page: usize, books: &Page<Book>) {
    let prev = (page > 0).then(|| format!("{base}/{}", page - 1));
    let next = books
        .has_next(page, per_page)
        .then(|| format!("{base}/{}", page + 1));
    feed.add_pagination(prev, next);
}

/// Query-style pagination: `{base}?pageNumber={page}`.
fn paginate_query(feed: &mut Feed, base: &str, page: usize, per_page: usize, total: usize) {
    let sep = if base.contains('?') { '&' } else { '?' };
    let prev = (page > 0).then(|| format!("{base}{sep}pageNumber={}", page - 1));
    let next = ((page + 1) * per_page < total)
        .then(|| format!("{base}{sep}pageNumber={}", page + 1));
    feed.add_pagination(prev, next);
}

// ---------------------------------------------------------------- handlers

fn rewrite_for(state: &AppState, headers: &HeaderMap) -> UriRewrite {
    let absolute_host = if state.config.opds.use_absolute_uri {
        headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    } else {
        None
    };
    UriRewrite {
        prefix: state.config.opds.root_prefix.clone(),
        absolute_host,
    }
}

fn respond(state: &AppState, headers: &HeaderMap, mode: OutputMode, feed: &Feed) -> Response {
    match mode {
        OutputMode::Atom => match atom::render(feed, &rewrite_for(state, headers)) {
            Ok(body) => {
                (StatusCode::OK, [(header::CONTENT_TYPE, ATOM_XML)], body).into_response()
            }
            Err(e) => AppError::Internal(format!("atom render: {e}")).into_response(),
        },
        OutputMode::Html => crate::web::html_response(state, headers, feed),
    }
}

fn gate(state: &AppState, key: &str) -> Result<(), AppError> {
    if state.menu.enabled(key) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("section {key} is disabled")))
    }
}

/// GET / — root catalog.
pub async fn root(
    State(state): State<AppState>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    let ctx = BuildCtx::for_mode(&state, &headers, mode);
    respond(&state, &headers, mode, &build_root(&ctx))
}

/// GET /newdate/{page}.
pub async fn newdate(
    State(state): State<AppState>,
    Path(page): Path<usize>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    if let Err(e) = gate(&state, "newdate") {
        return e.into_response();
    }
    let ctx = BuildCtx::for_mode(&state, &headers, mode);
    respond(&state, &headers, mode, &build_new_books(&ctx, true, page))
}

/// GET /newtitle/{page}.
pub async fn newtitle(
    State(state): State<AppState>,
    Path(page): Path<usize>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    if let Err(e) = gate(&state, "newtitle") {
        return e.into_response();
    }
    let ctx = BuildCtx::for_mode(&state, &headers, mode);
    respond(&state, &headers, mode, &build_new_books(&ctx, false, page))
}

/// GET /authorsindex and /authorsindex/{prefix}.
pub async fn authors_index(
    State(state): State<AppState>,
    prefix: Option<Path<String>>,
    Query(q): Query<PageQuery>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    if let Err(e) = gate(&state, "authorsindex") {
        return e.into_response();
    }
    let prefix = prefix.map(|Path(p)| p).unwrap_or_default();
    let ctx = BuildCtx::for_mode(&state, &headers, mode);
    let feed = build_authors_index(&ctx, &prefix, q.page_number.unwrap_or(0));
    respond(&state, &headers, mode, &feed)
}

/// GET /author-details/{name}.
pub async fn author_details(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    if let Err(e) = gate(&state, "author-details") {
        return e.into_response();
    }
    let ctx = BuildCtx::for_mode(&state, &headers, mode);
    match build_author_details(&ctx, &name) {
        Ok(feed) => respond(&state, &headers, mode, &feed),
        Err(e) => e.into_response(),
    }
}

/// GET /author-series/{name}.
pub async fn author_series(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    if let Err(e) = gate(&state, "author-series") {
        return e.into_response();
    }
    let ctx = BuildCtx::for_mode(&state, &headers, mode);
    match build_author_series(&ctx, &name) {
        Ok(feed) => respond(&state, &headers, mode, &feed),
        Err(e) => e.into_response(),
    }
}

async fn author_books_response(
    state: AppState,
    section: &str,
    books_mode: AuthorBooks,
    name: String,
    page: usize,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    if let Err(e) = gate(&state, section) {
        return e.into_response();
    }
    let ctx = BuildCtx::for_mode(&state, &headers, mode);
    match build_author_books(&ctx, &name, books_mode, page) {
        Ok(feed) => respond(&state, &headers, mode, &feed),
        Err(e) => e.into_response(),
    }
}

/// GET /author-no-series/{name}.
pub async fn author_no_series(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<PageQuery>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    author_books_response(
        state,
        "author-no-series",
        AuthorBooks::NoSeries,
        name,
        q.page_number.unwrap_or(0),
        headers,
        mode,
    )
    .await
}

/// GET /author-alphabetic/{name}.
pub async fn author_alphabetic(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<PageQuery>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    author_books_response(
        state,
        "author-alphabetic",
        AuthorBooks::Alphabetic,
        name,
        q.page_number.unwrap_or(0),
        headers,
        mode,
    )
    .await
}

/// GET /author-by-date/{name}.
pub async fn author_by_date(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<PageQuery>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    author_books_response(
        state,
        "author-by-date",
        AuthorBooks::ByDate,
        name,
        q.page_number.unwrap_or(0),
        headers,
        mode,
    )
    .await
}

/// GET /sequencesindex and /sequencesindex/{prefix}.
pub async fn series_index(
    State(state): State<AppState>,
    prefix: Option<Path<String>>,
    Query(q): Query<PageQuery>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    if let Err(e) = gate(&state, "sequencesindex") {
        return e.into_response();
    }
    let prefix = prefix.map(|Path(p)| p).unwrap_or_default();
    let ctx = BuildCtx::for_mode(&state, &headers, mode);
    let feed = build_series_index(&ctx, &prefix, q.page_number.unwrap_or(0));
    respond(&state, &headers, mode, &feed)
}

/// GET /sequence/{name}.
pub async fn sequence(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<PageQuery>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    if let Err(e) = gate(&state, "sequencesindex") {
        return e.into_response();
    }
    let ctx = BuildCtx::for_mode(&state, &headers, mode);
    match build_series_books(&ctx, &name, q.page_number.unwrap_or(0)) {
        Ok(feed) => respond(&state, &headers, mode, &feed),
        Err(e) => e.into_response(),
    }
}

/// GET /genres and /genres/{path}.
pub async fn genres(
    State(state): State<AppState>,
    path: Option<Path<String>>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    if let Err(e) = gate(&state, "genres") {
        return e.into_response();
    }
    let ctx = BuildCtx::for_mode(&state, &headers, mode);
    match build_genres(&ctx, path.as_ref().map(|Path(p)| p.as_str())) {
        Ok(feed) => respond(&state, &headers, mode, &feed),
        Err(e) => e.into_response(),
    }
}

/// GET /genre/{id}.
pub async fn genre_books(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<PageQuery>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    if let Err(e) = gate(&state, "genres") {
        return e.into_response();
    }
    let ctx = BuildCtx::for_mode(&state, &headers, mode);
    match build_genre_books(&ctx, &id, q.page_number.unwrap_or(0)) {
        Ok(feed) => respond(&state, &headers, mode, &feed),
        Err(e) => e.into_response(),
    }
}

/// GET /search?searchTerm=…[&searchType=…][&pageNumber=…].
pub async fn search(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
    headers: HeaderMap,
    mode: OutputMode,
) -> Response {
    let term = q.search_term.unwrap_or_default();
    if term.trim().is_empty() {
        return AppError::NotFound("empty search term".to_string()).into_response();
    }
    let ctx = BuildCtx::for_mode(&state, &headers, mode);
    let feed = match q.search_type.as_deref().and_then(SearchType::parse) {
        Some(stype) => {
            build_search_results(&ctx, stype, term.trim(), q.page_number.unwrap_or(0))
        }
        None => build_search_types(&ctx, term.trim()),
    };
    respond(&state, &headers, mode, &feed)
}

/// GET /opds-opensearch.xml.
pub async fn opensearch(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let body = atom::opensearch_descriptor(
        &state.config.opds.server_name,
        &rewrite_for(&state, &headers),
    );
    // Legacy OPDS clients expect the atom content type here.
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, OPENSEARCH_TYPE)],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::AppState;
    use crate::store::memory::{MemoryStore, sample_books};
    use std::sync::Arc;

    fn test_state(structure: &str) -> AppState {
        let mut config = Config::default();
        config.opds.structure = structure.to_string();
        AppState::new(
            config,
            Arc::new(MemoryStore::new(sample_books(), false)),
            tera::Tera::default(),
            crate::i18n::load_translations().unwrap(),
        )
    }

    fn ctx(state: &AppState) -> BuildCtx<'_> {
        BuildCtx {
            state,
            lang: "en".to_string(),
            per_page: 2,
            accepts_fb2: true,
        }
    }

    #[test]
    fn test_root_feed_lists_enabled_sections() {
        let state = test_state("");
        let feed = build_root(&ctx(&state));
        assert_eq!(feed.entries.len(), 5);
        assert!(feed.subtitle.contains('5'));
    }

    #[test]
    fn test_root_feed_gating_hides_sections() {
        let state = test_state("genres:0;newdate:0");
        let feed = build_root(&ctx(&state));
        assert_eq!(feed.entries.len(), 3);
        assert!(!feed
            .entries
            .iter()
            .any(|e| e.primary_href().unwrap_or("").contains("/genres")));
    }

    #[test]
    fn test_new_books_pagination() {
        let state = test_state("");
        let c = ctx(&state);
        let feed = build_new_books(&c, false, 0);
        assert_eq!(feed.entries.len(), 2);
        assert!(feed.next_href().is_some());
        assert!(feed.prev_href().is_none());

        let last = build_new_books(&c, false, 2);
        assert_eq!(last.entries.len(), 1);
        assert!(last.next_href().is_none());
        assert!(last.prev_href().is_some());
    }

    #[test]
    fn test_book_entry_links() {
        let state = test_state("");
        let c = ctx(&state);
        let feed = build_new_books(&c, true, 0);
        let entry = feed
            .entries
            .iter()
            .find(|e| e.book.is_some())
            .expect("book entry");
        let types: Vec<&str> = entry.links.iter().map(|l| l.link_type.as_str()).collect();
        assert!(types.contains(&"application/fb2+zip"));
        assert!(types.contains(&"application/epub+zip"));
        assert!(types.contains(&"application/x-mobipocket-ebook"));
        assert!(types.contains(&"image/jpeg"));
        assert!(entry
            .links
            .iter()
            .any(|l| l.href.starts_with("/cover/") && l.rel == REL_IMAGE));
    }

    #[test]
    fn test_fb2_link_hidden_for_non_fb2_client() {
        let state = test_state("");
        let mut c = ctx(&state);
        c.accepts_fb2 = false;
        let feed = build_new_books(&c, true, 0);
        let entry = feed.entries.iter().find(|e| e.book.is_some()).unwrap();
        assert!(!entry
            .links
            .iter()
            .any(|l| l.link_type == "application/fb2+zip"));
    }

    #[test]
    fn test_authors_index_lists_when_small() {
        let state = test_state("");
        let c = ctx(&state);
        let feed = build_authors_index(&c, "", 0);
        // Three distinct authors, split threshold is 100: plain listing,
        // paginated at 2 per page.
        assert_eq!(feed.entries.len(), 2);
        assert!(feed.next_href().is_some());
        assert!(feed.entries[0]
            .primary_href()
            .unwrap()
            .starts_with("/author-details/"));
    }

    #[test]
    fn test_authors_index_rewrites_links_when_details_disabled() {
        let state = test_state("author-details:0");
        let c = ctx(&state);
        let feed = build_authors_index(&c, "", 0);
        assert!(feed.entries[0]
            .primary_href()
            .unwrap()
            .starts_with("/author-alphabetic/"));
    }

    #[test]
    fn test_author_details_and_books() {
        let state = test_state("");
        let c = ctx(&state);
        let feed = build_author_details(&c, "Isaac Asimov").unwrap();
        assert_eq!(feed.entries.len(), 4);
        assert!(build_author_details(&c, "Nobody").is_err());

        let books = build_author_books(&c, "Isaac Asimov", AuthorBooks::NoSeries, 0).unwrap();
        assert_eq!(books.entries.len(), 1);
    }

    #[test]
    fn test_series_feeds() {
        let state = test_state("");
        let c = ctx(&state);
        let index = build_series_index(&c, "", 0);
        assert!(!index.entries.is_empty());

        let feed = build_series_books(&c, "Foundation", 0).unwrap();
        assert_eq!(feed.entries.len(), 2);
        assert!(build_series_books(&c, "No Such Series", 0).is_err());
    }

    #[test]
    fn test_genre_tree_navigation() {
        let state = test_state("");
        let c = ctx(&state);
        let root = build_genres(&c, None).unwrap();
        assert!(root.entries.iter().any(|e| e.title == "Sf"));

        let family = build_genres(&c, Some("sf")).unwrap();
        assert!(family
            .entries
            .iter()
            .any(|e| e.primary_href().unwrap().contains("/genre/sf_detective")));
        assert!(build_genres(&c, Some("nope")).is_err());

        let books = build_genre_books(&c, "sf", 0).unwrap();
        assert_eq!(books.entries.len(), 2);
    }

    #[test]
    fn test_search_flow() {
        let state = test_state("");
        let c = ctx(&state);
        let types = build_search_types(&c, "foundation");
        assert_eq!(types.entries.len(), 3);
        assert!(types.entries[0]
            .primary_href()
            .unwrap()
            .contains("searchType=author"));

        let results = build_search_results(&c, SearchType::Book, "foundation", 0);
        assert_eq!(results.entries.len(), 2);

        let authors = build_search_results(&c, SearchType::Author, "azimov", 0);
        assert_eq!(authors.entries.len(), 1);
    }
}
