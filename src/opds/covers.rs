//! Cover and thumbnail endpoints with an in-memory LRU cache.

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use image::ImageReader;
use image::imageops::FilterType;

use crate::state::AppState;
use crate::store::{Book, BookFormat};

use super::download::read_book_file;

const THUMB_SIZE: u32 = 200;
const JPEG_QUALITY: u8 = 85;
const CACHE_CAPACITY: usize = 128;

/// LRU cache of rendered JPEGs keyed by `cover:{id}` / `thumb:{id}`.
///
/// Access stamps come from one atomic counter; eviction drops the entry
/// with the oldest stamp once the map exceeds capacity.
pub struct CoverCache {
    entries: DashMap<String, (Vec<u8>, u64)>,
    clock: AtomicU64,
    capacity: usize,
}

impl Default for CoverCache {
    fn default() -> Self {
        Self::with_capacity(CACHE_CAPACITY)
    }
}

impl CoverCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            clock: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut entry = self.entries.get_mut(key)?;
        entry.1 = stamp;
        Some(entry.0.clone())
    }

    pub fn put(&self, key: &str, data: Vec<u8>) {
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key.to_string(), (data, stamp));
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().1)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// GET /cover/{bookid}.jpeg — full-size cover.
pub async fn cover(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    serve_cover(state, file, false).await
}

/// GET /thumbnail/{bookid}.jpeg — downscaled cover.
pub async fn thumbnail(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    serve_cover(state, file, true).await
}

async fn serve_cover(state: AppState, file: String, as_thumbnail: bool) -> Response {
    let book_id = file
        .strip_suffix(".jpeg")
        .or_else(|| file.strip_suffix(".jpg"))
        .unwrap_or(&file)
        .to_string();

    let Some(book) = state.store.get_book(&book_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let key = if as_thumbnail {
        format!("thumb:{book_id}")
    } else {
        format!("cover:{book_id}")
    };
    if let Some(cached) = state.covers.get(&key) {
        state.stats.images_sent.fetch_add(1, Ordering::Relaxed);
        return jpeg_response(cached);
    }

    let root = state.config.library.root_path.clone();
    let rendered = tokio::task::spawn_blocking(move || {
        let raw = extract_cover(&root, &book)?;
        render_jpeg(&raw, as_thumbnail)
    })
    .await;

    match rendered {
        Ok(Some(jpeg)) => {
            state.covers.put(&key, jpeg.clone());
            state.stats.images_sent.fetch_add(1, Ordering::Relaxed);
            jpeg_response(jpeg)
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn jpeg_response(data: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CONTENT_LENGTH, data.len().to_string()),
        ],
        data,
    )
        .into_response()
}

/// Pull the raw cover bytes out of the book file.
fn extract_cover(root: &std::path::Path, book: &Book) -> Option<Vec<u8>> {
    let data = read_book_file(root, &book.file_path).ok()?;
    match book.format {
        BookFormat::Fb2 => {
            let doc = crate::fb2::parse(&data);
            doc.cover().map(|bin| bin.data.clone())
        }
        BookFormat::Epub => extract_epub_cover(&data),
    }
}

/// Best-effort EPUB cover: the first archive entry whose name suggests
/// a cover image.
fn extract_epub_cover(data: &[u8]) -> Option<Vec<u8>> {
    use std::io::Read;

    let mut archive = zip::ZipArchive::new(Cursor::new(data)).ok()?;
    let candidate = (0..archive.len()).find_map(|i| {
        let entry = archive.by_index(i).ok()?;
        let name = entry.name().to_lowercase();
        let is_image = name.ends_with(".jpg")
            || name.ends_with(".jpeg")
            || name.ends_with(".png")
            || name.ends_with(".gif");
        (is_image && name.contains("cover")).then(|| entry.name().to_string())
    })?;

    let mut entry = archive.by_name(&candidate).ok()?;
    let mut out = Vec::new();
    entry.read_to_end(&mut out).ok()?;
    Some(out)
}

/// Decode, optionally downscale, and re-encode as JPEG.
fn render_jpeg(raw: &[u8], as_thumbnail: bool) -> Option<Vec<u8>> {
    let img = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .ok()?
        .decode()
        .ok()?;
    let img = if as_thumbnail {
        img.resize(THUMB_SIZE, THUMB_SIZE * 2, FilterType::Lanczos3)
    } else {
        img
    };

    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    img.to_rgb8().write_with_encoder(encoder).ok()?;
    Some(out)
}
