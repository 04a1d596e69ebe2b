//! Book artifact downloads: FB2-as-ZIP, EPUB (native or converted in
//! memory), and MOBI.

use std::io::{Cursor, Read, Write};
use std::sync::atomic::Ordering;

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::state::AppState;
use crate::store::{Book, BookFormat};
use crate::text::translit;

/// GET /{bookid}/{file} — dispatch on the requested extension.
pub async fn download(
    State(state): State<AppState>,
    Path((book_id, file)): Path<(String, String)>,
) -> Response {
    let Some(book) = state.store.get_book(&book_id) else {
        return AppError::NotFound(format!("book {book_id}")).into_response();
    };

    let file_lower = file.to_lowercase();
    let result = if file_lower.ends_with(".fb2.zip") || file_lower.ends_with(".zip") {
        serve_fb2_zip(&state, &book).await
    } else if file_lower.ends_with(".epub") {
        serve_epub(&state, &book).await
    } else if file_lower.ends_with(".mobi") {
        serve_mobi(&state, &book).await
    } else {
        Err(AppError::NotFound(format!("unknown artifact {file}")))
    };

    match result {
        Ok(response) => {
            state.stats.books_sent.fetch_add(1, Ordering::Relaxed);
            response
        }
        Err(e) => e.into_response(),
    }
}

async fn serve_fb2_zip(state: &AppState, book: &Book) -> Result<Response, AppError> {
    if book.format != BookFormat::Fb2 {
        return Err(AppError::NotFound("not an FB2 book".to_string()));
    }
    let data = read_book(state, book).await?;
    let entry_name = translit::fb2_entry_name(book.first_author(), &book.title, &book.id);
    let zipped = wrap_in_zip(&entry_name, &data)
        .map_err(|e| AppError::Internal(format!("zip failed: {e}")))?;
    Ok(file_response(
        zipped,
        &format!("{entry_name}.zip"),
        "application/fb2+zip",
    ))
}

async fn serve_epub(state: &AppState, book: &Book) -> Result<Response, AppError> {
    let data = read_book(state, book).await?;
    let file_name = format!(
        "{}.epub",
        translit::fb2_entry_name(book.first_author(), &book.title, &book.id)
            .trim_end_matches(".fb2")
    );
    let bytes = match book.format {
        BookFormat::Epub => data,
        BookFormat::Fb2 => {
            let convert = state.config.convert.clone();
            let book_id = book.id.clone();
            tokio::task::spawn_blocking(move || convert_fb2_to_epub(&convert, &book_id, &data))
                .await
                .map_err(|e| AppError::Internal(format!("conversion task failed: {e}")))??
        }
    };
    Ok(file_response(bytes, &file_name, "application/epub+zip"))
}

/// FB2→EPUB through the built-in converter, or through the configured
/// external binary when the built-in one is disabled.
fn convert_fb2_to_epub(
    convert: &crate::config::ConvertConfig,
    book_id: &str,
    data: &[u8],
) -> Result<Vec<u8>, AppError> {
    if convert.use_native {
        let doc = crate::fb2::parse(data);
        return crate::epub::build(&doc, Some(book_id))
            .map_err(|e| AppError::Converter(format!("fb2 to epub: {e}")));
    }
    if convert.converter_path.as_os_str().is_empty() {
        return Err(AppError::Converter(
            "built-in converter disabled and no converter_path configured".to_string(),
        ));
    }
    crate::convert::fb2_to_epub(&convert.converter_path, data)
        .map_err(|e| AppError::Converter(format!("external converter: {e}")))
}

async fn serve_mobi(state: &AppState, book: &Book) -> Result<Response, AppError> {
    if book.format != BookFormat::Fb2 {
        return Err(AppError::NotFound("no MOBI rendition".to_string()));
    }
    let data = read_book(state, book).await?;
    let file_name = format!(
        "{}.mobi",
        translit::fb2_entry_name(book.first_author(), &book.title, &book.id)
            .trim_end_matches(".fb2")
    );
    let bytes = tokio::task::spawn_blocking(move || {
        let doc = crate::fb2::parse(&data);
        crate::mobi::build(&doc)
    })
    .await
    .map_err(|e| AppError::Internal(format!("conversion task failed: {e}")))?;
    Ok(file_response(bytes, &file_name, "application/x-mobipocket-ebook"))
}

async fn read_book(state: &AppState, book: &Book) -> Result<Vec<u8>, AppError> {
    let root = state.config.library.root_path.clone();
    let file_path = book.file_path.clone();
    let id = book.id.clone();
    tokio::task::spawn_blocking(move || read_book_file(&root, &file_path))
        .await
        .map_err(|e| AppError::Internal(format!("read task failed: {e}")))?
        .map_err(|e| {
            tracing::warn!("Failed to read book {id}: {e}");
            AppError::NotFound(format!("file for book {id}"))
        })
}

/// Read book bytes from disk. `container@entry` means a file inside a
/// ZIP container.
pub fn read_book_file(
    root: &std::path::Path,
    file_path: &str,
) -> Result<Vec<u8>, std::io::Error> {
    match file_path.split_once('@') {
        Some((container, entry)) => {
            let zip_path = root.join(container);
            let file = std::fs::File::open(&zip_path)?;
            let reader = std::io::BufReader::new(file);
            let mut archive = zip::ZipArchive::new(reader).map_err(std::io::Error::other)?;
            let mut inner = archive
                .by_name(entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e))?;
            let mut data = Vec::new();
            inner.read_to_end(&mut data)?;
            Ok(data)
        }
        None => std::fs::read(root.join(file_path)),
    }
}

/// Wrap file bytes into a one-entry DEFLATE ZIP.
pub fn wrap_in_zip(entry_name: &str, data: &[u8]) -> Result<Vec<u8>, zip::result::ZipError> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    writer.start_file(entry_name, options)?;
    writer.write_all(data)?;
    Ok(writer.finish()?.into_inner())
}

fn file_response(data: Vec<u8>, filename: &str, mime: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
            (header::CONTENT_LENGTH, data.len().to_string()),
        ],
        data,
    )
        .into_response()
}
