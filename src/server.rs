//! Serving glue: request guards, common response headers, the embedded
//! favicon, and the bind/serve loop with its concurrency cap, request
//! deadline and cooperative shutdown.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode, Uri, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

/// Request URLs longer than this are rejected outright.
pub const MAX_URL_LENGTH: usize = 2048;
/// POST bodies are capped at 64 KiB.
pub const MAX_POST_BODY: usize = 64 * 1024;
/// Whole-request deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Concurrent connection cap; excess requests queue.
pub const MAX_CONNECTIONS: usize = 100;

pub const SERVER_HEADER: &str = concat!("TinyOPDS/", env!("CARGO_PKG_VERSION"));

/// Normalise a request path: collapse duplicate slashes, decode the
/// `%7B`/`%7D` pair search templates leak through, ensure a leading
/// slash. Idempotent.
pub fn normalise_path(path: &str) -> String {
    let decoded = path
        .replace("%7B", "{")
        .replace("%7b", "{")
        .replace("%7D", "}")
        .replace("%7d", "}");
    let mut out = String::with_capacity(decoded.len() + 1);
    out.push('/');
    let mut prev_slash = true;
    for c in decoded.chars() {
        if c == '/' {
            if !prev_slash {
                out.push('/');
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}

/// Outermost guard: reject oversized URLs, normalise the path, and add
/// the common response headers. Bodies on error responses stay empty.
pub async fn request_guard(mut request: Request, next: Next) -> Response {
    if request.uri().to_string().len() > MAX_URL_LENGTH {
        let mut response = StatusCode::BAD_REQUEST.into_response();
        common_headers(&mut response);
        return response;
    }

    let path = request.uri().path().to_string();
    let normalised = normalise_path(&path);
    if normalised != path {
        let new_uri = match request.uri().query() {
            Some(q) => format!("{normalised}?{q}"),
            None => normalised,
        };
        if let Ok(uri) = new_uri.parse::<Uri>() {
            *request.uri_mut() = uri;
        }
    }

    let mut response = next.run(request).await;
    common_headers(&mut response);
    response
}

fn common_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_HEADER));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache"),
    );
}

/// GET /favicon.ico — a 16×16 32-bit icon built at startup.
pub async fn favicon() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/x-icon")],
        favicon_bytes(),
    )
        .into_response()
}

/// An open-book glyph on a teal field, assembled as a classic
/// ICONDIR + BITMAPINFOHEADER icon.
pub fn favicon_bytes() -> Vec<u8> {
    const W: usize = 16;
    const H: usize = 16;

    let mut out = Vec::with_capacity(6 + 16 + 40 + W * H * 4 + H * 4);
    // ICONDIR: reserved, type 1 (icon), one image.
    out.extend_from_slice(&[0, 0, 1, 0, 1, 0]);
    // ICONDIRENTRY: 16x16, 0 palette, reserved, 1 plane, 32 bpp.
    let image_size = (40 + W * H * 4 + H * 4) as u32;
    out.extend_from_slice(&[16, 16, 0, 0, 1, 0, 32, 0]);
    out.extend_from_slice(&image_size.to_le_bytes());
    out.extend_from_slice(&22u32.to_le_bytes()); // data offset

    // BITMAPINFOHEADER with doubled height (XOR + AND masks).
    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&(W as i32).to_le_bytes());
    out.extend_from_slice(&((H * 2) as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&32u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // no compression
    out.extend_from_slice(&((W * H * 4 + H * 4) as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 16]); // resolution + palette fields

    // Pixel rows, bottom-up BGRA: a white "page" block on teal.
    for y in (0..H).rev() {
        for x in 0..W {
            let page = (3..13).contains(&x) && (3..12).contains(&y);
            let spine = x == 7 || x == 8;
            let (b, g, r) = if page && !spine {
                (0xF5, 0xF5, 0xF5)
            } else if page {
                (0xB0, 0xB0, 0xB0)
            } else {
                (0x80, 0x66, 0x00)
            };
            out.extend_from_slice(&[b, g, r, 0xFF]);
        }
    }
    // AND mask: fully opaque.
    out.extend_from_slice(&vec![0u8; H * 4]);
    out
}

/// Bind and serve until the shutdown future resolves. In-flight
/// requests drain to completion or hit the request deadline.
pub async fn serve(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let interface: IpAddr = state
        .config
        .server
        .interface
        .parse()
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let addr = SocketAddr::new(interface, state.config.server.port);

    let app = crate::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    let stats = state.stats.clone();
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    stats.log_summary();
    result
}
