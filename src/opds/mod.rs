pub mod atom;
pub mod covers;
pub mod download;
pub mod feed;
pub mod feeds;

use axum::Router;
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;

use crate::auth;
use crate::state::AppState;

/// Per-request log line: peer, method, URI, status, elapsed.
async fn request_logging(request: axum::extract::Request, next: Next) -> Response {
    let start = std::time::Instant::now();
    let addr = auth::peer_ip(&request);
    let method = request.method().clone();
    let uri = request.uri().to_string();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    tracing::info!("{addr} {method} {uri} {status} {elapsed:.1?}");

    response
}

/// POST has no place in a read-only catalog.
async fn unmatched(method: Method) -> StatusCode {
    if method == Method::POST {
        StatusCode::METHOD_NOT_ALLOWED
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Build the catalog router. The same routes serve both the OPDS and
/// the web prefix; only the rendering differs (see `web::router`).
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(feeds::root))
        .route("/newdate/{page}", get(feeds::newdate))
        .route("/newtitle/{page}", get(feeds::newtitle))
        .route("/authorsindex", get(feeds::authors_index))
        .route("/authorsindex/{prefix}", get(feeds::authors_index))
        .route("/author-details/{name}", get(feeds::author_details))
        .route("/author-series/{name}", get(feeds::author_series))
        .route("/author-no-series/{name}", get(feeds::author_no_series))
        .route("/author-alphabetic/{name}", get(feeds::author_alphabetic))
        .route("/author-by-date/{name}", get(feeds::author_by_date))
        .route("/sequencesindex", get(feeds::series_index))
        .route("/sequencesindex/{prefix}", get(feeds::series_index))
        .route("/sequence/{name}", get(feeds::sequence))
        .route("/genres", get(feeds::genres))
        .route("/genres/{path}", get(feeds::genres))
        .route("/genre/{id}", get(feeds::genre_books))
        .route("/search", get(feeds::search))
        .route("/opds-opensearch.xml", get(feeds::opensearch))
        .route("/cover/{file}", get(covers::cover))
        .route("/thumbnail/{file}", get(covers::thumbnail))
        .route("/{book_id}/{file}", get(download::download))
        .fallback(unmatched)
        .layer(middleware::from_fn_with_state(state, auth::auth_layer))
        .layer(middleware::from_fn(request_logging))
}
