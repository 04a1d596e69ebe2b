//! Browser-mode rendering: the same catalog feeds, served as HTML.
//!
//! The web router is the catalog router with an [`OutputMode::Html`]
//! marker; handlers then hand the typed feed to a compiled tera
//! template instead of the Atom writer. Template parameters carry the
//! server version, library name and book count, and the localized UI
//! strings.

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};

use crate::error::AppError;
use crate::i18n;
use crate::opds;
use crate::opds::atom::UriRewrite;
use crate::opds::feed::Feed;
use crate::opds::feeds::{OutputMode, detect_lang};
use crate::state::AppState;

pub const FEED_TEMPLATE: &str = include_str!("../../templates/feed.html");

async fn mark_html(mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(OutputMode::Html);
    next.run(request).await
}

/// The catalog router in HTML mode.
pub fn router(state: AppState) -> Router<AppState> {
    opds::router(state).layer(middleware::from_fn(mark_html))
}

/// A tera instance with the feed template compiled in.
pub fn default_tera() -> tera::Tera {
    let mut tera = tera::Tera::default();
    tera.add_raw_template("feed.html", FEED_TEMPLATE)
        .expect("embedded feed template must parse");
    tera
}

/// Render a feed as an HTML page.
pub fn html_response(state: &AppState, headers: &HeaderMap, feed: &Feed) -> Response {
    let rewrite = UriRewrite {
        prefix: state.config.opds.http_prefix.clone(),
        absolute_host: if state.config.opds.use_absolute_uri {
            headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        } else {
            None
        },
    };
    let feed = rewritten(feed, &rewrite);

    let lang = detect_lang(headers, state);
    let locale = i18n::get_locale(&state.translations, &lang);
    let mut strings = locale.get("web").cloned().unwrap_or_default();
    if let (Some(obj), Some(opds_section)) = (strings.as_object_mut(), locale.get("opds")) {
        // The search placeholder lives in the opds section.
        obj.insert(
            "search_placeholder".to_string(),
            opds_section
                .get("search_placeholder")
                .cloned()
                .unwrap_or_else(|| serde_json::Value::String("Search".to_string())),
        );
    }

    let mut ctx = tera::Context::new();
    ctx.insert("feed", &feed);
    ctx.insert("lang", &lang);
    ctx.insert("version", env!("CARGO_PKG_VERSION"));
    ctx.insert("library_name", &state.config.opds.server_name);
    ctx.insert(
        "book_count",
        &i18n::books_count(&state.translations, &lang, state.store.count() as u64),
    );
    ctx.insert("search_action", &rewrite.apply("/search"));
    ctx.insert("t", &strings);

    match render_template(state, &ctx) {
        Ok(html) => (StatusCode::OK, Html(html)).into_response(),
        Err(e) => AppError::Internal(format!("template render: {e}")).into_response(),
    }
}

/// Debug builds reload the template from disk on every request so the
/// markup can be iterated without a rebuild.
fn render_template(state: &AppState, ctx: &tera::Context) -> Result<String, tera::Error> {
    #[cfg(debug_assertions)]
    {
        let disk = std::path::Path::new("templates/feed.html");
        if disk.exists() {
            let mut tera = tera::Tera::default();
            tera.add_template_file(disk, Some("feed.html"))?;
            return tera.render("feed.html", ctx);
        }
    }
    state.tera.render("feed.html", ctx)
}

fn rewritten(feed: &Feed, rewrite: &UriRewrite) -> Feed {
    let mut feed = feed.clone();
    feed.self_href = rewrite.apply(&feed.self_href);
    for link in &mut feed.links {
        link.href = rewrite.apply(&link.href);
    }
    for entry in &mut feed.entries {
        for link in &mut entry.links {
            link.href = rewrite.apply(&link.href);
        }
    }
    feed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::opds::feeds::{BuildCtx, build_root};
    use crate::store::memory::{MemoryStore, sample_books};
    use std::sync::Arc;

    fn test_state() -> AppState {
        AppState::new(
            Config::default(),
            Arc::new(MemoryStore::new(sample_books(), false)),
            default_tera(),
            crate::i18n::load_translations().unwrap(),
        )
    }

    #[test]
    fn test_default_tera_has_template() {
        let tera = default_tera();
        assert!(tera.get_template_names().any(|n| n == "feed.html"));
    }

    #[test]
    fn test_rewritten_applies_prefix_everywhere() {
        let state = test_state();
        let ctx = BuildCtx {
            state: &state,
            lang: "en".to_string(),
            per_page: 10,
            accepts_fb2: true,
        };
        let feed = build_root(&ctx);
        let rewrite = UriRewrite {
            prefix: "web".to_string(),
            absolute_host: None,
        };
        let out = rewritten(&feed, &rewrite);
        for entry in &out.entries {
            assert!(entry.primary_href().unwrap().starts_with("/web/"));
        }
    }
}
