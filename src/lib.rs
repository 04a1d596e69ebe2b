pub mod auth;
pub mod config;
pub mod convert;
pub mod epub;
pub mod error;
pub mod fb2;
pub mod i18n;
pub mod mobi;
pub mod opds;
pub mod server;
pub mod state;
pub mod stats;
pub mod store;
pub mod text;
pub mod web;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;

use crate::state::AppState;

/// Assemble the full application router: the Atom catalog under the
/// OPDS prefix, the same catalog as HTML under the web prefix, and the
/// root-level resources.
pub fn build_router(state: AppState) -> Router {
    let root_prefix = format!("/{}", state.config.opds.root_prefix);
    let http_prefix = format!("/{}", state.config.opds.http_prefix);
    let web_redirect = http_prefix.clone();

    Router::new()
        .route(
            "/",
            get(move || {
                let to = web_redirect.clone();
                async move { axum::response::Redirect::to(&to) }
            }),
        )
        .route("/favicon.ico", get(server::favicon))
        .route("/opds-opensearch.xml", get(opds::feeds::opensearch))
        .nest(&root_prefix, opds::router(state.clone()))
        .nest(&http_prefix, web::router(state.clone()))
        .layer(middleware::from_fn(server::request_guard))
        .layer(DefaultBodyLimit::max(server::MAX_POST_BODY))
        .layer(tower_http::compression::CompressionLayer::new())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::timeout::TimeoutLayer::new(server::REQUEST_TIMEOUT))
        .layer(tower::limit::GlobalConcurrencyLimitLayer::new(
            server::MAX_CONNECTIONS,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::memory::MemoryStore;
    use crate::store::{Book, BookFormat};
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    const SAMPLE_FB2: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<FictionBook xmlns="http://www.gribuser.ru/xml/fictionbook/2.0" xmlns:l="http://www.w3.org/1999/xlink">
  <description><title-info>
    <author><first-name>Isaac</first-name><last-name>Asimov</last-name></author>
    <book-title>Foundation</book-title>
    <lang>en</lang>
    <coverpage><image l:href="#cover.jpg"/></coverpage>
  </title-info></description>
  <body>
    <section><title><p>One</p></title><p>First chapter.</p></section>
  </body>
  <binary id="cover.jpg" content-type="image/png">iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==</binary>
</FictionBook>"##;

    struct TestApp {
        router: Router,
        state: AppState,
        _dir: tempfile::TempDir,
    }

    fn test_app(configure: impl FnOnce(&mut Config)) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b1.fb2"), SAMPLE_FB2).unwrap();

        let mut config = Config::default();
        config.library.root_path = dir.path().to_path_buf();
        configure(&mut config);

        let book = Book {
            id: "b1".to_string(),
            title: "Foundation".to_string(),
            language: "en".to_string(),
            authors: vec!["Isaac Asimov".to_string()],
            book_date: chrono::NaiveDate::from_ymd_opt(1951, 1, 1),
            added: None,
            file_path: "b1.fb2".to_string(),
            format: BookFormat::Fb2,
            genres: vec!["sf".to_string()],
            series: Some("Foundation".to_string()),
            series_index: Some(1),
            annotation: String::new(),
            size: SAMPLE_FB2.len() as u64,
        };
        let state = AppState::new(
            config,
            Arc::new(MemoryStore::new(vec![book], false)),
            web::default_tera(),
            i18n::load_translations().unwrap(),
        );
        TestApp {
            router: build_router(state.clone()),
            state,
            _dir: dir,
        }
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4321))));
        req
    }

    fn with_header(mut req: Request<Body>, name: header::HeaderName, value: &str) -> Request<Body> {
        req.headers_mut().insert(name, value.parse().unwrap());
        req
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[tokio::test]
    async fn test_root_feed_and_common_headers() {
        let app = test_app(|_| {});
        let response = app.router.clone().oneshot(request("GET", "/opds/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::SERVER],
            server::SERVER_HEADER
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.contains("xmlns=\"http://www.w3.org/2005/Atom\""));
        assert!(body.contains("/opds/newdate/0"));
    }

    #[tokio::test]
    async fn test_anonymous_cover_fetch_under_auth() {
        // Image requests bypass Basic auth entirely.
        let app = test_app(|c| {
            c.auth.use_http_auth = true;
            c.auth.credentials = vec!["user:pass".to_string()];
        });
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/opds/cover/b1.jpeg"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(
            app.state
                .stats
                .images_sent
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_banned_ip_path() {
        let app = test_app(|c| {
            c.auth.use_http_auth = true;
            c.auth.ban_clients = true;
            c.auth.wrong_attempts_count = 3;
            c.auth.credentials = vec!["user:pass".to_string()];
        });

        for attempt in 1..=3u32 {
            let req = with_header(
                request("GET", "/opds/"),
                header::AUTHORIZATION,
                "Basic dXNlcjp3cm9uZw==", // user:wrong
            );
            let response = app.router.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "attempt {attempt}");
            assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
            assert_eq!(
                app.state.bans.count("10.0.0.1".parse().unwrap()),
                attempt
            );
        }

        // Fourth request: banned, no challenge.
        let req = with_header(
            request("GET", "/opds/"),
            header::AUTHORIZATION,
            "Basic dXNlcjp3cm9uZw==",
        );
        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(!response.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_remember_me_round_trip() {
        let app = test_app(|c| {
            c.auth.use_http_auth = true;
            c.auth.remember_clients = false; // isolate the cookie flow
            c.auth.credentials = vec!["user:pass".to_string()];
        });

        // Login with Basic credentials; exactly one session cookie.
        let req = with_header(
            request("GET", "/opds/"),
            header::AUTHORIZATION,
            "Basic dXNlcjpwYXNz", // user:pass
        );
        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookies: Vec<_> = response.headers().get_all(header::SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 1);
        let cookie = cookies[0].to_str().unwrap().to_string();
        assert!(cookie.starts_with("TinyOPDS_Session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Max-Age=2592000"));

        let token = cookie
            .trim_start_matches("TinyOPDS_Session=")
            .split(';')
            .next()
            .unwrap()
            .to_string();

        // Replaying the cookie authorizes without credentials.
        let req = with_header(
            request("GET", "/opds/"),
            header::COOKIE,
            &format!("TinyOPDS_Session={token}"),
        );
        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Thirty days of clock skew invalidates the session.
        app.state.auth.age_session(&token, 30 * 24 * 3600 + 60);
        let req = with_header(
            request("GET", "/opds/"),
            header::COOKIE,
            &format!("TinyOPDS_Session={token}"),
        );
        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_fb2_to_epub_conversion_on_demand() {
        let app = test_app(|_| {});
        let req = with_header(
            request("GET", "/opds/b1/Isaac_Asimov_Foundation.epub"),
            header::USER_AGENT,
            "some-browser",
        );
        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/epub+zip"
        );

        let body = body_bytes(response).await;
        // First local header: stored mimetype.
        assert_eq!(&body[0..4], b"PK\x03\x04");
        assert_eq!(u16::from_le_bytes([body[8], body[9]]), 0);
        assert_eq!(&body[30..38], b"mimetype");

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(body)).unwrap();
        let mut nav = String::new();
        use std::io::Read;
        archive
            .by_name("EPUB/nav.xhtml")
            .unwrap()
            .read_to_string(&mut nav)
            .unwrap();
        assert_eq!(nav.matches("<nav epub:type=\"toc\"").count(), 1);
    }

    #[tokio::test]
    async fn test_epub_fails_when_all_converters_disabled() {
        let app = test_app(|c| {
            c.convert.use_native = false;
        });
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/opds/b1/Isaac_Asimov_Foundation.epub"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_epub_via_external_converter() {
        use std::os::unix::fs::PermissionsExt;

        let script_dir = tempfile::tempdir().unwrap();
        let script = script_dir.path().join("conv.sh");
        std::fs::write(&script, "#!/bin/sh\ncp \"$1\" \"$2\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let app = test_app(|c| {
            c.convert.use_native = false;
            c.convert.converter_path = script.clone();
        });
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/opds/b1/Isaac_Asimov_Foundation.epub"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/epub+zip"
        );
        // The stand-in converter copies its input through.
        let body = body_bytes(response).await;
        assert_eq!(body, SAMPLE_FB2.as_bytes());
    }

    #[tokio::test]
    async fn test_fb2_zip_and_mobi_downloads() {
        let app = test_app(|_| {});
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/opds/b1/Isaac_Asimov_Foundation.fb2.zip"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/fb2+zip"
        );

        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/opds/b1/Isaac_Asimov_Foundation.mobi"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_bytes(response).await;
        assert_eq!(&body[60..68], b"BOOKMOBI");
    }

    #[tokio::test]
    async fn test_root_menu_gating() {
        let app = test_app(|c| {
            c.opds.structure = "genres:0".to_string();
        });
        let response = app.router.clone().oneshot(request("GET", "/opds/")).await.unwrap();
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(!body.contains("/genres"));

        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/opds/genres"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sequence_gated_with_its_index() {
        // The leaf endpoint follows its section's gate.
        let app = test_app(|_| {});
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/opds/sequence/Foundation"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let app = test_app(|c| {
            c.opds.structure = "sequencesindex:0".to_string();
        });
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/opds/sequencesindex"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/opds/sequence/Foundation"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oversized_url_rejected() {
        let app = test_app(|_| {});
        let long = format!("/opds/{}", "a".repeat(3000));
        let response = app.router.clone().oneshot(request("GET", &long)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_bytes(response).await;
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_post_is_method_not_allowed() {
        let app = test_app(|_| {});
        let response = app
            .router
            .clone()
            .oneshot(request("POST", "/opds/anything"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_opensearch_descriptor_at_root() {
        let app = test_app(|_| {});
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/opds-opensearch.xml"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.contains("OpenSearchDescription"));
        assert!(body.contains("{searchTerms}"));
    }

    #[tokio::test]
    async fn test_search_flow_over_http() {
        let app = test_app(|_| {});
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/opds/search?searchTerm=foundation"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.contains("searchType=book"));

        let response = app
            .router
            .clone()
            .oneshot(request(
                "GET",
                "/opds/search?searchType=book&searchTerm=foundation",
            ))
            .await
            .unwrap();
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.contains("Foundation"));
    }

    #[tokio::test]
    async fn test_web_mode_renders_html() {
        let app = test_app(|_| {});
        let response = app.router.clone().oneshot(request("GET", "/web/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/html"));
        let body = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(body.contains("<!DOCTYPE html>"));
        assert!(body.contains("/web/newdate/0"));
    }

    #[tokio::test]
    async fn test_double_slashes_normalised() {
        let app = test_app(|_| {});
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/opds//newdate//0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_favicon() {
        let app = test_app(|_| {});
        let response = app
            .router
            .clone()
            .oneshot(request("GET", "/favicon.ico"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/x-icon");
    }
}
