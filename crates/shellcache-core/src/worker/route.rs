//! Deciding whether a request is intercepted and which strategy serves it.

use reqwest::Method;
use serde::Serialize;
use url::Url;

use super::WorkerSettings;
use crate::net::Request;

/// Extensions served cache-first: stylesheets, scripts, images, fonts.
pub const STATIC_EXTENSIONS: &[&str] = &[
    "css", "js", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "ttf", "eot",
];

/// Subset of static extensions that get the placeholder image offline.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Cache-first.
    StaticAsset,
    /// Network-first: HTML pages and dynamic routes.
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassthroughReason {
    NotActivated,
    NonGet,
    CrossOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Passthrough(PassthroughReason),
    Intercept(RequestClass),
}

/// Lowercased extension of the last path segment, if any.
pub fn path_extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn classify(url: &Url) -> RequestClass {
    match path_extension(url) {
        Some(ext) if STATIC_EXTENSIONS.contains(&ext.as_str()) => RequestClass::StaticAsset,
        _ => RequestClass::Document,
    }
}

pub fn is_image(url: &Url) -> bool {
    path_extension(url)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Decide for an activated worker. Non-GET and non-allow-listed
/// cross-origin requests are left alone entirely.
pub fn decide(request: &Request, settings: &WorkerSettings) -> Decision {
    if request.method != Method::GET {
        return Decision::Passthrough(PassthroughReason::NonGet);
    }
    let same_origin = request.url.origin() == settings.origin.origin();
    if !same_origin && !settings.is_allowed_cdn(&request.url) {
        return Decision::Passthrough(PassthroughReason::CrossOrigin);
    }
    Decision::Intercept(classify(&request.url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("test url")
    }

    fn settings() -> WorkerSettings {
        WorkerSettings::new(url("http://127.0.0.1:5000/"), "app", "v1")
            .with_cdn_hosts(vec!["cdn.jsdelivr.net".to_string()])
    }

    #[test]
    fn test_path_extension() {
        assert_eq!(path_extension(&url("http://h/static/css/style.css")).as_deref(), Some("css"));
        assert_eq!(path_extension(&url("http://h/static/LOGO.PNG?v=2")).as_deref(), Some("png"));
        assert_eq!(path_extension(&url("http://h/bills/12")), None);
        assert_eq!(path_extension(&url("http://h/")), None);
        assert_eq!(path_extension(&url("http://h/.well-known")), None);
        assert_eq!(path_extension(&url("http://h/trailing.")), None);
    }

    #[test]
    fn test_classify_static_assets() {
        for path in [
            "/static/css/style.css",
            "/static/js/main.js",
            "/static/icons/icon-192x192.png",
            "/static/fonts/bootstrap-icons.woff2",
            "/favicon.ico",
        ] {
            let u = url("http://127.0.0.1:5000/").join(path).expect("join");
            assert_eq!(classify(&u), RequestClass::StaticAsset, "{path}");
        }
    }

    #[test]
    fn test_classify_documents() {
        for path in ["/", "/dashboard", "/bills/42", "/reports/export.csv", "/static/manifest.json"] {
            let u = url("http://127.0.0.1:5000/").join(path).expect("join");
            assert_eq!(classify(&u), RequestClass::Document, "{path}");
        }
    }

    #[test]
    fn test_is_image() {
        assert!(is_image(&url("http://h/static/uploads/bills/scan.JPG")));
        assert!(is_image(&url("http://h/icon.svg")));
        assert!(!is_image(&url("http://h/style.css")));
        assert!(!is_image(&url("http://h/font.woff")));
    }

    #[test]
    fn test_decide_non_get_passes_through() {
        let req = Request::new(Method::POST, url("http://127.0.0.1:5000/static/js/main.js"));
        assert_eq!(
            decide(&req, &settings()),
            Decision::Passthrough(PassthroughReason::NonGet)
        );
    }

    #[test]
    fn test_decide_cross_origin() {
        let s = settings();
        let blocked = Request::get(url("https://tracker.example.com/pixel.gif"));
        assert_eq!(decide(&blocked, &s), Decision::Passthrough(PassthroughReason::CrossOrigin));

        let cdn = Request::get(url("https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css"));
        assert_eq!(decide(&cdn, &s), Decision::Intercept(RequestClass::StaticAsset));
    }

    #[test]
    fn test_decide_same_origin_document() {
        let req = Request::navigate(url("http://127.0.0.1:5000/vendors"));
        assert_eq!(decide(&req, &settings()), Decision::Intercept(RequestClass::Document));
    }
}
