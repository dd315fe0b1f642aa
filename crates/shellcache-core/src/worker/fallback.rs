//! Responses synthesized when neither the network nor the cache can answer.

use crate::net::Response;

const OFFLINE_IMAGE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200"><rect width="200" height="200" fill="#f3f4f6"/><text x="100" y="100" text-anchor="middle" dominant-baseline="middle" font-family="system-ui, sans-serif" font-size="12" fill="#6b7280">Image not available offline</text></svg>"##;

const OFFLINE_PAGE_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline - Skanda Billing</title>
<style>
  body { font-family: system-ui, sans-serif; display: flex; align-items: center; justify-content: center; min-height: 100vh; margin: 0; background: #f3f4f6; color: #1f2937; }
  .card { text-align: center; padding: 2rem; background: #fff; border-radius: 8px; box-shadow: 0 1px 3px rgba(0,0,0,.1); max-width: 360px; }
  h1 { font-size: 1.5rem; color: #3b82f6; }
  button { margin-top: 1rem; padding: .5rem 1.25rem; border: 0; border-radius: 6px; background: #3b82f6; color: #fff; font-size: 1rem; }
</style>
</head>
<body>
<div class="card">
<h1>You are offline</h1>
<p>This page is not available without a connection. Check your network and try again.</p>
<button onclick="location.reload()">Retry</button>
</div>
</body>
</html>
"##;

/// Placeholder for an image that is neither cached nor reachable.
pub fn offline_image() -> Response {
    Response::synthetic(200, "image/svg+xml", OFFLINE_IMAGE_SVG)
}

/// Page served for a document that is neither cached nor reachable.
pub fn offline_page() -> Response {
    Response::synthetic(200, "text/html; charset=utf-8", OFFLINE_PAGE_HTML)
}

/// Non-image static asset that is neither cached nor reachable.
pub fn asset_unavailable() -> Response {
    Response::synthetic(503, "text/plain; charset=utf-8", "Asset not available offline")
}
