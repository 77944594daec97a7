//! Static folder and single file routes.
//!
//! Files are read synchronously when requested; nothing is cached.

use std::path::Path;

use tracing::debug;

use crate::http::{Request, Response, StatusCode};

pub(crate) const FILE_NOT_FOUND: &str = "404 File not found.";

/// Returns the `Content-Type` for a file, chosen by extension.
///
/// ```
/// use std::path::Path;
/// use spindle::router::content_type_for;
///
/// assert_eq!(content_type_for(Path::new("site.CSS")), "text/css");
/// assert_eq!(content_type_for(Path::new("blob")), "application/octet-stream");
/// ```
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("css") => "text/css",
        Some("js" | "mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("xml") => "text/xml",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        Some("pdf") => "application/pdf",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Serves the file at the request's sub-path below `folder`.
pub(crate) fn serve_static(folder: &Path, request: &Request, response: &mut Response) {
    let sub_path = request.sub_path();
    let escapes = sub_path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\'));
    if escapes {
        debug!(path = request.path(), "refusing static path");
        return not_found(response);
    }

    if !send_file(&folder.join(sub_path), response) {
        not_found(response);
    }
}

/// Serves `file`, falling back to `default` when it cannot be read.
pub(crate) fn serve_file(file: &Path, default: Option<&str>, response: &mut Response) {
    if send_file(file, response) {
        return;
    }
    match default {
        Some(content) => response.send(content.as_bytes(), content_type_for(file)),
        None => not_found(response),
    }
}

fn send_file(file: &Path, response: &mut Response) -> bool {
    match std::fs::read(file) {
        Ok(contents) => {
            response.send(contents, content_type_for(file));
            true
        }
        Err(e) => {
            debug!(file = %file.display(), error = %e, "file not served");
            false
        }
    }
}

fn not_found(response: &mut Response) {
    response.set_status(StatusCode::NotFound);
    response.text(FILE_NOT_FOUND);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::http::{Headers, Method, RequestTarget, Version};

    fn static_request(path: &str) -> Request {
        let target = RequestTarget::resolve("http", "localhost", path).unwrap();
        let mut request = Request::new(
            Method::Get,
            target,
            Version::HTTP_11,
            Headers::new(),
            Bytes::new(),
        );
        request.append_route_path("assets/*");
        request
    }

    fn serve(folder: &Path, path: &str) -> Response {
        let mut response = Response::default();
        serve_static(folder, &static_request(path), &mut response);
        response
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for(Path::new("a/index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type_for(Path::new("data.json")), "application/json");
        assert_eq!(content_type_for(Path::new("photo.JPEG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("notes.txt")), "text/plain; charset=utf-8");
        assert_eq!(content_type_for(Path::new("archive.tar.gz")), "application/octet-stream");
    }

    #[test]
    fn missing_file_without_default_is_404() {
        let mut response = Response::default();
        serve_file(Path::new("/definitely/not/here.txt"), None, &mut response);
        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(response.body_ref(), FILE_NOT_FOUND.as_bytes());
    }

    #[test]
    fn missing_file_uses_default() {
        let mut response = Response::default();
        serve_file(Path::new("/definitely/not/here.json"), Some("{}"), &mut response);
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.body_ref(), b"{}");
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
    }

    #[test]
    fn static_paths_stay_inside_the_folder() {
        let root = std::env::temp_dir().join(format!("spindle-files-{}", std::process::id()));
        let folder = root.join("public");
        std::fs::create_dir_all(folder.join("css")).unwrap();
        std::fs::write(folder.join("css/site.css"), "body {}").unwrap();
        std::fs::write(root.join("secret.txt"), "hidden").unwrap();

        let found = serve(&folder, "/assets/css/site.css");
        let escaped = serve(&folder, "/assets/..%2Fsecret.txt");
        let nested_escape = serve(&folder, "/assets/css/..%2F..%2Fsecret.txt");
        let empty_segment = serve(&folder, "/assets/css//site.css");
        std::fs::remove_dir_all(&root).ok();

        assert_eq!(found.status(), StatusCode::Ok);
        assert_eq!(found.body_ref(), b"body {}");
        assert_eq!(found.headers().get("content-type"), Some("text/css"));

        for response in [escaped, nested_escape, empty_segment] {
            assert_eq!(response.status(), StatusCode::NotFound);
            assert_eq!(response.body_ref(), FILE_NOT_FOUND.as_bytes());
        }
    }
}
