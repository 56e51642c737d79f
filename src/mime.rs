//! Extension -> Content-Type lookup for static file responses.

/// Returns the MIME type for a file extension (without the leading dot), matched
/// case-insensitively. Unknown extensions map to `text/plain`.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "gif" => "image/gif",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "wasm" => "application/wasm",
        _ => "text/plain",
    }
}

/// Returns the MIME type for a path based on its extension, if any.
pub fn content_type_for_path(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => content_type_for_extension(ext),
        None => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn known_extensions_map_correctly() {
        assert_eq!(content_type_for_extension("html"), "text/html");
        assert_eq!(content_type_for_extension("CSS"), "text/css");
        assert_eq!(content_type_for_extension("png"), "image/png");
    }

    #[test]
    fn unknown_extension_falls_back_to_plain() {
        assert_eq!(content_type_for_extension("xyz"), "text/plain");
    }

    #[test]
    fn path_without_extension_falls_back_to_plain() {
        assert_eq!(content_type_for_path(Path::new("README")), "text/plain");
    }

    #[test]
    fn path_with_extension_resolves() {
        assert_eq!(
            content_type_for_path(Path::new("/a/b/index.html")),
            "text/html"
        );
    }
}
