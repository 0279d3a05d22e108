//! Media link canonicalization.
//!
//! Share links to hosted images come in several shapes. Any link carrying a
//! recognizable file identifier is rewritten to the direct-serving form
//! `https://lh3.googleusercontent.com/d/<id>`; everything else passes
//! through unchanged.

use std::sync::LazyLock;

use regex::Regex;

/// Prefix of every canonical media link.
pub const MEDIA_TEMPLATE_PREFIX: &str = "https://lh3.googleusercontent.com/d/";

/// Canonicalize a media link. Canonical output is a fixed point.
pub fn canonicalize(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() {
        return String::new();
    }

    match extract_file_id(url) {
        Some(id) => format!("{MEDIA_TEMPLATE_PREFIX}{id}"),
        None => url.to_string(),
    }
}

/// Find the file identifier: structured shapes first, then the opaque token heuristic.
fn extract_file_id(url: &str) -> Option<&str> {
    // `/d/<id>/`, `/d/<id>?…` or `/d/<id>` at the end
    static PATH_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"/d/([A-Za-z0-9_-]+)(?:[/?#]|$)").expect("valid regex")
    });
    // `?id=<id>` or `&id=<id>` or a bare `id=<id>`
    static QUERY_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?:^|[?&])id=([A-Za-z0-9_-]+)").expect("valid regex")
    });
    static OPAQUE_TOKEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[A-Za-z0-9_-]{25,}").expect("valid regex"));

    for re in [&*PATH_ID_RE, &*QUERY_ID_RE] {
        if let Some(id) = re.captures(url).and_then(|c| c.get(1)) {
            return Some(id.as_str());
        }
    }

    OPAQUE_TOKEN_RE.find(url).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str = "https://lh3.googleusercontent.com/d/ABC123";

    #[test]
    fn structured_shapes_agree() {
        let shapes = [
            "https://drive.google.com/file/d/ABC123/view?usp=sharing",
            "https://drive.google.com/open?id=ABC123",
            "https://drive.google.com/uc?export=view&id=ABC123",
            "id=ABC123",
        ];
        for shape in shapes {
            assert_eq!(canonicalize(shape), CANONICAL, "shape {shape}");
        }
    }

    #[test]
    fn opaque_token_heuristic() {
        let token = "1aB2cD3eF4gH5iJ6kL7mN8oP9qR";
        let url = format!("https://example.com/share/{token}");
        assert_eq!(canonicalize(&url), format!("{MEDIA_TEMPLATE_PREFIX}{token}"));
    }

    #[test]
    fn canonical_output_is_fixed_point() {
        assert_eq!(canonicalize(CANONICAL), CANONICAL);
        let long = format!("{MEDIA_TEMPLATE_PREFIX}1aB2cD3eF4gH5iJ6kL7mN8oP9qR");
        assert_eq!(canonicalize(&long), long);
    }

    #[test]
    fn unrecognized_passes_through() {
        assert_eq!(canonicalize(""), "");
        assert_eq!(canonicalize("   "), "");
        assert_eq!(
            canonicalize("https://cdn.example.com/img/nasi.jpg"),
            "https://cdn.example.com/img/nasi.jpg"
        );
        // `grid=` is not an `id=` parameter
        assert_eq!(
            canonicalize("https://example.com/x?grid=42"),
            "https://example.com/x?grid=42"
        );
    }
}
