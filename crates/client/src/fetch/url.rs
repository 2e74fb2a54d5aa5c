//! URL canonicalization for consistent cache keys.

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Canonicalize an absolute URL string for consistent cache keys.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Default scheme to https:// if missing
/// 3. Lowercase the host
/// 4. Remove fragment (#...)
/// 5. Keep query string intact (do not reorder)
pub fn canonicalize(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let url_str = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };

    let parsed = url::Url::parse(&url_str).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    normalize(parsed)
}

/// Resolve `input` against `origin` and canonicalize the result.
///
/// Absolute URLs are kept as they are; paths such as `/` or `menu?day=mon`
/// are joined onto the origin the way a browser resolves them.
pub fn resolve(origin: &url::Url, input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    if trimmed.contains("://") {
        return canonicalize(trimmed);
    }

    let joined = origin.join(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    normalize(joined)
}

fn normalize(mut parsed: url::Url) -> Result<url::Url, UrlError> {
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str() {
        let host = host.to_lowercase();
        parsed
            .set_host(Some(&host))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> url::Url {
        url::Url::parse("https://shop.test").unwrap()
    }

    #[test]
    fn test_canonicalize_basic() {
        let url = canonicalize("https://shop.test").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("shop.test"));
    }

    #[test]
    fn test_canonicalize_default_scheme() {
        let url = canonicalize("shop.test").unwrap();
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn test_canonicalize_lowercase_host() {
        let url = canonicalize("https://SHOP.TEST/Menu").unwrap();
        assert_eq!(url.host_str(), Some("shop.test"));
        assert_eq!(url.path(), "/Menu");
    }

    #[test]
    fn test_canonicalize_remove_fragment() {
        let url = canonicalize("https://shop.test#cart").unwrap();
        assert_eq!(url.fragment(), None);
        assert_eq!(url.as_str(), "https://shop.test/");
    }

    #[test]
    fn test_canonicalize_preserve_query() {
        let url = canonicalize("https://shop.test/menu?b=2&a=1").unwrap();
        assert_eq!(url.query(), Some("b=2&a=1"));
    }

    #[test]
    fn test_canonicalize_unsupported_scheme() {
        let result = canonicalize("file:///etc/passwd");
        assert!(matches!(result, Err(UrlError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_canonicalize_empty() {
        assert!(matches!(canonicalize("   "), Err(UrlError::Empty)));
    }

    #[test]
    fn test_resolve_root_path() {
        let url = resolve(&origin(), "/").unwrap();
        assert_eq!(url.as_str(), "https://shop.test/");
    }

    #[test]
    fn test_resolve_relative_path_with_fragment() {
        let url = resolve(&origin(), "/menu?day=mon#top").unwrap();
        assert_eq!(url.as_str(), "https://shop.test/menu?day=mon");
    }

    #[test]
    fn test_resolve_keeps_absolute_urls() {
        let url = resolve(&origin(), "https://CDN.test/app.js").unwrap();
        assert_eq!(url.as_str(), "https://cdn.test/app.js");
    }

    #[test]
    fn test_resolve_empty() {
        assert!(matches!(resolve(&origin(), ""), Err(UrlError::Empty)));
    }
}
