//! URL helpers: canonical page URLs and same-origin checks

use url::Url;

use crate::error::CollectorError;

/// Origin plus path, with query and fragment dropped
pub fn canonical_url(href: &str) -> Result<String, CollectorError> {
    let parsed = Url::parse(href).map_err(|e| CollectorError::InvalidUrl(format!("{href}: {e}")))?;
    Ok(format!(
        "{}{}",
        parsed.origin().ascii_serialization(),
        parsed.path()
    ))
}

/// Drop everything from the first `#`
pub fn strip_fragment(href: &str) -> &str {
    href.split('#').next().unwrap_or(href)
}

/// Hostname of a location, as reported in `customerObject.website`
pub fn hostname(href: &str) -> String {
    Url::parse(href)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Whether `target` points at the same host (and port) as `location`.
/// Relative targets count as same-site.
pub fn same_site(target: &str, location: &str) -> bool {
    let Ok(base) = Url::parse(location) else {
        return false;
    };

    match Url::parse(target) {
        Ok(parsed) => parsed.host_str() == base.host_str() && parsed.port() == base.port(),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            // protocol-relative links carry their own host
            if let Some(rest) = target.strip_prefix("//") {
                let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
                host == host_with_port(&base)
            } else {
                true
            }
        }
        Err(_) => false,
    }
}

/// Whether a link target is an absolute http(s) URL
pub fn is_http(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

fn host_with_port(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_url_strips_query_and_fragment() {
        let url = canonical_url("https://shop.test/products/42?ref=mail#reviews").unwrap();
        assert_eq!(url, "https://shop.test/products/42");
    }

    #[test]
    fn test_canonical_url_keeps_port() {
        let url = canonical_url("http://localhost:8080/").unwrap();
        assert_eq!(url, "http://localhost:8080/");
    }

    #[test]
    fn test_canonical_url_rejects_garbage() {
        assert!(canonical_url("not a url").is_err());
    }

    #[test]
    fn test_same_site() {
        let here = "https://shop.test/cart";
        assert!(same_site("https://shop.test/checkout", here));
        assert!(!same_site("https://other.test/checkout", here));
        assert!(same_site("/checkout", here));
        assert!(same_site("//shop.test/about", here));
        assert!(!same_site("//cdn.test/about", here));
        assert!(!same_site("https://shop.test:8443/x", here));
    }

    #[test]
    fn test_strip_fragment_and_hostname() {
        assert_eq!(strip_fragment("https://a.test/p#top"), "https://a.test/p");
        assert_eq!(strip_fragment("https://a.test/p"), "https://a.test/p");
        assert_eq!(hostname("https://a.test:9000/p"), "a.test");
        assert!(is_http("https://a.test"));
        assert!(!is_http("mailto:x@a.test"));
    }
}
