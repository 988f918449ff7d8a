use once_cell::sync::Lazy;
use regex::Regex;

static ABSOLUTE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z\d+\-.]*://").expect("absolute url pattern"));

/// True when `url` carries its own `scheme://` prefix
pub fn is_absolute_url(url: &str) -> bool {
    ABSOLUTE_URL.is_match(url)
}

/// Prefix a relative `url` with `base_url`.
///
/// Absolute URLs, and any URL when no base is configured, pass through.
pub fn join_base_url(base_url: Option<&str>, url: &str) -> String {
    match base_url {
        Some(base) if !base.is_empty() && !is_absolute_url(url) => {
            let base = base.trim_end_matches('/');
            let path = url.trim_start_matches('/');
            if path.is_empty() {
                base.to_string()
            } else {
                format!("{base}/{path}")
            }
        }
        _ => url.to_string(),
    }
}

/// Split a URL into the part before `?` and the inline query, if any
pub fn split_url(url: &str) -> (&str, Option<&str>) {
    match url.split_once('?') {
        Some((path, query)) if !query.is_empty() => (path, Some(query)),
        Some((path, _)) => (path, None),
        None => (url, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_detection() {
        assert!(is_absolute_url("https://other.test/x"));
        assert!(is_absolute_url("ws+unix://sock"));
        assert!(!is_absolute_url("/x"));
        assert!(!is_absolute_url("//cdn.test/x"));
        assert!(!is_absolute_url("1http://x"));
    }

    #[test]
    fn test_join_base_url() {
        let base = Some("http://api.test");
        assert_eq!(join_base_url(base, "https://other.test/x"), "https://other.test/x");
        assert_eq!(join_base_url(base, "/x"), "http://api.test/x");
        assert_eq!(join_base_url(Some("http://api.test/"), "x"), "http://api.test/x");
        assert_eq!(join_base_url(base, ""), "http://api.test");
        assert_eq!(join_base_url(None, "/x"), "/x");
    }

    #[test]
    fn test_split_url() {
        assert_eq!(split_url("/p?a=1"), ("/p", Some("a=1")));
        assert_eq!(split_url("/p?"), ("/p", None));
        assert_eq!(split_url("/p"), ("/p", None));
    }
}
