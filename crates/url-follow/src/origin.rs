use url::Url;

/// True unless `candidate` shares scheme, host and port with `current`.
///
/// Ports compare after applying scheme defaults, so `https://a.com` and
/// `https://a.com:443` are the same origin. Anything that fails to parse,
/// or has an opaque origin, is treated as cross-origin.
pub fn is_cross_origin(current: &str, candidate: &str) -> bool {
    let (Ok(current), Ok(candidate)) = (Url::parse(current), Url::parse(candidate)) else {
        return true;
    };
    let (current, candidate) = (current.origin(), candidate.origin());
    !(current.is_tuple() && current == candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: &str = "https://a.com:443";

    #[test]
    fn rejects_scheme_host_or_port_changes() {
        assert!(is_cross_origin(LOCAL, "http://a.com:443"));
        assert!(is_cross_origin(LOCAL, "http://b.com"));
        assert!(is_cross_origin(LOCAL, "https://a.com:8443"));
        assert!(is_cross_origin(
            "https://www.example.com:80",
            "https://www.example.com:81"
        ));
    }

    #[test]
    fn accepts_path_query_and_default_port_differences() {
        assert!(!is_cross_origin(LOCAL, "https://a.com:443/x"));
        assert!(!is_cross_origin(LOCAL, "https://a.com/x?y=1#frag"));
        assert!(!is_cross_origin("https://a.com", "https://a.com"));
        assert!(!is_cross_origin(
            "https://www.example.com:80",
            "https://www.example.com:80/path"
        ));
    }

    #[test]
    fn unparseable_or_opaque_urls_are_rejected() {
        assert!(is_cross_origin(LOCAL, "/relative/path"));
        assert!(is_cross_origin(LOCAL, "not a url"));
        assert!(is_cross_origin("file:///tmp/a.html", "file:///tmp/a.html"));
        assert!(is_cross_origin("garbage", LOCAL));
    }
}
