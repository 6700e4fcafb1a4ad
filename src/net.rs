//! Endpoint canonicalization helpers.

use reqwest::Url;

/// Canonical form of a user-supplied endpoint URL.
///
/// Adds `https://` when no scheme is given, lowercases scheme and host, drops
/// query and fragment, and strips trailing slashes. Input that does not yield
/// a host is returned trimmed but otherwise as given. Normalizing an already
/// normalized URL returns it unchanged.
///
/// ```
/// use cluster_access::net::normalize_url;
///
/// assert_eq!(normalize_url(" MCC.Example.com/ "), "https://mcc.example.com");
/// assert_eq!(normalize_url("https://mcc.example.com"), "https://mcc.example.com");
/// ```
pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    match Url::parse(&with_scheme) {
        Ok(mut url) if url.host_str().is_some_and(|host| !host.is_empty()) => {
            url.set_query(None);
            url.set_fragment(None);
            url.as_str().trim_end_matches('/').to_string()
        }
        // no usable host: trimming could turn "https://" into a bare host
        _ => with_scheme,
    }
}

/// Join `path` onto `base` with exactly one separating slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
