//! String helpers shared by the matcher and the activity producer.

use std::collections::HashSet;

/// Case-insensitive substring test in either direction. Empty strings never match.
pub fn contains_either_way(lhs: &str, rhs: &str) -> bool {
    let lhs = lhs.trim().to_lowercase();
    let rhs = rhs.trim().to_lowercase();
    if lhs.is_empty() || rhs.is_empty() {
        return false;
    }
    lhs.contains(&rhs) || rhs.contains(&lhs)
}

/// Lowercased alphanumeric words of `value`, minus `stopwords`.
pub fn word_set(value: &str, stopwords: &[String]) -> HashSet<String> {
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .filter(|word| !stopwords.iter().any(|stop| stop == word))
        .collect()
}

pub fn shares_a_word(lhs: &str, rhs: &str, stopwords: &[String]) -> bool {
    let left = word_set(lhs, stopwords);
    if left.is_empty() {
        return false;
    }
    let right = word_set(rhs, stopwords);
    !left.is_disjoint(&right)
}

/// Reduce a URL pattern to its lowercased host: scheme, `www.` and path removed.
pub fn url_host(pattern: &str) -> String {
    let mut host = pattern.trim().to_lowercase();
    for scheme in ["https://", "http://"] {
        if let Some(rest) = host.strip_prefix(scheme) {
            host = rest.to_string();
            break;
        }
    }
    if let Some(rest) = host.strip_prefix("www.") {
        host = rest.to_string();
    }
    match host.split_once('/') {
        Some((head, _)) => head.to_string(),
        None => host,
    }
}

pub fn is_browser(application_name: &str, browsers: &[String]) -> bool {
    let application = application_name.to_lowercase();
    browsers
        .iter()
        .any(|browser| application.contains(browser.as_str()))
}

/// Best-effort URL from a browser title of the form `url - page title`.
/// Hyphens inside the URL survive; a bare `-` only splits when no ` - `
/// separator is present.
pub fn url_from_title(window_title: &str) -> String {
    let head = match window_title.split_once(" - ") {
        Some((head, _)) => head,
        None => window_title
            .split_once('-')
            .map_or(window_title, |(head, _)| head),
    };
    head.trim().to_string()
}
