//! Query-parameter extraction for collector requests.
//!
//! Parsing is total: malformed or missing query strings yield an empty
//! sequence, never an error. An empty parameter set is itself meaningful
//! downstream (candidate heartbeat), so it must not be conflated with a
//! parse failure.

use crate::Param;

/// Extract the ordered parameter sequence from a URL's query string.
pub fn params_from_url(url: &str) -> Vec<Param> {
    let url = url.split_once('#').map_or(url, |(base, _)| base);
    match url.split_once('?') {
        Some((_, query)) => params_from_query(query),
        None => Vec::new(),
    }
}

/// Extract the ordered parameter sequence from a raw query string, with or
/// without the leading `?`. Duplicate names stay separate entries in wire
/// order.
pub fn params_from_query(query: &str) -> Vec<Param> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let query = query.split_once('#').map_or(query, |(base, _)| base);
    if query.is_empty() {
        return Vec::new();
    }
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(name, value)| Param::new(name, value))
        .collect()
}
