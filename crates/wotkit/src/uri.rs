use alloc::borrow::Cow;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

// Characters left as they are by `percent_encode`: the unreserved set of
// RFC 3986.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encodes every byte of `input` outside the unreserved set of
/// RFC 3986.
#[must_use]
pub fn percent_encode(input: &str) -> Cow<'_, str> {
    utf8_percent_encode(input, UNRESERVED).into()
}

/// Decodes percent-encoded sequences of `input`.
///
/// Malformed sequences are kept as they are, and invalid `UTF-8` is
/// replaced with the replacement character.
#[must_use]
pub fn percent_decode(input: &str) -> Cow<'_, str> {
    percent_decode_str(input).decode_utf8_lossy()
}

/// Splits a decoded query item into its name and value.
///
/// An item without `=` has an empty value.
#[must_use]
pub fn split_query_item(item: &str) -> (&str, &str) {
    item.split_once('=').unwrap_or((item, ""))
}

/// Splits the query component of a `URL` into decoded `(name, value)`
/// pairs.
///
/// A pair without `=` has an empty value.
pub fn query_pairs(url: &str) -> impl Iterator<Item = (Cow<'_, str>, Cow<'_, str>)> {
    let query = url.split_once('?').map_or("", |(_, query)| query);
    let query = query.split_once('#').map_or(query, |(query, _)| query);

    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = split_query_item(pair);
            (percent_decode(name), percent_decode(value))
        })
}
