use std::fmt::Write;

use wotkit::uri::percent_encode;

// Resource type of an exposed Thing.
const THING_RESOURCE_TYPE: &str = "wot.thing";

/// A discovery entry rendered in the `CoRE` link format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinkEntry {
    // Resource type.
    resource_type: &'static str,
    // Content formats of the resource.
    content_formats: Vec<u16>,
}

impl LinkEntry {
    pub(crate) fn thing(content_formats: impl IntoIterator<Item = u16>) -> Self {
        Self {
            resource_type: THING_RESOURCE_TYPE,
            content_formats: content_formats.into_iter().collect(),
        }
    }
}

/// Renders `(path, entry)` pairs as a comma-separated link format
/// document.
pub(crate) fn render<'a>(entries: impl IntoIterator<Item = (&'a String, &'a LinkEntry)>) -> String {
    let mut document = String::new();
    for (path, entry) in entries {
        if !document.is_empty() {
            document.push(',');
        }

        let formats = entry
            .content_formats
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(" ");

        // Writing into a `String` cannot fail.
        let _ = write!(
            document,
            "</{}>;rt=\"{}\";ct=\"{formats}\"",
            percent_encode(path),
            entry.resource_type,
        );
    }
    document
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::{LinkEntry, render};

    #[test]
    fn render_entries() {
        let mut entries = IndexMap::new();
        entries.insert("lamp-1".to_owned(), LinkEntry::thing([50, 432]));
        entries.insert("sensor".to_owned(), LinkEntry::thing([50]));

        assert_eq!(
            render(&entries),
            "</lamp-1>;rt=\"wot.thing\";ct=\"50 432\",</sensor>;rt=\"wot.thing\";ct=\"50\""
        );
        assert_eq!(render(&IndexMap::<String, LinkEntry>::new()), "");
    }
}
