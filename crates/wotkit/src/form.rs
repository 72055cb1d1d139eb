use alloc::string::String;
use alloc::vec::Vec;

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

use crate::codec::{self, DEFAULT};
use crate::uri::percent_decode;

/// An operation a client can perform through a [`Form`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Reads a property value.
    ReadProperty,
    /// Writes a property value.
    WriteProperty,
    /// Observes property changes.
    ObserveProperty,
    /// Stops observing property changes.
    UnobserveProperty,
    /// Invokes an action.
    InvokeAction,
    /// Subscribes to an event.
    SubscribeEvent,
    /// Unsubscribes from an event.
    UnsubscribeEvent,
    /// Reads all property values at once.
    ReadAllProperties,
    /// Writes all property values at once.
    WriteAllProperties,
    /// Reads a subset of property values at once.
    ReadMultipleProperties,
    /// Writes a subset of property values at once.
    WriteMultipleProperties,
}

impl Operation {
    /// Returns the operation name as it appears in a Thing document.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ReadProperty => "readproperty",
            Self::WriteProperty => "writeproperty",
            Self::ObserveProperty => "observeproperty",
            Self::UnobserveProperty => "unobserveproperty",
            Self::InvokeAction => "invokeaction",
            Self::SubscribeEvent => "subscribeevent",
            Self::UnsubscribeEvent => "unsubscribeevent",
            Self::ReadAllProperties => "readallproperties",
            Self::WriteAllProperties => "writeallproperties",
            Self::ReadMultipleProperties => "readmultipleproperties",
            Self::WriteMultipleProperties => "writemultipleproperties",
        }
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// The kind of an interaction affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    /// A property.
    Property,
    /// An action.
    Action,
    /// An event.
    Event,
}

impl InteractionKind {
    /// Returns the operations a [`Form`] without an explicit `op` serves.
    #[must_use]
    pub const fn default_operations(self) -> &'static [Operation] {
        match self {
            Self::Property => &[Operation::ReadProperty, Operation::WriteProperty],
            Self::Action => &[Operation::InvokeAction],
            Self::Event => &[Operation::SubscribeEvent, Operation::UnsubscribeEvent],
        }
    }

    /// Returns the name of the Thing document section holding this kind.
    #[must_use]
    pub const fn section(self) -> &'static str {
        match self {
            Self::Property => "properties",
            Self::Action => "actions",
            Self::Event => "events",
        }
    }
}

impl core::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Property => "property",
            Self::Action => "action",
            Self::Event => "event",
        })
    }
}

/// The operations served by a [`Form`].
///
/// A single operation is serialized as a string, more operations as an
/// array.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Operations(Vec<Operation>);

impl Operations {
    /// Creates an empty [`Operations`].
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds an [`Operation`], ignoring duplicates.
    pub fn add(&mut self, operation: Operation) {
        if !self.0.contains(&operation) {
            self.0.push(operation);
        }
    }

    /// Checks whether an [`Operation`] is listed.
    #[must_use]
    pub fn contains(&self, operation: Operation) -> bool {
        self.0.contains(&operation)
    }

    /// Checks whether [`Operations`] is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the listed operations.
    #[must_use]
    pub fn as_slice(&self) -> &[Operation] {
        &self.0
    }
}

impl FromIterator<Operation> for Operations {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        let mut operations = Self::new();
        for operation in iter {
            operations.add(operation);
        }
        operations
    }
}

impl Serialize for Operations {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if let [operation] = self.0.as_slice() {
            return operation.serialize(serializer);
        }
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for operation in &self.0 {
            seq.serialize_element(operation)?;
        }
        seq.end()
    }
}

#[cfg(feature = "deserialize")]
impl<'de> serde::Deserialize<'de> for Operations {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(Operation),
            Many(Vec<Operation>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(operation) => core::iter::once(operation).collect(),
            OneOrMany::Many(operations) => operations.into_iter().collect(),
        })
    }
}

/// A binding between a `URL`, a content type and the operations served
/// there.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct Form {
    /// Target `URL`.
    pub href: String,
    /// Content type of the exchanged payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub content_type: Option<String>,
    /// Served operations.
    #[serde(skip_serializing_if = "Operations::is_empty")]
    #[serde(default)]
    pub op: Operations,
}

impl Form {
    /// Creates a [`Form`] for the given `URL`.
    #[must_use]
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            content_type: None,
            op: Operations::new(),
        }
    }

    /// Sets the content type.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Adds a served [`Operation`].
    #[must_use]
    pub fn operation(mut self, operation: Operation) -> Self {
        self.op.add(operation);
        self
    }

    /// Adds a sequence of served [`Operation`]s.
    #[must_use]
    pub fn operations(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        for operation in operations {
            self.op.add(operation);
        }
        self
    }

    /// Returns the declared content type or the default one.
    #[must_use]
    pub fn content_type_or_default(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT)
    }

    /// Checks whether the form serves an [`Operation`] for an affordance of
    /// the given [`InteractionKind`].
    ///
    /// A form without operations serves the default ones of its kind.
    #[must_use]
    pub fn serves(&self, kind: InteractionKind, operation: Operation) -> bool {
        if self.op.is_empty() {
            kind.default_operations().contains(&operation)
        } else {
            self.op.contains(operation)
        }
    }
}

// Splits a URL into its scheme and its path, dropping the authority, the
// query and any URI template.
fn scheme_and_path(url: &str) -> (Option<&str>, &str) {
    let url = url.find('{').map_or(url, |start| &url[..start]);
    let url = url.find(['?', '#']).map_or(url, |end| &url[..end]);

    let Some((scheme, rest)) = url.split_once("://") else {
        return (None, url);
    };
    let path = rest.find('/').map_or("/", |start| &rest[start..]);
    (Some(scheme), path)
}

fn same_path(form_path: &str, request_path: &str) -> bool {
    let form_path = percent_decode(form_path);
    let request_path = percent_decode(request_path);
    form_path.trim_end_matches('/') == request_path.trim_end_matches('/')
}

/// Finds the index of the [`Form`] matching an inbound request.
///
/// Candidates are the forms whose scheme equals `scheme` and, when a
/// request `URL` is given, whose path equals the request path. When a
/// content type is given, the first candidate declaring it (or declaring
/// nothing while the content type is the default one) wins, otherwise the
/// first candidate. Without candidates the first form is chosen.
#[must_use]
pub fn find_request_matching_form_index(
    forms: &[Form],
    scheme: &str,
    url: Option<&str>,
    content_type: Option<&str>,
) -> usize {
    let request_path = url.map(|url| scheme_and_path(url).1);

    let mut candidates = forms.iter().enumerate().filter(|(_, form)| {
        let (form_scheme, form_path) = scheme_and_path(&form.href);
        form_scheme.is_some_and(|form_scheme| form_scheme.eq_ignore_ascii_case(scheme))
            && request_path.is_none_or(|request_path| same_path(form_path, request_path))
    });

    let Some((first, _)) = candidates.clone().next() else {
        return 0;
    };

    let Some(content_type) = content_type else {
        return first;
    };
    let media_type = codec::media_type(content_type);

    candidates
        .find(|(_, form)| codec::media_type(form.content_type_or_default()) == media_type)
        .map_or(first, |(index, _)| index)
}

/// Returns the index of the [`Form`] serving an [`Operation`].
///
/// The requested index wins when that form serves the operation, otherwise
/// the first form serving it is chosen. [`None`] means no form serves the
/// operation.
#[must_use]
pub fn form_index_for_operation(
    forms: &[Form],
    kind: InteractionKind,
    operation: Operation,
    requested: Option<usize>,
) -> Option<usize> {
    if let Some(index) = requested
        && forms
            .get(index)
            .is_some_and(|form| form.serves(kind, operation))
    {
        return Some(index);
    }

    let index = forms.iter().position(|form| form.serves(kind, operation));
    if index.is_none() {
        log::debug!("No form serves the `{operation}` operation");
    }
    index
}
