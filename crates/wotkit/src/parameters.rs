use alloc::format;
use alloc::string::String;

use hashbrown::DefaultHashBuilder;

use indexmap::map::IndexMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};
use crate::macros::map;
use crate::schema::{DataSchema, SchemaType};
use crate::uri::query_pairs;

map! {
  /// Declared `URI` variables, each one described by a [`DataSchema`].
  #[derive(Debug, Clone, PartialEq, Serialize)]
  #[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
  pub struct UriVariables(IndexMap<String, DataSchema, DefaultHashBuilder>);
}

map! {
  /// Values assigned to `URI` variables for a single interaction.
  #[derive(Debug, Clone, PartialEq, Serialize)]
  #[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
  pub struct UriVariableValues(IndexMap<String, Value, DefaultHashBuilder>);
}

/// Options accompanying an interaction.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct InteractionOptions {
    /// Index of the form the interaction was requested through.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub form_index: Option<usize>,
    /// `URI` variable values.
    #[serde(skip_serializing_if = "UriVariableValues::is_empty")]
    #[serde(default)]
    pub uri_variables: UriVariableValues,
    /// Additional binding-specific data.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub data: Option<Value>,
}

impl InteractionOptions {
    /// Creates empty [`InteractionOptions`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the form index.
    #[must_use]
    pub const fn form_index(mut self, form_index: usize) -> Self {
        self.form_index = Some(form_index);
        self
    }

    /// Adds a `URI` variable value.
    #[must_use]
    pub fn uri_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.uri_variables.add(name, value.into());
        self
    }

    /// Sets all `URI` variable values.
    #[must_use]
    pub fn uri_variables(mut self, uri_variables: UriVariableValues) -> Self {
        self.uri_variables = uri_variables;
        self
    }

    /// Sets binding-specific data.
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

fn parse_value(raw: &str, schema: &DataSchema) -> Value {
    let parsed = match schema.kind {
        Some(SchemaType::Integer) => raw.parse::<i64>().ok().map(Value::from),
        Some(SchemaType::Number) => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        Some(SchemaType::Boolean) => raw.parse::<bool>().ok().map(Value::Bool),
        _ => None,
    };
    parsed.unwrap_or_else(|| Value::String(raw.into()))
}

/// Parses the `URI` variables contained in the query of a request `URL`.
///
/// Only variables declared either by the affordance or by the Thing are
/// retained. Values are converted according to their declared type and
/// kept as strings when the conversion fails.
#[must_use]
pub fn parse_url_parameters(
    url: &str,
    thing_variables: &UriVariables,
    affordance_variables: &UriVariables,
) -> UriVariableValues {
    parse_query_parameters(query_pairs(url), thing_variables, affordance_variables)
}

/// Parses `URI` variables from already decoded `(name, value)` query pairs.
///
/// Transports carrying query items as separate options hand them here
/// directly, so reserved characters inside a value are never split again.
#[must_use]
pub fn parse_query_parameters<I, N, V>(
    pairs: I,
    thing_variables: &UriVariables,
    affordance_variables: &UriVariables,
) -> UriVariableValues
where
    I: IntoIterator<Item = (N, V)>,
    N: AsRef<str>,
    V: AsRef<str>,
{
    let mut values = UriVariableValues::new();
    for (name, raw) in pairs {
        let name = name.as_ref();
        let Some(schema) = affordance_variables
            .get(name)
            .or_else(|| thing_variables.get(name))
        else {
            continue;
        };
        values.add(name, parse_value(raw.as_ref(), schema));
    }
    values
}

/// Validates the `URI` variable values of [`InteractionOptions`].
///
/// # Errors
///
/// A value whose name is not declared, or whose type differs from the
/// declared one, produces an [`ErrorKind::InvalidOptions`] error.
pub fn validate_interaction_options(
    thing_variables: &UriVariables,
    affordance_variables: &UriVariables,
    options: &InteractionOptions,
) -> Result<()> {
    for (name, value) in &options.uri_variables {
        let Some(schema) = affordance_variables
            .get(name)
            .or_else(|| thing_variables.get(name))
        else {
            return Err(Error::new(
                ErrorKind::InvalidOptions,
                format!("`{name}` does not exist"),
            ));
        };

        if let Some(expected) = schema.kind
            && !expected.accepts(value)
        {
            return Err(Error::new(
                ErrorKind::InvalidOptions,
                format!(
                    "Found type `{}` for `{name}`, expected type `{expected}`",
                    SchemaType::of(value)
                ),
            ));
        }
    }
    Ok(())
}
