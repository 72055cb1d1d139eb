// FIXME: Remove once passing by value will be supported in serde.
#![allow(clippy::trivially_copy_pass_by_ref)]

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::string::String;

use hashbrown::DefaultHashBuilder;

use indexmap::map::IndexMap;

use serde::Serialize;
use serde_json::Value;

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}

/// The `JSON` type of a value described by a [`DataSchema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// A boolean.
    Boolean,
    /// An integer number.
    Integer,
    /// Any number.
    Number,
    /// A string.
    String,
    /// An object.
    Object,
    /// An array.
    Array,
    /// The `null` value.
    Null,
}

impl SchemaType {
    /// Returns the schema type name as it appears in a Thing document.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
        }
    }

    /// Returns the [`SchemaType`] of a `JSON` value.
    ///
    /// Integral numbers are reported as [`SchemaType::Integer`].
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Checks whether a `JSON` value belongs to this type.
    ///
    /// An integer value belongs to [`SchemaType::Number`] too.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        let found = Self::of(value);
        found == self || (self == Self::Number && found == Self::Integer)
    }
}

impl core::fmt::Display for SchemaType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// A description of the values exchanged through an interaction.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct DataSchema {
    /// Value type.
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub kind: Option<SchemaType>,
    /// Human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub title: Option<Cow<'static, str>>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub description: Option<Cow<'static, str>>,
    /// Measurement unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub unit: Option<Cow<'static, str>>,
    /// Whether the value can only be read.
    #[serde(skip_serializing_if = "is_false")]
    #[serde(default)]
    pub read_only: bool,
    /// Whether the value can only be written.
    #[serde(skip_serializing_if = "is_false")]
    #[serde(default)]
    pub write_only: bool,
    /// Minimum numeric value.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub minimum: Option<f64>,
    /// Maximum numeric value.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub maximum: Option<f64>,
    /// Members of an object value.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    #[serde(default)]
    pub properties: IndexMap<String, DataSchema, DefaultHashBuilder>,
    /// Elements of an array value.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub items: Option<Box<DataSchema>>,
}

impl DataSchema {
    /// Creates a [`DataSchema`] for the given [`SchemaType`].
    #[must_use]
    pub fn new(kind: SchemaType) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Creates a boolean [`DataSchema`].
    #[must_use]
    #[inline]
    pub fn boolean() -> Self {
        Self::new(SchemaType::Boolean)
    }

    /// Creates an integer [`DataSchema`].
    #[must_use]
    #[inline]
    pub fn integer() -> Self {
        Self::new(SchemaType::Integer)
    }

    /// Creates a number [`DataSchema`].
    #[must_use]
    #[inline]
    pub fn number() -> Self {
        Self::new(SchemaType::Number)
    }

    /// Creates a string [`DataSchema`].
    #[must_use]
    #[inline]
    pub fn string() -> Self {
        Self::new(SchemaType::String)
    }

    /// Creates an object [`DataSchema`] without members.
    #[must_use]
    #[inline]
    pub fn object() -> Self {
        Self::new(SchemaType::Object)
    }

    /// Creates an array [`DataSchema`] whose elements follow `items`.
    #[must_use]
    pub fn array(items: DataSchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::new(SchemaType::Array)
        }
    }

    /// Creates a `null` [`DataSchema`].
    #[must_use]
    #[inline]
    pub fn null() -> Self {
        Self::new(SchemaType::Null)
    }

    /// Sets a title.
    #[must_use]
    pub fn title(mut self, title: impl Into<Cow<'static, str>>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets a description.
    #[must_use]
    pub fn description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets a measurement unit.
    #[must_use]
    pub fn unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Marks the value as read-only.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Marks the value as write-only.
    #[must_use]
    pub const fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    /// Sets a minimum value.
    #[must_use]
    pub const fn minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    /// Sets a maximum value.
    #[must_use]
    pub const fn maximum(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    /// Adds an object member.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, schema: DataSchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Checks whether a `JSON` value has the declared type.
    ///
    /// A schema without a type accepts every value.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        self.kind.is_none_or(|kind| kind.accepts(value))
    }
}
