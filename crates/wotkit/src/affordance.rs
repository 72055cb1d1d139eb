use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::DefaultHashBuilder;

use indexmap::map::IndexMap;

use serde::Serialize;

use crate::form::{Form, InteractionKind, Operation};
use crate::macros::map;
use crate::parameters::UriVariables;
use crate::schema::{DataSchema, is_false};

/// Common interface of property, action and event affordances.
pub trait Affordance {
    /// The kind of the affordance.
    const KIND: InteractionKind;

    /// Returns the affordance forms.
    fn forms(&self) -> &[Form];

    /// Returns the mutable affordance forms.
    fn forms_mut(&mut self) -> &mut Vec<Form>;

    /// Returns the `URI` variables declared by the affordance.
    fn uri_variables(&self) -> &UriVariables;

    /// Returns the operations a binding should publish for this
    /// affordance.
    fn operations(&self) -> Vec<Operation>;
}

/// A property affordance.
///
/// A property exposes a value described by a [`DataSchema`] which can be
/// read, written and observed according to its flags.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct PropertyAffordance {
    /// Property value schema.
    #[serde(flatten)]
    pub schema: DataSchema,
    /// Whether value changes can be observed.
    #[serde(skip_serializing_if = "is_false")]
    #[serde(default)]
    pub observable: bool,
    /// `URI` variables.
    #[serde(skip_serializing_if = "UriVariables::is_empty")]
    #[serde(default)]
    pub uri_variables: UriVariables,
    /// Forms.
    #[serde(default)]
    pub forms: Vec<Form>,
}

impl PropertyAffordance {
    /// Creates a [`PropertyAffordance`] from a [`DataSchema`].
    #[must_use]
    pub fn new(schema: DataSchema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    /// Marks the property as read-only.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.schema.read_only = true;
        self
    }

    /// Marks the property as write-only.
    #[must_use]
    pub const fn write_only(mut self) -> Self {
        self.schema.write_only = true;
        self
    }

    /// Marks the property as observable.
    #[must_use]
    pub const fn observable(mut self) -> Self {
        self.observable = true;
        self
    }

    /// Declares a `URI` variable.
    #[must_use]
    pub fn uri_variable(mut self, name: impl Into<String>, schema: DataSchema) -> Self {
        self.uri_variables.add(name, schema);
        self
    }

    /// Adds a [`Form`].
    #[must_use]
    pub fn form(mut self, form: Form) -> Self {
        self.forms.push(form);
        self
    }

    /// Checks whether the property is read-only.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.schema.read_only
    }

    /// Checks whether the property is write-only.
    #[must_use]
    pub const fn is_write_only(&self) -> bool {
        self.schema.write_only
    }

    /// Checks whether the property is observable.
    #[must_use]
    pub const fn is_observable(&self) -> bool {
        self.observable
    }
}

impl Affordance for PropertyAffordance {
    const KIND: InteractionKind = InteractionKind::Property;

    fn forms(&self) -> &[Form] {
        &self.forms
    }

    fn forms_mut(&mut self) -> &mut Vec<Form> {
        &mut self.forms
    }

    fn uri_variables(&self) -> &UriVariables {
        &self.uri_variables
    }

    fn operations(&self) -> Vec<Operation> {
        let mut operations = Vec::with_capacity(4);
        if !self.is_write_only() {
            operations.push(Operation::ReadProperty);
        }
        if !self.is_read_only() {
            operations.push(Operation::WriteProperty);
        }
        if self.is_observable() {
            operations.push(Operation::ObserveProperty);
            operations.push(Operation::UnobserveProperty);
        }
        operations
    }
}

/// An action affordance.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct ActionAffordance {
    /// Human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub title: Option<Cow<'static, str>>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub description: Option<Cow<'static, str>>,
    /// Input schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub input: Option<DataSchema>,
    /// Output schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub output: Option<DataSchema>,
    /// Whether the action does not change the Thing state.
    #[serde(skip_serializing_if = "is_false")]
    #[serde(default)]
    pub safe: bool,
    /// Whether repeating the action produces the same result.
    #[serde(skip_serializing_if = "is_false")]
    #[serde(default)]
    pub idempotent: bool,
    /// `URI` variables.
    #[serde(skip_serializing_if = "UriVariables::is_empty")]
    #[serde(default)]
    pub uri_variables: UriVariables,
    /// Forms.
    #[serde(default)]
    pub forms: Vec<Form>,
}

impl ActionAffordance {
    /// Creates an [`ActionAffordance`] without input and output.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
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

    /// Sets the input schema.
    #[must_use]
    pub fn input(mut self, input: DataSchema) -> Self {
        self.input = Some(input);
        self
    }

    /// Sets the output schema.
    #[must_use]
    pub fn output(mut self, output: DataSchema) -> Self {
        self.output = Some(output);
        self
    }

    /// Marks the action as safe.
    #[must_use]
    pub const fn safe(mut self) -> Self {
        self.safe = true;
        self
    }

    /// Marks the action as idempotent.
    #[must_use]
    pub const fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Declares a `URI` variable.
    #[must_use]
    pub fn uri_variable(mut self, name: impl Into<String>, schema: DataSchema) -> Self {
        self.uri_variables.add(name, schema);
        self
    }

    /// Adds a [`Form`].
    #[must_use]
    pub fn form(mut self, form: Form) -> Self {
        self.forms.push(form);
        self
    }
}

impl Affordance for ActionAffordance {
    const KIND: InteractionKind = InteractionKind::Action;

    fn forms(&self) -> &[Form] {
        &self.forms
    }

    fn forms_mut(&mut self) -> &mut Vec<Form> {
        &mut self.forms
    }

    fn uri_variables(&self) -> &UriVariables {
        &self.uri_variables
    }

    fn operations(&self) -> Vec<Operation> {
        alloc::vec![Operation::InvokeAction]
    }
}

/// An event affordance.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct EventAffordance {
    /// Human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub title: Option<Cow<'static, str>>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub description: Option<Cow<'static, str>>,
    /// Schema of the notified data.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub data: Option<DataSchema>,
    /// `URI` variables.
    #[serde(skip_serializing_if = "UriVariables::is_empty")]
    #[serde(default)]
    pub uri_variables: UriVariables,
    /// Forms.
    #[serde(default)]
    pub forms: Vec<Form>,
}

impl EventAffordance {
    /// Creates an [`EventAffordance`] without data.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
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

    /// Sets the data schema.
    #[must_use]
    pub fn data(mut self, data: DataSchema) -> Self {
        self.data = Some(data);
        self
    }

    /// Declares a `URI` variable.
    #[must_use]
    pub fn uri_variable(mut self, name: impl Into<String>, schema: DataSchema) -> Self {
        self.uri_variables.add(name, schema);
        self
    }

    /// Adds a [`Form`].
    #[must_use]
    pub fn form(mut self, form: Form) -> Self {
        self.forms.push(form);
        self
    }
}

impl Affordance for EventAffordance {
    const KIND: InteractionKind = InteractionKind::Event;

    fn forms(&self) -> &[Form] {
        &self.forms
    }

    fn forms_mut(&mut self) -> &mut Vec<Form> {
        &mut self.forms
    }

    fn uri_variables(&self) -> &UriVariables {
        &self.uri_variables
    }

    fn operations(&self) -> Vec<Operation> {
        alloc::vec![Operation::SubscribeEvent, Operation::UnsubscribeEvent]
    }
}

map! {
  /// Property affordances ordered by insertion.
  #[derive(Debug, Clone, PartialEq, Serialize)]
  #[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
  pub struct Properties(IndexMap<String, PropertyAffordance, DefaultHashBuilder>);
}

map! {
  /// Action affordances ordered by insertion.
  #[derive(Debug, Clone, PartialEq, Serialize)]
  #[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
  pub struct Actions(IndexMap<String, ActionAffordance, DefaultHashBuilder>);
}

map! {
  /// Event affordances ordered by insertion.
  #[derive(Debug, Clone, PartialEq, Serialize)]
  #[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
  pub struct Events(IndexMap<String, EventAffordance, DefaultHashBuilder>);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    #[cfg(feature = "deserialize")]
    use crate::deserialize;
    use crate::form::{Form, Operation};
    use crate::schema::DataSchema;
    use crate::serialize;

    use super::{ActionAffordance, Affordance, EventAffordance, PropertyAffordance};

    #[test]
    fn property_serialization() {
        let property = PropertyAffordance::new(DataSchema::integer().unit("percent"))
            .observable()
            .uri_variable("step", DataSchema::integer())
            .form(
                Form::new("coap://127.0.0.1:5683/lamp/properties/brightness")
                    .content_type("application/json")
                    .operations(property_operations()),
            );

        let value = serialize(&property);
        assert_eq!(
            value,
            json!({
                "type": "integer",
                "unit": "percent",
                "observable": true,
                "uriVariables": { "step": { "type": "integer" } },
                "forms": [{
                    "href": "coap://127.0.0.1:5683/lamp/properties/brightness",
                    "contentType": "application/json",
                    "op": ["readproperty", "writeproperty", "observeproperty", "unobserveproperty"],
                }],
            })
        );

        #[cfg(feature = "deserialize")]
        assert_eq!(deserialize::<PropertyAffordance>(value), property);
    }

    fn property_operations() -> [Operation; 4] {
        [
            Operation::ReadProperty,
            Operation::WriteProperty,
            Operation::ObserveProperty,
            Operation::UnobserveProperty,
        ]
    }

    #[test]
    fn property_operations_from_flags() {
        let property = PropertyAffordance::new(DataSchema::boolean()).observable();
        assert_eq!(property.operations(), property_operations());

        let property = PropertyAffordance::new(DataSchema::boolean()).read_only();
        assert!(property.is_read_only());
        assert_eq!(property.operations(), [Operation::ReadProperty]);

        let property = PropertyAffordance::new(DataSchema::string()).write_only();
        assert_eq!(property.operations(), [Operation::WriteProperty]);
    }

    #[test]
    fn action_serialization() {
        let action = ActionAffordance::new()
            .title("Fade")
            .input(DataSchema::integer().minimum(0.).maximum(100.))
            .idempotent();

        let value = serialize(&action);
        assert_eq!(
            value,
            json!({
                "title": "Fade",
                "input": { "type": "integer", "minimum": 0.0, "maximum": 100.0 },
                "idempotent": true,
                "forms": [],
            })
        );

        #[cfg(feature = "deserialize")]
        assert_eq!(deserialize::<ActionAffordance>(value), action);
        assert_eq!(action.operations(), [Operation::InvokeAction]);
    }

    #[test]
    fn event_serialization() {
        let event = EventAffordance::new().data(DataSchema::number());

        let value = serialize(&event);
        assert_eq!(
            value,
            json!({ "data": { "type": "number" }, "forms": [] })
        );

        #[cfg(feature = "deserialize")]
        assert_eq!(deserialize::<EventAffordance>(value), event);
    }
}
