use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use hashbrown::DefaultHashBuilder;

use indexmap::map::IndexMap;

use serde::Serialize;

use crate::affordance::{
    ActionAffordance, Actions, EventAffordance, Events, Properties, PropertyAffordance,
};
use crate::error::Result;
use crate::form::{Form, InteractionKind};
use crate::macros::map;
use crate::parameters::UriVariables;
use crate::schema::DataSchema;

/// The Thing document context.
pub const CONTEXT: &str = "https://www.w3.org/2022/wot/td/v1.1";

/// Name of the security definition applied when none is given.
pub const NOSEC: &str = "nosec_sc";

#[cfg(feature = "deserialize")]
fn default_context() -> Cow<'static, str> {
    Cow::Borrowed(CONTEXT)
}

/// A security scheme.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct SecurityScheme {
    /// Scheme name.
    pub scheme: Cow<'static, str>,
}

impl SecurityScheme {
    /// Creates a scheme without any security.
    #[must_use]
    pub const fn nosec() -> Self {
        Self {
            scheme: Cow::Borrowed("nosec"),
        }
    }
}

map! {
  /// Security definitions ordered by insertion.
  #[derive(Debug, Clone, PartialEq, Serialize)]
  #[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
  pub struct SecurityDefinitions(IndexMap<String, SecurityScheme, DefaultHashBuilder>);
}

/// A Thing document.
///
/// The document describes the identity of a Thing and all its
/// interaction affordances. Bindings enrich it with [`Form`]s when the
/// Thing is exposed.
///
/// # Example
///
/// ```rust
/// use wotkit::affordance::{ActionAffordance, PropertyAffordance};
/// use wotkit::schema::DataSchema;
/// use wotkit::thing::Thing;
///
/// let thing = Thing::new("Lamp 1")
///     .id("urn:dev:lamp-1")
///     .property("on", PropertyAffordance::new(DataSchema::boolean()).observable())
///     .action("toggle", ActionAffordance::new());
///
/// assert!(thing.properties.contains("on"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    /// Document context.
    #[serde(rename = "@context")]
    #[cfg_attr(feature = "deserialize", serde(default = "default_context"))]
    pub context: Cow<'static, str>,
    /// Thing identifier.
    #[serde(skip_serializing_if = "String::is_empty")]
    #[serde(default)]
    pub id: String,
    /// Thing title.
    pub title: String,
    /// Thing description.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub description: Option<Cow<'static, str>>,
    /// Security definitions.
    pub security_definitions: SecurityDefinitions,
    /// Names of the applied security definitions.
    pub security: Vec<String>,
    /// `URI` variables shared by all affordances.
    #[serde(skip_serializing_if = "UriVariables::is_empty")]
    #[serde(default)]
    pub uri_variables: UriVariables,
    /// Properties.
    #[serde(skip_serializing_if = "Properties::is_empty")]
    #[serde(default)]
    pub properties: Properties,
    /// Actions.
    #[serde(skip_serializing_if = "Actions::is_empty")]
    #[serde(default)]
    pub actions: Actions,
    /// Events.
    #[serde(skip_serializing_if = "Events::is_empty")]
    #[serde(default)]
    pub events: Events,
    /// Thing-level forms.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub forms: Vec<Form>,
}

impl Thing {
    /// Creates a [`Thing`] with the given title and no affordances.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            context: Cow::Borrowed(CONTEXT),
            id: String::new(),
            title: title.into(),
            description: None,
            security_definitions: SecurityDefinitions::new()
                .insert(NOSEC, SecurityScheme::nosec()),
            security: vec![NOSEC.into()],
            uri_variables: UriVariables::new(),
            properties: Properties::new(),
            actions: Actions::new(),
            events: Events::new(),
            forms: Vec::new(),
        }
    }

    /// Sets the identifier.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets a description.
    #[must_use]
    pub fn description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declares a Thing-level `URI` variable.
    #[must_use]
    pub fn uri_variable(mut self, name: impl Into<String>, schema: DataSchema) -> Self {
        self.uri_variables.add(name, schema);
        self
    }

    /// Adds a [`PropertyAffordance`].
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, property: PropertyAffordance) -> Self {
        self.properties.add(name, property);
        self
    }

    /// Adds an [`ActionAffordance`].
    #[must_use]
    pub fn action(mut self, name: impl Into<String>, action: ActionAffordance) -> Self {
        self.actions.add(name, action);
        self
    }

    /// Adds an [`EventAffordance`].
    #[must_use]
    pub fn event(mut self, name: impl Into<String>, event: EventAffordance) -> Self {
        self.events.add(name, event);
        self
    }

    /// Returns the forms of the named affordance.
    #[must_use]
    pub fn forms_of(&self, kind: InteractionKind, name: &str) -> Option<&[Form]> {
        match kind {
            InteractionKind::Property => self.properties.get(name).map(|p| p.forms.as_slice()),
            InteractionKind::Action => self.actions.get(name).map(|a| a.forms.as_slice()),
            InteractionKind::Event => self.events.get(name).map(|e| e.forms.as_slice()),
        }
    }

    /// Appends a [`Form`] to the named affordance.
    ///
    /// Returns the index of the new form, or [`None`] when no affordance of
    /// the given kind has that name.
    pub fn add_form(&mut self, kind: InteractionKind, name: &str, form: Form) -> Option<usize> {
        let forms = match kind {
            InteractionKind::Property => &mut self.properties.get_mut(name)?.forms,
            InteractionKind::Action => &mut self.actions.get_mut(name)?.forms,
            InteractionKind::Event => &mut self.events.get_mut(name)?.forms,
        };
        forms.push(form);
        Some(forms.len() - 1)
    }

    /// Renders the document as `JSON`.
    ///
    /// # Errors
    ///
    /// Fails when the document cannot be serialized.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(Into::into)
    }
}
