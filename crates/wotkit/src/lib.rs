//! `wotkit` describes the interaction model shared by every component of a
//! Web of Things runtime.
//!
//! A Thing is an entity exposing three kinds of affordances:
//!
//! - **Properties**, values which can be read, written or observed
//! - **Actions**, functions which can be invoked
//! - **Events**, notifications which can be subscribed to
//!
//! Each affordance publishes a list of forms. A form binds a URL, a content
//! type and the set of operations served at that URL, and it is the only
//! information a client needs to interact with the affordance over a given
//! protocol.
//!
//! This crate contains the Thing document, its data schemas and forms, the
//! content negotiation registry with its codecs, the form resolution rules
//! used by protocol bindings, and the validation of interaction options.
//!
//! The crate is `no_std` and only depends on an allocator, so the same
//! document types can be shared between firmware and operating system
//! runtimes.

#![no_std]
#![deny(unsafe_code)]
#![deny(missing_docs)]

extern crate alloc;

/// Property, action and event affordances.
pub mod affordance;
/// Content negotiation and codecs.
pub mod codec;
/// Error management.
pub mod error;
/// Forms, operations and form resolution.
pub mod form;
/// Interaction options and `URI` variables.
pub mod parameters;
/// Data schemas describing interaction values.
pub mod schema;
/// The Thing document.
pub mod thing;
/// Percent-encoding helpers.
pub mod uri;

mod macros;

#[cfg(test)]
pub(crate) fn serialize<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
#[cfg(feature = "deserialize")]
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}
