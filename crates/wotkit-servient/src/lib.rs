//! `wotkit-servient` is a runtime exposing Web of Things devices on
//! operating systems.
//!
//! A device is described by a [`Thing`](wotkit::thing::Thing) and becomes
//! an [`ExposedThing`](thing::ExposedThing) once produced by a
//! [`Servient`](servient::Servient). Applications attach asynchronous
//! handlers to its properties, actions and events, then expose it.
//!
//! Exposing a Thing hands it to every protocol binding of the runtime.
//! Each binding serves the Thing on the network and writes the forms
//! describing how to reach its interactions into the Thing Description.
//! Incoming requests are dispatched to the handlers, and values emitted by
//! the application are pushed to every observer and subscriber.
//!
//! The [`coap`] binding is the only one provided. Further bindings plug in
//! by implementing [`ProtocolServer`](servient::ProtocolServer).
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! use serde_json::Value;
//!
//! use wotkit::affordance::PropertyAffordance;
//! use wotkit::schema::DataSchema;
//! use wotkit::thing::Thing;
//!
//! use wotkit_servient::coap::CoapServer;
//! use wotkit_servient::servient::Servient;
//!
//! # async fn run() -> wotkit_servient::error::Result<()> {
//! let servient = Servient::new().server(CoapServer::new()).start().await?;
//!
//! let lamp = servient.produce(
//!     Thing::new("Lamp")
//!         .property("on", PropertyAffordance::new(DataSchema::boolean()).observable()),
//! );
//!
//! let state = Arc::new(AtomicBool::new(false));
//! let read = Arc::clone(&state);
//! lamp.set_property_read_handler("on", move |_| {
//!     let on = read.load(Ordering::SeqCst);
//!     async move { Ok(Value::Bool(on)) }
//! })?;
//! lamp.set_property_write_handler("on", move |value, _| {
//!     state.store(value.as_bool().unwrap_or_default(), Ordering::SeqCst);
//!     async { Ok(()) }
//! })?;
//!
//! lamp.expose().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]

/// The `CoAP` protocol binding.
pub mod coap;
/// Payloads exchanged with protocol bindings.
pub mod content;
/// Error management.
pub mod error;
/// Interaction handlers.
pub mod handlers;
/// Observers and subscribers of interactions.
pub mod listeners;
/// The runtime and the protocol server abstraction.
pub mod servient;
/// Things exposed by the runtime.
pub mod thing;

pub use wotkit;
