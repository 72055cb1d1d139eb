//! [`CoapServer`] serves every exposed Thing over `UDP`. Requests are
//! mapped onto the operations of [`ExposedThing`](crate::thing::ExposedThing)
//! according to their path, method and `Observe` option, while request
//! and response payloads are negotiated through the `Content-Format` and
//! `Accept` options.
//!
//! Observations of properties and subscriptions to events are streamed as
//! non-confirmable notifications carrying an increasing `Observe` value.
//! A property observation expires after one hour, an event subscription
//! lasts until the client resets a notification, the server stops or the
//! Thing is destroyed.

mod link_format;
mod message;
mod router;
mod server;

pub use server::{CoapServer, DEFAULT_PORT};
