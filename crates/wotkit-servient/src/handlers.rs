use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use serde_json::Value;

use wotkit::parameters::InteractionOptions;

use crate::error::Result;

/// A property read handler.
pub type ReadHandler =
    Arc<dyn Fn(InteractionOptions) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A property write handler.
pub type WriteHandler =
    Arc<dyn Fn(Value, InteractionOptions) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// An action handler.
///
/// It receives the decoded action input, [`Value::Null`] when the request
/// carries none, and optionally returns an output value.
pub type ActionHandler = Arc<
    dyn Fn(Value, InteractionOptions) -> BoxFuture<'static, Result<Option<Value>>> + Send + Sync,
>;

/// A handler called when an observation or an event subscription starts or
/// ends.
pub type SubscriptionHandler =
    Arc<dyn Fn(InteractionOptions) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub(crate) fn read_handler<F, Fut>(handler: F) -> ReadHandler
where
    F: Fn(InteractionOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |options| handler(options).boxed())
}

pub(crate) fn write_handler<F, Fut>(handler: F) -> WriteHandler
where
    F: Fn(Value, InteractionOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |value, options| handler(value, options).boxed())
}

pub(crate) fn action_handler<F, Fut>(handler: F) -> ActionHandler
where
    F: Fn(Value, InteractionOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
{
    Arc::new(move |input, options| handler(input, options).boxed())
}

pub(crate) fn subscription_handler<F, Fut>(handler: F) -> SubscriptionHandler
where
    F: Fn(InteractionOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |options| handler(options).boxed())
}

// Handler slots of a property.
#[derive(Clone, Default)]
pub(crate) struct PropertyHandlers {
    pub(crate) read: Option<ReadHandler>,
    pub(crate) write: Option<WriteHandler>,
    pub(crate) observe: Option<SubscriptionHandler>,
    pub(crate) unobserve: Option<SubscriptionHandler>,
}

// Handler slot of an action.
#[derive(Clone, Default)]
pub(crate) struct ActionHandlers {
    pub(crate) invoke: Option<ActionHandler>,
}

// Handler slots of an event.
#[derive(Clone, Default)]
pub(crate) struct EventHandlers {
    pub(crate) subscribe: Option<SubscriptionHandler>,
    pub(crate) unsubscribe: Option<SubscriptionHandler>,
}
