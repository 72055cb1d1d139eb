use std::sync::{Arc, PoisonError, RwLock, Weak};

use futures_util::future::BoxFuture;

use indexmap::IndexMap;

use tracing::{debug, info};

use wotkit::codec::ContentSerdes;
use wotkit::thing::Thing;

use crate::error::Result;
use crate::thing::ExposedThing;

/// A protocol binding server.
///
/// Bindings for further protocols plug into the runtime by implementing
/// this trait.
pub trait ProtocolServer: Send + Sync {
    /// Returns the `URI` scheme of the protocol.
    fn scheme(&self) -> &str;

    /// Starts listening.
    fn start(&self) -> BoxFuture<'_, Result<()>>;

    /// Stops listening.
    fn stop(&self) -> BoxFuture<'_, Result<()>>;

    /// Exposes a Thing, adding its forms when the server is listening.
    fn expose(&self, thing: Arc<ExposedThing>) -> BoxFuture<'_, Result<()>>;

    /// Removes every exposure of the Thing with the given identifier.
    ///
    /// Returns whether something has been removed.
    fn destroy<'a>(&'a self, thing_id: &'a str) -> BoxFuture<'a, Result<bool>>;
}

/// The runtime hosting exposed Things.
pub trait ThingHost: Send + Sync {
    /// Exposes a Thing.
    fn expose(&self, thing: Arc<ExposedThing>) -> BoxFuture<'_, Result<()>>;

    /// Removes a Thing.
    ///
    /// Returns whether something has been removed.
    fn destroy(&self, thing: Arc<ExposedThing>) -> BoxFuture<'_, Result<bool>>;
}

/// A runtime hosting Things on a set of [`ProtocolServer`]s.
pub struct Servient {
    // Content negotiator shared by the produced things.
    serdes: Arc<ContentSerdes>,
    // Protocol servers.
    servers: Vec<Arc<dyn ProtocolServer>>,
    // Exposed things by identifier.
    things: RwLock<IndexMap<String, Arc<ExposedThing>>>,
}

impl Default for Servient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Servient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let schemes: Vec<&str> = self.servers.iter().map(|s| s.scheme()).collect();
        f.debug_struct("Servient")
            .field("serdes", &self.serdes)
            .field("servers", &schemes)
            .field("things", &self.thing_ids())
            .finish()
    }
}

impl Servient {
    /// Creates a [`Servient`] without servers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            serdes: Arc::new(ContentSerdes::default()),
            servers: Vec::new(),
            things: RwLock::new(IndexMap::new()),
        }
    }

    /// Sets the content negotiator used by the produced Things.
    #[must_use]
    pub fn content_serdes(mut self, serdes: ContentSerdes) -> Self {
        self.serdes = Arc::new(serdes);
        self
    }

    /// Adds a [`ProtocolServer`].
    #[must_use]
    pub fn server(mut self, server: impl ProtocolServer + 'static) -> Self {
        self.servers.push(Arc::new(server));
        self
    }

    /// Starts all servers.
    ///
    /// # Errors
    ///
    /// Fails when a server cannot start.
    pub async fn start(self) -> Result<Arc<Self>> {
        for server in &self.servers {
            server.start().await?;
            info!("Started `{}` server", server.scheme());
        }
        Ok(Arc::new(self))
    }

    /// Stops all servers.
    ///
    /// # Errors
    ///
    /// Fails when a server cannot stop.
    pub async fn shutdown(&self) -> Result<()> {
        for server in &self.servers {
            server.stop().await?;
            info!("Stopped `{}` server", server.scheme());
        }
        Ok(())
    }

    /// Produces an [`ExposedThing`] hosted by this runtime.
    ///
    /// The Thing becomes reachable once [`ExposedThing::expose`] is called.
    #[must_use]
    pub fn produce(self: &Arc<Self>, thing: Thing) -> Arc<ExposedThing> {
        let servient: Weak<Self> = Arc::downgrade(self);
        let host: Weak<dyn ThingHost> = servient;
        Arc::new(ExposedThing::hosted(thing, Arc::clone(&self.serdes), host))
    }

    /// Returns the identifiers of the exposed Things.
    #[must_use]
    pub fn thing_ids(&self) -> Vec<String> {
        self.things
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Returns an exposed Thing by identifier.
    #[must_use]
    pub fn thing(&self, id: &str) -> Option<Arc<ExposedThing>> {
        self.things
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

impl ThingHost for Servient {
    fn expose(&self, thing: Arc<ExposedThing>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for server in &self.servers {
                server.expose(Arc::clone(&thing)).await?;
            }
            let id = thing.id();
            debug!("Hosting thing `{id}`");
            self.things
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, thing);
            Ok(())
        })
    }

    fn destroy(&self, thing: Arc<ExposedThing>) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let id = thing.id();
            let mut removed = false;
            for server in &self.servers {
                removed |= server.destroy(&id).await?;
            }
            removed |= self
                .things
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .shift_remove(&id)
                .is_some();
            Ok(removed)
        })
    }
}
