use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use coap_lite::{MessageClass, MessageType, Packet};

use futures_util::future::BoxFuture;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use wotkit::codec::{ContentSerdes, DEFAULT, JSON_LD, TD};

use crate::error::Result;
use crate::servient::ProtocolServer;
use crate::thing::ExposedThing;

use super::link_format::LinkEntry;
use super::message::{InboundRequest, OutboundResponse, ResponseCode};
use super::router::{Observation, RouteOutcome, Router, SCHEME, ThingRegistry, add_forms};

/// Default server port.
pub const DEFAULT_PORT: u16 = 5683;

// Default address the server binds to.
const DEFAULT_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

// Content format registered for `application/ld+json`.
const JSON_LD_CONTENT_FORMAT: u16 = 2100;

// Size of the receive buffer.
const BUFFER_SIZE: usize = 65_535;

// Largest Observe option value.
const OBSERVE_SEQUENCE_MASK: u32 = 0x00FF_FFFF;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// Formats an address as a URI host.
fn uri_host(address: IpAddr) -> String {
    match address {
        IpAddr::V4(address) => address.to_string(),
        IpAddr::V6(address) => format!("[{address}]"),
    }
}

// Server state while listening.
struct Listening {
    // Bound socket address.
    local_address: SocketAddr,
    // Base URLs of the server.
    base_urls: Vec<String>,
    // Stops the serve loop and every observation.
    cancel: CancellationToken,
    // Serve loop.
    task: Option<JoinHandle<()>>,
}

/// A `CoAP` server exposing Things over `UDP`.
///
/// Every exposed Thing is served under a path derived from its title:
///
/// - `/` lists the `URL` of every Thing
/// - `/.well-known/core` describes them in the `CoRE` link format
/// - `/{thing}` returns the Thing Description
/// - `/{thing}/properties/{name}` reads, writes and observes a property
/// - `/{thing}/actions/{name}` invokes an action
/// - `/{thing}/events/{name}` subscribes to an event
///
/// Things exposed while the server listens receive one form per
/// advertised address, offered media type and interaction.
pub struct CoapServer {
    // Server port.
    port: u16,
    // Server address.
    address: IpAddr,
    // Addresses written into forms.
    advertise: Vec<IpAddr>,
    // Content negotiator.
    serdes: ContentSerdes,
    // Exposed things.
    registry: Arc<ThingRegistry>,
    // Listening state.
    listening: RwLock<Option<Listening>>,
}

impl Default for CoapServer {
    fn default() -> Self {
        Self::new()
    }
}

impl CoapServer {
    /// Creates a [`CoapServer`] listening on every interface at
    /// [`DEFAULT_PORT`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            address: DEFAULT_ADDRESS,
            advertise: Vec::new(),
            serdes: Self::negotiator(ContentSerdes::default()),
            registry: Arc::new(ThingRegistry::default()),
            listening: RwLock::new(None),
        }
    }

    /// Sets the server port.
    ///
    /// Port `0` lets the operating system choose one.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the server address.
    #[must_use]
    pub const fn address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Adds an address written into the forms of exposed Things.
    ///
    /// Without advertised addresses, the bound address is used, or the
    /// loopback address when the server binds every interface.
    #[must_use]
    pub fn advertise(mut self, address: IpAddr) -> Self {
        self.advertise.push(address);
        self
    }

    /// Sets the content negotiator.
    #[must_use]
    pub fn content_serdes(mut self, serdes: ContentSerdes) -> Self {
        self.serdes = Self::negotiator(serdes);
        self
    }

    /// Returns the bound port, [`None`] when the server is not listening.
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.local_address().map(|address| address.port())
    }

    /// Returns the bound address, [`None`] when the server is not
    /// listening.
    #[must_use]
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.listening
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|listening| listening.local_address)
    }

    fn negotiator(mut serdes: ContentSerdes) -> ContentSerdes {
        serdes.register_content_format(JSON_LD, JSON_LD_CONTENT_FORMAT);
        serdes
    }

    fn base_urls(&self, local_address: SocketAddr) -> Vec<String> {
        let addresses = if !self.advertise.is_empty() {
            self.advertise.clone()
        } else if local_address.ip().is_unspecified() {
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
        } else {
            vec![local_address.ip()]
        };

        addresses
            .into_iter()
            .map(|address| {
                format!(
                    "{SCHEME}://{}:{}",
                    uri_host(address),
                    local_address.port()
                )
            })
            .collect()
    }

    fn listening_urls(&self) -> Option<Vec<String>> {
        self.listening
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|listening| listening.base_urls.clone())
    }

    fn router(&self, base_urls: Vec<String>) -> Router {
        Router::new(
            Arc::clone(&self.registry),
            Arc::new(self.serdes.clone()),
            base_urls,
        )
    }

    async fn start_server(&self) -> Result<()> {
        if self.local_address().is_some() {
            debug!("CoAP server already listening");
            return Ok(());
        }

        let socket = UdpSocket::bind(SocketAddr::new(self.address, self.port)).await?;
        let local_address = socket.local_addr()?;
        let base_urls = self.base_urls(local_address);
        let cancel = CancellationToken::new();

        let context = Arc::new(ServeContext {
            socket,
            router: self.router(base_urls.clone()),
            observations: Mutex::new(HashMap::new()),
            resets: Mutex::new(HashMap::new()),
            message_id: AtomicU16::new(initial_message_id()),
            observation_id: AtomicU64::new(0),
            cancel: cancel.clone(),
        });
        let task = tokio::spawn(serve(context));

        info!("CoAP server listening on {local_address}");
        *self
            .listening
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Listening {
            local_address,
            base_urls,
            cancel,
            task: Some(task),
        });
        Ok(())
    }

    async fn stop_server(&self) -> Result<()> {
        let listening = self
            .listening
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(listening) = listening else {
            return Ok(());
        };

        listening.cancel.cancel();
        if let Some(task) = listening.task
            && let Err(e) = task.await
        {
            error!("CoAP serve loop failed: {e}");
        }
        info!("CoAP server on {} stopped", listening.local_address);
        Ok(())
    }

    fn expose_thing(&self, thing: &Arc<ExposedThing>) -> Result<()> {
        let content_formats = [DEFAULT, TD]
            .into_iter()
            .filter_map(|media_type| self.serdes.content_format(media_type));
        let path = self
            .registry
            .register(thing, LinkEntry::thing(content_formats));

        let Some(base_urls) = self.listening_urls() else {
            debug!("Registered `{path}` without forms, the server is not listening");
            return Ok(());
        };

        let media_types: Vec<String> = self
            .serdes
            .offered_media_types()
            .map(ToOwned::to_owned)
            .collect();
        add_forms(thing, &path, &base_urls, &media_types)?;
        info!("Exposed `{}` at `/{path}`", thing.title());
        Ok(())
    }
}

impl ProtocolServer for CoapServer {
    fn scheme(&self) -> &str {
        SCHEME
    }

    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.start_server())
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.stop_server())
    }

    fn expose(&self, thing: Arc<ExposedThing>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.expose_thing(&thing) })
    }

    fn destroy<'a>(&'a self, thing_id: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let removed = self.registry.remove(thing_id);
            if removed {
                info!("Destroyed `{thing_id}`");
            }
            Ok(removed)
        })
    }
}

fn initial_message_id() -> u16 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.subsec_nanos());
    // Keeps the low 16 bits, so the conversion never fails.
    u16::try_from(nanos & 0xFFFF).unwrap_or_default()
}

// An observation is identified by the peer and the request token.
type ObservationKey = (SocketAddr, Vec<u8>);

// State shared by the serve loop and the request tasks.
struct ServeContext {
    socket: UdpSocket,
    router: Router,
    // Active observations.
    observations: Mutex<HashMap<ObservationKey, (u64, CancellationToken)>>,
    // Observations by the message id of their last notification.
    resets: Mutex<HashMap<(SocketAddr, u16), CancellationToken>>,
    message_id: AtomicU16,
    observation_id: AtomicU64,
    cancel: CancellationToken,
}

impl ServeContext {
    fn next_message_id(&self) -> u16 {
        self.message_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(&self, packet: Packet, peer: SocketAddr) -> bool {
        let bytes = match packet.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Cannot encode a message for {peer}: {e:?}");
                return false;
            }
        };

        match self.socket.send_to(&bytes, peer).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Cannot send a message to {peer}: {e}");
                false
            }
        }
    }

    fn reset(&self, peer: SocketAddr, message_id: u16) {
        if let Some(cancel) = lock(&self.resets).remove(&(peer, message_id)) {
            debug!("Observation of {peer} reset");
            cancel.cancel();
        }
    }

    async fn handle_datagram(&self, datagram: &[u8], peer: SocketAddr) {
        let packet = match Packet::from_bytes(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Dropping malformed datagram from {peer}: {e:?}");
                return;
            }
        };

        let message_type = packet.header.get_type();
        let message_id = packet.header.message_id;
        match (message_type, &packet.header.code) {
            (MessageType::Reset, _) => return self.reset(peer, message_id),
            (MessageType::Acknowledgement, _) => return,
            (MessageType::Confirmable, MessageClass::Empty) => {
                let mut reset = Packet::new();
                reset.header.set_type(MessageType::Reset);
                reset.header.message_id = message_id;
                reset.header.code = MessageClass::Empty;
                self.send(reset, peer).await;
                return;
            }
            _ => {}
        }

        let Some(request) = InboundRequest::from_packet(&packet) else {
            debug!("Ignoring a non-request message from {peer}");
            return;
        };
        let token = packet.get_token().to_vec();
        let (reply_type, reply_id) = if message_type == MessageType::Confirmable {
            (MessageType::Acknowledgement, message_id)
        } else {
            (MessageType::NonConfirmable, self.next_message_id())
        };

        match self.router.route(request).await {
            RouteOutcome::Reply(response) => {
                self.send(response.into_packet(reply_type, reply_id, token), peer)
                    .await;
            }
            RouteOutcome::Observe(observation) => {
                let initial = OutboundResponse::new(ResponseCode::Content).observe(0);
                if self
                    .send(initial.into_packet(reply_type, reply_id, token.clone()), peer)
                    .await
                {
                    self.observe(peer, token, observation).await;
                } else {
                    (observation.teardown)().await;
                }
            }
        }
    }

    // Streams the notifications of an observation until it ends, then
    // runs its teardown.
    async fn observe(&self, peer: SocketAddr, token: Vec<u8>, observation: Observation) {
        let Observation {
            mut notifications,
            idle_timeout,
            teardown,
        } = observation;

        let key = (peer, token.clone());
        let id = self.observation_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        let previous = lock(&self.observations).insert(key.clone(), (id, cancel.clone()));
        if let Some((_, previous)) = previous {
            debug!("Replacing an observation of {peer}");
            previous.cancel();
        }

        let idle = async {
            match idle_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(idle);

        let mut sequence: u32 = 1;
        let mut last_message_id = None;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Observation of {peer} cancelled");
                    break;
                }
                () = &mut idle => {
                    debug!("Observation of {peer} expired");
                    break;
                }
                content = notifications.recv() => {
                    let Some(content) = content else {
                        debug!("Observation of {peer} closed");
                        break;
                    };

                    let content_format = self.router.content_format(content.content_type());
                    let payload = match content.into_bytes().await {
                        Ok(payload) => payload,
                        Err(e) => {
                            error!("Cannot read a notification: {e}");
                            continue;
                        }
                    };

                    let message_id = self.next_message_id();
                    {
                        let mut resets = lock(&self.resets);
                        if let Some(previous) = last_message_id.replace(message_id) {
                            resets.remove(&(peer, previous));
                        }
                        resets.insert((peer, message_id), cancel.clone());
                    }

                    let notification = OutboundResponse::content(payload.to_vec(), content_format)
                        .observe(sequence)
                        .into_packet(MessageType::NonConfirmable, message_id, token.clone());
                    if !self.send(notification, peer).await {
                        break;
                    }
                    sequence = sequence.wrapping_add(1) & OBSERVE_SEQUENCE_MASK;
                }
            }
        }

        if let Some(message_id) = last_message_id {
            lock(&self.resets).remove(&(peer, message_id));
        }
        {
            let mut observations = lock(&self.observations);
            if observations
                .get(&key)
                .is_some_and(|(current, _)| *current == id)
            {
                observations.remove(&key);
            }
        }
        teardown().await;
    }
}

async fn serve(context: Arc<ServeContext>) {
    let mut buffer = vec![0; BUFFER_SIZE];
    loop {
        tokio::select! {
            () = context.cancel.cancelled() => break,
            received = context.socket.recv_from(&mut buffer) => match received {
                Ok((length, peer)) => {
                    let datagram = buffer[..length].to_vec();
                    let context = Arc::clone(&context);
                    tokio::spawn(async move {
                        context.handle_datagram(&datagram, peer).await;
                    });
                }
                Err(e) => error!("Cannot receive a datagram: {e}"),
            }
        }
    }
    debug!("CoAP serve loop stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::atomic::{AtomicU16, AtomicU64};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};

    use serde_json::{Value, json};

    use serial_test::serial;

    use tokio::net::UdpSocket;

    use tokio_util::sync::CancellationToken;

    use wotkit::affordance::{EventAffordance, PropertyAffordance};
    use wotkit::codec::DEFAULT;
    use wotkit::schema::DataSchema;
    use wotkit::thing::Thing;

    use crate::coap::link_format::LinkEntry;
    use crate::coap::message::{InboundRequest, Method, decode_uint, encode_uint};
    use crate::coap::router::{
        Observation, PROPERTY_OBSERVATION_TIMEOUT, RouteOutcome, Router, add_forms,
    };
    use crate::servient::ProtocolServer;
    use crate::thing::ExposedThing;

    use super::{CoapServer, DEFAULT_PORT, ServeContext};

    fn lamp() -> Arc<ExposedThing> {
        let thing = Arc::new(ExposedThing::new(
            Thing::new("Lamp 1")
                .property(
                    "on",
                    PropertyAffordance::new(DataSchema::boolean()).observable(),
                )
                .event(
                    "overheat",
                    EventAffordance::new().data(DataSchema::integer()),
                ),
        ));
        thing
            .set_property_read_handler("on", |_| async { Ok(Value::Bool(true)) })
            .unwrap();
        thing
    }

    fn request(
        message_type: MessageType,
        message_id: u16,
        token: &[u8],
        path: &[&str],
    ) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(message_type);
        packet.header.code = MessageClass::Request(RequestType::Get);
        packet.header.message_id = message_id;
        packet.set_token(token.to_vec());
        for segment in path {
            packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
        packet
    }

    async fn exchange(client: &UdpSocket, server: SocketAddr, packet: Option<Packet>) -> Packet {
        if let Some(packet) = packet {
            client
                .send_to(&packet.to_bytes().unwrap(), server)
                .await
                .unwrap();
        }

        let mut buffer = [0; 2048];
        let received = client.recv_from(&mut buffer);
        let (length, _) = tokio::time::timeout(Duration::from_secs(5), received)
            .await
            .unwrap()
            .unwrap();
        Packet::from_bytes(&buffer[..length]).unwrap()
    }

    async fn observation(router: &Router, path: &str) -> Observation {
        match router
            .route(InboundRequest::new(Method::Get, path).observe(0))
            .await
        {
            RouteOutcome::Observe(observation) => observation,
            RouteOutcome::Reply(response) => panic!("Unexpected {} reply", response.code),
        }
    }

    fn observe_value(packet: &Packet) -> Option<u32> {
        packet
            .get_option(CoapOption::Observe)
            .and_then(|values| values.front())
            .and_then(|value| decode_uint(value))
    }

    #[test]
    fn base_urls() {
        let any = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT);
        assert_eq!(
            CoapServer::new().base_urls(any),
            ["coap://127.0.0.1:5683"]
        );

        let bound = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7)), 6000);
        assert_eq!(CoapServer::new().base_urls(bound), ["coap://192.168.1.7:6000"]);

        let server = CoapServer::new()
            .advertise(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .advertise("fe80::1".parse().unwrap());
        assert_eq!(
            server.base_urls(any),
            ["coap://10.0.0.1:5683", "coap://[fe80::1]:5683"]
        );
    }

    #[test]
    fn json_ld_content_format() {
        let server = CoapServer::new();
        assert_eq!(server.serdes.content_format("application/ld+json"), Some(2100));
        assert_eq!(server.serdes.media_type_for(2100), Some("application/ld+json"));
    }

    #[tokio::test]
    async fn expose_before_start() {
        let server = CoapServer::new();
        let lamp = lamp();

        server.expose(Arc::clone(&lamp)).await.unwrap();
        assert_eq!(server.registry.paths(), ["lamp-1"]);
        assert!(lamp.with_description(|description| {
            description.properties.get("on").unwrap().forms.is_empty()
        }));

        assert!(server.destroy(&lamp.id()).await.unwrap());
        assert!(!server.destroy(&lamp.id()).await.unwrap());
        assert!(server.registry.paths().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn property_observations_expire_events_persist() {
        let server = CoapServer::new();
        let lamp = lamp();
        let base_urls = vec!["coap://127.0.0.1:5683".to_owned()];
        let path = server.registry.register(&lamp, LinkEntry::thing([50]));
        add_forms(&lamp, &path, &base_urls, &[DEFAULT.to_owned()]).unwrap();

        let context = Arc::new(ServeContext {
            socket: UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap(),
            router: server.router(base_urls),
            observations: Mutex::new(HashMap::new()),
            resets: Mutex::new(HashMap::new()),
            message_id: AtomicU16::new(0),
            observation_id: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        });
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9);

        let property = observation(&context.router, "/lamp-1/properties/on").await;
        let property = tokio::spawn({
            let context = Arc::clone(&context);
            async move { context.observe(peer, vec![1], property).await }
        });
        let event = observation(&context.router, "/lamp-1/events/overheat").await;
        let event = tokio::spawn({
            let context = Arc::clone(&context);
            async move { context.observe(peer, vec![2], event).await }
        });
        tokio::task::yield_now().await;
        assert_eq!(context.observations.lock().unwrap().len(), 2);

        tokio::time::sleep(PROPERTY_OBSERVATION_TIMEOUT + Duration::from_secs(1)).await;
        property.await.unwrap();

        // The expired observation is torn down, the subscription lives on.
        assert_eq!(lamp.emit_property_change("on").await.unwrap(), 0);
        assert!(!event.is_finished());
        assert_eq!(lamp.emit_event("overheat", &json!(90)).unwrap(), 1);
        assert_eq!(context.observations.lock().unwrap().len(), 1);

        context.cancel.cancel();
        event.await.unwrap();
        assert_eq!(lamp.emit_event("overheat", &json!(0)).unwrap(), 0);
        assert!(context.observations.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    #[serial]
    async fn udp_round_trip() {
        let server = CoapServer::new()
            .address(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .port(0);
        server.start().await.unwrap();
        let address = server.local_address().unwrap();

        let lamp = lamp();
        server.expose(Arc::clone(&lamp)).await.unwrap();
        assert_eq!(
            lamp.with_description(|description| {
                description.properties.get("on").unwrap().forms[0].href.clone()
            }),
            format!("coap://127.0.0.1:{}/lamp-1/properties/on", address.port())
        );

        let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

        // Confirmable requests receive a piggybacked acknowledgement.
        let response = exchange(
            &client,
            address,
            Some(request(
                MessageType::Confirmable,
                0x1234,
                &[1, 2],
                &["lamp-1", "properties", "on"],
            )),
        )
        .await;
        assert_eq!(response.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(response.header.message_id, 0x1234);
        assert_eq!(response.get_token().to_vec(), vec![1, 2]);
        assert_eq!(
            response.header.code,
            MessageClass::Response(ResponseType::Content)
        );
        assert_eq!(
            serde_json::from_slice::<Value>(&response.payload).unwrap(),
            json!(true)
        );

        // Empty confirmable messages are reset.
        let mut ping = Packet::new();
        ping.header.set_type(MessageType::Confirmable);
        ping.header.code = MessageClass::Empty;
        ping.header.message_id = 0x4321;
        let response = exchange(&client, address, Some(ping)).await;
        assert_eq!(response.header.get_type(), MessageType::Reset);
        assert_eq!(response.header.message_id, 0x4321);

        // Event subscription.
        let mut subscribe = request(
            MessageType::NonConfirmable,
            0x2000,
            &[7],
            &["lamp-1", "events", "overheat"],
        );
        subscribe.add_option(CoapOption::Observe, encode_uint(0));
        let response = exchange(&client, address, Some(subscribe)).await;
        assert_eq!(response.header.get_type(), MessageType::NonConfirmable);
        assert_eq!(observe_value(&response), Some(0));

        assert_eq!(lamp.emit_event("overheat", &json!(42)).unwrap(), 1);
        let notification = exchange(&client, address, None).await;
        assert_eq!(notification.get_token().to_vec(), vec![7]);
        assert_eq!(observe_value(&notification), Some(1));
        assert_eq!(notification.payload, b"42");

        // A reset of the last notification cancels the observation.
        let mut reset = Packet::new();
        reset.header.set_type(MessageType::Reset);
        reset.header.code = MessageClass::Empty;
        reset.header.message_id = notification.header.message_id;
        client
            .send_to(&reset.to_bytes().unwrap(), address)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut delivered = 1;
        for _ in 0..50 {
            delivered = lamp.emit_event("overheat", &json!(0)).unwrap();
            if delivered == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(delivered, 0);

        server.stop().await.unwrap();
        assert!(server.local_address().is_none());
    }
}
