use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;

use indexmap::IndexMap;

use tokio::sync::mpsc::{self, UnboundedReceiver};

use tracing::{debug, error, warn};

use wotkit::affordance::Affordance;
use wotkit::codec::{ContentSerdes, DEFAULT, LINK_FORMAT, TD};
use wotkit::form::{Form, InteractionKind, Operation, find_request_matching_form_index};
use wotkit::parameters::{InteractionOptions, parse_query_parameters};
use wotkit::uri::percent_encode;

use crate::content::Content;
use crate::error::{Error, ErrorKind, Result};
use crate::listeners::ContentListener;
use crate::thing::ExposedThing;

use super::link_format::{self, LinkEntry};
use super::message::{InboundRequest, Method, OutboundResponse, ResponseCode};

/// The `URI` scheme served by the binding.
pub(crate) const SCHEME: &str = "coap";

// Maximum lifetime of a property observation.
pub(crate) const PROPERTY_OBSERVATION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Returns a path segment derived from a Thing title.
///
/// The title is lower-cased, ASCII alphanumerics are kept and every run of
/// other characters becomes a single `-`.
pub(crate) fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }

    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "thing".into()
    } else {
        slug.into()
    }
}

/// Things exposed by a server, by path segment.
#[derive(Default)]
pub(crate) struct ThingRegistry {
    // Things by path segment.
    things: RwLock<IndexMap<String, Arc<ExposedThing>>>,
    // Discovery entries by path segment.
    resources: RwLock<IndexMap<String, LinkEntry>>,
}

impl ThingRegistry {
    /// Registers a Thing returning its path segment.
    ///
    /// A Thing already registered keeps its path, a Thing whose slug
    /// collides with another Thing receives a numeric suffix.
    pub(crate) fn register(&self, thing: &Arc<ExposedThing>, entry: LinkEntry) -> String {
        let mut things = self.things.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(path) = things
            .iter()
            .find_map(|(path, registered)| Arc::ptr_eq(registered, thing).then(|| path.clone()))
        {
            return path;
        }

        let slug = slugify(&thing.title());
        let mut path = slug.clone();
        let mut suffix = 2;
        while things.contains_key(&path) {
            path = format!("{slug}-{suffix}");
            suffix += 1;
        }

        things.insert(path.clone(), Arc::clone(thing));
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone(), entry);
        path
    }

    /// Removes every path whose Thing has the given identifier.
    pub(crate) fn remove(&self, thing_id: &str) -> bool {
        let mut things = self.things.write().unwrap_or_else(PoisonError::into_inner);
        let mut resources = self
            .resources
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let before = things.len();
        things.retain(|path, thing| {
            let keep = thing.id() != thing_id;
            if !keep {
                resources.shift_remove(path);
            }
            keep
        });
        things.len() != before
    }

    pub(crate) fn get(&self, path: &str) -> Option<Arc<ExposedThing>> {
        self.things
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.things
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn discovery(&self) -> String {
        link_format::render(
            self.resources
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter(),
        )
    }
}

/// Adds the forms of every interaction of a Thing served under `path`.
///
/// One form is added per base `URL`, per media type and per interaction.
pub(crate) fn add_forms(
    thing: &ExposedThing,
    path: &str,
    base_urls: &[String],
    media_types: &[String],
) -> Result<()> {
    type Interactions = Vec<(String, Vec<Operation>)>;

    fn collect<'a, A: Affordance + 'a>(
        affordances: impl IntoIterator<Item = (&'a String, &'a A)>,
    ) -> Interactions {
        affordances
            .into_iter()
            .map(|(name, affordance)| (name.clone(), affordance.operations()))
            .collect()
    }

    let interactions: [(InteractionKind, Interactions); 3] =
        thing.with_description(|description| {
            [
                (InteractionKind::Property, collect(&description.properties)),
                (InteractionKind::Action, collect(&description.actions)),
                (InteractionKind::Event, collect(&description.events)),
            ]
        });

    for base in base_urls {
        for media_type in media_types {
            for (kind, affordances) in &interactions {
                for (name, operations) in affordances {
                    let href = format!(
                        "{base}/{}/{}/{}",
                        percent_encode(path),
                        kind.section(),
                        percent_encode(name)
                    );
                    let form = Form::new(href)
                        .content_type(media_type.as_str())
                        .operations(operations.iter().copied());
                    thing.add_form(*kind, name, form)?;
                }
            }
        }
    }
    Ok(())
}

/// Runs once when an observation ends.
pub(crate) type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A registered observation, streamed by the server.
pub(crate) struct Observation {
    pub(crate) notifications: UnboundedReceiver<Content>,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) teardown: Teardown,
}

pub(crate) enum RouteOutcome {
    Reply(OutboundResponse),
    Observe(Observation),
}

impl From<OutboundResponse> for RouteOutcome {
    fn from(response: OutboundResponse) -> Self {
        Self::Reply(response)
    }
}

fn method_not_allowed() -> OutboundResponse {
    OutboundResponse::diagnostic(ResponseCode::MethodNotAllowed, "Method Not Allowed")
}

fn not_found() -> OutboundResponse {
    OutboundResponse::diagnostic(ResponseCode::NotFound, "Not Found")
}

fn observe_not_implemented() -> OutboundResponse {
    OutboundResponse::diagnostic(
        ResponseCode::NotImplemented,
        "Observe cancellation through GET is not supported",
    )
}

fn internal_error(error: &Error) -> OutboundResponse {
    error!("Interaction failed: {error}");
    OutboundResponse::diagnostic(ResponseCode::InternalServerError, error.to_string())
}

fn channel_listener() -> (ContentListener, UnboundedReceiver<Content>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let listener = ContentListener::new(move |content| {
        sender
            .send(content)
            .map_err(|_| Error::new(ErrorKind::Transport, "Observation closed"))
    });
    (listener, receiver)
}

/// Maps inbound requests onto the exposed Things.
pub(crate) struct Router {
    // Exposed things.
    registry: Arc<ThingRegistry>,
    // Content negotiator.
    serdes: Arc<ContentSerdes>,
    // Base URLs of the server, one per advertised address.
    base_urls: Vec<String>,
}

impl Router {
    pub(crate) const fn new(
        registry: Arc<ThingRegistry>,
        serdes: Arc<ContentSerdes>,
        base_urls: Vec<String>,
    ) -> Self {
        Self {
            registry,
            serdes,
            base_urls,
        }
    }

    pub(crate) fn content_format(&self, content_type: &str) -> Option<u16> {
        self.serdes.content_format(content_type)
    }

    pub(crate) async fn route(&self, request: InboundRequest) -> RouteOutcome {
        debug!("{:?} {}", request.method, request.path());

        let content_type = if matches!(request.method, Method::Put | Method::Post) {
            match self.request_content_type(&request) {
                Ok(content_type) => content_type,
                Err(response) => return response.into(),
            }
        } else {
            None
        };

        match request.segments.as_slice() {
            [] => self.root(request.method).into(),
            [first, second] if first == ".well-known" && second == "core" => {
                self.discovery(request.method).into()
            }
            [path, rest @ ..] => {
                let Some(thing) = self.registry.get(path) else {
                    return not_found().into();
                };
                match rest {
                    [] => self.thing_description(&thing, &request).into(),
                    [kind, name] => match kind.as_str() {
                        "properties" => self.property(&thing, name, &request, content_type).await,
                        "actions" => self.action(&thing, name, &request, content_type).await.into(),
                        "events" => self.event(&thing, name, &request).await,
                        _ => not_found().into(),
                    },
                    _ => not_found().into(),
                }
            }
        }
    }

    // Resolves the content type of a request payload.
    fn request_content_type(
        &self,
        request: &InboundRequest,
    ) -> std::result::Result<Option<String>, OutboundResponse> {
        let unsupported = || {
            OutboundResponse::diagnostic(
                ResponseCode::UnsupportedContentFormat,
                "Unsupported Media Type",
            )
        };

        match request.content_format {
            Some(code) => match self.serdes.media_type_for(code) {
                Some(media_type) if self.serdes.is_supported(media_type) => {
                    Ok(Some(media_type.to_owned()))
                }
                _ => Err(unsupported()),
            },
            None if request.payload.is_empty() => Ok(None),
            None => {
                warn!("Request without content format, using `{DEFAULT}`");
                Ok(Some(DEFAULT.to_owned()))
            }
        }
    }

    fn root(&self, method: Method) -> OutboundResponse {
        if method != Method::Get {
            return method_not_allowed();
        }

        let paths = self.registry.paths();
        let urls: Vec<String> = self
            .base_urls
            .iter()
            .flat_map(|base| {
                paths
                    .iter()
                    .map(move |path| format!("{base}/{}", percent_encode(path)))
            })
            .collect();

        match serde_json::to_vec(&urls) {
            Ok(payload) => OutboundResponse::content(payload, self.content_format(DEFAULT)),
            Err(e) => internal_error(&Error::from(e)),
        }
    }

    fn discovery(&self, method: Method) -> OutboundResponse {
        if method != Method::Get {
            return method_not_allowed();
        }
        OutboundResponse::content(
            self.registry.discovery(),
            self.content_format(LINK_FORMAT),
        )
    }

    fn thing_description(
        &self,
        thing: &ExposedThing,
        request: &InboundRequest,
    ) -> OutboundResponse {
        if request.method != Method::Get {
            return method_not_allowed();
        }

        let media_type = match request.accept {
            None => TD,
            Some(code) => match self.serdes.media_type_for(code) {
                Some(media_type) if self.serdes.is_supported(media_type) => media_type,
                _ => {
                    return OutboundResponse::diagnostic(
                        ResponseCode::NotAcceptable,
                        format!("Content format {code} is not acceptable"),
                    );
                }
            },
        };

        let payload = thing.description_json().and_then(|description| {
            self.serdes
                .value_to_bytes(&description, None, media_type)
                .map_err(Into::into)
        });
        match payload {
            Ok(payload) => OutboundResponse::content(payload, self.content_format(media_type)),
            Err(e) => internal_error(&e),
        }
    }

    // Builds the interaction options of a request, `None` when the
    // affordance does not exist.
    fn options(
        thing: &ExposedThing,
        kind: InteractionKind,
        name: &str,
        request: &InboundRequest,
        content_type: Option<&str>,
    ) -> Option<InteractionOptions> {
        let path = request.path();
        thing.with_description(|description| {
            let (forms, variables) = match kind {
                InteractionKind::Property => description
                    .properties
                    .get(name)
                    .map(|p| (&p.forms, &p.uri_variables)),
                InteractionKind::Action => description
                    .actions
                    .get(name)
                    .map(|a| (&a.forms, &a.uri_variables)),
                InteractionKind::Event => description
                    .events
                    .get(name)
                    .map(|e| (&e.forms, &e.uri_variables)),
            }?;

            let form_index =
                find_request_matching_form_index(forms, SCHEME, Some(&path), content_type);
            let uri_variables = parse_query_parameters(
                request.query_pairs(),
                &description.uri_variables,
                variables,
            );
            Some(
                InteractionOptions::new()
                    .form_index(form_index)
                    .uri_variables(uri_variables),
            )
        })
    }

    fn accepted_type(&self, request: &InboundRequest) -> Option<&str> {
        request
            .accept
            .and_then(|code| self.serdes.media_type_for(code))
    }

    async fn property(
        &self,
        thing: &Arc<ExposedThing>,
        name: &str,
        request: &InboundRequest,
        content_type: Option<String>,
    ) -> RouteOutcome {
        let request_type = match request.method {
            Method::Put => content_type.as_deref(),
            _ => self.accepted_type(request),
        };
        let Some(options) =
            Self::options(thing, InteractionKind::Property, name, request, request_type)
        else {
            return not_found().into();
        };

        match (request.method, request.observe) {
            (Method::Get, None) => match thing.handle_read_property(name, options).await {
                Ok(content) => self.reply_content(content).await,
                Err(e) => internal_error(&e),
            }
            .into(),
            (Method::Get, Some(0)) => {
                let (listener, notifications) = channel_listener();
                if let Err(e) = thing
                    .handle_observe_property(name, listener.clone(), options.clone())
                    .await
                {
                    return internal_error(&e).into();
                }

                let thing = Arc::clone(thing);
                let name = name.to_owned();
                RouteOutcome::Observe(Observation {
                    notifications,
                    idle_timeout: Some(PROPERTY_OBSERVATION_TIMEOUT),
                    teardown: Box::new(move || {
                        Box::pin(async move {
                            if let Err(e) = thing
                                .handle_unobserve_property(&name, &listener, options)
                                .await
                            {
                                warn!("Cannot unobserve `{name}`: {e}");
                            }
                        })
                    }),
                })
            }
            (Method::Get, Some(_)) => observe_not_implemented().into(),
            (Method::Put, _) => {
                let read_only = thing.with_description(|description| {
                    description
                        .properties
                        .get(name)
                        .is_some_and(|property| property.is_read_only())
                });
                if read_only {
                    return OutboundResponse::diagnostic(
                        ResponseCode::BadRequest,
                        "Property readOnly",
                    )
                    .into();
                }

                let content = Content::new(
                    content_type.as_deref().unwrap_or(DEFAULT),
                    request.payload.clone(),
                );
                match thing.handle_write_property(name, content, options).await {
                    Ok(()) => OutboundResponse::new(ResponseCode::Changed),
                    Err(e) => internal_error(&e),
                }
                .into()
            }
            _ => method_not_allowed().into(),
        }
    }

    async fn action(
        &self,
        thing: &ExposedThing,
        name: &str,
        request: &InboundRequest,
        content_type: Option<String>,
    ) -> OutboundResponse {
        let Some(options) = Self::options(
            thing,
            InteractionKind::Action,
            name,
            request,
            content_type.as_deref(),
        ) else {
            return not_found();
        };

        if request.method != Method::Post {
            return method_not_allowed();
        }

        let input =
            content_type.map(|content_type| Content::new(content_type, request.payload.clone()));
        match thing.handle_invoke_action(name, input, options).await {
            Ok(Some(content)) => self.reply_content(content).await,
            Ok(None) => OutboundResponse::new(ResponseCode::Changed),
            Err(e) => internal_error(&e),
        }
    }

    async fn event(
        &self,
        thing: &Arc<ExposedThing>,
        name: &str,
        request: &InboundRequest,
    ) -> RouteOutcome {
        let Some(options) = Self::options(
            thing,
            InteractionKind::Event,
            name,
            request,
            self.accepted_type(request),
        ) else {
            return not_found().into();
        };

        match (request.method, request.observe) {
            (Method::Get, Some(0)) => {
                let (listener, notifications) = channel_listener();
                if let Err(e) = thing
                    .handle_subscribe_event(name, listener.clone(), options.clone())
                    .await
                {
                    return internal_error(&e).into();
                }

                let thing = Arc::clone(thing);
                let name = name.to_owned();
                RouteOutcome::Observe(Observation {
                    notifications,
                    idle_timeout: None,
                    teardown: Box::new(move || {
                        Box::pin(async move {
                            if let Err(e) = thing
                                .handle_unsubscribe_event(&name, &listener, options)
                                .await
                            {
                                warn!("Cannot unsubscribe from `{name}`: {e}");
                            }
                        })
                    }),
                })
            }
            (Method::Get, Some(_)) => observe_not_implemented().into(),
            (Method::Get, None) => {
                OutboundResponse::diagnostic(ResponseCode::BadRequest, "No Observe Option").into()
            }
            _ => method_not_allowed().into(),
        }
    }

    async fn reply_content(&self, content: Content) -> OutboundResponse {
        let content_format = self.content_format(content.content_type());
        match content.into_bytes().await {
            Ok(payload) => OutboundResponse::content(payload.to_vec(), content_format),
            Err(e) => internal_error(&e),
        }
    }
}
