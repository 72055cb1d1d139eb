use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, Weak};

use futures_util::future::join_all;

use indexmap::IndexMap;

use serde_json::Value;

use tokio::sync::watch;

use tracing::{debug, info};

use wotkit::affordance::Affordance;
use wotkit::codec::{self, ContentSerdes, DEFAULT};
use wotkit::form::{Form, InteractionKind, Operation, form_index_for_operation};
use wotkit::parameters::{InteractionOptions, UriVariables, validate_interaction_options};
use wotkit::schema::DataSchema;
use wotkit::thing::Thing;

use crate::content::{Content, value_to_content};
use crate::error::{Error, ErrorKind, Result};
use crate::handlers::{
    ActionHandlers, EventHandlers, PropertyHandlers, action_handler, read_handler,
    subscription_handler, write_handler,
};
use crate::listeners::{ContentListener, ListenerRegistry};
use crate::servient::ThingHost;

static NEXT_THING_ID: AtomicU64 = AtomicU64::new(1);

/// Encoded property values by property name.
pub type PropertyContents = IndexMap<String, Content>;

fn not_found(kind: InteractionKind, name: &str) -> Error {
    Error::new(ErrorKind::NotFound, format!("No {kind} named `{name}`"))
}

fn no_handler(operation: Operation, name: &str) -> Error {
    Error::new(
        ErrorKind::NoHandler,
        format!("No `{operation}` handler for `{name}`"),
    )
}

fn no_matching_form(operation: Operation, name: &str) -> Error {
    Error::new(
        ErrorKind::NoMatchingForm,
        format!("No form of `{name}` serves `{operation}`"),
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_json(form: &Form) -> bool {
    codec::media_type(form.content_type_or_default()) == DEFAULT
}

// Form used by the multiple-property operations: `Some(None)` when the
// property has no forms, `None` when none of its forms is `JSON`.
fn json_form_index(name: &str, forms: &[Form]) -> Option<Option<usize>> {
    if forms.is_empty() {
        return Some(None);
    }
    let index = forms.iter().position(is_json);
    if index.is_none() {
        debug!("Skipping property `{name}` without JSON forms");
    }
    index.map(Some)
}

// Data of an affordance copied out of the document, so that no lock is
// held while handlers run.
struct Snapshot {
    schema: Option<DataSchema>,
    forms: Vec<Form>,
    thing_variables: UriVariables,
    variables: UriVariables,
}

impl Snapshot {
    fn content_type(&self, form_index: Option<usize>) -> &str {
        self.forms
            .get(form_index.unwrap_or_default())
            .map_or(DEFAULT, Form::content_type_or_default)
    }

    fn validate(&self, options: &InteractionOptions) -> Result<()> {
        validate_interaction_options(&self.thing_variables, &self.variables, options)
            .map_err(Into::into)
    }
}

/// A Thing exposed by the runtime.
///
/// It holds the Thing document, the handlers registered for its
/// affordances and the listeners of its observed properties and
/// subscribed events. Protocol bindings translate their requests into the
/// `handle_*` methods.
pub struct ExposedThing {
    // Thing document.
    description: RwLock<Thing>,
    // Property handlers.
    property_handlers: Mutex<IndexMap<String, PropertyHandlers>>,
    // Action handlers.
    action_handlers: Mutex<IndexMap<String, ActionHandlers>>,
    // Event handlers.
    event_handlers: Mutex<IndexMap<String, EventHandlers>>,
    // Property observers.
    property_listeners: ListenerRegistry,
    // Event subscribers.
    event_listeners: ListenerRegistry,
    // Content negotiator.
    serdes: Arc<ContentSerdes>,
    // Runtime hosting the thing.
    host: Option<Weak<dyn ThingHost>>,
    // Thing document observers.
    description_sender: watch::Sender<Option<Value>>,
    // Whether the thing has been destroyed.
    destroyed: AtomicBool,
}

impl std::fmt::Debug for ExposedThing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let description = self.read_description();
        f.debug_struct("ExposedThing")
            .field("id", &description.id)
            .field("title", &description.title)
            .field("property_listeners", &self.property_listeners)
            .field("event_listeners", &self.event_listeners)
            .field("destroyed", &self.destroyed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl ExposedThing {
    /// Creates an [`ExposedThing`] using the default content negotiator.
    ///
    /// A Thing without an identifier receives a generated one.
    #[must_use]
    pub fn new(thing: Thing) -> Self {
        Self::with_serdes(thing, Arc::new(ContentSerdes::default()))
    }

    /// Creates an [`ExposedThing`] using the given content negotiator.
    #[must_use]
    pub fn with_serdes(mut thing: Thing, serdes: Arc<ContentSerdes>) -> Self {
        if thing.id.is_empty() {
            thing.id = format!(
                "urn:wotkit:thing:{}",
                NEXT_THING_ID.fetch_add(1, Ordering::Relaxed)
            );
        }

        let (description_sender, _) = watch::channel(None);
        Self {
            description: RwLock::new(thing),
            property_handlers: Mutex::new(IndexMap::new()),
            action_handlers: Mutex::new(IndexMap::new()),
            event_handlers: Mutex::new(IndexMap::new()),
            property_listeners: ListenerRegistry::new(),
            event_listeners: ListenerRegistry::new(),
            serdes,
            host: None,
            description_sender,
            destroyed: AtomicBool::new(false),
        }
    }

    pub(crate) fn hosted(
        thing: Thing,
        serdes: Arc<ContentSerdes>,
        host: Weak<dyn ThingHost>,
    ) -> Self {
        let mut exposed = Self::with_serdes(thing, serdes);
        exposed.host = Some(host);
        exposed
    }

    fn read_description(&self) -> RwLockReadGuard<'_, Thing> {
        self.description
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the Thing identifier.
    #[must_use]
    pub fn id(&self) -> String {
        self.read_description().id.clone()
    }

    /// Returns the Thing title.
    #[must_use]
    pub fn title(&self) -> String {
        self.read_description().title.clone()
    }

    /// Returns a copy of the current Thing document.
    #[must_use]
    pub fn thing_description(&self) -> Thing {
        self.read_description().clone()
    }

    /// Runs a closure on the current Thing document.
    pub fn with_description<R>(&self, f: impl FnOnce(&Thing) -> R) -> R {
        f(&self.read_description())
    }

    /// Renders the current Thing document as `JSON`.
    ///
    /// # Errors
    ///
    /// Fails when the document cannot be serialized.
    pub fn description_json(&self) -> Result<Value> {
        self.read_description().to_json().map_err(Into::into)
    }

    /// Returns the content negotiator.
    #[must_use]
    pub fn content_serdes(&self) -> &ContentSerdes {
        &self.serdes
    }

    /// Returns a receiver of the Thing document.
    ///
    /// The document is published on every exposure, and [`None`] is
    /// published when the Thing is destroyed.
    #[must_use]
    pub fn observe_description(&self) -> watch::Receiver<Option<Value>> {
        self.description_sender.subscribe()
    }

    /// Checks whether the Thing has been destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(Error::new(
                ErrorKind::NotFound,
                format!("Thing `{}` has been destroyed", self.title()),
            ))
        } else {
            Ok(())
        }
    }

    /// Appends a [`Form`] to an affordance.
    ///
    /// A form identical to an existing one is not added twice. Returns the
    /// form index.
    ///
    /// # Errors
    ///
    /// Fails when the affordance does not exist.
    pub fn add_form(&self, kind: InteractionKind, name: &str, form: Form) -> Result<usize> {
        let mut description = self
            .description
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(index) = description
            .forms_of(kind, name)
            .and_then(|forms| forms.iter().position(|f| *f == form))
        {
            return Ok(index);
        }

        description
            .add_form(kind, name, form)
            .ok_or_else(|| not_found(kind, name))
    }

    fn snapshot(&self, kind: InteractionKind, name: &str) -> Result<Snapshot> {
        fn copy<A: Affordance>(
            affordance: &A,
            schema: Option<DataSchema>,
            thing_variables: &UriVariables,
        ) -> Snapshot {
            Snapshot {
                schema,
                forms: affordance.forms().to_vec(),
                thing_variables: thing_variables.clone(),
                variables: affordance.uri_variables().clone(),
            }
        }

        self.ensure_alive()?;
        let description = self.read_description();
        let thing_variables = &description.uri_variables;
        let snapshot = match kind {
            InteractionKind::Property => description
                .properties
                .get(name)
                .map(|p| copy(p, Some(p.schema.clone()), thing_variables)),
            InteractionKind::Action => description
                .actions
                .get(name)
                .map(|a| copy(a, a.input.clone(), thing_variables)),
            InteractionKind::Event => description
                .events
                .get(name)
                .map(|e| copy(e, e.data.clone(), thing_variables)),
        };
        snapshot.ok_or_else(|| not_found(kind, name))
    }

    /// Sets the read handler of a property.
    ///
    /// # Errors
    ///
    /// Fails when the property does not exist or is write-only.
    pub fn set_property_read_handler<F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(InteractionOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.check_property(name, |property| {
            if property.is_write_only() {
                return Err(Error::new(
                    ErrorKind::WriteOnly,
                    format!("Property `{name}` is write-only"),
                ));
            }
            Ok(())
        })?;
        lock(&self.property_handlers)
            .entry(name.into())
            .or_default()
            .read = Some(read_handler(handler));
        Ok(())
    }

    /// Sets the write handler of a property.
    ///
    /// # Errors
    ///
    /// Fails when the property does not exist or is read-only.
    pub fn set_property_write_handler<F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Value, InteractionOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.check_property(name, |property| {
            if property.is_read_only() {
                return Err(Error::new(
                    ErrorKind::ReadOnly,
                    format!("Property `{name}` is read-only"),
                ));
            }
            Ok(())
        })?;
        lock(&self.property_handlers)
            .entry(name.into())
            .or_default()
            .write = Some(write_handler(handler));
        Ok(())
    }

    /// Sets the handler called when an observation of a property starts.
    ///
    /// # Errors
    ///
    /// Fails when the property does not exist or is not observable.
    pub fn set_property_observe_handler<F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(InteractionOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.check_observable(name)?;
        lock(&self.property_handlers)
            .entry(name.into())
            .or_default()
            .observe = Some(subscription_handler(handler));
        Ok(())
    }

    /// Sets the handler called when an observation of a property ends.
    ///
    /// # Errors
    ///
    /// Fails when the property does not exist or is not observable.
    pub fn set_property_unobserve_handler<F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(InteractionOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.check_observable(name)?;
        lock(&self.property_handlers)
            .entry(name.into())
            .or_default()
            .unobserve = Some(subscription_handler(handler));
        Ok(())
    }

    /// Sets the handler of an action.
    ///
    /// # Errors
    ///
    /// Fails when the action does not exist.
    pub fn set_action_handler<F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Value, InteractionOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        self.check_exists(InteractionKind::Action, name)?;
        lock(&self.action_handlers)
            .entry(name.into())
            .or_default()
            .invoke = Some(action_handler(handler));
        Ok(())
    }

    /// Sets the handler called when a subscription to an event starts.
    ///
    /// # Errors
    ///
    /// Fails when the event does not exist.
    pub fn set_event_subscribe_handler<F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(InteractionOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.check_exists(InteractionKind::Event, name)?;
        lock(&self.event_handlers)
            .entry(name.into())
            .or_default()
            .subscribe = Some(subscription_handler(handler));
        Ok(())
    }

    /// Sets the handler called when a subscription to an event ends.
    ///
    /// # Errors
    ///
    /// Fails when the event does not exist.
    pub fn set_event_unsubscribe_handler<F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(InteractionOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.check_exists(InteractionKind::Event, name)?;
        lock(&self.event_handlers)
            .entry(name.into())
            .or_default()
            .unsubscribe = Some(subscription_handler(handler));
        Ok(())
    }

    fn check_exists(&self, kind: InteractionKind, name: &str) -> Result<()> {
        self.ensure_alive()?;
        let description = self.read_description();
        let exists = match kind {
            InteractionKind::Property => description.properties.contains(name),
            InteractionKind::Action => description.actions.contains(name),
            InteractionKind::Event => description.events.contains(name),
        };
        if exists {
            Ok(())
        } else {
            Err(not_found(kind, name))
        }
    }

    fn check_property(
        &self,
        name: &str,
        check: impl FnOnce(&wotkit::affordance::PropertyAffordance) -> Result<()>,
    ) -> Result<()> {
        self.ensure_alive()?;
        let description = self.read_description();
        let property = description
            .properties
            .get(name)
            .ok_or_else(|| not_found(InteractionKind::Property, name))?;
        check(property)
    }

    fn check_observable(&self, name: &str) -> Result<()> {
        self.check_property(name, |property| {
            if property.is_observable() {
                Ok(())
            } else {
                Err(Error::new(
                    ErrorKind::NotObservable,
                    format!("Property `{name}` is not observable"),
                ))
            }
        })
    }

    fn property_handlers(&self, name: &str) -> PropertyHandlers {
        lock(&self.property_handlers)
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn event_handlers(&self, name: &str) -> EventHandlers {
        lock(&self.event_handlers)
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Reads a property value.
    ///
    /// The value is encoded with the content type of the form at
    /// `options.form_index`, the default one when the property has no
    /// forms.
    ///
    /// # Errors
    ///
    /// Fails when the property does not exist, has no read handler, when
    /// the options are invalid or when the handler fails.
    pub async fn handle_read_property(
        &self,
        name: &str,
        options: InteractionOptions,
    ) -> Result<Content> {
        let snapshot = self.snapshot(InteractionKind::Property, name)?;
        let handler = self
            .property_handlers(name)
            .read
            .ok_or_else(|| no_handler(Operation::ReadProperty, name))?;
        snapshot.validate(&options)?;

        let content_type = snapshot.content_type(options.form_index).to_owned();
        let value = handler(options).await?;
        value_to_content(&self.serdes, &value, snapshot.schema.as_ref(), &content_type)
    }

    /// Writes a property value.
    ///
    /// # Errors
    ///
    /// Fails when the property does not exist, is read-only, has no write
    /// handler, when the options are invalid, when the content cannot be
    /// decoded or when the handler fails.
    pub async fn handle_write_property(
        &self,
        name: &str,
        content: Content,
        options: InteractionOptions,
    ) -> Result<()> {
        let snapshot = self.snapshot(InteractionKind::Property, name)?;
        if snapshot
            .schema
            .as_ref()
            .is_some_and(|schema| schema.read_only)
        {
            return Err(Error::new(
                ErrorKind::ReadOnly,
                format!("Property `{name}` is read-only"),
            ));
        }
        let handler = self
            .property_handlers(name)
            .write
            .ok_or_else(|| no_handler(Operation::WriteProperty, name))?;
        snapshot.validate(&options)?;

        let value = content
            .into_value(&self.serdes, snapshot.schema.as_ref())
            .await?;
        handler(value, options).await
    }

    /// Reads all property values.
    ///
    /// # Errors
    ///
    /// Fails as a whole when any read fails.
    pub async fn handle_read_all_properties(
        &self,
        options: InteractionOptions,
    ) -> Result<PropertyContents> {
        self.ensure_alive()?;
        let names: Vec<String> = self.read_description().properties.names().cloned().collect();
        self.handle_read_multiple_properties(&names, options).await
    }

    /// Reads the values of the given properties concurrently.
    ///
    /// Properties without a `JSON` form are omitted from the result. A
    /// property without forms is read with the default content type.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::NotFound`] when a property does not exist,
    /// and with a single [`ErrorKind::HandlerFailure`] naming the requested
    /// properties when any read fails.
    pub async fn handle_read_multiple_properties<S: AsRef<str>>(
        &self,
        names: &[S],
        options: InteractionOptions,
    ) -> Result<PropertyContents> {
        self.ensure_alive()?;

        let mut selected = Vec::with_capacity(names.len());
        {
            let description = self.read_description();
            for name in names {
                let name = name.as_ref();
                let property = description
                    .properties
                    .get(name)
                    .ok_or_else(|| not_found(InteractionKind::Property, name))?;

                if let Some(form_index) = json_form_index(name, &property.forms) {
                    selected.push((name.to_owned(), form_index));
                }
            }
        }

        let reads = selected.iter().map(|(name, form_index)| {
            let mut options = options.clone();
            options.form_index = *form_index;
            self.handle_read_property(name, options)
        });
        let results = join_all(reads).await;

        let mut contents = PropertyContents::with_capacity(results.len());
        for ((name, _), result) in selected.into_iter().zip(results) {
            match result {
                Ok(content) => {
                    contents.insert(name, content);
                }
                Err(e) => {
                    debug!("Reading `{name}` failed: {e}");
                    return Err(multiple_failure("reading", names));
                }
            }
        }
        Ok(contents)
    }

    /// Writes the values of the given properties concurrently.
    ///
    /// Properties whose forms are all non-`JSON` are skipped.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::NotFound`] when a property does not exist,
    /// and with a single [`ErrorKind::HandlerFailure`] naming the given
    /// properties when any write fails.
    pub async fn handle_write_multiple_properties(
        &self,
        values: PropertyContents,
        options: InteractionOptions,
    ) -> Result<()> {
        self.ensure_alive()?;

        let names: Vec<String> = values.keys().cloned().collect();
        let mut selected = Vec::with_capacity(values.len());
        {
            let description = self.read_description();
            for (name, content) in values {
                let property = description
                    .properties
                    .get(&name)
                    .ok_or_else(|| not_found(InteractionKind::Property, &name))?;

                if let Some(form_index) = json_form_index(&name, &property.forms) {
                    selected.push((name, content, form_index));
                }
            }
        }

        let options = &options;
        let writes = selected
            .into_iter()
            .map(|(name, content, form_index)| async move {
                let mut options = options.clone();
                options.form_index = form_index;
                let result = self.handle_write_property(&name, content, options).await;
                (name, result)
            });

        let mut failed = false;
        for (name, result) in join_all(writes).await {
            if let Err(e) = result {
                debug!("Writing `{name}` failed: {e}");
                failed = true;
            }
        }

        if failed {
            Err(multiple_failure("writing", &names))
        } else {
            Ok(())
        }
    }

    /// Invokes an action.
    ///
    /// The returned value, if any, is encoded with the content type of the
    /// form at `options.form_index`.
    ///
    /// # Errors
    ///
    /// Fails when the action does not exist, has no handler, when the
    /// options are invalid, when the input cannot be decoded or when the
    /// handler fails.
    pub async fn handle_invoke_action(
        &self,
        name: &str,
        input: Option<Content>,
        options: InteractionOptions,
    ) -> Result<Option<Content>> {
        let snapshot = self.snapshot(InteractionKind::Action, name)?;
        let handler = lock(&self.action_handlers)
            .get(name)
            .and_then(|handlers| handlers.invoke.clone())
            .ok_or_else(|| no_handler(Operation::InvokeAction, name))?;
        snapshot.validate(&options)?;

        let input = match input {
            Some(content) => {
                content
                    .into_value(&self.serdes, snapshot.schema.as_ref())
                    .await?
            }
            None => Value::Null,
        };

        let content_type = snapshot.content_type(options.form_index).to_owned();
        let output = self.read_description().actions.get(name).and_then(|a| a.output.clone());

        match handler(input, options).await? {
            Some(value) => {
                value_to_content(&self.serdes, &value, output.as_ref(), &content_type).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Starts observing a property.
    ///
    /// The listener is registered through the form serving
    /// `observeproperty`, preferring `options.form_index`. The observe
    /// handler, if any, runs after registration, and its failure removes
    /// the registration again.
    ///
    /// # Errors
    ///
    /// Fails when the property does not exist, when no form serves the
    /// operation, when the options are invalid or when the observe handler
    /// fails.
    pub async fn handle_observe_property(
        &self,
        name: &str,
        listener: ContentListener,
        options: InteractionOptions,
    ) -> Result<()> {
        let handler = self.property_handlers(name).observe;
        self.subscribe(
            InteractionKind::Property,
            Operation::ObserveProperty,
            name,
            listener,
            options,
            handler,
        )
        .await
    }

    /// Stops observing a property.
    ///
    /// The registration is removed even when the unobserve handler is
    /// missing or fails.
    ///
    /// # Errors
    ///
    /// Fails when the property does not exist, when no form serves the
    /// operation or when the unobserve handler fails.
    pub async fn handle_unobserve_property(
        &self,
        name: &str,
        listener: &ContentListener,
        options: InteractionOptions,
    ) -> Result<()> {
        let handler = self.property_handlers(name).unobserve;
        self.unsubscribe(
            InteractionKind::Property,
            Operation::UnobserveProperty,
            name,
            listener,
            options,
            handler,
        )
        .await
    }

    /// Subscribes to an event.
    ///
    /// # Errors
    ///
    /// Fails when the event does not exist, when no form serves the
    /// operation, when the options are invalid or when the subscribe
    /// handler fails.
    pub async fn handle_subscribe_event(
        &self,
        name: &str,
        listener: ContentListener,
        options: InteractionOptions,
    ) -> Result<()> {
        let handler = self.event_handlers(name).subscribe;
        self.subscribe(
            InteractionKind::Event,
            Operation::SubscribeEvent,
            name,
            listener,
            options,
            handler,
        )
        .await
    }

    /// Unsubscribes from an event.
    ///
    /// # Errors
    ///
    /// Fails when the event does not exist, when no form serves the
    /// operation or when the unsubscribe handler fails.
    pub async fn handle_unsubscribe_event(
        &self,
        name: &str,
        listener: &ContentListener,
        options: InteractionOptions,
    ) -> Result<()> {
        let handler = self.event_handlers(name).unsubscribe;
        self.unsubscribe(
            InteractionKind::Event,
            Operation::UnsubscribeEvent,
            name,
            listener,
            options,
            handler,
        )
        .await
    }

    fn listeners(&self, kind: InteractionKind) -> &ListenerRegistry {
        match kind {
            InteractionKind::Property | InteractionKind::Action => &self.property_listeners,
            InteractionKind::Event => &self.event_listeners,
        }
    }

    async fn subscribe(
        &self,
        kind: InteractionKind,
        operation: Operation,
        name: &str,
        listener: ContentListener,
        options: InteractionOptions,
        handler: Option<crate::handlers::SubscriptionHandler>,
    ) -> Result<()> {
        let snapshot = self.snapshot(kind, name)?;
        let form_index =
            form_index_for_operation(&snapshot.forms, kind, operation, options.form_index)
                .ok_or_else(|| no_matching_form(operation, name))?;
        snapshot.validate(&options)?;

        let registry = self.listeners(kind);
        registry.register(name, form_index, listener.clone());
        debug!("Registered listener on {kind} `{name}` through form {form_index}");

        if let Some(handler) = handler
            && let Err(e) = handler(options).await
        {
            registry.unregister(name, form_index, &listener);
            return Err(e);
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        kind: InteractionKind,
        operation: Operation,
        name: &str,
        listener: &ContentListener,
        options: InteractionOptions,
        handler: Option<crate::handlers::SubscriptionHandler>,
    ) -> Result<()> {
        let snapshot = self.snapshot(kind, name)?;
        let form_index =
            form_index_for_operation(&snapshot.forms, kind, operation, options.form_index)
                .ok_or_else(|| no_matching_form(operation, name))?;

        if self.listeners(kind).unregister(name, form_index, listener) {
            debug!("Unregistered listener from {kind} `{name}`");
        }

        match handler {
            Some(handler) => handler(options).await,
            None => Ok(()),
        }
    }

    /// Notifies an event to all its subscribers.
    ///
    /// Returns the number of deliveries.
    ///
    /// # Errors
    ///
    /// Fails when the event does not exist.
    pub fn emit_event(&self, name: &str, data: &Value) -> Result<usize> {
        let snapshot = self.snapshot(InteractionKind::Event, name)?;
        Ok(self.event_listeners.notify(
            name,
            data,
            snapshot.schema.as_ref(),
            &snapshot.forms,
            &self.serdes,
        ))
    }

    /// Reads a property again and notifies its value to all observers.
    ///
    /// Returns the number of deliveries.
    ///
    /// # Errors
    ///
    /// Fails when the property does not exist, has no read handler or when
    /// the read handler fails.
    pub async fn emit_property_change(&self, name: &str) -> Result<usize> {
        let snapshot = self.snapshot(InteractionKind::Property, name)?;
        let handler = self
            .property_handlers(name)
            .read
            .ok_or_else(|| no_handler(Operation::ReadProperty, name))?;

        let value = handler(InteractionOptions::new()).await?;
        Ok(self.property_listeners.notify(
            name,
            &value,
            snapshot.schema.as_ref(),
            &snapshot.forms,
            &self.serdes,
        ))
    }

    fn host(&self) -> Option<Arc<dyn ThingHost>> {
        self.host.as_ref().and_then(Weak::upgrade)
    }

    /// Exposes the Thing through its hosting runtime, then publishes the
    /// Thing document to its observers.
    ///
    /// # Errors
    ///
    /// Fails when the Thing has been destroyed or the runtime fails to
    /// expose it.
    pub async fn expose(self: &Arc<Self>) -> Result<()> {
        self.ensure_alive()?;
        if let Some(host) = self.host() {
            host.expose(Arc::clone(self)).await?;
        }

        let description = self.description_json()?;
        self.description_sender.send_replace(Some(description));
        info!("Exposed thing `{}`", self.title());
        Ok(())
    }

    /// Destroys the Thing.
    ///
    /// The Thing is removed from its hosting runtime, all handlers and
    /// listeners are dropped and [`None`] is published to the Thing
    /// document observers. Any later interaction fails with
    /// [`ErrorKind::NotFound`].
    ///
    /// # Errors
    ///
    /// Fails when the runtime fails to remove the Thing.
    pub async fn destroy(self: &Arc<Self>) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let host_result = match self.host() {
            Some(host) => host.destroy(Arc::clone(self)).await.map(|_| ()),
            None => Ok(()),
        };

        lock(&self.property_handlers).clear();
        lock(&self.action_handlers).clear();
        lock(&self.event_handlers).clear();
        self.property_listeners.unregister_all();
        self.event_listeners.unregister_all();
        self.description_sender.send_replace(None);

        info!("Destroyed thing `{}`", self.title());
        host_result
    }
}

fn multiple_failure<S: AsRef<str>>(operation: &str, names: &[S]) -> Error {
    let names = names
        .iter()
        .map(|name| format!("`{}`", name.as_ref()))
        .collect::<Vec<_>>()
        .join(", ");
    Error::handler(format!("Error while {operation} properties [{names}]"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use serde_json::{Value, json};

    use wotkit::affordance::{ActionAffordance, EventAffordance, PropertyAffordance};
    use wotkit::codec::TEXT;
    use wotkit::form::{Form, InteractionKind, Operation};
    use wotkit::parameters::InteractionOptions;
    use wotkit::schema::DataSchema;
    use wotkit::thing::Thing;

    use crate::content::Content;
    use crate::error::{Error, ErrorKind};
    use crate::listeners::ContentListener;

    use super::{ExposedThing, PropertyContents};

    fn lamp() -> Thing {
        Thing::new("Lamp 1")
            .property(
                "on",
                PropertyAffordance::new(DataSchema::boolean()).observable(),
            )
            .property(
                "power",
                PropertyAffordance::new(DataSchema::number()).read_only(),
            )
            .property(
                "secret",
                PropertyAffordance::new(DataSchema::string()).write_only(),
            )
            .property(
                "brightness",
                PropertyAffordance::new(DataSchema::integer())
                    .uri_variable("step", DataSchema::integer()),
            )
            .action(
                "fade",
                ActionAffordance::new()
                    .input(DataSchema::integer())
                    .output(DataSchema::string()),
            )
            .action("toggle", ActionAffordance::new())
            .event("overheat", EventAffordance::new().data(DataSchema::number()))
    }

    fn add_forms(thing: &ExposedThing) {
        let base = "coap://127.0.0.1:5683/lamp-1";
        for media_type in ["application/json", TEXT] {
            thing
                .add_form(
                    InteractionKind::Property,
                    "on",
                    Form::new(format!("{base}/properties/on"))
                        .content_type(media_type)
                        .operations([
                            Operation::ReadProperty,
                            Operation::WriteProperty,
                            Operation::ObserveProperty,
                            Operation::UnobserveProperty,
                        ]),
                )
                .unwrap();
            thing
                .add_form(
                    InteractionKind::Event,
                    "overheat",
                    Form::new(format!("{base}/events/overheat"))
                        .content_type(media_type)
                        .operations([Operation::SubscribeEvent, Operation::UnsubscribeEvent]),
                )
                .unwrap();
        }
    }

    fn state_thing() -> (Arc<ExposedThing>, Arc<Mutex<Value>>) {
        let thing = Arc::new(ExposedThing::new(lamp()));
        let state = Arc::new(Mutex::new(json!(false)));

        let read_state = state.clone();
        thing
            .set_property_read_handler("on", move |_| {
                let value = read_state.lock().unwrap().clone();
                async move { Ok(value) }
            })
            .unwrap();

        let write_state = state.clone();
        thing
            .set_property_write_handler("on", move |value, _| {
                *write_state.lock().unwrap() = value;
                async { Ok(()) }
            })
            .unwrap();

        (thing, state)
    }

    fn channel_listener() -> (ContentListener, Arc<Mutex<Vec<Content>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        (
            ContentListener::new(move |content| {
                sink.lock().unwrap().push(content);
                Ok(())
            }),
            received,
        )
    }

    async fn decode(thing: &ExposedThing, content: Content) -> Value {
        content
            .into_value(thing.content_serdes(), None)
            .await
            .unwrap()
    }

    #[test]
    fn forbidden_handlers() {
        let thing = ExposedThing::new(lamp());

        let error = thing
            .set_property_write_handler("power", |_, _| async { Ok(()) })
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ReadOnly);

        let error = thing
            .set_property_read_handler("secret", |_| async { Ok(json!("")) })
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::WriteOnly);

        let error = thing
            .set_property_observe_handler("power", |_| async { Ok(()) })
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotObservable);

        let error = thing
            .set_property_unobserve_handler("brightness", |_| async { Ok(()) })
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotObservable);

        let error = thing
            .set_action_handler("missing", |_, _| async { Ok(None) })
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);

        // No slot has been filled by the failed registrations.
        assert!(thing.property_handlers.lock().unwrap().is_empty());
        assert!(thing.action_handlers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_then_read() {
        let (thing, state) = state_thing();

        thing
            .handle_write_property(
                "on",
                Content::new("application/json", "true"),
                InteractionOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(*state.lock().unwrap(), json!(true));

        let content = thing
            .handle_read_property("on", InteractionOptions::new())
            .await
            .unwrap();
        assert_eq!(content.content_type(), "application/json");
        assert_eq!(decode(&thing, content).await, json!(true));
    }

    #[tokio::test]
    async fn read_with_form_content_type() {
        let (thing, _) = state_thing();
        add_forms(&thing);

        let content = thing
            .handle_read_property("on", InteractionOptions::new().form_index(1))
            .await
            .unwrap();
        assert_eq!(content.content_type(), TEXT);
        assert_eq!(&content.into_bytes().await.unwrap()[..], b"false");
    }

    #[tokio::test]
    async fn read_failures() {
        let thing = ExposedThing::new(lamp());

        let error = thing
            .handle_read_property("missing", InteractionOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);

        let error = thing
            .handle_read_property("power", InteractionOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NoHandler);

        thing
            .set_property_read_handler("brightness", |options| async move {
                Ok(options
                    .uri_variables
                    .get("step")
                    .cloned()
                    .unwrap_or(json!(0)))
            })
            .unwrap();

        let content = thing
            .handle_read_property(
                "brightness",
                InteractionOptions::new().uri_variable("step", 10),
            )
            .await
            .unwrap();
        assert_eq!(decode(&thing, content).await, json!(10));

        let error = thing
            .handle_read_property(
                "brightness",
                InteractionOptions::new().uri_variable("step", "ten"),
            )
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidOptions);

        thing
            .set_property_read_handler("power", |_| async {
                Err(Error::handler("sensor unavailable"))
            })
            .unwrap();
        let error = thing
            .handle_read_property("power", InteractionOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::HandlerFailure);
    }

    #[tokio::test]
    async fn write_failures() {
        let thing = ExposedThing::new(lamp());

        let error = thing
            .handle_write_property(
                "power",
                Content::new("application/json", "3"),
                InteractionOptions::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ReadOnly);

        let error = thing
            .handle_write_property(
                "on",
                Content::new("application/json", "true"),
                InteractionOptions::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NoHandler);

        thing
            .set_property_write_handler("on", |_, _| async { Ok(()) })
            .unwrap();
        let error = thing
            .handle_write_property(
                "on",
                Content::new("application/cbor", vec![0xf5]),
                InteractionOptions::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnsupportedContentType);
    }

    #[tokio::test]
    async fn read_multiple_properties() {
        let (thing, _) = state_thing();
        thing
            .set_property_read_handler("power", |_| async { Ok(json!(4.5)) })
            .unwrap();

        let contents = thing
            .handle_read_multiple_properties(&["power", "on"], InteractionOptions::new())
            .await
            .unwrap();
        let names: Vec<_> = contents.keys().cloned().collect();
        assert_eq!(names, ["power", "on"]);

        let mut values = Vec::new();
        for (_, content) in contents {
            values.push(decode(&thing, content).await);
        }
        assert_eq!(values, [json!(4.5), json!(false)]);

        let error = thing
            .handle_read_multiple_properties(&["on", "missing"], InteractionOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn read_multiple_skips_non_json_properties() {
        let (thing, _) = state_thing();
        thing
            .set_property_read_handler("power", |_| async { Ok(json!(4.5)) })
            .unwrap();
        thing
            .add_form(
                InteractionKind::Property,
                "power",
                Form::new("coap://127.0.0.1/lamp-1/properties/power").content_type(TEXT),
            )
            .unwrap();

        let contents = thing
            .handle_read_multiple_properties(&["on", "power"], InteractionOptions::new())
            .await
            .unwrap();
        assert!(contents.contains_key("on"));
        assert!(!contents.contains_key("power"));
    }

    #[tokio::test]
    async fn read_all_properties_is_all_or_nothing() {
        let (thing, _) = state_thing();
        let reads = Arc::new(AtomicUsize::new(0));

        let counter = reads.clone();
        thing
            .set_property_read_handler("power", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(json!(4.5)) }
            })
            .unwrap();
        thing
            .set_property_read_handler("brightness", |_| async {
                Err(Error::handler("dimmer fault"))
            })
            .unwrap();

        // `secret` has no read handler and `brightness` fails.
        let error = thing
            .handle_read_all_properties(InteractionOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::HandlerFailure);
        assert_eq!(
            error.description(),
            "Error while reading properties [`on`, `power`, `secret`, `brightness`]"
        );
        // Sibling reads still ran to completion.
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn write_multiple_properties() {
        let (thing, state) = state_thing();

        let mut values = PropertyContents::new();
        values.insert("on".into(), Content::new("application/json", "true"));
        thing
            .handle_write_multiple_properties(values, InteractionOptions::new())
            .await
            .unwrap();
        assert_eq!(*state.lock().unwrap(), json!(true));

        let mut values = PropertyContents::new();
        values.insert("on".into(), Content::new("application/json", "false"));
        values.insert("power".into(), Content::new("application/json", "1"));
        let error = thing
            .handle_write_multiple_properties(values, InteractionOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::HandlerFailure);
        assert_eq!(
            error.description(),
            "Error while writing properties [`on`, `power`]"
        );
    }

    #[tokio::test]
    async fn write_multiple_skips_non_json_properties() {
        let (thing, state) = state_thing();
        let writes = Arc::new(AtomicUsize::new(0));

        let counter = writes.clone();
        thing
            .set_property_write_handler("brightness", move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .unwrap();
        thing
            .add_form(
                InteractionKind::Property,
                "brightness",
                Form::new("coap://127.0.0.1/lamp-1/properties/brightness").content_type(TEXT),
            )
            .unwrap();

        let mut values = PropertyContents::new();
        values.insert("on".into(), Content::new("application/json", "true"));
        values.insert("brightness".into(), Content::new("application/json", "7"));
        thing
            .handle_write_multiple_properties(values, InteractionOptions::new())
            .await
            .unwrap();

        assert_eq!(*state.lock().unwrap(), json!(true));
        assert_eq!(writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invoke_actions() {
        let thing = ExposedThing::new(lamp());

        thing
            .set_action_handler("toggle", |_, _| async { Ok(None) })
            .unwrap();
        thing
            .set_action_handler("fade", |input, _| async move {
                Ok(Some(json!(format!("fading in {input} ms"))))
            })
            .unwrap();

        assert!(
            thing
                .handle_invoke_action("toggle", None, InteractionOptions::new())
                .await
                .unwrap()
                .is_none()
        );

        let output = thing
            .handle_invoke_action(
                "fade",
                Some(Content::new("application/json", "300")),
                InteractionOptions::new(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decode(&thing, output).await, json!("fading in 300 ms"));

        let error = thing
            .handle_invoke_action("blink", None, InteractionOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);

        let thing = ExposedThing::new(lamp());
        let error = thing
            .handle_invoke_action("toggle", None, InteractionOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NoHandler);
    }

    #[tokio::test]
    async fn observe_property() {
        let (thing, _) = state_thing();
        let (listener, received) = channel_listener();

        // No forms yet.
        let error = thing
            .handle_observe_property("on", listener.clone(), InteractionOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NoMatchingForm);

        add_forms(&thing);
        thing
            .handle_observe_property(
                "on",
                listener.clone(),
                InteractionOptions::new().form_index(1),
            )
            .await
            .unwrap();

        thing
            .handle_write_property(
                "on",
                Content::new("application/json", "true"),
                InteractionOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(thing.emit_property_change("on").await.unwrap(), 1);

        let content = received.lock().unwrap().remove(0);
        assert_eq!(content.content_type(), TEXT);
        assert_eq!(&content.into_bytes().await.unwrap()[..], b"true");

        thing
            .handle_unobserve_property("on", &listener, InteractionOptions::new().form_index(1))
            .await
            .unwrap();
        assert_eq!(thing.emit_property_change("on").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failing_observe_handler_removes_registration() {
        let (thing, _) = state_thing();
        add_forms(&thing);
        thing
            .set_property_observe_handler("on", |_| async {
                Err(Error::handler("observation refused"))
            })
            .unwrap();

        let (listener, _) = channel_listener();
        let error = thing
            .handle_observe_property("on", listener, InteractionOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::HandlerFailure);
        assert_eq!(thing.emit_property_change("on").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unobserve_runs_even_when_handler_fails() {
        let (thing, _) = state_thing();
        add_forms(&thing);
        thing
            .set_property_unobserve_handler("on", |_| async { Err(Error::handler("busy")) })
            .unwrap();

        let (listener, _) = channel_listener();
        thing
            .handle_observe_property("on", listener.clone(), InteractionOptions::new())
            .await
            .unwrap();

        let error = thing
            .handle_unobserve_property("on", &listener, InteractionOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::HandlerFailure);
        assert_eq!(thing.emit_property_change("on").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn subscribe_event() {
        let thing = ExposedThing::new(lamp());
        add_forms(&thing);

        let subscriptions = Arc::new(AtomicUsize::new(0));
        let counter = subscriptions.clone();
        thing
            .set_event_subscribe_handler("overheat", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .unwrap();

        let (json_listener, json_received) = channel_listener();
        let (text_listener, text_received) = channel_listener();
        thing
            .handle_subscribe_event("overheat", json_listener.clone(), InteractionOptions::new())
            .await
            .unwrap();
        thing
            .handle_subscribe_event(
                "overheat",
                text_listener,
                InteractionOptions::new().form_index(1),
            )
            .await
            .unwrap();
        assert_eq!(subscriptions.load(Ordering::SeqCst), 2);

        assert_eq!(thing.emit_event("overheat", &json!(42)).unwrap(), 2);
        let content = json_received.lock().unwrap().remove(0);
        assert_eq!(decode(&thing, content).await, json!(42));
        assert_eq!(text_received.lock().unwrap()[0].content_type(), TEXT);

        thing
            .handle_unsubscribe_event("overheat", &json_listener, InteractionOptions::new())
            .await
            .unwrap();
        assert_eq!(thing.emit_event("overheat", &json!(43)).unwrap(), 1);

        let error = thing.emit_event("meltdown", &json!(1)).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn emit_property_change_requires_read_handler() {
        let thing = ExposedThing::new(lamp());

        let error = thing.emit_property_change("on").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NoHandler);
        let error = thing.emit_property_change("missing").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn destroy_clears_everything() {
        let (thing, _) = state_thing();
        add_forms(&thing);
        let mut descriptions = thing.observe_description();

        thing.expose().await.unwrap();
        assert!(descriptions.borrow_and_update().is_some());

        let (listener, received) = channel_listener();
        thing
            .handle_observe_property("on", listener, InteractionOptions::new())
            .await
            .unwrap();

        thing.destroy().await.unwrap();
        assert!(thing.is_destroyed());
        assert!(descriptions.borrow_and_update().is_none());

        let error = thing.emit_property_change("on").await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
        let error = thing
            .handle_read_property("on", InteractionOptions::new())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert!(received.lock().unwrap().is_empty());
        assert_eq!(thing.property_listeners.count("on"), 0);

        // Destroying twice is a no-op.
        thing.destroy().await.unwrap();
    }

    #[test]
    fn generated_identifier() {
        let first = ExposedThing::new(Thing::new("Sensor"));
        let second = ExposedThing::new(Thing::new("Sensor"));
        let explicit = ExposedThing::new(Thing::new("Sensor").id("urn:dev:sensor"));

        assert!(first.id().starts_with("urn:wotkit:thing:"));
        assert_ne!(first.id(), second.id());
        assert_eq!(explicit.id(), "urn:dev:sensor");
    }

    #[test]
    fn add_form_deduplicates() {
        let thing = ExposedThing::new(lamp());
        let form = Form::new("coap://127.0.0.1/lamp-1/actions/toggle")
            .content_type("application/json")
            .operation(Operation::InvokeAction);

        assert_eq!(
            thing
                .add_form(InteractionKind::Action, "toggle", form.clone())
                .unwrap(),
            0
        );
        assert_eq!(
            thing
                .add_form(InteractionKind::Action, "toggle", form.clone())
                .unwrap(),
            0
        );
        assert_eq!(
            thing
                .add_form(InteractionKind::Event, "toggle", form)
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }
}
