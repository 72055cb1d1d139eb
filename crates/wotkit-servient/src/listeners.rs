use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;

use serde_json::Value;

use tracing::error;

use wotkit::codec::{ContentSerdes, DEFAULT};
use wotkit::form::Form;
use wotkit::schema::DataSchema;

use crate::content::{Content, value_to_content};
use crate::error::Result;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// A listener receiving the notifications of an observed property or a
/// subscribed event.
///
/// Two listeners are equal only when one is a clone of the other.
#[derive(Clone)]
pub struct ContentListener {
    // Listener identity.
    id: u64,
    // Delivery callback.
    callback: Arc<dyn Fn(Content) -> Result<()> + Send + Sync>,
}

impl ContentListener {
    /// Creates a [`ContentListener`] from a delivery callback.
    ///
    /// The callback must not block, notifications are delivered from the
    /// task producing them.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Content) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            id: NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed),
            callback: Arc::new(callback),
        }
    }

    /// Delivers a [`Content`] to the listener.
    ///
    /// # Errors
    ///
    /// Returns the error raised by the delivery callback.
    pub fn deliver(&self, content: Content) -> Result<()> {
        (self.callback)(content)
    }
}

impl PartialEq for ContentListener {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ContentListener {}

impl std::fmt::Debug for ContentListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentListener")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct Registration {
    form_index: usize,
    listener: ContentListener,
}

/// The listeners registered on the affordances of a Thing.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<IndexMap<String, Vec<Registration>>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.lock();
        let mut map = f.debug_map();
        for (name, registrations) in listeners.iter() {
            map.entry(name, &registrations.len());
        }
        map.finish()
    }
}

impl ListenerRegistry {
    /// Creates an empty [`ListenerRegistry`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<String, Vec<Registration>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a listener on an affordance through the form at
    /// `form_index`.
    ///
    /// Registering the same listener twice produces two deliveries per
    /// notification.
    pub fn register(&self, name: &str, form_index: usize, listener: ContentListener) {
        self.lock()
            .entry(name.into())
            .or_default()
            .push(Registration {
                form_index,
                listener,
            });
    }

    /// Removes the first registration matching affordance, form index and
    /// listener.
    ///
    /// Returns whether a registration has been removed.
    pub fn unregister(&self, name: &str, form_index: usize, listener: &ContentListener) -> bool {
        let mut listeners = self.lock();
        let Some(registrations) = listeners.get_mut(name) else {
            return false;
        };

        let Some(position) = registrations.iter().position(|registration| {
            registration.form_index == form_index && registration.listener == *listener
        }) else {
            return false;
        };

        registrations.remove(position);
        if registrations.is_empty() {
            listeners.shift_remove(name);
        }
        true
    }

    /// Removes every registration.
    pub fn unregister_all(&self) {
        self.lock().clear();
    }

    /// Returns the number of registrations on an affordance.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, Vec::len)
    }

    /// Delivers a value to every listener of an affordance.
    ///
    /// The value is encoded with the content type of the form each listener
    /// registered through, the default one when that form declares none.
    /// Failures are logged and do not prevent delivery to the remaining
    /// listeners.
    ///
    /// Returns the number of successful deliveries.
    pub fn notify(
        &self,
        name: &str,
        value: &Value,
        schema: Option<&DataSchema>,
        forms: &[Form],
        serdes: &ContentSerdes,
    ) -> usize {
        // The lock is released before delivering.
        let registrations = self.lock().get(name).cloned().unwrap_or_default();

        let mut delivered = 0;
        for Registration {
            form_index,
            listener,
        } in registrations
        {
            let content_type = forms
                .get(form_index)
                .map_or(DEFAULT, Form::content_type_or_default);

            let content = match value_to_content(serdes, value, schema, content_type) {
                Ok(content) => content,
                Err(e) => {
                    error!("Cannot encode notification for `{name}` as `{content_type}`: {e}");
                    continue;
                }
            };

            match listener.deliver(content) {
                Ok(()) => delivered += 1,
                Err(e) => error!("Cannot deliver notification for `{name}`: {e}"),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use wotkit::codec::{ContentSerdes, TEXT};
    use wotkit::form::Form;

    use crate::content::Content;
    use crate::error::{Error, ErrorKind};

    use super::{ContentListener, ListenerRegistry};

    fn collecting_listener() -> (ContentListener, Arc<Mutex<Vec<Content>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let listener = ContentListener::new(move |content| {
            sink.lock().unwrap().push(content);
            Ok(())
        });
        (listener, received)
    }

    fn forms() -> Vec<Form> {
        vec![
            Form::new("coap://127.0.0.1/lamp/properties/on").content_type("application/json"),
            Form::new("coap://127.0.0.1/lamp/properties/on").content_type(TEXT),
        ]
    }

    #[test]
    fn listener_identity() {
        let (listener, _) = collecting_listener();
        let (other, _) = collecting_listener();

        assert_eq!(listener, listener.clone());
        assert_ne!(listener, other);
    }

    #[test]
    fn duplicated_registrations() {
        let registry = ListenerRegistry::new();
        let serdes = ContentSerdes::default();
        let (listener, received) = collecting_listener();

        registry.register("on", 0, listener.clone());
        registry.register("on", 0, listener.clone());
        assert_eq!(registry.count("on"), 2);

        assert_eq!(registry.notify("on", &json!(true), None, &forms(), &serdes), 2);
        assert_eq!(received.lock().unwrap().len(), 2);

        // Only one registration is removed.
        assert!(registry.unregister("on", 0, &listener));
        assert_eq!(registry.count("on"), 1);
        assert_eq!(registry.notify("on", &json!(false), None, &forms(), &serdes), 1);
        assert_eq!(received.lock().unwrap().len(), 3);
    }

    #[test]
    fn unregister_requires_exact_match() {
        let registry = ListenerRegistry::new();
        let (listener, _) = collecting_listener();
        let (other, _) = collecting_listener();

        registry.register("on", 1, listener.clone());

        assert!(!registry.unregister("on", 0, &listener));
        assert!(!registry.unregister("on", 1, &other));
        assert!(!registry.unregister("off", 1, &listener));
        assert!(registry.unregister("on", 1, &listener));
        assert!(!registry.unregister("on", 1, &listener));
    }

    #[test]
    fn content_type_per_form() {
        let registry = ListenerRegistry::new();
        let serdes = ContentSerdes::default();
        let (json_listener, json_received) = collecting_listener();
        let (text_listener, text_received) = collecting_listener();
        let (fallback_listener, fallback_received) = collecting_listener();

        registry.register("on", 0, json_listener);
        registry.register("on", 1, text_listener);
        registry.register("on", 7, fallback_listener);

        registry.notify("on", &json!("warm"), None, &forms(), &serdes);

        assert_eq!(
            json_received.lock().unwrap()[0].content_type(),
            "application/json"
        );
        assert_eq!(text_received.lock().unwrap()[0].content_type(), TEXT);
        assert_eq!(
            fallback_received.lock().unwrap()[0].content_type(),
            "application/json"
        );
    }

    #[test]
    fn failing_listener_does_not_stop_delivery() {
        let registry = ListenerRegistry::new();
        let serdes = ContentSerdes::default();
        let failing = ContentListener::new(|_| Err(Error::new(ErrorKind::Transport, "closed")));
        let (listener, received) = collecting_listener();

        registry.register("overheat", 0, failing);
        registry.register("overheat", 0, listener);

        assert_eq!(
            registry.notify("overheat", &json!(42), None, &forms(), &serdes),
            1
        );
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn unregister_all() {
        let registry = ListenerRegistry::new();
        let serdes = ContentSerdes::default();
        let (listener, received) = collecting_listener();

        registry.register("on", 0, listener.clone());
        registry.register("brightness", 0, listener);
        registry.unregister_all();

        assert_eq!(registry.notify("on", &json!(true), None, &forms(), &serdes), 0);
        assert_eq!(registry.count("brightness"), 0);
        assert!(received.lock().unwrap().is_empty());
    }
}
