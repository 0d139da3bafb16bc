use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

/// One event recorded by [`EventCapture`], with every field rendered through its `Debug` form.
/// Fields recorded with `%` therefore show their `Display` form.
#[derive(Clone, Debug)]
pub(crate) struct CapturedEvent {
    pub(crate) level: Level,
    fields: Vec<(&'static str, String)>,
}

impl CapturedEvent {
    pub(crate) fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn message(&self) -> &str {
        self.field("message").unwrap_or_default()
    }
}

/// Records the events emitted on the current thread while installed via [`capture_events()`].
#[derive(Clone, Debug, Default)]
pub(crate) struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl EventCapture {
    pub(crate) fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().expect("capture lock is never poisoned").clone()
    }

    pub(crate) fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == level)
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        self.events
            .lock()
            .expect("capture lock is never poisoned")
            .push(CapturedEvent {
                level: *event.metadata().level(),
                fields: fields.0,
            });
    }
}

#[derive(Default)]
struct FieldCollector(Vec<(&'static str, String)>);

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        self.0.push((field.name(), format!("{value:?}")));
    }
}

/// Runs `f` with a subscriber that records every event emitted on this thread.
pub(crate) fn capture_events<R>(f: impl FnOnce() -> R) -> (R, EventCapture) {
    let capture = EventCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    let result = tracing::subscriber::with_default(subscriber, f);

    (result, capture)
}
