//! Capture tracing events for assertions.
//!
//! Capture is thread-local: only events emitted on the thread that called
//! [`TestLogCapture::start`] are recorded, so drive the code under test
//! synchronously rather than through the blocking pool.

#![allow(dead_code)]

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

/// One recorded event.
#[derive(Debug, Clone)]
pub struct CapturedLog {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedLog {
    /// Value of `name`, with any `Debug` quoting removed.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.trim_matches('"'))
    }
}

/// Records events until dropped.
pub struct TestLogCapture {
    logs: Arc<Mutex<Vec<CapturedLog>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl TestLogCapture {
    pub fn start() -> Self {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(Recorder {
            logs: Arc::clone(&logs),
        });
        Self {
            logs,
            _guard: tracing::subscriber::set_default(subscriber),
        }
    }

    fn logs(&self) -> MutexGuard<'_, Vec<CapturedLog>> {
        self.logs.lock().unwrap()
    }

    /// Events at `level` whose message contains `needle`.
    pub fn matching(&self, level: Level, needle: &str) -> Vec<CapturedLog> {
        self.logs()
            .iter()
            .filter(|log| log.level == level && log.message.contains(needle))
            .cloned()
            .collect()
    }

    pub fn count(&self, level: Level, needle: &str) -> usize {
        self.matching(level, needle).len()
    }

    /// Assert one event at `level` mentions `needle` and return it.
    pub fn assert_logged_at_level(&self, level: Level, needle: &str) -> CapturedLog {
        self.matching(level, needle)
            .into_iter()
            .next()
            .unwrap_or_else(|| {
                let seen: Vec<String> = self
                    .logs()
                    .iter()
                    .map(|log| format!("{} {}", log.level, log.message))
                    .collect();
                panic!("Expected {level} log containing '{needle}'. Logged: {seen:#?}")
            })
    }

    /// Assert some event carries `name = value`.
    pub fn assert_field_logged(&self, name: &str, value: &str) {
        let logs = self.logs();
        assert!(
            logs.iter().any(|log| log.field(name) == Some(value)),
            "Expected field {name}={value}. Logged fields: {:#?}",
            logs.iter().map(|log| &log.fields).collect::<Vec<_>>()
        );
    }

    pub fn assert_no_errors(&self) {
        let errors: Vec<CapturedLog> = self
            .logs()
            .iter()
            .filter(|log| log.level == Level::ERROR)
            .cloned()
            .collect();
        assert!(errors.is_empty(), "Unexpected errors: {errors:#?}");
    }
}

struct Recorder {
    logs: Arc<Mutex<Vec<CapturedLog>>>,
}

impl<S: Subscriber> Layer<S> for Recorder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut log = CapturedLog {
            level: *event.metadata().level(),
            message: String::new(),
            fields: Vec::new(),
        };
        event.record(&mut log);
        self.logs.lock().unwrap().push(log);
    }
}

impl Visit for CapturedLog {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_str(field, &format!("{value:?}"));
    }
}
