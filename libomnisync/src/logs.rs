use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use camino::Utf8Path;
use eyre::{Result, WrapErr};
use tracing::{
    Level,
    field::{Field, Visit},
};
use tracing_subscriber::Layer;

#[macro_export]
macro_rules! try_log_error {
    ($expr:expr, $what:expr $(,)?) => {
        if let Err(e) = $expr {
            ::tracing::error!("{}: {}", $what, e)
        }
    };
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogMessage {
    pub level: Level,
    pub target: String,
    pub message: String,
    /// Structured fields of the event other than the message.
    pub fields: BTreeMap<String, String>,
}

struct FieldVisitor<'a>(&'a mut BTreeMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{value:?}"));
    }
}

/// A [`Layer`] that keeps every event it sees.
///
/// Clones share the same buffer, so one clone can be installed in a subscriber
/// while another is used to read the records back.
#[derive(Clone, Default)]
pub struct LogCapture {
    records: Arc<Mutex<Vec<LogMessage>>>,
}

impl LogCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogMessage>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn records(&self) -> Vec<LogMessage> {
        self.lock().clone()
    }

    #[must_use]
    pub fn count(&self, level: Level) -> usize {
        self.lock().iter().filter(|r| r.level == level).count()
    }

    #[must_use]
    pub fn warnings(&self) -> usize {
        self.count(Level::WARN)
    }

    #[must_use]
    pub fn errors(&self) -> usize {
        self.count(Level::ERROR)
    }
}

impl<S> Layer<S> for LogCapture
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut fields = BTreeMap::new();
        event.record(&mut FieldVisitor(&mut fields));
        let message = fields.remove("message").unwrap_or_else(|| "-".to_string());

        self.lock().push(LogMessage {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message,
            fields,
        });
    }
}

/// Starts the logging. Events go to stdout, to `log_file` when given, and to the
/// returned [`LogCapture`].
pub fn start_logging(log_file: Option<&Utf8Path>) -> Result<LogCapture> {
    use std::io::stdout;

    use tracing_subscriber::{Registry, fmt, layer::SubscriberExt};

    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .wrap_err_with(|| format!("Failed to create log file {path}"))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .with_filter(filter.clone()),
            )
        }
        None => None,
    };

    let capture = LogCapture::new();
    let subscriber = Registry::default()
        .with(
            fmt::layer()
                .without_time()
                .with_writer(stdout)
                .with_filter(filter.clone()),
        )
        .with(file_layer)
        .with(capture.clone().with_filter(filter));

    tracing::subscriber::set_global_default(subscriber)
        .wrap_err("Unable to set global subscriber")?;

    Ok(capture)
}

/// Captures the events of the current thread until the guard is dropped.
pub fn capture_thread_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    use tracing_subscriber::{Registry, layer::SubscriberExt};

    let capture = LogCapture::new();
    let guard = tracing::subscriber::set_default(Registry::default().with(capture.clone()));
    (capture, guard)
}
