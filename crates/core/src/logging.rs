//! Tracing setup for the order lifecycle service.
//!
//! [`init_tracing`] installs the global subscriber in one of two modes:
//! - **JSON** (`logging.json = true`): one JSON object per event with a
//!   nanosecond UTC timestamp.
//! - **Pretty** (`logging.json = false`): human-readable output for local runs.
//!
//! `RUST_LOG` takes precedence over the configured level
//! (e.g., `RUST_LOG=tq_oms=debug`).
//!
//! A [`CredentialGuard`] layer warns whenever an event or span records a field
//! named like a venue credential.

use std::fmt;

use anyhow::{anyhow, Result};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// Fails if a global subscriber is already set or the configured level is not
/// a valid filter directive.
pub fn init_tracing(cfg: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cfg.level)
            .map_err(|e| anyhow!("invalid log level {:?}: {e}", cfg.level))?,
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(CredentialGuard);

    if cfg.json {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(NanosecondTimer)
            .with_target(true)
            .with_thread_ids(true);
        registry
            .with(json_layer)
            .try_init()
            .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
    } else {
        let pretty_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false);
        registry
            .with(pretty_layer)
            .try_init()
            .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
    }
}

/// RFC 3339 timestamps with nanosecond precision.
#[derive(Debug, Clone)]
struct NanosecondTimer;

impl tracing_subscriber::fmt::time::FormatTime for NanosecondTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.9fZ"))
    }
}

/// Layer that flags events and spans carrying credential-named fields.
///
/// Venue adapters hold an access key, a secret key and sometimes a passphrase.
/// None of them should ever be recorded; this layer emits a warning (without
/// the value) when one is.
#[derive(Debug, Clone)]
pub struct CredentialGuard;

impl<S> Layer<S> for CredentialGuard
where
    S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_new_span(
        &self,
        attrs: &span::Attributes<'_>,
        _id: &span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = CredentialVisitor::default();
        attrs.record(&mut visitor);
        if let Some(field) = visitor.flagged {
            tracing::warn!(field, "credential-named field recorded on a span");
        }
    }

    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // The warning below is itself an event; skip it.
        if event.metadata().target() == module_path!() {
            return;
        }
        let mut visitor = CredentialVisitor::default();
        event.record(&mut visitor);
        if let Some(field) = visitor.flagged {
            tracing::warn!(field, "credential-named field recorded on an event");
        }
    }
}

/// Field names that always carry venue credentials.
const CREDENTIAL_FIELD_NAMES: &[&str] = &[
    "access_key",
    "secret_key",
    "passphrase",
    "api_key",
    "api_secret",
    "secret",
    "signature",
    "password",
];

#[derive(Default)]
struct CredentialVisitor {
    flagged: Option<&'static str>,
}

impl CredentialVisitor {
    fn is_credential(name: &str) -> bool {
        CREDENTIAL_FIELD_NAMES.contains(&name)
    }

    fn check(&mut self, field: &Field) {
        if self.flagged.is_none() && Self::is_credential(field.name()) {
            self.flagged = Some(field.name());
        }
    }
}

impl Visit for CredentialVisitor {
    fn record_debug(&mut self, field: &Field, _value: &dyn fmt::Debug) {
        self.check(field);
    }

    fn record_str(&mut self, field: &Field, _value: &str) {
        self.check(field);
    }
}
