//! Audit events emitted by the vault engine.
//!
//! The engine does not store audit history itself.  Every mutating
//! operation produces an `AuditEvent` which is handed to an `AuditSink`
//! after the change has been committed to disk.  Sinks are
//! fire-and-forget: a failing sink is logged and never fails the vault
//! operation that triggered it.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of operation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Create,
    Set,
    Delete,
    Import,
    Rotate,
    Clone,
    EnvDelete,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Import => "import",
            Self::Rotate => "rotate",
            Self::Clone => "clone",
            Self::EnvDelete => "env-delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the operation took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Who performed the operation, as far as the process can tell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub user: Option<String>,
    pub host: Option<String>,
}

impl ActorContext {
    /// Read the current user and host from the process environment.
    pub fn current() -> Self {
        Self {
            user: first_env(&["USER", "USERNAME", "LOGNAME"]),
            host: first_env(&["HOSTNAME", "COMPUTERNAME"]),
        }
    }
}

fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.is_empty())
}

/// An immutable record of one vault operation.
///
/// Never carries secret values; `secret` is a name only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: OperationKind,
    pub environment: String,
    pub actor: ActorContext,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    /// A successful event stamped with the current time and actor.
    pub fn success(kind: OperationKind, environment: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            environment: environment.to_string(),
            actor: ActorContext::current(),
            outcome: Outcome::Success,
            secret: None,
            detail: None,
        }
    }

    pub fn with_secret(mut self, name: &str) -> Self {
        self.secret = Some(name.to_string());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Mark the event as failed, appending `reason` to any detail.
    pub fn failed(mut self, reason: &str) -> Self {
        self.outcome = Outcome::Failure;
        self.detail = Some(match self.detail.take() {
            Some(detail) => format!("{detail}; {reason}"),
            None => reason.to_string(),
        });
        self
    }
}

/// Error returned by a sink that could not record an event.
#[derive(Debug, Error)]
#[error("audit sink failed: {0}")]
pub struct AuditSinkError(pub String);

/// Receives audit events.  Implement this to forward events to a file,
/// a database, or a remote collector.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditSinkError>;
}

/// Shared handle to a sink, as held by vaults and environment managers.
pub type SharedSink = Arc<dyn AuditSink>;

/// Deliver `events` to `sink`, logging and swallowing any failure.
pub(crate) fn emit_all(sink: Option<&SharedSink>, events: impl IntoIterator<Item = AuditEvent>) {
    let Some(sink) = sink else {
        return;
    };
    for event in events {
        if let Err(err) = sink.record(&event) {
            tracing::warn!(
                kind = %event.kind,
                env = %event.environment,
                error = %err,
                "audit sink failed; continuing"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in sinks
// ---------------------------------------------------------------------------

/// Forwards events to the `tracing` pipeline at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        tracing::info!(
            target: "envvault::audit",
            kind = %event.kind,
            env = %event.environment,
            secret = event.secret.as_deref().unwrap_or("-"),
            detail = event.detail.as_deref().unwrap_or("-"),
            user = event.actor.user.as_deref().unwrap_or("-"),
            outcome = ?event.outcome,
            "audit"
        );
        Ok(())
    }
}

/// Keeps events in memory.  Useful for tests and for hosts that batch
/// events before writing them somewhere durable.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every event recorded so far, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        self.events
            .lock()
            .map_err(|_| AuditSinkError("memory sink lock poisoned".into()))?
            .push(event.clone());
        Ok(())
    }
}
