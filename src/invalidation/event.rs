//! Invalidation events
//!
//! Describes "this key/namespace is stale" notifications.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::EntryKey;

/// Free-form structured context attached to an event.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Why a producer declared data stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidationReason {
    /// The underlying data was written
    DataUpdate,
    /// A user changed something the value depends on
    UserAction,
    /// A value this one was derived from changed
    Dependency,
    /// Schema or shape of the data changed
    SchemaChange,
    /// Explicit operator request
    Manual,
}

impl InvalidationReason {
    /// Resolves a reason name, falling back to `Manual`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "data-update" | "data_update" | "update" => InvalidationReason::DataUpdate,
            "user-action" | "user_action" => InvalidationReason::UserAction,
            "dependency" => InvalidationReason::Dependency,
            "schema-change" | "schema_change" => InvalidationReason::SchemaChange,
            _ => InvalidationReason::Manual,
        }
    }
}

/// Scope of an invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum InvalidationTarget {
    /// One key in one namespace
    Key(EntryKey),
    /// Every key of a namespace
    Namespace { namespace: String },
}

/// A published invalidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub target: InvalidationTarget,
    pub reason: InvalidationReason,
    pub message: String,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl InvalidationEvent {
    pub fn for_key(key: EntryKey, reason: InvalidationReason, message: impl Into<String>) -> Self {
        Self {
            target: InvalidationTarget::Key(key),
            reason,
            message: message.into(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn for_namespace(
        namespace: impl Into<String>,
        reason: InvalidationReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target: InvalidationTarget::Namespace {
                namespace: namespace.into(),
            },
            reason,
            message: message.into(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}
