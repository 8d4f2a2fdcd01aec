//! Resolved runtime configuration.
//!
//! Configuration-file parsing lives with the caller; this crate only consumes
//! the resolved shape. Every option carries the documented default so
//! `Config::default()` is a fully working setup. The struct is cloned into
//! builders and generators once and treated as immutable for the lifetime of
//! a pipeline.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ENTITY_TYPE_ATTRIBUTE, DEFAULT_KEY_DELIMITER, DEFAULT_MAX_DEPTH,
    DEFAULT_MAX_EAGER_LOAD, DEFAULT_PK_ATTRIBUTE, DEFAULT_SK_ATTRIBUTE,
};
use crate::dialect::DialectKind;
use crate::hooks::Hooks;

#[derive(Debug, Clone)]
pub struct Config {
    /// Selects the dialect driver for rendering and migration generation.
    pub dialect: DialectKind,
    pub soft_deletes: SoftDeleteConfig,
    /// Maximum number of segments in a dotted eager-load chain.
    pub max_depth: usize,
    /// Maximum relation loads a single terminal query may trigger.
    pub max_eager_load: usize,
    pub debug: DebugConfig,
    pub dynamodb: DynamoConfig,
    /// Lifecycle and tracing callables; empty by default.
    pub hooks: Hooks,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialect: DialectKind::Postgres,
            soft_deletes: SoftDeleteConfig::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_eager_load: DEFAULT_MAX_EAGER_LOAD,
            debug: DebugConfig::default(),
            dynamodb: DynamoConfig::default(),
            hooks: Hooks::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftDeleteConfig {
    pub enabled: bool,
    /// Column holding the deletion timestamp.
    pub column: String,
    /// Auto-append `deleted_at IS NULL` to reads against soft-delete tables.
    pub default_filter: bool,
}

impl Default for SoftDeleteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            column: "deleted_at".to_string(),
            default_filter: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Retain the rendered SQL text on the builder after terminal execution.
    pub capture_text: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamoConfig {
    pub pk_attribute: String,
    pub sk_attribute: String,
    pub entity_type_attribute: String,
    pub key_delimiter: String,
}

impl Default for DynamoConfig {
    fn default() -> Self {
        Self {
            pk_attribute: DEFAULT_PK_ATTRIBUTE.to_string(),
            sk_attribute: DEFAULT_SK_ATTRIBUTE.to_string(),
            entity_type_attribute: DEFAULT_ENTITY_TYPE_ATTRIBUTE.to_string(),
            key_delimiter: DEFAULT_KEY_DELIMITER.to_string(),
        }
    }
}
