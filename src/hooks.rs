//! Lifecycle and tracing callables invoked around terminal query execution.
//!
//! Hooks are asynchronous: each callable returns a boxed future. A `before*`
//! hook that resolves to an error aborts the surrounding operation before any
//! SQL is issued; `after*` hooks fire only on success.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;

/// Payload handed to every lifecycle hook.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub table: String,
    /// Values being written, for create/update hooks.
    pub data: Option<Value>,
    /// Rendered predicate summary, for update/delete hooks.
    pub filter: Option<Value>,
    /// Operation outcome, for `after*` hooks.
    pub result: Option<Value>,
}

/// Payload handed to query tracing hooks.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub table: String,
    pub operation: &'static str,
    pub sql: String,
    /// Populated for `on_query_error` only.
    pub error: Option<String>,
}

pub type HookFn = Arc<dyn Fn(HookContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type QueryHookFn = Arc<dyn Fn(QueryEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// The full lifecycle hook set. Every slot is optional; an empty set is the
/// default and adds no overhead to the execution path.
#[derive(Clone, Default)]
pub struct Hooks {
    pub before_create: Option<HookFn>,
    pub after_create: Option<HookFn>,
    pub before_update: Option<HookFn>,
    pub after_update: Option<HookFn>,
    pub before_delete: Option<HookFn>,
    pub after_delete: Option<HookFn>,
    pub on_query_start: Option<QueryHookFn>,
    pub on_query_end: Option<QueryHookFn>,
    pub on_query_error: Option<QueryHookFn>,
    pub start_span: Option<QueryHookFn>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |o: bool| if o { "set" } else { "unset" };
        f.debug_struct("Hooks")
            .field("before_create", &set(self.before_create.is_some()))
            .field("after_create", &set(self.after_create.is_some()))
            .field("before_update", &set(self.before_update.is_some()))
            .field("after_update", &set(self.after_update.is_some()))
            .field("before_delete", &set(self.before_delete.is_some()))
            .field("after_delete", &set(self.after_delete.is_some()))
            .field("on_query_start", &set(self.on_query_start.is_some()))
            .field("on_query_end", &set(self.on_query_end.is_some()))
            .field("on_query_error", &set(self.on_query_error.is_some()))
            .field("start_span", &set(self.start_span.is_some()))
            .finish()
    }
}

impl Hooks {
    /// Run an optional lifecycle hook, translating a hook failure into an
    /// abort of the surrounding operation.
    pub(crate) async fn run(
        hook: &Option<HookFn>,
        name: &'static str,
        ctx: HookContext,
    ) -> Result<()> {
        if let Some(hook) = hook {
            hook(ctx).await.map_err(|e| crate::error::Error::HookAborted {
                hook: name,
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub(crate) async fn emit(hook: &Option<QueryHookFn>, event: QueryEvent) {
        if let Some(hook) = hook {
            hook(event).await;
        }
    }
}
