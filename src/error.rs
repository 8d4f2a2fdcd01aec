use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes surfaced by the crate.
///
/// Snapshot parse and shape mismatches are deliberately absent: those degrade
/// to "no prior snapshot" instead of failing the run. Anything that would
/// produce incorrect SQL or API calls raises.
#[derive(Debug, Error)]
pub enum Error {
    /// A declared relation points at a model name that was never registered.
    /// Raised on use, not at normalization.
    #[error("unable to resolve relationship `{alias}` on table `{table}`: model `{target}` is not registered")]
    ModelResolution {
        table: String,
        alias: String,
        target: String,
    },

    /// The alias does not exist on the source table at all.
    #[error("relationship `{alias}` not found on table `{table}`")]
    RelationNotFound { table: String, alias: String },

    /// A scope alias was invoked that the table does not define.
    #[error("scope `{alias}` not found on table `{table}`")]
    ScopeNotFound { table: String, alias: String },

    /// An operation was applied to a relation of the wrong kind, e.g.
    /// pivot-column selection on something that is not a belongsToMany.
    #[error("relationship `{alias}` on table `{table}` is not a belongsToMany relation")]
    RelationTypeMismatch { table: String, alias: String },

    /// The same (table, alias) pair appeared twice while walking a dotted
    /// eager-load chain.
    #[error("Circular relationship detected in `{chain}` at `{table}.{alias}`")]
    CircularRelationship {
        chain: String,
        table: String,
        alias: String,
    },

    /// A single terminal query requested more relation loads than allowed.
    #[error("Too many relationships in a single query: {requested} requested, limit is {limit}")]
    EagerLoadLimit { requested: usize, limit: usize },

    /// A dotted eager-load chain is longer than the configured maximum.
    #[error("eager-load chain `{chain}` exceeds the maximum depth of {max_depth}")]
    DepthLimit { chain: String, max_depth: usize },

    /// The dialect driver cannot render the requested operation.
    #[error("cannot render {operation} for dialect `{dialect}`: {reason}")]
    DialectRender {
        dialect: &'static str,
        operation: String,
        reason: String,
    },

    /// Disk I/O failed while reading or writing the snapshot file. Parse
    /// errors never end up here.
    #[error("snapshot I/O failure at {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote DynamoDB endpoint rejected a request.
    #[error("DynamoDB request failed (status {status}) {code}: {message}")]
    DynamoDb {
        status: u16,
        code: String,
        message: String,
    },

    /// A key pattern placeholder had no corresponding value in the item data.
    #[error("Missing value for pattern key: {field}")]
    DynamoDbKeyResolution { field: String },

    /// A table or index never reached ACTIVE within the polling budget.
    #[error("timed out waiting for {resource} to become ACTIVE after {attempts} attempts")]
    WaitForActiveTimeout { resource: String, attempts: u32 },

    /// The caller's cancellation token fired between suspension points.
    #[error("operation cancelled")]
    Cancelled,

    /// A lifecycle hook aborted the surrounding operation.
    #[error("hook `{hook}` aborted the operation: {message}")]
    HookAborted { hook: &'static str, message: String },

    /// Failure loading raw model declarations from a model source.
    #[error("model source error: {0}")]
    ModelSource(String),

    /// The caller wired the pipeline together incorrectly, e.g. a terminal
    /// method on a builder with no SQL client bound.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport failure from the signed-HTTP collaborator.
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_phrases_survive_formatting() {
        let err = Error::RelationNotFound {
            table: "users".into(),
            alias: "posts".into(),
        };
        assert!(err.to_string().contains("not found"));

        let err = Error::RelationTypeMismatch {
            table: "users".into(),
            alias: "posts".into(),
        };
        assert!(err.to_string().contains("not a belongsToMany"));

        let err = Error::CircularRelationship {
            chain: "posts.author.posts".into(),
            table: "posts".into(),
            alias: "author".into(),
        };
        assert!(err.to_string().contains("Circular relationship"));

        let err = Error::EagerLoadLimit {
            requested: 51,
            limit: 50,
        };
        assert!(err.to_string().contains("Too many relationships"));

        let err = Error::DynamoDbKeyResolution { field: "id".into() };
        assert_eq!(err.to_string(), "Missing value for pattern key: id");
    }
}
