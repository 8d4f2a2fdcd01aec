use std::time::Duration;

// Snapshot storage layout
pub const SNAPSHOT_DIR: &str = ".qb";
pub const SNAPSHOT_FILE_PREFIX: &str = "model-snapshot.";

// Relation traversal limits
pub const DEFAULT_MAX_DEPTH: usize = 10;
pub const DEFAULT_MAX_EAGER_LOAD: usize = 50;

// DynamoDB single-table defaults
pub const DEFAULT_PK_ATTRIBUTE: &str = "pk";
pub const DEFAULT_SK_ATTRIBUTE: &str = "sk";
pub const DEFAULT_ENTITY_TYPE_ATTRIBUTE: &str = "_et";
pub const DEFAULT_KEY_DELIMITER: &str = "#";
pub const MAX_GSI_COUNT: usize = 5;

// DynamoDB migration control table
pub const DYNAMO_MIGRATIONS_TABLE: &str = "_qb_migrations";
pub const MIGRATION_PK_PREFIX: &str = "MIGRATION#";
pub const MIGRATION_SK_PREFIX: &str = "VERSION#";

// Wait-for-active polling budgets
pub const TABLE_ACTIVE_MAX_POLLS: u32 = 60;
pub const TABLE_ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const GSI_ACTIVE_MAX_POLLS: u32 = 120;
pub const GSI_ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(5);

// SQL migrations tracking table
pub const SQL_MIGRATIONS_TABLE: &str = "qb_migrations";

// Column default pseudo-token understood by every dialect driver
pub const CURRENT_TIMESTAMP_TOKEN: &str = "CURRENT_TIMESTAMP";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_budgets_are_positive() {
        assert!(TABLE_ACTIVE_POLL_INTERVAL > Duration::from_secs(0));
        assert!(GSI_ACTIVE_POLL_INTERVAL > Duration::from_secs(0));
        assert!(TABLE_ACTIVE_MAX_POLLS > 0);
        assert!(GSI_ACTIVE_MAX_POLLS > 0);
    }
}
