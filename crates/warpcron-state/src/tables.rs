//! redb table definitions for the warpcron state store.
//!
//! Every table maps `&str` keys to JSON-serialized `&[u8]` values.

use redb::TableDefinition;

pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Workflows keyed by `{environment_id}/{name}`.
pub const WORKFLOWS: JsonTable = TableDefinition::new("workflows");

/// Templates keyed by `{environment_id}/{internal_name}`.
pub const TEMPLATES: JsonTable = TableDefinition::new("templates");

/// Execution records keyed by `{workflow}:{execution_id}`.
pub const EXECUTIONS: JsonTable = TableDefinition::new("executions");

/// Key for an environment-scoped resource.
pub fn scoped_key(environment_id: &str, name: &str) -> String {
    format!("{environment_id}/{name}")
}
