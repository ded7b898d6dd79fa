//! redb table definitions for the broker state store.

use redb::TableDefinition;

/// All broker records, keyed by dotted namespace (`broker.<kind>[.<id>]`).
pub const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");
