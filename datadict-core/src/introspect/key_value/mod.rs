//! Redis introspection by key sampling.
//!
//! A key-value store has no schema to read, so the dictionary reports two
//! synthetic tables: how many sampled keys hold each value type, and how the
//! connection was made.

use std::fmt;

use crate::models::{Column, Relationships, Table};

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use self::redis::RedisIntrospector;

pub const DATA_TYPES_TABLE: &str = "redis_data_types";
pub const CONNECTION_INFO_TABLE: &str = "redis_connection_info";

/// Value type reported by `TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    String,
    Hash,
    List,
    Set,
    ZSet,
    Stream,
}

impl KeyKind {
    pub const ALL: [KeyKind; 6] = [
        KeyKind::String,
        KeyKind::Hash,
        KeyKind::List,
        KeyKind::Set,
        KeyKind::ZSet,
        KeyKind::Stream,
    ];

    /// Parses a `TYPE` reply. Module types and `none` are not counted.
    pub fn from_type_reply(reply: &str) -> Option<Self> {
        match reply.trim().to_ascii_lowercase().as_str() {
            "string" => Some(KeyKind::String),
            "hash" => Some(KeyKind::Hash),
            "list" => Some(KeyKind::List),
            "set" => Some(KeyKind::Set),
            "zset" => Some(KeyKind::ZSet),
            "stream" => Some(KeyKind::Stream),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyKind::String => "string",
            KeyKind::Hash => "hash",
            KeyKind::List => "list",
            KeyKind::Set => "set",
            KeyKind::ZSet => "zset",
            KeyKind::Stream => "stream",
        }
    }

    fn index(self) -> usize {
        match self {
            KeyKind::String => 0,
            KeyKind::Hash => 1,
            KeyKind::List => 2,
            KeyKind::Set => 3,
            KeyKind::ZSet => 4,
            KeyKind::Stream => 5,
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sampled key counts per value type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyKindCounts([u64; 6]);

impl KeyKindCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts used when keys cannot be enumerated: a single string key
    pub fn degraded() -> Self {
        let mut counts = Self::new();
        counts.record(KeyKind::String);
        counts
    }

    pub fn record(&mut self, kind: KeyKind) {
        let slot = &mut self.0[kind.index()];
        *slot = slot.saturating_add(1);
    }

    pub fn get(&self, kind: KeyKind) -> u64 {
        self.0[kind.index()]
    }

    pub fn total(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, n| acc.saturating_add(*n))
    }

    /// Kinds with a non-zero count, in `KeyKind::ALL` order
    pub fn present(&self) -> impl Iterator<Item = (KeyKind, u64)> + '_ {
        KeyKind::ALL
            .into_iter()
            .map(|kind| (kind, self.get(kind)))
            .filter(|(_, count)| *count > 0)
    }
}

/// One `<kind>_count` column per type that was seen.
///
/// An empty database yields a table with no columns.
pub fn data_types_table(counts: &KeyKindCounts) -> Table {
    let mut table = Table::new(DATA_TYPES_TABLE).with_relationships(Relationships::NotApplicable);
    for (kind, count) in counts.present() {
        let column = Column::new(format!("{}_count", kind), "integer")
            .nullable(false)
            .with_extra(count.to_string());
        // One column per kind.
        let _ = table.add_column(column);
    }
    table
}

/// Connection summary; values are carried in each column's extra field
pub fn connection_info_table(database: u32, host: &str, port: u16, tls: bool) -> Table {
    let columns = [
        Column::new("database_number", "integer")
            .primary_key()
            .with_extra(database.to_string()),
        Column::new("server_address", "string")
            .nullable(false)
            .with_extra(host),
        Column::new("port", "integer")
            .nullable(false)
            .with_extra(port.to_string()),
        Column::new("ssl_enabled", "boolean")
            .nullable(false)
            .with_extra(tls.to_string()),
    ];

    let mut table =
        Table::new(CONNECTION_INFO_TABLE).with_relationships(Relationships::NotApplicable);
    for column in columns {
        let _ = table.add_column(column);
    }
    table
}

/// Dictionary name for a Redis logical database
pub fn database_label(database: u32) -> String {
    format!("Redis DB {}", database)
}
