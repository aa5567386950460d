//! Per-connection OID map for user-defined types.
//!
//! Built-in types carry compile-time OIDs. User-defined types (composites,
//! domains, enums) get their OIDs from `pg_type` during connection
//! establishment; until then their entries are unfilled and any attempt to
//! use them fails.

use std::collections::HashMap;

use crate::conversion::PgType;
use crate::error::{Error, Result};
use crate::protocol::types::Oid;

/// Mapping from PostgreSQL type name to OID.
///
/// Registering a type inserts both the type name and its array companion
/// (`_name`). A map attached to a connection source acts as a prototype:
/// every new connection clones it and resolves the entries against its own
/// server.
#[derive(Debug, Clone, Default)]
pub struct OidMap {
    entries: HashMap<&'static str, Option<Oid>>,
}

impl OidMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user-defined type and its array companion.
    pub fn register<T: PgType>(&mut self) {
        self.entries.insert(T::NAME, T::OID);
        if !T::ARRAY_NAME.is_empty() {
            self.entries.insert(T::ARRAY_NAME, T::ARRAY_OID);
        }
    }

    /// Whether no types are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the OID for a type name.
    pub fn oid_of(&self, name: &str) -> Result<Oid> {
        match self.entries.get(name) {
            Some(Some(oid)) => Ok(*oid),
            Some(None) => Err(Error::OidDiscovery(format!(
                "type `{}` was not resolved at connect time",
                name
            ))),
            None => Err(Error::InvalidUsage(format!(
                "type `{}` is not registered with the connection source",
                name
            ))),
        }
    }

    /// Names whose OIDs still need discovery, sorted for a deterministic
    /// catalog query.
    pub fn pending(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, oid)| oid.is_none())
            .map(|(name, _)| (*name).to_string())
            .collect();
        names.sort_unstable();
        names
    }

    /// Fill in a discovered OID. Returns false for unknown names.
    pub fn resolve(&mut self, name: &str, oid: Oid) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                *entry = Some(oid);
                true
            }
            None => false,
        }
    }

    /// Whether every registered entry has an OID.
    pub fn is_resolved(&self) -> bool {
        self.entries.values().all(Option::is_some)
    }
}
