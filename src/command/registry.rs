//! Command registry: duplicate-checked registration, sealed lookup.
//!
//! Registration happens once at startup through [`RegistryBuilder`];
//! [`RegistryBuilder::seal`] consumes the builder and produces the
//! read-only [`CommandRegistry`], so late registration is unrepresentable.
//! Inbound lookup is case-insensitive; the original peers emit `Choke`,
//! `Unchoke` and `Who-Am-I` with capitals.

use std::collections::HashMap;
use std::sync::Arc;

use super::spec::{catalogue, CommandKind, CommandSpec};
use crate::error::{Result, WireError};

/// Builder collecting command specs before the registry is sealed.
pub struct RegistryBuilder {
    by_name: HashMap<String, CommandSpec>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
        }
    }

    /// Register a spec under its wire name.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateCommand` if a spec with the same normalized name is
    /// already registered.
    pub fn register(&mut self, spec: CommandSpec) -> Result<()> {
        let key = normalize(spec.name);
        if self.by_name.contains_key(&key) {
            return Err(WireError::DuplicateCommand(spec.name.to_string()));
        }
        self.by_name.insert(key, spec);
        Ok(())
    }

    /// Seal the registry. No command may be registered afterwards.
    pub fn seal(self) -> Arc<CommandRegistry> {
        let by_kind = self
            .by_name
            .values()
            .map(|spec| (spec.kind, *spec))
            .collect();
        Arc::new(CommandRegistry {
            by_name: self.by_name,
            by_kind,
        })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The sealed, read-only catalogue of known commands.
pub struct CommandRegistry {
    by_name: HashMap<String, CommandSpec>,
    by_kind: HashMap<CommandKind, CommandSpec>,
}

impl CommandRegistry {
    /// Look up a spec by wire name (case-insensitive).
    pub fn lookup(&self, name: &str) -> Result<&CommandSpec> {
        self.by_name
            .get(&normalize(name))
            .ok_or_else(|| WireError::UnknownCommand(name.to_string()))
    }

    /// The spec for a locally-identified command kind.
    ///
    /// The protocol registry always contains every kind; a miss means the
    /// registry was built without it.
    pub fn spec_for(&self, kind: CommandKind) -> Result<&CommandSpec> {
        self.by_kind
            .get(&kind)
            .ok_or_else(|| WireError::UnknownCommand(kind.wire_name().to_string()))
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Build the sealed registry holding the full protocol catalogue.
pub fn protocol_registry() -> Arc<CommandRegistry> {
    let mut builder = RegistryBuilder::new();
    for spec in catalogue() {
        // distinct names by construction; the catalogue test pins this
        if let Err(e) = builder.register(spec) {
            unreachable!("catalogue registration failed: {}", e);
        }
    }
    builder.seal()
}
