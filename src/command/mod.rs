//! Command module - the protocol catalogue, typed arguments, and registry.
//!
//! Provides:
//! - [`CommandSpec`] / [`CommandKind`] - pure schema values for the ten
//!   protocol commands (no behavior; handlers are bound separately)
//! - [`ArgValues`] - typed argument decoding against a spec's schema
//! - [`CommandRegistry`] - duplicate-checked, case-insensitive lookup,
//!   sealed at startup

mod args;
mod registry;
mod spec;

pub use args::{decode_fields, decode_value, encode_fields, encode_value, ArgValue, ArgValues};
pub use registry::{protocol_registry, CommandRegistry, RegistryBuilder};
pub use spec::{catalogue, ArgKind, CommandKind, CommandSpec, FieldSpec};
