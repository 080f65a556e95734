//! Presence resolution over the host's live entity-state table.
//!
//! This crate turns loosely-typed upstream state into:
//! - a best-effort coordinate per entity ([`resolver`]), trying direct
//!   attributes, then a referenced source entity, then a zone-name hint;
//! - the ordered set of tracked people ([`persons`]).

pub mod persons;
pub mod resolver;
pub mod state;
pub mod zones;

pub use persons::*;
pub use resolver::*;
pub use state::*;
pub use zones::*;
