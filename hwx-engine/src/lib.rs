//! # hwx Engine
//!
//! Resolves free-form hardware identifiers to catalog entries and retrieves
//! their specifications from a tiered chain of sources.
//!
//! **Flow:** identifier → [`resolver`] → [`chain`] (one [`fetch`] per source)
//! → [`validator`] → [`catalog`]. [`pipeline::Pipeline`] wires the pieces
//! together for hosts.

pub mod allowlist;
pub mod cache;
pub mod catalog;
pub mod chain;
pub mod collaborators;
pub mod db;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod resolver;
pub mod spec_table;
pub mod types;
pub mod validator;

pub use error::{EngineError, EngineResult};
pub use pipeline::{LookupOutcome, Pipeline};
pub use resolver::{CatalogResolver, Resolution};
pub use types::{
    CanonicalEntry, ComponentCategory, MatchStrategy, ResolveCandidate, SourceTier, SpecField,
    SpecStatus,
};
