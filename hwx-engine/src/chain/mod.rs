//! Source chains and the manager that walks them

pub mod manager;
pub mod sources;

pub use manager::{
    AttemptOutcome, ChainOutcome, ChainReport, ChainSettings, FetchAttempt, SourceChainManager,
    SourceResult,
};
pub use sources::{LocatorTemplate, Source, SourceChain};
