//! Trust-minimized weather oracle for parametric insurance
//!
//! Given a geographic point and a set of trigger predicates, the oracle
//! computes a consensus weather value with a confidence score and a
//! cryptographically-bound audit trail, then evaluates policy triggers to
//! decide whether a payout is owed.
//!
//! - Multi-source fetch layer with rate limiting and caching
//! - MAD-based outlier filtering plus reliability-weighted averaging
//! - Task lifecycle FSM with deterministic operator selection and quorum
//! - Parametric claims evaluation with consecutive-day and time-window logic

pub mod aggregator;
pub mod claims;
pub mod config;
pub mod consensus;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod oracle;
pub mod router;
pub mod server;
pub mod sources;
pub mod types;

// Re-exports for convenience
pub use aggregator::Aggregator;
pub use claims::ClaimsProcessor;
pub use config::Config;
pub use consensus::ConsensusEngine;
pub use error::OracleError;
pub use executor::{Executor, ExecutorPool};
pub use oracle::Oracle;
pub use router::TaskRouter;
pub use sources::{SourceRegistry, WeatherCache, WeatherSource};
