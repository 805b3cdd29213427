//! Fingerprinting, persisted state and skip decisions

pub mod evaluator;
pub mod fingerprint;
pub mod store;

pub use evaluator::{Decision, Directives, InvalidationReason, SkipCause, SkipEvaluator, TaskStatus};
pub use fingerprint::{HashMethod, Provenance, Signature};
pub use store::{FingerprintRecord, StateStore, DEFAULT_STATE_FILE};
