// =============================================================================
// Meridian Executor — safety-gated spot-trading execution control plane
// =============================================================================
//
// Pipeline: a decision engine (optional) appends trade intents to a durable
// outbox; the worker loop pops them one at a time and drives each through the
// execution controller (gates -> sizing -> entry -> OCO protection -> persisted
// link), while the OCO reconciler sweeps active links to their terminal
// outcome. All durable state lives in the SQLite store; the kill-switch oracle
// is absolute and fail-closed.
// =============================================================================

pub mod config;
pub mod context;
pub mod decision;
pub mod engine;
pub mod exchange;
pub mod kill_switch;
pub mod outbox;
pub mod reconcile;
pub mod signal;
pub mod startup;
pub mod store;
pub mod wallet;
pub mod worker;
