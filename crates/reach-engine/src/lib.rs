//! Deterministic workflow execution core: DAG admission, virtual clock,
//! policy gating, and the run state machine that turns an
//! `ExecRequestPayload` into an `ExecResultPayload` with a reproducible
//! `result_digest`.

pub mod cancel;
pub mod clock;
pub mod cost;
pub mod dag;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod observer;
pub mod policy_eval;
pub mod replay_log;
pub mod rng;
pub mod run_id;
pub mod state;

pub use cancel::CancellationToken;
pub use dispatcher::EngineDispatcher;
pub use engine::{execute, execute_cancellable, replay, verify_replay};
pub use error::EngineError;
pub use observer::{Observer, ObserverSet, ReplayVerifyObserver};
pub use run_id::RunId;
