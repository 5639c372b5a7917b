//! Streaming chat session engine for Docent.
//!
//! # Architecture
//!
//! - [`progress`] - [`ProgressAggregator`]: per-document summarization progress
//! - [`registry`] - [`ActiveStreamRegistry`]: bounded cache of generations
//!   whose view has moved on, shared through [`SharedRegistry`]
//! - [`generation`] - [`Generation`]: reducer from stream events to effects
//! - [`orchestrator`] - [`SessionOrchestrator`]: the session state machine
//!
//! The engine has no UI dependencies. Views subscribe to
//! [`SessionSnapshot`]s, [`ProgressSnapshot`]s and [`SessionEvent`]s.

mod error;
pub mod generation;
mod notices;
pub mod orchestrator;
pub mod progress;
pub mod registry;
mod snapshot;


pub use docent_client;
pub use error::SessionError;
pub use generation::{Effect, Generation, Outcome, Phase};
pub use notices::{Notice, NoticeLog};
pub use orchestrator::SessionOrchestrator;
pub use progress::{Delivery, ProgressAggregator, ProgressSnapshot, ProgressUpdate};
pub use registry::{ActiveStreamEntry, ActiveStreamRegistry, RegistryLimits, SharedRegistry};
pub use snapshot::{SessionEvent, SessionSnapshot};
