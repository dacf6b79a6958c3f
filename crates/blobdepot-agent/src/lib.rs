//! # blobdepot-agent: In-process blob request agent
//!
//! The agent accepts blob-storage operations from local clients, queues
//! them while its upstream depot is disconnected, enforces per-request
//! watchdog deadlines and dispatches each request through a typed
//! lifecycle (pending -> executing -> terminated with either success or
//! a taxonomised error).
//!
//! ## Execution model
//!
//! One agent instance is owned by one logical execution context (an
//! actor mailbox). [`Agent::step`] consumes an input event and returns
//! an [`AgentOutput`] with the replies, proxy forwards, depot commands
//! and timers for the runtime to deliver; the core performs no I/O and
//! reads no ambient clock, which keeps every path deterministic under
//! test.
//!
//! ## Key types
//!
//! - [`Agent`]: the state machine itself
//! - [`PendingQueue`]: byte-bounded FIFO of deferred client events
//! - [`QueryRegistry`]: lifecycle owner of in-flight queries
//! - [`ClientRequest`] / [`Reply`]: the closed request enumeration and
//!   its paired replies

pub mod agent;
pub mod clock;
pub mod depot;
pub mod error;
pub mod event;
pub mod pending;
pub mod query;


pub use agent::{Agent, AgentConfig, AgentEvent, AgentOutput, TimerKind, TimerRequest};
pub use clock::{Clock, ManualClock, SystemClock};
pub use depot::{DepotCommand, DepotError, DepotPayload, DepotResponse};
pub use error::AgentError;
pub use event::{ClientRequest, EventEnvelope, Reply, ReplyEnvelope, ReplyStatus};
pub use pending::PendingQueue;
pub use query::{Membership, QueryKey, QueryRegistry};
