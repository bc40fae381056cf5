//! Anonymous clarification queue.
//!
//! A requester flags a message as ambiguous; its author (the clarifier) is
//! walked through a private, time-bounded exchange: pick which pending message
//! to explain, write the explanation, and the requester receives the analyzed
//! tone. Each clarifier has one FIFO queue and at most one active driver.

mod collector;
mod engine;
mod error;
mod messages;
mod request;
mod store;
mod traits;

pub use collector::{CollectEnd, CollectOptions, CollectorHub, DirectReply, ReplyCollector};
pub use engine::{ClarificationEngine, EngineSettings, EnqueueOutcome, QueueRun, RunSummary};
pub use error::{ClarifyError, Stage};
pub use request::ClarificationRequest;
pub use store::{ClarificationQueue, ClarificationQueueStore, DriverLease, PendingSnapshot};
pub use traits::{DirectChannel, ToneAnalyzer};
