pub mod orchestrator;
pub mod retry_queue;

pub use orchestrator::{is_admitted, rider_suppression, FrameOrchestrator, FrameReport};
pub use retry_queue::{OverflowPolicy, PlateReader, RetryJob, RetryOutcome, RetryQueue, SubmitOutcome};
