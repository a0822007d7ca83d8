//! # Delivery Core
//!
//! The daily hand-off from a cloud folder to a messaging group.
//!
//! ## Components
//!
//! - [`DeliveryQueue`]: the pending folder as a FIFO queue (peek, fetch,
//!   acknowledge by moving to the delivered folder)
//! - [`MessagingSession`]: pairing/ready state machine over a
//!   `MessagingTransport`, owner of the persisted session material
//! - [`DeliveryPipeline`]: one guarded attempt per trigger, returning a
//!   [`RunOutcome`]
//! - [`DailyScheduler`]: cron trigger in an IANA timezone driving the
//!   pipeline until shutdown
//!
//! ## Usage
//!
//! ```rust,ignore
//! let queue = Arc::new(DeliveryQueue::new(drive, pending, delivered, scratch_dir));
//! let session = Arc::new(MessagingSession::new(transport, session_store, display));
//! session.start().await?;
//!
//! let pipeline = Arc::new(DeliveryPipeline::new(queue, session, destination));
//! DailyScheduler::new(DailyTrigger::new("0 0 8 * * *", chrono_tz::UTC)?, pipeline)
//!     .run(shutdown)
//!     .await?;
//! ```

pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;
pub mod session;

pub use error::{DeliveryError, Result};
pub use orchestrator::{DeliveryPipeline, RunOutcome};
pub use queue::{AckOutcome, DeliveryQueue, QueueItem, IMAGE_MIME_PREFIX, SCRATCH_FILE_NAME};
pub use scheduler::{DailyScheduler, DailyTrigger};
pub use session::{MessagingSession, SessionState, SESSION_MATERIAL_KEY};
