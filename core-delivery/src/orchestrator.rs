//! # Delivery Pipeline
//!
//! One attempt per trigger: peek → fetch → send → acknowledge.
//!
//! ## Failure containment
//!
//! Every failure ends the run and is reported through the returned
//! [`RunOutcome`], `tracing` and the event bus; nothing propagates to the
//! scheduler. Acknowledge only ever follows a confirmed send, so:
//!
//! - failure before send leaves the item pending (retried next run)
//! - failure after send but before acknowledge leaves it pending too, and it
//!   is sent again next run (duplicate, never lost)

use crate::error::DeliveryError;
use crate::queue::{AckOutcome, DeliveryQueue, QueueItem};
use crate::session::MessagingSession;
use bridge_traits::messaging::OutgoingMedia;
use core_runtime::config::Destination;
use core_runtime::events::{CoreEvent, DeliveryEvent, EventBus};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Where a run stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another run was in progress; this one did nothing
    AlreadyRunning,
    /// The messaging session was not ready; no queue access happened
    SessionNotReady,
    /// The pending folder holds no image
    NothingToSend,
    /// Listing the pending folder failed
    PeekFailed { error: String },
    /// Download failed; the item stays pending
    FetchFailed { item_id: String, error: String },
    /// Send failed; the item stays pending
    SendFailed { item_id: String, error: String },
    /// Sent but not moved; the item will be sent again next run
    AcknowledgeFailed { item_id: String, error: String },
    Delivered { item_id: String, item_name: String },
}

impl RunOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, RunOutcome::Delivered { .. })
    }

    /// Stage name used in events and logs
    pub fn stage(&self) -> &'static str {
        match self {
            RunOutcome::AlreadyRunning => "guard",
            RunOutcome::SessionNotReady => "session",
            RunOutcome::NothingToSend | RunOutcome::PeekFailed { .. } => "peek",
            RunOutcome::FetchFailed { .. } => "fetch",
            RunOutcome::SendFailed { .. } => "send",
            RunOutcome::AcknowledgeFailed { .. } | RunOutcome::Delivered { .. } => "acknowledge",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::AlreadyRunning => write!(f, "another run is in progress"),
            RunOutcome::SessionNotReady => write!(f, "messaging session not ready"),
            RunOutcome::NothingToSend => write!(f, "nothing to send"),
            RunOutcome::PeekFailed { error } => write!(f, "peek failed: {}", error),
            RunOutcome::FetchFailed { item_id, error } => {
                write!(f, "fetch of {} failed: {}", item_id, error)
            }
            RunOutcome::SendFailed { item_id, error } => {
                write!(f, "send of {} failed: {}", item_id, error)
            }
            RunOutcome::AcknowledgeFailed { item_id, error } => {
                write!(f, "acknowledge of {} failed: {}", item_id, error)
            }
            RunOutcome::Delivered { item_name, .. } => write!(f, "delivered {}", item_name),
        }
    }
}

/// Clears the in-progress flag when the run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DeliveryPipeline {
    queue: Arc<DeliveryQueue>,
    session: Arc<MessagingSession>,
    destination: Destination,
    event_bus: Option<EventBus>,
    running: AtomicBool,
}

impl DeliveryPipeline {
    pub fn new(
        queue: Arc<DeliveryQueue>,
        session: Arc<MessagingSession>,
        destination: Destination,
    ) -> Self {
        Self {
            queue,
            session,
            destination,
            event_bus: None,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn session(&self) -> &Arc<MessagingSession> {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Make one delivery attempt
    pub async fn run_once(&self) -> RunOutcome {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("delivery_run", run_id = %run_id);

        async {
            let Some(_guard) = RunGuard::acquire(&self.running) else {
                warn!("Delivery run already in progress, skipping");
                let outcome = RunOutcome::AlreadyRunning;
                self.report(&run_id, &outcome);
                return outcome;
            };

            self.emit(DeliveryEvent::RunStarted {
                run_id: run_id.clone(),
            });
            info!("Delivery run started");

            let outcome = self.attempt().await;
            self.report(&run_id, &outcome);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self) -> RunOutcome {
        if !self.session.is_ready() {
            return RunOutcome::SessionNotReady;
        }

        let item = match self.queue.peek_oldest().await {
            Ok(Some(item)) => item,
            Ok(None) => return RunOutcome::NothingToSend,
            Err(e) => {
                log_failure("peek", &e);
                return RunOutcome::PeekFailed {
                    error: e.to_string(),
                };
            }
        };
        info!(item_id = %item.id, name = %item.name, "Selected oldest pending image");

        let path = match self.queue.fetch_content(&item).await {
            Ok(path) => path,
            Err(e) => {
                log_failure("fetch", &e);
                return RunOutcome::FetchFailed {
                    item_id: item.id,
                    error: e.to_string(),
                }
            }
        };

        let media = OutgoingMedia {
            path,
            mime_type: item.mime_type.clone(),
            file_name: item.name.clone(),
        };
        if let Err(e) = self.session.send(&self.destination, &media).await {
            log_failure("send", &e);
            return RunOutcome::SendFailed {
                item_id: item.id,
                error: e.to_string(),
            };
        }

        self.acknowledge(item).await
    }

    async fn acknowledge(&self, item: QueueItem) -> RunOutcome {
        match self
            .queue
            .acknowledge(&item, self.queue.delivered_folder_id())
            .await
        {
            Ok(AckOutcome::Moved) | Ok(AckOutcome::AlreadyAcknowledged) => RunOutcome::Delivered {
                item_id: item.id,
                item_name: item.name,
            },
            Err(e) => RunOutcome::AcknowledgeFailed {
                item_id: item.id,
                error: e.to_string(),
            },
        }
    }

    fn report(&self, run_id: &str, outcome: &RunOutcome) {
        let run_id = run_id.to_string();
        let event = match outcome {
            RunOutcome::Delivered { item_id, item_name } => {
                info!(item_id = %item_id, name = %item_name, "Image delivered");
                DeliveryEvent::Delivered {
                    run_id,
                    item_id: item_id.clone(),
                    item_name: item_name.clone(),
                }
            }
            RunOutcome::AlreadyRunning | RunOutcome::SessionNotReady => {
                warn!(reason = %outcome, "Delivery run skipped");
                DeliveryEvent::Skipped {
                    run_id,
                    reason: outcome.to_string(),
                }
            }
            RunOutcome::NothingToSend => {
                info!("Nothing to send");
                DeliveryEvent::Skipped {
                    run_id,
                    reason: outcome.to_string(),
                }
            }
            RunOutcome::AcknowledgeFailed { item_id, error } => {
                error!(
                    item_id = %item_id,
                    error = %error,
                    "Image sent but not moved to the delivered folder; it will be sent again"
                );
                self.failed(run_id, outcome, error)
            }
            RunOutcome::PeekFailed { error }
            | RunOutcome::FetchFailed { error, .. }
            | RunOutcome::SendFailed { error, .. } => self.failed(run_id, outcome, error),
        };

        self.emit(event);
    }

    fn failed(&self, run_id: String, outcome: &RunOutcome, error: &str) -> DeliveryEvent {
        DeliveryEvent::Failed {
            run_id,
            stage: outcome.stage().to_string(),
            message: error.to_string(),
        }
    }

    fn emit(&self, event: DeliveryEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Delivery(event)).ok();
        }
    }
}

/// Failures the next run cannot get past on its own are logged as errors
fn log_failure(stage: &'static str, error: &DeliveryError) {
    if error.is_recoverable() {
        warn!(stage, error = %error, "Delivery run failed, item stays pending");
    } else {
        error!(stage, error = %error, "Delivery run failed and needs operator attention");
    }
}
