//! Streaming emitter
//!
//! Turns router state transitions into an ordered event sequence. A
//! [`EventStream`] is lazy: the router run starts on first poll. Dropping the
//! stream cancels the run before its next invocation. A run that ends
//! without a final answer, panics included, still yields a failed one.

use crate::event_bus::EventBus;
use crate::router::{FinalAnswer, FinalStatus};
use crate::session::FailureKind;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};
use uuid::Uuid;

/// Maximum characters of specialist output carried in an event preview
pub const PREVIEW_CHARS: usize = 200;

/// One router state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// A specialist invocation is starting
    InvokeStarted {
        /// Task identifier
        task_id: Uuid,
        /// Invocation number within the task, from 1
        step: usize,
        /// Attempt number for the planned step, from 1
        attempt: usize,
        /// Specialist being invoked
        specialist_id: String,
        /// Instruction sent, without forwarded context
        sub_task: String,
    },
    /// A specialist invocation finished
    InvokeResult {
        /// Task identifier
        task_id: Uuid,
        /// Invocation number within the task, from 1
        step: usize,
        /// Specialist invoked
        specialist_id: String,
        /// Whether the invocation succeeded
        success: bool,
        /// Recorded failure, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<FailureKind>,
        /// Sequence number of the recorded turn
        turn_seq: u64,
        /// Wall time in milliseconds
        duration_ms: u64,
        /// Leading part of the output or error summary
        preview: String,
    },
    /// The task ended
    Final {
        /// Task identifier
        task_id: Uuid,
        /// Final answer
        answer: FinalAnswer,
    },
}

impl DispatchEvent {
    /// Whether this event ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. })
    }

    /// Task the event belongs to
    #[must_use]
    pub fn task_id(&self) -> Uuid {
        match self {
            Self::InvokeStarted { task_id, .. }
            | Self::InvokeResult { task_id, .. }
            | Self::Final { task_id, .. } => *task_id,
        }
    }
}

/// Leading characters of `text`, cut on a char boundary
#[must_use]
pub fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => format!("{}…", &text[..end]),
        None => text.to_string(),
    }
}

/// Sink for router events
#[derive(Debug, Clone)]
pub struct Emitter {
    sender: Option<mpsc::Sender<DispatchEvent>>,
    cancel: CancellationToken,
    bus: Option<(EventBus, String)>,
}

impl Emitter {
    /// Emitter that only observes cancellation, for synchronous runs
    #[must_use]
    pub fn silent() -> Self {
        Self {
            sender: None,
            cancel: CancellationToken::new(),
            bus: None,
        }
    }

    /// Emitter feeding a bounded channel
    #[must_use]
    pub fn channel(sender: mpsc::Sender<DispatchEvent>, cancel: CancellationToken) -> Self {
        Self {
            sender: Some(sender),
            cancel,
            bus: None,
        }
    }

    /// Also publish every event on `bus` for `session_id`
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus, session_id: impl Into<String>) -> Self {
        self.bus = Some((bus, session_id.into()));
        self
    }

    /// Emit one event, waiting for channel capacity
    ///
    /// A closed channel means the consumer went away, which cancels the run.
    pub async fn emit(&self, event: DispatchEvent) {
        if let Some((bus, session_id)) = &self.bus {
            bus.publish(session_id, event.clone());
        }
        if let Some(sender) = &self.sender {
            if sender.send(event).await.is_err() {
                debug!("Event consumer disconnected, cancelling run");
                self.cancel.cancel();
            }
        }
    }

    /// Whether the run should stop before its next invocation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation token shared with the stream
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

type RunFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Lazy, finite, non-restartable stream of dispatch events
///
/// The terminal item is always a [`DispatchEvent::Final`]; the stream ends
/// right after it.
pub struct EventStream {
    run: Option<RunFuture>,
    handle: Option<JoinHandle<()>>,
    receiver: mpsc::Receiver<DispatchEvent>,
    task_id: Option<Uuid>,
    finished: bool,
    _cancel_on_drop: DropGuard,
}

impl EventStream {
    /// Build a stream whose events come from `run`
    ///
    /// `run` is called immediately to build the future, but the future is
    /// only spawned when the stream is first polled.
    pub fn new<F, Fut>(buffer: usize, run: F) -> Self
    where
        F: FnOnce(Emitter) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        let emitter = Emitter::channel(sender, cancel.clone());
        Self {
            run: Some(Box::pin(run(emitter))),
            handle: None,
            receiver,
            task_id: None,
            finished: false,
            _cancel_on_drop: cancel.drop_guard(),
        }
    }

    /// Whether the run has been started
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.run.is_none()
    }
}

impl EventStream {
    /// Final answer for a run that stopped without emitting one
    fn abandoned(&self, reason: String) -> DispatchEvent {
        let task_id = self.task_id.unwrap_or_else(Uuid::new_v4);
        DispatchEvent::Final {
            task_id,
            answer: FinalAnswer {
                task_id,
                text: reason,
                status: FinalStatus::Failed,
                specialists: Vec::new(),
                invocations: 0,
            },
        }
    }
}

impl Stream for EventStream {
    type Item = DispatchEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if let Some(run) = this.run.take() {
            this.handle = Some(tokio::spawn(run));
        }

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    this.finished = true;
                } else {
                    this.task_id = Some(event.task_id());
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                // Every sender is gone but no final answer arrived.
                let reason = match this.handle.as_mut() {
                    Some(handle) => match Pin::new(handle).poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Ok(())) => "The task ended without an answer.".to_string(),
                        Poll::Ready(Err(error)) => {
                            warn!(error = %error, "Dispatch run aborted");
                            format!("The task failed unexpectedly: {}", error)
                        }
                    },
                    None => "The task ended without an answer.".to_string(),
                };
                this.handle = None;
                this.finished = true;
                Poll::Ready(Some(this.abandoned(reason)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("started", &self.is_started())
            .field("task_id", &self.task_id)
            .field("finished", &self.finished)
            .finish()
    }
}
