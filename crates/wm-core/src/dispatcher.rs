use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use wm_db::{MessageState, MessageStateStore};

use crate::request::{MachineRequest, RequestAction};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("message queue is closed")]
    Closed,

    #[error("message state error: {0}")]
    Store(#[from] wm_db::Error),
}

/// Transport that eventually delivers a request to a worker.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, request: &MachineRequest, delay: Duration) -> Result<(), DispatchError>;
}

// ── ChannelQueue ────────────────────────────────────────────────────

pub type QueueReceiver = mpsc::UnboundedReceiver<String>;

/// In-process queue carrying JSON payloads to the worker.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelQueue {
    pub fn channel() -> (Self, QueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl MessageQueue for ChannelQueue {
    async fn publish(&self, request: &MachineRequest, delay: Duration) -> Result<(), DispatchError> {
        let payload = serde_json::to_string(request)?;

        if delay.is_zero() {
            return self.sender.send(payload).map_err(|_| DispatchError::Closed);
        }

        if self.sender.is_closed() {
            return Err(DispatchError::Closed);
        }

        let sender = self.sender.clone();
        let unique_id = request.unique_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(payload).is_err() {
                tracing::warn!(%unique_id, "queue closed before delayed message was delivered");
            }
        });
        Ok(())
    }
}

// ── Delays ──────────────────────────────────────────────────────────

/// How long each kind of message waits on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchDelays {
    pub check_is_active: Duration,
    pub get: Duration,
    /// Only applies to finds that re-dispatch themselves.
    pub find: Duration,
    /// Added on top for every retried message.
    pub retry: Duration,
}

impl Default for DispatchDelays {
    fn default() -> Self {
        Self {
            check_is_active: Duration::from_secs(10),
            get: Duration::ZERO,
            find: Duration::from_secs(10),
            retry: Duration::from_secs(5),
        }
    }
}

impl DispatchDelays {
    pub fn for_request(&self, request: &MachineRequest) -> Duration {
        let base = match request.action {
            RequestAction::CheckIsActive => self.check_is_active,
            RequestAction::Get => self.get,
            RequestAction::Find {
                re_dispatch_on_success: true,
                ..
            } => self.find,
            RequestAction::Find { .. } | RequestAction::Create | RequestAction::Delete => {
                Duration::ZERO
            }
        };

        if request.retry_count > 0 {
            base + self.retry
        } else {
            base
        }
    }
}

// ── RequestDispatcher ───────────────────────────────────────────────

/// Publishes requests and keeps their message state current.
#[derive(Clone)]
pub struct RequestDispatcher {
    queue: Arc<dyn MessageQueue>,
    messages: Arc<dyn MessageStateStore>,
    delays: DispatchDelays,
}

impl RequestDispatcher {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        messages: Arc<dyn MessageStateStore>,
        delays: DispatchDelays,
    ) -> Self {
        Self {
            queue,
            messages,
            delays,
        }
    }

    pub fn delays(&self) -> &DispatchDelays {
        &self.delays
    }

    /// Publish with the delay configured for the request's kind.
    pub async fn dispatch(&self, request: &MachineRequest) -> Result<(), DispatchError> {
        self.dispatch_after(request, self.delays.for_request(request))
            .await
    }

    pub async fn dispatch_after(
        &self,
        request: &MachineRequest,
        delay: Duration,
    ) -> Result<(), DispatchError> {
        self.messages
            .set_message_state(&request.unique_id, MessageState::Created)
            .await?;

        self.queue.publish(request, delay).await?;

        self.messages
            .set_message_state(&request.unique_id, MessageState::Dispatched)
            .await?;

        debug!(
            unique_id = %request.unique_id,
            machine_id = %request.machine_id,
            kind = request.kind(),
            retry_count = request.retry_count,
            delay_ms = delay.as_millis() as u64,
            "request dispatched"
        );
        Ok(())
    }

    /// Publish a chain in order, stopping at the first failure.
    pub async fn dispatch_all(&self, requests: &[MachineRequest]) -> Result<(), DispatchError> {
        for request in requests {
            self.dispatch(request).await?;
        }
        Ok(())
    }
}
