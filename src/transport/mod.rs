pub mod playback;
pub mod siliconflow;
pub mod simulation;

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chat_manager::request::ChatRequest;
use crate::chat_manager::types::ChunkChannel;
use crate::config::ChatConfig;
use crate::error::{AppError, ChatError};
use crate::providers::ApiCredential;

pub use siliconflow::SiliconFlowTransport;
pub use simulation::SimulatedTransport;

pub fn build_client(timeout_ms: Option<u64>) -> Result<reqwest::Client, AppError> {
    let mut builder = reqwest::Client::builder();
    if let Some(ms) = timeout_ms {
        builder = builder.timeout(Duration::from_millis(ms));
    }
    builder.build().map_err(AppError::from)
}

/// Authoritative figures reported when an exchange finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Filled by backends that bill per request; otherwise priced from the catalog.
    pub cost: Option<f64>,
    pub usage: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    Chunk { text: String, channel: ChunkChannel },
    Complete(CompletionUsage),
    Failed(ChatError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub exchange_id: String,
    pub kind: TransportEventKind,
}

/// Where a backend delivers events for one exchange. Nothing is delivered once cancelled.
#[derive(Clone)]
pub struct EventSink {
    exchange_id: String,
    tx: UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(
        exchange_id: impl Into<String>,
        tx: UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            tx,
            cancel,
        }
    }

    pub fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    fn emit(&self, kind: TransportEventKind) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx
            .send(TransportEvent {
                exchange_id: self.exchange_id.clone(),
                kind,
            })
            .is_ok()
    }

    pub fn chunk(&self, channel: ChunkChannel, text: impl Into<String>) -> bool {
        self.emit(TransportEventKind::Chunk {
            text: text.into(),
            channel,
        })
    }

    pub fn complete(&self, usage: CompletionUsage) -> bool {
        self.emit(TransportEventKind::Complete(usage))
    }

    pub fn fail(&self, error: ChatError) -> bool {
        self.emit(TransportEventKind::Failed(error))
    }
}

/// Handle to one in-flight exchange.
pub struct TransportHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Stops the exchange. No event is delivered after this returns.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A completion backend. `send` must be called from within a tokio runtime.
pub trait Transport: Send + Sync {
    fn send(&self, request: ChatRequest, sink: EventSink) -> TransportHandle;
}

/// Real transport when a key is configured, the local simulator otherwise.
pub fn for_credential(
    credential: Option<ApiCredential>,
    config: &ChatConfig,
) -> Result<Arc<dyn Transport>, AppError> {
    match credential {
        Some(credential) => Ok(Arc::new(SiliconFlowTransport::new(credential, config)?)),
        None => {
            crate::utils::log_info("transport", "no api key configured; using local simulation");
            Ok(Arc::new(SimulatedTransport::new(config)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_sink_goes_silent_after_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let sink = EventSink::new("ex-1", tx, cancel.clone());

        assert!(sink.chunk(ChunkChannel::Final, "a"));
        cancel.cancel();
        assert!(!sink.chunk(ChunkChannel::Final, "b"));
        assert!(!sink.fail(ChatError::Busy));
        drop(sink);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.exchange_id, "ex-1");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_marks_handle_closed() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(async {});
        let mut handle = TransportHandle::new(cancel.clone(), task);
        assert!(!handle.is_closed());
        handle.close();
        assert!(handle.is_closed());
        assert!(cancel.is_cancelled());
    }
}
