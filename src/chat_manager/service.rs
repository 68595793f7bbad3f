use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::attachments::validate_attachments;
use super::classify::{is_error_message, APOLOGY_TEXT};
use super::request::{build_request, ChatRequest};
use super::types::{
    AssistantMessage, Attachment, ChunkChannel, Message, Session, SessionTotals, TokenUsage,
    UserMessage,
};
use crate::abort_manager::AbortRegistry;
use crate::config::{ChatConfig, Scenario};
use crate::error::{ChatError, TransportFailureKind};
use crate::models::pricing::calculate_cost_with;
use crate::models::ModelCatalog;
use crate::storage_manager::kv::KvStore;
use crate::storage_manager::sessions::{resume_session, save_session, HistoryRecord};
use crate::transport::{
    CompletionUsage, EventSink, Transport, TransportEvent, TransportEventKind, TransportHandle,
};
use crate::usage::{record_exchange, recompute_session_totals, UsageDelta, UsageRepository};
use crate::utils::{
    log_debug, log_error, log_info, log_warn, new_exchange_id, new_message_id, now_millis,
};

/// Sent in place of an empty question that only carries images.
const IMAGE_ONLY_PROMPT: &str = "请分析这些图片";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    Idle,
    Sending,
    Receiving { channel: ChunkChannel, retrying: bool },
    /// Sends stay blocked until the cooldown elapses.
    Errored { until: Instant },
}

/// Transient notification for a failed exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub message_id: String,
    pub error: ChatError,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    Progress {
        message_id: String,
        channel: ChunkChannel,
    },
    Completed {
        message_id: String,
        prompt_tokens: u64,
        completion_tokens: u64,
        cost: f64,
    },
    Failed(Notice),
    /// Event for an exchange that is no longer active.
    Ignored,
}

impl ExchangeOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed(_))
    }
}

struct ActiveExchange {
    exchange_id: String,
    assistant_id: String,
    user_id: String,
    handle: TransportHandle,
    cancel: CancellationToken,
}

enum Wake {
    Cancelled,
    Event(Option<TransportEvent>),
}

/// Drives exchanges for one session. The only writer of in-flight message fields.
pub struct ChatOrchestrator {
    session: Session,
    catalog: ModelCatalog,
    scenario: Scenario,
    config: ChatConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn KvStore>,
    aborts: AbortRegistry,
    phase: ExchangePhase,
    active: Option<ActiveExchange>,
    events_tx: UnboundedSender<TransportEvent>,
    events_rx: UnboundedReceiver<TransportEvent>,
}

impl ChatOrchestrator {
    pub fn new(
        session: Session,
        catalog: ModelCatalog,
        scenario: Scenario,
        config: ChatConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KvStore>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            session,
            catalog,
            scenario,
            config,
            transport,
            store,
            aborts: AbortRegistry::new(),
            phase: ExchangePhase::Idle,
            active: None,
            events_tx,
            events_rx,
        }
    }

    /// Starts a fresh session on `model_id`.
    pub fn start(
        model_id: &str,
        catalog: ModelCatalog,
        scenario: Scenario,
        config: ChatConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KvStore>,
    ) -> Self {
        let session = Session::new(
            uuid::Uuid::new_v4().to_string(),
            model_id.to_string(),
            scenario.id.clone(),
            now_millis(),
        );
        log_info(
            "chat",
            format!("started session {} on {}", session.id, model_id),
        );
        Self::new(session, catalog, scenario, config, transport, store)
    }

    pub fn resume(
        record: &HistoryRecord,
        catalog: ModelCatalog,
        scenario: Scenario,
        config: ChatConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KvStore>,
    ) -> Self {
        let session = resume_session(record, &catalog);
        log_info(
            "chat",
            format!(
                "resumed session {} with {} messages",
                session.id,
                session.messages.len()
            ),
        );
        Self::new(session, catalog, scenario, config, transport, store)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn totals(&self) -> SessionTotals {
        self.session.totals
    }

    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    pub fn abort_registry(&self) -> AbortRegistry {
        self.aborts.clone()
    }

    pub fn active_exchange_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.exchange_id.as_str())
    }

    pub fn is_idle(&self) -> bool {
        match self.phase {
            ExchangePhase::Idle => true,
            ExchangePhase::Errored { until } => Instant::now() >= until,
            ExchangePhase::Sending | ExchangePhase::Receiving { .. } => false,
        }
    }

    fn ensure_idle(&mut self) -> Result<(), ChatError> {
        if !self.is_idle() {
            return Err(ChatError::Busy);
        }
        self.phase = ExchangePhase::Idle;
        Ok(())
    }

    /// Ids of messages that should offer a retry.
    pub fn error_message_ids(&self) -> Vec<String> {
        let now = now_millis();
        self.session
            .messages
            .iter()
            .filter(|m| is_error_message(m, now, self.config.stuck_stream_timeout_ms))
            .map(|m| m.id().to_string())
            .collect()
    }

    fn pricing(&self) -> crate::models::ModelPricing {
        self.catalog.pricing_or_fallback(&self.session.model_id)
    }

    /// Appends the user turn and a streaming placeholder, then issues the request.
    ///
    /// Returns the placeholder id. Nothing is appended when this fails.
    pub fn send_exchange(
        &mut self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<String, ChatError> {
        self.ensure_idle()?;

        let trimmed = text.trim();
        if trimmed.is_empty() && attachments.is_empty() {
            return Err(ChatError::EmptyInput);
        }
        let attachments = validate_attachments(
            &attachments,
            self.config.max_attachments,
            self.config.max_attachment_bytes,
        )
        .map_err(|err| {
            log_warn("chat", format!("send rejected: {}", err));
            err
        })?;
        let content = if trimmed.is_empty() {
            IMAGE_ONLY_PROMPT.to_string()
        } else {
            trimmed.to_string()
        };

        self.phase = ExchangePhase::Sending;
        let user_id = new_message_id();
        let now = now_millis();
        let appended = self.session.messages.append(Message::User(UserMessage {
            id: user_id.clone(),
            content,
            attachments,
            usage: TokenUsage::default(),
            cost: None,
            created_at: now,
        }));
        if let Err(err) = appended {
            self.phase = ExchangePhase::Idle;
            return Err(err);
        }

        let request = build_request(
            &self.session.model_id,
            &self.catalog,
            &self.config,
            &self.scenario.system_prompt,
            self.session.messages.as_slice(),
        );

        let assistant_id = new_message_id();
        let thinking = self.catalog.is_thinking(&self.session.model_id);
        let placeholder = Message::Assistant(AssistantMessage::placeholder(
            assistant_id.clone(),
            thinking,
            now,
        ));
        if let Err(err) = self.session.messages.append(placeholder) {
            self.phase = ExchangePhase::Idle;
            return Err(err);
        }
        self.session.updated_at = now;

        self.start_exchange(request, &assistant_id, &user_id, false);
        Ok(assistant_id)
    }

    /// Re-issues the exchange that produced `message_id`, replacing its content in place.
    pub fn retry_exchange(&mut self, message_id: &str) -> Result<(), ChatError> {
        self.ensure_idle()?;

        let index = self
            .session
            .messages
            .position(message_id)
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
        if self.session.messages.as_slice()[index].as_assistant().is_none() {
            return Err(ChatError::MessageNotFound(message_id.to_string()));
        }
        let user_id = self
            .session
            .messages
            .last_user_before(index)
            .map(|(_, user)| user.id.clone())
            .ok_or(ChatError::NoUserMessage)?;

        let request = build_request(
            &self.session.model_id,
            &self.catalog,
            &self.config,
            &self.scenario.system_prompt,
            &self.session.messages.as_slice()[..index],
        );

        let thinking = self.catalog.is_thinking(&self.session.model_id);
        self.session
            .messages
            .patch_assistant(message_id, |a| a.begin_retry(thinking, now_millis()))?;
        self.session.totals = recompute_session_totals(&self.session.messages, &self.pricing());

        log_info("chat", format!("retrying {}", message_id));
        self.start_exchange(request, message_id, &user_id, true);
        Ok(())
    }

    fn start_exchange(
        &mut self,
        request: ChatRequest,
        assistant_id: &str,
        user_id: &str,
        retrying: bool,
    ) {
        let exchange_id = new_exchange_id();
        let cancel = self.aborts.register(&exchange_id);
        let sink = EventSink::new(exchange_id.clone(), self.events_tx.clone(), cancel.clone());
        let handle = self.transport.send(request, sink);

        let thinking = self.catalog.is_thinking(&self.session.model_id);
        self.phase = ExchangePhase::Receiving {
            channel: if thinking {
                ChunkChannel::Reasoning
            } else {
                ChunkChannel::Final
            },
            retrying,
        };
        log_debug(
            "chat",
            format!("exchange {} started for {}", exchange_id, assistant_id),
        );
        self.active = Some(ActiveExchange {
            exchange_id,
            assistant_id: assistant_id.to_string(),
            user_id: user_id.to_string(),
            handle,
            cancel,
        });
    }

    /// Applies one transport event. Events from closed or superseded exchanges are dropped.
    pub fn apply_event(&mut self, event: TransportEvent) -> ExchangeOutcome {
        let (assistant_id, retrying) = match (&self.active, self.phase) {
            (Some(active), phase)
                if active.exchange_id == event.exchange_id && !active.cancel.is_cancelled() =>
            {
                let retrying = matches!(phase, ExchangePhase::Receiving { retrying: true, .. });
                (active.assistant_id.clone(), retrying)
            }
            _ => {
                log_debug(
                    "chat",
                    format!("dropping late event for exchange {}", event.exchange_id),
                );
                return ExchangeOutcome::Ignored;
            }
        };

        match event.kind {
            TransportEventKind::Chunk { text, channel } => {
                match self
                    .session
                    .messages
                    .patch_assistant(&assistant_id, |a| a.append_chunk(channel, &text))
                {
                    Ok(true) => {
                        self.phase = ExchangePhase::Receiving { channel, retrying };
                        ExchangeOutcome::Progress {
                            message_id: assistant_id,
                            channel,
                        }
                    }
                    Ok(false) => ExchangeOutcome::Ignored,
                    Err(err) => self.finish_failure(err),
                }
            }
            TransportEventKind::Complete(usage) => self.finish_success(usage),
            TransportEventKind::Failed(err) => self.finish_failure(err),
        }
    }

    fn take_active(&mut self) -> Option<ActiveExchange> {
        let active = self.active.take()?;
        self.aborts.unregister(&active.exchange_id);
        Some(active)
    }

    fn finish_success(&mut self, usage: CompletionUsage) -> ExchangeOutcome {
        let Some(active) = self.take_active() else {
            return ExchangeOutcome::Ignored;
        };

        let pricing = self.pricing();
        let prompt = usage.prompt_tokens;
        let completion = usage.completion_tokens;
        let cost = usage
            .cost
            .unwrap_or_else(|| calculate_cost_with(&pricing, prompt, completion).total_cost);

        let patched = self.session.messages.patch_assistant(&active.assistant_id, |a| {
            a.complete(
                TokenUsage {
                    tokens: Some(prompt + completion),
                    prompt_tokens: Some(prompt),
                    completion_tokens: Some(completion),
                },
                cost,
                Some(usage.usage.clone()),
            )
        });
        if let Err(err) = patched {
            log_error("chat", format!("completed message vanished: {}", err));
        }

        // The user's share is only known once the full context has been tokenized.
        let backfilled = self.session.messages.patch_user(&active.user_id, |u| {
            u.usage.tokens = Some(prompt);
            u.usage.prompt_tokens = Some(prompt);
        });
        if let Err(err) = backfilled {
            log_warn("chat", format!("could not back-fill user tokens: {}", err));
        }

        self.phase = ExchangePhase::Idle;

        let repo = UsageRepository::new(self.store.as_ref());
        let loaded = repo.load_for_update();
        if let Err(err) = &loaded {
            log_error("usage", format!("usage stats unreadable, not updating: {}", err));
        }
        let writable = loaded.is_ok();
        let mut stats = loaded.unwrap_or_default();
        let delta = UsageDelta {
            tokens: prompt + completion,
            cost,
        };
        let changed = record_exchange(
            &mut self.session,
            &mut stats,
            delta,
            chrono::Utc::now(),
            &pricing,
        );
        if changed && writable {
            if let Err(err) = repo.save(&stats) {
                log_error("usage", format!("failed to save usage stats: {}", err));
            }
        }
        if let Err(err) = self.persist() {
            log_error("storage", format!("failed to save session: {}", err));
        }

        log_info(
            "chat",
            format!(
                "exchange {} completed: prompt={} completion={} cost={:.6}",
                active.exchange_id, prompt, completion, cost
            ),
        );
        ExchangeOutcome::Completed {
            message_id: active.assistant_id,
            prompt_tokens: prompt,
            completion_tokens: completion,
            cost,
        }
    }

    fn finish_failure(&mut self, error: ChatError) -> ExchangeOutcome {
        let Some(mut active) = self.take_active() else {
            return ExchangeOutcome::Ignored;
        };
        active.handle.close();

        if let Err(err) = self
            .session
            .messages
            .patch_assistant(&active.assistant_id, |a| a.fail(APOLOGY_TEXT))
        {
            log_error("chat", format!("failed message vanished: {}", err));
        }
        self.session.totals = recompute_session_totals(&self.session.messages, &self.pricing());
        self.phase = ExchangePhase::Errored {
            until: Instant::now() + self.config.error_cooldown(),
        };

        log_warn(
            "chat",
            format!("exchange {} failed: {}", active.exchange_id, error),
        );
        ExchangeOutcome::Failed(Notice {
            message_id: active.assistant_id,
            text: error.user_message(),
            error,
        })
    }

    /// Waits for the next event of the active exchange. `None` when nothing is in flight.
    pub async fn next_event(&mut self) -> Option<ExchangeOutcome> {
        loop {
            let cancel = self.active.as_ref()?.cancel.clone();
            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wake::Cancelled,
                event = self.events_rx.recv() => Wake::Event(event),
            };
            match wake {
                Wake::Cancelled => {
                    return Some(self.finish_failure(ChatError::TransportFailure(
                        TransportFailureKind::Aborted,
                    )))
                }
                Wake::Event(None) => return None,
                Wake::Event(Some(event)) => match self.apply_event(event) {
                    ExchangeOutcome::Ignored => continue,
                    outcome => return Some(outcome),
                },
            }
        }
    }

    /// Drives the active exchange to its terminal outcome.
    pub async fn run_exchange(&mut self) -> Option<ExchangeOutcome> {
        while let Some(outcome) = self.next_event().await {
            if outcome.is_terminal() {
                return Some(outcome);
            }
        }
        None
    }

    /// Cancels the active exchange. The next `next_event` reports it as aborted.
    pub fn abort_exchange(&self) -> bool {
        match &self.active {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Records the user's choice; later reasoning chunks never override it.
    pub fn toggle_reasoning(&mut self, message_id: &str, expanded: bool) -> Result<(), ChatError> {
        self.session
            .messages
            .patch_assistant(message_id, |a| a.set_reasoning_expanded(expanded))
    }

    pub fn clear_conversation(&mut self) -> Result<(), ChatError> {
        self.ensure_idle()?;
        self.session.messages.clear();
        self.session.totals = SessionTotals::default();
        self.session.updated_at = now_millis();
        log_info("chat", format!("cleared session {}", self.session.id));
        Ok(())
    }

    /// Closes any in-flight exchange without delivering further events, then saves.
    pub fn teardown(&mut self) -> Result<bool, ChatError> {
        if let Some(mut active) = self.take_active() {
            active.handle.close();
            if let Err(err) = self
                .session
                .messages
                .patch_assistant(&active.assistant_id, |a| a.fail(APOLOGY_TEXT))
            {
                log_warn("chat", format!("interrupted message vanished: {}", err));
            }
            self.session.totals =
                recompute_session_totals(&self.session.messages, &self.pricing());
            log_info(
                "chat",
                format!("exchange {} closed by teardown", active.exchange_id),
            );
        }
        self.phase = ExchangePhase::Idle;
        self.persist()
    }

    /// Upserts the session into history. Empty sessions are skipped.
    pub fn persist(&self) -> Result<bool, ChatError> {
        save_session(
            self.store.as_ref(),
            &self.session,
            &self.catalog,
            &self.scenario,
            &self.config,
            now_millis(),
        )
        .map_err(ChatError::from)
    }
}
