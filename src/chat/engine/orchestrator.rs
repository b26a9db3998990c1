//! Per-thread turn state machine.
//!
//! A turn walks `Idle -> Classifying -> Routing -> <handler> -> TurnComplete`
//! in the `main` namespace, appending one checkpoint per step. Compaction
//! runs separately in the `finalize` namespace once a turn is complete.

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::classify::{EmbeddingExampleRanker, TaskClassifier};
use crate::chat::core::config::ScholarConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::ThreadId;
use crate::chat::core::interrupt::{InterruptRequest, InterruptStatus, PendingInterrupt, SuspensionPoint};
use crate::chat::core::state::{ConversationState, StateUpdate, UserInput};
use crate::chat::email::{EmailSender, sender_from_config};
use crate::chat::embedding::{Embedder, OllamaEmbedder};
use crate::chat::engine::events::{EventSink, TurnEvent};
use crate::chat::engine::router::Route;
use crate::chat::handlers::{self, HandlerContext, HandlerOutcome};
use crate::chat::llm::{OllamaGenerator, TextGenerator};
use crate::chat::retrieval::{
    DocumentCatalog, HybridSearchIndex, RetrievalEngine, SqliteDocumentCatalog, SqliteHybridIndex,
};
use crate::chat::storage::{
    Checkpoint, CheckpointStore, InterruptWrite, Namespace, NewCheckpoint, Node,
    SqliteCheckpointStore,
};
use crate::chat::summarization::SummaryFinalizer;

const EVENT_BUFFER: usize = 64;
const THINKING: &str = "Thinking";

/// External collaborators of the orchestrator.
pub struct ChatBackends {
    /// Streaming model for replies.
    pub text_generator: Arc<dyn TextGenerator>,
    /// Deterministic model for classification and summaries.
    pub instruct_generator: Arc<dyn TextGenerator>,
    /// Embeddings for few-shot ranking.
    pub embedder: Arc<dyn Embedder>,
    /// Hybrid document index.
    pub index: Arc<dyn HybridSearchIndex>,
    /// File metadata store.
    pub catalog: Arc<dyn DocumentCatalog>,
    /// Checkpoint log.
    pub checkpoints: Arc<dyn CheckpointStore>,
    /// Email delivery.
    pub email: Arc<dyn EmailSender>,
}

impl ChatBackends {
    /// Build Ollama and `SQLite` backends from config.
    ///
    /// # Errors
    /// Returns an error if any backend cannot be initialized.
    pub async fn sqlite(config: &ScholarConfig) -> ChatResult<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&config.embedding)?);
        let index = Arc::new(SqliteHybridIndex::new(&config.storage, embedder.clone()).await?);
        let catalog = Arc::new(SqliteDocumentCatalog::new(&config.storage).await?);
        let checkpoints = Arc::new(SqliteCheckpointStore::new(&config.storage).await?);

        Ok(Self {
            text_generator: Arc::new(OllamaGenerator::new(&config.llm)?),
            instruct_generator: Arc::new(OllamaGenerator::new(&config.instruct)?),
            embedder,
            index,
            catalog,
            checkpoints,
            email: sender_from_config(&config.email)?,
        })
    }
}

/// How a turn run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnStatus {
    /// The thread reached `TurnComplete`.
    Completed,
    /// A handler is waiting for the caller.
    Suspended(InterruptRequest),
}

/// Drives conversation turns, interrupts and compaction for every thread.
///
/// Operations on one thread are serialized; distinct threads run in
/// parallel. Cloning shares the same state.
#[derive(Clone)]
pub struct ConversationOrchestrator {
    classifier: Arc<TaskClassifier>,
    handlers: HandlerContext,
    finalizer: Arc<SummaryFinalizer>,
    checkpoints: Arc<dyn CheckpointStore>,
    turn_locks: Arc<DashMap<ThreadId, Arc<Mutex<()>>>>,
}

impl ConversationOrchestrator {
    /// Create an orchestrator over `backends`.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the example
    /// banks cannot be loaded.
    pub fn new(config: &ScholarConfig, backends: ChatBackends) -> ChatResult<Self> {
        config.validate()?;
        let ranker = Arc::new(EmbeddingExampleRanker::new(
            backends.embedder,
            config.classifier.cache_capacity,
        )?);
        let classifier = TaskClassifier::new(
            backends.instruct_generator.clone(),
            ranker,
            &config.classifier,
        )?;
        let finalizer = SummaryFinalizer::new(backends.instruct_generator, &config.finalize);

        Ok(Self {
            classifier: Arc::new(classifier),
            handlers: HandlerContext {
                retrieval: RetrievalEngine::new(backends.index),
                retrieval_config: config.retrieval.clone(),
                generator: backends.text_generator,
                catalog: backends.catalog,
                email: backends.email,
                general_chat_prompt: config.general_chat_prompt.clone(),
            },
            finalizer: Arc::new(finalizer),
            checkpoints: backends.checkpoints,
            turn_locks: Arc::new(DashMap::new()),
        })
    }

    /// Create an orchestrator with Ollama and `SQLite` backends.
    ///
    /// # Errors
    /// Returns an error if backends cannot be initialized.
    pub async fn from_config(config: &ScholarConfig) -> ChatResult<Self> {
        let backends = ChatBackends::sqlite(config).await?;
        Self::new(config, backends)
    }

    async fn lock_thread(&self, thread_id: ThreadId) -> ThreadLease {
        let lock = self.turn_locks.entry(thread_id).or_default().clone();
        ThreadLease {
            guard: Some(lock.lock_owned().await),
            locks: Arc::clone(&self.turn_locks),
            thread_id,
        }
    }

    /// Store a new user input as the thread's `Idle` checkpoint without
    /// running anything. Any outstanding interrupt is dropped.
    ///
    /// # Errors
    /// Returns `Persistence` if the checkpoint cannot be written.
    pub async fn submit(&self, thread_id: ThreadId, input: UserInput) -> ChatResult<Checkpoint> {
        let _guard = self.lock_thread(thread_id).await;
        let previous = self.checkpoints.latest_checkpoint(thread_id, None).await?;
        let state = ConversationState::for_new_turn(previous.as_ref().map(|cp| &cp.state), input);
        let checkpoint = self
            .checkpoints
            .append_checkpoint(
                NewCheckpoint::new(thread_id, Namespace::Main, Node::Idle, state)
                    .with_interrupt(InterruptWrite::Clear),
            )
            .await?;
        info!(thread_id = %thread_id, seq = checkpoint.seq, "turn submitted");
        Ok(checkpoint)
    }

    /// Run the submitted turn, or resume the pending interrupt with `resume`.
    ///
    /// Calling this while an interrupt is pending and without an answer
    /// re-publishes the interrupt.
    ///
    /// # Errors
    /// Returns `InvalidState` if nothing was submitted or the turn already
    /// completed; classification, generation and persistence errors abort
    /// the run.
    pub async fn run_turn(
        &self,
        thread_id: ThreadId,
        resume: Option<Value>,
        events: &EventSink,
    ) -> ChatResult<TurnStatus> {
        let _guard = self.lock_thread(thread_id).await;
        let latest = self
            .checkpoints
            .latest_checkpoint(thread_id, Some(Namespace::Main))
            .await?
            .ok_or_else(|| ChatError::InvalidState(format!("thread {thread_id} has no input")))?;
        let pending = self.checkpoints.pending_interrupt(thread_id).await?;

        match (pending, resume) {
            (Some(pending), Some(answer)) => {
                self.resume_handler(thread_id, latest.state, pending, &answer, events)
                    .await
            }
            (Some(pending), None) => {
                debug!(thread_id = %thread_id, point = pending.point.name(), "interrupt still pending");
                events.emit(TurnEvent::Interrupt(pending.request.clone())).await;
                Ok(TurnStatus::Suspended(pending.request))
            }
            (None, _) => match latest.node {
                Node::Idle | Node::Classifying | Node::Routing => {
                    self.fresh_turn(thread_id, latest.state, events).await
                }
                Node::InquiryHandler
                | Node::DocumentSearchHandler
                | Node::GeneralHandler
                | Node::EmailHandler => {
                    self.append(thread_id, Namespace::Main, Node::TurnComplete, latest.state, None)
                        .await?;
                    Ok(TurnStatus::Completed)
                }
                Node::TurnComplete | Node::Finalizing | Node::Done => Err(ChatError::InvalidState(
                    format!("thread {thread_id} has no pending turn"),
                )),
            },
        }
    }

    async fn fresh_turn(
        &self,
        thread_id: ThreadId,
        mut state: ConversationState,
        events: &EventSink,
    ) -> ChatResult<TurnStatus> {
        info!(thread_id = %thread_id, "turn started");
        self.step(thread_id, Node::Classifying, &mut state, StateUpdate::progress("classify", THINKING), events)
            .await?;

        let task = self
            .classifier
            .classify(
                &state.user_input.query,
                state.user_input.has_selected_documents(),
                &state.chat_messages,
                state.values.historical_summary.as_deref(),
            )
            .await?;

        let route = Route::for_task(&task);
        let routed = StateUpdate {
            task: Some(task.clone()),
            ..StateUpdate::progress("route", task.description())
        };
        self.step(thread_id, Node::Routing, &mut state, routed, events).await?;
        info!(thread_id = %thread_id, ?route, "turn routed");

        let ctx = &self.handlers;
        let outcome = match route {
            Route::Inquiry => {
                HandlerOutcome::Complete(handlers::inquiry::run(ctx, &state, &task, events).await?)
            }
            Route::DocumentSearch => {
                HandlerOutcome::Complete(handlers::document_search::run(ctx, &state, &task).await?)
            }
            Route::Email => handlers::email::start(&state, &task),
            Route::General => {
                HandlerOutcome::Complete(handlers::general::run(ctx, &state, &task, events).await?)
            }
        };
        self.settle(thread_id, route.node(), state, outcome, events).await
    }

    async fn resume_handler(
        &self,
        thread_id: ThreadId,
        state: ConversationState,
        pending: PendingInterrupt,
        answer: &Value,
        events: &EventSink,
    ) -> ChatResult<TurnStatus> {
        let task = state.values.task.clone().ok_or_else(|| {
            ChatError::InvalidState(format!("thread {thread_id} is suspended without a task"))
        })?;
        info!(thread_id = %thread_id, point = pending.point.name(), "interrupt resumed");

        let (node, outcome) = match pending.point {
            point @ (SuspensionPoint::EmailAwaitingRecipient { .. }
            | SuspensionPoint::EmailAwaitingConfirmation { .. }) => (
                Node::EmailHandler,
                handlers::email::resume(&self.handlers, &state, &task, point, answer).await,
            ),
        };
        self.settle(thread_id, node, state, outcome, events).await
    }

    /// Persist a handler's outcome.
    async fn settle(
        &self,
        thread_id: ThreadId,
        node: Node,
        mut state: ConversationState,
        outcome: HandlerOutcome,
        events: &EventSink,
    ) -> ChatResult<TurnStatus> {
        match outcome {
            HandlerOutcome::Complete(update) => {
                let progress = update.tool_messages.clone();
                state.apply(update.clone());
                let checkpoint = NewCheckpoint::new(thread_id, Namespace::Main, node, state.clone())
                    .with_write(update)
                    .with_interrupt(InterruptWrite::Clear);
                self.checkpoints.append_checkpoint(checkpoint).await?;
                if let Some(latest) = progress.and_then(|messages| messages.into_iter().last()) {
                    emit_progress(events, node, latest.content).await;
                }

                self.append(thread_id, Namespace::Main, Node::TurnComplete, state, None)
                    .await?;
                info!(thread_id = %thread_id, "turn complete");
                Ok(TurnStatus::Completed)
            }
            HandlerOutcome::Suspend(pending) => {
                let request = pending.request.clone();
                let point = pending.point.name();
                let checkpoint = NewCheckpoint::new(thread_id, Namespace::Main, node, state)
                    .with_interrupt(InterruptWrite::Set(pending));
                self.checkpoints.append_checkpoint(checkpoint).await?;
                info!(thread_id = %thread_id, point, "turn suspended");
                events.emit(TurnEvent::Interrupt(request.clone())).await;
                Ok(TurnStatus::Suspended(request))
            }
        }
    }

    /// Apply `update`, checkpoint it at `node` and publish its progress.
    async fn step(
        &self,
        thread_id: ThreadId,
        node: Node,
        state: &mut ConversationState,
        update: StateUpdate,
        events: &EventSink,
    ) -> ChatResult<()> {
        let progress = update
            .tool_messages
            .as_ref()
            .and_then(|messages| messages.last())
            .map(|message| message.content.clone());
        state.apply(update.clone());
        self.append(thread_id, Namespace::Main, node, state.clone(), Some(update))
            .await?;
        if let Some(content) = progress {
            emit_progress(events, node, content).await;
        }
        Ok(())
    }

    async fn append(
        &self,
        thread_id: ThreadId,
        namespace: Namespace,
        node: Node,
        state: ConversationState,
        write: Option<StateUpdate>,
    ) -> ChatResult<Checkpoint> {
        let mut checkpoint = NewCheckpoint::new(thread_id, namespace, node, state);
        checkpoint.write = write;
        self.checkpoints.append_checkpoint(checkpoint).await
    }

    /// Run a turn in the background and observe it as an event stream.
    ///
    /// The stream always ends with [`TurnEvent::End`], preceded by
    /// [`TurnEvent::Error`] when the run fails. Dropping the stream does not
    /// cancel the run; a completed turn schedules compaction.
    #[must_use]
    pub fn stream_turn(
        &self,
        thread_id: ThreadId,
        resume: Option<Value>,
    ) -> BoxStream<'static, TurnEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let sink = EventSink::new(tx);
            let status = orchestrator.run_turn(thread_id, resume, &sink).await;
            match status {
                Ok(TurnStatus::Completed) => {
                    sink.emit(TurnEvent::End).await;
                    orchestrator.spawn_finalize(thread_id);
                }
                Ok(TurnStatus::Suspended(_)) => sink.emit(TurnEvent::End).await,
                Err(err) => {
                    warn!(thread_id = %thread_id, error = %err, "turn failed");
                    sink.emit(TurnEvent::Error {
                        message: err.to_string(),
                    })
                    .await;
                    sink.emit(TurnEvent::End).await;
                }
            }
        });

        stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed()
    }

    /// Fold the conversation into the rolling summary.
    ///
    /// Runs only when `main` is at `TurnComplete` with no pending interrupt
    /// and the turn has not been compacted yet. Returns whether it ran.
    ///
    /// # Errors
    /// Returns an error if the summary or the checkpoints cannot be written.
    pub async fn finalize(&self, thread_id: ThreadId) -> ChatResult<bool> {
        let _guard = self.lock_thread(thread_id).await;
        let Some(main) = self
            .checkpoints
            .latest_checkpoint(thread_id, Some(Namespace::Main))
            .await?
        else {
            return Ok(false);
        };
        if main.node != Node::TurnComplete
            || self.checkpoints.pending_interrupt(thread_id).await?.is_some()
        {
            debug!(thread_id = %thread_id, node = %main.node, "finalize skipped");
            return Ok(false);
        }
        let latest = self.checkpoints.latest_checkpoint(thread_id, None).await?;
        if latest.is_some_and(|cp| cp.namespace == Namespace::Finalize && cp.node == Node::Done) {
            return Ok(false);
        }

        let mut state = main.state;
        self.append(thread_id, Namespace::Finalize, Node::Finalizing, state.clone(), None)
            .await?;
        let update = self.finalizer.compact(&state).await?;
        let pruned = update.remove_messages.len();
        state.apply(update.clone());
        self.append(thread_id, Namespace::Finalize, Node::Done, state, Some(update))
            .await?;
        info!(thread_id = %thread_id, pruned, "conversation finalized");
        Ok(true)
    }

    /// Run [`Self::finalize`] as an independent background task.
    pub fn spawn_finalize(&self, thread_id: ThreadId) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(err) = orchestrator.finalize(thread_id).await {
                warn!(thread_id = %thread_id, error = %err, "background finalize failed");
            }
        })
    }

    /// Latest state of the thread across namespaces.
    ///
    /// # Errors
    /// Returns `Persistence` if the store cannot be read.
    pub async fn current_state(&self, thread_id: ThreadId) -> ChatResult<Option<ConversationState>> {
        Ok(self
            .checkpoints
            .latest_checkpoint(thread_id, None)
            .await?
            .map(|checkpoint| checkpoint.state))
    }

    /// Finalized snapshots, newest first.
    ///
    /// # Errors
    /// Returns `Persistence` if the store cannot be read.
    pub async fn history(&self, thread_id: ThreadId) -> ChatResult<Vec<ConversationState>> {
        let checkpoints = self
            .checkpoints
            .list_checkpoints(thread_id, Some(Namespace::Finalize))
            .await?;
        Ok(checkpoints
            .into_iter()
            .filter(|checkpoint| checkpoint.node == Node::Done && checkpoint.state.values.is_finalized)
            .map(|checkpoint| checkpoint.state)
            .collect())
    }

    /// Whether the thread waits for an answer, and the request if so.
    ///
    /// # Errors
    /// Returns `Persistence` if the store cannot be read.
    pub async fn interrupt_status(&self, thread_id: ThreadId) -> ChatResult<InterruptStatus> {
        Ok(self.checkpoints.pending_interrupt(thread_id).await?.into())
    }

    /// Remove every trace of the thread. Unknown threads are not an error.
    ///
    /// # Errors
    /// Returns `Persistence` if the deletion fails; nothing is removed then.
    pub async fn delete_thread(&self, thread_id: ThreadId) -> ChatResult<()> {
        let _guard = self.lock_thread(thread_id).await;
        self.checkpoints.delete_thread(thread_id).await?;
        info!(thread_id = %thread_id, "thread deleted");
        Ok(())
    }
}

/// Exclusive access to one thread. The lock entry is dropped from the map
/// once nobody holds or waits for it.
struct ThreadLease {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<ThreadId, Arc<Mutex<()>>>>,
    thread_id: ThreadId,
}

impl Drop for ThreadLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.thread_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

async fn emit_progress(events: &EventSink, node: Node, content: String) {
    events
        .emit(TurnEvent::ToolUpdate {
            node: node.as_str().to_string(),
            content,
        })
        .await;
}
