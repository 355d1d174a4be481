//! Chat orchestrator: runs one conversation turn end to end.
//!
//! RECEIVED -> LANGUAGE_DETECTED -> RETRIEVED -> GENERATING
//! (<-> TOOL_PENDING, bounded) -> RESPONDED -> PERSISTED, or
//! RESPONDED_WITH_ERROR when retrieval or generation is unavailable.
//! Turns for one session run one at a time; different sessions never wait
//! on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use sapa_core::config::{ChatConfig, RetrievalConfig, StorageConfig};
use sapa_core::detect_language;
use sapa_core::error::SapaError;
use sapa_core::retry::RetryPolicy;
use sapa_core::types::{
    Language, Link, RetrievedPassage, Session, ToolInvocation, ToolOutcome, Turn,
};
use sapa_llm::{ChatMessage, ChatModel, ModelReply};
use sapa_storage::SessionStore;
use sapa_tools::ToolRegistry;
use sapa_vector::Retriever;

use crate::error::ChatError;
use crate::followup::FollowUpGenerator;
use crate::prompt;

// =============================================================================
// Response types
// =============================================================================

/// How a turn ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Answered,
    RetrievalUnavailable,
    GenerationUnavailable,
}

/// A passage the answer was grounded on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub category: String,
    pub language: Language,
    pub score: f32,
}

impl From<&RetrievedPassage> for SourceRef {
    fn from(p: &RetrievedPassage) -> Self {
        Self {
            chunk_id: p.chunk_id.clone(),
            category: p.metadata.category.clone(),
            language: p.metadata.language,
            score: p.score,
        }
    }
}

/// Result of [`Orchestrator::handle_turn`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub answer: String,
    pub language: Language,
    /// Links from this turn's tool calls, de-duplicated by url.
    pub links: Vec<Link>,
    pub follow_ups: Vec<String>,
    pub session_id: String,
    /// False when retrieval returned no passages.
    pub grounded: bool,
    pub sources: Vec<SourceRef>,
    /// Tool calls executed this turn.
    pub tool_rounds: usize,
    pub outcome: TurnOutcome,
}

impl TurnResponse {
    fn apology(session_id: &str, language: Language, outcome: TurnOutcome) -> Self {
        Self {
            answer: language.apology().to_string(),
            language,
            links: Vec::new(),
            follow_ups: Vec::new(),
            session_id: session_id.to_string(),
            grounded: false,
            sources: Vec::new(),
            tool_rounds: 0,
            outcome,
        }
    }
}

// =============================================================================
// Per-session state
// =============================================================================

/// Turns computed for a session but not yet committed, in order.
#[derive(Default)]
struct SessionSlot {
    pending: Vec<Turn>,
    retrying: bool,
}

type SlotHandle = Arc<tokio::sync::Mutex<SessionSlot>>;

struct Generation {
    answer: String,
    links: Vec<Link>,
    invocations: Vec<ToolInvocation>,
    rounds: usize,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Coordinates retrieval, generation, tools and persistence for chat turns.
pub struct Orchestrator {
    retriever: Arc<Retriever>,
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    store: SessionStore,
    follow_ups: FollowUpGenerator,
    generation_policy: RetryPolicy,
    chat: ChatConfig,
    retrieval: RetrievalConfig,
    storage: StorageConfig,
    slots: Mutex<HashMap<String, SlotHandle>>,
}

impl Orchestrator {
    /// `generation_policy` bounds every chat model call, including the
    /// follow-up request.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        retriever: Arc<Retriever>,
        model: Arc<dyn ChatModel>,
        tools: Arc<ToolRegistry>,
        store: SessionStore,
        generation_policy: RetryPolicy,
        chat: ChatConfig,
        retrieval: RetrievalConfig,
        storage: StorageConfig,
    ) -> Self {
        let follow_ups =
            FollowUpGenerator::new(model.clone(), generation_policy, chat.max_follow_ups);
        info!(
            model = model.model_name(),
            tools = tools.len(),
            history_window = chat.history_window,
            max_tool_rounds = chat.max_tool_rounds,
            "Orchestrator ready"
        );
        Self {
            retriever,
            model,
            tools,
            store,
            follow_ups,
            generation_policy,
            chat,
            retrieval,
            storage,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Answer one user query within a session.
    ///
    /// Only invalid input is returned as an error. Retrieval and generation
    /// failures produce an apology in the query's language and are not
    /// persisted; a storage failure still returns the answer and the turn is
    /// written later.
    pub async fn handle_turn(
        &self,
        session_id: &str,
        query: &str,
    ) -> Result<TurnResponse, ChatError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(ChatError::EmptySessionId);
        }
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(ChatError::EmptyQuery);
        }
        let query = prompt::truncate_graphemes(trimmed, self.chat.max_query_chars);
        if query.len() < trimmed.len() {
            debug!(session_id, max = self.chat.max_query_chars, "Query truncated");
        }
        debug!(session_id, state = "received", "Turn received");

        let language = detect_language(query);
        debug!(session_id, state = "language_detected", language = %language);

        let k = self.retrieval.top_k.clamp(1, self.retrieval.max_top_k.max(1));
        let passages = match self.retriever.retrieve(query, k, None).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(session_id, error = %e, state = "responded_with_error", "Retrieval unavailable");
                return Ok(TurnResponse::apology(
                    session_id,
                    language,
                    TurnOutcome::RetrievalUnavailable,
                ));
            }
        };
        debug!(session_id, state = "retrieved", passages = passages.len());

        let handle = self.slot(session_id);
        let response = self
            .respond(session_id, &handle, query, language, passages)
            .await;
        drop(handle);
        self.release_slot(session_id);
        Ok(response)
    }

    /// The locked part of a turn: history, generation, follow-ups, persist.
    async fn respond(
        &self,
        session_id: &str,
        handle: &SlotHandle,
        query: &str,
        language: Language,
        passages: Vec<RetrievedPassage>,
    ) -> TurnResponse {
        let grounded = !passages.is_empty();
        let mut slot = handle.lock().await;
        self.flush_pending(session_id, &mut slot).await;
        let history = self.history(session_id, &slot).await;

        let messages = prompt::build_messages(
            language,
            &passages,
            &history,
            self.chat.history_window,
            query,
        );

        let generation = match self.generate(session_id, language, messages).await {
            Ok(generation) => generation,
            Err(e) => {
                warn!(session_id, error = %e, state = "responded_with_error", "Generation unavailable");
                return TurnResponse::apology(
                    session_id,
                    language,
                    TurnOutcome::GenerationUnavailable,
                );
            }
        };

        let follow_ups = self
            .follow_ups
            .generate(language, query, &generation.answer, &passages)
            .await;
        debug!(session_id, state = "responded", tool_rounds = generation.rounds);

        let user = Turn::user(query).with_language(language);
        let assistant = Turn::assistant(generation.answer.clone())
            .with_language(language)
            .with_tool_calls(generation.invocations)
            .with_follow_ups(follow_ups.clone());
        self.persist(session_id, handle, &mut slot, vec![user, assistant])
            .await;

        TurnResponse {
            answer: generation.answer,
            language,
            links: generation.links,
            follow_ups,
            session_id: session_id.to_string(),
            grounded,
            sources: passages.iter().map(SourceRef::from).collect(),
            tool_rounds: generation.rounds,
            outcome: TurnOutcome::Answered,
        }
    }

    /// Make a last attempt to commit every session's pending turns, e.g.
    /// before the process exits. Returns how many turns are still unsaved.
    pub async fn flush_all(&self) -> usize {
        let handles: Vec<(String, SlotHandle)> = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect()
        };

        let mut unsaved = 0;
        for (session_id, handle) in handles {
            {
                let mut slot = handle.lock().await;
                self.flush_pending(&session_id, &mut slot).await;
                if !slot.pending.is_empty() {
                    warn!(
                        session_id = %session_id,
                        turns = slot.pending.len(),
                        "Pending turns could not be persisted"
                    );
                    unsaved += slot.pending.len();
                }
            }
            drop(handle);
            self.release_slot(&session_id);
        }
        unsaved
    }

    /// Sessions with an in-memory slot: active turns or unsaved turns.
    pub fn open_sessions(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run the model, executing at most `max_tool_rounds` tool calls.
    async fn generate(
        &self,
        session_id: &str,
        language: Language,
        mut messages: Vec<ChatMessage>,
    ) -> Result<Generation, SapaError> {
        let schemas = self.tools.schemas();
        let mut links: Vec<Link> = Vec::new();
        let mut invocations = Vec::new();
        let mut latest_draft: Option<String> = None;
        let mut rounds = 0;

        loop {
            debug!(session_id, state = "generating", round = rounds);
            let reply = self
                .generation_policy
                .run("generation", || self.model.complete(&messages, &schemas))
                .await?;

            let (call, draft) = match reply {
                ModelReply::FinalAnswer(text) if !text.trim().is_empty() => {
                    return Ok(Generation {
                        answer: text,
                        links,
                        invocations,
                        rounds,
                    });
                }
                ModelReply::FinalAnswer(_) => {
                    let answer = fallback_answer(language, latest_draft, &links);
                    return Ok(Generation {
                        answer,
                        links,
                        invocations,
                        rounds,
                    });
                }
                ModelReply::ToolRequest { call, draft } => (call, draft),
            };

            if let Some(text) = draft.as_ref().filter(|d| !d.trim().is_empty()) {
                latest_draft = Some(text.clone());
            }

            if rounds >= self.chat.max_tool_rounds {
                warn!(
                    session_id,
                    tool = %call.name,
                    max_tool_rounds = self.chat.max_tool_rounds,
                    "Tool round limit reached, answering with what we have"
                );
                let answer = fallback_answer(language, latest_draft, &links);
                return Ok(Generation {
                    answer,
                    links,
                    invocations,
                    rounds,
                });
            }

            rounds += 1;
            debug!(session_id, state = "tool_pending", tool = %call.name, round = rounds);
            let result = match self.tools.invoke(&call.name, &call.arguments).await {
                Ok(found) => {
                    for link in &found {
                        if !links.iter().any(|l| l.url == link.url) {
                            links.push(link.clone());
                        }
                    }
                    ToolOutcome::Links(found)
                }
                Err(e) => {
                    warn!(session_id, tool = %call.name, error = %e, "Tool call failed");
                    ToolOutcome::Error(e.to_string())
                }
            };

            let arguments = serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| Value::String(call.arguments.clone()));
            messages.push(ChatMessage::assistant_tool_call(draft, call.clone()));
            messages.push(ChatMessage::tool_result(
                call.call_id.clone(),
                tool_result_content(&result),
            ));
            invocations.push(ToolInvocation {
                tool_name: call.name,
                arguments,
                result,
            });
        }
    }

    /// The lock table is held only for this lookup.
    fn slot(&self, session_id: &str) -> SlotHandle {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(session_id.to_string()).or_default().clone()
    }

    /// Drop the session's slot when no turn or retry holds it and nothing is
    /// pending.
    fn release_slot(&self, session_id: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let idle = slots.get(session_id).is_some_and(|handle| {
            Arc::strong_count(handle) == 1
                && handle
                    .try_lock()
                    .map(|slot| slot.pending.is_empty() && !slot.retrying)
                    .unwrap_or(false)
        });
        if idle {
            slots.remove(session_id);
        }
    }

    /// Stored turns followed by any not yet committed.
    async fn history(&self, session_id: &str, slot: &SessionSlot) -> Vec<Turn> {
        let mut turns = match load_session(&self.store, session_id).await {
            Ok(session) => session.turns,
            Err(e) => {
                warn!(session_id, error = %e, "Could not load session history");
                Vec::new()
            }
        };
        turns.extend(slot.pending.iter().cloned());
        turns
    }

    async fn flush_pending(&self, session_id: &str, slot: &mut SessionSlot) {
        if slot.pending.is_empty() {
            return;
        }
        match commit_turns(&self.store, session_id, slot.pending.clone()).await {
            Ok(()) => {
                info!(session_id, turns = slot.pending.len(), "Pending turns flushed");
                slot.pending.clear();
            }
            Err(e) => warn!(session_id, error = %e, "Pending turns still not persisted"),
        }
    }

    async fn persist(
        &self,
        session_id: &str,
        handle: &SlotHandle,
        slot: &mut SessionSlot,
        turns: Vec<Turn>,
    ) {
        if slot.pending.is_empty() {
            match commit_turns(&self.store, session_id, turns.clone()).await {
                Ok(()) => {
                    debug!(session_id, state = "persisted");
                    return;
                }
                Err(e) => warn!(session_id, error = %e, "Persist failed, will retry"),
            }
        }
        slot.pending.extend(turns);
        self.schedule_retry(session_id, handle, slot);
    }

    /// Retry pending writes in the background with doubling backoff.
    fn schedule_retry(&self, session_id: &str, handle: &SlotHandle, slot: &mut SessionSlot) {
        let attempts = self.storage.persist_retry_attempts;
        if slot.retrying || attempts == 0 {
            return;
        }
        slot.retrying = true;

        let handle = handle.clone();
        let store = self.store.clone();
        let session_id = session_id.to_string();
        let mut backoff = self.storage.persist_retry_backoff();

        tokio::spawn(async move {
            for attempt in 1..=attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;

                let mut slot = handle.lock().await;
                if slot.pending.is_empty() {
                    slot.retrying = false;
                    return;
                }
                match commit_turns(&store, &session_id, slot.pending.clone()).await {
                    Ok(()) => {
                        info!(session_id = %session_id, attempt, turns = slot.pending.len(), "Pending turns persisted");
                        slot.pending.clear();
                        slot.retrying = false;
                        return;
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, attempt, error = %e, "Persist retry failed");
                    }
                }
            }
            let mut slot = handle.lock().await;
            slot.retrying = false;
            warn!(
                session_id = %session_id,
                turns = slot.pending.len(),
                "Giving up background persist; next turn will try again"
            );
        });
    }
}

// SQLite calls block, so they run off the async executor.

async fn load_session(store: &SessionStore, session_id: &str) -> Result<Session, SapaError> {
    let store = store.clone();
    let session_id = session_id.to_string();
    tokio::task::spawn_blocking(move || store.load(&session_id))
        .await
        .map_err(|e| SapaError::Storage(format!("session load task failed: {}", e)))?
}

async fn commit_turns(
    store: &SessionStore,
    session_id: &str,
    turns: Vec<Turn>,
) -> Result<(), SapaError> {
    let store = store.clone();
    let session_id = session_id.to_string();
    tokio::task::spawn_blocking(move || store.append_turns(&session_id, turns))
        .await
        .map_err(|e| SapaError::Storage(format!("session write task failed: {}", e)))?
        .map(|_| ())
}

/// Tool result as shown to the model.
fn tool_result_content(outcome: &ToolOutcome) -> String {
    match outcome {
        ToolOutcome::Links(links) => json!({ "links": links }).to_string(),
        ToolOutcome::Error(message) => json!({ "error": message }).to_string(),
    }
}

/// Best answer available when the model stopped without final text: its
/// latest draft, else the gathered links, else a hedge.
fn fallback_answer(language: Language, draft: Option<String>, links: &[Link]) -> String {
    if let Some(draft) = draft {
        return draft;
    }
    if links.is_empty() {
        return language.hedge().to_string();
    }

    let heading = match language {
        Language::Vietnamese => "Dưới đây là một số liên kết hữu ích:",
        Language::English => "Here are some useful links:",
    };
    let mut answer = heading.to_string();
    for link in links {
        answer.push_str(&format!("\n- {}: {}", link.label, link.url));
    }
    answer
}

#[cfg(test)]
mod tests {
    use super::*;
    use sapa_core::types::LinkType;

    fn link(url: &str) -> Link {
        Link {
            link_type: LinkType::Map,
            url: url.into(),
            label: "Phở Thìn".into(),
        }
    }

    #[test]
    fn test_fallback_prefers_draft() {
        let answer = fallback_answer(
            Language::English,
            Some("Phở Thìn is a classic.".into()),
            &[link("https://maps.example/a")],
        );
        assert_eq!(answer, "Phở Thìn is a classic.");
    }

    #[test]
    fn test_fallback_composes_links() {
        let answer = fallback_answer(Language::Vietnamese, None, &[link("https://maps.example/a")]);
        assert!(answer.starts_with("Dưới đây"));
        assert!(answer.contains("- Phở Thìn: https://maps.example/a"));
    }

    #[test]
    fn test_fallback_hedges() {
        assert_eq!(
            fallback_answer(Language::English, None, &[]),
            Language::English.hedge()
        );
    }

    #[test]
    fn test_tool_result_content() {
        let content = tool_result_content(&ToolOutcome::Links(vec![link("https://maps.example/a")]));
        let value: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["links"][0]["type"], "map");

        let content = tool_result_content(&ToolOutcome::Error("Unknown tool: x".into()));
        assert!(content.contains("Unknown tool: x"));
    }

    #[test]
    fn test_source_ref_from_passage() {
        let passage = RetrievedPassage {
            chunk_id: "c1".into(),
            text: "t".into(),
            score: 0.5,
            metadata: sapa_core::types::ChunkMetadata {
                language: Language::Vietnamese,
                source: "s".into(),
                category: "food".into(),
            },
        };
        let source = SourceRef::from(&passage);
        assert_eq!(source.chunk_id, "c1");
        assert_eq!(source.category, "food");
        assert_eq!(source.language, Language::Vietnamese);
    }

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(
            serde_json::to_string(&TurnOutcome::GenerationUnavailable).unwrap(),
            "\"generation_unavailable\""
        );
    }
}
