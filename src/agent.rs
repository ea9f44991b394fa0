//! Conversation reducer: the only writer of the conversation log.
//!
//! One generation moves through
//! `Idle -> Sending -> Streaming -> {Finalized | Cancelled | Failed} -> Idle`.
//! Deltas are folded into the placeholder strictly in arrival order from a single stream.

use futures::StreamExt;
use log::{ debug, info, warn };
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::persona::Persona;
use crate::error::{ ChatError, TransportError };
use crate::history::{ ConversationStore, Snapshot };
use crate::llm::chat::ChatTransport;
use crate::llm::decoder::decode;
use crate::models::chat::{ ChatRequest, ChatTurn, Message, ModelDescriptor };
use crate::models::record::StreamRecord;

pub const DEFAULT_MODEL: &str = "llama3.2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Finalized,
    /// Stopped by the caller; whatever had arrived is kept.
    Cancelled,
    /// The stream died; the assistant message now holds this text.
    Failed(String),
}

/// Where the current model selection came from. Only an explicit choice survives a
/// model refresh that does not list it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Explicit,
    Hint,
}

/// State owned by one in-flight generation.
struct GenerationHandle {
    cancel: CancellationToken,
    message_id: String,
    accumulated: String,
}

impl GenerationHandle {
    fn new(message_id: String, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            message_id,
            accumulated: String::new(),
        }
    }
}

pub fn greeting(model: &str) -> Message {
    Message::assistant(
        format!("Hello! I'm your Ollama assistant running {}. Send me a message to get started!", model)
    )
}

pub fn failure_text(error: &TransportError, model: &str) -> String {
    format!("❌ Connection Error: {}. Is Ollama running with model '{}'?", error, model)
}

pub struct ChatAgent {
    transport: Arc<dyn ChatTransport>,
    store: ConversationStore,
    system_prompt: String,
    model: String,
    selection: Selection,
    available: Vec<ModelDescriptor>,
}

impl ChatAgent {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: ConversationStore,
        persona: &Persona,
        model: Option<String>
    ) -> Self {
        let (model, selection) = match model.filter(|m| !m.trim().is_empty()) {
            Some(m) => (m.trim().to_string(), Selection::Explicit),
            None => (DEFAULT_MODEL.to_string(), Selection::Hint),
        };
        Self {
            transport,
            store,
            system_prompt: persona.render(),
            model,
            selection,
            available: Vec::new(),
        }
    }

    /// Builds the agent and rehydrates the saved log and model hint.
    pub async fn initialize(
        transport: Arc<dyn ChatTransport>,
        store: ConversationStore,
        persona: &Persona,
        explicit_model: Option<String>
    ) -> Self {
        let mut agent = Self::new(transport, store, persona, explicit_model);
        if agent.selection == Selection::Hint {
            if let Some(saved) = agent.store.load_selected_model().await {
                info!("Using saved model selection: {}", saved);
                agent.model = saved;
            }
        }
        let restored = agent.store.load(greeting(&agent.model)).await;
        info!(
            "Conversation ready via {} (model {}, {} messages, restored: {})",
            agent.transport.describe(),
            agent.model,
            agent.store.messages().len(),
            restored
        );
        agent
    }

    pub fn selected_model(&self) -> &str {
        &self.model
    }

    pub fn available_models(&self) -> &[ModelDescriptor] {
        &self.available
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.store.subscribe()
    }

    pub fn is_generating(&self) -> bool {
        self.store.in_flight()
    }

    /// Runs one generation for `text` to completion, cancellation or failure.
    ///
    /// Rejects blank input and a second submit while one is in flight; neither touches
    /// the log. Transport failures are not returned as errors: they end up as the
    /// assistant message and as [`GenerationOutcome::Failed`].
    pub async fn submit(
        &mut self,
        text: &str,
        cancel: CancellationToken
    ) -> Result<GenerationOutcome, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self.store.in_flight() {
            return Err(ChatError::Busy);
        }

        // Sending
        self.store.set_in_flight(true);
        self.store.append(Message::user(text));

        let mut messages = vec![ChatTurn::system(self.system_prompt.clone())];
        messages.extend(self.store.history_for_request());
        let request = ChatRequest::streaming(self.model.clone(), messages);

        // Streaming
        let placeholder = Message::placeholder();
        let handle = GenerationHandle::new(placeholder.id.clone(), cancel);
        self.store.append(placeholder);

        let outcome = self.run_generation(&request, handle).await;
        self.store.set_in_flight(false);
        Ok(outcome)
    }

    async fn run_generation(
        &mut self,
        request: &ChatRequest,
        mut handle: GenerationHandle
    ) -> GenerationOutcome {
        info!(
            "Generation {} started: model={} history={}",
            handle.message_id,
            request.model,
            request.messages.len()
        );
        let transport = Arc::clone(&self.transport);

        let chunks = match transport.open_chat_stream(request, handle.cancel.clone()).await {
            Ok(chunks) => chunks,
            Err(e) => {
                return self.settle_error(&handle, e);
            }
        };
        let mut records = decode(chunks);

        loop {
            let next = tokio::select! {
                biased;
                _ = handle.cancel.cancelled() => {
                    return self.cancelled(&handle);
                }
                next = records.next() => next,
            };

            match next {
                Some(Ok(value)) => {
                    let Some(record) = StreamRecord::from_value(&value) else {
                        debug!("Skipping record without text or done flag: {}", value);
                        continue;
                    };
                    if let Some(delta) = record.text() {
                        handle.accumulated.push_str(delta);
                        self.store.append_to(&handle.message_id, delta);
                    }
                    if record.done {
                        return self.finalized(&handle);
                    }
                }
                Some(Err(e)) => {
                    return self.settle_error(&handle, e);
                }
                None => {
                    // Transports end the stream quietly on cancellation.
                    if handle.cancel.is_cancelled() {
                        return self.cancelled(&handle);
                    }
                    debug!("Stream closed without a done record");
                    return self.finalized(&handle);
                }
            }
        }
    }

    fn finalized(&mut self, handle: &GenerationHandle) -> GenerationOutcome {
        self.store.finish(&handle.message_id);
        info!("Generation {} finished ({} chars)", handle.message_id, handle.accumulated.len());
        GenerationOutcome::Finalized
    }

    fn cancelled(&mut self, handle: &GenerationHandle) -> GenerationOutcome {
        self.store.finish(&handle.message_id);
        info!(
            "Generation {} stopped by user after {} chars",
            handle.message_id,
            handle.accumulated.len()
        );
        GenerationOutcome::Cancelled
    }

    fn settle_error(&mut self, handle: &GenerationHandle, error: TransportError) -> GenerationOutcome {
        if handle.cancel.is_cancelled() {
            return self.cancelled(handle);
        }
        warn!("Generation {} failed: {}", handle.message_id, error);
        let text = failure_text(&error, &self.model);
        self.store.replace_by_id(&handle.message_id, text.clone(), false);
        GenerationOutcome::Failed(text)
    }

    /// Switches the model used by the next submit and notes the switch in the log.
    /// Returns `false` when `name` is already selected.
    pub fn select_model(&mut self, name: &str) -> Result<bool, ChatError> {
        if self.store.in_flight() {
            return Err(ChatError::Busy);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::Config("model name is empty".into()));
        }
        self.selection = Selection::Explicit;
        if name == self.model {
            return Ok(false);
        }
        info!("Switching model {} -> {}", self.model, name);
        self.model = name.to_string();
        self.store.save_selected_model(&self.model);
        self.store.append(Message::assistant(format!("🔄 Switched to model: {}", self.model)));
        Ok(true)
    }

    /// Resets the log to a single greeting. The model selection is left alone.
    pub fn clear_history(&mut self) -> Result<(), ChatError> {
        if self.store.in_flight() {
            return Err(ChatError::Busy);
        }
        self.store.replace_all(vec![greeting(&self.model)]);
        Ok(())
    }

    /// Refreshes the model list from the host. Never fails: an unreachable host yields
    /// the single fallback entry.
    pub async fn refresh_models(&mut self) -> &[ModelDescriptor] {
        match self.transport.list_models().await {
            Ok(models) if !models.is_empty() => {
                let listed = models.iter().any(|m| m.name == self.model);
                if !listed && self.selection == Selection::Hint && !self.store.in_flight() {
                    info!(
                        "Model {} not offered by host, defaulting to {}",
                        self.model,
                        models[0].name
                    );
                    self.model = models[0].name.clone();
                    self.store.save_selected_model(&self.model);
                }
                self.available = models;
            }
            Ok(_) => {
                warn!("Host listed no models, using fallback list");
                self.available = vec![ModelDescriptor::named(DEFAULT_MODEL)];
            }
            Err(e) => {
                warn!("Failed to fetch models: {}", e);
                self.available = vec![ModelDescriptor::named(DEFAULT_MODEL)];
            }
        }
        &self.available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{ KeyValueStore, MemoryStore, MESSAGES_KEY, MODEL_KEY };
    use crate::llm::chat::ChunkStream;
    use crate::models::chat::Role;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Script {
        Chunks(Vec<&'static str>),
        /// Emits the chunks, then never ends on its own.
        Stall(Vec<&'static str>),
        ChunksThenError(Vec<&'static str>),
        Status(u16),
    }

    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<ChatRequest>>,
        models: Option<Vec<ModelDescriptor>>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Self::with_models(scripts, None)
        }

        fn with_models(scripts: Vec<Script>, models: Option<Vec<ModelDescriptor>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::new(Vec::new()),
                models,
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn chunks(parts: Vec<&'static str>) -> impl futures::Stream<Item = Result<Bytes, TransportError>> {
        stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))))
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn open_chat_stream(
            &self,
            request: &ChatRequest,
            _cancel: CancellationToken
        ) -> Result<ChunkStream, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            let script = self.scripts.lock().unwrap().pop_front().expect("no script left");
            match script {
                Script::Chunks(parts) => Ok(Box::pin(chunks(parts))),
                Script::Stall(parts) => Ok(Box::pin(chunks(parts).chain(stream::pending()))),
                Script::ChunksThenError(parts) =>
                    Ok(
                        Box::pin(
                            chunks(parts).chain(
                                stream::once(async { Err(TransportError::Relay("connection reset".into())) })
                            )
                        )
                    ),
                Script::Status(status) => Err(TransportError::Status { status }),
            }
        }

        async fn list_models(&self) -> Result<Vec<ModelDescriptor>, TransportError> {
            self.models.clone().ok_or(TransportError::Status { status: 502 })
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn agent(transport: Arc<ScriptedTransport>, model: Option<&str>) -> ChatAgent {
        let mut agent = ChatAgent::new(
            transport,
            ConversationStore::new(),
            &Persona::default(),
            model.map(str::to_string)
        );
        let model = agent.selected_model().to_string();
        agent.store.replace_all(vec![greeting(&model)]);
        agent
    }

    fn last(agent: &ChatAgent) -> Message {
        agent.store().messages().last().unwrap().clone()
    }

    #[tokio::test]
    async fn streams_generate_records_into_one_message() {
        let transport = ScriptedTransport::new(
            vec![Script::Chunks(vec!["{\"response\":\"Hi\"}\n", "{\"response\":\" there\"}\n", "{\"done\":true}\n"])]
        );
        let mut agent = agent(transport.clone(), Some("llama3.2"));

        let outcome = agent.submit("hello", CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::Finalized);

        let messages = agent.store().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "hello");
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].content, "Hi there");
        assert!(!messages[2].streaming);
        assert!(!agent.is_generating());

        let request = &transport.requests()[0];
        assert_eq!(request.model, "llama3.2");
        assert!(request.stream);
    }

    #[tokio::test]
    async fn request_history_starts_with_persona_and_ends_with_user() {
        let transport = ScriptedTransport::new(
            vec![
                Script::Chunks(vec!["{\"message\":{\"role\":\"assistant\",\"content\":\"one\"},\"done\":true}\n"]),
                Script::Chunks(vec!["{\"done\":true}\n"])
            ]
        );
        let mut agent = agent(transport.clone(), None);
        agent.submit("first", CancellationToken::new()).await.unwrap();
        agent.submit("second", CancellationToken::new()).await.unwrap();

        let request = &transport.requests()[1];
        let roles: Vec<Role> = request.messages
            .iter()
            .map(|t| t.role)
            .collect();
        assert_eq!(roles, vec![Role::System, Role::Assistant, Role::User, Role::Assistant, Role::User]);
        assert_eq!(request.messages.iter().filter(|t| t.role == Role::System).count(), 1);
        assert!(request.messages[0].content.contains("Now, begin the conversation."));
        assert_eq!(request.messages.last().unwrap().content, "second");
    }

    #[tokio::test]
    async fn chat_records_split_across_chunks() {
        let transport = ScriptedTransport::new(
            vec![
                Script::Chunks(
                    vec![
                        "{\"message\":{\"role\":\"assistant\",\"con",
                        "tent\":\"Hel\"},\"done\":false}\n{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"}",
                        ",\"done\":false}\n{\"done\":true}"
                    ]
                )
            ]
        );
        let mut agent = agent(transport, None);
        agent.submit("hi", CancellationToken::new()).await.unwrap();
        assert_eq!(last(&agent).content, "Hello");
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let transport = ScriptedTransport::new(
            vec![
                Script::Chunks(
                    vec![
                        "{\"response\":\"a\"}\n{oops\n",
                        "{\"model\":\"llama3.2\"}\n{\"response\":\"b\"}\n{\"done\":true}\n"
                    ]
                )
            ]
        );
        let mut agent = agent(transport, None);
        let outcome = agent.submit("hi", CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::Finalized);
        assert_eq!(last(&agent).content, "ab");
    }

    #[tokio::test]
    async fn stream_end_without_done_finalizes() {
        let transport = ScriptedTransport::new(vec![Script::Chunks(vec!["{\"response\":\"partial\"}\n"])]);
        let mut agent = agent(transport, None);
        let outcome = agent.submit("hi", CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::Finalized);
        let msg = last(&agent);
        assert_eq!(msg.content, "partial");
        assert!(!msg.streaming);
    }

    #[tokio::test]
    async fn records_after_done_are_ignored() {
        let transport = ScriptedTransport::new(
            vec![Script::Chunks(vec!["{\"response\":\"x\"}\n{\"done\":true}\n{\"response\":\"late\"}\n"])]
        );
        let mut agent = agent(transport, None);
        agent.submit("hi", CancellationToken::new()).await.unwrap();
        assert_eq!(last(&agent).content, "x");
    }

    #[tokio::test]
    async fn cancel_keeps_partial_content() {
        let transport = ScriptedTransport::new(vec![Script::Stall(vec!["{\"response\":\"Wo\"}\n"])]);
        let mut agent = agent(transport, None);
        let cancel = CancellationToken::new();

        let mut rx = agent.subscribe();
        let trigger = cancel.clone();
        let watcher = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let seen = rx
                    .borrow_and_update()
                    .messages.last()
                    .map(|m| m.content == "Wo")
                    .unwrap_or(false);
                if seen {
                    trigger.cancel();
                    break;
                }
            }
        });

        let outcome = agent.submit("write me a poem", cancel).await.unwrap();
        watcher.await.unwrap();

        assert_eq!(outcome, GenerationOutcome::Cancelled);
        let msg = last(&agent);
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "Wo");
        assert!(!msg.streaming);
        assert!(!msg.content.contains("Error"));
        assert!(!agent.is_generating());
    }

    #[tokio::test]
    async fn cancel_before_first_record() {
        let transport = ScriptedTransport::new(vec![Script::Stall(vec![])]);
        let mut agent = agent(transport, None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = agent.submit("hi", cancel).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::Cancelled);
        assert_eq!(last(&agent).content, "");
        assert!(!last(&agent).streaming);
    }

    #[tokio::test]
    async fn error_after_cancel_is_still_a_cancel() {
        let transport = ScriptedTransport::new(vec![Script::Status(503)]);
        let mut agent = agent(transport, None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = agent.submit("hi", cancel).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::Cancelled);
    }

    #[tokio::test]
    async fn http_500_replaces_placeholder() {
        let transport = ScriptedTransport::new(vec![Script::Status(500)]);
        let mut agent = agent(transport, Some("llama3.2"));
        let before = agent.store().messages().len();

        let outcome = agent.submit("hello", CancellationToken::new()).await.unwrap();
        let GenerationOutcome::Failed(text) = outcome else {
            panic!("expected failure");
        };
        assert!(text.contains("500"));
        assert!(text.contains("llama3.2"));

        let messages = agent.store().messages();
        assert_eq!(messages.len(), before + 2);
        assert_eq!(messages[before].content, "hello");
        assert_eq!(messages[before + 1].content, text);
        assert!(!messages[before + 1].streaming);
        assert!(!agent.is_generating());
    }

    #[tokio::test]
    async fn mid_stream_failure_replaces_partial_text() {
        let transport = ScriptedTransport::new(
            vec![Script::ChunksThenError(vec!["{\"response\":\"half\"}\n"]), Script::Chunks(vec!["{\"response\":\"ok\"}\n"])]
        );
        let mut agent = agent(transport, None);
        let outcome = agent.submit("hi", CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, GenerationOutcome::Failed(_)));
        let msg = last(&agent);
        assert!(msg.content.starts_with("❌ Connection Error"));
        assert!(!msg.content.contains("half"));

        // Conversation stays usable.
        let outcome = agent.submit("again", CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::Finalized);
        assert_eq!(last(&agent).content, "ok");
    }

    #[tokio::test]
    async fn observed_states_respect_invariants() {
        let transport = ScriptedTransport::new(
            vec![
                Script::Chunks(
                    vec!["{\"response\":\"a\"}\n", "{\"response\":\"bc\"}\n", "{\"response\":\"def\"}\n", "{\"done\":true}\n"]
                )
            ]
        );
        let mut agent = agent(transport, None);
        let mut rx = agent.subscribe();
        let collector = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                seen.push(rx.borrow_and_update().clone());
            }
            seen
        });

        agent.submit("go", CancellationToken::new()).await.unwrap();
        drop(agent);
        let seen = collector.await.unwrap();

        assert!(!seen.is_empty());
        let mut last_len = 0;
        for snap in &seen {
            assert!(snap.streaming_count() <= 1);
            if snap.messages.len() == 3 {
                let len = snap.messages[2].content.len();
                assert!(len >= last_len);
                last_len = len;
            }
        }
        assert_eq!(last_len, "abcdef".len());
    }

    #[tokio::test]
    async fn blank_input_is_rejected_without_touching_the_log() {
        let transport = ScriptedTransport::new(vec![]);
        let mut agent = agent(transport.clone(), None);
        let before = agent.store().snapshot();
        assert!(matches!(agent.submit("   \n", CancellationToken::new()).await, Err(ChatError::EmptyMessage)));
        assert_eq!(agent.store().snapshot(), before);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn submit_while_in_flight_is_rejected() {
        let transport = ScriptedTransport::new(vec![]);
        let mut agent = agent(transport, None);
        agent.store.set_in_flight(true);
        assert!(matches!(agent.submit("hi", CancellationToken::new()).await, Err(ChatError::Busy)));
        assert!(matches!(agent.clear_history(), Err(ChatError::Busy)));
        assert!(matches!(agent.select_model("mistral"), Err(ChatError::Busy)));
    }

    #[tokio::test]
    async fn clear_history_leaves_single_greeting() {
        let transport = ScriptedTransport::new(vec![Script::Chunks(vec!["{\"response\":\"x\"}\n"])]);
        let mut agent = agent(transport, Some("mistral"));
        agent.submit("hi", CancellationToken::new()).await.unwrap();
        agent.clear_history().unwrap();

        let messages = agent.store().messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert!(messages[0].content.contains("mistral"));
        assert_eq!(agent.selected_model(), "mistral");
    }

    #[tokio::test]
    async fn model_switch_appends_notice_and_binds_next_request() {
        let transport = ScriptedTransport::new(vec![Script::Chunks(vec!["{\"done\":true}\n"])]);
        let mut agent = agent(transport.clone(), Some("llama3.2"));

        assert!(agent.select_model("mistral").unwrap());
        assert!(!agent.select_model("mistral").unwrap());
        assert_eq!(last(&agent).content, "🔄 Switched to model: mistral");
        assert_eq!(agent.store().messages().len(), 2);

        agent.submit("hi", CancellationToken::new()).await.unwrap();
        assert_eq!(transport.requests()[0].model, "mistral");
    }

    #[tokio::test]
    async fn refresh_falls_back_when_host_is_down() {
        let transport = ScriptedTransport::with_models(vec![], None);
        let mut agent = agent(transport, Some("mistral"));
        let models = agent.refresh_models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, DEFAULT_MODEL);
        assert_eq!(models[0].size, 0);
        assert_eq!(agent.selected_model(), "mistral");
    }

    #[tokio::test]
    async fn refresh_reconciles_hinted_selection_only() {
        let listed = vec![ModelDescriptor::named("qwen2.5"), ModelDescriptor::named("phi3")];

        let transport = ScriptedTransport::with_models(vec![], Some(listed.clone()));
        let mut hinted = agent(transport, None);
        hinted.refresh_models().await;
        assert_eq!(hinted.selected_model(), "qwen2.5");

        let transport = ScriptedTransport::with_models(vec![], Some(listed));
        let mut explicit = agent(transport, Some("llama3.2"));
        explicit.refresh_models().await;
        assert_eq!(explicit.selected_model(), "llama3.2");
        assert_eq!(explicit.available_models().len(), 2);
    }

    #[tokio::test]
    async fn initialize_restores_log_and_model_hint() {
        let backend = Arc::new(MemoryStore::new());
        let saved = vec![Message::assistant("Hello!"), Message::user("earlier question")];
        backend.set(MESSAGES_KEY, &serde_json::to_string(&saved).unwrap()).await.unwrap();
        backend.set(MODEL_KEY, "phi3").await.unwrap();

        let transport = ScriptedTransport::new(vec![]);
        let agent = ChatAgent::initialize(
            transport.clone(),
            ConversationStore::with_persistence(backend.clone()),
            &Persona::default(),
            None
        ).await;
        assert_eq!(agent.selected_model(), "phi3");
        assert_eq!(agent.store().messages(), saved.as_slice());

        let explicit = ChatAgent::initialize(
            transport,
            ConversationStore::with_persistence(backend),
            &Persona::default(),
            Some("llama3.2".into())
        ).await;
        assert_eq!(explicit.selected_model(), "llama3.2");
    }

    #[tokio::test]
    async fn initialize_without_saved_state_greets() {
        let transport = ScriptedTransport::new(vec![]);
        let agent = ChatAgent::initialize(
            transport,
            ConversationStore::with_persistence(Arc::new(MemoryStore::new())),
            &Persona::default(),
            None
        ).await;
        let messages = agent.store().messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains(DEFAULT_MODEL));
    }
}
