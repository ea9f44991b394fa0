mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use log::{ debug, error, info, warn };
use std::sync::Arc;
use tokio::sync::{ mpsc, oneshot, watch };

use crate::error::StoreError;
use crate::models::chat::{ ChatTurn, Message, Role };

pub const MESSAGES_KEY: &str = "ollama_chat_messages";
pub const MODEL_KEY: &str = "ollama_selected_model";

/// Flat string key-value persistence, read once at startup and written after mutations.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

pub fn create_state_store(path: Option<&str>) -> Arc<dyn KeyValueStore> {
    match path {
        Some(path) if !path.trim().is_empty() => {
            info!("Chat state will be stored in: {}", path);
            Arc::new(FileStore::new(path))
        }
        _ => {
            info!("Chat state will be kept in memory only");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Point-in-time view handed to readers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub messages: Vec<Message>,
    pub in_flight: bool,
}

impl Snapshot {
    pub fn streaming_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.streaming)
            .count()
    }
}

enum PersistCommand {
    /// The log changed; the writer serializes the latest snapshot.
    Messages,
    Model(String),
    Flush(oneshot::Sender<()>),
}

/// Authoritative message log plus the in-flight flag.
///
/// Only the reducer holds it mutably; everybody else reads through [`subscribe`].
/// Persistence runs on a background writer so a slow or failing store never holds up
/// a generation.
///
/// [`subscribe`]: ConversationStore::subscribe
pub struct ConversationStore {
    messages: Vec<Message>,
    in_flight: bool,
    backend: Option<Arc<dyn KeyValueStore>>,
    writer: Option<mpsc::UnboundedSender<PersistCommand>>,
    tx: watch::Sender<Snapshot>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot::default());
        Self {
            messages: Vec::new(),
            in_flight: false,
            backend: None,
            writer: None,
            tx,
        }
    }

    /// Must be called from within a tokio runtime; the writer task is spawned here.
    pub fn with_persistence(backend: Arc<dyn KeyValueStore>) -> Self {
        let (writer, rx) = mpsc::unbounded_channel();
        let store = Self {
            backend: Some(backend.clone()),
            writer: Some(writer),
            ..Self::new()
        };
        tokio::spawn(run_writer(backend, rx, store.subscribe()));
        store
    }

    /// Rehydrates the log from persistence, falling back to `greeting` for a missing,
    /// empty or unreadable log. Returns whether a saved log was restored.
    pub async fn load(&mut self, greeting: Message) -> bool {
        let saved = match &self.backend {
            Some(backend) =>
                match backend.get(MESSAGES_KEY).await {
                    Ok(saved) => saved,
                    Err(e) => {
                        error!("Failed to read saved conversation: {}", e);
                        None
                    }
                }
            None => None,
        };

        let restored = saved.and_then(|raw| {
            match serde_json::from_str::<Vec<Message>>(&raw) {
                Ok(messages) if messages.iter().any(|m| m.role != Role::System) => Some(messages),
                Ok(_) => None,
                Err(e) => {
                    warn!("Ignoring unreadable saved conversation: {}", e);
                    None
                }
            }
        });

        match restored {
            Some(mut messages) => {
                // The system turn is rebuilt from the persona for every request.
                messages.retain(|m| {
                    if m.role == Role::System {
                        debug!("Dropping saved system message {}", m.id);
                    }
                    m.role != Role::System
                });
                // A reload mid-generation leaves a message that will never finish.
                for msg in messages.iter_mut().filter(|m| m.streaming) {
                    debug!("Clearing stale streaming flag on {}", msg.id);
                    msg.streaming = false;
                }
                info!("Restored {} saved messages", messages.len());
                self.in_flight = false;
                self.replace_all(messages);
                true
            }
            None => {
                self.in_flight = false;
                self.replace_all(vec![greeting]);
                false
            }
        }
    }

    /// Persisted model name. A hint only; an explicit selection always wins.
    pub async fn load_selected_model(&self) -> Option<String> {
        let backend = self.backend.as_ref()?;
        match backend.get(MODEL_KEY).await {
            Ok(name) => name.filter(|n| !n.trim().is_empty()),
            Err(e) => {
                error!("Failed to read saved model selection: {}", e);
                None
            }
        }
    }

    pub fn save_selected_model(&self, name: &str) {
        if let Some(writer) = &self.writer {
            let _ = writer.send(PersistCommand::Model(name.to_string()));
        }
    }

    /// Waits until every write queued so far has been attempted.
    pub async fn flush(&self) {
        if let Some(writer) = &self.writer {
            let (ack, done) = oneshot::channel();
            if writer.send(PersistCommand::Flush(ack)).is_ok() {
                let _ = done.await;
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            messages: self.messages.clone(),
            in_flight: self.in_flight,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn set_in_flight(&mut self, in_flight: bool) {
        if self.in_flight != in_flight {
            self.in_flight = in_flight;
            self.publish();
        }
    }

    pub fn append(&mut self, message: Message) {
        debug_assert!(
            !message.streaming || !self.messages.iter().any(|m| m.streaming),
            "second streaming message appended"
        );
        self.messages.push(message);
        self.changed();
    }

    /// Replaces content and streaming flag of the message with `id`.
    pub fn replace_by_id(&mut self, id: &str, content: String, streaming: bool) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(msg) => {
                msg.content = content;
                msg.streaming = streaming;
                self.changed();
                true
            }
            None => false,
        }
    }

    /// Appends `delta` to the message with `id`. The accumulation path during streaming.
    pub fn append_to(&mut self, id: &str, delta: &str) -> bool {
        match self.messages.iter_mut().rev().find(|m| m.id == id) {
            Some(msg) => {
                msg.content.push_str(delta);
                self.changed();
                true
            }
            None => false,
        }
    }

    pub fn finish(&mut self, id: &str) -> bool {
        match self.messages.iter_mut().rev().find(|m| m.id == id) {
            Some(msg) => {
                msg.streaming = false;
                self.changed();
                true
            }
            None => false,
        }
    }

    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.changed();
    }

    /// The `{role, content}` history for the next request: the whole log, minus any
    /// message still under construction, anything without content and system turns.
    pub fn history_for_request(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .filter(|m| !m.streaming && !m.content.is_empty() && m.role != Role::System)
            .map(Message::to_turn)
            .collect()
    }

    fn changed(&mut self) {
        self.publish();
        self.persist();
    }

    fn publish(&self) {
        self.tx.send_replace(self.snapshot());
    }

    fn persist(&self) {
        if let Some(writer) = &self.writer {
            let _ = writer.send(PersistCommand::Messages);
        }
    }
}

async fn run_writer(
    backend: Arc<dyn KeyValueStore>,
    mut rx: mpsc::UnboundedReceiver<PersistCommand>,
    snapshots: watch::Receiver<Snapshot>
) {
    while let Some(cmd) = rx.recv().await {
        let mut next = Some(cmd);
        while let Some(cmd) = next.take() {
            match cmd {
                PersistCommand::Messages => {
                    // Only the newest log matters; skip intermediate states queued meanwhile.
                    loop {
                        match rx.try_recv() {
                            Ok(PersistCommand::Messages) => {}
                            Ok(other) => {
                                next = Some(other);
                                break;
                            }
                            Err(_) => {
                                break;
                            }
                        }
                    }
                    // Published before the command was queued, so never older than it.
                    let json = match serde_json::to_string(&snapshots.borrow().messages) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to serialize conversation: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = backend.set(MESSAGES_KEY, &json).await {
                        error!("Failed to persist conversation: {}", e);
                    }
                }
                PersistCommand::Model(name) => {
                    if let Err(e) = backend.set(MODEL_KEY, &name).await {
                        error!("Failed to persist model selection: {}", e);
                    }
                }
                PersistCommand::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    }
    debug!("Persistence writer stopped");
}
