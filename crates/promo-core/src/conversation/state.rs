use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use tokio::sync::Mutex;

use crate::{
    domain::{ChatId, MessageRef},
    draft::{Draft, DraftField},
};

/// Where the conversation stands with respect to free-text input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EditState {
    #[default]
    Composing,
    AwaitingInput(DraftField),
}

impl EditState {
    pub fn awaited_field(self) -> Option<DraftField> {
        match self {
            EditState::Composing => None,
            EditState::AwaitingInput(field) => Some(field),
        }
    }
}

/// One promotion being edited in one conversation.
#[derive(Debug)]
pub struct ConversationSession {
    pub draft: Draft,
    pub state: EditState,
    /// Most recently published card.
    pub message: MessageRef,
    in_flight: Arc<AtomicUsize>,
}

impl ConversationSession {
    pub fn new(draft: Draft, message: MessageRef) -> Self {
        Self {
            draft,
            state: EditState::Composing,
            message,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fan-outs started from this session that have not reported yet.
    pub fn broadcasts_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_broadcasting(&self) -> bool {
        self.broadcasts_in_flight() > 0
    }

    pub(crate) fn in_flight_counter(&self) -> Arc<AtomicUsize> {
        self.in_flight.clone()
    }
}

/// In-memory sessions keyed by conversation.
///
/// The map lock is held only to look up or replace an entry; operations on a
/// session hold that session's own lock.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<ChatId, Arc<Mutex<ConversationSession>>>>,
}

impl SessionStore {
    pub async fn get(&self, chat_id: ChatId) -> Option<Arc<Mutex<ConversationSession>>> {
        self.inner.lock().await.get(&chat_id).cloned()
    }

    /// Install `session` for `chat_id`, replacing any previous one.
    pub async fn replace(&self, chat_id: ChatId, session: ConversationSession) {
        self.inner
            .lock()
            .await
            .insert(chat_id, Arc::new(Mutex::new(session)));
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
