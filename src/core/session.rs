//! Multi-thread session store.
//!
//! Owns the conversation threads and the active-thread pointer, invokes the
//! completion port once per user turn, and flushes the full state through the
//! persistence port after every mutation. Flush failures are logged and
//! swallowed; persistence is best-effort, the conversation itself must not
//! fail because storage did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::core::gateway::CompletionPort;
use crate::core::message::Message;
use crate::core::persistence::StatePersistence;
use crate::utils::text::truncate_with_ellipsis;

pub const THREAD_TITLE_MAX_CHARS: usize = 25;

const UNTITLED_THREAD: &str = "New chat";

/// One independent conversation: an ordered list of messages plus metadata.
/// Messages only grow by append; the title is set exactly once, from the
/// first message sent into the thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Thread {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            title: UNTITLED_THREAD.to_string(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }
}

/// What became of a `send_message` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// User turn and exactly one assistant turn were appended.
    Delivered,
    /// Input was blank; nothing changed.
    RejectedEmpty,
    /// A completion is already in flight; overlapping sends are rejected
    /// rather than queued or interleaved.
    RejectedBusy,
    /// No thread is active; nothing changed.
    NoActiveThread,
}

pub struct SessionStore {
    threads: Vec<Thread>,
    active_thread_id: Option<Uuid>,
    busy: bool,
    completions: Box<dyn CompletionPort>,
    persistence: Box<dyn StatePersistence>,
}

impl SessionStore {
    /// Build a store from whatever the persistence port can load. Malformed
    /// or absent data hydrates as empty state; a dangling active id is
    /// cleared; an empty thread list is repaired immediately so the store is
    /// never observable without at least one thread.
    pub fn hydrate(
        completions: Box<dyn CompletionPort>,
        persistence: Box<dyn StatePersistence>,
    ) -> Self {
        let state = persistence.load();
        let mut store = Self {
            threads: state.threads,
            active_thread_id: state.active_thread_id,
            busy: false,
            completions,
            persistence,
        };

        if let Some(id) = store.active_thread_id {
            if !store.contains(id) {
                store.active_thread_id = None;
            }
        }

        if store.threads.is_empty() {
            store.create_thread();
        } else if store.active_thread_id.is_none() {
            store.active_thread_id = Some(store.threads[0].id);
            store.flush();
        }

        store
    }

    /// Insert a fresh empty thread at the front of the list and activate it.
    pub fn create_thread(&mut self) -> Uuid {
        let thread = Thread::new();
        let id = thread.id;
        self.threads.insert(0, thread);
        self.active_thread_id = Some(id);
        self.flush();
        id
    }

    /// Activate `id` if it names a known thread; unknown ids are ignored.
    pub fn select_thread(&mut self, id: Uuid) {
        if self.contains(id) {
            self.active_thread_id = Some(id);
            self.flush();
        }
    }

    /// Remove the thread with `id`. Deleting the active thread activates the
    /// first remaining one; deleting the last thread creates a fresh empty
    /// thread in the same call, so the list is never left empty.
    pub fn delete_thread(&mut self, id: Uuid) {
        let before = self.threads.len();
        self.threads.retain(|thread| thread.id != id);
        if self.threads.len() == before {
            return;
        }

        if self.active_thread_id == Some(id) {
            match self.threads.first() {
                Some(first) => self.active_thread_id = Some(first.id),
                None => {
                    // create_thread repairs the invariant and flushes
                    self.create_thread();
                    return;
                }
            }
        }

        self.flush();
    }

    /// Append a user turn to the active thread, obtain exactly one assistant
    /// reply for it, and append that too. The user message is visible (and
    /// persisted) before the completion resolves; on any completion failure
    /// the assistant turn carries the failure's displayable text instead.
    pub async fn send_message(&mut self, text: &str) -> SendOutcome {
        if self.busy {
            return SendOutcome::RejectedBusy;
        }
        if text.trim().is_empty() {
            return SendOutcome::RejectedEmpty;
        }
        let Some(active_id) = self.active_thread_id else {
            return SendOutcome::NoActiveThread;
        };

        let history = {
            let Some(thread) = self.thread_mut(active_id) else {
                return SendOutcome::NoActiveThread;
            };
            if thread.messages.is_empty() {
                thread.title = truncate_with_ellipsis(text, THREAD_TITLE_MAX_CHARS);
            }
            thread.messages.push(Message::user(text));
            thread.messages.clone()
        };
        self.flush();

        self.busy = true;
        let outcome = self.completions.complete(&history).await;
        self.busy = false;

        let reply = match outcome {
            Ok(outcome) => outcome.into_display_text(),
            Err(rejected) => format!("An error occurred: {rejected}"),
        };

        if let Some(thread) = self.thread_mut(active_id) {
            thread.messages.push(Message::assistant(reply));
        }
        self.flush();

        SendOutcome::Delivered
    }

    /// Threads in rendering order, newest first.
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn active_thread(&self) -> Option<&Thread> {
        let id = self.active_thread_id?;
        self.threads.iter().find(|thread| thread.id == id)
    }

    pub fn active_thread_id(&self) -> Option<Uuid> {
        self.active_thread_id
    }

    /// True while a completion is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    fn contains(&self, id: Uuid) -> bool {
        self.threads.iter().any(|thread| thread.id == id)
    }

    fn thread_mut(&mut self, id: Uuid) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|thread| thread.id == id)
    }

    fn flush(&self) {
        if let Err(err) = self
            .persistence
            .save(&self.threads, self.active_thread_id)
        {
            warn!(error = %err, "failed to persist session state");
        }
    }

    #[cfg(test)]
    fn force_busy_for_test(&mut self) {
        self.busy = true;
    }
}
