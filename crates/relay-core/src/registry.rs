//! Process-lifetime, in-memory session store.
//!
//! Holds per-user conversation state and active batch tasks. Map locks are never held
//! across an `.await`; handlers take a conversation out, work on it, and put it back.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::{
    conversation::{login::LoginSession, ConversationState},
    domain::{MessageRef, UserId},
    ports::SourceClient,
};

/// Book-keeping for a running batch.
#[derive(Clone, Debug)]
pub struct ActiveTask {
    pub id: u64,
    pub cancel: CancellationToken,
    pub status: Option<MessageRef>,
}

/// Serializes handlers of the same user (wizard/login text, batch runs).
#[derive(Default)]
pub struct UserLocks {
    inner: AsyncMutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub async fn lock_user(&self, user: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(user)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    conversations: Mutex<HashMap<UserId, ConversationState>>,
    cancel_epochs: Mutex<HashMap<UserId, u64>>,
    in_step: Mutex<HashSet<UserId>>,
    tasks: Mutex<HashMap<UserId, ActiveTask>>,
    locks: UserLocks,
    login_generation: AtomicU64,
    task_seq: AtomicU64,
    user_client: RwLock<Option<Arc<dyn SourceClient>>>,
}

impl SessionRegistry {
    pub fn new(user_client: Option<Arc<dyn SourceClient>>) -> Self {
        Self {
            user_client: RwLock::new(user_client),
            ..Self::default()
        }
    }

    pub async fn lock_user(&self, user: UserId) -> OwnedMutexGuard<()> {
        self.locks.lock_user(user).await
    }

    // ============== Conversations ==============

    /// Install a new conversation, returning the one it replaced.
    pub fn replace_conversation(
        &self,
        user: UserId,
        state: ConversationState,
    ) -> Option<ConversationState> {
        self.conversations().insert(user, state)
    }

    pub fn take_conversation(&self, user: UserId) -> Option<ConversationState> {
        self.conversations().remove(&user)
    }

    /// Take the user's conversation out for one step. The returned epoch must be
    /// handed back to [`Self::restore_conversation`].
    pub fn begin_step(&self, user: UserId) -> Option<(ConversationState, u64)> {
        let epoch = self.cancel_epoch(user);
        let state = self.take_conversation(user)?;
        self.steps().insert(user);
        Some((state, epoch))
    }

    pub fn end_step(&self, user: UserId) {
        self.steps().remove(&user);
    }

    pub fn step_in_flight(&self, user: UserId) -> bool {
        self.steps().contains(&user)
    }

    /// Put a conversation back after a step. The state is handed back to the caller
    /// (to be closed) when a newer one was installed meanwhile or the user cancelled
    /// since `epoch`.
    pub fn restore_conversation(
        &self,
        user: UserId,
        state: ConversationState,
        epoch: u64,
    ) -> Option<ConversationState> {
        if self.cancel_epoch(user) != epoch {
            return Some(state);
        }
        let mut map = self.conversations();
        if map.contains_key(&user) {
            return Some(state);
        }
        map.insert(user, state);
        None
    }

    /// Record an explicit `/cancel`; steps still in flight will not restore their state.
    pub fn bump_cancel_epoch(&self, user: UserId) {
        *self.epochs().entry(user).or_insert(0) += 1;
    }

    fn cancel_epoch(&self, user: UserId) -> u64 {
        self.epochs().get(&user).copied().unwrap_or(0)
    }

    pub fn has_conversation(&self, user: UserId) -> bool {
        self.conversations().contains_key(&user)
    }

    pub fn inspect_conversation<R>(
        &self,
        user: UserId,
        f: impl FnOnce(&ConversationState) -> R,
    ) -> Option<R> {
        self.conversations().get(&user).map(f)
    }

    /// Remove the user's login session if `pred` still holds for it.
    pub fn take_login_if(
        &self,
        user: UserId,
        pred: impl FnOnce(&LoginSession) -> bool,
    ) -> Option<LoginSession> {
        let mut map = self.conversations();
        match map.get(&user) {
            Some(ConversationState::Login(session)) if pred(session) => {}
            _ => return None,
        }
        match map.remove(&user) {
            Some(ConversationState::Login(session)) => Some(session),
            _ => None,
        }
    }

    pub fn next_login_generation(&self) -> u64 {
        self.login_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn conversations(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, ConversationState>> {
        self.conversations.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn epochs(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, u64>> {
        self.cancel_epochs.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn steps(&self) -> std::sync::MutexGuard<'_, HashSet<UserId>> {
        self.in_step.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ============== Active tasks ==============

    /// Register a running batch. A task still registered for the user is cancelled.
    pub fn begin_task(&self, user: UserId) -> ActiveTask {
        let task = ActiveTask {
            id: self.task_seq.fetch_add(1, Ordering::SeqCst) + 1,
            cancel: CancellationToken::new(),
            status: None,
        };
        if let Some(prev) = self.tasks().insert(user, task.clone()) {
            prev.cancel.cancel();
        }
        task
    }

    pub fn set_task_status(&self, user: UserId, status: MessageRef) {
        if let Some(task) = self.tasks().get_mut(&user) {
            task.status = Some(status);
        }
    }

    /// Flag the user's running batch for cancellation. Returns false when none runs.
    pub fn cancel_task(&self, user: UserId) -> bool {
        match self.tasks().get(&user) {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_task(&self, user: UserId) -> Option<ActiveTask> {
        self.tasks().get(&user).cloned()
    }

    /// Remove the task, but only if it is still the one with `task_id`.
    pub fn end_task(&self, user: UserId, task_id: u64) {
        let mut tasks = self.tasks();
        if tasks.get(&user).is_some_and(|t| t.id == task_id) {
            tasks.remove(&user);
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, ActiveTask>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ============== User identity ==============

    pub fn user_client(&self) -> Option<Arc<dyn SourceClient>> {
        self.user_client
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn install_user_client(&self, client: Option<Arc<dyn SourceClient>>) {
        *self.user_client.write().unwrap_or_else(|p| p.into_inner()) = client;
    }
}
