//! Per-user conversation state machine.
//!
//! A user is in at most one dialogue: the batch wizard or the login flow. Starting
//! either one replaces whatever was pending; a replaced login is closed.

pub mod login;
pub mod wizard;

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    batch::BatchOrchestrator,
    domain::{ChatRef, UserId},
    messaging::port::MessagingPort,
    registry::SessionRegistry,
};

use self::{
    login::{LoginFlow, LoginSession, LoginStage, PROMPT_PHONE},
    wizard::{WizardStep, WizardTransition, PROMPT_LINK},
};

pub enum ConversationState {
    Wizard(WizardStep),
    Login(LoginSession),
}

impl ConversationState {
    fn describe(&self) -> &'static str {
        match self {
            ConversationState::Wizard(WizardStep::Start) => "batch wizard (waiting for link)",
            ConversationState::Wizard(WizardStep::Count { .. }) => "batch wizard (waiting for count)",
            ConversationState::Wizard(WizardStep::Destination { .. }) => {
                "batch wizard (waiting for destination)"
            }
            ConversationState::Login(s) => match s.stage {
                LoginStage::Phone => "login (waiting for phone)",
                LoginStage::Code { .. } => "login (waiting for code)",
                LoginStage::Password => "login (waiting for 2FA password)",
            },
        }
    }

    async fn close(self) {
        if let ConversationState::Login(session) = self {
            session.close().await;
        }
    }
}

/// Whether a free-text message belonged to a dialogue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextDisposition {
    Handled,
    Ignored,
}

pub struct Conversation {
    messenger: Arc<dyn MessagingPort>,
    registry: Arc<SessionRegistry>,
    orchestrator: BatchOrchestrator,
    login: LoginFlow,
    max_batch_size: u32,
}

impl Conversation {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        registry: Arc<SessionRegistry>,
        orchestrator: BatchOrchestrator,
        login: LoginFlow,
        max_batch_size: u32,
    ) -> Self {
        Self {
            messenger,
            registry,
            orchestrator,
            login,
            max_batch_size,
        }
    }

    /// `/batch`
    pub async fn start_wizard(&self, user: UserId, chat: &ChatRef) {
        self.install(user, ConversationState::Wizard(WizardStep::Start))
            .await;
        self.reply(chat, PROMPT_LINK).await;
    }

    /// `/login`
    pub async fn start_login(&self, user: UserId, chat: &ChatRef) {
        let generation = self.registry.next_login_generation();
        self.install(user, ConversationState::Login(LoginSession::new(generation)))
            .await;
        self.reply(chat, PROMPT_PHONE).await;
    }

    /// `/cancel`: stop the running batch, or else drop the pending dialogue.
    pub async fn cancel(&self, user: UserId, chat: &ChatRef) {
        if self.registry.cancel_task(user) {
            info!(user_id = user.0, "cancel: batch flagged");
            if let Some(status) = self.registry.active_task(user).and_then(|t| t.status) {
                if let Err(e) = self.messenger.edit_html(&status, "🛑 Cancelling...").await {
                    warn!(error = %e, "cancel: status edit failed");
                }
            }
            self.reply(chat, "🛑 Cancelling after the current message...")
                .await;
            return;
        }
        self.registry.bump_cancel_epoch(user);
        match self.registry.take_conversation(user) {
            Some(state) => {
                state.close().await;
                self.reply(chat, "❌ Cancelled").await;
            }
            // The in-flight step sees the new epoch and closes its state itself.
            None if self.registry.step_in_flight(user) => {
                info!(user_id = user.0, "cancel: dialogue step in flight");
                self.reply(chat, "❌ Cancelled").await;
            }
            None => self.reply(chat, "ℹ️ Nothing to cancel").await,
        }
    }

    /// `/status`
    pub async fn status(&self, user: UserId, chat: &ChatRef) {
        self.reply(chat, &self.status_text(user)).await;
    }

    pub fn status_text(&self, user: UserId) -> String {
        let session = if self.registry.user_client().is_some() {
            "connected"
        } else {
            "not connected (public links only)"
        };
        let batch = if self.registry.active_task(user).is_some() {
            "running"
        } else {
            "idle"
        };
        let pending = self
            .registry
            .inspect_conversation(user, ConversationState::describe)
            .unwrap_or("none");
        format!("📊 <b>Status</b>\n🔐 User session: {session}\n📦 Batch: {batch}\n💬 Pending: {pending}")
    }

    /// `/logout`: drop the in-process user client.
    pub async fn logout(&self, user: UserId, chat: &ChatRef) {
        if self.registry.user_client().is_none() {
            self.reply(chat, "ℹ️ No user session connected").await;
            return;
        }
        self.registry.install_user_client(None);
        info!(user_id = user.0, "logout: user client dropped");
        self.reply(chat, "🔒 User session disconnected. Private links are disabled")
            .await;
    }

    /// Feed one free-text message to the user's pending dialogue.
    pub async fn handle_text(&self, user: UserId, chat: &ChatRef, text: &str) -> TextDisposition {
        let Some((state, epoch)) = self.registry.begin_step(user) else {
            return TextDisposition::Ignored;
        };

        match state {
            ConversationState::Wizard(step) => {
                let ready = self.registry.user_client().is_some();
                match wizard::advance(&step, text, self.max_batch_size, ready) {
                    WizardTransition::Advance { next, reply } => {
                        self.restore(user, ConversationState::Wizard(next), epoch)
                            .await;
                        self.reply(chat, &reply).await;
                    }
                    WizardTransition::Retry { reply } => {
                        self.restore(user, ConversationState::Wizard(step), epoch)
                            .await;
                        self.reply(chat, &reply).await;
                    }
                    WizardTransition::Abort { reply } => self.reply(chat, &reply).await,
                    WizardTransition::Run(request) => {
                        self.orchestrator.run(user, chat, &request).await;
                    }
                }
            }
            ConversationState::Login(session) => {
                if let Some(next) = self.login.step(user, chat, session, text).await {
                    self.restore(user, ConversationState::Login(next), epoch)
                        .await;
                }
            }
        }
        self.registry.end_step(user);
        TextDisposition::Handled
    }

    async fn install(&self, user: UserId, state: ConversationState) {
        if let Some(previous) = self.registry.replace_conversation(user, state) {
            previous.close().await;
        }
    }

    async fn restore(&self, user: UserId, state: ConversationState, epoch: u64) {
        if let Some(stale) = self.registry.restore_conversation(user, state, epoch) {
            stale.close().await;
        }
    }

    async fn reply(&self, chat: &ChatRef, html: &str) {
        if let Err(e) = self.messenger.send_html(chat, html).await {
            warn!(error = %e, "conversation: reply failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use super::*;
    use crate::{
        dispatch::ContentDispatcher,
        domain::MessageId,
        messaging::testing::FakeMessenger,
        progress::ProgressReporter,
        testing::{AuthScript, FakeAuth, FakeConnector, FakeSource, SourceBehavior},
    };

    const USER: UserId = UserId(5);
    const CODE_TIMEOUT: Duration = Duration::from_secs(300);

    struct Harness {
        messenger: Arc<FakeMessenger>,
        registry: Arc<SessionRegistry>,
        bot: Arc<FakeSource>,
        auth: Arc<FakeAuth>,
        connector: Arc<FakeConnector>,
        conversation: Conversation,
    }

    fn harness(behavior: SourceBehavior, script: AuthScript) -> Harness {
        let messenger = Arc::new(FakeMessenger::default());
        let registry = Arc::new(SessionRegistry::default());
        let bot = Arc::new(FakeSource::new(behavior));
        let auth = Arc::new(FakeAuth::new(script));
        let connector = Arc::new(FakeConnector::default());

        let dispatcher = ContentDispatcher::new(
            messenger.clone(),
            registry.clone(),
            Arc::new(ProgressReporter::new(messenger.clone(), 10)),
            PathBuf::from("/nonexistent"),
        );
        let orchestrator =
            BatchOrchestrator::new(messenger.clone(), registry.clone(), dispatcher, bot.clone());
        let login = LoginFlow::new(
            messenger.clone(),
            registry.clone(),
            auth.clone(),
            connector.clone(),
            CODE_TIMEOUT,
        );
        let conversation =
            Conversation::new(messenger.clone(), registry.clone(), orchestrator, login, 100);
        Harness {
            messenger,
            registry,
            bot,
            auth,
            connector,
            conversation,
        }
    }

    fn chat() -> ChatRef {
        ChatRef::Id(USER.0)
    }

    impl Harness {
        async fn say(&self, text: &str) -> TextDisposition {
            self.conversation.handle_text(USER, &chat(), text).await
        }

        fn last_reply(&self) -> String {
            self.messenger.sent_html().last().cloned().unwrap_or_default()
        }

        fn login_stage(&self) -> Option<LoginStage> {
            self.registry
                .inspect_conversation(USER, |s| match s {
                    ConversationState::Login(l) => Some(l.stage.clone()),
                    ConversationState::Wizard(_) => None,
                })
                .flatten()
        }
    }

    #[tokio::test]
    async fn public_batch_end_to_end() {
        let h = harness(
            SourceBehavior {
                media: [43].into_iter().collect(),
                ..SourceBehavior::default()
            },
            AuthScript::default(),
        );

        h.conversation.start_wizard(USER, &chat()).await;
        assert_eq!(h.last_reply(), wizard::PROMPT_LINK);
        h.say("https://t.me/examplechan/42").await;
        assert_eq!(h.last_reply(), wizard::PROMPT_COUNT);
        h.say("3").await;
        assert_eq!(h.last_reply(), wizard::PROMPT_DESTINATION);
        h.say("123456789").await;

        assert_eq!(
            h.bot.fetches(),
            vec![MessageId(42), MessageId(43), MessageId(44)]
        );
        assert_eq!(
            h.messenger.copies(),
            vec![(
                ChatRef::Username("examplechan".to_string()),
                MessageId(43),
                ChatRef::Id(123456789)
            )]
        );
        let to_destination: Vec<String> = h
            .messenger
            .sends()
            .into_iter()
            .filter(|(c, _)| *c == ChatRef::Id(123456789))
            .map(|(_, t)| t)
            .collect();
        assert_eq!(
            to_destination,
            vec!["message <b>42</b>".to_string(), "message <b>44</b>".to_string()]
        );
        assert_eq!(h.last_reply(), "✅ Completed! 3/3 transferred");
        assert!(!h.registry.has_conversation(USER));
    }

    #[tokio::test]
    async fn out_of_range_count_keeps_step() {
        let h = harness(SourceBehavior::default(), AuthScript::default());
        h.conversation.start_wizard(USER, &chat()).await;
        h.say("https://t.me/examplechan/42").await;

        h.say("500").await;
        assert!(h.last_reply().contains("between 1 and 100"));
        assert!(h
            .registry
            .inspect_conversation(USER, |s| matches!(
                s,
                ConversationState::Wizard(WizardStep::Count { .. })
            ))
            .unwrap_or(false));

        h.say("2").await;
        assert_eq!(h.last_reply(), wizard::PROMPT_DESTINATION);
    }

    #[tokio::test]
    async fn bad_link_deletes_state_and_later_text_is_ignored() {
        let h = harness(SourceBehavior::default(), AuthScript::default());
        h.conversation.start_wizard(USER, &chat()).await;

        assert_eq!(h.say("not a link").await, TextDisposition::Handled);
        assert_eq!(h.last_reply(), "❌ Invalid link format");
        assert!(!h.registry.has_conversation(USER));

        let replies = h.messenger.sent_html().len();
        assert_eq!(h.say("3").await, TextDisposition::Ignored);
        assert_eq!(h.messenger.sent_html().len(), replies);
    }

    #[tokio::test]
    async fn private_link_requires_login() {
        let h = harness(SourceBehavior::default(), AuthScript::default());
        h.conversation.start_wizard(USER, &chat()).await;
        h.say("https://t.me/c/1234567890/5").await;
        assert!(h.last_reply().contains("/login"));
        assert!(!h.registry.has_conversation(USER));
    }

    #[tokio::test]
    async fn cancel_drops_pending_wizard() {
        let h = harness(SourceBehavior::default(), AuthScript::default());
        h.conversation.start_wizard(USER, &chat()).await;
        h.conversation.cancel(USER, &chat()).await;
        assert_eq!(h.last_reply(), "❌ Cancelled");
        assert!(!h.registry.has_conversation(USER));

        h.conversation.cancel(USER, &chat()).await;
        assert_eq!(h.last_reply(), "ℹ️ Nothing to cancel");
    }

    #[tokio::test]
    async fn login_signs_in_and_installs_user_client() {
        let h = harness(SourceBehavior::default(), AuthScript::default());
        assert!(h.registry.user_client().is_none());

        h.conversation.start_login(USER, &chat()).await;
        h.say("+15550001111").await;
        assert_eq!(
            h.login_stage(),
            Some(LoginStage::Code {
                phone: "+15550001111".to_string()
            })
        );

        h.say("1 2 3 4 5").await;
        assert!(!h.registry.has_conversation(USER));
        assert_eq!(h.auth.teardowns(), 1);
        assert!(h
            .messenger
            .sent_html()
            .iter()
            .any(|t| t.contains("<code>session-for-+15550001111</code>")));
        assert_eq!(
            *h.connector.credentials.lock().unwrap(),
            vec!["session-for-+15550001111".to_string()]
        );
        assert!(h.registry.user_client().is_some());
    }

    #[tokio::test]
    async fn password_required_keeps_handle_until_terminal() {
        let h = harness(
            SourceBehavior::default(),
            AuthScript {
                password_required: true,
                ..AuthScript::default()
            },
        );
        h.conversation.start_login(USER, &chat()).await;
        h.say("+15550001111").await;
        h.say("12345").await;

        assert_eq!(h.login_stage(), Some(LoginStage::Password));
        assert_eq!(h.last_reply(), login::PROMPT_PASSWORD);
        assert_eq!(h.auth.teardowns(), 0);

        h.say("hunter2").await;
        assert_eq!(h.auth.teardowns(), 1);
        assert!(!h.registry.has_conversation(USER));
    }

    #[tokio::test]
    async fn rejected_password_tears_down_once() {
        let h = harness(
            SourceBehavior::default(),
            AuthScript {
                password_required: true,
                reject_password: true,
                ..AuthScript::default()
            },
        );
        h.conversation.start_login(USER, &chat()).await;
        h.say("+15550001111").await;
        h.say("12345").await;
        h.say("wrong").await;

        assert_eq!(h.auth.teardowns(), 1);
        assert!(h.last_reply().starts_with("❌ 2FA failed"));
        assert!(h.registry.user_client().is_none());
        assert_eq!(h.say("again").await, TextDisposition::Ignored);
    }

    #[tokio::test]
    async fn rejected_code_and_phone_tear_down_once() {
        let h = harness(SourceBehavior::default(), AuthScript::default());
        h.conversation.start_login(USER, &chat()).await;
        h.say("+15550001111").await;
        h.say("99999").await;
        assert_eq!(h.auth.teardowns(), 1);
        assert!(!h.registry.has_conversation(USER));

        let h = harness(
            SourceBehavior::default(),
            AuthScript {
                reject_phone: true,
                ..AuthScript::default()
            },
        );
        h.conversation.start_login(USER, &chat()).await;
        h.say("garbage").await;
        assert_eq!(h.auth.created(), 1);
        assert_eq!(h.auth.teardowns(), 1);
        assert!(!h.registry.has_conversation(USER));
    }

    #[tokio::test]
    async fn replacing_a_login_tears_its_handle_down() {
        let h = harness(SourceBehavior::default(), AuthScript::default());
        h.conversation.start_login(USER, &chat()).await;
        h.say("+15550001111").await;
        assert_eq!(h.auth.teardowns(), 0);

        h.conversation.start_wizard(USER, &chat()).await;
        assert_eq!(h.auth.teardowns(), 1);

        h.conversation.start_login(USER, &chat()).await;
        h.say("+15550001111").await;
        h.conversation.cancel(USER, &chat()).await;
        assert_eq!(h.auth.teardowns(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn code_entry_times_out() {
        let h = harness(SourceBehavior::default(), AuthScript::default());
        h.conversation.start_login(USER, &chat()).await;
        h.say("+15550001111").await;

        tokio::time::sleep(CODE_TIMEOUT + Duration::from_secs(1)).await;
        for _ in 0..10 {
            if h.auth.teardowns() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(h.auth.teardowns(), 1);
        assert!(!h.registry.has_conversation(USER));
        assert!(h.last_reply().starts_with("⌛ Login timed out"));
        assert_eq!(h.say("12345").await, TextDisposition::Ignored);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timeout_leaves_newer_login_alone() {
        let h = harness(SourceBehavior::default(), AuthScript::default());
        h.conversation.start_login(USER, &chat()).await;
        h.say("+15550001111").await;

        tokio::time::sleep(CODE_TIMEOUT / 2).await;
        h.conversation.start_login(USER, &chat()).await;
        h.say("+15550002222").await;
        assert_eq!(h.auth.teardowns(), 1);

        tokio::time::sleep(CODE_TIMEOUT / 2 + Duration::from_secs(1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.auth.teardowns(), 1);
        assert!(h.login_stage().is_some());
    }

    #[tokio::test]
    async fn cancel_during_login_step_is_not_lost() {
        let h = harness(SourceBehavior::default(), AuthScript::default());
        let gate = Arc::new(tokio::sync::Notify::new());
        h.auth.gate_request_code(gate.clone());
        h.conversation.start_login(USER, &chat()).await;

        let step = h.say("+15550001111");
        let interrupt = async {
            while h.auth.created() == 0 {
                tokio::task::yield_now().await;
            }
            h.conversation.cancel(USER, &chat()).await;
            assert_eq!(h.last_reply(), "❌ Cancelled");
            gate.notify_one();
        };
        tokio::join!(step, interrupt);

        assert!(!h.registry.has_conversation(USER));
        assert_eq!(h.auth.teardowns(), 1);
        assert_eq!(h.say("12345").await, TextDisposition::Ignored);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_password_prompt_times_out() {
        let h = harness(
            SourceBehavior::default(),
            AuthScript {
                password_required: true,
                ..AuthScript::default()
            },
        );
        h.conversation.start_login(USER, &chat()).await;
        h.say("+15550001111").await;
        tokio::time::sleep(CODE_TIMEOUT / 2).await;
        h.say("12345").await;
        assert_eq!(h.login_stage(), Some(LoginStage::Password));

        // The code-step watchdog expires here and must leave the password prompt alone.
        tokio::time::sleep(CODE_TIMEOUT / 2 + Duration::from_secs(1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.login_stage(), Some(LoginStage::Password));
        assert_eq!(h.auth.teardowns(), 0);

        tokio::time::sleep(CODE_TIMEOUT / 2).await;
        for _ in 0..10 {
            if h.auth.teardowns() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.auth.teardowns(), 1);
        assert!(!h.registry.has_conversation(USER));
        assert!(h.last_reply().starts_with("⌛ Login timed out"));
    }

    #[tokio::test]
    async fn status_reports_session_and_pending_dialogue() {
        let h = harness(SourceBehavior::default(), AuthScript::default());
        h.conversation.start_wizard(USER, &chat()).await;
        let text = h.conversation.status_text(USER);
        assert!(text.contains("not connected"));
        assert!(text.contains("waiting for link"));
        assert!(text.contains("idle"));
    }
}
