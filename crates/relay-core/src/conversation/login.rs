//! Login dialogue: phone → code → optional 2FA password.
//!
//! Every path out of the dialogue tears the ephemeral auth handle down exactly once;
//! the handle is an `Option<Box<dyn AuthHandle>>` that is `take()`n before any
//! terminal step, and `teardown` consumes it.

use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    domain::{ChatRef, UserId},
    formatting::escape_html,
    messaging::port::MessagingPort,
    ports::{AuthHandle, AuthPort, CodeOutcome, UserClientConnector},
    registry::SessionRegistry,
};

pub const PROMPT_PHONE: &str = "📱 Please send your phone number in international format (+1234567890):";
pub const PROMPT_CODE: &str = "🔑 Enter the code you received (format: 1 2 3 4 5):";
pub const PROMPT_PASSWORD: &str = "🔐 Enter your 2FA password:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginStage {
    Phone,
    Code { phone: String },
    Password,
}

pub struct LoginSession {
    pub stage: LoginStage,
    pub generation: u64,
    handle: Option<Box<dyn AuthHandle>>,
}

impl LoginSession {
    pub fn new(generation: u64) -> Self {
        Self {
            stage: LoginStage::Phone,
            generation,
            handle: None,
        }
    }

    /// Abandon the dialogue, tearing down the handle if one was created.
    pub async fn close(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.teardown().await;
        }
    }
}

/// Drives one login step at a time.
pub struct LoginFlow {
    messenger: Arc<dyn MessagingPort>,
    registry: Arc<SessionRegistry>,
    auth: Arc<dyn AuthPort>,
    connector: Arc<dyn UserClientConnector>,
    code_timeout: Duration,
}

impl LoginFlow {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        registry: Arc<SessionRegistry>,
        auth: Arc<dyn AuthPort>,
        connector: Arc<dyn UserClientConnector>,
        code_timeout: Duration,
    ) -> Self {
        Self {
            messenger,
            registry,
            auth,
            connector,
            code_timeout,
        }
    }

    /// Handle one reply. Returns the session to keep, or `None` when the dialogue ended.
    pub async fn step(
        &self,
        user: UserId,
        chat: &ChatRef,
        mut session: LoginSession,
        text: &str,
    ) -> Option<LoginSession> {
        match session.stage.clone() {
            LoginStage::Phone => self.on_phone(user, chat, session, text.trim()).await,
            LoginStage::Code { .. } => {
                let code: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                let Some(handle) = session.handle.take() else {
                    self.reply(chat, "❌ Login expired. Use /login to start again")
                        .await;
                    return None;
                };
                self.on_code(user, chat, handle, &code).await
            }
            LoginStage::Password => {
                let Some(handle) = session.handle.take() else {
                    self.reply(chat, "❌ Login expired. Use /login to start again")
                        .await;
                    return None;
                };
                self.on_password(user, chat, handle, text).await;
                None
            }
        }
    }

    async fn on_phone(
        &self,
        user: UserId,
        chat: &ChatRef,
        session: LoginSession,
        phone: &str,
    ) -> Option<LoginSession> {
        let mut handle = match self.auth.create_handle().await {
            Ok(h) => h,
            Err(e) => {
                warn!(user_id = user.0, error = %e, "login: could not create auth handle");
                self.reply(chat, &format!("❌ Error: {}", escape_html(&e.to_string())))
                    .await;
                return None;
            }
        };

        if let Err(e) = handle.request_code(phone).await {
            handle.teardown().await;
            info!(user_id = user.0, error = %e, "login: code request failed");
            self.reply(chat, &format!("❌ Error: {}", escape_html(&e.to_string())))
                .await;
            return None;
        }

        let next = LoginSession {
            stage: LoginStage::Code {
                phone: phone.to_string(),
            },
            generation: session.generation,
            handle: Some(handle),
        };
        self.arm_timeout(user, chat.clone(), next.generation);
        self.reply(chat, PROMPT_CODE).await;
        Some(next)
    }

    async fn on_code(
        &self,
        user: UserId,
        chat: &ChatRef,
        mut handle: Box<dyn AuthHandle>,
        code: &str,
    ) -> Option<LoginSession> {
        match handle.submit_code(code).await {
            Ok(CodeOutcome::SignedIn) => {
                self.finish(user, chat, handle).await;
                None
            }
            Ok(CodeOutcome::PasswordRequired) => {
                // Fresh generation: the code watchdog must not cut the password prompt short.
                let generation = self.registry.next_login_generation();
                self.arm_timeout(user, chat.clone(), generation);
                self.reply(chat, PROMPT_PASSWORD).await;
                Some(LoginSession {
                    stage: LoginStage::Password,
                    generation,
                    handle: Some(handle),
                })
            }
            Err(e) => {
                handle.teardown().await;
                info!(user_id = user.0, error = %e, "login: code rejected");
                self.reply(
                    chat,
                    &format!("❌ Login failed: {}", escape_html(&e.to_string())),
                )
                .await;
                None
            }
        }
    }

    async fn on_password(
        &self,
        user: UserId,
        chat: &ChatRef,
        mut handle: Box<dyn AuthHandle>,
        password: &str,
    ) {
        match handle.submit_password(password).await {
            Ok(()) => self.finish(user, chat, handle).await,
            Err(e) => {
                handle.teardown().await;
                info!(user_id = user.0, error = %e, "login: 2FA rejected");
                self.reply(
                    chat,
                    &format!("❌ 2FA failed: {}", escape_html(&e.to_string())),
                )
                .await;
            }
        }
    }

    /// Export the credential, close the handle, report, and connect the user client.
    async fn finish(&self, user: UserId, chat: &ChatRef, handle: Box<dyn AuthHandle>) {
        let exported = handle.export_credential().await;
        handle.teardown().await;

        let credential = match exported {
            Ok(c) => c,
            Err(e) => {
                warn!(user_id = user.0, error = %e, "login: credential export failed");
                self.reply(
                    chat,
                    &format!("❌ Login failed: {}", escape_html(&e.to_string())),
                )
                .await;
                return;
            }
        };

        info!(user_id = user.0, "login: signed in");
        self.reply(
            chat,
            &format!(
                "✅ Login successful!\nYour session string:\n<code>{}</code>\n\nStore it as SESSION_STRING to keep it across restarts.",
                escape_html(&credential)
            ),
        )
        .await;

        match self.connector.connect(&credential).await {
            Ok(client) => {
                self.registry.install_user_client(Some(client));
                self.reply(chat, "🔓 User session connected. Private links are enabled.")
                    .await;
            }
            Err(e) => {
                warn!(user_id = user.0, error = %e, "login: user client connect failed");
                self.reply(
                    chat,
                    "⚠️ Could not connect the new session now. Restart with SESSION_STRING set.",
                )
                .await;
            }
        }
    }

    /// Abandon the dialogue if the code or the 2FA password has not arrived within the timeout.
    fn arm_timeout(&self, user: UserId, chat: ChatRef, generation: u64) {
        let registry = self.registry.clone();
        let messenger = self.messenger.clone();
        let timeout = self.code_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(session) = registry.take_login_if(user, |s| {
                s.generation == generation && !matches!(s.stage, LoginStage::Phone)
            }) else {
                return;
            };
            session.close().await;
            info!(user_id = user.0, "login: dialogue timed out");
            let _ = messenger
                .send_html(&chat, "⌛ Login timed out. Use /login to start again")
                .await;
        });
    }

    async fn reply(&self, chat: &ChatRef, html: &str) {
        if let Err(e) = self.messenger.send_html(chat, html).await {
            warn!(error = %e, "login: reply failed");
        }
    }
}
