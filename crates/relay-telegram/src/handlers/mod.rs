//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - validates the sender against the allow-list
//! - takes the per-user lock where the conversation must stay ordered
//! - calls into the `relay-core` conversation service

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use relay_core::domain::UserId;
use relay_core::security::is_authorized;

use crate::router::AppState;
mod commands;
mod text;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));

    if !is_authorized(user_id, &state.cfg.allowed_users) {
        tracing::info!(chat_id = msg.chat.id.0, "rejected unauthorized sender");
        let _ = bot
            .send_message(
                msg.chat.id,
                "Unauthorized. Contact the bot owner for access.",
            )
            .await;
        return Ok(());
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };

    if text.starts_with('/') {
        return commands::handle_command(bot, msg, state).await;
    }

    text::handle_text(msg, state).await
}
