use std::sync::Arc;

use teloxide::{prelude::*, types::ParseMode};

use relay_core::domain::{ChatRef, UserId};

use crate::router::AppState;

const HELP: &str = "🤖 <b>Relay Bot</b>\n\n\
Copies a range of messages from one chat to another.\n\n\
<b>📋 Commands:</b>\n\
/batch - Start a batch transfer\n\
/login - Log in with a user account (needed for private links)\n\
/logout - Disconnect the user account\n\
/cancel - Stop the running batch or the pending dialogue\n\
/status - Show session and batch status\n\n\
<b>💡 Links:</b>\n\
• Public: <code>https://t.me/channel/123</code>\n\
• Private: <code>https://t.me/c/1234567890/123</code>";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let chat = ChatRef::Id(msg.chat.id.0);
    let (cmd, _arg) = parse_command(text);
    tracing::info!(user_id = user_id.0, command = %cmd, "command");

    match cmd.as_str() {
        "start" | "help" => {
            bot.send_message(msg.chat.id, HELP)
                .parse_mode(ParseMode::Html)
                .await?;
        }

        "batch" => {
            if state.registry.active_task(user_id).is_some() {
                bot.send_message(
                    msg.chat.id,
                    "⏳ A batch is already running. Use /cancel to stop it",
                )
                .await?;
                return Ok(());
            }
            let _guard = state.registry.lock_user(user_id).await;
            state.conversation.start_wizard(user_id, &chat).await;
        }

        "login" => {
            let _guard = state.registry.lock_user(user_id).await;
            state.conversation.start_login(user_id, &chat).await;
        }

        "logout" => {
            let _guard = state.registry.lock_user(user_id).await;
            state.conversation.logout(user_id, &chat).await;
        }

        // Runs without the user lock so it reaches a batch that is holding it.
        "cancel" => state.conversation.cancel(user_id, &chat).await,

        "status" => state.conversation.status(user_id, &chat).await,

        _ => {
            bot.send_message(msg.chat.id, "Unknown command. Use /start for help")
                .await?;
        }
    }

    Ok(())
}
