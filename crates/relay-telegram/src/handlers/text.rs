use std::sync::Arc;

use teloxide::prelude::*;

use relay_core::{
    conversation::TextDisposition,
    domain::{ChatRef, UserId},
};

use crate::router::AppState;

pub async fn handle_text(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user_id = UserId(user.id.0 as i64);
    let chat = ChatRef::Id(msg.chat.id.0);

    // Sequentialize dialogue replies per user; a running batch holds this lock too.
    let _guard = state.registry.lock_user(user_id).await;
    if state.conversation.handle_text(user_id, &chat, text).await == TextDisposition::Ignored {
        tracing::debug!(user_id = user_id.0, "text outside of any dialogue ignored");
    }
    Ok(())
}
