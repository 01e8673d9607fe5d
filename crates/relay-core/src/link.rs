//! Message link parsing (`https://t.me/...`).

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{ChatLocator, ChatRef, MessageId, Visibility};

/// Bot API offset for channel/supergroup ids (`-100` prefix).
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

/// A message link resolved into a source locator and a starting message id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedLink {
    pub locator: ChatLocator,
    pub index: MessageId,
}

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:https?://)?(?:www\.)?(?:t\.me|telegram\.me)/(?:c/(?P<channel>\d+)|(?P<name>[A-Za-z][A-Za-z0-9_]*))/(?P<index>\d+)/?(?:\?[^/\s]*)?$",
        )
        .expect("static link regex")
    })
}

/// Parse a message link.
///
/// Recognizes the private form `t.me/c/<channel>/<id>` and the public form
/// `t.me/<name>/<id>`. Everything else, including malformed numbers and extra path
/// segments, yields `None`.
pub fn resolve(text: &str) -> Option<ResolvedLink> {
    let caps = link_regex().captures(text.trim())?;

    let index = caps
        .name("index")?
        .as_str()
        .parse::<i32>()
        .ok()
        .filter(|id| *id > 0)?;

    let locator = if let Some(channel) = caps.name("channel") {
        let channel = channel.as_str().parse::<i64>().ok()?;
        ChatLocator {
            chat: ChatRef::Id(private_chat_id(channel)?),
            visibility: Visibility::Private,
        }
    } else {
        let name = caps.name("name")?.as_str();
        if name.eq_ignore_ascii_case("c") {
            return None;
        }
        ChatLocator {
            chat: ChatRef::Username(name.to_string()),
            visibility: Visibility::Public,
        }
    };

    Some(ResolvedLink {
        locator,
        index: MessageId(index),
    })
}

/// Rewrite a bare channel id from a `t.me/c/` link into its `-100`-prefixed form.
pub fn private_chat_id(channel: i64) -> Option<i64> {
    if channel <= 0 {
        return None;
    }
    CHANNEL_ID_OFFSET.checked_add(channel).map(|id| -id)
}

/// Parse a destination chat typed by the user: a numeric id, `@name` or `name`.
pub fn parse_destination(text: &str) -> Option<ChatRef> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(id) = text.parse::<i64>() {
        return Some(ChatRef::Id(id));
    }

    let name = text.strip_prefix('@').unwrap_or(text);
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| ChatRef::Username(name.to_string()))
}
