use std::fmt;

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub i32);

/// A chat addressed either by numeric id or by public username (without `@`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatRef {
    Id(i64),
    Username(String),
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRef::Id(id) => write!(f, "{id}"),
            ChatRef::Username(name) => write!(f, "@{name}"),
        }
    }
}

/// Which identity is allowed to read a source chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Name-addressable; readable through the bot identity.
    Public,
    /// Numeric-id-addressable; needs an authenticated user identity.
    Private,
}

/// Normalized reference to a source chat.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChatLocator {
    pub chat: ChatRef,
    pub visibility: Visibility,
}

/// A stable reference to a Telegram message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat: ChatRef,
    pub message_id: MessageId,
}

/// Content kind of a fetched message, resolved once at fetch time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaKind {
    None,
    Video {
        width: Option<u32>,
        height: Option<u32>,
        duration: Option<u32>,
    },
    VideoNote,
    Voice,
    Sticker,
    Audio,
    Photo,
    Document,
}

impl MediaKind {
    pub fn has_media(&self) -> bool {
        !matches!(self, MediaKind::None)
    }
}

/// A message fetched from a source chat.
#[derive(Clone, Debug)]
pub struct Item {
    pub id: MessageId,
    /// Text (or caption) rendered as Telegram HTML with its formatting entities.
    pub html: String,
    pub media: MediaKind,
    /// Size of the media payload in bytes, when the platform reports it.
    pub size: Option<u64>,
    /// Original file name or a suffix hint for the local payload.
    pub file_name: Option<String>,
}

/// A batch transfer collected by the wizard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: ChatLocator,
    pub start: MessageId,
    pub count: u32,
    pub destination: ChatRef,
}

impl TransferRequest {
    /// Source message ids in transfer order. Stops short of `count` at the end of the id space.
    pub fn indices(&self) -> impl Iterator<Item = MessageId> + '_ {
        (0..self.count).map_while(move |i| {
            let offset = i32::try_from(i).ok()?;
            self.start.0.checked_add(offset).map(MessageId)
        })
    }
}

/// Per-item result folded into the batch tally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    Sent,
    Copied,
    Completed,
    NotFound,
    Cancelled,
    Failed(String),
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TransferOutcome::Sent | TransferOutcome::Copied | TransferOutcome::Completed
        )
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Sent => f.write_str("Text message sent"),
            TransferOutcome::Copied => f.write_str("Media copied"),
            TransferOutcome::Completed => f.write_str("Transfer completed"),
            TransferOutcome::NotFound => f.write_str("Message not found"),
            TransferOutcome::Cancelled => f.write_str("Cancelled"),
            TransferOutcome::Failed(reason) => write!(f, "Error: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_indices_are_contiguous() {
        let req = TransferRequest {
            source: ChatLocator {
                chat: ChatRef::Username("chan".to_string()),
                visibility: Visibility::Public,
            },
            start: MessageId(100),
            count: 5,
            destination: ChatRef::Id(1),
        };
        let ids: Vec<i32> = req.indices().map(|m| m.0).collect();
        assert_eq!(ids, vec![100, 101, 102, 103, 104]);
    }

    #[test]
    fn indices_never_wrap_past_the_id_space() {
        let req = TransferRequest {
            source: ChatLocator {
                chat: ChatRef::Username("chan".to_string()),
                visibility: Visibility::Public,
            },
            start: MessageId(i32::MAX - 1),
            count: u32::MAX,
            destination: ChatRef::Id(1),
        };
        let ids: Vec<i32> = req.indices().map(|m| m.0).collect();
        assert_eq!(ids, vec![i32::MAX - 1, i32::MAX]);
    }

    #[test]
    fn only_delivered_outcomes_count_as_success() {
        assert!(TransferOutcome::Sent.is_success());
        assert!(TransferOutcome::Copied.is_success());
        assert!(TransferOutcome::Completed.is_success());
        assert!(!TransferOutcome::Cancelled.is_success());
        assert!(!TransferOutcome::NotFound.is_success());
        assert!(!TransferOutcome::Failed("boom".into()).is_success());
    }
}
