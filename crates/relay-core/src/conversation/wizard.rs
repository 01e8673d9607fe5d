//! Batch wizard: link → count → destination.

use crate::{
    domain::{ChatLocator, MessageId, TransferRequest, Visibility},
    link,
};

pub const PROMPT_LINK: &str = "📩 Send me the first message link";
pub const PROMPT_COUNT: &str = "🔢 How many messages to transfer?";
pub const PROMPT_DESTINATION: &str = "📤 Enter destination chat ID";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WizardStep {
    Start,
    Count {
        source: ChatLocator,
        start: MessageId,
    },
    Destination {
        source: ChatLocator,
        start: MessageId,
        count: u32,
    },
}

/// What to do with a wizard reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WizardTransition {
    /// Store the new step and send the prompt.
    Advance { next: WizardStep, reply: String },
    /// Keep the current step and send the prompt again.
    Retry { reply: String },
    /// Drop the wizard and report the error.
    Abort { reply: String },
    /// All inputs collected.
    Run(TransferRequest),
}

/// Pure transition of the wizard on one text reply.
///
/// `user_client_ready` tells whether private sources can be read right now.
pub fn advance(
    step: &WizardStep,
    text: &str,
    max_batch_size: u32,
    user_client_ready: bool,
) -> WizardTransition {
    match step {
        WizardStep::Start => {
            let Some(resolved) = link::resolve(text) else {
                return WizardTransition::Abort {
                    reply: "❌ Invalid link format".to_string(),
                };
            };
            if resolved.locator.visibility == Visibility::Private && !user_client_ready {
                return WizardTransition::Abort {
                    reply: "❌ Private links need a user session. Use /login first".to_string(),
                };
            }
            WizardTransition::Advance {
                next: WizardStep::Count {
                    source: resolved.locator,
                    start: resolved.index,
                },
                reply: PROMPT_COUNT.to_string(),
            }
        }
        WizardStep::Count { source, start } => match parse_count(text, max_batch_size) {
            Some(count) => WizardTransition::Advance {
                next: WizardStep::Destination {
                    source: source.clone(),
                    start: *start,
                    count,
                },
                reply: PROMPT_DESTINATION.to_string(),
            },
            None => WizardTransition::Retry {
                reply: format!("❌ Please enter a number between 1 and {max_batch_size}"),
            },
        },
        WizardStep::Destination {
            source,
            start,
            count,
        } => match link::parse_destination(text) {
            Some(destination) => WizardTransition::Run(TransferRequest {
                source: source.clone(),
                start: *start,
                count: *count,
                destination,
            }),
            None => WizardTransition::Retry {
                reply: "❌ Please enter a chat ID (e.g. -1001234567890) or @username".to_string(),
            },
        },
    }
}

fn parse_count(text: &str, max: u32) -> Option<u32> {
    let text = text.trim();
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse::<u32>()
        .ok()
        .filter(|n| (1..=max).contains(n))
}
