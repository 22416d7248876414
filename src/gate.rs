//! Response gate for the group-chat assistant.
//!
//! Decides, per inbound message, whether the assistant should stay out of the
//! exchange. Heuristic and intentionally conservative: any matching rule
//! suppresses the reply. All matching happens on the trimmed, lowercased text
//! and is substring-based rather than word-boundary aware, so a participant
//! name that occurs inside another word can still trigger suppression.

use regex_lite::Regex;

/// Minimum normalized length for a message to warrant a generated reply.
/// Anything shorter is treated as an acknowledgment ("ok", "thanks", "lol").
const MIN_MESSAGE_CHARS: usize = 10;

/// Leading patterns that address a specific person. The capture holds the
/// addressed token.
const DIRECT_ADDRESS_PATTERNS: &[&str] = &[
    r"^@(\w+)",          // @username
    r"^hey\s+(\w+)",     // hey john
    r"^hi\s+(\w+)",      // hi sarah
    r"^hello\s+(\w+)",   // hello mike
    r"^(\w+)[,:]",       // john, or john:
    r"^dear\s+(\w+)",    // dear alice
];

/// Phrases signaling a private exchange between participants.
const PRIVACY_INDICATORS: &[&str] = &[
    "private",
    "between us",
    "just between",
    "don't tell",
    "keep this",
    "confidential",
    "secret",
];

/// Phrases that read as a personal question. Only suppress when the message
/// also names another participant.
const PERSONAL_QUESTION_PHRASES: &[&str] = &[
    "how are you?",
    "how's your",
    "how was your",
    "did you have",
    "are you going",
    "will you be",
    "can you help me",
    "do you have",
    "what do you think",
];

/// Outcome of evaluating one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    /// Nothing matched; the assistant should reply.
    Respond,
    /// A suppression rule matched; stay silent.
    Suppress(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Message too short to warrant a reply.
    TooShort,
    /// Message opens by addressing another participant by name.
    DirectAddress(String),
    /// Message contains a private-conversation indicator.
    PrivateExchange(&'static str),
    /// Personal question naming another participant.
    PersonalQuestion(String),
}

/// Evaluate the gate rules in order; the first match wins.
///
/// `participant_names` are the distinct user display names seen in the room
/// window, `sender_name` the display name of whoever sent `content`. Pure and
/// infallible: malformed or empty input falls under the length rule.
pub fn evaluate(content: &str, participant_names: &[String], sender_name: &str) -> GateVerdict {
    let message = content.trim().to_lowercase();
    let sender = sender_name.trim().to_lowercase();

    if message.chars().count() < MIN_MESSAGE_CHARS {
        return GateVerdict::Suppress(SkipReason::TooShort);
    }

    if let Some(addressed) = addressed_other_participant(&message, participant_names, &sender) {
        return GateVerdict::Suppress(SkipReason::DirectAddress(addressed));
    }

    for indicator in PRIVACY_INDICATORS {
        if message.contains(indicator) {
            return GateVerdict::Suppress(SkipReason::PrivateExchange(indicator));
        }
    }

    if PERSONAL_QUESTION_PHRASES.iter().any(|p| message.contains(p)) {
        let named_other = participant_names.iter().find(|name| {
            let lowered = name.to_lowercase();
            lowered != sender && message.contains(&lowered)
        });
        if let Some(name) = named_other {
            return GateVerdict::Suppress(SkipReason::PersonalQuestion(name.clone()));
        }
    }

    GateVerdict::Respond
}

/// Convenience wrapper: should the assistant skip replying to this message?
pub fn should_skip(content: &str, participant_names: &[String], sender_name: &str) -> bool {
    matches!(
        evaluate(content, participant_names, sender_name),
        GateVerdict::Suppress(_)
    )
}

/// If the message opens by addressing a participant other than the sender,
/// return that participant's (lowercased) name.
fn addressed_other_participant(
    message: &str,
    participant_names: &[String],
    sender: &str,
) -> Option<String> {
    for pattern in DIRECT_ADDRESS_PATTERNS {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(caps) = re.captures(message) {
                let addressed = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
                if addressed.is_empty() || addressed == sender {
                    continue;
                }
                if participant_names
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(addressed))
                {
                    return Some(addressed.to_string());
                }
            }
        }
    }
    None
}
