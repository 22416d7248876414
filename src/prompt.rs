//! Conversational-context assembly for the assistant.
//!
//! Builds the ordered role-tagged message list sent to the completion
//! service: one system instruction parameterized by the room's participants
//! and the sender, followed by the window with user messages rewritten so the
//! model can tell speakers apart in a flattened transcript.

use crate::database::{MessageRole, StoredMessage};
use crate::llm_client::ChatMessage;

/// Distinct display names of user-role messages in the window, in order of
/// first appearance.
pub fn distinct_user_names(window: &[StoredMessage]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for message in window {
        if message.role == MessageRole::User && !names.contains(&message.user_name) {
            names.push(message.user_name.clone());
        }
    }
    names
}

/// Build the complete prompt for one assistant turn. Deterministic: identical
/// inputs produce identical output.
pub fn build_prompt(
    window: &[StoredMessage],
    participant_names: &[String],
    sender_name: &str,
    assistant_name: &str,
) -> Vec<ChatMessage> {
    let mut prompt = Vec::with_capacity(window.len() + 1);
    prompt.push(ChatMessage {
        role: "system".to_string(),
        content: system_instruction(participant_names, sender_name, assistant_name),
    });

    for message in window {
        let content = match message.role {
            MessageRole::User => format!("{}: {}", message.user_name, message.content),
            _ => message.content.clone(),
        };
        prompt.push(ChatMessage {
            role: message.role.as_db_str().to_string(),
            content,
        });
    }

    prompt
}

/// The system instruction restates the response-gate policy so that messages
/// reaching the model despite the gate still err toward silence.
fn system_instruction(participant_names: &[String], sender_name: &str, assistant_name: &str) -> String {
    let name_list = if participant_names.is_empty() {
        "users".to_string()
    } else {
        participant_names.join(", ")
    };

    format!(
        "You are {assistant_name} in a group chat with {name_list}. Be concise, friendly, and \
         mention names when replying to specific people. Keep responses conversational and \
         helpful. The current user who just sent a message is {sender_name}.\n\n\
         IMPORTANT: Only respond when the message seems to be directed at you, the group, or is \
         asking for general help. Do NOT respond to:\n\
         - Messages clearly addressed to specific people (like \"Hey John, how are you?\")\n\
         - Private conversations between users\n\
         - Very short acknowledgments (like \"ok\", \"thanks\", \"lol\")\n\
         - Personal questions directed at specific individuals\n\n\
         If you're unsure whether to respond, err on the side of not responding to avoid \
         interrupting conversations."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(role: MessageRole, user_name: &str, content: &str) -> StoredMessage {
        StoredMessage {
            id: format!("id-{}", content.len()),
            room_id: "room-1".to_string(),
            user_id: None,
            user_name: user_name.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn distinct_names_keep_first_appearance_order() {
        let window = vec![
            message(MessageRole::User, "Bob", "morning all"),
            message(MessageRole::Assistant, "ChatGPT", "good morning"),
            message(MessageRole::User, "Alice", "hi everyone"),
            message(MessageRole::User, "Bob", "any plans today?"),
            message(MessageRole::System, "Carol", "Carol joined the chat"),
        ];
        assert_eq!(distinct_user_names(&window), vec!["Bob", "Alice"]);
    }

    #[test]
    fn system_entry_comes_first_and_names_everyone() {
        let names = vec!["Alice".to_string(), "Bob".to_string()];
        let prompt = build_prompt(&[], &names, "Bob", "ChatGPT");
        assert_eq!(prompt.len(), 1);
        assert_eq!(prompt[0].role, "system");
        assert!(prompt[0].content.contains("group chat with Alice, Bob"));
        assert!(prompt[0].content.contains("just sent a message is Bob"));
    }

    #[test]
    fn empty_participant_set_falls_back_to_users() {
        let prompt = build_prompt(&[], &[], "Bob", "ChatGPT");
        assert!(prompt[0].content.contains("group chat with users"));
    }

    #[test]
    fn user_messages_get_speaker_prefixes() {
        let window = vec![
            message(MessageRole::User, "Alice", "anyone up for lunch?"),
            message(MessageRole::Assistant, "ChatGPT", "There's a new place nearby."),
            message(MessageRole::System, "Bob", "Bob joined the chat"),
        ];
        let names = vec!["Alice".to_string()];
        let prompt = build_prompt(&window, &names, "Alice", "ChatGPT");

        assert_eq!(prompt.len(), 4);
        assert_eq!(prompt[1].role, "user");
        assert_eq!(prompt[1].content, "Alice: anyone up for lunch?");
        assert_eq!(prompt[2].role, "assistant");
        assert_eq!(prompt[2].content, "There's a new place nearby.");
        assert_eq!(prompt[3].role, "system");
        assert_eq!(prompt[3].content, "Bob joined the chat");
    }

    #[test]
    fn assembly_is_deterministic() {
        let window = vec![
            message(MessageRole::User, "Alice", "what should we cook tonight?"),
            message(MessageRole::Assistant, "ChatGPT", "How about pasta?"),
        ];
        let names = vec!["Alice".to_string(), "Bob".to_string()];
        let first = build_prompt(&window, &names, "Alice", "ChatGPT");
        let second = build_prompt(&window, &names, "Alice", "ChatGPT");
        assert_eq!(first, second);
    }
}
