//! Prompt assembly for one conversational turn.

use crate::models::ChatMessage;

const SYSTEM_PREAMBLE: &str = "You answer questions about the document \"{document}\". \
Use only the numbered context passages below and the earlier conversation. \
If the answer is not contained in them, say that you don't know.";

/// Builds the message list sent to the language model: a system message with
/// the retrieved passages, the prior turns in order, then the new question.
pub fn compose_messages(
    document_id: &str,
    context: &[String],
    history: &[ChatMessage],
    question: &str,
) -> Vec<ChatMessage> {
    let mut system = SYSTEM_PREAMBLE.replace("{document}", document_id);
    system.push_str("\n\nContext:\n");
    for (position, passage) in context.iter().enumerate() {
        system.push_str(&format!("[{}] {}\n\n", position + 1, passage.trim()));
    }

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system.trim_end()));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(question));
    messages
}

#[cfg(test)]
mod tests {
    use super::compose_messages;
    use crate::models::{ChatMessage, Role};

    #[test]
    fn context_history_and_question_are_ordered() {
        let history = vec![
            ChatMessage::user("What is the price?"),
            ChatMessage::assistant("450,000 dollars."),
        ];
        let context = vec!["Pool on the roof.".to_string(), "Gym on level 2.".to_string()];

        let messages = compose_messages("brochure", &context, &history, "What about the amenities?");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("\"brochure\""));
        assert!(messages[0].content.contains("[1] Pool on the roof."));
        assert!(messages[0].content.contains("[2] Gym on level 2."));
        assert_eq!(&messages[1..3], &history[..]);
        assert_eq!(messages[3], ChatMessage::user("What about the amenities?"));
    }
}
