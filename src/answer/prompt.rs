//! Prompt assembly for grounded answer generation.

use crate::chat::ChatMessage;
use crate::index::RetrievedChunk;

/// Instruction sentence appended to the system prompt so the model declines
/// questions the retrieved context cannot answer. The wording is stable on
/// purpose: clients key off it to detect refusals.
pub const REFUSAL_PHRASE: &str =
    "I could not find the answer to that in the uploaded documents.";

/// Build the system message: configured instruction, refusal directive, and
/// the retrieved chunks as document context.
pub fn build_system_prompt(base_prompt: &str, context: &[RetrievedChunk]) -> String {
    let mut prompt = String::from(base_prompt.trim());
    prompt.push_str(
        "\n\nAnswer questions using only the document context below. Greetings and \
         small talk may be answered without it. If the context does not contain the \
         answer, reply exactly: ",
    );
    prompt.push_str(REFUSAL_PHRASE);
    prompt.push_str("\n\nDocument context:\n");

    if context.is_empty() {
        prompt.push_str("(no matching document content was found)\n");
    } else {
        for chunk in context {
            prompt.push_str("---\n");
            prompt.push_str(&format!("[{}] {}\n", chunk.document, chunk.text.trim()));
        }
    }
    prompt
}

/// Build the user message: prior conversation turns followed by the new
/// question, each line labeled by sender.
pub fn build_user_prompt(history: &[ChatMessage], question: &str) -> String {
    let mut prompt = String::new();
    if !history.is_empty() {
        prompt.push_str("Previous conversation:\n");
        for message in history {
            prompt.push_str(message.sender.label());
            prompt.push_str(": ");
            prompt.push_str(&message.text);
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    prompt.push_str("user: ");
    prompt.push_str(question);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Sender;

    fn chunk(document: &str, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            document: document.to_string(),
            text: text.to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn system_prompt_includes_context_and_refusal_directive() {
        let prompt = build_system_prompt(
            "You are a helpful AI assistant.",
            &[chunk("report", "Revenue grew by 12%.")],
        );
        assert!(prompt.starts_with("You are a helpful AI assistant."));
        assert!(prompt.contains(REFUSAL_PHRASE));
        assert!(prompt.contains("[report] Revenue grew by 12%."));
    }

    #[test]
    fn empty_context_is_stated_explicitly() {
        let prompt = build_system_prompt("Be brief.", &[]);
        assert!(prompt.contains("(no matching document content was found)"));
    }

    #[test]
    fn user_prompt_labels_history_turns() {
        let history = vec![
            ChatMessage {
                sender: Sender::User,
                text: "What grew?".into(),
            },
            ChatMessage {
                sender: Sender::Assistant,
                text: "Revenue grew by 12%.".into(),
            },
        ];
        let prompt = build_user_prompt(&history, "By how much exactly?");
        assert!(prompt.starts_with("Previous conversation:\n"));
        assert!(prompt.contains("user: What grew?\n"));
        assert!(prompt.contains("assistant: Revenue grew by 12%.\n"));
        assert!(prompt.ends_with("user: By how much exactly?"));
    }

    #[test]
    fn user_prompt_without_history_is_just_the_question() {
        let prompt = build_user_prompt(&[], "What grew?");
        assert_eq!(prompt, "user: What grew?");
    }
}
