//! Cited answer generation.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::Result;
use crate::llm::{GenerationOptions, LanguageModel, TextStream};
use crate::models::{ChatMessage, Document};
use crate::prompt::{render, PromptMessage};

/// Serialize documents as the numbered citation context.
///
/// `"{i}. {page_content}"` per document, numbered from 1 in the given
/// order, joined by newlines. The numbers are what the model cites.
pub fn serialize_context(docs: &[Document]) -> String {
    docs.iter()
        .enumerate()
        .map(|(i, doc)| format!("{}. {}", i + 1, doc.page_content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Streams an answer grounded in a citation context.
#[derive(Debug, Clone)]
pub struct AnswerGenerator {
    prompt: String,
    options: GenerationOptions,
}

impl AnswerGenerator {
    /// `prompt` is the system template; `{context}` and `{date}` are
    /// substituted.
    pub fn new(prompt: impl Into<String>, options: GenerationOptions) -> Self {
        Self {
            prompt: prompt.into(),
            options,
        }
    }

    /// System message, then the history, then the raw query.
    pub fn build_messages(
        &self,
        query: &str,
        history: &[ChatMessage],
        context: &str,
        now: DateTime<Utc>,
    ) -> Vec<PromptMessage> {
        let date = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let system = render(&self.prompt, &[("context", context), ("date", date.as_str())]);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(PromptMessage::system(system));
        messages.extend(history.iter().map(PromptMessage::from));
        messages.push(PromptMessage::user(query));
        messages
    }

    pub async fn generate(
        &self,
        llm: &dyn LanguageModel,
        query: &str,
        history: &[ChatMessage],
        context: &str,
    ) -> Result<TextStream> {
        let messages = self.build_messages(query, history, context, Utc::now());
        llm.stream(&messages, &self.options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentMetadata;
    use crate::prompt::PromptRole;
    use chrono::TimeZone;

    fn doc(content: &str) -> Document {
        Document {
            page_content: content.to_string(),
            metadata: DocumentMetadata {
                title: String::new(),
                url: "https://example.com".to_string(),
                img_src: None,
            },
        }
    }

    #[test]
    fn test_serialize_context_numbers_from_one() {
        let ctx = serialize_context(&[doc("Paris is the capital."), doc("France is in Europe.")]);
        assert_eq!(ctx, "1. Paris is the capital.\n2. France is in Europe.");
        assert_eq!(serialize_context(&[]), "");
    }

    #[test]
    fn test_message_order() {
        let generator = AnswerGenerator::new(
            "Context:\n{context}\nDate: {date}",
            GenerationOptions::default(),
        );
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let messages = generator.build_messages("capital?", &history, "1. Paris", now);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, PromptRole::System);
        assert_eq!(
            messages[0].content,
            "Context:\n1. Paris\nDate: 2024-05-01T12:00:00Z"
        );
        assert_eq!(messages[1].role, PromptRole::User);
        assert_eq!(messages[2].role, PromptRole::Assistant);
        assert_eq!(messages[3], PromptMessage::user("capital?"));
    }
}
