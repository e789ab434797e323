//! Follow-up question suggestions.

use std::time::Duration;

use crate::error::{Result, Stage};
use crate::llm::{GenerationOptions, LanguageModel};
use crate::models::{format_history, ChatMessage};
use crate::prompt::{render, PromptMessage, SUGGESTION_PROMPT};

const OPEN_TAG: &str = "<suggestions>";
const CLOSE_TAG: &str = "</suggestions>";

/// Extract the lines between `<suggestions>` tags.
///
/// Blank lines are skipped and list markers (`-`, `*`, `1.`) stripped.
/// Missing tags yield no suggestions.
pub fn parse_suggestions(output: &str) -> Vec<String> {
    let Some(start) = output.find(OPEN_TAG) else {
        return Vec::new();
    };
    let body = &output[start + OPEN_TAG.len()..];
    let body = match body.find(CLOSE_TAG) {
        Some(end) => &body[..end],
        None => return Vec::new(),
    };

    body.lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return rest.trim_start();
    }
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(". ") {
            return rest.trim_start();
        }
    }
    line
}

/// Generates follow-up questions for a conversation.
pub struct SuggestionGenerator {
    timeout: Duration,
}

impl SuggestionGenerator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// An empty history yields no suggestions and no model call.
    pub async fn generate(
        &self,
        llm: &dyn LanguageModel,
        history: &[ChatMessage],
    ) -> Result<Vec<String>> {
        if history.is_empty() {
            return Ok(Vec::new());
        }

        let history_text = format_history(history);
        let prompt = render(SUGGESTION_PROMPT, &[("chat_history", history_text.as_str())]);
        // Per call; the shared model is never mutated.
        let options = GenerationOptions::with_temperature(0.0);

        let output = match tokio::time::timeout(
            self.timeout,
            llm.complete(&[PromptMessage::user(prompt)], &options),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(Stage::Generating.timeout_error(self.timeout)),
        }?;

        Ok(parse_suggestions(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLanguageModel;

    #[test]
    fn test_parse_suggestions() {
        let output = "Sure!\n<suggestions>\n- Tell me more about SpaceX\n\n2. Who is the CEO of SpaceX?\n  What is Starship?  \n</suggestions>\nDone";
        assert_eq!(
            parse_suggestions(output),
            vec![
                "Tell me more about SpaceX",
                "Who is the CEO of SpaceX?",
                "What is Starship?"
            ]
        );
    }

    #[test]
    fn test_parse_without_tags_is_empty() {
        assert!(parse_suggestions("just text").is_empty());
        assert!(parse_suggestions("<suggestions>\nunterminated").is_empty());
    }

    #[test]
    fn test_number_without_dot_space_is_kept() {
        assert_eq!(parse_suggestions("<suggestions>\n2024 in review\n</suggestions>"), vec!["2024 in review"]);
    }

    #[tokio::test]
    async fn test_generate_uses_zero_temperature() {
        let llm = MockLanguageModel::new()
            .with_completions(["<suggestions>\nWhat about Lyon?\n</suggestions>"]);
        let history = vec![
            ChatMessage::user("capital of France?"),
            ChatMessage::assistant("Paris"),
        ];
        let out = SuggestionGenerator::new(Duration::from_secs(5))
            .generate(&llm, &history)
            .await
            .unwrap();
        assert_eq!(out, vec!["What about Lyon?"]);

        let prompts = llm.complete_prompts();
        assert_eq!(prompts[0].options.temperature, Some(0.0));
        assert!(prompts[0].messages[0].content.contains("assistant: Paris"));
    }

    #[tokio::test]
    async fn test_empty_history_makes_no_call() {
        let llm = MockLanguageModel::new();
        let out = SuggestionGenerator::new(Duration::from_secs(5))
            .generate(&llm, &[])
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(llm.complete_calls(), 0);
    }
}
