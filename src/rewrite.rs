//! History-aware query rewriting.
//!
//! The rewriter asks the language model to turn a follow-up question into
//! a standalone search query. Retrieval focus modes also let the model
//! answer with a sentinel token meaning "no search needed" (greetings,
//! writing tasks).

use crate::error::Result;
use crate::llm::{GenerationOptions, LanguageModel};
use crate::models::{format_history, ChatMessage};
use crate::prompt::{render, PromptMessage};

/// Outcome of a rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteResult {
    /// The model judged that no retrieval is needed.
    NotNeeded,
    Rewritten(String),
}

/// Rewrites queries with one non-streamed model call.
#[derive(Debug, Clone)]
pub struct QueryRewriter {
    prompt: String,
    sentinel: Option<String>,
    options: GenerationOptions,
}

impl QueryRewriter {
    /// `prompt` may use `{chat_history}` and `{query}`. Without a
    /// `sentinel` the rewriter never reports [`RewriteResult::NotNeeded`].
    pub fn new(prompt: impl Into<String>, sentinel: Option<String>, options: GenerationOptions) -> Self {
        Self {
            prompt: prompt.into(),
            sentinel,
            options,
        }
    }

    pub async fn rewrite(
        &self,
        llm: &dyn LanguageModel,
        query: &str,
        history: &[ChatMessage],
    ) -> Result<RewriteResult> {
        let history_text = format_history(history);
        let prompt = render(
            &self.prompt,
            &[("chat_history", history_text.as_str()), ("query", query)],
        );

        let output = llm
            .complete(&[PromptMessage::user(prompt)], &self.options)
            .await?;

        Ok(self.interpret(query, &output))
    }

    fn interpret(&self, query: &str, output: &str) -> RewriteResult {
        if let Some(sentinel) = &self.sentinel {
            if is_sentinel(output, sentinel) {
                return RewriteResult::NotNeeded;
            }
        }

        let rewritten = output.trim();
        if rewritten.is_empty() {
            RewriteResult::Rewritten(query.trim().to_string())
        } else {
            RewriteResult::Rewritten(rewritten.to_string())
        }
    }
}

/// Models decorate tokens: `` `not_needed` ``, `"not_needed".`, `Not_Needed`.
/// Trim, unwrap one layer of backticks or quotes, drop one trailing period,
/// then compare case-insensitively.
pub fn is_sentinel(output: &str, sentinel: &str) -> bool {
    let mut s = output.trim();
    if let Some(stripped) = s.strip_suffix('.') {
        s = stripped.trim_end();
    }
    for quote in ['`', '"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            s = s[1..s.len() - 1].trim();
            break;
        }
    }
    if let Some(stripped) = s.strip_suffix('.') {
        s = stripped.trim_end();
    }
    s.eq_ignore_ascii_case(sentinel.trim())
}
