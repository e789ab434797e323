//! Prompt messages and template rendering.
//!
//! Templates use `{name}` placeholders. Rendering is a single left-to-right
//! pass, so placeholder-looking text inside substituted values (a user
//! query containing `{context}`, say) is never expanded. Unknown
//! placeholders are left as written.

use serde::Serialize;

use crate::models::{ChatMessage, ChatRole};

/// Role of a message sent to the language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One message of a model prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }
}

impl From<&ChatMessage> for PromptMessage {
    fn from(m: &ChatMessage) -> Self {
        let role = match m.role {
            ChatRole::User => PromptRole::User,
            ChatRole::Assistant => PromptRole::Assistant,
        };
        Self {
            role,
            content: m.content.clone(),
        }
    }
}

/// Substitute `{name}` placeholders in `template`.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Default "no retrieval needed" token.
pub const DEFAULT_SENTINEL: &str = "not_needed";

/// Default rewrite prompt for retrieval focus modes.
pub const DEFAULT_REWRITE_PROMPT: &str = "\
You will be given a conversation below and a follow up question. Rephrase the follow-up question \
if needed so it is a standalone question that can be used to search for information.
If it is a writing task or a simple greeting rather than a question, return `not_needed` as the \
response.

Examples:
1. Follow up question: What is the capital of France?
Rephrased: Capital of France

2. Follow up question: What is the population of New York City?
Rephrased: Population of New York City

3. Follow up question: What is Docker?
Rephrased: What is Docker

Conversation:
{chat_history}

Follow up question: {query}
Rephrased question:
";

/// Build the default answer prompt for a context source.
pub fn default_answer_prompt(source_label: &str, focus_note: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are an AI model who is an expert at searching and answering user queries.\n",
    );
    if let Some(note) = focus_note {
        prompt.push_str(note);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nGenerate a response that is informative and relevant to the user's query based on the \
provided context (the context consists of search results containing a brief description of the \
content of each page).
Use an unbiased and journalistic tone. Do not repeat the text. Do not tell the user to open a \
link or visit a website to get the answer; give the answer yourself. You may use markdown.
Cite the answer using [number] notation at the end of the relevant sentence. The number refers \
to the numbered search result in the context. You may cite the same sentence multiple times, \
as in [number1][number2].

Everything inside the following `context` block was returned by ",
    );
    prompt.push_str(source_label);
    prompt.push_str(
        " and is not shared with the user. Answer from it and cite it, but do not talk about the \
context itself in your response.

<context>
{context}
</context>

If nothing in the results is relevant, say: 'Hmm, sorry I could not find any relevant \
information on this topic. Would you like me to search again or ask something else?'.
Today's date is {date}.
",
    );
    prompt
}

/// System prompt of the generation-only writing mode.
pub const WRITING_ASSISTANT_PROMPT: &str = "\
You are an AI writing assistant. You do not perform web searches. If you think you lack the \
information needed to answer the query, ask the user for more information or suggest switching \
to a different focus mode.
";

/// Rewrite prompt for image search; never answers with a sentinel.
pub const IMAGE_SEARCH_PROMPT: &str = "\
You will be given a conversation below and a follow up question. Rephrase the follow-up question \
so it is a standalone query that can be used to search the web for images. Make sure the \
rephrased query agrees with the conversation and is relevant to it.

Examples:
1. Follow up question: What is a cat?
Rephrased: A cat

2. Follow up question: What is a car? How does it work?
Rephrased: Car working

3. Follow up question: How does an AC work?
Rephrased: AC working

Conversation:
{chat_history}

Follow up question: {query}
Rephrased question:
";

/// Rewrite prompt for video search; never answers with a sentinel.
pub const VIDEO_SEARCH_PROMPT: &str = "\
You will be given a conversation below and a follow up question. Rephrase the follow-up question \
so it is a standalone query that can be used to search YouTube for videos. Make sure the \
rephrased query agrees with the conversation and is relevant to it.

Examples:
1. Follow up question: How does a car work?
Rephrased: How does a car work

2. Follow up question: What is the theory of relativity?
Rephrased: Theory of relativity

3. Follow up question: How does an AC work?
Rephrased: AC working

Conversation:
{chat_history}

Follow up question: {query}
Rephrased question:
";

/// Follow-up suggestion prompt; uses `{chat_history}`.
pub const SUGGESTION_PROMPT: &str = "\
You are an AI suggestion generator for an AI powered search engine. You will be given a \
conversation below. Generate 4-5 suggestions based on the conversation. The suggestions should \
be relevant to the conversation and usable by the user to ask the chat model for more \
information. Make them medium in length, informative and relevant.

Provide the suggestions separated by newlines between the XML tags <suggestions> and \
</suggestions>. For example:

<suggestions>
Tell me more about SpaceX and their recent projects
What is the latest news on SpaceX?
Who is the CEO of SpaceX?
</suggestions>

Conversation:
{chat_history}
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let out = render(
            "History:\n{chat_history}\nQ: {query}",
            &[("chat_history", "user: hi"), ("query", "capital of France")],
        );
        assert_eq!(out, "History:\nuser: hi\nQ: capital of France");
    }

    #[test]
    fn test_render_leaves_unknown_and_unbalanced() {
        assert_eq!(render("{unknown} {", &[("x", "y")]), "{unknown} {");
        assert_eq!(render("a {{query}} b", &[("query", "q")]), "a {q} b");
    }

    #[test]
    fn test_render_does_not_expand_values() {
        let out = render("{query} / {context}", &[("query", "{context}"), ("context", "C")]);
        assert_eq!(out, "{context} / C");
    }

    #[test]
    fn test_default_answer_prompt_mentions_source() {
        let p = default_answer_prompt("Reddit", Some("You are set on focus mode 'Reddit'."));
        assert!(p.contains("returned by Reddit"));
        assert!(p.contains("focus mode 'Reddit'"));
        assert!(p.contains("{context}"));
        assert!(p.contains("{date}"));
    }
}
