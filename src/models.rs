//! Core data models used throughout Focus Harness.
//!
//! These types represent the chat history, raw search results, normalized
//! documents and pipeline events that flow through one request.

use serde::{Deserialize, Serialize};

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One turn of the conversation. The history is owned by the caller and
/// read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Serialize a chat history as `role: content` lines for rewrite and
/// suggestion prompts.
pub fn format_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A raw result from the search gateway.
///
/// Optional fields are `None` when the backend omitted them or sent an
/// empty string.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub img_src: Option<String>,
    pub thumbnail: Option<String>,
    pub iframe_src: Option<String>,
}

impl SearchResult {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = non_empty(content.into());
        self
    }

    /// Project onto an image result; `None` unless image, url and title
    /// are all present.
    pub fn as_image(&self) -> Option<ImageResult> {
        let img_src = self.img_src.clone()?;
        if self.url.is_empty() || self.title.is_empty() {
            return None;
        }
        Some(ImageResult {
            img_src,
            url: self.url.clone(),
            title: self.title.clone(),
        })
    }

    /// Project onto a video result; requires a thumbnail and an embeddable
    /// player reference in addition to url and title.
    pub fn as_video(&self) -> Option<VideoResult> {
        let img_src = self.thumbnail.clone()?;
        let iframe_src = self.iframe_src.clone()?;
        if self.url.is_empty() || self.title.is_empty() {
            return None;
        }
        Some(VideoResult {
            img_src,
            url: self.url.clone(),
            title: self.title.clone(),
            iframe_src,
        })
    }
}

/// Turn an empty string into `None`.
pub(crate) fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResult {
    pub img_src: String,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoResult {
    pub img_src: String,
    pub url: String,
    pub title: String,
    pub iframe_src: String,
}

/// How a document's text is derived from a search result with no content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFallback {
    /// Keep the (possibly empty) content; empty documents are later
    /// dropped by the reranker.
    #[default]
    None,
    /// Use the result title when content is missing.
    Title,
}

/// Citation metadata carried alongside document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_src: Option<String>,
}

/// A normalized, citable unit of retrieved knowledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub page_content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn from_search_result(result: &SearchResult, fallback: ContentFallback) -> Self {
        let page_content = match (&result.content, fallback) {
            (Some(content), _) => content.clone(),
            (None, ContentFallback::Title) => result.title.clone(),
            (None, ContentFallback::None) => String::new(),
        };
        Self {
            page_content,
            metadata: DocumentMetadata {
                title: result.title.clone(),
                url: result.url.clone(),
                img_src: result.img_src.clone(),
            },
        }
    }

    pub fn has_content(&self) -> bool {
        !self.page_content.trim().is_empty()
    }
}

/// Input boundary of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub query: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

impl PipelineRequest {
    pub fn new(query: impl Into<String>, history: Vec<ChatMessage>) -> Self {
        Self {
            query: query.into(),
            history,
        }
    }
}

/// The sole output contract of the pipeline.
///
/// Per request: at most one `Sources`, before every `ResponseChunk`, and
/// exactly one terminal `End` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum PipelineEvent {
    Sources(Vec<Document>),
    #[serde(rename = "response")]
    ResponseChunk(String),
    End,
    Error(String),
}

impl PipelineEvent {
    /// Wire name of the event, used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::Sources(_) => "sources",
            PipelineEvent::ResponseChunk(_) => "response",
            PipelineEvent::End => "end",
            PipelineEvent::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::End | PipelineEvent::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_history() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        assert_eq!(format_history(&history), "user: hi\nassistant: hello");
        assert_eq!(format_history(&[]), "");
    }

    #[test]
    fn test_document_content_fallback() {
        let result = SearchResult::new("Rust subreddit", "https://reddit.com/r/rust");
        let plain = Document::from_search_result(&result, ContentFallback::None);
        assert!(!plain.has_content());
        let titled = Document::from_search_result(&result, ContentFallback::Title);
        assert_eq!(titled.page_content, "Rust subreddit");

        let with_content = result.with_content("Discussion");
        let doc = Document::from_search_result(&with_content, ContentFallback::Title);
        assert_eq!(doc.page_content, "Discussion");
    }

    #[test]
    fn test_media_projections_require_fields() {
        let mut r = SearchResult::new("Cat", "https://example.com/cat");
        assert!(r.as_image().is_none());
        r.img_src = Some("https://example.com/cat.png".into());
        assert_eq!(r.as_image().unwrap().img_src, "https://example.com/cat.png");

        r.thumbnail = Some("https://i.ytimg.com/t.jpg".into());
        assert!(r.as_video().is_none(), "video needs iframe_src");
        r.iframe_src = Some("https://youtube.com/embed/x".into());
        assert_eq!(r.as_video().unwrap().iframe_src, "https://youtube.com/embed/x");

        r.title.clear();
        assert!(r.as_image().is_none());
    }

    #[test]
    fn test_event_wire_format() {
        let ev = PipelineEvent::ResponseChunk("Paris".into());
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json, serde_json::json!({"type": "response", "data": "Paris"}));

        let end = serde_json::to_value(PipelineEvent::End).unwrap();
        assert_eq!(end, serde_json::json!({"type": "end"}));

        let doc = Document::from_search_result(
            &SearchResult::new("Paris", "https://fr.wikipedia.org/wiki/Paris").with_content("Capital"),
            ContentFallback::None,
        );
        let json = serde_json::to_value(PipelineEvent::Sources(vec![doc])).unwrap();
        assert_eq!(json["type"], "sources");
        assert_eq!(json["data"][0]["pageContent"], "Capital");
        assert_eq!(json["data"][0]["metadata"]["url"], "https://fr.wikipedia.org/wiki/Paris");
        assert!(json["data"][0]["metadata"].get("img_src").is_none());
    }
}
