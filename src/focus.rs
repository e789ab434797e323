//! Focus modes: the per-variant pipeline configuration.
//!
//! A [`FocusMode`] is pure data. It names the prompts, search engines,
//! language, content fallback and reranking policy of one variant; the
//! pipeline code is shared by all of them. Six modes are built in, and
//! `[focus_modes.<name>]` tables in the config add new modes or replace
//! built-ins of the same name.
//!
//! | Mode | Engines | Content fallback | Rerank |
//! |------|---------|------------------|--------|
//! | `web` | backend defaults | none | threshold 0.5, limit 15 |
//! | `academic` | arxiv, google scholar, internetarchivescholar, pubmed | none | limit 15 |
//! | `reddit` | reddit | title | threshold 0.3, limit 15 |
//! | `youtube` | youtube | title | threshold 0.3, limit 15 |
//! | `wolfram-alpha` | wolframalpha | none | none |
//! | `writing` | no retrieval | | |

use std::sync::Arc;

use crate::config::{Config, FocusModeConfig};
use crate::models::ContentFallback;
use crate::prompt::{
    default_answer_prompt, DEFAULT_REWRITE_PROMPT, DEFAULT_SENTINEL, WRITING_ASSISTANT_PROMPT,
};
use crate::rerank::RerankPolicy;

/// Mode used when a request does not name one.
pub const DEFAULT_MODE: &str = "web";

/// Retrieval settings of a focus mode.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    /// Uses `{chat_history}` and `{query}`.
    pub rewrite_prompt: String,
    /// `None` disables the "no search needed" short-circuit.
    pub sentinel: Option<String>,
    pub engines: Vec<String>,
    /// Overrides `search.language` when set.
    pub language: Option<String>,
    pub content_fallback: ContentFallback,
    /// `None` passes search results through unreranked.
    pub rerank: Option<RerankPolicy>,
}

impl Retrieval {
    fn new(engines: &[&str], content_fallback: ContentFallback, rerank: Option<RerankPolicy>) -> Self {
        Self {
            rewrite_prompt: DEFAULT_REWRITE_PROMPT.to_string(),
            sentinel: Some(DEFAULT_SENTINEL.to_string()),
            engines: engines.iter().map(|e| e.to_string()).collect(),
            language: None,
            content_fallback,
            rerank,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FocusMode {
    pub name: String,
    pub description: String,
    /// System prompt; uses `{context}` and `{date}`.
    pub answer_prompt: String,
    /// `None` for generation-only modes.
    pub retrieval: Option<Retrieval>,
}

impl FocusMode {
    pub fn has_retrieval(&self) -> bool {
        self.retrieval.is_some()
    }

    pub fn reranks(&self) -> bool {
        self.retrieval.as_ref().is_some_and(|r| r.rerank.is_some())
    }

    /// Build a mode from a `[focus_modes.<name>]` table.
    pub fn from_config(name: &str, cfg: &FocusModeConfig) -> Self {
        let label = cfg.source_label.as_deref().unwrap_or("a web search engine");
        let answer_prompt = cfg
            .answer_prompt
            .clone()
            .unwrap_or_else(|| default_answer_prompt(label, None));

        let retrieval = cfg.retrieval.as_ref().map(|r| Retrieval {
            rewrite_prompt: r
                .rewrite_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_REWRITE_PROMPT.to_string()),
            // An empty sentinel turns the short-circuit off.
            sentinel: match r.sentinel.as_deref() {
                None => Some(DEFAULT_SENTINEL.to_string()),
                Some(s) if s.trim().is_empty() => None,
                Some(s) => Some(s.to_string()),
            },
            engines: r.engines.clone(),
            language: r.language.clone(),
            content_fallback: r.content_fallback,
            rerank: r
                .rerank
                .as_ref()
                .map(|p| RerankPolicy::new(p.threshold, p.limit)),
        });

        Self {
            name: name.to_string(),
            description: cfg
                .description
                .clone()
                .unwrap_or_else(|| format!("Custom focus mode '{}'", name)),
            answer_prompt,
            retrieval,
        }
    }
}

/// The built-in focus modes.
pub fn builtin_modes() -> Vec<FocusMode> {
    let note = |mode: &str, doing: &str| {
        format!("You are set on focus mode '{}', this means you will be {}", mode, doing)
    };

    vec![
        FocusMode {
            name: "web".to_string(),
            description: "Search the entire web".to_string(),
            answer_prompt: default_answer_prompt("a web search engine", None),
            retrieval: Some(Retrieval::new(
                &[],
                ContentFallback::None,
                Some(RerankPolicy::new(Some(0.5), 15)),
            )),
        },
        FocusMode {
            name: "academic".to_string(),
            description: "Search academic papers and articles".to_string(),
            answer_prompt: default_answer_prompt(
                "academic search engines",
                Some(&note(
                    "Academic",
                    "searching for academic papers and articles on the web.",
                )),
            ),
            retrieval: Some(Retrieval::new(
                &["arxiv", "google scholar", "internetarchivescholar", "pubmed"],
                ContentFallback::None,
                Some(RerankPolicy::new(None, 15)),
            )),
        },
        FocusMode {
            name: "reddit".to_string(),
            description: "Search Reddit for discussions and opinions".to_string(),
            answer_prompt: default_answer_prompt(
                "Reddit",
                Some(&note(
                    "Reddit",
                    "searching for information, opinions and discussions on the web using Reddit.",
                )),
            ),
            retrieval: Some(Retrieval::new(
                &["reddit"],
                ContentFallback::Title,
                Some(RerankPolicy::new(Some(0.3), 15)),
            )),
        },
        FocusMode {
            name: "youtube".to_string(),
            description: "Search YouTube videos".to_string(),
            answer_prompt: default_answer_prompt(
                "YouTube",
                Some(&note(
                    "Youtube",
                    "searching for videos on the web using YouTube and answering from their descriptions.",
                )),
            ),
            retrieval: Some(Retrieval::new(
                &["youtube"],
                ContentFallback::Title,
                Some(RerankPolicy::new(Some(0.3), 15)),
            )),
        },
        FocusMode {
            name: "wolfram-alpha".to_string(),
            description: "Computational answers from Wolfram Alpha".to_string(),
            answer_prompt: default_answer_prompt(
                "Wolfram Alpha",
                Some(&note(
                    "Wolfram Alpha",
                    "searching the web using Wolfram Alpha, a computational knowledge engine that \
                     can answer factual queries and perform computations.",
                )),
            ),
            retrieval: Some(Retrieval::new(&["wolframalpha"], ContentFallback::None, None)),
        },
        FocusMode {
            name: "writing".to_string(),
            description: "Writing assistant without web search".to_string(),
            answer_prompt: WRITING_ASSISTANT_PROMPT.to_string(),
            retrieval: None,
        },
    ]
}

/// Registry of focus modes.
///
/// Registering a mode whose name already exists replaces it in place, so
/// config-defined modes can override built-ins without reordering them.
///
/// ```rust
/// use focus_harness::focus::FocusRegistry;
///
/// let modes = FocusRegistry::with_builtins();
/// assert!(modes.find("web").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct FocusRegistry {
    modes: Vec<Arc<FocusMode>>,
}

impl FocusRegistry {
    pub fn new() -> Self {
        Self { modes: Vec::new() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for mode in builtin_modes() {
            registry.register(mode);
        }
        registry
    }

    /// Built-ins plus the modes declared in `config.focus_modes`.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::with_builtins();
        for (name, cfg) in &config.focus_modes {
            registry.register(FocusMode::from_config(name, cfg));
        }
        registry
    }

    pub fn register(&mut self, mode: FocusMode) {
        let mode = Arc::new(mode);
        match self.modes.iter_mut().find(|m| m.name == mode.name) {
            Some(existing) => *existing = mode,
            None => self.modes.push(mode),
        }
    }

    pub fn find(&self, name: &str) -> Option<Arc<FocusMode>> {
        self.modes.iter().find(|m| m.name == name).cloned()
    }

    pub fn modes(&self) -> &[Arc<FocusMode>] {
        &self.modes
    }

    pub fn names(&self) -> Vec<&str> {
        self.modes.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_builtin_table() {
        let modes = FocusRegistry::with_builtins();
        assert_eq!(
            modes.names(),
            vec!["web", "academic", "reddit", "youtube", "wolfram-alpha", "writing"]
        );

        let web = modes.find("web").unwrap();
        let r = web.retrieval.as_ref().unwrap();
        assert!(r.engines.is_empty());
        assert_eq!(r.rerank, Some(RerankPolicy::new(Some(0.5), 15)));

        let reddit = modes.find("reddit").unwrap();
        let r = reddit.retrieval.as_ref().unwrap();
        assert_eq!(r.content_fallback, ContentFallback::Title);
        assert_eq!(r.rerank.unwrap().threshold, Some(0.3));
        assert!(reddit.answer_prompt.contains("returned by Reddit"));

        assert!(!modes.find("wolfram-alpha").unwrap().reranks());
        assert!(modes.find("wolfram-alpha").unwrap().has_retrieval());
        assert!(!modes.find("writing").unwrap().has_retrieval());
        assert!(modes.find("unknown").is_none());
    }

    #[test]
    fn test_config_modes_add_and_override() {
        let cfg = parse_config(
            r#"
[focus_modes.writing]
description = "Poems only"
answer_prompt = "Write a poem. {date}"

[focus_modes.hn]
source_label = "Hacker News"

[focus_modes.hn.retrieval]
engines = ["hackernews"]
sentinel = ""
"#,
        )
        .unwrap();

        let modes = FocusRegistry::from_config(&cfg);
        assert_eq!(modes.len(), 7);
        assert_eq!(modes.names()[5], "writing");
        assert_eq!(modes.find("writing").unwrap().description, "Poems only");

        let hn = modes.find("hn").unwrap();
        assert!(hn.answer_prompt.contains("returned by Hacker News"));
        let r = hn.retrieval.as_ref().unwrap();
        assert_eq!(r.engines, vec!["hackernews"]);
        assert!(r.sentinel.is_none());
        assert!(r.rerank.is_none());
        assert_eq!(r.rewrite_prompt, DEFAULT_REWRITE_PROMPT);
    }
}
