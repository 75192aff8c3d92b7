use serde::{Deserialize, Serialize};
use url::Url;

use crate::synthesis::ChatAnswer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Bot,
}

/// A link the presentation layer turns into a button. Only http(s) URLs make it here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleLink {
    pub label: String,
    pub url: String,
}

/// One message of a conversation. Content is plain text, never markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<ArticleLink>,
}

/// The turns one submitted query appends to the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatExchange {
    pub user: ChatTurn,
    pub bot: ChatTurn,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            links: Vec::new(),
        }
    }

    /// Renders a synthesized answer as a bot turn: the shared summary, one line per article
    /// title, and a link for every article whose URL is safe to open.
    pub fn bot_from_answer(answer: &ChatAnswer) -> Self {
        let summary = if answer.summary.trim().is_empty() {
            "N/A"
        } else {
            answer.summary.trim()
        };

        let mut content = format!("Summary: {}\n\nRelevant articles:\n", summary);
        let mut links = Vec::new();
        for article in &answer.articles {
            let title = if article.title.trim().is_empty() {
                "Untitled article"
            } else {
                article.title.trim()
            };
            content.push_str(&format!("- {}\n", title));
            if let Some(url) = safe_link(&article.url) {
                links.push(ArticleLink {
                    label: title.to_string(),
                    url,
                });
            }
        }
        content.push_str("\nRead the full articles to form your own opinion.");

        Self {
            role: ChatRole::Bot,
            content,
            links,
        }
    }
}

fn safe_link(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    match url.scheme() {
        "http" | "https" => Some(url.to_string()),
        _ => None,
    }
}
