#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::oneshot;

use wallnews::cache::CacheStore;
use wallnews::dashboard::Dashboard;
use wallnews::headlines::{ArticleSource, CandidateArticle, NewsSource};
use wallnews::llm::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

/// News source answering every request with one canned article.
#[derive(Default)]
pub struct FakeNews {
    pub fail: bool,
    pub headline_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
}

impl FakeNews {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.headline_calls.load(Ordering::SeqCst) + self.search_calls.load(Ordering::SeqCst)
    }
}

fn article(title: String, url: String) -> CandidateArticle {
    CandidateArticle {
        source: ArticleSource {
            id: None,
            name: Some("Example Wire".to_string()),
        },
        title: Some(title),
        url: Some(url),
        ..Default::default()
    }
}

#[async_trait::async_trait]
impl NewsSource for FakeNews {
    async fn top_headlines(&self, country: &str, category: &str) -> Result<Vec<CandidateArticle>> {
        self.headline_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("connection refused"));
        }
        Ok(vec![article(
            format!("{} headline from {}", category, country),
            format!("https://news.example/{}/{}", country, category),
        )])
    }

    async fn search(&self, query: &str) -> Result<Vec<CandidateArticle>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("connection refused"));
        }
        Ok((1..=8)
            .map(|i| article(format!("{} #{}", query, i), format!("https://social.example/{}", i)))
            .collect())
    }
}

struct Scripted {
    content: String,
    gate: Option<oneshot::Receiver<()>>,
}

/// Provider replaying queued replies in order. A gated reply is held back until its sender
/// fires (or is dropped).
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Scripted>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, content: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Scripted {
            content: content.into(),
            gate: None,
        });
    }

    pub fn push_gated(&self, content: impl Into<String>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.replies.lock().unwrap().push_back(Scripted {
            content: content.into(),
            gate: Some(rx),
        });
        tx
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Polls until `n` requests have reached the provider.
    pub async fn wait_for_calls(&self, n: usize) {
        for _ in 0..400 {
            if self.calls() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("provider never received {} calls", n);
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let next = {
            let mut replies = self.replies.lock().unwrap();
            self.prompts.lock().unwrap().push(request.prompt);
            replies.pop_front()
        };
        let scripted = next.ok_or_else(|| anyhow!("no scripted reply left"))?;
        if let Some(gate) = scripted.gate {
            let _ = gate.await;
        }
        Ok(LlmResponse {
            content: scripted.content,
            usage: UsageMetadata {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "fake-model".to_string(),
        })
    }

    fn model(&self) -> &str {
        "fake-model"
    }
}

pub fn dashboard(news: &Arc<FakeNews>, llm: &Arc<ScriptedLlm>) -> Dashboard {
    Dashboard::new(news.clone(), llm.clone(), CacheStore::in_memory())
}

pub fn news_reply(title: &str) -> String {
    format!(
        r#"Here you go:
{{"articles": [
  {{"title": "{}", "summary": "Ice shelves keep thinning.", "sources": ["Reuters", "Le Monde"],
    "category": "Climate Change", "biasScore": 3, "views": 1200, "likes": 80,
    "url": "https://news.example/climate", "imageUrl": ""}}
]}}"#,
        title
    )
}

pub const SOCIAL_REPLY: &str = r#"{"topics": [
  {"title": "Short video boom", "summary": "Clips everywhere.", "sources": ["Platform A"], "biasScore": 5},
  {"title": "Creator payouts", "summary": "New revenue split.", "sources": ["Platform B"], "biasScore": "2/10"}
]}"#;

pub fn detail_reply(summary: &str) -> String {
    format!(
        r#"{{"detailedSummary": "{}", "sources": ["Reuters", "AP"], "biasScores": [2, 4], "links": ["https://news.example/a"]}}"#,
        summary
    )
}

pub const SPACE_CHAT_REPLY: &str = r#"{"summary": "Three missions moved forward this week. Overall biasScore 3/10.",
 "articles": [
  {"title": "Artemis crew named", "url": "https://space.example/artemis"},
  {"title": "Starship test flight", "url": "https://space.example/starship"},
  {"title": "ESA budget approved", "url": "https://space.example/esa"}
 ]}"#;
