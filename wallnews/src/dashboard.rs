//! The operations the presentation layer calls.
//!
//! Each operation is one cycle: it takes a token from the `CycleTracker`, walks the cycle
//! phases, and only delivers (and caches) its result if no newer cycle of the same kind was
//! started in the meantime.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use common::Config;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::cache::{CacheStore, SqliteBackend, NEWS_CACHE_KEY, SOCIAL_CACHE_KEY};
use crate::chat::{ChatExchange, ChatTurn};
use crate::cycle::{CyclePhase, CycleToken, CycleTracker, OperationKind};
use crate::error::{DashboardError, DashboardResult};
use crate::headlines::{
    fetch_for_categories, fetch_trending_social, CategorySpec, NewsApiClient, NewsSource,
    DEFAULT_CATEGORIES, DEFAULT_REGIONS,
};
use crate::llm::remote::RemoteLlmProvider;
use crate::llm::LlmProvider;
use crate::synthesis::{DetailedSummary, SocialTopic, SynthesizedArticle, Synthesizer, Translation};

pub const DEFAULT_NEWS_BASE_URL: &str = "https://newsapi.org/v2/";
pub const DEFAULT_NEWS_KEY_ENV: &str = "NEWS_API_KEY";
pub const DEFAULT_LLM_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_LLM_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
pub const DEFAULT_TRANSLATION_LANGUAGE: &str = "French";
pub const DEFAULT_DB_PATH: &str = "data/wallnews.db";

pub struct Dashboard {
    news: Arc<dyn NewsSource>,
    synthesizer: Synthesizer,
    cache: CacheStore,
    cycles: CycleTracker,
    categories: Vec<CategorySpec>,
    regions: Vec<String>,
    translation_language: String,
    current_detail: RwLock<Option<DetailedSummary>>,
}

impl Dashboard {
    pub fn new(news: Arc<dyn NewsSource>, llm: Arc<dyn LlmProvider>, cache: CacheStore) -> Self {
        Self {
            news,
            synthesizer: Synthesizer::new(llm),
            cache,
            cycles: CycleTracker::new(),
            categories: DEFAULT_CATEGORIES.to_vec(),
            regions: DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
            translation_language: DEFAULT_TRANSLATION_LANGUAGE.to_string(),
            current_detail: RwLock::new(None),
        }
    }

    pub fn with_categories(mut self, categories: Vec<CategorySpec>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_translation_language(mut self, language: impl Into<String>) -> Self {
        self.translation_language = language.into();
        self
    }

    /// Builds the news client, the LLM provider and the cache described by `config`.
    /// API keys are read from the environment variables the config names.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let news_cfg = &config.news;
        let news = NewsApiClient::new(
            news_cfg.base_url.as_deref().unwrap_or(DEFAULT_NEWS_BASE_URL),
            read_secret(news_cfg.api_key_env.as_deref().unwrap_or(DEFAULT_NEWS_KEY_ENV)),
            news_cfg.timeout_seconds.unwrap_or(10),
        )?;

        let llm_cfg = &config.llm;
        let mut llm = RemoteLlmProvider::new(
            llm_cfg.api_url.as_deref().unwrap_or(DEFAULT_LLM_URL),
            read_secret(llm_cfg.api_key_env.as_deref().unwrap_or(DEFAULT_LLM_KEY_ENV)),
            llm_cfg.model.as_deref().unwrap_or(DEFAULT_MODEL),
        )
        .with_defaults(llm_cfg.timeout_seconds.unwrap_or(30), 1000);
        if let Some(version) = &llm_cfg.anthropic_version {
            llm = llm.with_api_version(version);
        }

        let mut cache = match config.cache.backend.as_deref().unwrap_or("memory") {
            "memory" => CacheStore::in_memory(),
            "sqlite" => {
                let path = config
                    .database
                    .as_ref()
                    .map(|d| d.path.as_str())
                    .unwrap_or(DEFAULT_DB_PATH);
                let pool = common::init_db_pool(path).await?;
                let backend = SqliteBackend::new(pool)
                    .await
                    .context("failed to prepare sqlite cache")?;
                info!(db_path = path, "using sqlite cache backend");
                CacheStore::new(Arc::new(backend))
            }
            other => anyhow::bail!("Unknown cache backend: {}", other),
        };
        if let Some(ttl) = config.cache.ttl_seconds {
            cache = cache.with_ttl(Duration::seconds(ttl as i64));
        }

        let language = config
            .dashboard
            .translation_language
            .clone()
            .unwrap_or_else(|| DEFAULT_TRANSLATION_LANGUAGE.to_string());

        Ok(Self::new(Arc::new(news), Arc::new(llm), cache).with_translation_language(language))
    }

    pub fn cycles(&self) -> &CycleTracker {
        &self.cycles
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn model(&self) -> &str {
        self.synthesizer.model()
    }

    /// News digest, served from cache while fresh.
    pub async fn refresh_news_digest(&self) -> DashboardResult<Vec<SynthesizedArticle>> {
        let token = self.cycles.begin(OperationKind::NewsDigest);

        if let Some(cached) = self
            .cache
            .get_as::<Vec<SynthesizedArticle>>(NEWS_CACHE_KEY)
            .await
        {
            info!(articles = cached.len(), "news digest served from cache");
            return self.settle(&token, Ok(cached));
        }

        self.cycles.advance(&token, CyclePhase::Fetching);
        let result = async {
            let regions: Vec<&str> = self.regions.iter().map(String::as_str).collect();
            let candidates =
                fetch_for_categories(self.news.as_ref(), &self.categories, &regions).await?;
            self.cycles.advance(&token, CyclePhase::Synthesizing);
            self.synthesizer.news_digest(&candidates).await
        }
        .await;

        let digest = self.settle(&token, result)?;
        self.store(NEWS_CACHE_KEY, &digest.articles).await;
        info!(articles = digest.articles.len(), "news digest refreshed");
        Ok(digest.articles)
    }

    /// Social digest, served from cache while fresh.
    pub async fn refresh_social_digest(&self) -> DashboardResult<Vec<SocialTopic>> {
        let token = self.cycles.begin(OperationKind::SocialDigest);

        if let Some(cached) = self.cache.get_as::<Vec<SocialTopic>>(SOCIAL_CACHE_KEY).await {
            info!(topics = cached.len(), "social digest served from cache");
            return self.settle(&token, Ok(cached));
        }

        self.cycles.advance(&token, CyclePhase::Fetching);
        let result = async {
            let items = fetch_trending_social(self.news.as_ref()).await?;
            self.cycles.advance(&token, CyclePhase::Synthesizing);
            self.synthesizer.social_digest(&items).await
        }
        .await;

        let digest = self.settle(&token, result)?;
        self.store(SOCIAL_CACHE_KEY, &digest.topics).await;
        info!(topics = digest.topics.len(), "social digest refreshed");
        Ok(digest.topics)
    }

    /// Detailed summary of one selected item; it becomes the currently displayed detail.
    pub async fn get_article_detail(&self, item: &Value) -> DashboardResult<DetailedSummary> {
        let token = self.cycles.begin(OperationKind::ArticleDetail);
        self.cycles.advance(&token, CyclePhase::Synthesizing);
        let result = self.synthesizer.article_detail(item).await;

        let mut current = self.current_detail.write().await;
        let detail = self.settle(&token, result)?;
        *current = Some(detail.clone());
        Ok(detail)
    }

    pub async fn current_article_detail(&self) -> Option<DetailedSummary> {
        self.current_detail.read().await.clone()
    }

    /// Clears the displayed detail. A detail request still in flight is superseded so it cannot
    /// reopen it.
    pub async fn close_article_detail(&self) {
        let mut current = self.current_detail.write().await;
        self.cycles.begin(OperationKind::ArticleDetail);
        *current = None;
    }

    /// Answers a free-text question; returns the user turn and the bot turn to append.
    pub async fn submit_chat_query(
        &self,
        text: &str,
        history: &[ChatTurn],
    ) -> DashboardResult<ChatExchange> {
        let query = text.trim();
        if query.is_empty() {
            return Err(DashboardError::InvalidInput("empty chat query".into()));
        }

        let token = self.cycles.begin(OperationKind::ChatQuery);
        self.cycles.advance(&token, CyclePhase::Synthesizing);
        let result = self.synthesizer.chat_answer(query, history).await;
        let answer = self.settle(&token, result)?;

        Ok(ChatExchange {
            user: ChatTurn::user(query),
            bot: ChatTurn::bot_from_answer(&answer),
        })
    }

    pub async fn translate(&self, text: &str) -> DashboardResult<Translation> {
        if text.trim().is_empty() {
            return Err(DashboardError::InvalidInput("nothing to translate".into()));
        }

        let token = self.cycles.begin(OperationKind::Translate);
        self.cycles.advance(&token, CyclePhase::Synthesizing);
        let result = self
            .synthesizer
            .translate(text, &self.translation_language)
            .await;
        self.settle(&token, result)
    }

    /// Ends the cycle. A superseded cycle's outcome, success or failure, is discarded.
    fn settle<T>(&self, token: &CycleToken, result: DashboardResult<T>) -> DashboardResult<T> {
        let published = match &result {
            Ok(_) => self.cycles.advance(token, CyclePhase::Ready),
            Err(e) => self.cycles.fail(token, e.user_message()),
        };

        if !published && !self.cycles.is_current(token) {
            let latest = self.cycles.latest_generation(token.kind);
            warn!(
                kind = token.kind.as_str(),
                generation = token.generation,
                latest,
                "discarding result of superseded cycle"
            );
            return Err(DashboardError::Superseded {
                generation: token.generation,
                latest,
            });
        }

        if let Err(e) = &result {
            error!(kind = token.kind.as_str(), code = e.code(), "cycle failed: {}", e);
        }
        result
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) {
        let payload = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, "could not encode payload for cache: {}", e);
                return;
            }
        };
        if let Err(e) = self.cache.set(key, payload).await {
            warn!(key, "cache write failed: {:#}", e);
        }
    }
}

fn read_secret(env_name: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => {
            warn!(env = env_name, "API key env var not set; requests go out unauthenticated");
            None
        }
    }
}
