//! Headline fetching across a fixed set of categories and regions.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::{DashboardError, DashboardResult};

/// Upper bound on the candidate list handed to the synthesizer
pub const MAX_CANDIDATES: usize = 6;
/// Number of results kept from the social search
pub const SOCIAL_CANDIDATES: usize = 5;
pub const SOCIAL_QUERY: &str = "trending social media";

pub const DEFAULT_REGIONS: [&str; 3] = ["us", "fr", "gb"];

/// A news-source category paired with the label the digest shows for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategorySpec {
    pub category_key: &'static str,
    pub display_label: &'static str,
}

impl CategorySpec {
    pub const fn new(category_key: &'static str, display_label: &'static str) -> Self {
        Self {
            category_key,
            display_label,
        }
    }

    /// Lowercased first word of the label, used to pick a matching headline.
    pub fn keyword(&self) -> String {
        self.display_label
            .split(' ')
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }
}

pub const DEFAULT_CATEGORIES: [CategorySpec; 6] = [
    CategorySpec::new("science", "Climate Change"),
    CategorySpec::new("science", "Space Exploration"),
    CategorySpec::new("general", "Politique Internationale"),
    CategorySpec::new("health", "Health Technology"),
    CategorySpec::new("business", "Cryptocurrency"),
    CategorySpec::new("general", "Biggest Topic of the Month"),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleSource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Raw article as returned by the news source, plus the label it was selected for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateArticle {
    #[serde(default)]
    pub source: ArticleSource,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_to_image: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_category: Option<String>,
}

impl CandidateArticle {
    pub fn tagged(mut self, label: &str) -> Self {
        self.custom_category = Some(label.to_string());
        self
    }

    fn title_contains(&self, keyword: &str) -> bool {
        self.title
            .as_deref()
            .map(|t| t.to_lowercase().contains(keyword))
            .unwrap_or(false)
    }
}

/// Core trait for news sources
#[async_trait::async_trait]
pub trait NewsSource: Send + Sync {
    /// Top headlines for one category in one country
    async fn top_headlines(&self, country: &str, category: &str) -> Result<Vec<CandidateArticle>>;

    /// Broad keyword search
    async fn search(&self, query: &str) -> Result<Vec<CandidateArticle>>;
}

/// First headline whose title contains the label's first word, else the first headline.
pub fn select_article<'a>(
    articles: &'a [CandidateArticle],
    spec: &CategorySpec,
) -> Option<&'a CandidateArticle> {
    let keyword = spec.keyword();
    articles
        .iter()
        .find(|a| a.title_contains(&keyword))
        .or_else(|| articles.first())
}

/// Builds the candidate list for the news digest.
///
/// Every region contributes at most one article per category. A category left without any
/// article gets one keyword search on its label, as long as the list is not already full.
/// The first failing request aborts the whole fetch.
pub async fn fetch_for_categories<S: NewsSource + ?Sized>(
    source: &S,
    specs: &[CategorySpec],
    regions: &[&str],
) -> DashboardResult<Vec<CandidateArticle>> {
    let mut articles = Vec::new();

    for spec in specs {
        let mut satisfied = false;

        for region in regions {
            let headlines = source
                .top_headlines(region, spec.category_key)
                .await
                .map_err(DashboardError::Transport)?;

            if let Some(selected) = select_article(&headlines, spec) {
                debug!(
                    label = spec.display_label,
                    region,
                    title = selected.title.as_deref().unwrap_or(""),
                    "selected headline"
                );
                articles.push(selected.clone().tagged(spec.display_label));
                satisfied = true;
            }
        }

        if !satisfied && articles.len() < MAX_CANDIDATES {
            let found = source
                .search(spec.display_label)
                .await
                .map_err(DashboardError::Transport)?;
            if let Some(first) = found.into_iter().next() {
                debug!(label = spec.display_label, "filled category from keyword search");
                articles.push(first.tagged(spec.display_label));
            }
        }
    }

    articles.truncate(MAX_CANDIDATES);
    info!("headline fetch produced {} candidates", articles.len());
    Ok(articles)
}

/// Candidates for the social digest: first results of one broad search.
pub async fn fetch_trending_social<S: NewsSource + ?Sized>(
    source: &S,
) -> DashboardResult<Vec<CandidateArticle>> {
    let mut found = source
        .search(SOCIAL_QUERY)
        .await
        .map_err(DashboardError::Transport)?;
    found.truncate(SOCIAL_CANDIDATES);
    Ok(found)
}

/// newsapi.org-compatible HTTP client
pub struct NewsApiClient {
    base_url: Url,
    api_key: Option<String>,
    client: Client,
}

impl NewsApiClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        // Url::join drops the last path segment unless the base ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .with_context(|| format!("invalid news API base URL: {}", base_url))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("WallNews/0.1.0")
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            base_url,
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        })
    }

    async fn get_articles(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<CandidateArticle>> {
        let mut url = self
            .base_url
            .join(endpoint)
            .with_context(|| format!("failed to build URL for {}", endpoint))?;
        {
            let mut query = url.query_pairs_mut();
            for (k, v) in params {
                query.append_pair(k, v);
            }
            if let Some(key) = &self.api_key {
                query.append_pair("apiKey", key);
            }
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("news request to {} failed", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<NewsApiError>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            anyhow::bail!("news API error {}: {}", status, message);
        }

        let body: NewsApiResponse = response
            .json()
            .await
            .context("failed to parse news API response")?;
        Ok(body.articles)
    }
}

#[async_trait::async_trait]
impl NewsSource for NewsApiClient {
    async fn top_headlines(&self, country: &str, category: &str) -> Result<Vec<CandidateArticle>> {
        self.get_articles("top-headlines", &[("country", country), ("category", category)])
            .await
    }

    async fn search(&self, query: &str) -> Result<Vec<CandidateArticle>> {
        self.get_articles("everything", &[("q", query)]).await
    }
}

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    #[serde(default)]
    articles: Vec<CandidateArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsApiError {
    message: String,
}
