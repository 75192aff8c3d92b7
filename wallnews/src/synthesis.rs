//! Prompt construction and reply coercion for every synthesis intent.
//!
//! Both halves are plain functions so they can be tested without a network: `build_prompt`
//! turns an intent and its input into an instruction, `coerce` turns the service's free text
//! into a typed record. `Synthesizer` only glues them around one provider call.

use std::sync::Arc;

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::chat::{ChatRole, ChatTurn};
use crate::error::{DashboardError, DashboardResult};
use crate::headlines::{CandidateArticle, DEFAULT_CATEGORIES};
use crate::llm::{extract_json_from_text, LlmProvider, LlmRequest};

/// Number of earlier chat turns replayed into a chat prompt
pub const CHAT_HISTORY_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    NewsDigest,
    SocialDigest,
    ArticleDetail,
    ChatQuery,
    Translate,
}

impl Intent {
    pub fn max_tokens(self) -> usize {
        match self {
            Intent::NewsDigest => 2000,
            Intent::SocialDigest => 1000,
            Intent::ArticleDetail => 1500,
            Intent::ChatQuery => 1500,
            Intent::Translate => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::NewsDigest => "news_digest",
            Intent::SocialDigest => "social_digest",
            Intent::ArticleDetail => "article_detail",
            Intent::ChatQuery => "chat_query",
            Intent::Translate => "translate",
        }
    }
}

/// Input for one synthesis call
#[derive(Debug, Clone, Copy)]
pub enum SynthesisRequest<'a> {
    NewsDigest(&'a [CandidateArticle]),
    SocialDigest(&'a [CandidateArticle]),
    /// The item the user selected, as rendered by the presentation layer
    ArticleDetail(&'a Value),
    ChatQuery {
        query: &'a str,
        history: &'a [ChatTurn],
    },
    Translate {
        text: &'a str,
        language: &'a str,
    },
}

impl SynthesisRequest<'_> {
    pub fn intent(&self) -> Intent {
        match self {
            SynthesisRequest::NewsDigest(_) => Intent::NewsDigest,
            SynthesisRequest::SocialDigest(_) => Intent::SocialDigest,
            SynthesisRequest::ArticleDetail(_) => Intent::ArticleDetail,
            SynthesisRequest::ChatQuery { .. } => Intent::ChatQuery,
            SynthesisRequest::Translate { .. } => Intent::Translate,
        }
    }
}

const JSON_ONLY: &str = "Reply ONLY with the valid JSON object. Start with { and end with }. \
Do not include any other text, explanation or introduction.";

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Category labels present in the candidates, in first-seen order, or the default labels
/// when none are tagged.
fn category_labels(articles: &[CandidateArticle]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for label in articles.iter().filter_map(|a| a.custom_category.as_ref()) {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    if labels.is_empty() {
        labels = DEFAULT_CATEGORIES
            .iter()
            .map(|c| c.display_label.to_string())
            .collect();
    }
    labels
}

/// Builds the instruction sent to the generative service.
pub fn build_prompt(request: &SynthesisRequest<'_>) -> String {
    match request {
        SynthesisRequest::NewsDigest(articles) => format!(
            r#"Analyse these diversified news articles (at least one per category): {articles}

Provide at least one article per category ({labels}) with:
- title,
- an objective summary (drawing on several sources when possible),
- multiple sources (add opposing outlets to balance bias and flag potential omissions),
- category (the label provided),
- biasScore (number 0-10, 0 = neutral; based on the political and financial interests of the sources and their opponents, word choice and omissions),
- approximate views/likes (estimate when absent),
- url (original link),
- imageUrl (image URL if available, otherwise empty).

Strict JSON format: {{"articles": [{{"title": "", "summary": "", "sources": [], "category": "", "biasScore": 0, "views": 0, "likes": 0, "url": "", "imageUrl": ""}}]}}
Ensure objectivity, a diversity of viewpoints, and avoid echo chambers.
{json_only}"#,
            articles = to_json(articles),
            labels = category_labels(articles).join(", "),
            json_only = JSON_ONLY,
        ),
        SynthesisRequest::SocialDigest(items) => format!(
            r#"Analyse these social media headlines: {items}

Provide 5 major topics with:
- title,
- summary,
- sources,
- biasScore (number 0-10, based on political and financial interests, word choice and omissions).

JSON format: {{"topics": [{{"title": "", "summary": "", "sources": [], "biasScore": 0}}]}}
Focus on trends without user bias.
{json_only}"#,
            items = to_json(items),
            json_only = JSON_ONLY,
        ),
        SynthesisRequest::ArticleDetail(item) => format!(
            r#"Provide a detailed, objective summary of this article and its sources: {item}

Include multi-source summaries (add opposing outlets), biasScores (an array with one 0-10 score per source, based on political and financial interests, word choice and omissions) and links (an array of URLs).
Invite the reader to read the original to form their own opinion.

Strict JSON format: {{"detailedSummary": "summary text", "sources": [], "biasScores": [0], "links": []}}
{json_only}"#,
            item = to_json(item),
            json_only = JSON_ONLY,
        ),
        SynthesisRequest::ChatQuery { query, history } => {
            let mut prompt = String::new();
            let recent = &history[history.len().saturating_sub(CHAT_HISTORY_WINDOW)..];
            if !recent.is_empty() {
                prompt.push_str("Conversation so far:\n");
                for turn in recent {
                    let who = match turn.role {
                        ChatRole::User => "User",
                        ChatRole::Bot => "Assistant",
                    };
                    prompt.push_str(&format!("{}: {}\n", who, turn.content));
                }
                prompt.push('\n');
            }
            prompt.push_str(&format!(
                r#"Answer the question {query} ONLY by listing relevant articles from different sources with their links, plus a single summary covering all of them.

JSON format: {{"summary": "single summary for all articles, including an overall biasScore (0-10)", "articles": [{{"title": "title", "url": "link"}}]}}
List at least 3 diversified articles. Invite the reader to read them in full to form their own opinion.
{json_only}"#,
                query = to_json(query),
                json_only = JSON_ONLY,
            ));
            prompt
        }
        SynthesisRequest::Translate { text, language } => format!(
            r#"Translate this text into {language}: {text}

JSON format: {{"translation": "translated text"}}
{json_only}"#,
            language = language,
            text = to_json(text),
            json_only = JSON_ONLY,
        ),
    }
}

/// A structured reply shape and the top-level fields it expects.
pub trait ReplySchema: DeserializeOwned {
    const FIELDS: &'static [&'static str];
}

/// Turns the service's raw reply into `T`.
///
/// Fails only when no JSON object can be cut out and parsed. Missing fields are filled with
/// empty defaults and logged.
pub fn coerce<T: ReplySchema>(raw: &str) -> DashboardResult<T> {
    let json = extract_json_from_text(raw)
        .ok_or_else(|| DashboardError::MalformedResponse("no JSON object in reply".into()))?;

    let value: Value = serde_json::from_str(json)
        .map_err(|e| DashboardError::MalformedResponse(format!("unparseable JSON: {}", e)))?;

    let object = value
        .as_object()
        .ok_or_else(|| DashboardError::MalformedResponse("reply is not a JSON object".into()))?;

    let missing: Vec<&str> = T::FIELDS
        .iter()
        .copied()
        .filter(|f| !object.contains_key(*f))
        .collect();
    if !missing.is_empty() {
        warn!(?missing, "AI reply is missing fields, using empty defaults");
    }

    serde_json::from_value(value)
        .map_err(|e| DashboardError::MalformedResponse(format!("unexpected reply shape: {}", e)))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthesizedArticle {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub sources: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub category: String,
    #[serde(deserialize_with = "lenient_score")]
    pub bias_score: Option<f64>,
    #[serde(deserialize_with = "lenient_count")]
    pub views: Option<u64>,
    #[serde(deserialize_with = "lenient_count")]
    pub likes: Option<u64>,
    #[serde(deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub image_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsDigest {
    #[serde(deserialize_with = "lenient_records")]
    pub articles: Vec<SynthesizedArticle>,
}

impl ReplySchema for NewsDigest {
    const FIELDS: &'static [&'static str] = &["articles"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocialTopic {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub sources: Vec<String>,
    #[serde(deserialize_with = "lenient_score")]
    pub bias_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialDigest {
    #[serde(deserialize_with = "lenient_records")]
    pub topics: Vec<SocialTopic>,
}

impl ReplySchema for SocialDigest {
    const FIELDS: &'static [&'static str] = &["topics"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetailedSummary {
    #[serde(deserialize_with = "lenient_string")]
    pub detailed_summary: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub sources: Vec<String>,
    #[serde(deserialize_with = "lenient_scores")]
    pub bias_scores: Vec<f64>,
    #[serde(deserialize_with = "lenient_strings")]
    pub links: Vec<String>,
}

impl ReplySchema for DetailedSummary {
    const FIELDS: &'static [&'static str] = &["detailedSummary", "sources", "biasScores", "links"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerArticle {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatAnswer {
    #[serde(deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(deserialize_with = "lenient_records")]
    pub articles: Vec<AnswerArticle>,
}

impl ReplySchema for ChatAnswer {
    const FIELDS: &'static [&'static str] = &["summary", "articles"];
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Translation {
    #[serde(deserialize_with = "lenient_string")]
    pub translation: String,
}

impl ReplySchema for Translation {
    const FIELDS: &'static [&'static str] = &["translation"];
}

// The service is free to answer `null`, numbers where strings are expected, objects where
// source names are expected, or "7/10" as a score. These helpers absorb that.

fn string_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map
            .get("name")
            .or_else(|| map.get("title"))
            .or_else(|| map.get("url"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        Value::Array(_) => None,
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            let (sign, digits) = match cleaned.strip_prefix('-') {
                Some(rest) => ("-", rest),
                None => ("", cleaned.as_str()),
            };
            let leading: String = digits
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            format!("{}{}", sign, leading).parse().ok()
        }
        _ => None,
    }
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 10.0)
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(string_of(&Value::deserialize(d)?).unwrap_or_default())
}

fn lenient_strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items.iter().filter_map(string_of).collect(),
        other => string_of(&other).into_iter().collect(),
    })
}

fn lenient_score<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(number_of(&Value::deserialize(d)?).map(clamp_score))
}

fn lenient_scores<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items.iter().filter_map(number_of).map(clamp_score).collect(),
        other => number_of(&other).map(clamp_score).into_iter().collect(),
    })
}

/// `null` or a non-list becomes empty; list items that do not fit `T` are dropped.
fn lenient_records<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("dropping unusable record from AI reply: {}", e);
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Ok(number_of(&Value::deserialize(d)?)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n.round() as u64))
}

/// Stateless wrapper around one generative provider
#[derive(Clone)]
pub struct Synthesizer {
    provider: Arc<dyn LlmProvider>,
}

impl Synthesizer {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Builds the prompt for `request`, calls the provider once, and coerces the reply.
    pub async fn synthesize<T: ReplySchema>(
        &self,
        request: &SynthesisRequest<'_>,
    ) -> DashboardResult<T> {
        let intent = request.intent();
        let prompt = build_prompt(request);
        debug!(intent = intent.as_str(), prompt_chars = prompt.len(), "sending synthesis request");

        let response = self
            .provider
            .generate(LlmRequest {
                prompt,
                max_tokens: Some(intent.max_tokens()),
                timeout_seconds: None,
            })
            .await
            .map_err(DashboardError::Transport)?;

        info!(
            intent = intent.as_str(),
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "synthesis reply received"
        );

        coerce::<T>(&response.content).map_err(|e| {
            warn!(intent = intent.as_str(), "could not coerce AI reply: {}", e);
            e
        })
    }

    pub async fn news_digest(&self, articles: &[CandidateArticle]) -> DashboardResult<NewsDigest> {
        self.synthesize(&SynthesisRequest::NewsDigest(articles)).await
    }

    pub async fn social_digest(&self, items: &[CandidateArticle]) -> DashboardResult<SocialDigest> {
        self.synthesize(&SynthesisRequest::SocialDigest(items)).await
    }

    pub async fn article_detail(&self, item: &Value) -> DashboardResult<DetailedSummary> {
        self.synthesize(&SynthesisRequest::ArticleDetail(item)).await
    }

    pub async fn chat_answer(
        &self,
        query: &str,
        history: &[ChatTurn],
    ) -> DashboardResult<ChatAnswer> {
        self.synthesize(&SynthesisRequest::ChatQuery { query, history }).await
    }

    pub async fn translate(&self, text: &str, language: &str) -> DashboardResult<Translation> {
        self.synthesize(&SynthesisRequest::Translate { text, language }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Anything(Value);

    impl ReplySchema for Anything {
        const FIELDS: &'static [&'static str] = &[];
    }

    #[test]
    fn coerce_extracts_object_from_chatter() {
        let parsed = coerce::<Anything>("Here is the result:\n{\"a\":1}\nThanks!").unwrap();
        assert_eq!(parsed.0, json!({"a": 1}));
    }

    #[test]
    fn coerce_without_brace_is_malformed() {
        let err = coerce::<NewsDigest>("I could not find any news today.").unwrap_err();
        assert!(matches!(err, DashboardError::MalformedResponse(_)));
    }

    #[test]
    fn coerce_broken_json_is_malformed() {
        let err = coerce::<NewsDigest>("{\"articles\": [ {\"title\": }").unwrap_err();
        assert!(matches!(err, DashboardError::MalformedResponse(_)));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let digest = coerce::<NewsDigest>("{\"note\": \"nothing\"}").unwrap();
        assert!(digest.articles.is_empty());

        let detail = coerce::<DetailedSummary>("{\"detailedSummary\": \"Long text\"}").unwrap();
        assert_eq!(detail.detailed_summary, "Long text");
        assert!(detail.sources.is_empty());
        assert!(detail.bias_scores.is_empty());
        assert!(detail.links.is_empty());
    }

    #[test]
    fn null_record_lists_default_to_empty() {
        let digest = coerce::<NewsDigest>(r#"{"articles": null}"#).unwrap();
        assert!(digest.articles.is_empty());

        let social = coerce::<SocialDigest>(r#"{"topics": null}"#).unwrap();
        assert!(social.topics.is_empty());

        let answer = coerce::<ChatAnswer>(r#"{"summary": "s", "articles": null}"#).unwrap();
        assert_eq!(answer.summary, "s");
        assert!(answer.articles.is_empty());

        let digest = coerce::<NewsDigest>(r#"{"articles": {"title": "not a list"}}"#).unwrap();
        assert!(digest.articles.is_empty());
    }

    #[test]
    fn stray_list_items_are_dropped() {
        let digest =
            coerce::<NewsDigest>(r#"{"articles": [{"title": "ok"}, "stray string", 7]}"#).unwrap();
        assert_eq!(digest.articles.len(), 1);
        assert_eq!(digest.articles[0].title, "ok");

        let answer = coerce::<ChatAnswer>(
            r#"{"summary": "s", "articles": [null, {"title": "Kept", "url": "https://a.b"}]}"#,
        )
        .unwrap();
        assert_eq!(answer.articles.len(), 1);
        assert_eq!(answer.articles[0].title, "Kept");
    }

    #[test]
    fn signed_and_grouped_numbers_parse_like_numbers() {
        let raw = r#"{"articles": [
            {"biasScore": "-3", "views": "1,500", "likes": "-4"},
            {"biasScore": -3, "views": 1500}
        ]}"#;
        let digest = coerce::<NewsDigest>(raw).unwrap();
        let (text, numeric) = (&digest.articles[0], &digest.articles[1]);

        assert_eq!(text.bias_score, Some(0.0));
        assert_eq!(text.bias_score, numeric.bias_score);
        assert_eq!(text.views, Some(1500));
        assert_eq!(text.views, numeric.views);
        assert_eq!(text.likes, None);
    }

    #[test]
    fn article_fields_are_coerced_leniently() {
        let raw = r#"{"articles": [{
            "title": "Rocket launch",
            "summary": null,
            "sources": ["Reuters", {"name": "AP"}, 3],
            "category": "Space Exploration",
            "biasScore": "12/10",
            "views": "1500",
            "likes": "lots",
            "url": "https://example.com/a"
        }]}"#;
        let digest = coerce::<NewsDigest>(raw).unwrap();
        let a = &digest.articles[0];

        assert_eq!(a.title, "Rocket launch");
        assert_eq!(a.summary, "");
        assert_eq!(a.sources, vec!["Reuters", "AP", "3"]);
        assert_eq!(a.bias_score, Some(10.0));
        assert_eq!(a.views, Some(1500));
        assert_eq!(a.likes, None);
        assert_eq!(a.image_url, "");
    }

    #[test]
    fn detail_scores_are_clamped() {
        let raw = r#"{"biasScores": [3, "4.5", -2, "n/a"], "links": "https://x.y"}"#;
        let detail = coerce::<DetailedSummary>(raw).unwrap();
        assert_eq!(detail.bias_scores, vec![3.0, 4.5, 0.0]);
        assert_eq!(detail.links, vec!["https://x.y"]);
    }

    #[test]
    fn digest_serializes_with_camel_case_fields() {
        let digest = NewsDigest {
            articles: vec![SynthesizedArticle {
                title: "t".into(),
                bias_score: Some(2.0),
                image_url: "https://img".into(),
                ..Default::default()
            }],
        };
        let value = serde_json::to_value(&digest).unwrap();
        assert_eq!(value["articles"][0]["biasScore"], json!(2.0));
        assert_eq!(value["articles"][0]["imageUrl"], json!("https://img"));
    }

    #[test]
    fn news_prompt_embeds_articles_and_labels() {
        let articles = vec![CandidateArticle {
            title: Some("Bitcoin hits new high".into()),
            custom_category: Some("Cryptocurrency".into()),
            ..Default::default()
        }];
        let prompt = build_prompt(&SynthesisRequest::NewsDigest(&articles));

        assert!(prompt.contains("Bitcoin hits new high"));
        assert!(prompt.contains("\"customCategory\":\"Cryptocurrency\""));
        assert!(prompt.contains("per category (Cryptocurrency)"));
        assert!(prompt.contains("\"articles\""));
    }

    #[test]
    fn untagged_news_prompt_lists_default_labels() {
        let prompt = build_prompt(&SynthesisRequest::NewsDigest(&[]));
        assert!(prompt.contains("Climate Change, Space Exploration"));
    }

    #[test]
    fn chat_prompt_replays_recent_history_only() {
        let mut history = Vec::new();
        for i in 0..(CHAT_HISTORY_WINDOW + 2) {
            history.push(ChatTurn::user(format!("question {}", i)));
        }
        let prompt = build_prompt(&SynthesisRequest::ChatQuery {
            query: "What's new in space?",
            history: &history,
        });

        assert!(prompt.contains("\"What's new in space?\""));
        assert!(!prompt.contains("question 1\n"));
        assert!(prompt.contains(&format!("question {}", CHAT_HISTORY_WINDOW + 1)));
    }

    #[test]
    fn translate_prompt_quotes_text_as_json() {
        let prompt = build_prompt(&SynthesisRequest::Translate {
            text: "He said \"hello\"",
            language: "French",
        });
        assert!(prompt.contains("into French"));
        assert!(prompt.contains(r#""He said \"hello\"""#));
    }

    #[test]
    fn intents_have_distinct_budgets() {
        assert_eq!(Intent::NewsDigest.max_tokens(), 2000);
        assert_eq!(Intent::Translate.max_tokens(), 500);
        assert_eq!(
            SynthesisRequest::Translate { text: "", language: "" }.intent(),
            Intent::Translate
        );
    }
}
