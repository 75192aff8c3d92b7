//! Live smoke run against the configured news source and LLM.
//!
//! Usage: `test_digest [config.toml]`. Keys are read from the environment (or a local .env).

use std::path::PathBuf;

use common::Config;
use serde_json::json;

use wallnews::dashboard::Dashboard;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
    dotenv::dotenv().ok();

    let override_path = std::env::args().nth(1).map(PathBuf::from);
    let default_path = PathBuf::from("config.default.toml");
    let config = Config::load_with_defaults(Some(&default_path), override_path.as_deref()).await?;
    let dashboard = Dashboard::from_config(&config).await?;

    println!("\n{}", "=".repeat(60));
    println!("Testing WallNews digest");
    println!("Model: {}", dashboard.model());
    println!("Cache: {}", dashboard.cache().backend_name());
    println!("{}", "=".repeat(60));

    println!("\n[Test 1] News digest...");
    let articles = match dashboard.refresh_news_digest().await {
        Ok(articles) => {
            println!("✓ {} articles", articles.len());
            for a in &articles {
                println!("  [{}] {} (bias {:?})", a.category, a.title, a.bias_score);
            }
            articles
        }
        Err(e) => {
            println!("✗ Failed: {} ({})", e, e.code());
            Vec::new()
        }
    };

    println!("\n[Test 2] Social digest...");
    match dashboard.refresh_social_digest().await {
        Ok(topics) => {
            println!("✓ {} topics", topics.len());
            for t in &topics {
                println!("  {} (bias {:?})", t.title, t.bias_score);
            }
        }
        Err(e) => println!("✗ Failed: {} ({})", e, e.code()),
    }

    if let Some(first) = articles.first() {
        println!("\n[Test 3] Article detail for '{}'...", first.title);
        match dashboard.get_article_detail(&json!(first)).await {
            Ok(detail) => {
                let preview: String = detail.detailed_summary.chars().take(200).collect();
                println!("✓ {}...", preview);
                println!("  Sources: {}", detail.sources.join(", "));
            }
            Err(e) => println!("✗ Failed: {} ({})", e, e.code()),
        }
    }

    println!("\n[Test 4] Chat query...");
    match dashboard.submit_chat_query("What's new in space?", &[]).await {
        Ok(exchange) => {
            println!("✓ {}", exchange.bot.content);
            for link in &exchange.bot.links {
                println!("  -> {} <{}>", link.label, link.url);
            }
        }
        Err(e) => println!("✗ Failed: {} ({})", e, e.code()),
    }

    println!("\n[Test 5] Translate...");
    match dashboard.translate("The launch was postponed because of high winds.").await {
        Ok(t) => println!("✓ {}", t.translation),
        Err(e) => println!("✗ Failed: {} ({})", e, e.code()),
    }

    println!("\n{}", "=".repeat(60));
    Ok(())
}
