//! Keep a course tab playing until Ctrl-C
//!
//! Run with: cargo run --example autoplay -- <course-url> [settings.json]
//!
//! Edit the settings file while this runs to toggle features, e.g.
//! `{"autoNextEnabled": true, "playbackSpeed": 1.5}`.

use std::path::PathBuf;
use std::sync::Arc;

use courseplay::{Agent, AgentConfig, Browser, Result, SettingsAdapter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "https://www.coursera.org/".to_string());
    let settings_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("courseplay-settings.json"));

    // A persistent profile keeps the course login between runs
    let config = AgentConfig {
        profile_dir: std::env::var_os("COURSEPLAY_PROFILE").map(PathBuf::from),
        settings_path: Some(settings_path.clone()),
        ..Default::default()
    };

    let adapter = Arc::new(SettingsAdapter::new(config.settings_store()?));
    println!("Settings file: {}", settings_path.display());

    println!("Launching browser...");
    let browser = Browser::launch_with_config(config).await?;
    println!("Browser version: {}", browser.version().await?);

    let mut agent = Agent::open(&browser, adapter, &url).await?;
    println!("Agent running on {} (Ctrl-C to stop)", url);

    agent
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("Closing browser...");
    browser.close().await?;
    Ok(())
}
