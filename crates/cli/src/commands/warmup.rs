//! `parley warmup`: Load the model into the server before chatting.

use std::time::Instant;

use parley_agent::{Agent, WarmupOutcome};
use parley_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let backend = parley_backends::build_from_config(&config)?;
    let agent = Agent::from_config(&config, backend);

    println!("  Warming up {} ({})...", config.model, config.backend.as_str());
    let started = Instant::now();

    match agent.warmup().await {
        WarmupOutcome::Warmed(response) => {
            println!(
                "  ✅ Warm in {:.1}s, served by {}",
                started.elapsed().as_secs_f64(),
                response.model
            );
        }
        WarmupOutcome::Skipped => {
            println!("  ⚠️  Nothing to warm with: set agent.system_directive in config.toml");
        }
        WarmupOutcome::Failed(e) => {
            println!("  ❌ Warmup failed: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}
