//! `parley doctor`: Diagnose config and backend health.

use parley_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 parley doctor — System Diagnostics");
    println!("=====================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_path();
    if !config_path.exists() {
        println!("  ⚠️  No config file — using defaults (run `parley onboard` to create one)");
        issues += 1;
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  Fix the config before checking the backend.");
            return Ok(());
        }
    };

    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| parley_backends::default_base_url(config.backend).to_string());
    println!("  Backend:   {} at {base_url}", config.backend.as_str());
    println!("  Model:     {}", config.model);
    println!("  Template:  {}", config.agent.template.as_str());

    match parley_backends::build_from_config(&config) {
        Ok(backend) => match backend.health_check().await {
            Ok(true) => println!("  ✅ Backend reachable"),
            Ok(false) => {
                println!("  ❌ Backend answered but is not healthy (model still loading?)");
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ Backend unreachable: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Could not build backend: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
