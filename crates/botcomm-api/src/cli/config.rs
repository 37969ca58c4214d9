//! `bcp config`: print the effective configuration.

use anyhow::Result;
use console::style;

use botcomm_infra::config::config_path;
use botcomm_infra::filesystem::DATA_DIR_ENV;

use crate::state::AppState;

pub async fn show_config(state: &AppState, json: bool) -> Result<()> {
    let path = config_path(&state.data_dir);
    let from_file = tokio::fs::try_exists(&path).await.unwrap_or(false);

    if json {
        let report = serde_json::json!({
            "data_dir": state.data_dir.display().to_string(),
            "config_file": path.display().to_string(),
            "config_file_exists": from_file,
            "config": state.config,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("  {}", style("── Paths ──").dim());
    println!(
        "  Data dir:    {} {}",
        style(state.data_dir.display()).cyan(),
        style(format!("(override with {DATA_DIR_ENV})")).dim()
    );
    let source = if from_file { "loaded" } else { "not found, using defaults" };
    println!("  Config file: {} {}", path.display(), style(format!("({source})")).dim());
    println!();

    println!("  {}", style("── Effective config ──").dim());
    for line in toml::to_string_pretty(&state.config)?.lines() {
        println!("  {line}");
    }
    println!();

    Ok(())
}
