//! Init command implementation

use crate::config::Config;
use crate::db::FeatureDb;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub force: bool,
}

/// Where init put things
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitReport {
    pub config_path: String,
    pub db_path: String,
    pub keyframes_dir: String,
    pub work_dir: String,
}

/// Write a default configuration and create the database and working directories
pub async fn cmd_init(options: InitOptions) -> Result<InitReport> {
    let mut config = Config::default();
    config.init_paths(Some(options.base_dir));

    if config.paths.config_file.exists() && !options.force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    config.validate()?;
    config.save()?;

    std::fs::create_dir_all(&config.paths.keyframes_dir)?;
    std::fs::create_dir_all(&config.paths.work_dir)?;

    let db = FeatureDb::connect(&config).await?;
    db.init_schema().await?;
    info!("Created database at {:?}", config.paths.db_file);

    Ok(InitReport {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        keyframes_dir: config.paths.keyframes_dir.display().to_string(),
        work_dir: config.paths.work_dir.display().to_string(),
    })
}

pub fn print_init(report: &InitReport) {
    println!("✓ reelcheck initialized");
    println!("  Config: {}", report.config_path);
    println!("  Database: {}", report.db_path);
    println!("  Keyframes: {}", report.keyframes_dir);
    println!("  Work dir: {}", report.work_dir);
    println!("\nSet OPENAI_API_KEY (or edit llm.api_key_env) before running 'reelcheck evaluate'.");
}
