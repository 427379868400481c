//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use crate::store::{DenseIndex, QdrantIndex};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub force: bool,
    /// Workspace used for the Qdrant reachability check
    pub workspace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitReport {
    pub config_path: String,
    pub db_path: String,
    pub sparse_dir: String,
    pub qdrant_url: String,
    pub qdrant_reachable: bool,
}

/// Write a default config and create the metadata database
pub async fn cmd_init(options: InitOptions) -> Result<InitReport> {
    let mut config = Config::default();
    config.init_paths(Some(options.base_dir));

    if config.paths.config_file.exists() {
        if !options.force {
            return Err(Error::Config(format!(
                "Config already exists at {}. Use --force to overwrite.",
                config.paths.config_file.display()
            )));
        }
        warn!("Overwriting config at {:?}", config.paths.config_file);
    }

    config.validate()?;
    config.save()?;

    let db = MetaDb::connect(&config).await?;
    db.init_schema().await?;
    info!("Created database at {:?}", config.paths.db_file);

    std::fs::create_dir_all(&config.paths.sparse_dir)?;

    let qdrant_reachable = match QdrantIndex::connect(&config) {
        Ok(index) => match index.count(&options.workspace).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Qdrant is not reachable yet: {}", e);
                false
            }
        },
        Err(e) => {
            warn!("Could not create Qdrant client: {}", e);
            false
        }
    };

    Ok(InitReport {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        sparse_dir: config.paths.sparse_dir.display().to_string(),
        qdrant_url: config.qdrant_url,
        qdrant_reachable,
    })
}

pub fn print_init(report: &InitReport) {
    println!("\n✓ stacks initialized\n");
    println!("Config:   {}", report.config_path);
    println!("Database: {}", report.db_path);
    println!("BM25:     {}", report.sparse_dir);
    if report.qdrant_reachable {
        println!("Qdrant:   ✓ {}", report.qdrant_url);
    } else {
        println!(
            "Qdrant:   ✗ {} (start Qdrant before running 'stacks index')",
            report.qdrant_url
        );
    }
}
