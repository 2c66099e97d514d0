use crate::load_config::{load_config, load_provider_settings};
use crate::pipeline::WikiGenerator;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI for repo-wiki: generate a structured wiki for a git repository.
#[derive(Parser)]
#[clap(
    name = "repo-wiki",
    version,
    about = "Generate an LLM-written architectural wiki for a git repository"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clone a repository, summarise its modules and print the wiki as JSON
    Generate {
        /// Repository URL or owner/repo slug
        repo: String,
        /// Path to an optional YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// Write the JSON document here instead of stdout
        #[clap(long)]
        output: Option<PathBuf>,
        /// Skip the in-memory result cache
        #[clap(long)]
        no_cache: bool,
    },
}

/// Async CLI entrypoint shared by main() and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Generate {
            repo,
            config,
            output,
            no_cache,
        } => {
            let config = load_config(config.as_deref())?;
            let settings = load_provider_settings()?;
            let mut generator = WikiGenerator::from_settings(&config, &settings)?;
            if no_cache {
                generator = generator.without_cache();
            }

            eprintln!("Generating wiki for {repo}...");
            let document = generator.generate(&repo).await?;
            let json = serde_json::to_string_pretty(&document)
                .context("Failed to serialise wiki document")?;

            match output {
                Some(path) => {
                    tokio::fs::write(&path, json)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!(
                        "Wiki with {} sections written to {}",
                        document.sections.len(),
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
            Ok(())
        }
    }
}
