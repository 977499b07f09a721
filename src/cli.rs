use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use anyhow::{bail, Result};

use crate::config::{Config, DatabaseConfig};
use crate::core::Engine;

#[derive(Parser)]
#[command(name = "routescribe")]
#[command(about = "Generate endpoint tests for FastAPI applications from their call graph")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Default)]
pub struct EndpointFilter {
    /// Only endpoints with this route name
    #[arg(long)]
    pub function_name: Option<String>,

    /// Only endpoints whose path contains this text
    #[arg(long)]
    pub route_path: Option<String>,
}

#[derive(Args, Default)]
pub struct DatabaseArgs {
    /// Schema store backend (sqlite, postgres)
    #[arg(long)]
    pub db_backend: Option<String>,

    /// Connection string for the schema store
    #[arg(long)]
    pub db_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate test files for the application's endpoints
    Generate {
        /// Directory containing the application
        source: Option<PathBuf>,

        /// Where tests are written (defaults to <source>/tests)
        #[arg(long)]
        test_dir: Option<PathBuf>,

        #[command(flatten)]
        filter: EndpointFilter,

        #[command(flatten)]
        database: DatabaseArgs,

        /// Regenerate tests that already exist
        #[arg(long)]
        overwrite: bool,

        /// Run each generated file with pytest
        #[arg(long)]
        run_tests: bool,

        /// LLM provider (anthropic, openai)
        #[arg(long)]
        provider: Option<String>,

        /// LLM model name
        #[arg(long)]
        model: Option<String>,

        /// API key for the provider
        #[arg(long)]
        api_key: Option<String>,

        /// Text placed before the prompt
        #[arg(long)]
        prompt_pre: Option<String>,

        /// Extra context for the prompt
        #[arg(long)]
        prompt_info: Option<String>,

        /// Mocks the tests may use
        #[arg(long)]
        mock_prompt: Option<String>,

        /// Fixtures the tests may use
        #[arg(long)]
        fixtures_prompt: Option<String>,

        /// Text placed after the prompt
        #[arg(long)]
        prompt_after: Option<String>,

        /// Write a JSON run report here
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the context bundles of the selected endpoints as JSON
    Inspect {
        /// Directory containing the application
        source: Option<PathBuf>,

        #[command(flatten)]
        filter: EndpointFilter,

        #[command(flatten)]
        database: DatabaseArgs,
    },

    /// Locate the application root and print it
    FindApp {
        /// Directory to search
        source: Option<PathBuf>,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let mut config = Config::load_or_default(self.config.as_deref())?;

        match self.command {
            Commands::Generate {
                source,
                test_dir,
                filter,
                database,
                overwrite,
                run_tests,
                provider,
                model,
                api_key,
                prompt_pre,
                prompt_info,
                mock_prompt,
                fixtures_prompt,
                prompt_after,
                report,
            } => {
                apply_source(&mut config, source);
                apply_filter(&mut config, filter);
                apply_database(&mut config, database)?;
                override_with(&mut config.project.test_dir, test_dir);

                let generation = &mut config.generation;
                generation.overwrite |= overwrite;
                generation.run_tests |= run_tests;
                override_with(&mut generation.additional_prompt_pre, prompt_pre);
                override_with(&mut generation.additional_prompt_info, prompt_info);
                override_with(&mut generation.mock_prompt, mock_prompt);
                override_with(&mut generation.fixtures_prompt, fixtures_prompt);
                override_with(&mut generation.additional_prompt_after, prompt_after);

                override_with_value(&mut config.llm.provider, provider);
                override_with(&mut config.llm.model, model);
                override_with(&mut config.llm.api_key, api_key);

                let mut engine = Engine::new(config);
                let run = engine.generate(report.as_deref()).await?;
                for (bundle, artifact) in &run.results {
                    println!(
                        "{} -> {} ({} tokens)",
                        bundle.route_definition,
                        artifact.status,
                        artifact.tokens_used.map_or("?".to_string(), |t| t.to_string())
                    );
                }
                Ok(())
            }
            Commands::Inspect { source, filter, database } => {
                apply_source(&mut config, source);
                apply_filter(&mut config, filter);
                apply_database(&mut config, database)?;

                let engine = Engine::new(config);
                let bundles = engine.inspect().await?;
                println!("{}", serde_json::to_string_pretty(&bundles)?);
                Ok(())
            }
            Commands::FindApp { source } => {
                apply_source(&mut config, source);

                let engine = Engine::new(config);
                let location = engine.find_app()?;
                println!("{}", location);
                Ok(())
            }
        }
    }
}

fn override_with<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

fn override_with_value<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn apply_source(config: &mut Config, source: Option<PathBuf>) {
    override_with_value(&mut config.project.source_dir, source);
}

fn apply_filter(config: &mut Config, filter: EndpointFilter) {
    override_with(&mut config.generation.function_name, filter.function_name);
    override_with(&mut config.generation.route_path, filter.route_path);
}

fn apply_database(config: &mut Config, args: DatabaseArgs) -> Result<()> {
    if let Some(database) = config.database.as_mut() {
        override_with_value(&mut database.backend, args.db_backend);
        override_with_value(&mut database.url, args.db_url);
        return Ok(());
    }

    match (args.db_backend, args.db_url) {
        (None, None) => {}
        (Some(backend), Some(url)) => {
            config.database = Some(DatabaseConfig {
                backend,
                url,
                queries: None,
            });
        }
        (Some(_), None) => bail!("--db-backend requires --db-url"),
        (None, Some(_)) => bail!("--db-url requires --db-backend"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_flags_parse() {
        let cli = Cli::try_parse_from([
            "routescribe",
            "--verbose",
            "generate",
            "app",
            "--route-path",
            "/users",
            "--overwrite",
            "--db-backend",
            "sqlite",
            "--db-url",
            "app.db",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Generate { source, filter, database, overwrite, .. } => {
                assert_eq!(source, Some(PathBuf::from("app")));
                assert_eq!(filter.route_path.as_deref(), Some("/users"));
                assert!(overwrite);
                assert_eq!(database.db_backend.as_deref(), Some("sqlite"));
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_database_flags_merge_with_config() {
        let mut config = Config::default();
        apply_database(
            &mut config,
            DatabaseArgs {
                db_backend: Some("postgres".to_string()),
                db_url: Some("postgres://localhost/app".to_string()),
            },
        )
        .unwrap();
        assert_eq!(config.database.as_ref().unwrap().backend, "postgres");

        apply_database(
            &mut config,
            DatabaseArgs {
                db_backend: None,
                db_url: Some("postgres://localhost/other".to_string()),
            },
        )
        .unwrap();
        assert_eq!(config.database.unwrap().url, "postgres://localhost/other");

        let mut empty = Config::default();
        assert!(apply_database(
            &mut empty,
            DatabaseArgs {
                db_backend: Some("sqlite".to_string()),
                db_url: None,
            },
        )
        .is_err());
    }
}
