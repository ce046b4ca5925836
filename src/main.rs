use cannect_ingest::classifier::HeuristicClassifier;
use cannect_ingest::cli::{Cli, Commands, ConfigAction};
use cannect_ingest::config::Config;
use cannect_ingest::error::{IngestError, Result};
use cannect_ingest::firehose::CommitReader;
use cannect_ingest::ingest::Ingestor;
use cannect_ingest::storage::SqliteContentStore;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Run { input } => {
            cmd_run(cli.config, &input)?;
        }
        Commands::Classify { text, handle } => {
            cmd_classify(cli.config, &text, &handle)?;
        }
        Commands::Feed { limit, cursor } => {
            cmd_feed(cli.config, limit, cursor.as_deref())?;
        }
        Commands::Stats { json } => {
            cmd_stats(cli.config, json)?;
        }
        Commands::Export { output, since } => {
            cmd_export(cli.config, &output, since.as_deref())?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose {
        "cannect_ingest=debug"
    } else {
        "cannect_ingest=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so `feed`/`export` output stays clean on stdout
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_run(config_path: Option<PathBuf>, input: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let ingestor = Ingestor::new(config)?;

    let runtime = tokio::runtime::Runtime::new().map_err(|e| IngestError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;

    let summary = runtime.block_on(async {
        if input == "-" {
            let reader = CommitReader::new(tokio::io::BufReader::new(tokio::io::stdin()));
            ingestor.run(reader).await
        } else {
            let file = tokio::fs::File::open(input)
                .await
                .map_err(|e| IngestError::Io {
                    source: e,
                    context: format!("Failed to open input: {}", input),
                })?;
            let reader = CommitReader::new(tokio::io::BufReader::new(file));
            ingestor.run(reader).await
        }
    })?;

    println!(
        "✓ Ingestion {}",
        if summary.interrupted {
            "interrupted"
        } else {
            "complete"
        }
    );
    println!(
        "  Commits: {} ({} malformed lines skipped)",
        summary.reader.commits, summary.reader.malformed
    );
    println!("  Processed: {}", summary.stats.processed);
    println!("  Indexed: {}", summary.stats.indexed);

    Ok(())
}

fn cmd_classify(config_path: Option<PathBuf>, text: &str, handle: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let classifier = HeuristicClassifier::new(&config.classifier)?;

    let decision = classifier.classify(handle, Some(text));
    let scan = classifier.scan(text);

    println!("Outcome: {:?}", decision.outcome);
    println!("Reason: {}", decision.reason);
    println!("Trusted source: {}", decision.is_trusted_source);
    println!("Allow hits: {:?}", scan.allow_hits);
    println!("Deny hits: {:?}", scan.deny_hits);

    Ok(())
}

fn cmd_feed(config_path: Option<PathBuf>, limit: usize, cursor: Option<&str>) -> Result<()> {
    let store = open_store(config_path)?;
    let page = store.feed(limit, cursor)?;

    let json = serde_json::to_string_pretty(&page).map_err(|e| IngestError::Json {
        source: e,
        context: "Failed to serialize feed".to_string(),
    })?;
    println!("{}", json);

    Ok(())
}

fn cmd_stats(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let store = open_store(config_path)?;
    let stats = store.stats()?;

    if json {
        let out = serde_json::to_string_pretty(&stats).map_err(|e| IngestError::Json {
            source: e,
            context: "Failed to serialize stats".to_string(),
        })?;
        println!("{}", out);
        return Ok(());
    }

    println!("Content Store");
    println!("=============");
    println!("Posts: {}", stats.post_count);
    println!("  Trusted sources: {}", stats.trusted_count);
    println!("  AI verified: {}", stats.ai_verified_count);
    if !stats.by_embed_type.is_empty() {
        println!("\nBy embed type:");
        for (embed_type, count) in &stats.by_embed_type {
            println!("  {:<18} {}", embed_type, count);
        }
    }

    Ok(())
}

fn cmd_export(config_path: Option<PathBuf>, output: &Path, since: Option<&str>) -> Result<()> {
    let since = since
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| IngestError::InvalidConfigValue {
                    path: "--since".to_string(),
                    message: e.to_string(),
                })
        })
        .transpose()?;

    let store = open_store(config_path)?;
    let file = std::fs::File::create(output).map_err(|e| IngestError::Io {
        source: e,
        context: format!("Failed to create export file: {:?}", output),
    })?;

    let exported = store.export_jsonl(std::io::BufWriter::new(file), since)?;
    println!("✓ Exported {} posts to {}", exported, output.display());

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| IngestError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'cannect-ingest config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}

fn open_store(config_path: Option<PathBuf>) -> Result<SqliteContentStore> {
    let config = load_config(config_path)?;
    Ok(SqliteContentStore::open(
        &config.storage.database_path(),
        config.storage.pool_size,
    )?)
}
