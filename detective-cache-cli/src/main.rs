use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use detective_cache::cache::{AiCache, CacheConfig, DiskTier};

#[derive(Parser)]
#[command(name = "detective-cache")]
#[command(about = "Inspect and maintain the AI response disk cache", long_about = None)]
struct Cli {
    /// Cache directory (defaults to AI_CACHE_DIRECTORY or cache/ai_responses)
    #[arg(short, long)]
    cache_dir: Option<PathBuf>,

    /// Disk entry lifetime in seconds (defaults to AI_CACHE_DISK_TTL_SECONDS)
    #[arg(long)]
    ttl: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show disk tier statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Look up a cached response
    Get {
        /// Prompt text
        prompt: String,

        /// Model parameter as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Game context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },

    /// Store a response
    Put {
        /// Prompt text
        prompt: String,

        /// Response (parsed as JSON when possible, otherwise stored as text)
        response: String,

        /// Model parameter as key=value (repeatable)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,

        /// Game context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },

    /// Remove expired entries now
    Sweep,

    /// Delete every blob and reset the index
    Purge {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "detective_cache=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let output = execute(&cli)?;
    println!("{}", output);

    Ok(())
}

fn execute(cli: &Cli) -> Result<String> {
    let config = cache_config(cli);
    let directory = config.cache_directory.clone();

    match &cli.command {
        Commands::Stats { json } => {
            let disk = open_disk(&config)?;
            let stats = disk.stats();

            if *json {
                return serde_json::to_string_pretty(&stats).context("Failed to encode stats");
            }
            Ok(format!(
                "Disk cache: {}\n  Entries:  {}/{}\n  Size:     {} bytes\n  Index:    {}\n  Repaired: {}",
                stats.cache_directory.display(),
                stats.entries,
                stats.max_entries,
                stats.total_size_bytes,
                if stats.index_file_exists { "present" } else { "missing" },
                stats.repaired_entries
            ))
        }

        Commands::Get {
            prompt,
            params,
            context,
        } => {
            let cache = open_cache(config)?;
            let context = parse_context(context.as_deref())?;
            let found = cache.get(prompt, &params_object(params), context.as_ref());
            cache.shutdown();

            match found {
                Some(value) => render(&value),
                None => bail!("No cached response for this request"),
            }
        }

        Commands::Put {
            prompt,
            response,
            params,
            context,
        } => {
            let cache = open_cache(config)?;
            let context = parse_context(context.as_deref())?;
            let params = params_object(params);
            let key = cache.key_for(prompt, &params, context.as_ref());

            cache.put(prompt, &params, parse_value(response), context.as_ref(), None);
            cache.shutdown();

            let stored = cache.disk_tier().is_some_and(|disk| disk.contains(&key));
            if !stored {
                bail!("Response was not written to {}", directory.display());
            }
            Ok(format!("Stored {}", key))
        }

        Commands::Sweep => {
            let cache = open_cache(config)?;
            let report = cache.sweep_expired();
            cache.shutdown();

            Ok(format!("Removed {} expired entries", report.expired_disk))
        }

        Commands::Purge { yes } => {
            if !yes {
                bail!("Refusing to purge {} without --yes", directory.display());
            }
            let disk = open_disk(&config)?;
            let deleted = disk.clear();
            info!("Purged disk cache at {}", directory.display());

            Ok(format!("Deleted {} files from {}", deleted, directory.display()))
        }
    }
}

/// Environment configuration forced on with the disk tier enabled
fn cache_config(cli: &Cli) -> CacheConfig {
    let env = CacheConfig::from_env();

    let mut builder = CacheConfig::builder()
        .enabled(true)
        .enable_disk_cache(true)
        .max_disk_entries(env.max_disk_entries)
        .disk_ttl(env.disk_ttl)
        .max_prompt_length(env.max_prompt_length)
        .hash_algorithm(env.hash_algorithm)
        .include_timestamp_in_key(env.include_timestamp_in_key)
        .cache_directory(cli.cache_dir.clone().unwrap_or(env.cache_directory));

    if let Some(ttl) = cli.ttl {
        builder = builder.disk_ttl(Duration::from_secs(ttl));
    }
    builder.build()
}

fn open_disk(config: &CacheConfig) -> Result<DiskTier> {
    DiskTier::open(&config.cache_directory, config.max_disk_entries).with_context(|| {
        format!(
            "Failed to open disk cache at {}",
            config.cache_directory.display()
        )
    })
}

fn open_cache(config: CacheConfig) -> Result<AiCache> {
    let directory = config.cache_directory.clone();
    let cache = AiCache::new(config);
    if cache.disk_tier().is_none() {
        bail!("Failed to open disk cache at {}", directory.display());
    }
    Ok(cache)
}

fn parse_param(raw: &str) -> std::result::Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in {:?}", raw));
    }
    Ok((name.to_string(), parse_value(value)))
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_context(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|raw| serde_json::from_str(raw).context("--context must be valid JSON"))
        .transpose()
}

fn params_object(params: &[(String, Value)]) -> Value {
    Value::Object(params.iter().cloned().collect::<Map<String, Value>>())
}

fn render(value: &Value) -> Result<String> {
    match value {
        Value::String(text) => Ok(text.clone()),
        other => serde_json::to_string_pretty(other).context("Failed to encode response"),
    }
}
