use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use graphpack_core::{
    CacheConfig, Frame, GraphCache, JsonFrameStage, ObjectCodec, SerializerRegistry, Stage,
    Storage, StorageStage, Value,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod convert;

#[derive(Parser)]
#[command(name = "graphpack", version, about = "Pack JSON documents into a graph cache")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON config file (see `CacheConfig`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Output compact JSON
    #[arg(long, global = true)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a JSON document under a key
    Write { key: String, input: PathBuf },
    /// Print the document stored under a key
    Read { key: String },
    /// Show the primitive stream statistics of a stored entry
    Inspect { key: String },
    /// Remove a stored entry
    Clear { key: String },
}

#[derive(Debug, Default, serde::Serialize)]
struct StreamStats {
    items: usize,
    nulls: usize,
    back_references: usize,
    objects: usize,
    strings: usize,
}

fn stream_stats(items: &Frame) -> StreamStats {
    let mut stats = StreamStats {
        items: items.len(),
        ..StreamStats::default()
    };
    let mut iter = items.iter();
    while let Some(item) = iter.next() {
        match item {
            Value::Null => match iter.next() {
                Some(Value::Int(1)) => stats.nulls += 1,
                Some(Value::Int(_)) => stats.back_references += 1,
                Some(_) => {
                    stats.objects += 1;
                    iter.next();
                }
                None => {}
            },
            Value::Str(_) => stats.strings += 1,
            _ => {}
        }
    }
    stats
}

fn print_json(value: &serde_json::Value, compact: bool) -> Result<()> {
    let text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{text}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => CacheConfig::from_json_file(path)
            .await
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }

    let registry = Arc::new(SerializerRegistry::with_builtins()?);
    let codec = ObjectCodec::new(registry);
    let storage = Arc::new(config.storage());
    let frames = JsonFrameStage::new().pretty(config.pretty_frames);
    let cache = GraphCache::new(codec, frames.clone(), storage.clone());

    match cli.command {
        Commands::Write { key, input } => {
            let bytes = tokio::fs::read(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let doc: serde_json::Value = serde_json::from_slice(&bytes)?;
            cache.store(&key, convert::from_json(doc)?).await?;
            info!(key = %key, path = %storage.path_for(&key)?.display(), "stored");
        }
        Commands::Read { key } => {
            let root = cache
                .load(&key)
                .await?
                .with_context(|| format!("no entry for '{key}'"))?;
            print_json(&convert::to_json(&root)?, cli.compact)?;
        }
        Commands::Inspect { key } => {
            let sections = StorageStage::new(storage.clone(), &key)
                .backward(Vec::new())
                .await?;
            let items = frames.backward(sections).await?;
            let stats = stream_stats(&items);
            print_json(&serde_json::to_value(stats)?, cli.compact)?;
        }
        Commands::Clear { key } => {
            storage.delete(&key).await?;
            info!(key = %key, "cleared");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphpack_core::Record;

    #[test]
    fn stats_count_escapes() {
        let codec = ObjectCodec::new(Arc::new(SerializerRegistry::with_builtins().unwrap()));
        let record = Record::new().with("k", "v").with("none", Value::Null);
        let items = codec
            .encode(vec![Value::object(record), Value::from("v")])
            .unwrap();
        let stats = stream_stats(&items);
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.nulls, 1);
        assert_eq!(stats.back_references, 1);
        assert_eq!(stats.items, items.len());
    }
}
