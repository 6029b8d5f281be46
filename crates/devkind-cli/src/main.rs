//! Command-line interface for device kind resolution.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devkind_core::config::{defaults, env_vars};
use devkind_core::logging::init_tracing;
use devkind_core::{DeviceState, HttpRegistryClient, LoaderConfig, LocalPlatform, Params, Value};
use devkind_loader::{DeviceFactory, DeviceResolver};
use futures::StreamExt;

/// Resolve device kinds against a registry and exercise their queries.
#[derive(Parser, Debug)]
#[command(name = "devkind")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Cache directory for manifests and code bundles.
    #[arg(long, global = true, env = env_vars::CACHE_DIR)]
    cache_dir: Option<PathBuf>,

    /// Registry base URL.
    #[arg(long, global = true, env = env_vars::REGISTRY_URL, default_value = defaults::REGISTRY_URL)]
    registry_url: String,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "devkind=info")]
    log_level: String,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a kind and describe the resulting factory.
    Resolve {
        kind: String,
        /// Ignore cached manifests and bundles.
        #[arg(long)]
        refresh: bool,
    },
    /// Drop cached state for a kind and resolve it again.
    Invalidate { kind: String },
    /// List cached manifests.
    Cached,
    /// Run a query once, or keep watching it.
    Query {
        kind: String,
        query: String,
        /// Device state entry, `key=value` (repeatable).
        #[arg(long = "state", value_parser = parse_key_value)]
        state: Vec<(String, serde_json::Value)>,
        /// Query parameter, `key=value` (repeatable).
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, serde_json::Value)>,
        /// Subscribe and print observations until interrupted.
        #[arg(long)]
        watch: bool,
    },
}

/// `key=value`; the value is read as JSON when it parses, else as a string.
fn parse_key_value(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
    if key.is_empty() {
        return Err(format!("empty key in {:?}", s));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn default_cache_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".cache").join("devkind"))
        .unwrap_or_else(|| std::env::temp_dir().join("devkind"))
}

fn build_resolver(args: &Args) -> Result<DeviceResolver> {
    let config = LoaderConfig::from_env();
    let registry = HttpRegistryClient::new(&args.registry_url, &config)
        .context("Failed to create registry client")?
        .with_developer_key(std::env::var(env_vars::DEVELOPER_KEY).ok());

    let cache_dir = args.cache_dir.clone().unwrap_or_else(default_cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;
    tracing::debug!(cache_dir = %cache_dir.display(), registry = %registry.base_url(), "Starting resolver");

    let platform = LocalPlatform::new(cache_dir);
    Ok(DeviceResolver::builder(Arc::new(registry), Arc::new(platform))
        .config(config)
        .build())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.json_logs);

    let resolver = build_resolver(&args)?;
    match args.command {
        Command::Resolve { kind, refresh } => run_resolve(&resolver, &kind, refresh).await,
        Command::Invalidate { kind } => {
            resolver.invalidate(&kind).await?;
            println!("Invalidated {}", kind);
            Ok(())
        }
        Command::Cached => run_cached(&resolver).await,
        Command::Query {
            kind,
            query,
            state,
            params,
            watch,
        } => run_query(&resolver, &kind, &query, state, params, watch).await,
    }
}

async fn run_resolve(resolver: &DeviceResolver, kind: &str, refresh: bool) -> Result<()> {
    if refresh {
        resolver.invalidate(kind).await?;
    }
    let factory = resolver.resolve(kind).await?;
    let class = factory.get_instance_constructor().await?;
    print_factory(&factory);
    println!("  queries: {}", class.query_names().collect::<Vec<_>>().join(", "));
    println!("  actions: {}", class.action_names().collect::<Vec<_>>().join(", "));
    for child in factory.child_factories().keys() {
        println!("  child:   {}", child);
    }
    Ok(())
}

fn print_factory(factory: &DeviceFactory) {
    println!("{}", factory.id());
    println!("  type:    {}", factory.module_type());
    println!("  version: {}", factory.version());
    if let Some(package_version) = factory.manifest().package_version {
        println!("  package: {}", package_version);
    }
}

async fn run_cached(resolver: &DeviceResolver) -> Result<()> {
    let metas = resolver.manifest_cache().cached_metas().await?;
    if metas.is_empty() {
        println!("No cached manifests in {}", resolver.manifest_cache().dir().display());
    }
    for meta in metas {
        match (meta.version, meta.error) {
            (_, Some(error)) => println!("{}\terror: {}", meta.kind, error),
            (Some(version), None) => println!("{}\tv{}", meta.kind, version),
            (None, None) => println!("{}", meta.kind),
        }
    }
    Ok(())
}

async fn run_query(
    resolver: &DeviceResolver,
    kind: &str,
    query: &str,
    state: Vec<(String, serde_json::Value)>,
    params: Vec<(String, serde_json::Value)>,
    watch: bool,
) -> Result<()> {
    let class = resolver.get_device_class(kind).await?;
    let mut device_state: DeviceState = state.into_iter().collect();
    device_state
        .entry("kind")
        .or_insert_with(|| serde_json::Value::String(kind.to_string()));
    let params: Params = params
        .into_iter()
        .map(|(key, value)| (key, Value::from(value)))
        .collect();
    let device = class.instantiate(device_state);

    if !watch {
        let records = device.get(query, &params).await?;
        for record in records {
            println!("{}", serde_json::to_string(&record)?);
        }
        return Ok(());
    }

    let mut subscription = device.subscribe(query, params)?;
    loop {
        tokio::select! {
            item = subscription.next() => match item {
                Some(Ok(observation)) => println!(
                    "{} {}",
                    observation.timestamp.to_rfc3339(),
                    serde_json::to_string(&observation.record)?
                ),
                Some(Err(e)) => tracing::warn!(query = %query, "Poll failed: {}", e),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                subscription.cancel();
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("port=8080").unwrap(),
            ("port".to_string(), serde_json::json!(8080))
        );
        assert_eq!(
            parse_key_value("city=San Francisco").unwrap(),
            ("city".to_string(), serde_json::json!("San Francisco"))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "devkind",
            "--cache-dir",
            "/tmp/devkind",
            "query",
            "com.example.weather",
            "current",
            "--param",
            "city=Oslo",
            "--state",
            "username=u",
        ])
        .unwrap();
        match args.command {
            Command::Query { kind, params, state, watch, .. } => {
                assert_eq!(kind, "com.example.weather");
                assert_eq!(params.len(), 1);
                assert_eq!(state.len(), 1);
                assert!(!watch);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cached_on_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args::try_parse_from([
            "devkind",
            "--cache-dir",
            dir.path().to_str().unwrap(),
            "cached",
        ])
        .unwrap();
        let resolver = build_resolver(&args).unwrap();
        assert!(resolver.manifest_cache().cached_metas().await.unwrap().is_empty());
    }
}
