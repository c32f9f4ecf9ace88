//! merkle CLI - Command line interface for merkle_db
//!
//! Every invocation opens one tree, runs a single command and closes it again,
//! so mutating commands flush before exiting.

use clap::{Parser, Subcommand};
use merkle_db::{MerkleTree, Registry, TreeConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "merkle")]
#[command(about = "A persistent, incrementally updated Merkle tree")]
#[command(version)]
struct Cli {
    /// Directory holding the tree stores (overrides the config file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Path to a JSON config file (defaults to the per-user config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name of the tree to operate on
    #[arg(short, long, default_value = "default")]
    tree: String,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    /// Treat keys and data as hex strings instead of UTF-8 text
    #[arg(long)]
    hex: bool,

    /// Log at debug level (RUST_LOG takes precedence when set)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert or update a key and flush
    Put {
        /// The key
        key: String,
        /// The data to store under the key
        data: String,
    },

    /// Get the data stored under a key
    Get {
        /// The key
        key: String,
    },

    /// Check whether a key is present
    Contains {
        /// The key
        key: String,
    },

    /// Show root hash, leaf count and depth
    Status,

    /// Remove every key from the tree
    Clear,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let tree = open_tree(&cli)?;

    match &cli.command {
        Commands::Put { key, data } => {
            let key = decode_arg(key, cli.hex)?;
            let data = decode_arg(data, cli.hex)?;
            let changed = tree.put(&key, &data)?;
            tree.flush()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "changed": changed,
                    "root_hash": tree.root_hash()?.map(|h| h.to_hex()),
                    "leaves": tree.leaf_count()?
                }),
            );
        }

        Commands::Get { key } => {
            let raw_key = decode_arg(key, cli.hex)?;
            match tree.get_data(&raw_key)? {
                Some(data) => {
                    output(
                        &cli.format,
                        &serde_json::json!({
                            "key": key,
                            "data": encode_value(&data, cli.hex)
                        }),
                    );
                }
                None => {
                    output(
                        &cli.format,
                        &serde_json::json!({
                            "status": "error",
                            "message": format!("Key not found: {}", key)
                        }),
                    );
                    drop(tree);
                    std::process::exit(1);
                }
            }
        }

        Commands::Contains { key } => {
            let raw_key = decode_arg(key, cli.hex)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "key": key,
                    "present": tree.contains_key(&raw_key)?
                }),
            );
        }

        Commands::Status => {
            let meta = tree.metadata()?;
            let hanging: Vec<_> = meta
                .hanging
                .iter()
                .map(|(level, hash)| serde_json::json!({ "level": level, "hash": hash.to_hex() }))
                .collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "tree": tree.name(),
                    "path": tree.path().map(|p| p.display().to_string()),
                    "root_hash": meta.root_hash.map(|h| h.to_hex()),
                    "leaves": meta.num_leaves,
                    "depth": meta.depth,
                    "hanging": hanging
                }),
            );
        }

        Commands::Clear => {
            tree.clear()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Cleared tree {}", tree.name())
                }),
            );
        }
    }

    tree.close();
    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("merkle_db=debug")
        } else {
            EnvFilter::new("merkle_db=warn")
        }
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();
}

fn open_tree(cli: &Cli) -> anyhow::Result<MerkleTree> {
    let mut config = match &cli.config {
        Some(path) => TreeConfig::load(path)?,
        None => TreeConfig::from_user_config()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }

    let tree = MerkleTree::open_with_config(&cli.tree, &config, Registry::global())?;
    Ok(tree)
}

fn decode_arg(value: &str, hex: bool) -> anyhow::Result<Vec<u8>> {
    if hex {
        let bytes = hex::decode(value.trim_start_matches("0x"))
            .map_err(|e| anyhow::anyhow!("Invalid hex '{}': {}", value, e))?;
        Ok(bytes)
    } else {
        Ok(value.as_bytes().to_vec())
    }
}

fn encode_value(data: &[u8], hex: bool) -> String {
    if hex {
        hex::encode(data)
    } else {
        String::from_utf8_lossy(data).into_owned()
    }
}

fn output(format: &OutputFormat, value: &serde_json::Value) {
    match format {
        OutputFormat::Json => {
            println!("{}", value);
        }
        OutputFormat::Text => {
            let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            println!("{}", text);
        }
    }
}
