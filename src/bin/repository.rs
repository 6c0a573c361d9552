//! Model Repository CLI
//!
//! Publishes and manages libraries in a local repository.
//!
//! Usage:
//!   repository --root ./repo publish Travel.otm --namespace http://example.org/ns/Travel/v01 --library Travel
//!   repository --root ./repo lock --namespace http://example.org/ns/Travel/v01 --library Travel
//!   repository --help

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use model_repository::{
    ItemKey, LibraryStatus, PublishRequest, RepositoryConfig, RepositoryHealth, RepositoryItem,
    RepositoryManager,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "repository")]
#[command(about = "Manage versioned model libraries")]
struct Cli {
    /// Configuration file (defaults to repository.toml lookup)
    #[arg(short, long)]
    config: Option<String>,

    /// Repository root, overriding the configuration
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Acting user (defaults to $USER)
    #[arg(short, long)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Identifies one item by namespace and library name
#[derive(Args)]
struct ItemArgs {
    /// Versioned namespace of the library
    #[arg(short, long)]
    namespace: String,

    /// Library name
    #[arg(short, long)]
    library: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the repository, folding in out-of-band changes
    Init {
        /// Write the effective configuration to this file
        #[arg(long)]
        write_config: Option<String>,
    },

    /// Publish a new library as a draft
    Publish {
        /// Library content
        file: PathBuf,
        #[command(flatten)]
        item: ItemArgs,
        /// Stored filename (defaults to the versioned file name)
        #[arg(long)]
        filename: Option<String>,
        /// Version scheme id
        #[arg(long)]
        scheme: Option<String>,
    },

    /// Lock a library for editing
    Lock {
        #[command(flatten)]
        item: ItemArgs,
    },

    /// Release a lock, committing pending edits unless --discard is given
    Unlock {
        #[command(flatten)]
        item: ItemArgs,
        #[arg(long)]
        discard: bool,
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Commit pending edits of a locked library
    Commit {
        #[command(flatten)]
        item: ItemArgs,
        /// Replace the working content with this file first
        #[arg(long)]
        content: Option<PathBuf>,
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Discard uncommitted edits of a locked library
    Revert {
        #[command(flatten)]
        item: ItemArgs,
    },

    /// Advance a library to its next status
    Promote {
        #[command(flatten)]
        item: ItemArgs,
    },

    /// Return a library to an earlier status
    Demote {
        #[command(flatten)]
        item: ItemArgs,
        /// Target status (defaults to the previous one)
        #[arg(long)]
        to: Option<LibraryStatus>,
    },

    /// Remove a library from the repository
    Delete {
        #[command(flatten)]
        item: ItemArgs,
    },

    /// List every library
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show one library's record
    Show {
        #[command(flatten)]
        item: ItemArgs,
    },

    /// Re-verify a library's frozen checksum
    Verify {
        #[command(flatten)]
        item: ItemArgs,
    },

    /// Print the major-version chain of a namespace
    Chain {
        namespace: String,
        #[arg(long)]
        scheme: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn current_user(cli_user: Option<String>) -> String {
    cli_user
        .or_else(|| std::env::var("USER").ok())
        .or_else(|| std::env::var("USERNAME").ok())
        .unwrap_or_else(|| "anonymous".to_string())
}

fn resolve(manager: &RepositoryManager, item: &ItemArgs) -> Result<ItemKey> {
    manager
        .find(&item.namespace, &item.library)?
        .map(|found| found.key())
        .ok_or_else(|| anyhow!("no library {} in {}", item.library, item.namespace))
}

fn print_item(item: &RepositoryItem) {
    let lock = item.locked_by.as_deref().unwrap_or("-");
    println!(
        "{:<14} {:<10} {:<12} {:<40} {}",
        item.status.to_string(),
        item.version.to_string(),
        lock,
        item.filename,
        item.namespace
    );
}

fn run(cli: Cli) -> Result<()> {
    let mut config = RepositoryConfig::load_from(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(root) = cli.root {
        config.repository.root = root;
    }
    let user = current_user(cli.user);

    let manager = RepositoryManager::open(config)
        .context("failed to open repository")?;
    if let RepositoryHealth::Degraded { reason } = manager.health() {
        eprintln!("Warning: repository is read-only ({})", reason);
    }

    match cli.command {
        Commands::Init { write_config } => {
            println!(
                "Repository {} is {}",
                manager.synchronizer().root().display(),
                manager.health()
            );
            if let Some(path) = write_config {
                manager.config().save(&path)?;
                println!("Configuration written to {}", path);
            }
        }

        Commands::Publish { file, item, filename, scheme } => {
            let content =
                fs::read(&file).with_context(|| format!("cannot read {}", file.display()))?;
            let mut request = PublishRequest::new(item.namespace, item.library, content);
            if let Some(filename) = filename {
                request = request.with_filename(filename);
            }
            if let Some(scheme) = scheme {
                request = request.with_scheme(scheme);
            }
            let published = manager.publish(request, &user)?;
            println!("Published {} as version {}", published.filename, published.version);
        }

        Commands::Lock { item } => {
            let key = resolve(&manager, &item)?;
            manager.lock(&key, &user)?;
            println!("Locked {} for {}", key.filename, user);
        }

        Commands::Unlock { item, discard, message } => {
            let key = resolve(&manager, &item)?;
            manager.unlock(&key, &user, !discard, message.as_deref())?;
            let suffix = if discard { " (changes discarded)" } else { "" };
            println!("Unlocked {}{}", key.filename, suffix);
        }

        Commands::Commit { item, content, message } => {
            let key = resolve(&manager, &item)?;
            if let Some(path) = content {
                let bytes =
                    fs::read(&path).with_context(|| format!("cannot read {}", path.display()))?;
                manager.stage_content(&key, &user, &bytes)?;
            }
            manager.commit(&key, &user, message.as_deref())?;
            println!("Committed {}", key.filename);
        }

        Commands::Revert { item } => {
            let key = resolve(&manager, &item)?;
            manager.revert(&key, &user)?;
            println!("Reverted {}", key.filename);
        }

        Commands::Promote { item } => {
            let key = resolve(&manager, &item)?;
            let promoted = manager.promote(&key, &user)?;
            println!("{} is now {}", key.filename, promoted.status);
        }

        Commands::Demote { item, to } => {
            let key = resolve(&manager, &item)?;
            let demoted = manager.demote_to(&key, &user, to)?;
            println!("{} is now {}", key.filename, demoted.status);
        }

        Commands::Delete { item } => {
            let key = resolve(&manager, &item)?;
            manager.delete(&key, &user)?;
            println!("Deleted {}", key.filename);
        }

        Commands::List { format } => {
            let items = manager.list_items()?;
            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&items)?),
                _ => {
                    for item in &items {
                        print_item(item);
                    }
                    println!("{} libraries", items.len());
                }
            }
        }

        Commands::Show { item } => {
            let key = resolve(&manager, &item)?;
            let found = manager.item(&key)?;
            println!("{}", serde_json::to_string_pretty(&found)?);
            println!("state: {}", found.state_for(&user));
            let missing = manager.missing_predecessors(&key)?;
            if !missing.is_empty() {
                println!("missing earlier versions:");
                for namespace in missing {
                    println!("  {}", namespace);
                }
            }
        }

        Commands::Verify { item } => {
            let key = resolve(&manager, &item)?;
            let report = manager.verify_integrity(&key)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.is_suspect() {
                bail!("integrity check failed for {}", key.filename);
            }
        }

        Commands::Chain { namespace, scheme } => {
            let scheme = match scheme {
                Some(id) => manager.schemes().get(&id)?,
                None => manager.schemes().default_scheme()?,
            };
            if !scheme.is_valid_namespace(&namespace) {
                eprintln!("Warning: {} is not in canonical {} form", namespace, scheme.id());
            }
            for entry in scheme.major_version_chain(&namespace) {
                println!("{}", entry);
            }
        }
    }

    Ok(())
}
