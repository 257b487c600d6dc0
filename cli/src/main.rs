//! `meshctl`: an operator tool for inspecting and driving a local
//! `aidmesh` node (§4.9 Bridge API). Talks to the core the same way any
//! domain module would — through [`aidmesh::Node`], never reaching
//! into a component crate directly.

use std::collections::BTreeMap;
use std::path::PathBuf;

use aidmesh::{Config, FieldPatch, Node, Priority, RecordKind, Scalar};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "Operator tool for an aidmesh node", long_about = None)]
struct Cli {
    /// Node data directory (holds identity.sealed, document.log/.snapshot, bundles.db).
    #[arg(long, global = true, default_value = "./aidmesh-data")]
    dir: PathBuf,

    /// Passphrase protecting identity.sealed. Reading it from an
    /// argument is a convenience for this operator tool only; nothing
    /// in the core ever accepts or stores a plaintext identity.
    #[arg(long, global = true, env = "AIDMESH_PASSPHRASE")]
    passphrase: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generates a new identity and writes identity.sealed + config.toml.
    Init {
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Prints the local peer id, enabled transports, and peer table.
    Status,
    /// Records a mutual-aid need.
    AddNeed {
        description: String,
    },
    /// Lists open needs.
    ListNeeds,
    /// Submits a DTN bundle carrying an arbitrary text payload.
    SubmitBundle {
        /// Destination peer id, or omit for epidemic delivery.
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value = "normal")]
        priority: String,
        payload: String,
    },
    /// Lists bundles currently held in the local store.
    ListBundles,
    /// Flushes the document's in-memory state to disk.
    Checkpoint,
}

fn parse_priority(value: &str) -> Result<Priority> {
    match value {
        "critical" => Ok(Priority::Critical),
        "high" => Ok(Priority::High),
        "normal" => Ok(Priority::Normal),
        "low" => Ok(Priority::Low),
        other => anyhow::bail!("unrecognized priority: {other} (expected critical|high|normal|low)"),
    }
}

fn passphrase(cli: &Cli) -> Result<&str> {
    cli.passphrase
        .as_deref()
        .context("a passphrase is required (--passphrase or AIDMESH_PASSPHRASE)")
}

fn config(dir: &PathBuf) -> Result<Config> {
    let path = dir.join("config.toml");
    if path.exists() {
        Ok(Config::load(&path)?)
    } else {
        Ok(Config::default())
    }
}

fn open(cli: &Cli) -> Result<Node> {
    let identity = Node::load_identity(&cli.dir, passphrase(cli)?).context("loading identity.sealed")?;
    let node = Node::open(&cli.dir, identity, config(&cli.dir)?)?;
    Ok(node)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Init { display_name } => {
            std::fs::create_dir_all(&cli.dir)?;
            let identity = Node::create_identity(display_name.clone());
            let id = identity.id();
            Node::save_identity(&cli.dir, &identity, passphrase(&cli)?, Config::default().key_derivation_work_factor)?;
            let config_path = cli.dir.join("config.toml");
            if !config_path.exists() {
                std::fs::write(&config_path, toml::to_string_pretty(&Config::default())?)?;
            }
            println!("initialized node {id} at {}", cli.dir.display());
        }
        Command::Status => {
            let node = open(&cli)?;
            println!("peer id: {}", node.local_peer_id());
            for peer in node.peer_table() {
                println!(
                    "  peer {} trusted={} last_seen_ms={}",
                    peer.id, peer.trusted, peer.last_seen_millis
                );
            }
        }
        Command::AddNeed { description } => {
            let node = open(&cli)?;
            let mut fields = BTreeMap::new();
            fields.insert(
                "description".to_string(),
                FieldPatch::Scalar(Scalar::Text(description.clone())),
            );
            let id = node.add_record(RecordKind::Need, fields)?;
            node.close()?;
            println!("added need {id}");
        }
        Command::ListNeeds => {
            let node = open(&cli)?;
            for record in node.list_records(RecordKind::Need, None) {
                println!("{} created_at_ms={}", record.id, record.created_at_millis);
            }
        }
        Command::SubmitBundle { to, priority, payload } => {
            let node = open(&cli)?;
            let destination = to.as_deref().map(|s| s.parse()).transpose().context("parsing --to as a peer id")?;
            let priority = parse_priority(priority)?;
            let id = node.submit_bundle(destination, priority, payload.clone().into_bytes())?;
            println!("submitted bundle {id}");
        }
        Command::ListBundles => {
            let node = open(&cli)?;
            for bundle in node.held_bundles() {
                println!(
                    "{} priority={:?} destination={:?} remaining_ttl_ms={}",
                    bundle.id,
                    bundle.priority,
                    bundle.destination,
                    bundle.remaining_ttl_millis(current_time_millis())
                );
            }
        }
        Command::Checkpoint => {
            let node = open(&cli)?;
            node.close()?;
            println!("checkpointed");
        }
    }
    Ok(())
}

fn current_time_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
