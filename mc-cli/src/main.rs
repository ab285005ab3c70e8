//! `mcctl`: operator tool for memcached clusters speaking the binary protocol.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::{Args, Parser, Subcommand};
use mc_client::{Client, ClientConfig, ClientError, Context, Item, WriteOptions};
use tracing::debug;

/// Memcached binary-protocol client
#[derive(Parser, Debug)]
#[command(name = "mcctl", author, version, about, long_about = None)]
struct Cli {
    /// Server addresses, comma separated
    #[arg(short, long, env = "MCCTL_SERVERS", value_delimiter = ',')]
    servers: Vec<String>,

    /// JSON client config; --servers overrides its address list
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Per-command deadline in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored under KEY
    Get { key: String },
    /// Store VALUE under KEY
    Set {
        key: String,
        value: String,
        #[command(flatten)]
        write: WriteArgs,
    },
    /// Store VALUE under KEY only if KEY is absent
    Add {
        key: String,
        value: String,
        #[command(flatten)]
        write: WriteArgs,
    },
    /// Remove KEY
    Delete { key: String },
    /// Increment the counter at KEY
    Incr {
        key: String,
        #[arg(default_value_t = 1)]
        delta: u64,
        /// Create a missing counter with this value
        #[arg(long)]
        initial: Option<u64>,
    },
    /// Decrement the counter at KEY
    Decr {
        key: String,
        #[arg(default_value_t = 1)]
        delta: u64,
        /// Create a missing counter with this value
        #[arg(long)]
        initial: Option<u64>,
    },
    /// Print every present KEY
    Mget {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Invalidate every item written under NAMESPACE
    Purge { namespace: String },
}

#[derive(Args, Debug)]
struct WriteArgs {
    /// Expiration in seconds
    #[arg(long, default_value_t = 0)]
    ttl: u32,
    /// Scaling window in seconds after the expiration
    #[arg(long, default_value_t = 0)]
    scale: u32,
    #[arg(long)]
    namespace: Option<String>,
    /// Only store on the N-th write of this key
    #[arg(long, default_value_t = 0)]
    min_uses: u32,
    #[arg(long, default_value_t = 0)]
    flags: u16,
}

impl WriteArgs {
    fn options(&self) -> WriteOptions {
        let mut opts = WriteOptions::new()
            .expiration(self.ttl, self.scale)
            .min_uses(self.min_uses);
        if let Some(ns) = &self.namespace {
            opts = opts.namespace(ns.as_str());
        }
        opts
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let client = Client::new(load_config(&cli)?).context("build client")?;
    let ctx = Context::with_timeout(Duration::from_millis(cli.timeout_ms));
    debug!(command = ?cli.command, "running");

    let mut out = io::stdout().lock();
    match cli.command {
        Command::Get { key } => match client.get(&ctx, &key) {
            Ok(item) => print_item(&mut out, &item)?,
            Err(ClientError::CacheMiss) => bail!("{key}: not found"),
            Err(err) => return Err(err).context("get"),
        },
        Command::Set { key, value, write } => {
            let mut item = Item::new(key, value).with_flags(write.flags);
            client.set(&ctx, &mut item, &write.options()).context("set")?;
            writeln!(out, "stored cas={}", item.cas())?;
        }
        Command::Add { key, value, write } => {
            let mut item = Item::new(key, value).with_flags(write.flags);
            client.add(&ctx, &mut item, &write.options()).context("add")?;
            writeln!(out, "stored cas={}", item.cas())?;
        }
        Command::Delete { key } => {
            client.delete(&ctx, &key).context("delete")?;
            writeln!(out, "deleted")?;
        }
        Command::Incr {
            key,
            delta,
            initial,
        } => {
            let value = client
                .increment(&ctx, &key, delta, &counter_options(initial))
                .context("incr")?;
            writeln!(out, "{value}")?;
        }
        Command::Decr {
            key,
            delta,
            initial,
        } => {
            let value = client
                .decrement(&ctx, &key, delta, &counter_options(initial))
                .context("decr")?;
            writeln!(out, "{value}")?;
        }
        Command::Mget { keys } => {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            let result = client.get_multi_detailed(&ctx, &refs).context("mget")?;
            for key in &keys {
                if let Some(item) = result.items.get(key) {
                    print_item(&mut out, item)?;
                }
            }
            for failure in &result.failures {
                eprintln!("{}: {}", failure.addr, failure.error);
            }
        }
        Command::Purge { namespace } => {
            client.purge_namespace(&ctx, &namespace).context("purge")?;
            writeln!(out, "purged {namespace}")?;
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            ClientConfig::from_json(&text).with_context(|| format!("parse config {}", path.display()))?
        }
        None => ClientConfig::default(),
    };
    if !cli.servers.is_empty() {
        config.addrs = cli.servers.clone();
    }
    if config.addrs.is_empty() {
        bail!("no servers given; pass --servers or a config file");
    }
    Ok(config)
}

fn counter_options(initial: Option<u64>) -> WriteOptions {
    match initial {
        Some(value) => WriteOptions::new().initial(value),
        None => WriteOptions::new(),
    }
}

fn print_item(out: &mut impl Write, item: &Item) -> io::Result<()> {
    writeln!(
        out,
        "{} flags={} cas={} {}",
        item.key,
        item.flags,
        item.cas(),
        String::from_utf8_lossy(&item.value)
    )
}
