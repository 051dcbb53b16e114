use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fleetcache")]
#[command(about = "fleetcache CLI: drive the command buses and inspect cache connections")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the TOML config (defaults to ./fleetcache.toml when present)
    #[arg(short, long, global = true, env = "FLEETCACHE_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Listen on both buses and log every dispatched message until Ctrl-C
    Listen(ListenArgs),
    /// Broadcast a command on the command bus
    Send(SendArgs),
    /// Announce an entity update on the entity bus
    Notify(NotifyArgs),
    /// Read a key
    Get(GetArgs),
    /// List keys matching a pattern
    Scan(ScanArgs),
    /// Ping every configured connection
    Status,
}

#[derive(clap::Args)]
pub struct ListenArgs {
    /// Command names to handle (every well-known command if omitted)
    #[arg(long = "command", value_name = "NAME")]
    pub commands: Vec<String>,
    /// Entity types to handle (every entity id if omitted)
    #[arg(long = "entity-type", value_name = "TYPE")]
    pub entity_types: Vec<String>,
}

#[derive(clap::Args)]
pub struct SendArgs {
    /// Command name (e.g. rebuildCache)
    pub command: String,
}

#[derive(clap::Args)]
pub struct NotifyArgs {
    /// Entity id (e.g. mrs-serie-123)
    pub entity_id: String,
}

#[derive(clap::Args)]
pub struct GetArgs {
    /// Connection id
    #[arg(long, default_value_t = 1)]
    pub conn: u32,
    /// Gunzip the stored value
    #[arg(short = 'z', long)]
    pub compressed: bool,
    pub key: String,
}

#[derive(clap::Args)]
pub struct ScanArgs {
    /// Connection id
    #[arg(long, default_value_t = 1)]
    pub conn: u32,
    /// Glob-style pattern (e.g. serie:*)
    pub pattern: String,
}
