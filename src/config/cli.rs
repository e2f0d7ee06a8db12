use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Vynox cache operator tool.
#[derive(Debug, Parser)]
#[command(
    name = "vynox",
    version,
    about = "Inspect and maintain the Vynox admin cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VYNOX_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Ping the cache store and print each namespace's current generation.
    Status,
    /// Advance a namespace's generation, retiring every cached list in it.
    Bump(BumpArgs),
    /// Delete one cached point entry.
    Evict(EvictArgs),
    /// Flush the whole cache database.
    Reset(ResetArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL", global = true)]
    pub redis_url: Option<String>,

    /// Override the cache backend (redis|memory|disabled).
    #[arg(long = "cache-backend", value_name = "BACKEND", global = true)]
    pub cache_backend: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct BumpArgs {
    /// Namespace to bump, e.g. `v1:servers`.
    #[arg(value_name = "NAMESPACE")]
    pub namespace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    Id,
    Name,
    Type,
}

#[derive(Debug, Args, Clone)]
#[command(group(
    ArgGroup::new("point")
        .required(true)
        .args(["id", "name", "page_type"])
))]
pub struct EvictArgs {
    /// Namespace holding the entry, e.g. `v1:dropdowns`.
    #[arg(value_name = "NAMESPACE")]
    pub namespace: String,

    #[arg(long, value_name = "ID")]
    pub id: Option<String>,

    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    #[arg(long = "type", value_name = "TYPE")]
    pub page_type: Option<String>,
}

impl EvictArgs {
    /// The single point selector clap guarantees is present.
    pub fn point(&self) -> Option<(PointKind, &str)> {
        [
            (PointKind::Id, self.id.as_deref()),
            (PointKind::Name, self.name.as_deref()),
            (PointKind::Type, self.page_type.as_deref()),
        ]
        .into_iter()
        .find_map(|(kind, value)| value.map(|value| (kind, value)))
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct ResetArgs {
    /// Confirm flushing every key in the cache database.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub yes: bool,
}
