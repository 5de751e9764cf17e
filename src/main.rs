use std::io;
use std::path::PathBuf;

use clap::Parser;
use solidb_viewserver::{QueryServer, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "solidb-viewserver")]
#[command(about = "SolidDB view server - evaluates map/reduce and design document functions over stdin/stdout", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Default function language (python or lua)
    #[arg(short, long)]
    language: Option<String>,

    /// Reject reduce output that does not shrink
    #[arg(long)]
    reduce_limit: bool,

    /// Make `reset` also drop registered design documents
    #[arg(long)]
    reset_clears_ddocs: bool,

    /// Maximum nested calls in Python functions
    #[arg(long)]
    recursion_limit: Option<usize>,

    /// Lua heap limit in bytes
    #[arg(long)]
    lua_memory_limit: Option<usize>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long)]
    log_filter: Option<String>,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(language) = self.language {
            config.language = language;
        }
        if self.reduce_limit {
            config.reduce_limit = true;
        }
        if self.reset_clears_ddocs {
            config.reset_clears_ddocs = true;
        }
        if let Some(limit) = self.recursion_limit {
            config.recursion_limit = limit;
        }
        if let Some(limit) = self.lua_memory_limit {
            config.lua_memory_limit = Some(limit);
        }
        if let Some(filter) = self.log_filter {
            config.log_filter = filter;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    // Initialize logging; stdout carries protocol frames only
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    tracing::info!(
        language = %config.language,
        reduce_limit = config.reduce_limit,
        "Query server starting"
    );

    let mut server = QueryServer::new(config)?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    server.run(stdin.lock(), stdout.lock())?;

    Ok(())
}
