//! Fragment gateway — entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::{Map, Value};

use fragment_compose::{ComposeConfig, RequestContext, Resolver};
use fragment_compose_gateway::{DirectoryViews, GatewayState};

#[derive(Parser)]
#[command(
    name = "fragment-gateway",
    about = "Render views and compose their fragments from remote origins",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ComposeArgs {
    /// Directory holding `<name>.html` views.
    #[arg(long, default_value = "views")]
    views: PathBuf,

    /// Layout view wrapped around every page (`{{embed}}` marks the slot).
    #[arg(long)]
    layout: Option<String>,

    /// JSON settings file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host substituted into fragment URLs that have none.
    /// Also reads FRAGMENTS_DEFAULT_HOST.
    #[arg(long)]
    default_host: Option<String>,

    /// Maximum number of concurrent fragment fetches.
    #[arg(long)]
    max_concurrency: Option<usize>,
}

impl ComposeArgs {
    /// File settings, then environment, then flags.
    fn load_config(&self) -> anyhow::Result<ComposeConfig> {
        let mut config = match &self.config {
            Some(path) => ComposeConfig::from_json_file(path)?,
            None => ComposeConfig::default(),
        }
        .apply_env()?;

        if let Some(host) = &self.default_host {
            config.default_host = host.clone();
        }
        if let Some(limit) = self.max_concurrency {
            config.max_concurrency = Some(limit);
        }
        config.validate()?;
        Ok(config)
    }

    fn views(&self) -> DirectoryViews {
        let views = DirectoryViews::new(&self.views);
        match &self.layout {
            Some(layout) => views.with_layout(layout),
            None => views,
        }
    }

    fn state(&self) -> anyhow::Result<GatewayState> {
        let resolver = Resolver::new(self.load_config()?)?;
        Ok(GatewayState::new(resolver, Arc::new(self.views())))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve composed pages over HTTP.
    Serve {
        /// Listen address (host:port).
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: String,

        /// Path prefix served as 404 without composition. Repeatable.
        #[arg(long = "skip")]
        skip_prefixes: Vec<String>,

        /// Query parameter passed to views as a binding. Repeatable;
        /// unlisted parameters are ignored.
        #[arg(long = "bind-query")]
        query_bindings: Vec<String>,

        #[command(flatten)]
        compose: ComposeArgs,
    },

    /// Compose one view and print the page to stdout.
    Render {
        /// View name, e.g. `index` or `shop/cart`.
        view: String,

        /// Bindings as a JSON object.
        #[arg(long)]
        bindings: Option<String>,

        #[command(flatten)]
        compose: ComposeArgs,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   fragment-gateway completions bash > ~/.local/share/bash-completion/completions/fragment-gateway
    ///   fragment-gateway completions zsh > ~/.zfunc/_fragment-gateway
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve {
            addr,
            skip_prefixes,
            query_bindings,
            compose,
        } => {
            let state = compose
                .state()?
                .with_skip_prefixes(skip_prefixes)
                .with_query_bindings(query_bindings);
            tracing::info!("Views: {}", compose.views.display());
            fragment_compose_gateway::serve(&addr, Arc::new(state)).await?;
        }

        Commands::Render {
            view,
            bindings,
            compose,
        } => {
            let bindings: Map<String, Value> = match bindings {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Map::new(),
            };
            let state = compose.state()?;
            match state
                .compose_view(&view, &bindings, &RequestContext::default())
                .await?
            {
                Some(composed) => {
                    for outcome in composed.outcomes.iter().filter(|o| !o.succeeded()) {
                        tracing::warn!(fragment = %outcome.id, src = %outcome.src, "fragment not resolved");
                    }
                    tracing::info!("Status: {}", composed.status_code);
                    println!("{}", composed.html);
                }
                None => {
                    eprintln!("No such view: {view}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "fragment-gateway", &mut std::io::stdout());
        }
    }

    Ok(())
}
