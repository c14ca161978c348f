mod api;
mod cli;
mod config;
mod consent;
mod error;
mod gateway;
mod invite;
mod payment;
mod session;
mod storage;
mod tools;

use anyhow::Result;
use clap::Parser;
use std::cell::RefCell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sellerkit", about = "A command-line client for the seller toolbox")]
pub struct Args {
    #[arg(short = 'p', long, help = "Run one command and exit (e.g. '/plans')")]
    pub command: Option<String>,

    #[arg(
        long,
        env = "SELLERKIT_BASE_URL",
        help = "API base URL (overrides config)"
    )]
    pub base_url: Option<String>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Directory for cached credentials (overrides config)")]
    pub data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load()?
    };

    if let Some(base_url) = &args.base_url {
        cfg.base_url = base_url.clone();
    }
    if let Some(data_dir) = &args.data_dir {
        cfg.data_dir = Some(data_dir.clone());
    }

    if let Err(errors) = cfg.validate() {
        for error in &errors {
            eprintln!("Config error {}", error);
        }
        anyhow::bail!("invalid configuration");
    }

    let store = storage::CredentialStore::new(&cfg.data_dir());
    let transport = api::HttpTransport::new(&cfg.base_url);
    let session = session::SessionManager::hydrate(&store);
    let monitor = payment::OrderMonitor::with_max_attempts(cfg.poll_max_attempts);

    let ctx = cli::Context {
        config: cfg,
        transport,
        store,
        session: RefCell::new(session),
        gateway: gateway::ToolGateway::new(),
        monitor: RefCell::new(monitor),
    };

    match &args.command {
        Some(command) => cli::run_once(&ctx, command),
        None => cli::run_repl(ctx),
    }
}
