//! Chimera Manager
//!
//! Interactive manager for a Chimera relay: installation, relay and client
//! configuration, and port forwarding through nftables NAT.

mod menu;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};

use chimera_app::AppBuilder;
use chimera_system::Host;

use menu::{Console, Session};

/// Chimera relay manager
#[derive(Parser)]
#[command(name = "chimera-manager")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Skip the install check (set when running the installed copy)
    #[arg(long)]
    installed: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Manager settings file
    #[arg(long, value_name = "PATH")]
    settings: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = AppBuilder::new()
        .name("chimera-manager")
        .version(env!("CARGO_PKG_VERSION"))
        .verbose(cli.verbose);
    if let Some(path) = cli.settings {
        builder = builder.settings_path(path);
    }
    let app = builder.build()?;
    let settings = app.settings().as_ref().clone();
    debug!("Rule store at {:?}", settings.paths.rule_store);

    let host = Host::linux(&settings.nat.backend_service);
    let session = Session::new(settings, host);

    if !session.is_privileged() {
        eprintln!("chimera-manager must be run as root.");
        std::process::exit(1);
    }

    let stdin = io::stdin();
    let mut console = Console::new(stdin.lock(), io::stdout());

    if !cli.installed {
        if let Err(e) = session.offer_install(&mut console) {
            error!("Install check failed: {:#}", e);
        }
    }

    session.run(&mut console)?;
    Ok(())
}
