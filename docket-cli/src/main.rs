//! Docket: turn-based collaborative documents.
//!
//! # Usage
//!
//! ```text
//! docket [--user U] [--daemon] create <path> [--name N]
//! docket share add|remove <id> <user>
//! docket fetch <id> [--out DIR]
//! docket upload <id> <path>
//! docket release <id>
//! docket rename <id> <name>
//! docket versions <id> [--json]
//! docket diff <id> <version>
//! docket list [--json]
//! docket daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand,
    document::{CreateArgs, RenameArgs},
    edit::{FetchArgs, ReleaseArgs, UploadArgs},
    history::{DiffArgs, ListArgs, VersionsArgs},
    share::ShareCommand,
    Session,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "docket",
    version,
    about = "Share documents and edit them one collaborator at a time",
    long_about = None,
)]
struct Cli {
    /// Identity to act as.
    #[arg(long, global = true, env = "DOCKET_USER")]
    user: Option<String>,

    /// Route requests through the running daemon instead of the local store.
    #[arg(long, global = true)]
    daemon: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a document from a file; you become its owner.
    Create(CreateArgs),

    /// Add or remove collaborators (owner only).
    Share {
        #[command(subcommand)]
        command: ShareCommand,
    },

    /// Download a document and take its edit lock.
    Fetch(FetchArgs),

    /// Upload edited content as a new version.
    Upload(UploadArgs),

    /// Give up the edit lock without uploading.
    Release(ReleaseArgs),

    /// Rename a document (owner only).
    Rename(RenameArgs),

    /// Show the version chain of a document.
    Versions(VersionsArgs),

    /// Show the diff a version recorded.
    Diff(DiffArgs),

    /// List all documents.
    List(ListArgs),

    /// Run or query the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let session = || Session::open(cli.user.clone(), cli.daemon);
    match cli.command {
        Commands::Create(args) => args.run(&session()?),
        Commands::Share { command } => commands::share::run(&session()?, command),
        Commands::Fetch(args) => args.run(&session()?),
        Commands::Upload(args) => args.run(&session()?),
        Commands::Release(args) => args.run(&session()?),
        Commands::Rename(args) => args.run(&session()?),
        Commands::Versions(args) => args.run(&session()?),
        Commands::Diff(args) => args.run(&session()?),
        Commands::List(args) => args.run(&session()?),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
