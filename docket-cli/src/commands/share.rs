//! `docket share add|remove <id> <user>`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use docket_core::{DocumentId, UserId};

use super::Session;

/// Manage who may edit a document.
#[derive(Subcommand, Debug)]
pub enum ShareCommand {
    /// Let another user fetch and upload the document.
    Add(ShareArgs),

    /// Take a collaborator off the document. Fails while they hold the lock.
    Remove(ShareArgs),
}

#[derive(Args, Debug)]
pub struct ShareArgs {
    pub document: DocumentId,

    /// User to add or remove.
    #[arg(value_name = "USER")]
    pub collaborator: String,
}

pub fn run(session: &Session, command: ShareCommand) -> Result<()> {
    match command {
        ShareCommand::Add(args) => {
            let document = session
                .add_collaborator(args.document, UserId::from(args.collaborator.as_str()))
                .with_context(|| format!("failed to share document {}", args.document))?;
            println!(
                "shared document {} with {} ({} collaborators)",
                document.id(),
                args.collaborator,
                document.collaborators().len()
            );
        }
        ShareCommand::Remove(args) => {
            let document = session
                .remove_collaborator(args.document, UserId::from(args.collaborator.as_str()))
                .with_context(|| {
                    format!("failed to remove {} from document {}", args.collaborator, args.document)
                })?;
            println!("removed {} from document {}", args.collaborator, document.id());
        }
    }
    Ok(())
}
