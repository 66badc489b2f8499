//! `docket create` and `docket rename`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use docket_core::DocumentId;

use super::{read_upload, Session};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// File holding the initial content.
    pub path: PathBuf,

    /// Document name. Defaults to the file stem.
    #[arg(long)]
    pub name: Option<String>,
}

impl CreateArgs {
    pub fn run(self, session: &Session) -> Result<()> {
        let upload = read_upload(&self.path)?;
        let name = match self.name {
            Some(name) => name,
            None => self
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .with_context(|| format!("cannot derive a name from {}", self.path.display()))?,
        };

        let (document, version) = session
            .create(&name, upload)
            .with_context(|| format!("failed to create document '{name}'"))?;
        println!(
            "{} document {} {:?} ({})",
            "created".green().bold(),
            document.id(),
            document.name,
            version.id,
        );
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct RenameArgs {
    pub document: DocumentId,
    pub name: String,
}

impl RenameArgs {
    pub fn run(self, session: &Session) -> Result<()> {
        let document = session
            .rename(self.document, &self.name)
            .with_context(|| format!("failed to rename document {}", self.document))?;
        println!("renamed document {} to {:?}", document.id(), document.name);
        Ok(())
    }
}
