//! `docket fetch`, `docket upload`, `docket release`: the edit cycle.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use docket_core::DocumentId;

use super::{read_upload, Session};

#[derive(Args, Debug)]
pub struct FetchArgs {
    pub document: DocumentId,

    /// Directory to write the file into. Defaults to the current directory.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

impl FetchArgs {
    pub fn run(self, session: &Session) -> Result<()> {
        let reply = session
            .fetch(self.document)
            .with_context(|| format!("failed to fetch document {}", self.document))?;

        let dir = self.out.unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let target = download_target(&dir, &reply.file_name)?;
        std::fs::write(&target, &reply.content)
            .with_context(|| format!("failed to write {}", target.display()))?;

        println!(
            "{} document {} ({}, {} bytes) -> {}",
            "locked".yellow().bold(),
            reply.document.id(),
            reply.media_type,
            reply.content.len(),
            target.display()
        );
        Ok(())
    }
}

/// Path inside `dir` for a served file name. Only the last component is kept.
fn download_target(dir: &Path, file_name: &str) -> Result<PathBuf> {
    match Path::new(file_name).file_name() {
        Some(name) => Ok(dir.join(name)),
        None => bail!("refusing to write document file name {file_name:?}"),
    }
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    pub document: DocumentId,

    /// Edited file. Its extension must match the document's.
    pub path: PathBuf,
}

impl UploadArgs {
    pub fn run(self, session: &Session) -> Result<()> {
        let upload = read_upload(&self.path)?;
        let (document, version) = session
            .upload(self.document, upload)
            .with_context(|| format!("failed to upload to document {}", self.document))?;

        match version.diff {
            Some(_) => println!(
                "{} {} of document {}; lock {}",
                "uploaded".green().bold(),
                version.id,
                document.id(),
                document.edit_lock()
            ),
            None => println!(
                "{} {} of document {} (content unchanged); lock {}",
                "recorded".green().bold(),
                version.id,
                document.id(),
                document.edit_lock()
            ),
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct ReleaseArgs {
    pub document: DocumentId,
}

impl ReleaseArgs {
    pub fn run(self, session: &Session) -> Result<()> {
        let released = session
            .release(self.document)
            .with_context(|| format!("failed to release document {}", self.document))?;
        match released {
            Some(holder) => println!("released lock on document {} held by {holder}", self.document),
            None => println!("document {} was not locked", self.document),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_target_stays_in_the_out_dir() {
        let dir = Path::new("/work/out");
        assert_eq!(
            download_target(dir, "spec.txt").unwrap(),
            dir.join("spec.txt")
        );
        assert_eq!(
            download_target(dir, "../escaped.txt").unwrap(),
            dir.join("escaped.txt")
        );
        assert_eq!(
            download_target(dir, "/etc/passwd").unwrap(),
            dir.join("passwd")
        );
        assert!(download_target(dir, "..").is_err());
        assert!(download_target(dir, "").is_err());
    }
}
