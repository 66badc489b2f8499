//! `docket versions`, `docket diff`, `docket list`: read-only views.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use docket_core::{Document, DocumentId, DocumentVersion, VersionId};
use docket_sync::{DiffArtifact, LineTag};

use super::Session;

// ---------------------------------------------------------------------------
// versions
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct VersionsArgs {
    pub document: DocumentId,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "version")]
    version: String,
    #[tabled(rename = "author")]
    author: String,
    #[tabled(rename = "created")]
    created: String,
    #[tabled(rename = "diff")]
    diff: String,
}

impl VersionsArgs {
    pub fn run(self, session: &Session) -> Result<()> {
        let versions = session
            .versions(self.document)
            .with_context(|| format!("failed to load versions of document {}", self.document))?;
        if self.json {
            return print_json(&versions);
        }

        let rows: Vec<VersionRow> = versions.iter().map(version_row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn version_row(version: &DocumentVersion) -> VersionRow {
    VersionRow {
        version: version.id.to_string(),
        author: version.author.to_string(),
        created: version.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        diff: if version.diff.is_some() {
            "yes".to_string()
        } else {
            "-".to_string()
        },
    }
}

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct DiffArgs {
    pub document: DocumentId,

    /// Version to show, e.g. `2` or `v2`.
    pub version: VersionId,
}

impl DiffArgs {
    pub fn run(self, session: &Session) -> Result<()> {
        let bytes = session
            .read_diff(self.document, self.version)
            .with_context(|| {
                format!(
                    "failed to read {} of document {}",
                    self.version, self.document
                )
            })?;
        let Some(bytes) = bytes else {
            println!(
                "{} of document {} has no diff.",
                self.version, self.document
            );
            return Ok(());
        };

        let artifact = DiffArtifact::parse(&bytes)
            .with_context(|| format!("stored diff of {} is malformed", self.version))?;
        let stats = artifact.stats();
        println!(
            "{} {} | {} {}",
            self.version.to_string().bold(),
            self.document,
            format!("-{}", stats.removed).red(),
            format!("+{}", stats.added).green(),
        );
        for line in artifact.lines() {
            let text = line.text_lossy();
            let text = text.strip_suffix('\n').unwrap_or(&text);
            match line.tag {
                LineTag::Unchanged => println!("  {text}"),
                LineTag::Removed => println!("{}", format!("- {text}").red()),
                LineTag::Added => println!("{}", format!("+ {text}").green()),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct DocumentRow {
    #[tabled(rename = "id")]
    id: u64,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "owner")]
    owner: String,
    #[tabled(rename = "collaborators")]
    collaborators: String,
    #[tabled(rename = "lock")]
    lock: String,
}

impl ListArgs {
    pub fn run(self, session: &Session) -> Result<()> {
        let documents = session.list().context("failed to list documents")?;
        if self.json {
            return print_json(&documents);
        }
        if documents.is_empty() {
            println!("No documents yet.");
            println!("Run: docket create <path>");
            return Ok(());
        }

        let rows: Vec<DocumentRow> = documents.iter().map(document_row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn document_row(document: &Document) -> DocumentRow {
    let collaborators: Vec<String> = document
        .collaborators()
        .iter()
        .map(ToString::to_string)
        .collect();
    DocumentRow {
        id: document.id().0,
        name: document.name.clone(),
        owner: document.owner().to_string(),
        collaborators: if collaborators.is_empty() {
            "-".to_string()
        } else {
            collaborators.join(", ")
        },
        lock: match document.edit_lock().holder() {
            Some(holder) => holder.to_string().yellow().to_string(),
            None => "free".to_string(),
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::{ContentRef, UserId};

    #[test]
    fn version_row_marks_diffless_versions() {
        let version = DocumentVersion {
            id: VersionId(1),
            document: DocumentId(1),
            content: ContentRef::from("content/1/abc.txt"),
            diff: None,
            author: UserId::from("alice"),
            created_at: chrono::Utc::now(),
        };
        let row = version_row(&version);
        assert_eq!(row.version, "v1");
        assert_eq!(row.diff, "-");
        assert_eq!(row.author, "alice");
    }
}
