//! Version chain builder.

use chrono::Utc;

use crate::repository::DocumentTxn;
use crate::types::{ContentRef, DocumentVersion, UserId};

/// Stage a new immutable version at the end of the document's chain.
///
/// `created_at` never goes backwards within a chain, even if the wall clock
/// does. The version is written when the surrounding transaction commits.
pub fn append_version(
    txn: &mut DocumentTxn<'_>,
    content: ContentRef,
    author: &UserId,
    diff: Option<ContentRef>,
) -> DocumentVersion {
    let now = Utc::now();
    let created_at = match txn.last_created_at() {
        Some(previous) if previous > now => previous,
        _ => now,
    };
    let version = DocumentVersion {
        id: txn.next_version_id(),
        document: txn.document().id(),
        content,
        diff,
        author: author.clone(),
        created_at,
    };
    txn.push_version(version.clone());
    tracing::debug!(
        "staged {} of document {} by {}",
        version.id,
        version.document,
        version.author
    );
    version
}
