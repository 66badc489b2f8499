//! Line diff engine and the serialized diff artifact.
//!
//! Both sides are split into lines that keep their `\n`; a trailing fragment
//! without one is still a line. Alignment is a minimal Myers edit script over
//! byte lines, so non-UTF-8 content diffs losslessly.
//!
//! ## Serialized form
//!
//! ```text
//!   unchanged line
//! - removed line
//! + added line
//! \ No newline at end of file
//! ```
//!
//! Every artifact line is a two-byte prefix, the source line, and `\n`. A
//! source line that had no terminator is followed by the marker line.

use std::borrow::Cow;
use std::io::{self, BufWriter, Write};

use similar::{capture_diff_slices, Algorithm, DiffOp};

use crate::error::DiffParseError;

const UNCHANGED_PREFIX: &[u8] = b"  ";
const REMOVED_PREFIX: &[u8] = b"- ";
const ADDED_PREFIX: &[u8] = b"+ ";
const NO_NEWLINE_MARKER: &[u8] = b"\\ No newline at end of file\n";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineTag {
    Unchanged,
    Removed,
    Added,
}

impl LineTag {
    fn prefix(self) -> &'static [u8] {
        match self {
            LineTag::Unchanged => UNCHANGED_PREFIX,
            LineTag::Removed => REMOVED_PREFIX,
            LineTag::Added => ADDED_PREFIX,
        }
    }
}

/// One tagged source line, terminator included when the source had one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine<'a> {
    pub tag: LineTag,
    pub text: Cow<'a, [u8]>,
}

impl DiffLine<'_> {
    /// The line as text, with invalid UTF-8 replaced.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }
}

/// Line counts per tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub unchanged: usize,
    pub removed: usize,
    pub added: usize,
}

impl DiffStats {
    pub fn changed(&self) -> usize {
        self.removed + self.added
    }
}

/// Ordered sequence of tagged lines describing how one content became another.
///
/// Lines borrow from the diffed inputs (or the parsed buffer) where they can.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffArtifact<'a> {
    lines: Vec<DiffLine<'a>>,
}

// ---------------------------------------------------------------------------
// Computing
// ---------------------------------------------------------------------------

/// Split `bytes` into lines, each keeping its `\n`.
pub fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    bytes.split_inclusive(|b| *b == b'\n').collect()
}

/// Byte-for-byte identity. Identical uploads never reach [`compute_diff`].
pub fn contents_are_identical(old: &[u8], new: &[u8]) -> bool {
    old == new
}

/// Diff `old` against `new`.
///
/// Deterministic: the same inputs always produce the same artifact. Within a
/// replaced hunk all removed lines come before the added ones.
pub fn compute_diff<'a>(old: &'a [u8], new: &'a [u8]) -> DiffArtifact<'a> {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let ops = capture_diff_slices(Algorithm::Myers, &old_lines, &new_lines);

    let mut lines = Vec::with_capacity(old_lines.len().max(new_lines.len()));
    let mut push = |tag: LineTag, text: &'a [u8]| {
        lines.push(DiffLine {
            tag,
            text: Cow::Borrowed(text),
        })
    };
    for op in ops {
        match op {
            DiffOp::Equal {
                new_index, len, ..
            } => {
                for text in &new_lines[new_index..new_index + len] {
                    push(LineTag::Unchanged, *text);
                }
            }
            DiffOp::Delete {
                old_index, old_len, ..
            } => {
                for text in &old_lines[old_index..old_index + old_len] {
                    push(LineTag::Removed, *text);
                }
            }
            DiffOp::Insert {
                new_index, new_len, ..
            } => {
                for text in &new_lines[new_index..new_index + new_len] {
                    push(LineTag::Added, *text);
                }
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                for text in &old_lines[old_index..old_index + old_len] {
                    push(LineTag::Removed, *text);
                }
                for text in &new_lines[new_index..new_index + new_len] {
                    push(LineTag::Added, *text);
                }
            }
        }
    }

    let artifact = DiffArtifact { lines };
    let stats = artifact.stats();
    tracing::debug!(
        "diffed {} -> {} bytes: {} removed, {} added",
        old.len(),
        new.len(),
        stats.removed,
        stats.added
    );
    artifact
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

impl<'a> DiffArtifact<'a> {
    pub fn lines(&self) -> &[DiffLine<'a>] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn stats(&self) -> DiffStats {
        let mut stats = DiffStats::default();
        for line in &self.lines {
            match line.tag {
                LineTag::Unchanged => stats.unchanged += 1,
                LineTag::Removed => stats.removed += 1,
                LineTag::Added => stats.added += 1,
            }
        }
        stats
    }

    /// Lines of the new side: unchanged and added, in order.
    pub fn new_lines(&self) -> Vec<&[u8]> {
        self.side(LineTag::Added)
    }

    /// Lines of the old side: unchanged and removed, in order.
    pub fn old_lines(&self) -> Vec<&[u8]> {
        self.side(LineTag::Removed)
    }

    fn side(&self, changed: LineTag) -> Vec<&[u8]> {
        self.lines
            .iter()
            .filter(|l| l.tag == LineTag::Unchanged || l.tag == changed)
            .map(|l| l.text.as_ref())
            .collect()
    }

    /// Serialized form, built in memory.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for line in &self.lines {
            encode_line(&mut out, line);
        }
        out
    }

    /// Stream the serialized form into `writer`.
    pub fn write_to<W: Write>(&self, writer: W) -> io::Result<()> {
        let mut writer = BufWriter::new(writer);
        let mut buf = Vec::new();
        for line in &self.lines {
            buf.clear();
            encode_line(&mut buf, line);
            writer.write_all(&buf)?;
        }
        writer.flush()
    }

    /// Read a serialized artifact back. Lines borrow from `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DiffParseError> {
        let mut lines: Vec<DiffLine<'a>> = Vec::new();
        // A marker may only follow a line that still has its terminator.
        let mut marker_allowed = false;

        for (idx, raw) in split_lines(bytes).into_iter().enumerate() {
            let line = idx + 1;
            if !raw.ends_with(b"\n") {
                return Err(DiffParseError {
                    line,
                    reason: "missing line terminator",
                });
            }
            if raw == NO_NEWLINE_MARKER {
                let Some(prev) = lines.last_mut().filter(|_| marker_allowed) else {
                    return Err(DiffParseError {
                        line,
                        reason: "marker does not follow a line",
                    });
                };
                if let Cow::Borrowed(text) = prev.text {
                    prev.text = Cow::Borrowed(&text[..text.len() - 1]);
                }
                marker_allowed = false;
                continue;
            }
            if raw.len() < 3 {
                return Err(DiffParseError {
                    line,
                    reason: "line too short",
                });
            }
            let tag = match &raw[..2] {
                p if p == UNCHANGED_PREFIX => LineTag::Unchanged,
                p if p == REMOVED_PREFIX => LineTag::Removed,
                p if p == ADDED_PREFIX => LineTag::Added,
                _ => {
                    return Err(DiffParseError {
                        line,
                        reason: "unknown line prefix",
                    })
                }
            };
            lines.push(DiffLine {
                tag,
                text: Cow::Borrowed(&raw[2..]),
            });
            marker_allowed = true;
        }
        Ok(DiffArtifact { lines })
    }
}

fn encode_line(out: &mut Vec<u8>, line: &DiffLine<'_>) {
    out.extend_from_slice(line.tag.prefix());
    out.extend_from_slice(&line.text);
    if !line.text.ends_with(b"\n") {
        out.push(b'\n');
        out.extend_from_slice(NO_NEWLINE_MARKER);
    }
}
