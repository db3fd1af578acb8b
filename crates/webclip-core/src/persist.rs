//! Output files: document layout, filenames and the manual-review record

use crate::failure::FailureRecord;
use chrono::{DateTime, Local};
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const FILENAME_MAX_CHARS: usize = 80;

/// Separator between blocks of the review record
pub const REVIEW_SEPARATOR: &str = "\n\n%%%\n\n";

/// Turn a title into a file stem that is legal on every common filesystem.
///
/// Reserved punctuation becomes its full-width twin so the title stays
/// readable.
pub fn sanitize_filename(title: &str) -> String {
    let mapped: String = title
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '\\' => '＼',
            '/' => '／',
            ':' => '：',
            '*' => '＊',
            '?' => '？',
            '"' => '＂',
            '<' => '＜',
            '>' => '＞',
            '|' => '｜',
            other => other,
        })
        .collect();

    let collapsed = mapped.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(FILENAME_MAX_CHARS).collect();
    let mut stem = capped.trim_matches(|c: char| c == '.' || c.is_whitespace()).to_string();

    if stem.is_empty() {
        stem = "untitled".to_string();
    }
    if is_reserved_windows_name(&stem) {
        stem.push('_');
    }
    stem
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

/// Header fields of an output document
#[derive(Debug, Clone, Default)]
pub struct DocumentHeader<'a> {
    pub title: Option<&'a str>,
    pub source_url: &'a str,
    pub description: Option<&'a str>,
    pub author: Option<&'a str>,
    pub published: Option<&'a str>,
}

/// Lay out the final Markdown document
pub fn build_document(
    header: &DocumentHeader<'_>,
    body: &str,
    captured: DateTime<Local>,
    include_title: bool,
) -> String {
    let mut doc = String::new();

    if include_title {
        if let Some(title) = header.title.map(str::trim).filter(|t| !t.is_empty()) {
            doc.push_str(&format!("# {}\n\n", title));
        }
    }

    doc.push_str(&format!(
        "**Source:** [{}]({})\n",
        header.source_url, header.source_url
    ));
    doc.push_str(&format!(
        "**Captured:** {}\n",
        captured.format("%Y-%m-%d %H:%M:%S")
    ));

    let optional = [
        ("Description", header.description),
        ("Author", header.author),
        ("Published", header.published),
    ];
    for (label, value) in optional {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            doc.push_str(&format!("**{}:** {}\n", label, value));
        }
    }

    doc.push_str("\n---\n\n");
    doc.push_str(body.trim());
    doc.push('\n');
    doc
}

/// Writes files into one directory without ever replacing an existing one
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `<stem>.<ext>`, or `<stem>_1.<ext>`, `<stem>_2.<ext>`, ... when
    /// taken. The temp file is renamed with no-clobber semantics so two
    /// writers can never end up on the same name.
    pub fn write_new(&self, stem: &str, ext: &str, content: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        let mut suffix = 0usize;
        loop {
            let name = if suffix == 0 {
                format!("{}.{}", stem, ext)
            } else {
                format!("{}_{}.{}", stem, suffix, ext)
            };
            let target = self.dir.join(&name);
            match tmp.persist_noclobber(&target) {
                Ok(_) => {
                    debug!("Wrote {:?}", target);
                    return Ok(target);
                }
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                    tmp = e.file;
                    suffix += 1;
                }
                Err(e) => return Err(e.error),
            }
        }
    }
}

/// Write the manual-review record: free-text notes verbatim, then one block
/// per failure. Nothing is written when both are empty.
pub fn write_review_record(
    dir: &Path,
    notes: &[String],
    failures: &[FailureRecord],
    now: DateTime<Local>,
) -> io::Result<Option<PathBuf>> {
    let blocks: Vec<String> = notes
        .iter()
        .map(|note| note.trim().to_string())
        .filter(|note| !note.is_empty())
        .chain(failures.iter().map(FailureRecord::to_block))
        .collect();
    if blocks.is_empty() {
        return Ok(None);
    }

    let stem = format!("manual-review-{}", now.format("%Y%m%d_%H%M%S"));
    let mut content = blocks.join(REVIEW_SEPARATOR);
    content.push('\n');

    let path = OutputWriter::new(dir).write_new(&stem, "md", &content)?;
    info!(
        "Manual review record with {} block(s): {:?}",
        blocks.len(),
        path
    );
    Ok(Some(path))
}
