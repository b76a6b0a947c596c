//! `description.md` handling: a `---` delimited frontmatter block carrying the
//! album title and date, followed by the album's free-text content.
//!
//! The frontmatter doubles as a cache key. An existing file is rewritten only
//! when its title or date no longer match the remote album (the body is not
//! compared), when it cannot be parsed, or when overwrite is forced.

use std::path::Path;

use tokio::fs;

use crate::kidsnote::Album;

pub const DESCRIPTION_FILE: &str = "description.md";

const DELIMITER: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frontmatter {
    pub title: String,
    pub date: String,
}

/// What `write_album_metadata` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataOutcome {
    Created,
    Refreshed,
    Unchanged,
}

/// Parse the frontmatter at the top of `content`.
///
/// Values may be JSON-quoted (as written by [`render_description`]) or bare.
/// Returns `None` unless both `title` and `date` keys are present.
pub fn parse_frontmatter(content: &str) -> Option<Frontmatter> {
    let mut title = None;
    let mut date = None;
    let mut in_block = false;

    for line in content.lines() {
        if line.starts_with(DELIMITER) {
            if in_block {
                break;
            }
            in_block = true;
            continue;
        }
        if !in_block {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = unquote(value.trim());
        match key.trim() {
            "title" => title = Some(value),
            "date" => date = Some(value),
            _ => {}
        }
    }

    Some(Frontmatter {
        title: title?,
        date: date?,
    })
}

fn unquote(value: &str) -> String {
    if value.starts_with('"') {
        if let Ok(s) = serde_json::from_str::<String>(value) {
            return s;
        }
    }
    value.trim_matches('"').to_string()
}

fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Render the full `description.md` body for an album.
pub fn render_description(title: &str, date: &str, content: &str) -> String {
    let mut out = String::with_capacity(content.len() + title.len() + date.len() + 32);
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str("title: ");
    out.push_str(&quote(title));
    out.push('\n');
    out.push_str("date: ");
    out.push_str(&quote(date));
    out.push('\n');
    out.push_str(DELIMITER);
    out.push_str("\n\n");
    out.push_str(content);
    if !content.is_empty() && !content.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Create or refresh the album's `description.md` inside `album_dir`.
pub async fn write_album_metadata(
    album: &Album,
    album_dir: &Path,
    overwrite: bool,
) -> std::io::Result<MetadataOutcome> {
    let path = album_dir.join(DESCRIPTION_FILE);

    let outcome = match fs::read_to_string(&path).await {
        Ok(existing) => {
            let fresh = matches!(
                parse_frontmatter(&existing),
                Some(fm) if fm.title == album.title && fm.date == album.created
            );
            if fresh && !overwrite {
                return Ok(MetadataOutcome::Unchanged);
            }
            MetadataOutcome::Refreshed
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => MetadataOutcome::Created,
        Err(e) => return Err(e),
    };

    let body = render_description(&album.title, &album.created, &album.content);
    let part_path = album_dir.join(format!("{}.part", DESCRIPTION_FILE));
    fs::write(&part_path, body).await?;
    fs::rename(&part_path, &path).await?;

    tracing::debug!(path = %path.display(), ?outcome, "wrote album metadata");
    Ok(outcome)
}
