use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Album `created` timestamps: microsecond precision, literal `Z` suffix.
const CREATED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FolderNameError {
    #[error("unparseable date {0:?} cannot be used as a directory name")]
    UnsafeDate(String),
}

/// Strip diacritics, drop everything outside `[A-Za-z0-9]` and whitespace,
/// then collapse whitespace runs into single underscores.
///
/// `"Žemaitė  Šaulė!"` becomes `"Zemaite_Saule"`.
pub fn normalize(input: &str) -> String {
    let cleaned: String = input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_ascii_alphanumeric() || c.is_ascii_whitespace())
        .collect();
    cleaned.split_ascii_whitespace().collect::<Vec<_>>().join("_")
}

/// `YYYY/MM` for a well-formed album timestamp.
pub fn album_month_path(created: &str) -> Option<String> {
    NaiveDateTime::parse_from_str(created, CREATED_FORMAT)
        .ok()
        .map(|dt| dt.format("%Y/%m").to_string())
}

/// Directory segment for a child: the normalized name, or `child_<id>` when
/// nothing of the name survives normalization (e.g. Hangul-only names).
pub fn child_segment(child_id: i64, child_name: &str) -> String {
    let child = normalize(child_name);
    if child.is_empty() {
        format!("child_{child_id}")
    } else {
        child
    }
}

/// Build `child/YYYY/MM_albumID_title` for an album.
///
/// An unparseable timestamp is used verbatim in place of `YYYY/MM`, unless it
/// would escape or nest the album directory.
pub fn album_folder_name(
    child_id: i64,
    child_name: &str,
    created: &str,
    album_id: i64,
    title: &str,
) -> Result<String, FolderNameError> {
    let child = child_segment(child_id, child_name);

    let date = match album_month_path(created) {
        Some(d) => d,
        None => {
            if created.is_empty()
                || created.contains(|c: char| c == '/' || c == '\\')
                || created == "."
                || created == ".."
            {
                return Err(FolderNameError::UnsafeDate(created.to_string()));
            }
            created.to_string()
        }
    };

    Ok(format!("{}/{}_{}_{}", child, date, album_id, normalize(title)))
}

/// Join a `/`-separated album folder name onto the output directory.
pub fn album_dir(output_dir: &Path, folder_name: &str) -> PathBuf {
    let mut path = output_dir.to_path_buf();
    for component in folder_name.split('/') {
        if !component.is_empty() {
            path.push(component);
        }
    }
    path
}

/// Extension of the last path segment of a download URL, without the dot.
/// Returns an empty string when the file name has no extension.
pub fn extension_from_url(raw_url: &str) -> Result<String, url::ParseError> {
    let cleaned = raw_url.trim_matches('"');
    let parsed = url::Url::parse(cleaned)?;
    let file_name = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or("");
    Ok(match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_string(),
        None => String::new(),
    })
}

/// `stem.ext`, or just `stem` when there is no extension.
pub fn file_name_with_extension(stem: &str, ext: &str) -> String {
    if ext.is_empty() {
        stem.to_string()
    } else {
        format!("{}.{}", stem, ext)
    }
}

/// True when `path` exists and is exactly `expected_size` bytes long.
pub async fn file_matches_size(path: &Path, expected_size: u64) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() == expected_size,
        Err(_) => false,
    }
}
