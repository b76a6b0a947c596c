//! Domain records and the JSON wire shapes they are decoded from.

use serde::{Deserialize, Deserializer};

use super::error::ApiError;

/// One child profile on the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Child {
    pub id: i64,
    pub name: String,
    pub gender: String,
    pub date_of_birth: String,
    pub center_id: i64,
    pub class_id: i64,
}

/// Which children an album listing or download covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSelector {
    All,
    Id(i64),
}

impl std::fmt::Display for ChildSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildSelector::All => f.write_str("all children"),
            ChildSelector::Id(id) => write!(f, "child {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: i64,
    pub file_size: u64,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub id: i64,
    /// Kept for reference only; videos are always saved as `video.<ext>`.
    pub file_name: String,
    pub file_size: u64,
    pub download_url: String,
}

/// A dated gallery entry belonging to one child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub id: i64,
    pub child_id: i64,
    /// Relative directory, `child/YYYY/MM_id_title`.
    pub folder_name: String,
    pub created: String,
    pub title: String,
    pub content: String,
    pub video: Option<Video>,
    pub images: Vec<Image>,
}

/// Treat an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Pagination cursors are normally strings but tolerate bare numbers.
fn cursor_token<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// `GET info_url` body.
#[derive(Debug, Deserialize)]
pub(crate) struct InfoResponse {
    #[serde(default)]
    pub children: Option<Vec<ChildRecord>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChildRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub gender: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub date_birth: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub enrollment: Vec<EnrollmentRecord>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EnrollmentRecord {
    #[serde(default)]
    pub center_id: Option<i64>,
    #[serde(default)]
    pub belong_to_class: Option<i64>,
}

impl TryFrom<ChildRecord> for Child {
    type Error = ApiError;

    /// The child and its enrollment must carry real, non-zero IDs.
    fn try_from(record: ChildRecord) -> Result<Self, Self::Error> {
        let id = match record.id {
            Some(id) if id != 0 => id,
            _ => {
                return Err(ApiError::DataShape(format!(
                    "child record without an ID (name: {:?})",
                    record.name
                )))
            }
        };
        let enrollment = record.enrollment.first().ok_or_else(|| {
            ApiError::DataShape(format!(
                "enrollment details missing for child ID {}",
                id
            ))
        })?;
        let (center_id, class_id) = match (enrollment.center_id, enrollment.belong_to_class) {
            (Some(center), Some(class)) if center != 0 && class != 0 => (center, class),
            _ => {
                return Err(ApiError::DataShape(format!(
                    "invalid center or class IDs for child {} [ID: {}]",
                    record.name, id
                )))
            }
        };
        Ok(Child {
            id,
            name: record.name,
            gender: record.gender,
            date_of_birth: record.date_birth,
            center_id,
            class_id,
        })
    }
}

/// One page of `GET album_url`.
#[derive(Debug, Deserialize)]
pub(crate) struct AlbumPage {
    #[serde(default)]
    pub results: Option<Vec<AlbumRecord>>,
    #[serde(default, deserialize_with = "cursor_token")]
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AlbumRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default)]
    pub attached_video: Option<VideoRecord>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attached_images: Vec<ImageRecord>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VideoRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub original_file_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_size: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub high: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImageRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_size: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub original: String,
}

impl From<VideoRecord> for Video {
    fn from(r: VideoRecord) -> Self {
        Video {
            id: r.id,
            file_name: r.original_file_name,
            file_size: r.file_size,
            download_url: r.high,
        }
    }
}

impl From<ImageRecord> for Image {
    fn from(r: ImageRecord) -> Self {
        Image {
            id: r.id,
            file_size: r.file_size,
            download_url: r.original,
        }
    }
}
