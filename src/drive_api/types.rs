use serde::{Deserialize, Serialize};

/// MIME type Drive assigns to folders.
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// A file or folder entry as returned by the files listing.
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct DriveEntry {
    pub id: String,
    pub title: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Drive reports sizes as decimal strings; absent for folders.
    #[serde(default, rename = "fileSize", deserialize_with = "size_string")]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub labels: Option<Labels>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Labels {
    #[serde(default)]
    pub trashed: bool,
}

impl DriveEntry {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    pub fn is_trashed(&self) -> bool {
        self.labels.as_ref().map(|l| l.trashed).unwrap_or(false)
    }
}

/// Deserialize a size that may arrive as a JSON string or a JSON number.
fn size_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct SizeVisitor;

    impl<'de> de::Visitor<'de> for SizeVisitor {
        type Value = Option<u64>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a string or a number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Option<u64>, E> {
            v.parse().map(Some).map_err(de::Error::custom)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Option<u64>, E> {
            Ok(Some(v))
        }

        fn visit_none<E: de::Error>(self) -> Result<Option<u64>, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Option<u64>, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(SizeVisitor)
}

/// Paginated response from GET /files.
#[derive(Debug, Clone, Deserialize)]
pub struct FileList {
    pub items: Vec<DriveEntry>,
    #[serde(default, rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ParentRef {
    pub id: String,
}

/// Request body for creating a folder.
#[derive(Debug, Serialize)]
pub struct CreateFolderRequest {
    pub title: String,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
    pub parents: Vec<ParentRef>,
}

/// Metadata part of a multipart file upload.
#[derive(Debug, Serialize)]
pub struct UploadMetadata {
    pub title: String,
    pub parents: Vec<ParentRef>,
}

/// Result of a completed upload, as the sync layer consumes it.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub remote_id: String,
    pub size_bytes: u64,
    pub elapsed_secs: f64,
}

/// Drive API error response body.
#[derive(Debug, Clone, Deserialize)]
pub struct DriveApiError {
    pub error: DriveErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

impl std::fmt::Display for DriveApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Drive API error {}: {}",
            self.error.code.unwrap_or(0),
            self.error.message.as_deref().unwrap_or("unknown"),
        )
    }
}

/// Build the listing query for a named folder under a parent.
pub fn folder_query(parent_id: &str, name: &str) -> String {
    format!(
        "'{}' in parents and title='{}' and mimeType='{FOLDER_MIME}' and trashed=false",
        escape_query(parent_id),
        escape_query(name),
    )
}

/// Build the listing query for all live children of a folder.
pub fn children_query(folder_id: &str) -> String {
    format!("'{}' in parents and trashed=false", escape_query(folder_id))
}

/// Escape single quotes and backslashes for embedding in a query string.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
