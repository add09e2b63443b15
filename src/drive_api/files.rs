use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use super::client::DriveClient;
use super::types::{DriveEntry, ParentRef, UploadMetadata, UploadOutcome};

impl DriveClient {
    /// Upload a local file into a remote folder. Returns the new entry's ID
    /// together with the byte count and wall-clock upload time, for the
    /// caller's logs.
    pub async fn upload_file(&self, local_path: &Path, parent_id: &str) -> Result<UploadOutcome> {
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid file name: {}", local_path.display()))?
            .to_string();

        let metadata = UploadMetadata {
            title: file_name.clone(),
            parents: vec![ParentRef {
                id: parent_id.to_string(),
            }],
        };
        let metadata_json = serde_json::to_string(&metadata)?;

        let file_bytes = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("Failed to read {}", local_path.display()))?;
        let size_bytes = file_bytes.len() as u64;

        let url = self.upload_url("/files");
        let started = Instant::now();

        let resp = self
            .execute("upload file", || {
                let form = reqwest::multipart::Form::new()
                    .part(
                        "metadata",
                        reqwest::multipart::Part::text(metadata_json.clone())
                            .mime_str("application/json")?,
                    )
                    .part(
                        "content",
                        reqwest::multipart::Part::bytes(file_bytes.clone())
                            .file_name(file_name.clone()),
                    );
                Ok(self
                    .http()
                    .post(&url)
                    .query(&[("uploadType", "multipart")])
                    .multipart(form))
            })
            .await
            .with_context(|| format!("Failed to upload {}", local_path.display()))?;

        let entry: DriveEntry = resp
            .json()
            .await
            .context("Failed to parse upload response")?;

        Ok(UploadOutcome {
            remote_id: entry.id,
            size_bytes,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }
}
