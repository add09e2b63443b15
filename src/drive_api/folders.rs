use anyhow::{Context, Result};

use super::client::DriveClient;
use super::types::{
    children_query, folder_query, CreateFolderRequest, DriveEntry, FileList, ParentRef,
    FOLDER_MIME,
};

impl DriveClient {
    /// List non-trashed folders named `name` under `parent_id`.
    /// An empty result means the folder does not exist remotely.
    pub async fn list_folder(&self, parent_id: &str, name: &str) -> Result<Vec<DriveEntry>> {
        self.list_query(folder_query(parent_id, name))
            .await
            .with_context(|| format!("Failed to list folder '{name}' under {parent_id}"))
    }

    /// List all live children (files and folders) of a folder.
    pub async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveEntry>> {
        self.list_query(children_query(folder_id))
            .await
            .with_context(|| format!("Failed to list children of {folder_id}"))
    }

    /// Run a files listing, handling pagination automatically.
    async fn list_query(&self, query: String) -> Result<Vec<DriveEntry>> {
        let url = self.api_url("/files");
        let mut all_items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let resp = self
                .execute("list files", || {
                    let mut params = vec![("q", query.as_str()), ("maxResults", "1000")];
                    if let Some(ref token) = page_token {
                        params.push(("pageToken", token.as_str()));
                    }
                    Ok(self.http().get(&url).query(&params))
                })
                .await?;

            let page: FileList = resp
                .json()
                .await
                .context("Failed to parse file list response")?;

            all_items.extend(page.items);

            match page.next_page_token {
                Some(ref token) if !token.is_empty() => page_token = Some(token.clone()),
                _ => break,
            }
        }

        Ok(all_items)
    }

    /// Create a new folder under a parent.
    pub async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveEntry> {
        let url = self.api_url("/files");
        let body = CreateFolderRequest {
            title: name.to_string(),
            mime_type: FOLDER_MIME,
            parents: vec![ParentRef {
                id: parent_id.to_string(),
            }],
        };

        let resp = self
            .execute("create folder", || Ok(self.http().post(&url).json(&body)))
            .await
            .with_context(|| format!("Failed to create folder '{name}' in {parent_id}"))?;

        resp.json()
            .await
            .context("Failed to parse create folder response")
    }

    /// Move a single file or folder to the Drive trash.
    pub async fn trash_item(&self, remote_id: &str) -> Result<()> {
        let url = self.api_url(&format!("/files/{remote_id}/trash"));
        self.execute("trash item", || Ok(self.http().post(&url)))
            .await
            .with_context(|| format!("Failed to trash {remote_id}"))?;
        Ok(())
    }

    /// Trash a folder and everything below it, post-order: subfolders are
    /// emptied first, then files, then the folder itself.
    pub fn trash_folder_recursive<'a>(
        &'a self,
        folder_id: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let children = self.list_children(folder_id).await?;

            for child in &children {
                if child.is_folder() {
                    self.trash_folder_recursive(&child.id).await?;
                } else {
                    self.trash_item(&child.id).await?;
                }
            }

            self.trash_item(folder_id).await
        })
    }
}
