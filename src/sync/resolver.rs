use std::path::Path;

use anyhow::{Context, Result};

use super::state::SyncStateStore;
use super::RemoteStore;

/// Resolve (or create) the remote folder matching each directory component
/// of `relative_dir`, left to right, starting under `root_id`. Returns the
/// remote ID of the final folder, i.e. the upload target for a file whose
/// parent directory this is.
pub async fn resolve_folder_chain(
    store: &dyn RemoteStore,
    state: &SyncStateStore,
    root_id: &str,
    relative_dir: &Path,
) -> Result<String> {
    let mut parent_id = root_id.to_string();

    for component in relative_dir.components() {
        let name = component
            .as_os_str()
            .to_str()
            .with_context(|| format!("Non-UTF-8 path component in {}", relative_dir.display()))?;
        parent_id = get_or_create_folder(store, state, &parent_id, name).await?;
    }

    Ok(parent_id)
}

/// The get-or-create protocol for one folder name under a parent:
///
/// 1. local state lookup (the hot path for repeated syncs, no network);
/// 2. remote listing, re-registering a folder that exists remotely but was
///    lost from local state;
/// 3. remote creation, then registration.
///
/// Two concurrent resolutions of the same missing folder can both reach
/// step 3 and create duplicate remote folders; the last registration wins
/// locally and the loser stays as a remote orphan. Accepted, since the
/// remote API has no create-if-absent.
pub async fn get_or_create_folder(
    store: &dyn RemoteStore,
    state: &SyncStateStore,
    parent_id: &str,
    name: &str,
) -> Result<String> {
    if let Some(id) = state.resolve_folder(parent_id, name) {
        return Ok(id);
    }

    let existing = store
        .list_folder(parent_id, name)
        .await
        .with_context(|| format!("Failed to look up folder '{name}' under {parent_id}"))?;

    if let Some(entry) = existing.into_iter().find(|e| !e.is_trashed()) {
        tracing::debug!(folder = name, id = %entry.id, "folder exists remotely, registered");
        state.register_folder(parent_id, name, &entry.id);
        return Ok(entry.id);
    }

    let created = store
        .create_folder(name, parent_id)
        .await
        .with_context(|| format!("Failed to create folder '{name}' under {parent_id}"))?;
    tracing::info!(folder = name, id = %created.id, parent = parent_id, "created remote folder");
    state.register_folder(parent_id, name, &created.id);

    Ok(created.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::Ordering;

    use crate::sync::testing::FakeStore;

    fn fresh_state() -> (tempfile::TempDir, SyncStateStore) {
        let dir = tempfile::tempdir().unwrap();
        let state = SyncStateStore::load(&dir.path().join("uploads.json")).unwrap();
        (dir, state)
    }

    #[tokio::test]
    async fn creates_missing_folder_and_registers_it() {
        let store = FakeStore::new();
        let (_dir, state) = fresh_state();

        let id = get_or_create_folder(&store, &state, "root", "a")
            .await
            .unwrap();

        assert_eq!(store.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.resolve_folder("root", "a"), Some(id));
    }

    #[tokio::test]
    async fn second_resolution_is_local_only() {
        let store = FakeStore::new();
        let (_dir, state) = fresh_state();

        let first = get_or_create_folder(&store, &state, "root", "a")
            .await
            .unwrap();
        let calls_after_first = store.remote_calls();

        let second = get_or_create_folder(&store, &state, "root", "a")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            store.remote_calls(),
            calls_after_first,
            "second resolution must not touch the remote"
        );
    }

    #[tokio::test]
    async fn adopts_folder_that_exists_remotely() {
        let store = FakeStore::new();
        let (_dir, state) = fresh_state();
        let seeded = store.seed_folder("root", "a");

        let id = get_or_create_folder(&store, &state, "root", "a")
            .await
            .unwrap();

        assert_eq!(id, seeded);
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 0);
        // self-healed into local state
        assert_eq!(state.resolve_folder("root", "a"), Some(seeded));
    }

    #[tokio::test]
    async fn chain_threads_parents_left_to_right() {
        let store = FakeStore::new();
        let (_dir, state) = fresh_state();

        let leaf = resolve_folder_chain(&store, &state, "root", Path::new("a/b"))
            .await
            .unwrap();

        let a_id = state.resolve_folder("root", "a").unwrap();
        let b_id = state.resolve_folder(&a_id, "b").unwrap();
        assert_eq!(leaf, b_id);
        assert_eq!(store.create_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_relative_dir_resolves_to_root() {
        let store = FakeStore::new();
        let (_dir, state) = fresh_state();

        let id = resolve_folder_chain(&store, &state, "root", Path::new(""))
            .await
            .unwrap();
        assert_eq!(id, "root");
        assert_eq!(store.remote_calls(), 0);
    }
}
