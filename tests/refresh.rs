mod common;

use common::*;
use pretty_assertions::assert_eq;
use semindex::index::{RefreshKind, RefreshLock};
use semindex::{CollectionName, Error, IndexState, IndexStatus, QueryRequest, RefreshMode, Scope};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::tempdir;

const SESSION_RS: &str = "\
pub fn validate_session(token: &str) -> bool {
    !token.is_empty() && token.len() > 8
}
";

const BILLING_RS: &str = "\
pub fn charge_invoice(amount_cents: u64) -> u64 {
    amount_cents + amount_cents / 10
}
";

const SESSION_RS_V2: &str = "\
/// Tokens expire after a day
pub const SESSION_TTL_SECS: u64 = 86_400;

pub fn validate_session(token: &str, age_secs: u64) -> bool {
    !token.is_empty() && token.len() > 8 && age_secs < SESSION_TTL_SECS
}

pub fn refresh_session(token: &str) -> String {
    format!(\"{token}-renewed\")
}
";

const BILLING_RS_V2: &str = "\
pub const LATE_FEE_CENTS: u64 = 500;

pub fn charge_invoice(amount_cents: u64, late: bool) -> u64 {
    let fee = if late { LATE_FEE_CENTS } else { 0 };
    amount_cents + amount_cents / 10 + fee
}
";

async fn chunks_by_id(
    handle: &semindex::IndexHandle,
    path: &str,
) -> BTreeMap<String, (String, (usize, usize))> {
    all_chunks(handle, Scope::One(CollectionName::Codebase))
        .await
        .into_iter()
        .filter(|r| r.chunk.file_path == path)
        .map(|r| (r.chunk.id, (r.chunk.content, r.chunk.line_range)))
        .collect()
}

#[tokio::test]
async fn test_incremental_refresh_touches_only_changed_file() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/session.rs", SESSION_RS);
    write(dir.path(), "src/billing.rs", BILLING_RS);
    let handle = hash_handle(dir.path());
    handle.refresh(RefreshMode::Full).await.unwrap();

    let billing_before = chunks_by_id(&handle, "src/billing.rs").await;
    let session_before = chunks_by_id(&handle, "src/session.rs").await;
    assert!(!billing_before.is_empty());
    assert!(!session_before.is_empty());

    write(dir.path(), "src/session.rs", SESSION_RS_V2);
    let outcome = handle
        .refresh(RefreshMode::Files(vec!["src/session.rs".to_string()]))
        .await
        .unwrap();
    assert_eq!(outcome.kind, RefreshKind::Incremental);
    assert_eq!(outcome.files_indexed, 1);

    assert_eq!(chunks_by_id(&handle, "src/billing.rs").await, billing_before);

    let session_after = chunks_by_id(&handle, "src/session.rs").await;
    assert!(session_after
        .values()
        .any(|(content, _)| content.contains("refresh_session")));
    for (id, (content, _)) in &session_after {
        assert!(
            SESSION_RS_V2.contains(content.as_str()),
            "chunk {id} does not come from the current file"
        );
    }
}

#[tokio::test]
async fn test_deleted_file_leaves_index() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/session.rs", SESSION_RS);
    write(dir.path(), "src/billing.rs", BILLING_RS);
    let handle = hash_handle(dir.path());
    handle.refresh(RefreshMode::Full).await.unwrap();

    std::fs::remove_file(dir.path().join("src/billing.rs")).unwrap();
    let outcome = handle
        .refresh(RefreshMode::Files(vec!["src/billing.rs".to_string()]))
        .await
        .unwrap();

    assert_eq!(outcome.files_removed, 1);
    assert!(chunks_by_id(&handle, "src/billing.rs").await.is_empty());
    assert!(!chunks_by_id(&handle, "src/session.rs").await.is_empty());
    assert_eq!(handle.status().await.sources.codebase.files, 1);
}

#[tokio::test]
async fn test_reopened_handle_serves_published_generation() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/session.rs", SESSION_RS);
    {
        let handle = hash_handle(dir.path());
        handle.refresh(RefreshMode::Full).await.unwrap();
    }

    let handle = hash_handle(dir.path());
    assert_eq!(handle.state(), IndexState::Ready);
    let response = handle
        .query(&QueryRequest::new("validate session token"))
        .await
        .unwrap();
    assert_eq!(response.index_status, IndexStatus::Fresh);
    assert_eq!(response.results[0].file_path, "src/session.rs");
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_index_live() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/session.rs", SESSION_RS);
    write(dir.path(), "src/billing.rs", BILLING_RS);
    let provider = Arc::new(GatedProvider::new());
    let handle = handle_with(dir.path(), hash_config(), provider.clone());
    handle.refresh(RefreshMode::Full).await.unwrap();

    let before = handle.status().await;
    let generation = handle.layout().current().unwrap();

    write(dir.path(), "src/session.rs", SESSION_RS_V2);
    provider.arm();

    let refresh = handle.refresh(RefreshMode::Files(vec!["src/session.rs".to_string()]));
    let probe = async {
        provider.entered.notified().await;
        let state = handle.state();
        let response = handle
            .query(&QueryRequest::new("validate session token"))
            .await
            .unwrap();
        provider.release.notify_one();
        (state, response)
    };
    let (result, (state_during, response)) = tokio::join!(refresh, probe);

    assert!(matches!(result, Err(Error::Provider { .. })));
    assert_eq!(state_during, IndexState::Refreshing);
    assert_eq!(response.index_status, IndexStatus::Fresh);
    assert_eq!(response.results[0].file_path, "src/session.rs");
    assert!(!response.results[0].content.contains("SESSION_TTL_SECS"));

    let after = handle.status().await;
    assert_eq!(after.sources, before.sources);
    assert_eq!(after.last_refreshed, before.last_refreshed);
    assert_eq!(handle.layout().current().unwrap(), generation);
    assert_eq!(handle.state(), IndexState::Ready);
}

#[tokio::test]
async fn test_refresh_refused_while_lock_is_held() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/session.rs", SESSION_RS);
    let mut config = hash_config();
    config.refresh.on_session_start = true;
    let handle = handle_with(dir.path(), config, Arc::new(semindex::HashEmbedder::new(DIMS)));

    std::fs::create_dir_all(handle.layout().dir()).unwrap();
    let held = RefreshLock::acquire(&handle.layout().lock_path()).unwrap();

    assert!(matches!(
        handle.refresh(RefreshMode::Full).await,
        Err(Error::RefreshInProgress(_))
    ));
    // Session start defers to the running refresh
    assert!(handle.refresh_on_session_start().await.unwrap().is_none());
    assert_eq!(handle.state(), IndexState::Uninitialized);

    drop(held);
    let outcome = handle.refresh_on_session_start().await.unwrap().unwrap();
    assert_eq!(outcome.kind, RefreshKind::Full);
    assert!(!handle.needs_refresh().await);
}

#[tokio::test]
async fn test_refresh_over_budget_times_out() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/session.rs", SESSION_RS);
    let mut config = hash_config();
    config.refresh.budget_secs = 1;
    let provider = Arc::new(SlowProvider::new());
    let handle = handle_with(dir.path(), config, provider.clone());
    handle.refresh(RefreshMode::Full).await.unwrap();
    let generation = handle.layout().current().unwrap();

    provider.arm();
    let result = handle.refresh(RefreshMode::Full).await;
    assert!(matches!(
        result,
        Err(Error::Timeout {
            operation: "refresh",
            ..
        })
    ));

    assert_eq!(handle.layout().current().unwrap(), generation);
    assert_eq!(handle.state(), IndexState::Ready);
    let response = handle.query(&QueryRequest::new("session")).await.unwrap();
    assert!(!response.results.is_empty());

    // The lock is released with the aborted refresh
    drop(RefreshLock::acquire(&handle.layout().lock_path()).unwrap());
}

const SCHEMA_V1: &str = "\
CREATE TABLE users (
  id INTEGER PRIMARY KEY,
  email TEXT NOT NULL
);

CREATE TABLE orders (
  id INTEGER PRIMARY KEY,
  user_id INTEGER NOT NULL
);
";

const SCHEMA_V2: &str = "\
CREATE TABLE users (
  id INTEGER PRIMARY KEY,
  email TEXT NOT NULL
);

CREATE TABLE orders (
  id INTEGER PRIMARY KEY,
  user_id INTEGER NOT NULL,
  total_cents INTEGER NOT NULL
);
";

#[tokio::test]
async fn test_schema_refresh_reembeds_only_changed_tables() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/session.rs", SESSION_RS);
    write(dir.path(), "db/schema.sql", SCHEMA_V1);
    let mut config = hash_config();
    config.database.enabled = true;
    config.database.schema = Some("db/schema.sql".into());
    config.codebase.exclude = vec!["db/**".to_string()];
    let provider = Arc::new(CountingProvider::new());
    let handle = handle_with(dir.path(), config, provider.clone());

    let outcome = handle.refresh(RefreshMode::Full).await.unwrap();
    assert_eq!(outcome.sources.database.chunks, 2);
    provider.take();

    write(dir.path(), "db/schema.sql", SCHEMA_V2);
    let outcome = handle.refresh(RefreshMode::Files(Vec::new())).await.unwrap();
    assert_eq!(outcome.kind, RefreshKind::Incremental);
    assert_eq!(outcome.chunks_embedded, 1);
    assert_eq!(provider.take(), 1);

    let tables = all_chunks(&handle, Scope::One(CollectionName::Database)).await;
    assert_eq!(tables.len(), 2);
    let orders = tables
        .iter()
        .find(|r| r.chunk.file_path == "database:orders")
        .unwrap();
    assert!(orders.chunk.content.contains("total_cents"));
    assert!(!chunks_by_id(&handle, "src/session.rs").await.is_empty());

    // Dropping a table removes its chunk without embedding anything
    write(
        dir.path(),
        "db/schema.sql",
        "CREATE TABLE users (\n  id INTEGER PRIMARY KEY,\n  email TEXT NOT NULL\n);\n",
    );
    let outcome = handle.refresh(RefreshMode::Files(Vec::new())).await.unwrap();
    assert_eq!(outcome.chunks_embedded, 0);
    assert_eq!(outcome.sources.database.chunks, 1);
    let tables = all_chunks(&handle, Scope::One(CollectionName::Database)).await;
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].chunk.file_path, "database:users");
}

#[tokio::test]
async fn test_unchanged_refresh_keeps_generation() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/session.rs", SESSION_RS);
    let handle = hash_handle(dir.path());
    handle.refresh(RefreshMode::Full).await.unwrap();
    let generation = handle.layout().current().unwrap();
    let before = handle.status().await.last_refreshed.unwrap();

    let outcome = handle.refresh(RefreshMode::Files(Vec::new())).await.unwrap();
    assert_eq!(outcome.kind, RefreshKind::Unchanged);
    assert_eq!(outcome.chunks_embedded, 0);
    assert_eq!(handle.layout().current().unwrap(), generation);
    assert!(handle.status().await.last_refreshed.unwrap() >= before);
}

#[tokio::test]
async fn test_missing_index_status() {
    let dir = tempdir().unwrap();
    let handle = hash_handle(dir.path());

    let status = handle.status().await;
    assert_eq!(status.index_status, IndexStatus::Missing);
    assert_eq!(status.state, IndexState::Uninitialized);
    assert!(handle.needs_refresh().await);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["indexStatus"], "missing");
}

#[tokio::test]
async fn test_incremental_refresh_follows_git_history() {
    if !git_available() {
        return;
    }
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "src/session.rs", SESSION_RS);
    write(root, "src/billing.rs", BILLING_RS);
    git(root, &["init", "-q"]);
    commit_sources(root, "initial");

    let provider = Arc::new(CountingProvider::new());
    let handle = handle_with(root, hash_config(), provider.clone());
    let outcome = handle.refresh(RefreshMode::Incremental).await.unwrap();
    assert_eq!(outcome.kind, RefreshKind::Full);
    assert!(handle.status().await.git_revision.is_some());
    provider.take();
    let session_before = chunks_by_id(&handle, "src/session.rs").await;

    write(root, "src/billing.rs", BILLING_RS_V2);
    commit_sources(root, "late fees");
    let outcome = handle.refresh(RefreshMode::Incremental).await.unwrap();
    assert_eq!(outcome.kind, RefreshKind::Incremental);
    assert_eq!(outcome.files_indexed, 1);
    assert_eq!(outcome.files_removed, 0);

    let billing = chunks_by_id(&handle, "src/billing.rs").await;
    assert!(billing
        .values()
        .any(|(content, _)| content.contains("LATE_FEE_CENTS")));
    assert_eq!(provider.take(), billing.len());
    assert_eq!(chunks_by_id(&handle, "src/session.rs").await, session_before);

    // The untracked index directory is not a change
    let outcome = handle.refresh(RefreshMode::Incremental).await.unwrap();
    assert_eq!(outcome.kind, RefreshKind::Unchanged);
    assert_eq!(provider.take(), 0);
}

#[tokio::test]
async fn test_reverted_uncommitted_edit_is_reindexed() {
    if !git_available() {
        return;
    }
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "src/session.rs", SESSION_RS);
    write(root, "src/billing.rs", BILLING_RS);
    git(root, &["init", "-q"]);
    commit_sources(root, "initial");

    let handle = hash_handle(root);
    handle.refresh(RefreshMode::Incremental).await.unwrap();
    let session_before = chunks_by_id(&handle, "src/session.rs").await;

    write(
        root,
        "src/session.rs",
        &format!("{SESSION_RS}\npub fn experimental_hack() -> bool {{\n    true\n}}\n"),
    );
    let outcome = handle.refresh(RefreshMode::Incremental).await.unwrap();
    assert_eq!(outcome.kind, RefreshKind::Incremental);
    let has_hack = |chunks: &BTreeMap<String, (String, (usize, usize))>| {
        chunks
            .values()
            .any(|(content, _)| content.contains("experimental_hack"))
    };
    assert!(has_hack(&chunks_by_id(&handle, "src/session.rs").await));

    // Back to the committed text: HEAD has not moved and the tree is clean
    write(root, "src/session.rs", SESSION_RS);
    let outcome = handle.refresh(RefreshMode::Incremental).await.unwrap();
    assert_eq!(outcome.kind, RefreshKind::Incremental);
    assert_eq!(outcome.files_indexed, 1);
    let session_after = chunks_by_id(&handle, "src/session.rs").await;
    assert!(!has_hack(&session_after));
    assert_eq!(session_after, session_before);

    let outcome = handle.refresh(RefreshMode::Incremental).await.unwrap();
    assert_eq!(outcome.kind, RefreshKind::Unchanged);
}

#[tokio::test]
async fn test_incremental_without_recorded_revision_rebuilds() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/session.rs", SESSION_RS);
    let handle = hash_handle(dir.path());
    handle.refresh(RefreshMode::Full).await.unwrap();

    if handle.status().await.git_revision.is_none() {
        let outcome = handle.refresh(RefreshMode::Incremental).await.unwrap();
        assert_eq!(outcome.kind, RefreshKind::Full);
    }
}

#[tokio::test]
async fn test_open_handle_picks_up_generation_published_elsewhere() {
    let dir = tempdir().unwrap();
    let manifest = tempdir().unwrap();
    write(dir.path(), "src/session.rs", SESSION_RS);
    write(
        manifest.path(),
        "semindex.json",
        &format!(r#"{{"embeddingModel": "hash:{DIMS}", "contextualRetrieval": "never"}}"#),
    );

    let handle = hash_handle(dir.path());
    handle.refresh(RefreshMode::Full).await.unwrap();
    let first = handle.layout().current().unwrap().unwrap();
    let response = handle.query(&QueryRequest::new("charge invoice")).await.unwrap();
    assert!(response.results.iter().all(|r| r.file_path != "src/billing.rs"));

    // A separate CLI process rebuilds while this handle stays open
    write(dir.path(), "src/billing.rs", BILLING_RS);
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_semindex"))
        .arg("--root")
        .arg(dir.path())
        .arg("--config")
        .arg(manifest.path().join("semindex.json"))
        .args(["--quiet", "refresh", "--full"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "refresh failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let second = handle.layout().current().unwrap().unwrap();
    assert_ne!(first, second);

    let response = handle.query(&QueryRequest::new("charge invoice")).await.unwrap();
    assert_eq!(response.results[0].file_path, "src/billing.rs");
    let status = handle.status().await;
    assert_eq!(status.state, IndexState::Ready);
    assert_eq!(status.sources.codebase.files, 2);
}
