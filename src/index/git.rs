//! Change detection through the `git` CLI.

use crate::error::{Error, Result};
use crate::file::normalize_rel_path;
use std::collections::BTreeSet;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Paths touched since a revision, classified by whether they still exist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl ChangeSet {
    /// Classify root-relative paths against the working tree
    pub fn classify<I, S>(root: &Path, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for path in paths {
            let path = normalize_rel_path(path.as_ref());
            if path.is_empty() {
                continue;
            }
            if root.join(&path).is_file() {
                set.modified.insert(path);
            } else {
                set.deleted.insert(path);
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modified.len() + self.deleted.len()
    }

    /// Every touched path
    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.modified.iter().chain(self.deleted.iter())
    }

    pub fn union(mut self, other: ChangeSet) -> Self {
        self.modified.extend(other.modified);
        self.deleted.extend(other.deleted);
        self.deleted.retain(|path| !self.modified.contains(path));
        self
    }

    /// Keep only the paths `keep` accepts
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.modified.retain(|path| keep(path));
        self.deleted.retain(|path| keep(path));
    }
}

async fn git(root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .await
        .map_err(|e| Error::Other(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        return Err(Error::Other(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Current `HEAD` commit, or `None` outside a repository
pub async fn head_revision(root: &Path) -> Option<String> {
    git(root, &["rev-parse", "HEAD"])
        .await
        .ok()
        .map(|out| out.trim().to_string())
        .filter(|rev| !rev.is_empty())
}

/// Files changed between `since` and `HEAD`, plus uncommitted and
/// untracked changes, relative to `root`.
pub async fn changed_files(root: &Path, since: &str) -> Result<ChangeSet> {
    let prefix = show_prefix(root).await?;
    let committed = git(root, &["diff", "--name-status", "--no-renames", since, "HEAD"]).await?;

    let touched: Vec<String> = parse_name_status(&committed)
        .into_iter()
        .filter_map(|path| strip_prefix(&path, &prefix))
        .chain(uncommitted_with_prefix(root, &prefix).await?)
        .collect();

    let changes = ChangeSet::classify(root, touched);
    debug!(
        since,
        modified = changes.modified.len(),
        deleted = changes.deleted.len(),
        "Detected git changes"
    );
    Ok(changes)
}

/// Modified, staged and untracked paths in the working tree, relative to `root`
pub async fn uncommitted_files(root: &Path) -> Result<Vec<String>> {
    let prefix = show_prefix(root).await?;
    uncommitted_with_prefix(root, &prefix).await
}

async fn uncommitted_with_prefix(root: &Path, prefix: &str) -> Result<Vec<String>> {
    let status = git(root, &["status", "--porcelain", "--untracked-files=all"]).await?;
    Ok(parse_porcelain(&status)
        .into_iter()
        .filter_map(|path| strip_prefix(&path, prefix))
        .map(|path| normalize_rel_path(&path))
        .collect())
}

async fn show_prefix(root: &Path) -> Result<String> {
    Ok(git(root, &["rev-parse", "--show-prefix"]).await?.trim().to_string())
}

/// Paths from `git diff --name-status`
pub fn parse_name_status(output: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for line in output.lines() {
        let mut fields = line.split('\t');
        let Some(status) = fields.next() else {
            continue;
        };
        if status.is_empty() {
            continue;
        }
        // Renames and copies list source then destination
        paths.extend(fields.filter(|f| !f.is_empty()).map(unquote));
    }
    paths
}

/// Paths from `git status --porcelain` (v1)
pub fn parse_porcelain(output: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for line in output.lines() {
        if line.len() < 4 {
            continue;
        }
        let rest = &line[3..];
        match rest.split_once(" -> ") {
            Some((from, to)) => {
                paths.push(unquote(from));
                paths.push(unquote(to));
            }
            None => paths.push(unquote(rest)),
        }
    }
    paths
}

fn unquote(path: &str) -> String {
    let path = path.trim();
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}

/// Repository-relative path to project-relative, dropping paths outside
fn strip_prefix(path: &str, prefix: &str) -> Option<String> {
    if prefix.is_empty() {
        return Some(path.to_string());
    }
    path.strip_prefix(prefix).map(str::to_string)
}
