use crate::error::Result;
use globset::GlobSet;
use ignore::WalkBuilder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

mod binary;
mod language;

pub use binary::{has_binary_extension, looks_binary};
pub use language::Language;

/// Files larger than this are skipped
pub const MAX_FILE_BYTES: u64 = 1_500_000;

/// Information about a discovered file
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    /// Path relative to the walk root with `/` separators
    pub rel_path: String,
    pub language: Language,
    pub size: u64,
}

/// Statistics about walked files
#[derive(Debug, Default, Clone)]
pub struct WalkStats {
    pub total_files: usize,
    pub indexable_files: usize,
    pub skipped_binary: usize,
    pub skipped_filtered: usize,
    pub files_by_language: HashMap<Language, usize>,
    pub total_size_bytes: u64,
}

impl WalkStats {
    pub fn add_file(&mut self, file: &FileInfo) {
        self.indexable_files += 1;
        self.total_size_bytes += file.size;
        *self.files_by_language.entry(file.language).or_insert(0) += 1;
    }

    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn log_summary(&self) {
        info!(
            total = self.total_files,
            indexable = self.indexable_files,
            binary = self.skipped_binary,
            filtered = self.skipped_filtered,
            "File discovery complete ({:.2} MB)",
            self.total_size_mb()
        );

        let mut langs: Vec<_> = self.files_by_language.iter().collect();
        langs.sort_by(|a, b| b.1.cmp(a.1));
        for (lang, count) in langs.iter().take(10) {
            debug!("  {}: {}", lang.tag(), count);
        }
    }
}

/// File walker that respects .gitignore plus include/exclude globs
pub struct FileWalker {
    root: PathBuf,
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    include_hidden: bool,
}

impl FileWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include: None,
            exclude: None,
            include_hidden: false,
        }
    }

    /// Only keep files matching this set (empty set keeps everything)
    pub fn include(mut self, set: GlobSet) -> Self {
        self.include = (!set.is_empty()).then_some(set);
        self
    }

    /// Drop files matching this set
    pub fn exclude(mut self, set: GlobSet) -> Self {
        self.exclude = (!set.is_empty()).then_some(set);
        self
    }

    /// Set whether to include hidden files (default: false)
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Walk files, returning detailed file information sorted by relative path
    pub fn walk(&self) -> Result<(Vec<FileInfo>, WalkStats)> {
        let mut files = Vec::new();
        let mut stats = WalkStats::default();

        debug!("Starting file walk in: {}", self.root.display());

        let mut builder = WalkBuilder::new(&self.root);
        builder
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .require_git(false)
            .hidden(!self.include_hidden)
            .add_custom_ignore_filename(".semindexignore");

        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Error walking file: {}", err);
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            stats.total_files += 1;

            let path = entry.path();
            let rel_path = relative_path(&self.root, path);

            if !self.accepts(&rel_path) || is_in_excluded_dir(Path::new(&rel_path)) {
                stats.skipped_filtered += 1;
                continue;
            }

            let language = Language::from_path(path);
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if !language.is_indexable() || has_binary_extension(path) || size > MAX_FILE_BYTES {
                stats.skipped_binary += 1;
                continue;
            }

            let file_info = FileInfo {
                path: path.to_path_buf(),
                rel_path,
                language,
                size,
            };
            stats.add_file(&file_info);
            files.push(file_info);
        }

        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        stats.log_summary();

        Ok((files, stats))
    }

    /// Whether a root-relative path passes the include/exclude globs
    pub fn accepts(&self, rel_path: &str) -> bool {
        let included = self
            .include
            .as_ref()
            .map_or(true, |set| set.is_match(rel_path));
        let excluded = self
            .exclude
            .as_ref()
            .is_some_and(|set| set.is_match(rel_path));
        included && !excluded
    }

    /// Describe a single root-relative path, if it is indexable
    pub fn file_info(&self, rel_path: &str) -> Option<FileInfo> {
        let path = self.root.join(rel_path);
        let meta = std::fs::metadata(&path).ok()?;
        let language = Language::from_path(&path);
        let indexable = meta.is_file()
            && self.accepts(rel_path)
            && !is_in_excluded_dir(Path::new(rel_path))
            && (self.include_hidden || !is_hidden(rel_path))
            && language.is_indexable()
            && !has_binary_extension(&path)
            && meta.len() <= MAX_FILE_BYTES;

        indexable.then(|| FileInfo {
            path,
            rel_path: normalize_rel_path(rel_path),
            language,
            size: meta.len(),
        })
    }
}

/// Read a file as text, returning `None` for binary or non-UTF-8 content
pub fn read_source(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    if looks_binary(&bytes) {
        return None;
    }
    String::from_utf8(bytes).ok()
}

/// Root-relative path with `/` separators
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    normalize_rel_path(&rel.to_string_lossy())
}

pub fn normalize_rel_path(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    normalized
        .strip_prefix("./")
        .unwrap_or(&normalized)
        .to_string()
}

/// Any component starting with a dot, matching what the walk skips
fn is_hidden(rel_path: &str) -> bool {
    normalize_rel_path(rel_path)
        .split('/')
        .any(|part| part.starts_with('.') && part != "." && part != "..")
}

/// Vendor, build and VCS directories inside the project are never indexed.
/// Takes a root-relative path so the project's own location does not count.
fn is_in_excluded_dir(path: &Path) -> bool {
    path.components().any(|c| {
        matches!(
            c.as_os_str().to_str().unwrap_or(""),
            "node_modules" | "target" | "dist" | "build" | "out"
                | ".git" | ".svn" | ".hg"
                | "__pycache__" | ".pytest_cache" | ".tox" | "venv" | ".venv"
                | "vendor" | ".bundle" | ".gradle" | ".idea" | ".vscode"
                | "coverage" | ".cache"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::build_glob_set;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_file_walker_basic() {
        let dir = TempDir::new().unwrap();

        fs::write(dir.path().join("test.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("test.py"), "print('hello')").unwrap();
        fs::write(dir.path().join("README.md"), "# Test").unwrap();
        fs::write(dir.path().join("logo.png"), [0u8, 1, 2]).unwrap();

        let walker = FileWalker::new(dir.path());
        let (files, stats) = walker.walk().unwrap();

        assert_eq!(files.len(), 3);
        assert_eq!(stats.indexable_files, 3);
        assert_eq!(files[0].rel_path, "README.md");
        assert_eq!(stats.files_by_language.get(&Language::Rust), Some(&1));
    }

    #[test]
    fn test_include_exclude_globs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/gen")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn a() {}").unwrap();
        fs::write(dir.path().join("src/gen/api.rs"), "pub fn b() {}").unwrap();
        fs::write(dir.path().join("notes.md"), "# notes").unwrap();

        let walker = FileWalker::new(dir.path())
            .include(build_glob_set(&["src/**".to_string()]).unwrap())
            .exclude(build_glob_set(&["src/gen/**".to_string()]).unwrap());
        let (files, stats) = walker.walk().unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["src/lib.rs"]);
        assert_eq!(stats.skipped_filtered, 2);
    }

    #[test]
    fn test_excluded_directories() {
        let dir = TempDir::new().unwrap();

        let node_modules = dir.path().join("node_modules");
        fs::create_dir(&node_modules).unwrap();
        fs::write(node_modules.join("package.js"), "test").unwrap();
        fs::write(dir.path().join("index.js"), "test").unwrap();

        let walker = FileWalker::new(dir.path());
        let (files, _) = walker.walk().unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "index.js");
    }

    #[test]
    fn test_project_inside_build_directory() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("build").join("app");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("target")).unwrap();
        fs::write(root.join("src/session.rs"), "pub fn check() {}").unwrap();
        fs::write(root.join("target/out.rs"), "pub fn gen() {}").unwrap();

        let walker = FileWalker::new(&root);
        let (files, _) = walker.walk().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "src/session.rs");

        assert!(walker.file_info("src/session.rs").is_some());
        assert!(walker.file_info("target/out.rs").is_none());
    }

    #[test]
    fn test_file_info_for_single_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.ts"), "export const a = 1;").unwrap();

        let walker = FileWalker::new(dir.path());
        let info = walker.file_info("a.ts").unwrap();
        assert_eq!(info.language, Language::TypeScript);
        assert!(walker.file_info("missing.ts").is_none());
    }

    #[test]
    fn test_file_info_skips_hidden_paths() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".vectorindex/gen-1")).unwrap();
        fs::write(dir.path().join(".vectorindex/gen-1/metadata.json"), "{}").unwrap();
        fs::write(dir.path().join(".eslintrc.json"), "{}").unwrap();

        let walker = FileWalker::new(dir.path());
        assert!(walker.file_info(".vectorindex/gen-1/metadata.json").is_none());
        assert!(walker.file_info(".eslintrc.json").is_none());
        assert!(walker.walk().unwrap().0.is_empty());

        let walker = FileWalker::new(dir.path()).include_hidden(true);
        assert!(walker.file_info(".eslintrc.json").is_some());
    }

    #[test]
    fn test_read_source_rejects_binary() {
        let dir = TempDir::new().unwrap();
        let text = dir.path().join("a.txt");
        let bin = dir.path().join("b.txt");
        fs::write(&text, "plain text").unwrap();
        fs::write(&bin, [0u8, 159, 146, 150]).unwrap();

        assert_eq!(read_source(&text).as_deref(), Some("plain text"));
        assert!(read_source(&bin).is_none());
    }

    #[test]
    fn test_normalize_rel_path() {
        assert_eq!(normalize_rel_path("./src\\main.rs"), "src/main.rs");
    }
}
