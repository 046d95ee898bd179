use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Instant;

use crate::chunker::ContentType;
use crate::config::{build_glob_set, Config};
use crate::index::{IndexHandle, IndexStatus, RefreshKind, RefreshMode, RefreshOutcome};
use crate::search::{QueryFilters, QueryRequest, ScoredChunk, SearchOptions};
use crate::vectordb::{Filters, Scope};
use crate::{info_print, warn_print};

fn open(root: PathBuf, config: Config) -> Result<IndexHandle> {
    let handle = IndexHandle::open(root, config).context("failed to open index")?;
    Ok(handle.with_progress(!crate::output::is_quiet()))
}

pub async fn init(root: PathBuf, config: Config, dry_run: bool, force: bool) -> Result<()> {
    let handle = open(root, config)?;

    info_print!("{}", "semindex init".bright_cyan().bold());
    info_print!("{}", "=".repeat(60));
    info_print!("📂 Project: {}", handle.root().display());
    info_print!("💾 Index:   {}", handle.layout().dir().display());
    info_print!("🧠 Model:   {}", handle.embedder().provider().name());

    if dry_run {
        info_print!("\n{}", "🔍 DRY RUN".bright_yellow());
        let start = Instant::now();
        let report = handle.estimate().await?;
        println!("   Files:            {}", report.files);
        println!("   Code chunks:      {}", report.code_chunks);
        println!("   Schema chunks:    {}", report.database_chunks);
        println!("   Estimated tokens: {}", report.estimated_tokens);
        match report.estimated_cost_usd {
            Some(cost) => println!("   Embedding cost:   ~${cost:.4}"),
            None => println!("   Embedding cost:   local (free)"),
        }
        println!(
            "   Contextual:       {}",
            if report.would_enrich { "yes" } else { "no" }
        );
        info_print!("\n{} in {:?}", "Dry run complete".green(), start.elapsed());
        return Ok(());
    }

    if handle.is_initialized().await && !force {
        warn_print!("\n{}", "⚠️  Index already exists!".yellow());
        warn_print!(
            "   Use {} to rebuild, or {} to update",
            "--force".bright_cyan(),
            "semindex refresh".bright_cyan()
        );
        return Ok(());
    }

    let outcome = handle.refresh(RefreshMode::Full).await?;
    print_outcome(&outcome);
    info_print!(
        "   Run {} to search your project",
        "semindex search <query>".bright_cyan()
    );
    Ok(())
}

pub async fn refresh(
    root: PathBuf,
    config: Config,
    full: bool,
    files: Vec<String>,
    json: bool,
) -> Result<()> {
    let handle = open(root, config)?;
    let mode = if full {
        RefreshMode::Full
    } else if !files.is_empty() {
        RefreshMode::Files(files)
    } else {
        RefreshMode::Incremental
    };

    let outcome = handle.refresh(mode).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &RefreshOutcome) {
    let headline = match outcome.kind {
        RefreshKind::Full => "✨ Full build complete",
        RefreshKind::Incremental => "✨ Incremental refresh complete",
        RefreshKind::Unchanged => "✅ Index already up to date",
    };
    info_print!("\n{}", headline.bright_green().bold());
    info_print!("{}", "-".repeat(60));
    info_print!("   Files indexed:   {}", outcome.files_indexed);
    if outcome.files_removed > 0 {
        info_print!("   Files removed:   {}", outcome.files_removed);
    }
    info_print!("   Chunks embedded: {}", outcome.chunks_embedded);
    info_print!(
        "   Codebase:        {} chunks in {} files",
        outcome.sources.codebase.chunks,
        outcome.sources.codebase.files
    );
    if outcome.sources.database.chunks > 0 {
        info_print!(
            "   Database:        {} tables",
            outcome.sources.database.chunks
        );
    }
    if outcome.contextual {
        info_print!("   Contextual descriptions: on");
    }
    info_print!("   Took {} ms", outcome.duration_ms);
}

/// Options for `semindex search`
pub struct SearchArgs {
    pub query: String,
    pub top_k: Option<usize>,
    pub weight: Option<f32>,
    pub content_type: Option<String>,
    pub languages: Vec<String>,
    pub paths: Vec<String>,
    pub scope: String,
    pub rerank: bool,
    pub content: bool,
    pub json: bool,
}

pub async fn search(root: PathBuf, config: Config, args: SearchArgs) -> Result<()> {
    let kind = args
        .content_type
        .as_deref()
        .map(str::parse::<ContentType>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let scope: Scope = args.scope.parse().map_err(anyhow::Error::msg)?;

    let mut config = config;
    if args.rerank {
        config.search.reranking = true;
    }
    if let Some(weight) = args.weight {
        if !(0.0..=1.0).contains(&weight) {
            anyhow::bail!("--weight must be between 0.0 and 1.0");
        }
        config.search.hybrid_weight = weight;
    }
    let handle = open(root, config)?;
    if let Err(err) = handle.refresh_on_session_start().await {
        warn_print!("{} {}", "⚠️  Refresh before search failed:".yellow(), err);
    }

    if args.json {
        let request = QueryRequest {
            query: args.query,
            filters: Some(QueryFilters {
                file_patterns: (!args.paths.is_empty()).then_some(args.paths),
                languages: (!args.languages.is_empty()).then_some(args.languages),
                content_type: kind,
            }),
            top_k: args.top_k,
        };
        let response = handle.query(&request).await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let top_k = args.top_k.unwrap_or(handle.config().search.top_k);
    let path_filter = if args.paths.is_empty() {
        None
    } else {
        Some(build_glob_set(&args.paths)?)
    };
    let options = SearchOptions {
        top_k: if path_filter.is_some() { top_k * 5 } else { top_k },
        weight: handle.config().search.hybrid_weight,
        scope,
        filters: Filters {
            kind,
            languages: args.languages,
        },
        rerank: handle.config().search.reranking,
    };

    let start = Instant::now();
    let status = handle.status().await;
    if status.index_status == IndexStatus::Missing {
        println!("{}", "❌ No index found!".red());
        println!("   Run {} first", "semindex init".bright_cyan());
        return Ok(());
    }
    if status.index_status == IndexStatus::Stale {
        warn_print!(
            "{}",
            "⚠️  Index is stale; results may be out of date. Run `semindex refresh`.".yellow()
        );
    }

    let mut results = handle.search(&args.query, &options).await?;
    if let Some(set) = &path_filter {
        results.retain(|r| set.is_match(&r.chunk.file_path));
    }
    results.truncate(top_k);

    println!("{}", "🔍 Search Results".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    println!("Query: \"{}\"", args.query.bright_yellow());
    println!("Found {} results in {:?}", results.len(), start.elapsed());
    println!();

    if results.is_empty() {
        println!("{}", "No matches found.".dimmed());
        println!("Try:");
        println!("  - Using different keywords");
        println!("  - Lowering --weight to lean on keyword matches");
        println!("  - Running {} if the project changed", "semindex refresh".bright_cyan());
        return Ok(());
    }

    for result in &results {
        print_result(result, args.content);
    }
    Ok(())
}

fn print_result(result: &ScoredChunk, show_content: bool) {
    let chunk = &result.chunk;
    println!("{}", "─".repeat(60));
    println!("{}", format!("📄 {}", chunk.file_path).bright_green());

    let location = format!(
        "   Lines {}-{} • {} • {}",
        chunk.line_range.0, chunk.line_range.1, chunk.kind, chunk.language
    );
    println!("{}", location.dimmed());
    if let Some(symbol) = &chunk.symbol {
        println!("   {}", symbol.bright_cyan());
    }

    let score_text = format!(
        "   Score: {:.3} (vector {:.3}, keyword {:.3})",
        result.score, result.vector_score, result.keyword_score
    );
    if result.score > 0.8 {
        println!("{}", score_text.green());
    } else if result.score > 0.5 {
        println!("{}", score_text.yellow());
    } else {
        println!("{}", score_text.red());
    }

    if let Some(context) = &chunk.context {
        println!("   Context: {}", context.dimmed());
    }

    if show_content {
        println!("\n   {}:", "Content".bright_yellow());
        for line in chunk.content.lines().take(20) {
            println!("   │ {}", line.dimmed());
        }
        if chunk.content.lines().count() > 20 {
            println!("   │ {}", "...".dimmed());
        }
    } else {
        let snippet: String = chunk.content.lines().take(3).collect::<Vec<_>>().join(" ");
        let snippet = match snippet.char_indices().nth(100) {
            Some((idx, _)) => format!("{}...", &snippet[..idx]),
            None => snippet,
        };
        println!("   {}", snippet.dimmed());
    }
    println!();
}

pub async fn status(root: PathBuf, config: Config, json: bool) -> Result<()> {
    let handle = open(root, config)?;
    let status = handle.status().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "📊 Index Status".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    let label = match status.index_status {
        IndexStatus::Fresh => "fresh".green(),
        IndexStatus::Stale => "stale".yellow(),
        IndexStatus::Missing => "missing".red(),
    };
    println!("   Status:        {label}");
    println!("   State:         {}", status.state);
    println!("   Index dir:     {}", status.index_dir.display());
    if status.index_status == IndexStatus::Missing {
        println!("\n   Run {} to build the index", "semindex init".bright_cyan());
        return Ok(());
    }

    println!(
        "   Codebase:      {} chunks in {} files",
        status.sources.codebase.chunks, status.sources.codebase.files
    );
    println!(
        "   Database:      {} chunks in {} tables",
        status.sources.database.chunks, status.sources.database.files
    );
    if let Some(model) = &status.embedding_model {
        println!("   Model:         {model}");
    }
    if let Some(refreshed) = status.last_refreshed {
        println!("   Refreshed:     {}", refreshed.to_rfc3339());
    }
    if let Some(revision) = &status.git_revision {
        println!("   Revision:      {}", &revision[..revision.len().min(12)]);
    }
    println!(
        "   Storage:       {:.2} MB",
        status.storage_bytes as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}

pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

