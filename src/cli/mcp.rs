//! MCP server exposing the query tool over stdio.

use anyhow::Result;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::index::IndexHandle;
use crate::search::QueryRequest;

#[derive(Clone)]
pub struct SemindexServer {
    handle: Arc<IndexHandle>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SemindexServer {
    pub fn new(handle: Arc<IndexHandle>) -> Self {
        Self {
            handle,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Search the project's code, docs and database schema for relevant chunks. \
                       Returns ranked results with file path, line range, language, content type \
                       and score, plus index_status (fresh, stale or missing). When the index is \
                       missing the result list is empty; fall back to plain text search."
    )]
    async fn query(
        &self,
        Parameters(request): Parameters<QueryRequest>,
    ) -> Result<CallToolResult, McpError> {
        if request.query.trim().is_empty() {
            return Ok(CallToolResult::error(vec![Content::text(
                "query must not be empty",
            )]));
        }
        match self.handle.query(&request).await {
            Ok(response) => json_result(&response),
            Err(err) => Ok(CallToolResult::error(vec![Content::text(format!(
                "query failed: {err}"
            ))])),
        }
    }

    #[tool(description = "Report index freshness, chunk and file counts, and storage size.")]
    async fn status(&self) -> Result<CallToolResult, McpError> {
        let status = self.handle.status().await;
        json_result(&status)
    }
}

fn json_result<T: serde::Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

#[tool_handler]
impl ServerHandler for SemindexServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Hybrid semantic + keyword search over this project. Call `query` before \
                 reading files to start from ranked, relevant locations."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Serve until the client disconnects
pub async fn run_mcp_server(root: PathBuf, config: Config) -> Result<()> {
    let handle = Arc::new(IndexHandle::open(root, config)?);
    info!(root = %handle.root().display(), "Starting MCP server");

    // A session start may warrant a refresh; queries keep using the
    // current generation until it is published.
    let refresher = handle.clone();
    tokio::spawn(async move {
        match refresher.refresh_on_session_start().await {
            Ok(Some(outcome)) => info!(kind = ?outcome.kind, "Session start refresh finished"),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Session start refresh failed"),
        }
    });

    let service = SemindexServer::new(handle).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
