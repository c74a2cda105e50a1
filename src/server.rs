use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};

use crate::error::ParliamentError;
use crate::query::{
    ContributionResults, ContributorsRequest, DebateTitleSearchRequest, DiscoverRequest,
    HansardSearchRequest, QueryHandler, QuestionSearchRequest, RecommendRequest,
};
use crate::response::{ToolMetadata, ToolResponse};

#[derive(Clone)]
pub struct ParliamentServer {
    handler: Arc<QueryHandler>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ParliamentServer {
    pub fn new(handler: Arc<QueryHandler>) -> Self {
        Self {
            handler,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "search_hansard_contributions",
        description = "Search Hansard contributions (speeches in Parliament) by semantic + keyword relevance, with filters for member, debate, house, and date range. Set group_by (e.g. 'DebateSectionExtId' or 'MemberId') to diversify results across debates or speakers. Omit query to browse the most recent matching contributions.",
        annotations(read_only_hint = true)
    )]
    async fn search_hansard_contributions(
        &self,
        Parameters(req): Parameters<HansardSearchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        match self.handler.search_hansard_contributions(&req).await {
            Ok(results) => {
                let count = match &results {
                    ContributionResults::Flat(hits) => hits.len(),
                    ContributionResults::Grouped(groups) => groups.len(),
                };
                finish("search_hansard_contributions", start, &results, Some(count))
            }
            Err(e) => fail("search_hansard_contributions", start, e),
        }
    }

    #[tool(
        name = "search_debate_titles",
        description = "Find debates by title text and/or date range. Returns debates with at least two recorded contributions, newest first. Requires a query or a date bound.",
        annotations(read_only_hint = true)
    )]
    async fn search_debate_titles(
        &self,
        Parameters(req): Parameters<DebateTitleSearchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        match self.handler.search_debate_titles(&req).await {
            Ok(debates) => {
                let count = debates.len();
                finish("search_debate_titles", start, &debates, Some(count))
            }
            Err(e) => fail("search_debate_titles", start, e),
        }
    }

    #[tool(
        name = "find_relevant_contributors",
        description = "Find the members who have spoken most relevantly about a topic. Returns one group per member with their top contributions.",
        annotations(read_only_hint = true)
    )]
    async fn find_relevant_contributors(
        &self,
        Parameters(req): Parameters<ContributorsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        match self.handler.find_relevant_contributors(&req).await {
            Ok(groups) => {
                let count = groups.len();
                finish("find_relevant_contributors", start, &groups, Some(count))
            }
            Err(e) => fail("find_relevant_contributors", start, e),
        }
    }

    #[tool(
        name = "recommend_contributions",
        description = "Find contributions similar to the given example point ids (and dissimilar to optional negative examples). Use chunk ids returned by search_hansard_contributions.",
        annotations(read_only_hint = true)
    )]
    async fn recommend_contributions(
        &self,
        Parameters(req): Parameters<RecommendRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        match self.handler.recommend_contributions(&req).await {
            Ok(hits) => {
                let count = hits.len();
                finish("recommend_contributions", start, &hits, Some(count))
            }
            Err(e) => fail("recommend_contributions", start, e),
        }
    }

    #[tool(
        name = "discover_contributions",
        description = "Discover contributions around a target point id, steered by (positive, negative) context pairs. Use chunk ids returned by search_hansard_contributions.",
        annotations(read_only_hint = true)
    )]
    async fn discover_contributions(
        &self,
        Parameters(req): Parameters<DiscoverRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        match self.handler.discover_contributions(&req).await {
            Ok(hits) => {
                let count = hits.len();
                finish("discover_contributions", start, &hits, Some(count))
            }
            Err(e) => fail("discover_contributions", start, e),
        }
    }

    #[tool(
        name = "search_parliamentary_questions",
        description = "Search written parliamentary questions and their answers, with filters for party, asking member, answering body, and tabled date range. Returns full question and answer text, most recent first.",
        annotations(read_only_hint = true)
    )]
    async fn search_parliamentary_questions(
        &self,
        Parameters(req): Parameters<QuestionSearchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        match self.handler.search_parliamentary_questions(&req).await {
            Ok(questions) => {
                let count = questions.len();
                finish("search_parliamentary_questions", start, &questions, Some(count))
            }
            Err(e) => fail("search_parliamentary_questions", start, e),
        }
    }
}

fn finish<T: serde::Serialize>(
    tool_name: &str,
    start: Instant,
    value: &T,
    result_count: Option<usize>,
) -> Result<CallToolResult, McpError> {
    let json =
        serde_json::to_string(value).map_err(|e| McpError::internal_error(e.to_string(), None))?;
    let response = ToolResponse::success(
        json,
        ToolMetadata {
            tool_name: tool_name.to_string(),
            result_count,
            duration_seconds: start.elapsed().as_secs_f64(),
        },
    );
    Ok(response.into_call_tool_result())
}

fn fail(
    tool_name: &str,
    start: Instant,
    error: ParliamentError,
) -> Result<CallToolResult, McpError> {
    if let ParliamentError::Validation(message) = error {
        return Err(McpError::invalid_params(message, None));
    }
    tracing::warn!("{tool_name} failed: {error}");
    let response = ToolResponse::error(
        error.to_string(),
        ToolMetadata {
            tool_name: tool_name.to_string(),
            result_count: None,
            duration_seconds: start.elapsed().as_secs_f64(),
        },
    );
    Ok(response.into_call_tool_result())
}

#[tool_handler]
impl ServerHandler for ParliamentServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "parliament-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Parliament MCP: hybrid search over UK parliamentary records.\n\n\
                 Tools:\n\
                 - `search_hansard_contributions`: Semantic + keyword search over speeches, \
                 with member/debate/house/date filters. Set `group_by` to diversify across \
                 debates or speakers.\n\
                 - `search_debate_titles`: Find debates by title and/or date; only debates \
                 with two or more recorded contributions are returned.\n\
                 - `find_relevant_contributors`: Who speaks about a topic — one group per \
                 member with their most relevant contributions.\n\
                 - `recommend_contributions`: More-like-this from example chunk ids.\n\
                 - `discover_contributions`: Contextual discovery around a target chunk id.\n\
                 - `search_parliamentary_questions`: Written questions and answers with \
                 party/member/answering-body/date filters, reassembled to full text.\n\n\
                 Dates are YYYY-MM-DD and day-inclusive. Every search tool accepts \
                 `max_results`. Responses are JSON envelopes with `status`, `content` \
                 (the serialized results), and timing metadata."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
