//! Question answering entry point: route, retrieve, hand off.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use claimdex_core::config::RetrievalConfig;
use claimdex_core::traits::Embedder;
use claimdex_core::types::RetrievalResult;
use claimdex_core::Result;

use crate::extract::{find_operands, OperandSpan};
use crate::generation::ActiveIndex;
use crate::merge::AutoMergingRetriever;
use crate::router::{RouteDecision, RoutePath};
use crate::section::SectionFilterResolver;

/// What the external computation tool receives: the question and the candidate
/// operands located in the retrieved context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationRequest {
    pub question: String,
    pub operands: Vec<OperandSpan>,
}

/// Deterministic calculator (date math, payout formulas) living outside the core.
pub trait ComputationTool: Send + Sync {
    fn name(&self) -> &str;
    fn compute(&self, request: &ComputationRequest) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub generation: u64,
    pub route: RouteDecision,
    pub result: RetrievalResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computation: Option<ComputationRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<serde_json::Value>,
    /// The tool's failure message; the retrieved context is still returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_error: Option<String>,
}

pub struct QueryEngine {
    active: Arc<ActiveIndex>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
    tool: Option<Box<dyn ComputationTool>>,
}

impl QueryEngine {
    pub fn new(active: Arc<ActiveIndex>, embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self { active, embedder, config, tool: None }
    }

    pub fn with_tool(mut self, tool: Box<dyn ComputationTool>) -> Self {
        self.tool = Some(tool);
        self
    }

    pub fn route(&self, question: &str) -> Result<RouteDecision> { Ok(self.active.current()?.router.route(question)) }

    /// Route `question` and run the chosen path against the current generation.
    /// Index failures propagate unchanged; an empty result is a valid answer,
    /// and so is a computation the tool could not finish.
    pub fn ask(&self, question: &str) -> Result<QueryOutcome> {
        let generation = self.active.current()?;
        let route = generation.router.route(question);
        let q = route.question.as_str();
        let embedder = self.embedder.as_ref();
        let retriever = AutoMergingRetriever::new(&generation.tree, generation.chunk_index.as_ref(), embedder, &self.config);

        let mut computation = None;
        let mut tool_output = None;
        let mut tool_error = None;
        let result = match &route.path {
            RoutePath::Summary => generation.summaries.query(embedder, q, self.config.summary_k)?,
            RoutePath::Needle => retriever.retrieve(q, self.config.needle_k)?,
            RoutePath::Section { label } => {
                SectionFilterResolver::new(&generation.tree, generation.chunk_index.as_ref(), embedder, &self.config)
                    .resolve(q, label, self.config.section_k)?
            }
            RoutePath::Computation => {
                let context = retriever.retrieve(q, self.config.computation_k)?;
                let request = ComputationRequest { question: q.to_string(), operands: find_operands(&context.fragments) };
                if let Some(tool) = &self.tool {
                    info!(tool = tool.name(), operands = request.operands.len(), "delegating to computation tool");
                    match tool.compute(&request) {
                        Ok(output) => tool_output = Some(output),
                        Err(e) => {
                            warn!(tool = tool.name(), error = %e, "computation tool failed");
                            tool_error = Some(e.to_string());
                        }
                    }
                }
                computation = Some(request);
                context
            }
            RoutePath::Hybrid => {
                let summary = generation.summaries.query(embedder, q, self.config.summary_k)?;
                let needle = retriever.retrieve(q, self.config.needle_k)?;
                let mut seen = HashSet::new();
                let fragments = summary.fragments.into_iter().chain(needle.fragments).filter(|f| seen.insert(f.id.clone())).collect();
                RetrievalResult::new(fragments)
            }
        };
        info!(
            generation = generation.id,
            path = %route.path.category(),
            fragments = result.len(),
            tier = ?result.tier.map(|t| t.number()),
            "answered retrieval"
        );
        Ok(QueryOutcome { generation: generation.id, route, result, computation, tool_output, tool_error })
    }
}
