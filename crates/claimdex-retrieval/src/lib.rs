pub mod context;
pub mod engine;
pub mod extract;
pub mod generation;
pub mod merge;
pub mod router;
pub mod section;
pub mod summary;

pub use context::render_context;
pub use engine::{ComputationRequest, ComputationTool, QueryEngine, QueryOutcome};
pub use extract::{find_operands, OperandKind, OperandSpan};
pub use generation::{generation_table, ActiveIndex, GenerationBuilder, GenerationManifest, IndexGeneration};
pub use merge::AutoMergingRetriever;
pub use router::{QueryRouter, RouteCategory, RouteDecision, RoutePath};
pub use section::SectionFilterResolver;
pub use summary::{LeadSummarizer, SectionSummary, Summarizer, SummaryIndex};
