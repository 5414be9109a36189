pub mod answer_retrieval;
pub mod cache;
pub mod pipeline;
pub mod providers;
pub mod query_expansion;
pub mod reranking;
pub mod service;

pub use answer_retrieval::{AnswerResult, AnswerStatus, AnswerSynthesizer};
pub use pipeline::{
    run_pipeline, PipelineRunOutput, PipelineStageTimings, RetrievalConfig, RetrievalTuning,
    SearchMode,
};
pub use service::{AnswerPipeline, QuestionAnswering};
