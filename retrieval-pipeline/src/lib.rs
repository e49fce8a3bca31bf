pub mod answer;
pub mod hybrid;
pub mod keyword;
pub mod llm;
pub mod multihop;
pub mod orchestrator;
pub mod prompts;
pub mod vector;

pub use answer::{parse_llm_json_response, AnswerMode, Block, Source};
pub use hybrid::{highest_score, HybridResult, HybridRetriever, HybridWeights};
pub use multihop::{MultiHopController, MultiHopOutcome};
pub use orchestrator::{AnswerEngine, ChatAnswer, StreamFrame};
pub use vector::{PineconeIndex, UpsertItem, VectorIndex, VectorMatch};
