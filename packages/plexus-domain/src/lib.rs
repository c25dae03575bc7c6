pub mod anomaly;
pub mod budget;
pub mod candidate;
pub mod fusion;
pub mod limiter;
pub mod rerank;
pub mod slo;

pub use anomaly::EwmaDetector;
pub use budget::LatencyBudget;
pub use candidate::{Candidate, CandidateOrigin, RetrieverKind, cmp_f64_desc};
pub use fusion::{FusionAlgorithm, dedupe_stage, fuse};
pub use limiter::RateLimiter;
pub use rerank::{RerankStrategy, cosine_similarity, hybrid_rerank, mmr_select, token_overlap};
pub use slo::{OutcomeSample, RollingSloWindow, SloSnapshot};
