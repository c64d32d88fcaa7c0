//! prompt-fence - signed trust fences for LLM prompts
//!
//! Wraps spans of prompt text in `<sec:fence>` markers that carry a content
//! role, a trust rating, provenance and an HMAC-SHA256 signature, and
//! recovers and checks those markers from arbitrary text.

pub mod builder;
pub mod config;
pub mod error;
pub mod render;
pub mod signer;
pub mod types;
pub mod verifier;

pub use builder::{FencedPrompt, PromptBuilder, AWARENESS_INSTRUCTIONS};
pub use config::{FenceConfig, KeyConfig};
pub use error::{ErrorKind, FenceError, FenceResult};
pub use render::{escape_attr, escape_text, render_fence, FenceHeader};
pub use signer::{canonical_bytes, KeyRing, SigningKey};
pub use types::{
    current_timestamp, validate_timestamp, FenceRating, FenceSegment, FenceType,
    SegmentDraft, VerificationResult, VerifiedFence,
};
pub use verifier::Verifier;
