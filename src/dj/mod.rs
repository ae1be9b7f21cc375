//! The DJ pipeline: decide, generate, synthesize, register, enqueue.

mod guardrails;
mod job;
mod pipeline;

pub use guardrails::{TextGuardrails, DEFAULT_FORBIDDEN_TOKENS};
pub use job::{dedup_key, DjJobReport, DjJobSpec, DjJobState, DjStatusBoard, DjStatusView};
pub use pipeline::{
    DjPipeline, DjPipelineSettings, DEFAULT_INTRO_PROMPT, DEFAULT_OUTRO_PROMPT,
    DEFAULT_STYLE_HINTS,
};
