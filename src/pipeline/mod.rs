//! Prompt construction and the per-unit translation pipeline

pub mod prompts;
pub mod translator;
