//! Markdown Term Translator - terminology-consistent English → Chinese
//! translation of Markdown documents
//!
//! Documents are split into protected spans and translatable prose, a shared
//! glossary is grown from the prose, and each unit goes through a draft,
//! critique and polish pass against a chat-completion service.

#![forbid(unsafe_code)]

pub mod cli;
pub mod core;
pub mod pipeline;
pub mod processors;
pub mod terminology;

// Re-export key types for convenience
pub use core::{
    cancel::CancelFlag,
    client::{ChatCompletionClient, LanguageModel, ResilientModel, RetryPolicy},
    config::TranslatorConfig,
    errors::TranslationError,
    models::{BatchReport, Document, FileReport, Segment, SegmentKind, TerminologyEntry},
};

pub use processors::{
    batch::{BatchCoordinator, BatchMode},
    markdown::MarkdownProcessor,
    splitter::Splitter,
};

pub use terminology::store::TerminologyStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
