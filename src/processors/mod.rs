//! Document processors

pub mod batch;
pub mod markdown;
pub mod splitter;
