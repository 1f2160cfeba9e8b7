//! Glossary storage and term extraction

pub mod extractor;
pub mod store;
