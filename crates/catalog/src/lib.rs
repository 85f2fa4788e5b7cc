//! Model listing, selection, and version-aware ordering.

pub mod catalog;
pub mod selector;
pub mod version;

pub use catalog::ModelCatalog;
pub use selector::{ModelSelector, DEFAULT_MODELS};
pub use version::{order_lexical, sort_versioned, version_cmp};
