//! Change resolvers merge change records uploaded by devices into the
//! current content of a file.
//!
//! A file opts into merging by naming a resolver when its first version is
//! uploaded. Later versions are uploaded as change records and merged by the
//! reconciliation worker.

mod comment_file;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

pub use comment_file::CommentFile;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Invalid file content: {0}")]
    InvalidContent(String),

    #[error("Invalid change record: {0}")]
    InvalidChange(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Merge algorithm for one kind of file.
pub trait ChangeResolver: Send + Sync {
    /// Name stored on uploads and index rows to select this resolver.
    fn name(&self) -> &'static str;

    /// Check that the content of a first version can be merged into later.
    fn validate_v0(&self, content: &[u8]) -> Result<(), ResolverError>;

    /// Apply `changes`, in order, to `existing` and return the new content.
    fn merge(&self, existing: &[u8], changes: &[Vec<u8>]) -> Result<Vec<u8>, ResolverError>;
}

/// Resolvers available to the server, keyed by name.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn ChangeResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every resolver shipped with this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CommentFile));
        registry
    }

    /// Add a resolver, replacing any earlier one with the same name.
    pub fn register(&mut self, resolver: Arc<dyn ChangeResolver>) {
        self.resolvers.insert(resolver.name().to_string(), resolver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChangeResolver>> {
        self.resolvers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolvers.contains_key(name)
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.resolvers.keys().collect();
        names.sort();
        f.debug_struct("ResolverRegistry")
            .field("resolvers", &names)
            .finish()
    }
}
