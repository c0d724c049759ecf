//! Retriever registry mapping type tags to constructors.

use std::collections::HashMap;
use std::sync::Arc;

use crate::retriever::local_dir::{LOCAL_DIR_KIND, LocalDirRetriever};
use crate::retriever::{Retriever, RetrieverContext, RetrieverError};

/// Constructor building a retriever from its context and raw config blob.
///
/// Constructors must not perform I/O; that belongs in `startup`.
pub type RetrieverConstructor = Arc<
    dyn Fn(RetrieverContext, serde_json::Value) -> Result<Box<dyn Retriever>, RetrieverError>
        + Send
        + Sync,
>;

/// Type tag to constructor mapping.
///
/// Built once at process start and shared read-only by all instrument tasks.
#[derive(Clone, Default)]
pub struct RetrieverRegistry {
    constructors: HashMap<String, RetrieverConstructor>,
}

impl std::fmt::Debug for RetrieverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrieverRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl RetrieverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all built-in retrievers registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(LOCAL_DIR_KIND, |ctx, config| {
            let retriever = LocalDirRetriever::from_config(ctx, config)?;
            Ok(Box::new(retriever) as Box<dyn Retriever>)
        });
        registry
    }

    /// Register a constructor for a type tag, replacing any previous one.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(RetrieverContext, serde_json::Value) -> Result<Box<dyn Retriever>, RetrieverError>
            + Send
            + Sync
            + 'static,
    {
        let kind = kind.into();
        tracing::debug!(kind = %kind, "Retriever type registered");
        self.constructors.insert(kind, Arc::new(constructor));
        self
    }

    /// Whether a type tag has a registered constructor.
    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered type tags, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build a retriever for an instrument.
    ///
    /// # Errors
    /// - `MissingType` if `kind` is `None`
    /// - `UnknownType` if no constructor is registered for `kind`
    /// - whatever the constructor returns, typically `Configuration`
    pub fn build(
        &self,
        kind: Option<&str>,
        ctx: RetrieverContext,
        config: serde_json::Value,
    ) -> Result<Box<dyn Retriever>, RetrieverError> {
        let kind = kind.ok_or(RetrieverError::MissingType)?;
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| RetrieverError::UnknownType(kind.to_owned()))?;
        constructor(ctx, config)
    }
}
