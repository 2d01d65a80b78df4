//! Resource type classification with a single-flight cache.
//!
//! Every worker resolves its record's type before decrypting. Types repeat
//! heavily across a vault, so resolutions are memoized per type identifier
//! for the lifetime of the owning session. Concurrent first requests for
//! the same unseen identifier share one in-flight lookup; distinct
//! identifiers resolve independently.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

use crate::Result;
use crate::error::SiftError;
use crate::models::{ResolvedType, UNKNOWN_TYPE_LABEL};

/// Looks up the slug of a resource type identifier.
///
/// Implementations typically call the server; the classifier guarantees at
/// most one successful call per identifier per session.
#[async_trait]
pub trait TypeResolver: Send + Sync {
    /// Returns the type slug for `type_id`
    async fn lookup(&self, type_id: &str) -> Result<String>;
}

/// Memoizing resolver of `ResolvedType`s.
///
/// The map lock is only held to fetch or insert a key's cell and is never
/// held across an await. The per-key `OnceCell` is the single-flight guard.
pub struct TypeClassifier {
    resolver: Arc<dyn TypeResolver>,
    cells: Mutex<HashMap<String, Arc<OnceCell<ResolvedType>>>>,
}

impl std::fmt::Debug for TypeClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeClassifier")
            .field("resolved", &self.len())
            .finish_non_exhaustive()
    }
}

impl TypeClassifier {
    /// Creates a classifier with an empty cache.
    pub fn new(resolver: Arc<dyn TypeResolver>) -> Self {
        Self {
            resolver,
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell_for(&self, type_id: &str) -> Arc<OnceCell<ResolvedType>> {
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            cells
                .entry(type_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }

    /// Resolves `type_id`, consulting the cache first.
    ///
    /// A failed lookup is not cached: the error is returned to this caller
    /// (and reported as a per-item failure) and the next requester retries.
    ///
    /// # Errors
    /// Returns `SiftError::TypeResolution` if the resolver fails.
    pub async fn resolve(&self, type_id: &str) -> Result<ResolvedType> {
        let cell = self.cell_for(type_id);

        let resolved = cell
            .get_or_try_init(|| async {
                tracing::debug!("Resolving resource type {}", type_id);
                let slug = self
                    .resolver
                    .lookup(type_id)
                    .await
                    .map_err(|e| SiftError::type_resolution(type_id, e))?;
                Ok::<_, SiftError>(ResolvedType::from_slug(type_id, slug))
            })
            .await?;

        Ok(resolved.clone())
    }

    /// Returns the cached resolution without triggering a lookup.
    pub fn cached(&self, type_id: &str) -> Option<ResolvedType> {
        let cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.get(type_id).and_then(|cell| cell.get().cloned())
    }

    /// Human readable label for reports, `"unknown"` if never resolved.
    pub fn label_for(&self, type_id: &str) -> String {
        self.cached(type_id)
            .map(|resolved| resolved.slug)
            .unwrap_or_else(|| UNKNOWN_TYPE_LABEL.to_string())
    }

    /// Number of successfully resolved identifiers
    pub fn len(&self) -> usize {
        let cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached resolution
    pub fn clear(&self) {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
