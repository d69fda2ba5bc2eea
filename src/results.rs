//! Hierarchical result cache for one open job view.
//!
//! Serves the category → query → response tree on demand. Each node carries
//! its own lifecycle tag, so presence or absence of a fetch is an
//! inspectable fact instead of an artifact of render timing:
//!
//! ```text
//! Unloaded --expand--> Loading --ok--> Loaded
//!                         |
//!                         +-----err--> Failed --retry--> Loading
//! ```
//!
//! One in-flight fetch per node, indefinite positive caching, and no node's
//! transition ever touches a parent or sibling.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::api::{
    ApiError, Category, CategoryId, ExpandedQuery, JobApi, JobId, QueryId, RawLLMResponse,
};

// =============================================================================
// NODE STATE
// =============================================================================

/// Lifecycle tag of a single cache node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState<T> {
    /// Never expanded; no fetch has been issued.
    Unloaded,
    /// Exactly one fetch is in flight.
    Loading,
    /// Fetched successfully; cached until the view is discarded.
    Loaded(T),
    /// The fetch failed; the message is retained for display. Recoverable
    /// via retry.
    Failed(String),
}

impl<T> NodeState<T> {
    pub fn is_unloaded(&self) -> bool {
        matches!(self, NodeState::Unloaded)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, NodeState::Loading)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, NodeState::Loaded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, NodeState::Failed(_))
    }

    pub fn loaded(&self) -> Option<&T> {
        match self {
            NodeState::Loaded(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            NodeState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Address of one node in the result tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// The job's category list (root level).
    Categories,
    /// One category's query list.
    CategoryQueries(CategoryId),
    /// One query's response list.
    QueryResponses(QueryId),
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRef::Categories => f.write_str("categories"),
            NodeRef::CategoryQueries(id) => write!(f, "category:{id}"),
            NodeRef::QueryResponses(id) => write!(f, "query:{id}"),
        }
    }
}

/// Subscriber to node state changes. Callers deduplicated onto another
/// caller's in-flight fetch observe its completion through this seam.
#[async_trait]
pub trait ResultObserver: Send + Sync {
    async fn on_node_change(&self, node: &NodeRef);
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RetryError {
    /// Retry is only legal for a node in the failed state.
    #[error("node {0} is not in a failed state")]
    NotFailed(NodeRef),
}

// =============================================================================
// CACHE
// =============================================================================

struct Node<T> {
    state: NodeState<T>,
    /// Bumped on every transition into `Loading`. An in-flight result is
    /// applied only if the node still carries the epoch the fetch was
    /// issued under.
    epoch: u64,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            state: NodeState::Unloaded,
            epoch: 0,
        }
    }
}

struct Inner {
    categories: Node<Vec<Category>>,
    queries: HashMap<CategoryId, Node<Vec<ExpandedQuery>>>,
    responses: HashMap<QueryId, Node<Vec<RawLLMResponse>>>,
    focused: Option<QueryId>,
}

/// Per-job-view result cache. Discarding the view drops the cache whole;
/// nothing expires or gets invalidated within a session.
pub struct ResultCache {
    api: Arc<dyn JobApi>,
    job_id: JobId,
    observer: Option<Arc<dyn ResultObserver>>,
    inner: Mutex<Inner>,
}

enum Begin<T> {
    /// The caller owns the fetch, issued under this epoch.
    Fetch(u64),
    /// Nothing to do; the current state satisfies the caller.
    Snapshot(NodeState<T>),
}

impl ResultCache {
    pub fn new(api: Arc<dyn JobApi>, job_id: JobId) -> Self {
        Self {
            api,
            job_id,
            observer: None,
            inner: Mutex::new(Inner {
                categories: Node::default(),
                queries: HashMap::new(),
                responses: HashMap::new(),
                focused: None,
            }),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ResultObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    // -------------------------------------------------------------------------
    // Expansion
    // -------------------------------------------------------------------------

    /// Load the job's category list (the root node of the tree).
    pub async fn load_categories(&self) -> NodeState<Vec<Category>> {
        let fetch = self.api.job_categories(&self.job_id);
        self.expand(NodeRef::Categories, |inner| &mut inner.categories, fetch)
            .await
    }

    /// Expand one category into its query list.
    pub async fn expand_category(&self, category_id: &CategoryId) -> NodeState<Vec<ExpandedQuery>> {
        let fetch = self.api.job_queries(&self.job_id, Some(category_id));
        let key = category_id.clone();
        self.expand(
            NodeRef::CategoryQueries(category_id.clone()),
            move |inner| inner.queries.entry(key.clone()).or_default(),
            fetch,
        )
        .await
    }

    /// Expand one query into its per-provider response list.
    pub async fn expand_query(&self, query_id: &QueryId) -> NodeState<Vec<RawLLMResponse>> {
        let fetch = self.api.query_responses(query_id);
        let key = query_id.clone();
        self.expand(
            NodeRef::QueryResponses(query_id.clone()),
            move |inner| inner.responses.entry(key.clone()).or_default(),
            fetch,
        )
        .await
    }

    /// Re-run the fetch for a single failed node. Siblings are unaffected.
    pub async fn retry(&self, node: NodeRef) -> Result<(), RetryError> {
        match node.clone() {
            NodeRef::Categories => {
                let fetch = self.api.job_categories(&self.job_id);
                self.retry_node(node, |inner| &mut inner.categories, fetch)
                    .await
            }
            NodeRef::CategoryQueries(category_id) => {
                let fetch = self.api.job_queries(&self.job_id, Some(&category_id));
                let key = category_id.clone();
                self.retry_node(
                    node,
                    move |inner| inner.queries.entry(key.clone()).or_default(),
                    fetch,
                )
                .await
            }
            NodeRef::QueryResponses(query_id) => {
                let fetch = self.api.query_responses(&query_id);
                let key = query_id.clone();
                self.retry_node(
                    node,
                    move |inner| inner.responses.entry(key.clone()).or_default(),
                    fetch,
                )
                .await
            }
        }
    }

    // -------------------------------------------------------------------------
    // Focus
    // -------------------------------------------------------------------------

    /// Mark a query as the focused node for response display. Changing focus
    /// never evicts or refetches any node.
    pub fn select_query(&self, query_id: &QueryId) {
        self.lock().focused = Some(query_id.clone());
    }

    pub fn focused_query(&self) -> Option<QueryId> {
        self.lock().focused.clone()
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    pub fn categories(&self) -> NodeState<Vec<Category>> {
        self.lock().categories.state.clone()
    }

    pub fn category_queries(&self, category_id: &CategoryId) -> NodeState<Vec<ExpandedQuery>> {
        self.lock()
            .queries
            .get(category_id)
            .map(|node| node.state.clone())
            .unwrap_or(NodeState::Unloaded)
    }

    pub fn query_responses(&self, query_id: &QueryId) -> NodeState<Vec<RawLLMResponse>> {
        self.lock()
            .responses
            .get(query_id)
            .map(|node| node.state.clone())
            .unwrap_or(NodeState::Unloaded)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn notify(&self, node: &NodeRef) {
        if let Some(observer) = &self.observer {
            observer.on_node_change(node).await;
        }
    }

    /// Expansion entry: fetch only from `Unloaded`. A `Loading` node is a
    /// no-op (the in-flight fetch satisfies all waiters), a `Loaded` node is
    /// returned as-is with no refetch, and a `Failed` node requires an
    /// explicit retry.
    async fn expand<T, A, F>(&self, node_ref: NodeRef, accessor: A, fetch: F) -> NodeState<T>
    where
        T: Clone,
        A: Fn(&mut Inner) -> &mut Node<T>,
        F: Future<Output = Result<T, ApiError>>,
    {
        let begin = {
            let mut inner = self.lock();
            let node = accessor(&mut inner);
            match &node.state {
                NodeState::Unloaded => {
                    node.state = NodeState::Loading;
                    node.epoch += 1;
                    Begin::Fetch(node.epoch)
                }
                state => Begin::Snapshot(state.clone()),
            }
        };

        match begin {
            Begin::Snapshot(state) => state,
            Begin::Fetch(epoch) => self.run_fetch(node_ref, accessor, fetch, epoch).await,
        }
    }

    /// Retry entry: fetch only from `Failed`.
    async fn retry_node<T, A, F>(
        &self,
        node_ref: NodeRef,
        accessor: A,
        fetch: F,
    ) -> Result<(), RetryError>
    where
        T: Clone,
        A: Fn(&mut Inner) -> &mut Node<T>,
        F: Future<Output = Result<T, ApiError>>,
    {
        let epoch = {
            let mut inner = self.lock();
            let node = accessor(&mut inner);
            match &node.state {
                NodeState::Failed(_) => {
                    node.state = NodeState::Loading;
                    node.epoch += 1;
                    node.epoch
                }
                _ => return Err(RetryError::NotFailed(node_ref)),
            }
        };

        self.run_fetch(node_ref, accessor, fetch, epoch).await;
        Ok(())
    }

    /// Await the fetch and apply its result, guarded by the node's epoch: if
    /// the node is no longer in the loading generation this fetch was issued
    /// for, the result is dropped as a no-op rather than double-applied.
    async fn run_fetch<T, A, F>(
        &self,
        node_ref: NodeRef,
        accessor: A,
        fetch: F,
        epoch: u64,
    ) -> NodeState<T>
    where
        T: Clone,
        A: Fn(&mut Inner) -> &mut Node<T>,
        F: Future<Output = Result<T, ApiError>>,
    {
        self.notify(&node_ref).await;

        let result = fetch.await;

        let snapshot = {
            let mut inner = self.lock();
            let node = accessor(&mut inner);
            if node.epoch == epoch && node.state.is_loading() {
                node.state = match result {
                    Ok(value) => NodeState::Loaded(value),
                    Err(err) => {
                        tracing::warn!(
                            job_id = %self.job_id,
                            node = %node_ref,
                            error = %err,
                            "node fetch failed"
                        );
                        NodeState::Failed(err.to_string())
                    }
                };
            }
            node.state.clone()
        };

        self.notify(&node_ref).await;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_state_accessors() {
        let state: NodeState<Vec<u32>> = NodeState::Loaded(vec![1, 2]);
        assert!(state.is_loaded());
        assert_eq!(state.loaded(), Some(&vec![1, 2]));
        assert!(state.failure().is_none());

        let failed: NodeState<Vec<u32>> = NodeState::Failed("boom".into());
        assert!(failed.is_failed());
        assert_eq!(failed.failure(), Some("boom"));
    }

    #[test]
    fn node_ref_display_names_the_level() {
        assert_eq!(NodeRef::Categories.to_string(), "categories");
        assert_eq!(
            NodeRef::CategoryQueries(CategoryId::new("c1")).to_string(),
            "category:c1"
        );
        assert_eq!(
            NodeRef::QueryResponses(QueryId::new("q1")).to_string(),
            "query:q1"
        );
    }
}
