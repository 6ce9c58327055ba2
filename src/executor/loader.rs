use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{Connector, ExecutionError, StatementExecutor};
use crate::affected_graph::AffectedGraph;
use crate::node_catalog::NodeSchema;
use crate::sql_query_generator::FindOptions;
use crate::statement::{BooleanFilter, NodeChange, NodeSelection, NodeValue, StatementError};

struct CachedValue {
    selection: NodeSelection,
    /// `None`: no such instance
    value: Option<NodeValue>,
}

/// Loads instances of one node by identifier, one statement per batch of misses.
///
/// Loaded values are cached per identifier; a request is served from the cache
/// when the cached selection includes the requested one.
pub struct NodeLoader<'a, C: Connector + ?Sized> {
    executor: StatementExecutor<'a, C>,
    node: Arc<NodeSchema>,
    cache: Mutex<HashMap<String, CachedValue>>,
}

impl<'a, C: Connector + ?Sized> NodeLoader<'a, C> {
    pub fn new(executor: StatementExecutor<'a, C>, node: &Arc<NodeSchema>) -> Self {
        NodeLoader {
            executor,
            node: node.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn load(
        &self,
        id: &NodeValue,
        selection: &NodeSelection,
    ) -> Result<Option<NodeValue>, ExecutionError> {
        let mut values = self.load_many(std::slice::from_ref(id), selection).await?;
        Ok(values.pop().flatten())
    }

    /// Selected values in the order of `ids`; `None` for identifiers with no instance
    pub async fn load_many(
        &self,
        ids: &[NodeValue],
        selection: &NodeSelection,
    ) -> Result<Vec<Option<NodeValue>>, ExecutionError> {
        if selection.node().name != self.node.name {
            return Err(StatementError::NodeMismatch {
                expected: self.node.name.clone(),
                found: selection.node().name.clone(),
            }
            .into());
        }
        let ids = ids
            .iter()
            .map(|id| self.node.parse_identifier(id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut misses: Vec<&NodeValue> = Vec::new();
        // Refetches keep what was cached before, so wider requests stay covered
        let mut fetched = selection.clone();
        {
            let cache = self.cache.lock().await;
            for id in &ids {
                let cached = cache.get(&id.to_string());
                if cached.is_some_and(|cached| cached.selection.includes(selection))
                    || misses.contains(&id)
                {
                    continue;
                }
                // Selections that cannot share a key are not widened
                if let Some(merged) = cached.and_then(|c| fetched.merge(&c.selection).ok()) {
                    fetched = merged;
                }
                misses.push(id);
            }
        }

        if !misses.is_empty() {
            self.fetch(&misses, &fetched).await?;
        }

        let cache = self.cache.lock().await;
        ids.iter()
            .map(|id| -> Result<Option<NodeValue>, ExecutionError> {
                match cache.get(&id.to_string()).and_then(|c| c.value.as_ref()) {
                    Some(value) => Ok(Some(selection.parse_value(value)?)),
                    None => Ok(None),
                }
            })
            .collect()
    }

    /// Drop every cached value the change may have made stale.
    ///
    /// The changed instance itself is always dropped. Other entries are dropped
    /// when the affected graph of their selection matches them, or cannot be
    /// evaluated against what was cached.
    pub async fn invalidate(&self, change: &NodeChange) -> Result<(), ExecutionError> {
        let affected_graph = AffectedGraph::new(self.executor.generator().catalog());
        let mut cache = self.cache.lock().await;
        if change.node_name() == self.node.name {
            cache.remove(&change.id().to_string());
        }

        let mut stale = Vec::new();
        for (id, cached) in cache.iter() {
            let Some(value) = &cached.value else {
                continue;
            };
            if let Some(affected) = affected_graph.selection(&cached.selection, change)? {
                if affected.execute(value).unwrap_or(true) {
                    stale.push(id.clone());
                }
            }
        }
        if !stale.is_empty() {
            log::debug!("{} invalidates {} cached {} instances", change, stale.len(), self.node.name);
        }
        for id in stale {
            cache.remove(&id);
        }
        Ok(())
    }

    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }

    async fn fetch(
        &self,
        ids: &[&NodeValue],
        selection: &NodeSelection,
    ) -> Result<(), ExecutionError> {
        let catalog = self.executor.generator().catalog();
        // The identifier is needed to match rows back to requests
        let selection = selection.merge(&NodeSelection::identifier(catalog, &self.node)?)?;
        let filters = ids
            .iter()
            .map(|id| BooleanFilter::identifier(catalog, &self.node, id))
            .collect::<Result<Vec<_>, _>>()?;
        let options = FindOptions {
            filter: Some(BooleanFilter::or(&self.node, filters)?),
            ..Default::default()
        };

        let values = self.executor.find(&selection, &options).await?;
        log::debug!(
            "loaded {} of {} {} instances",
            values.len(),
            ids.len(),
            self.node.name
        );

        let mut cache = self.cache.lock().await;
        for id in ids {
            cache.insert(
                id.to_string(),
                CachedValue {
                    selection: selection.clone(),
                    value: None,
                },
            );
        }
        for value in values {
            let id = self.node.parse_identifier(&value)?;
            cache.insert(
                id.to_string(),
                CachedValue {
                    selection: selection.clone(),
                    value: Some(value),
                },
            );
        }
        Ok(())
    }
}
