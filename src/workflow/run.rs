//! # Workflow execution over the request adapter.
//!
//! Nodes run one at a time in stable topological order; every node runs once.
//! Each node is a regular request, so registry routing, backpressure, timeouts
//! and retries apply unchanged. Each node gets whatever is left of the overall
//! deadline.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::graph::{Workflow, WorkflowNode};
use crate::adapters::RequestAdapter;
use crate::error::{RequestError, WorkflowError};
use crate::work::Payload;

impl Workflow {
    /// Executes the workflow.
    ///
    /// With `target`, runs only the target's ancestor closure and returns the
    /// target's result. Without one, runs every node and returns the sink
    /// result (one sink) or a JSON object keyed by sink id.
    #[instrument(level = "debug", skip_all, fields(workflow = %self.name(), target = ?target))]
    pub async fn run(
        &self,
        requests: &RequestAdapter,
        target: Option<&str>,
        deadline: Duration,
    ) -> Result<Payload, WorkflowError> {
        if self.is_empty() {
            return Err(WorkflowError::Empty);
        }
        let order = match target {
            Some(t) => self.order_for(t)?,
            None => self.order()?,
        };

        let until = Instant::now() + deadline;
        let mut results: HashMap<&str, Payload> = HashMap::with_capacity(order.len());
        for id in order {
            let Some(node) = self.node(id) else {
                return Err(WorkflowError::UnknownNode { node: id.to_owned() });
            };
            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(WorkflowError::NodeFailed {
                    node: id.to_owned(),
                    source: RequestError::RequestTimeout { deadline },
                });
            }
            let input = node_input(node, &results);
            debug!(node = id, work_type = node.work_type(), "workflow node starting");
            let out = requests
                .call(node.work_type(), input, remaining)
                .await
                .map_err(|source| WorkflowError::NodeFailed {
                    node: id.to_owned(),
                    source,
                })?;
            results.insert(id, out);
        }

        match target {
            Some(t) => Ok(results.remove(t).unwrap_or_default()),
            None => {
                let sinks = self.sinks();
                if let [only] = sinks.as_slice() {
                    return Ok(results.remove(only).unwrap_or_default());
                }
                let map: Map<String, Value> = sinks
                    .into_iter()
                    .map(|s| (s.to_owned(), results.get(s).map(Payload::to_json).unwrap_or(Value::Null)))
                    .collect();
                Ok(Payload::json(Value::Object(map)))
            }
        }
    }
}

/// Builds the handler input: the node's own payload, or `{upstream, args}` when
/// dependency results are consumed.
fn node_input(node: &WorkflowNode, results: &HashMap<&str, Payload>) -> Payload {
    let deps: Vec<&str> = node.dependencies().collect();
    if !node.consumes_dependency_results() || deps.is_empty() {
        return node.payload().clone();
    }
    let upstream = |d: &str| results.get(d).map(Payload::to_json).unwrap_or(Value::Null);
    let upstream = match deps.as_slice() {
        [one] => upstream(*one),
        many => Value::Array(many.iter().map(|d| upstream(*d)).collect()),
    };
    Payload::json(json!({
        "upstream": upstream,
        "args": node.payload().to_json(),
    }))
}
