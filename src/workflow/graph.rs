//! # Workflow graph: nodes, validation and ordering.
//!
//! Ordering is a stable Kahn sort: among ready nodes, insertion order wins.
//! A node's ancestor closure is itself plus everything it transitively depends on.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::WorkflowError;
use crate::work::Payload;

/// One invocation inside a [`Workflow`].
#[derive(Clone, Debug)]
pub struct WorkflowNode {
    id: Arc<str>,
    work_type: Arc<str>,
    payload: Payload,
    depends_on: Vec<Arc<str>>,
    consume_dependency_results: bool,
}

impl WorkflowNode {
    /// Node `id` invoking `work_type` with an empty payload and no dependencies.
    pub fn new(id: impl Into<Arc<str>>, work_type: impl Into<Arc<str>>) -> Self {
        Self {
            id: id.into(),
            work_type: work_type.into(),
            payload: Payload::Empty,
            depends_on: Vec::new(),
            consume_dependency_results: true,
        }
    }

    /// Sets the node's own payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Adds a dependency on node `id`.
    pub fn depends_on(mut self, id: impl Into<Arc<str>>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// Whether dependency results are passed to the handler (default `true`).
    pub fn consume_dependency_results(mut self, on: bool) -> Self {
        self.consume_dependency_results = on;
        self
    }

    /// Node id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Work type executed by this node.
    pub fn work_type(&self) -> &str {
        &self.work_type
    }

    /// The node's own payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Dependencies in declaration order.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.depends_on.iter().map(|d| d.as_ref())
    }

    /// Whether dependency results are passed to the handler.
    pub fn consumes_dependency_results(&self) -> bool {
        self.consume_dependency_results
    }
}

/// Named DAG of work invocations.
#[derive(Clone, Debug)]
pub struct Workflow {
    name: Arc<str>,
    nodes: Vec<WorkflowNode>,
    index: HashMap<Arc<str>, usize>,
}

impl Workflow {
    /// Empty workflow.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Workflow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a node; rejects duplicate ids.
    pub fn add(&mut self, node: WorkflowNode) -> Result<&mut Self, WorkflowError> {
        if self.index.contains_key(&node.id) {
            return Err(WorkflowError::DuplicateNode {
                node: node.id.to_string(),
            });
        }
        self.index.insert(Arc::clone(&node.id), self.nodes.len());
        self.nodes.push(node);
        Ok(self)
    }

    /// Looks up a node by id.
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no node was added.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes nothing depends on, in insertion order.
    pub fn sinks(&self) -> Vec<&str> {
        let depended: HashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.dependencies())
            .collect();
        self.nodes
            .iter()
            .map(|n| n.id())
            .filter(|id| !depended.contains(id))
            .collect()
    }

    /// True when some node joins more than one dependency.
    pub fn uses_join(&self) -> bool {
        self.nodes.iter().any(|n| n.depends_on.len() > 1)
    }

    /// Checks dependencies exist, none is a self-loop and the graph is acyclic.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        for n in &self.nodes {
            for dep in n.dependencies() {
                if dep == n.id() {
                    return Err(WorkflowError::SelfDependency {
                        node: n.id.to_string(),
                    });
                }
                if !self.index.contains_key(dep) {
                    return Err(WorkflowError::MissingDependency {
                        node: n.id.to_string(),
                        dependency: dep.to_owned(),
                    });
                }
            }
        }
        let all: BTreeSet<usize> = (0..self.nodes.len()).collect();
        self.topological(&all).map(|_| ())
    }

    /// Stable topological order of the whole graph.
    pub fn order(&self) -> Result<Vec<&str>, WorkflowError> {
        self.validate()?;
        let all: BTreeSet<usize> = (0..self.nodes.len()).collect();
        Ok(self
            .topological(&all)?
            .into_iter()
            .map(|i| self.nodes[i].id())
            .collect())
    }

    /// Stable topological order of `target` and its ancestors.
    pub fn order_for(&self, target: &str) -> Result<Vec<&str>, WorkflowError> {
        self.validate()?;
        let closure = self.ancestor_closure(target)?;
        Ok(self
            .topological(&closure)?
            .into_iter()
            .map(|i| self.nodes[i].id())
            .collect())
    }

    /// `target` plus everything it transitively depends on (as node indices).
    fn ancestor_closure(&self, target: &str) -> Result<BTreeSet<usize>, WorkflowError> {
        let start = *self.index.get(target).ok_or_else(|| WorkflowError::UnknownNode {
            node: target.to_owned(),
        })?;
        let mut closure = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            if !closure.insert(i) {
                continue;
            }
            for dep in self.nodes[i].dependencies() {
                if let Some(&d) = self.index.get(dep) {
                    stack.push(d);
                }
            }
        }
        Ok(closure)
    }

    /// Kahn sort over `selected`; ready nodes are taken in insertion order.
    fn topological(&self, selected: &BTreeSet<usize>) -> Result<Vec<usize>, WorkflowError> {
        let mut indegree: HashMap<usize, usize> = selected.iter().map(|&i| (i, 0)).collect();
        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        for &i in selected {
            for dep in self.nodes[i].dependencies() {
                let Some(&d) = self.index.get(dep) else { continue };
                if selected.contains(&d) {
                    *indegree.entry(i).or_default() += 1;
                    children.entry(d).or_default().push(i);
                }
            }
        }

        let mut ready: VecDeque<usize> = selected
            .iter()
            .copied()
            .filter(|i| indegree[i] == 0)
            .collect();
        let mut out = Vec::with_capacity(selected.len());
        while let Some(i) = ready.pop_front() {
            out.push(i);
            for &c in children.get(&i).map(Vec::as_slice).unwrap_or_default() {
                if let Some(deg) = indegree.get_mut(&c) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push_back(c);
                    }
                }
            }
        }

        if out.len() != selected.len() {
            let sorted: HashSet<usize> = out.iter().copied().collect();
            let nodes = selected
                .iter()
                .filter(|i| !sorted.contains(i))
                .map(|&i| self.nodes[i].id.to_string())
                .collect();
            return Err(WorkflowError::Cycle { nodes });
        }
        Ok(out)
    }
}
