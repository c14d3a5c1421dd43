//! # Workflows: DAGs of work invocations.
//!
//! A [`Workflow`] chains registered work types. Every node is executed through
//! the [`RequestAdapter`](crate::adapters::RequestAdapter), so it is subject to
//! the same routing, limits and retry policy as any other request.
//!
//! ```text
//!   fetch ──► thumb ──┐
//!     │               ├──► store      run(None)          → store's result
//!     └────► exif ────┘               run(Some("exif"))  → fetch, exif only
//! ```

mod graph;
mod run;

pub use graph::{Workflow, WorkflowNode};
