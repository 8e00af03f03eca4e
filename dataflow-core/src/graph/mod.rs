//! Processing Graph
//!
//! This module implements the demand-driven processing graph: nodes
//! connected through ports, and the pipeline that brings a node up to date
//! on request.
//!
//! # Overview
//!
//! The graph is a directed graph where:
//!
//! - Nodes own output slots holding [`crate::data::DataObject`]s
//! - Edges are [`Port`]s held by the consumer, naming one producer output
//!
//! Nothing is pushed. Asking the pipeline to update a node walks its inputs
//! upstream first, compares each input's timestamp and identity against what
//! the port last saw, and executes the node only if something changed or it
//! was marked modified.
//!
//! # Design Decisions
//!
//! 1. The pipeline is the single owner of every node. Ports refer to
//!    producers by [`NodeId`], so the graph holds no reference cycles and
//!    removing a node is an explicit operation.
//!
//! 2. Node state ([`Node`]) is separate from node behavior
//!    ([`ProcessBehavior`]). The update algorithm is written once, against
//!    the state; behaviors only implement execution.
//!
//! 3. Nodes are indexed by ID in insertion order, so traversals are
//!    deterministic.

mod behavior;
mod node;
mod pipeline;
mod port;

pub use behavior::{ExecutionContext, ProcessBehavior};
pub use node::{Node, NodeId, NodeKind, OutputData, PortId, ResolvedInputs};
pub use pipeline::Pipeline;
pub use port::{OutputLookup, Port};
