//! Content-addressed serialization of a state DAG.

use std::collections::HashMap;
use std::sync::Arc;

use envd_common::error::{EnvdError, Result};
use envd_common::types::{Digest, Platform};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::op::{ExecOp, Op};
use crate::state::Vertex;

/// One deduplicated op of a [`Definition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionOp {
    /// Digest of the op payload, its input digests and the platform.
    pub digest: Digest,
    /// Input digests; `None` marks a scratch input.
    pub inputs: Vec<Option<Digest>>,
    /// The op payload.
    pub op: Op,
    /// Progress name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
}

/// Definition-wide metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionMetadata {
    /// Target platform of every op.
    pub platform: Platform,
    /// Digest of the final op, `None` for an empty filesystem.
    pub head: Option<Digest>,
}

/// Serialized build graph, ops listed inputs first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Ops in topological order.
    pub ops: Vec<DefinitionOp>,
    /// Definition-wide metadata.
    pub metadata: DefinitionMetadata,
}

#[derive(Serialize)]
struct CanonicalOp<'a> {
    op: &'a Op,
    inputs: &'a [Option<Digest>],
    platform: &'a Platform,
}

struct Marshaller<'a> {
    platform: &'a Platform,
    visited: HashMap<*const Vertex, Digest>,
    graph: DiGraph<Digest, ()>,
    nodes: HashMap<Digest, NodeIndex>,
    ops: HashMap<Digest, DefinitionOp>,
}

impl Marshaller<'_> {
    fn node(&mut self, digest: &Digest) -> NodeIndex {
        if let Some(index) = self.nodes.get(digest) {
            return *index;
        }
        let index = self.graph.add_node(digest.clone());
        let _ = self.nodes.insert(digest.clone(), index);
        index
    }

    fn visit(&mut self, vertex: &Arc<Vertex>) -> Result<Digest> {
        let key = Arc::as_ptr(vertex);
        if let Some(digest) = self.visited.get(&key) {
            return Ok(digest.clone());
        }

        let mut inputs = Vec::with_capacity(vertex.inputs.len());
        for input in &vertex.inputs {
            inputs.push(match input {
                Some(input) => Some(self.visit(input)?),
                None => None,
            });
        }

        let canonical = serde_json::to_vec(&CanonicalOp {
            op: &vertex.op,
            inputs: &inputs,
            platform: self.platform,
        })?;
        let digest = Digest::of(&canonical);
        let node = self.node(&digest);
        for input in inputs.iter().flatten() {
            let from = self.node(input);
            let _ = self.graph.update_edge(from, node, ());
        }
        let _ = self
            .ops
            .entry(digest.clone())
            .or_insert_with(|| DefinitionOp {
                digest: digest.clone(),
                inputs,
                op: vertex.op.clone(),
                custom_name: vertex.custom_name.clone(),
            });
        let _ = self.visited.insert(key, digest.clone());
        Ok(digest)
    }
}

impl Definition {
    pub(crate) fn from_head(head: Option<&Arc<Vertex>>, platform: &Platform) -> Result<Self> {
        let mut marshaller = Marshaller {
            platform,
            visited: HashMap::new(),
            graph: DiGraph::new(),
            nodes: HashMap::new(),
            ops: HashMap::new(),
        };
        let head = head.map(|vertex| marshaller.visit(vertex)).transpose()?;

        let order = petgraph::algo::toposort(&marshaller.graph, None).map_err(|_cycle| {
            EnvdError::Config {
                message: "cyclic build graph".into(),
            }
        })?;
        let ops: Vec<DefinitionOp> = order
            .into_iter()
            .filter_map(|index| {
                let digest = marshaller.graph.node_weight(index)?;
                marshaller.ops.remove(digest)
            })
            .collect();
        tracing::debug!(ops = ops.len(), platform = %platform, "marshalled build definition");

        Ok(Self {
            ops,
            metadata: DefinitionMetadata {
                platform: platform.clone(),
                head,
            },
        })
    }

    /// Returns the number of ops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns whether the definition describes the empty filesystem.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Looks up an op by digest.
    #[must_use]
    pub fn get(&self, digest: &Digest) -> Option<&DefinitionOp> {
        self.ops.iter().find(|op| &op.digest == digest)
    }

    /// Returns the final op.
    #[must_use]
    pub fn head(&self) -> Option<&DefinitionOp> {
        self.metadata.head.as_ref().and_then(|digest| self.get(digest))
    }

    /// Iterates over every exec op.
    pub fn execs(&self) -> impl Iterator<Item = &ExecOp> {
        self.ops.iter().filter_map(|op| match &op.op {
            Op::Exec(exec) => Some(exec),
            _ => None,
        })
    }

    /// Encodes the definition as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a definition from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid definition.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
