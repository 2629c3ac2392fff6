//! Node and connection records.

use crate::types::{TxId, Validity};
use crate::validator::{Contribution, OwnContribution};

/// Depth of nodes not reachable from the root.
pub const INF_DEPTH: i32 = 2_147_483_646;

/// Depth of the root sentinel; targets sit at depth 0.
pub const ROOT_DEPTH: i32 = -1;

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    /// Transaction not loaded yet.
    Waiting,
    /// Loaded and undecided.
    Live,
    /// Decided or pruned; only validity and (for kept nodes) outputs remain.
    Inactive,
}

impl NodeStatus {
    /// Waiting or live.
    pub fn is_active(self) -> bool {
        self != Self::Inactive
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Live => "live",
            Self::Inactive => "inactive",
        }
    }
}

/// Connection handle.
pub(crate) type ConnId = u64;

/// Spending side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildRef {
    Root,
    Node(TxId),
}

/// One spend edge: output `vout` of `parent` is input `vin` of `child`.
/// Root edges carry no indices.
#[derive(Debug, Clone)]
pub(crate) struct Connection {
    pub parent: TxId,
    pub child: ChildRef,
    pub vout: Option<u32>,
    pub vin: Option<usize>,
    /// Set once `check_needed` accepted the edge.
    pub checked: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub status: NodeStatus,
    pub depth: i32,
    pub validity: Validity,
    pub own: Option<OwnContribution>,
    pub outputs: Option<Vec<Contribution>>,
    pub parents: Vec<ConnId>,
    pub children: Vec<ConnId>,
}

impl Node {
    pub fn waiting() -> Self {
        Self {
            status: NodeStatus::Waiting,
            depth: INF_DEPTH,
            validity: Validity::Unknown,
            own: None,
            outputs: None,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Contribution of output `vout`, `None` for pruned nodes or missing outputs.
    pub fn output(&self, vout: Option<u32>) -> Contribution {
        match (&self.outputs, vout) {
            (Some(outputs), Some(v)) => outputs.get(v as usize).copied().unwrap_or(Contribution::None),
            _ => Contribution::None,
        }
    }
}

/// What a child sees of one parent connection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParentView {
    pub active: bool,
    pub waiting: bool,
    pub vin: usize,
    pub validity: Validity,
    pub contribution: Contribution,
}
