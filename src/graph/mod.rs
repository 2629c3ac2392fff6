//! Dynamic validation DAG for one token.
//!
//! The graph holds dependencies among *active* transactions: those whose
//! validity is still unknown and whose outputs may matter to a target. It is a
//! subset of the full transaction DAG that grows as ancestors are loaded and
//! shrinks as nodes are decided or pruned.
//!
//! "Parent" and "child" follow spend direction: a child's inputs point at its
//! parents. Every active node has a depth, the shortest path from the root
//! sentinel (depth -1) through its children; targets hang off the root at
//! depth 0 and downloads proceed breadth first by depth.
//!
//! ## Update phases
//!
//! 1. Waiting nodes are brought online with [`TokenGraph::load_tx`].
//! 2. Children are notified through scheduled pings and may be decided.
//! 3. Depths are recomputed for nodes whose children changed.
//!
//! Notifications are queued and drained by [`TokenGraph::run_sched`] rather
//! than recursing through the DAG.

mod node;

pub use node::{NodeStatus, INF_DEPTH, ROOT_DEPTH};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use node::{ChildRef, ConnId, Connection, Node, ParentView};

use crate::types::{Transaction, TxId, Validity};
use crate::validator::{
    Classification, DecideContext, Decision, InputInfo, Validator, ValidatorError,
};

/// Graph maintenance failures. These indicate a caller or validator bug.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Transaction loaded into a node that is no longer waiting.
    #[error("double load of {0}")]
    DoubleLoad(TxId),

    /// Transaction handed over for a different node.
    #[error("txid mismatch: expected {expected}, got {got}")]
    TxidMismatch {
        /// Node being loaded.
        expected: TxId,
        /// Transaction received.
        got: TxId,
    },

    /// Classification lengths disagree with the transaction.
    #[error("{what} length mismatch for {txid}")]
    LengthMismatch {
        /// Offending transaction.
        txid: TxId,
        /// "input" or "output".
        what: &'static str,
    },

    /// Node undecided although none of its inputs can change any more.
    #[error("undecided with finalized inputs: {0}")]
    UndecidedWithFinalizedInputs(TxId),

    /// Internal bookkeeping refers to a missing node or connection.
    #[error("inconsistent graph state: {0}")]
    Inconsistent(&'static str),

    /// Validator programmer error.
    #[error(transparent)]
    Validator(#[from] ValidatorError),
}

/// Depth-annotated waiting node returned by [`TokenGraph::get_waiting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitingNode {
    /// Transaction to fetch.
    pub txid: TxId,
    /// Current depth.
    pub depth: i32,
}

/// Validation DAG bound to one [`Validator`].
pub struct TokenGraph {
    validator: Validator,
    nodes: BTreeMap<TxId, Node>,
    conns: HashMap<ConnId, Connection>,
    next_conn: ConnId,
    root_parents: Vec<ConnId>,
    waiting: Vec<TxId>,
    sched_ping: BTreeSet<TxId>,
    sched_recalc: BTreeSet<TxId>,
    deferred: BTreeSet<TxId>,
    debug: bool,
}

impl fmt::Debug for TokenGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGraph")
            .field("token_id", &self.validator.token_id())
            .field("nodes", &self.nodes.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

macro_rules! graph_debug {
    ($graph:expr, $($arg:tt)+) => {
        if $graph.debug {
            tracing::debug!(token = %$graph.validator.token_id().short(10), $($arg)+);
        } else {
            tracing::trace!(token = %$graph.validator.token_id().short(10), $($arg)+);
        }
    };
}

impl TokenGraph {
    /// Empty graph.
    pub fn new(validator: Validator) -> Self {
        Self {
            validator,
            nodes: BTreeMap::new(),
            conns: HashMap::new(),
            next_conn: 0,
            root_parents: Vec::new(),
            waiting: Vec::new(),
            sched_ping: BTreeSet::new(),
            sched_recalc: BTreeSet::new(),
            deferred: BTreeSet::new(),
            debug: false,
        }
    }

    /// Validator of this graph.
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Log decisions at debug level instead of trace.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Drop all nodes and schedules, keeping the validator.
    pub fn reset(&mut self) {
        let debug = self.debug;
        *self = Self::new(self.validator.clone());
        self.debug = debug;
    }

    /// Number of nodes of any status.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if no node was ever created.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Validity of a node; `Unknown` for absent nodes.
    pub fn validity(&self, txid: &TxId) -> Validity {
        self.nodes.get(txid).map(|n| n.validity).unwrap_or_default()
    }

    /// Status of a node, if it exists.
    pub fn status(&self, txid: &TxId) -> Option<NodeStatus> {
        self.nodes.get(txid).map(|n| n.status)
    }

    /// True unless the node is inactive. Absent nodes count as active.
    pub fn is_active(&self, txid: &TxId) -> bool {
        self.status(txid).map_or(true, NodeStatus::is_active)
    }

    /// Depth of a node, if it exists.
    pub fn depth(&self, txid: &TxId) -> Option<i32> {
        self.nodes.get(txid).map(|n| n.depth)
    }

    /// Nodes parked on external work.
    pub fn deferred(&self) -> Vec<TxId> {
        self.deferred.iter().copied().collect()
    }

    /// Replace the root's parents with `targets`.
    pub fn set_targets(&mut self, targets: &[TxId]) -> Result<(), GraphError> {
        for conn in std::mem::take(&mut self.root_parents) {
            self.drop_connection(conn)?;
        }
        for &txid in targets {
            self.get_node(txid);
            let conn = self.connect(txid, ChildRef::Root, None, None);
            self.add_child(conn)?;
            self.root_parents.push(conn);
        }
        Ok(())
    }

    /// Bring a waiting node online.
    ///
    /// With a cached validity the node is classified (so children can read
    /// its output contributions) and immediately inactivated with that value.
    pub fn load_tx(
        &mut self,
        txid: TxId,
        tx: &Transaction,
        cached: Option<Validity>,
    ) -> Result<(), GraphError> {
        if tx.txid() != txid {
            return Err(GraphError::TxidMismatch { expected: txid, got: tx.txid() });
        }
        if self.get_node(txid).status != NodeStatus::Waiting {
            return Err(GraphError::DoubleLoad(txid));
        }

        let info = match self.validator.classify(tx) {
            Classification::Prune(validity) => {
                graph_debug!(self, txid = %txid.short(10), "judged upon loading: {}", self.validator.validity_name(validity));
                return self.inactivate(txid, false, validity);
            }
            Classification::Info(info) => info,
        };
        if info.outputs.len() != tx.outputs().len() {
            return Err(GraphError::LengthMismatch { txid, what: "output" });
        }
        if info.input_mask.len() != tx.inputs().len() {
            return Err(GraphError::LengthMismatch { txid, what: "input" });
        }

        {
            let node = self.node_mut(txid)?;
            node.own = Some(info.own);
            node.outputs = Some(info.outputs);
        }
        if let Some(validity) = cached {
            graph_debug!(self, txid = %txid.short(10), "cached judgement: {}", self.validator.validity_name(validity));
            return self.inactivate(txid, true, validity);
        }

        let mut parents = Vec::new();
        for (vin, (input, &relevant)) in tx.inputs().iter().zip(&info.input_mask).enumerate() {
            if !relevant {
                continue;
            }
            let prev = input.prevout;
            self.get_node(prev.txid);
            let conn = self.connect(prev.txid, ChildRef::Node(txid), Some(prev.vout), Some(vin));
            self.add_child(conn)?;
            parents.push(conn);
        }

        let has_parents = !parents.is_empty();
        let node = self.node_mut(txid)?;
        node.parents = parents;
        node.status = NodeStatus::Live;
        let children = node.children.clone();

        self.sched_ping.insert(txid);
        if has_parents {
            // Without parents the node decides on its own ping and
            // notifies children on inactivation.
            for conn in children {
                if let Some(ChildRef::Node(child)) = self.conns.get(&conn).map(|c| c.child) {
                    self.sched_ping.insert(child);
                }
            }
        }
        Ok(())
    }

    /// Resolve a waiting node without loading its transaction.
    pub fn load_pruned(&mut self, txid: TxId, validity: Validity) -> Result<(), GraphError> {
        if self.get_node(txid).status != NodeStatus::Waiting {
            return Err(GraphError::DoubleLoad(txid));
        }
        graph_debug!(self, txid = %txid.short(10), "load pruned: {}", self.validator.validity_name(validity));
        self.inactivate(txid, false, validity)
    }

    /// Force a value onto a node regardless of its inputs. Inactive nodes
    /// keep their value; the return tells whether anything changed.
    pub fn force_resolve(&mut self, txid: TxId, validity: Validity) -> Result<bool, GraphError> {
        match self.get_node(txid).status {
            NodeStatus::Inactive => Ok(false),
            NodeStatus::Waiting | NodeStatus::Live => {
                graph_debug!(self, txid = %txid.short(10), "forced: {}", self.validator.validity_name(validity));
                self.inactivate(txid, false, validity)?;
                Ok(true)
            }
        }
    }

    /// Re-ping all deferred nodes.
    pub fn resume_deferred(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        self.sched_ping.extend(deferred);
    }

    /// Drain scheduled pings, then depth recalculations.
    pub fn run_sched(&mut self, ctx: &mut DecideContext<'_>) -> Result<(), GraphError> {
        loop {
            if let Some(txid) = self.sched_ping.pop_first() {
                self.ping(txid, ctx)?;
            } else if let Some(txid) = self.sched_recalc.pop_first() {
                self.recalc_depth(txid)?;
            } else {
                return Ok(());
            }
        }
    }

    /// Waiting nodes at or below `maxdepth`.
    pub fn get_waiting(&mut self, maxdepth: i32) -> Vec<WaitingNode> {
        let nodes = &self.nodes;
        self.waiting
            .retain(|t| nodes.get(t).map_or(false, |n| n.status == NodeStatus::Waiting));
        self.waiting
            .iter()
            .filter_map(|t| {
                let depth = nodes.get(t)?.depth;
                (depth <= maxdepth).then_some(WaitingNode { txid: *t, depth })
            })
            .collect()
    }

    /// One line per active node, for debug dumps.
    pub fn status_lines(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.status.is_active())
            .map(|(txid, n)| {
                let depth = if n.depth == INF_DEPTH { "INF_DEPTH".to_string() } else { n.depth.to_string() };
                format!("{}...[{:>8}] depth={}", txid.short(10), n.status.as_str(), depth)
            })
            .collect()
    }

    // ── internals ──────────────────────────────────────────────────────

    fn get_node(&mut self, txid: TxId) -> &mut Node {
        let waiting = &mut self.waiting;
        self.nodes.entry(txid).or_insert_with(|| {
            waiting.push(txid);
            Node::waiting()
        })
    }

    fn node_mut(&mut self, txid: TxId) -> Result<&mut Node, GraphError> {
        self.nodes.get_mut(&txid).ok_or(GraphError::Inconsistent("missing node"))
    }

    fn connect(&mut self, parent: TxId, child: ChildRef, vout: Option<u32>, vin: Option<usize>) -> ConnId {
        let id = self.next_conn;
        self.next_conn += 1;
        self.conns.insert(id, Connection { parent, child, vout, vin, checked: false });
        id
    }

    fn child_depth(&self, child: ChildRef) -> i32 {
        match child {
            ChildRef::Root => ROOT_DEPTH,
            ChildRef::Node(t) => self.nodes.get(&t).map_or(INF_DEPTH, |n| n.depth),
        }
    }

    /// Subscribe the connection's child to its parent. Inactive parents
    /// refuse the subscription and ping the child instead.
    fn add_child(&mut self, conn: ConnId) -> Result<(), GraphError> {
        let (parent, child) = {
            let c = self.conns.get(&conn).ok_or(GraphError::Inconsistent("missing connection"))?;
            (c.parent, c.child)
        };
        let new_depth = self.child_depth(child).saturating_add(1).min(INF_DEPTH);
        let node = self.node_mut(parent)?;
        if node.status == NodeStatus::Inactive {
            if let ChildRef::Node(t) = child {
                self.sched_ping.insert(t);
            }
            return Ok(());
        }
        node.children.push(conn);
        if new_depth < node.depth {
            node.depth = new_depth;
            let grandparents = node.parents.clone();
            for gp in grandparents {
                let Some(gp_txid) = self.conns.get(&gp).map(|c| c.parent) else { continue };
                if self.nodes.get(&gp_txid).is_some_and(|n| n.depth > new_depth.saturating_add(1)) {
                    self.sched_recalc.insert(gp_txid);
                }
            }
        }
        Ok(())
    }

    /// Unsubscribe a child from its parent and forget the connection.
    fn drop_connection(&mut self, conn: ConnId) -> Result<(), GraphError> {
        let c = self.conns.remove(&conn).ok_or(GraphError::Inconsistent("missing connection"))?;
        let child_depth = self.child_depth(c.child);
        if let Some(parent) = self.nodes.get_mut(&c.parent) {
            if parent.status == NodeStatus::Inactive {
                return Ok(());
            }
            parent.children.retain(|&x| x != conn);
            if parent.depth <= child_depth.saturating_add(1) {
                self.sched_recalc.insert(c.parent);
            }
        }
        Ok(())
    }

    fn inactivate(&mut self, txid: TxId, keep_info: bool, validity: Validity) -> Result<(), GraphError> {
        let (parents, children) = {
            let node = self.node_mut(txid)?;
            (std::mem::take(&mut node.parents), std::mem::take(&mut node.children))
        };
        for conn in parents {
            self.drop_connection(conn)?;
        }
        for conn in children {
            if let Some(c) = self.conns.get_mut(&conn) {
                c.checked = false;
                if let ChildRef::Node(child) = c.child {
                    self.sched_ping.insert(child);
                }
            }
        }
        let node = self.node_mut(txid)?;
        node.status = NodeStatus::Inactive;
        node.depth = INF_DEPTH;
        node.validity = validity;
        node.own = None;
        if !keep_info {
            node.outputs = None;
        }
        self.deferred.remove(&txid);
        Ok(())
    }

    fn recalc_depth(&mut self, txid: TxId) -> Result<(), GraphError> {
        let Some(node) = self.nodes.get(&txid) else { return Ok(()) };
        if !node.status.is_active() {
            return Ok(());
        }
        let min_child = node
            .children
            .iter()
            .filter_map(|c| self.conns.get(c))
            .map(|c| self.child_depth(c.child))
            .chain(std::iter::once(INF_DEPTH - 1))
            .min()
            .unwrap_or(INF_DEPTH - 1);
        let new_depth = min_child.saturating_add(1);
        let node = self.node_mut(txid)?;
        if new_depth != node.depth {
            node.depth = new_depth;
            let parents = node.parents.clone();
            for conn in parents {
                if let Some(p) = self.conns.get(&conn).map(|c| c.parent) {
                    self.sched_recalc.insert(p);
                }
            }
        }
        Ok(())
    }

    /// Parent info for a connection, or `None` if the edge is not needed.
    fn get_out_info(&mut self, conn: ConnId) -> Result<Option<ParentView>, GraphError> {
        let c = self.conns.get(&conn).ok_or(GraphError::Inconsistent("missing connection"))?;
        let parent = self.nodes.get(&c.parent).ok_or(GraphError::Inconsistent("missing parent"))?;
        let contribution = parent.output(c.vout);
        let status = parent.status;
        let validity = parent.validity;
        let vin = c.vin.ok_or(GraphError::Inconsistent("root connection pinged"))?;

        if !c.checked && status != NodeStatus::Waiting {
            let ChildRef::Node(child) = c.child else {
                return Err(GraphError::Inconsistent("root connection pinged"));
            };
            let own = self
                .nodes
                .get(&child)
                .and_then(|n| n.own)
                .ok_or(GraphError::Inconsistent("child without classification"))?;
            if !self.validator.check_needed(own, contribution)? {
                return Ok(None);
            }
            if let Some(c) = self.conns.get_mut(&conn) {
                c.checked = true;
            }
        }

        Ok(Some(ParentView {
            active: status.is_active(),
            waiting: status == NodeStatus::Waiting,
            vin,
            validity,
            contribution,
        }))
    }

    fn ping(&mut self, txid: TxId, ctx: &mut DecideContext<'_>) -> Result<(), GraphError> {
        let Some(node) = self.nodes.get(&txid) else { return Ok(()) };
        if node.status != NodeStatus::Live {
            return Ok(());
        }
        let own = node.own.ok_or(GraphError::Inconsistent("live node without classification"))?;

        let mut views = Vec::new();
        let mut kept = Vec::new();
        for conn in node.parents.clone() {
            match self.get_out_info(conn)? {
                Some(view) => {
                    views.push(view);
                    kept.push(conn);
                }
                None => self.drop_connection(conn)?,
            }
        }
        self.node_mut(txid)?.parents = kept;

        // Decisions start once every input is downloaded.
        if views.iter().any(|v| v.waiting) {
            return Ok(());
        }
        let any_active = views.iter().any(|v| v.active);
        let inputs: Vec<InputInfo> = views
            .iter()
            .map(|v| InputInfo { vin: v.vin, validity: v.validity, contribution: v.contribution })
            .collect();

        match self.validator.decide(own, &inputs, ctx)? {
            Decision::Pending => {
                if !any_active {
                    return Err(GraphError::UndecidedWithFinalizedInputs(txid));
                }
                Ok(())
            }
            Decision::Deferred => {
                graph_debug!(self, txid = %txid.short(10), "deferred");
                self.deferred.insert(txid);
                Ok(())
            }
            Decision::Valid => {
                graph_debug!(self, txid = %txid.short(10), "judgement based on inputs: {}", self.validator.validity_name(Validity::Valid));
                self.inactivate(txid, true, Validity::Valid)
            }
            Decision::Invalid(validity) => {
                graph_debug!(self, txid = %txid.short(10), "judgement based on inputs: {}", self.validator.validity_name(validity));
                self.inactivate(txid, false, validity)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TokenMessage;
    use crate::types::TokenType;
    use crate::validator::test_support::make_tx;

    const TOKEN: u128 = 1000;

    fn make_graph() -> TokenGraph {
        TokenGraph::new(Validator::for_token(TxId::from_u128(TOKEN), TokenType::Fungible))
    }

    fn make_genesis(qty: u64) -> Transaction {
        let msg = TokenMessage::genesis(TokenType::Fungible, 0, None, qty);
        make_tx(TxId::from_u128(TOKEN), &[(TxId::from_u128(1), 0)], &msg, 2)
    }

    fn make_send(txid: u128, spends: &[(TxId, u32)], amounts: Vec<u64>) -> Transaction {
        let n = amounts.len() + 1;
        let msg = TokenMessage::send(TokenType::Fungible, TxId::from_u128(TOKEN), amounts);
        make_tx(TxId::from_u128(txid), spends, &msg, n)
    }

    fn run(graph: &mut TokenGraph) {
        graph.run_sched(&mut DecideContext::default()).unwrap();
    }

    #[test]
    fn test_target_depth_and_waiting() {
        let mut g = make_graph();
        let a = TxId::from_u128(10);
        let b = TxId::from_u128(11);
        g.set_targets(&[a, b]).unwrap();
        // Every target hangs off the root.
        assert_eq!(g.depth(&a), Some(0));
        assert_eq!(g.depth(&b), Some(0));
        assert_eq!(g.get_waiting(INF_DEPTH).len(), 2);
    }

    #[test]
    fn test_send_chain_resolves_valid() {
        let mut g = make_graph();
        let genesis = make_genesis(100);
        let send = make_send(20, &[(genesis.txid(), 1)], vec![60, 40]);
        g.set_targets(&[send.txid()]).unwrap();

        g.load_tx(send.txid(), &send, None).unwrap();
        run(&mut g);
        assert_eq!(g.status(&send.txid()), Some(NodeStatus::Live));
        let waiting = g.get_waiting(INF_DEPTH);
        assert_eq!(waiting, vec![WaitingNode { txid: genesis.txid(), depth: 1 }]);

        g.load_tx(genesis.txid(), &genesis, None).unwrap();
        run(&mut g);
        assert_eq!(g.validity(&genesis.txid()), Validity::Valid);
        assert_eq!(g.validity(&send.txid()), Validity::Valid);
        assert!(!g.is_active(&send.txid()));
    }

    #[test]
    fn test_insufficient_inputs() {
        let mut g = make_graph();
        let genesis = make_genesis(50);
        let send = make_send(21, &[(genesis.txid(), 1)], vec![60]);
        g.set_targets(&[send.txid()]).unwrap();
        g.load_tx(send.txid(), &send, None).unwrap();
        g.load_tx(genesis.txid(), &genesis, None).unwrap();
        run(&mut g);
        assert_eq!(g.validity(&send.txid()), Validity::InvalidInsufficientInputs);
    }

    #[test]
    fn test_unneeded_parent_is_disconnected() {
        let mut g = make_graph();
        let genesis = make_genesis(100);
        // Input 1 spends the genesis carrier output, which holds nothing.
        let send = make_send(22, &[(genesis.txid(), 1), (genesis.txid(), 0)], vec![100]);
        g.set_targets(&[send.txid()]).unwrap();
        g.load_tx(send.txid(), &send, None).unwrap();
        g.load_tx(genesis.txid(), &genesis, None).unwrap();
        run(&mut g);
        assert_eq!(g.validity(&send.txid()), Validity::Valid);
    }

    #[test]
    fn test_cached_and_pruned_loads() {
        let mut g = make_graph();
        let genesis = make_genesis(100);
        let send = make_send(23, &[(genesis.txid(), 1)], vec![100]);
        g.set_targets(&[send.txid()]).unwrap();
        g.load_tx(send.txid(), &send, None).unwrap();
        g.load_pruned(genesis.txid(), Validity::InvalidMalformed).unwrap();
        run(&mut g);
        // Pruned parent contributes nothing, so the send can never be covered.
        assert_eq!(g.validity(&send.txid()), Validity::InvalidInsufficientInputs);

        let mut g = make_graph();
        g.set_targets(&[send.txid()]).unwrap();
        g.load_tx(send.txid(), &send, None).unwrap();
        g.load_tx(genesis.txid(), &genesis, Some(Validity::Valid)).unwrap();
        run(&mut g);
        assert_eq!(g.validity(&send.txid()), Validity::Valid);
    }

    #[test]
    fn test_load_errors() {
        let mut g = make_graph();
        let send = make_send(24, &[], vec![1]);
        g.set_targets(&[send.txid()]).unwrap();
        assert!(matches!(
            g.load_tx(TxId::from_u128(99), &send, None),
            Err(GraphError::TxidMismatch { .. })
        ));
        g.load_tx(send.txid(), &send, None).unwrap();
        assert_eq!(g.load_tx(send.txid(), &send, None), Err(GraphError::DoubleLoad(send.txid())));
    }

    #[test]
    fn test_depth_follows_shortest_path() {
        let mut g = make_graph();
        let genesis = make_genesis(100);
        let mid = make_send(30, &[(genesis.txid(), 1)], vec![100]);
        let top = make_send(31, &[(mid.txid(), 1)], vec![100]);
        g.set_targets(&[top.txid()]).unwrap();
        g.load_tx(top.txid(), &top, None).unwrap();
        g.load_tx(mid.txid(), &mid, None).unwrap();
        run(&mut g);
        assert_eq!(g.depth(&genesis.txid()), Some(2));

        // Targeting the middle tx directly pulls the genesis up a level.
        g.set_targets(&[top.txid(), mid.txid()]).unwrap();
        run(&mut g);
        assert_eq!(g.depth(&mid.txid()), Some(0));
        assert_eq!(g.depth(&genesis.txid()), Some(1));
    }

    #[test]
    fn test_force_and_reset() {
        let mut g = make_graph();
        let send = make_send(25, &[(TxId::from_u128(5), 1)], vec![1]);
        g.set_targets(&[send.txid()]).unwrap();
        g.load_tx(send.txid(), &send, None).unwrap();
        assert!(g.force_resolve(send.txid(), Validity::InvalidBadParent).unwrap());
        assert!(!g.force_resolve(send.txid(), Validity::Valid).unwrap());
        assert_eq!(g.validity(&send.txid()), Validity::InvalidBadParent);

        g.reset();
        assert!(g.is_empty());
        assert_eq!(g.validity(&send.txid()), Validity::Unknown);
    }
}
