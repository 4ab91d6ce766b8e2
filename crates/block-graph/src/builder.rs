// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Batched basic-block graph accumulation
//!
//! [`BasicBlockGraphBuilder`] accumulates a heterogeneous multigraph over a
//! sequence of basic blocks: instruction, register, immediate, address,
//! memory and prefix nodes, with typed edges for structural order, operand
//! flow and address-component roles. The representation is a set of flat
//! append-only arrays ready for batched tensor export.
//!
//! Each `add_basic_block` call is transactional: on any failure (an
//! out-of-vocabulary token under [`OovBehavior::ReturnError`]) every
//! accumulator is truncated back to its pre-call size, so a failed add is
//! observationally a no-op. Rollback is driven by an explicit snapshot and a
//! return-based protocol, never by unwinding.

use std::collections::HashMap;
use std::fmt::Write as _;

use disasm::{DecodedInstruction, Operand};
use log::warn;

use crate::vocab::{OovBehavior, TokenIndex, Vocabulary, VocabularyError};

/// Index of a node in the batched graph.
pub type NodeIndex = usize;

/// Type of a node in the block graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Instruction = 0,
    Register = 1,
    Immediate = 2,
    FpImmediate = 3,
    AddressOperand = 4,
    MemoryOperand = 5,
    Prefix = 6,
}

/// Type of an edge in the block graph. The numeric code doubles as the edge
/// feature exported to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EdgeType {
    StructuralDependency = 0,
    InputOperands = 1,
    OutputOperands = 2,
    AddressBaseRegister = 3,
    AddressIndexRegister = 4,
    AddressSegmentRegister = 5,
    AddressDisplacement = 6,
    /// Reserved for model-side augmentation; never produced by the builder.
    ReverseStructuralDependency = 7,
    InstructionPrefix = 8,
}

/// OOV policy with the replacement token resolved to its index.
#[derive(Debug, Clone, Copy)]
enum ResolvedOov {
    ReturnError,
    Replace(TokenIndex),
}

/// Sizes of every accumulator at the start of a transaction.
struct Snapshot {
    node_types: usize,
    node_features: usize,
    edge_senders: usize,
    edge_receivers: usize,
    edge_types: usize,
    num_nodes_per_block: usize,
    num_edges_per_block: usize,
    global_features: usize,
}

/// Incremental builder of the batched basic-block graph.
pub struct BasicBlockGraphBuilder {
    vocabulary: Vocabulary,
    immediate_token: TokenIndex,
    fp_immediate_token: TokenIndex,
    address_token: TokenIndex,
    memory_token: TokenIndex,
    oov_behavior: ResolvedOov,

    node_types: Vec<NodeType>,
    node_features: Vec<TokenIndex>,
    edge_senders: Vec<NodeIndex>,
    edge_receivers: Vec<NodeIndex>,
    edge_types: Vec<EdgeType>,
    num_nodes_per_block: Vec<usize>,
    num_edges_per_block: Vec<usize>,
    global_features: Vec<Vec<u32>>,

    // Per-block scratch, cleared unconditionally at the start of each add.
    // Values are indices into the accumulators above; the maps are never
    // rolled back because the next add starts by clearing them.
    register_nodes: HashMap<String, NodeIndex>,
    alias_group_nodes: HashMap<u32, NodeIndex>,
}

impl BasicBlockGraphBuilder {
    /// Create a builder over the given vocabulary.
    ///
    /// `immediate`, `fp_immediate`, `address` and `memory` name the
    /// distinguished tokens used to label value nodes; all four must be in
    /// the vocabulary, as must the replacement token when `oov_behavior` is
    /// [`OovBehavior::ReplaceToken`].
    ///
    /// # Errors
    ///
    /// [`VocabularyError::Duplicate`] for repeated vocabulary entries,
    /// [`VocabularyError::Missing`] for an unresolvable required token.
    pub fn new(
        tokens: Vec<String>,
        immediate: &str,
        fp_immediate: &str,
        address: &str,
        memory: &str,
        oov_behavior: OovBehavior,
    ) -> Result<Self, VocabularyError> {
        let vocabulary = Vocabulary::new(tokens)?;
        let immediate_token = vocabulary.require(immediate)?;
        let fp_immediate_token = vocabulary.require(fp_immediate)?;
        let address_token = vocabulary.require(address)?;
        let memory_token = vocabulary.require(memory)?;
        let oov_behavior = match oov_behavior {
            OovBehavior::ReturnError => ResolvedOov::ReturnError,
            OovBehavior::ReplaceToken(replacement) => {
                ResolvedOov::Replace(vocabulary.require(&replacement)?)
            }
        };

        Ok(Self {
            vocabulary,
            immediate_token,
            fp_immediate_token,
            address_token,
            memory_token,
            oov_behavior,
            node_types: Vec::new(),
            node_features: Vec::new(),
            edge_senders: Vec::new(),
            edge_receivers: Vec::new(),
            edge_types: Vec::new(),
            num_nodes_per_block: Vec::new(),
            num_edges_per_block: Vec::new(),
            global_features: Vec::new(),
            register_nodes: HashMap::new(),
            alias_group_nodes: HashMap::new(),
        })
    }

    /// Add one basic block to the batch.
    ///
    /// Returns `true` on success. Returns `false` when a token was out of
    /// vocabulary under the [`OovBehavior::ReturnError`] policy; in that
    /// case every accumulator is exactly as it was before the call.
    ///
    /// # Panics
    ///
    /// Panics on operand kinds that cannot occur in a well-formed block
    /// ([`Operand::Unknown`] anywhere; immediates or addresses as outputs).
    pub fn add_basic_block(&mut self, instructions: &[DecodedInstruction]) -> bool {
        let snapshot = self.snapshot();

        self.register_nodes.clear();
        self.alias_group_nodes.clear();

        let committed = self.add_block_inner(instructions, &snapshot);
        if !committed {
            self.rollback(&snapshot);
        }
        committed
    }

    fn add_block_inner(
        &mut self,
        instructions: &[DecodedInstruction],
        snapshot: &Snapshot,
    ) -> bool {
        let mut previous_instruction: Option<NodeIndex> = None;
        for instruction in instructions {
            let Some(instruction_node) =
                self.add_node_for_token(NodeType::Instruction, &instruction.mnemonic)
            else {
                return false;
            };

            for prefix in &instruction.prefixes {
                let Some(prefix_node) = self.add_node_for_token(NodeType::Prefix, prefix) else {
                    return false;
                };
                self.add_edge(EdgeType::InstructionPrefix, prefix_node, instruction_node);
            }

            if let Some(previous) = previous_instruction {
                self.add_edge(EdgeType::StructuralDependency, previous, instruction_node);
            }

            for operand in instruction.inputs() {
                if !self.add_input_operand(instruction_node, operand) {
                    return false;
                }
            }
            for operand in instruction.outputs() {
                if !self.add_output_operand(instruction_node, operand) {
                    return false;
                }
            }

            previous_instruction = Some(instruction_node);
        }

        // Histogram of the tokens of every node added for this block.
        let mut histogram = vec![0u32; self.vocabulary.len()];
        for &token in &self.node_features[snapshot.node_features..] {
            histogram[token] += 1;
        }
        self.global_features.push(histogram);

        self.num_nodes_per_block
            .push(self.num_nodes() - snapshot.node_types);
        self.num_edges_per_block
            .push(self.num_edges() - snapshot.edge_types);

        true
    }

    fn add_input_operand(&mut self, instruction_node: NodeIndex, operand: &Operand) -> bool {
        match operand {
            Operand::Register(name) => {
                self.add_dependency_on_register(instruction_node, name, EdgeType::InputOperands)
            }
            Operand::Immediate(_) => {
                let node = self.add_node(NodeType::Immediate, self.immediate_token);
                self.add_edge(EdgeType::InputOperands, node, instruction_node);
                true
            }
            Operand::FpImmediate(_) => {
                let node = self.add_node(NodeType::FpImmediate, self.fp_immediate_token);
                self.add_edge(EdgeType::InputOperands, node, instruction_node);
                true
            }
            Operand::Address(expr) => {
                let address_node = self.add_node(NodeType::AddressOperand, self.address_token);
                if let Some(base) = &expr.base {
                    if !self.add_dependency_on_register(
                        address_node,
                        base,
                        EdgeType::AddressBaseRegister,
                    ) {
                        return false;
                    }
                }
                if let Some(index) = &expr.index {
                    if !self.add_dependency_on_register(
                        address_node,
                        index,
                        EdgeType::AddressIndexRegister,
                    ) {
                        return false;
                    }
                }
                if let Some(segment) = &expr.segment {
                    if !self.add_dependency_on_register(
                        address_node,
                        segment,
                        EdgeType::AddressSegmentRegister,
                    ) {
                        return false;
                    }
                }
                if expr.displacement != 0 {
                    let displacement_node =
                        self.add_node(NodeType::Immediate, self.immediate_token);
                    self.add_edge(EdgeType::AddressDisplacement, displacement_node, address_node);
                }
                // Scaling is intentionally dropped from the graph.
                self.add_edge(EdgeType::InputOperands, address_node, instruction_node);
                true
            }
            Operand::Memory(alias_group) => {
                let node = match self.alias_group_nodes.get(alias_group) {
                    Some(&node) => node,
                    None => {
                        let node = self.add_node(NodeType::MemoryOperand, self.memory_token);
                        self.alias_group_nodes.insert(*alias_group, node);
                        node
                    }
                };
                self.add_edge(EdgeType::InputOperands, node, instruction_node);
                true
            }
            Operand::Unknown => panic!("unknown operand as input of an instruction"),
        }
    }

    fn add_output_operand(&mut self, instruction_node: NodeIndex, operand: &Operand) -> bool {
        match operand {
            Operand::Register(name) => {
                // Always a fresh node: each write creates a new version of
                // the register, and later readers resolve to the newest one.
                let Some(register_node) = self.add_node_for_token(NodeType::Register, name) else {
                    return false;
                };
                self.add_edge(EdgeType::OutputOperands, instruction_node, register_node);
                self.register_nodes.insert(name.clone(), register_node);
                true
            }
            Operand::Memory(alias_group) => {
                let node = self.add_node(NodeType::MemoryOperand, self.memory_token);
                self.alias_group_nodes.insert(*alias_group, node);
                self.add_edge(EdgeType::OutputOperands, instruction_node, node);
                true
            }
            Operand::Immediate(_) | Operand::FpImmediate(_) | Operand::Address(_) => {
                panic!("immediates and address expressions cannot be output operands")
            }
            Operand::Unknown => panic!("unknown operand as output of an instruction"),
        }
    }

    /// Resolve a register read against the newest definition, creating an
    /// undefined-register node on first sight, and add `edge_type` from the
    /// register node to `dependent_node`.
    fn add_dependency_on_register(
        &mut self,
        dependent_node: NodeIndex,
        register_name: &str,
        edge_type: EdgeType,
    ) -> bool {
        let register_node = match self.register_nodes.get(register_name) {
            Some(&node) => node,
            None => {
                let Some(node) = self.add_node_for_token(NodeType::Register, register_name) else {
                    return false;
                };
                self.register_nodes.insert(register_name.to_string(), node);
                node
            }
        };
        self.add_edge(edge_type, register_node, dependent_node);
        true
    }

    /// Add a node labeled by `token`, applying the OOV policy. `None` means
    /// the token was out of vocabulary and the policy is to fail the block.
    fn add_node_for_token(&mut self, node_type: NodeType, token: &str) -> Option<NodeIndex> {
        let token_index = match self.vocabulary.get(token) {
            Some(index) => index,
            None => {
                warn!("unexpected node token: '{token}'");
                match self.oov_behavior {
                    ResolvedOov::ReturnError => return None,
                    ResolvedOov::Replace(replacement) => replacement,
                }
            }
        };
        Some(self.add_node(node_type, token_index))
    }

    fn add_node(&mut self, node_type: NodeType, token_index: TokenIndex) -> NodeIndex {
        let node = self.num_nodes();
        self.node_types.push(node_type);
        self.node_features.push(token_index);
        node
    }

    fn add_edge(&mut self, edge_type: EdgeType, sender: NodeIndex, receiver: NodeIndex) {
        assert!(
            sender < self.num_nodes(),
            "edge sender {sender} out of range"
        );
        assert!(
            receiver < self.num_nodes(),
            "edge receiver {receiver} out of range"
        );
        self.edge_senders.push(sender);
        self.edge_receivers.push(receiver);
        self.edge_types.push(edge_type);
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            node_types: self.node_types.len(),
            node_features: self.node_features.len(),
            edge_senders: self.edge_senders.len(),
            edge_receivers: self.edge_receivers.len(),
            edge_types: self.edge_types.len(),
            num_nodes_per_block: self.num_nodes_per_block.len(),
            num_edges_per_block: self.num_edges_per_block.len(),
            global_features: self.global_features.len(),
        }
    }

    /// Truncate every accumulator back to its snapshot size.
    ///
    /// Accumulators can only have grown since the snapshot; a shrunken one
    /// means `reset()` ran mid-add, which is a caller bug.
    fn rollback(&mut self, snapshot: &Snapshot) {
        macro_rules! check_and_resize {
            ($field:ident) => {
                assert!(
                    snapshot.$field <= self.$field.len(),
                    concat!(
                        "the size of ",
                        stringify!($field),
                        " has decreased; was reset() called during an add?"
                    )
                );
                self.$field.truncate(snapshot.$field);
            };
        }
        check_and_resize!(node_types);
        check_and_resize!(node_features);
        check_and_resize!(edge_senders);
        check_and_resize!(edge_receivers);
        check_and_resize!(edge_types);
        check_and_resize!(num_nodes_per_block);
        check_and_resize!(num_edges_per_block);
        check_and_resize!(global_features);
    }

    /// Clear every accumulator; the vocabulary is preserved.
    pub fn reset(&mut self) {
        self.node_types.clear();
        self.node_features.clear();
        self.edge_senders.clear();
        self.edge_receivers.clear();
        self.edge_types.clear();
        self.num_nodes_per_block.clear();
        self.num_edges_per_block.clear();
        self.global_features.clear();
    }

    pub fn num_blocks(&self) -> usize {
        self.num_nodes_per_block.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.node_types.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edge_types.len()
    }

    pub fn num_node_tokens(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn node_types(&self) -> &[NodeType] {
        &self.node_types
    }

    pub fn node_features(&self) -> &[TokenIndex] {
        &self.node_features
    }

    pub fn edge_senders(&self) -> &[NodeIndex] {
        &self.edge_senders
    }

    pub fn edge_receivers(&self) -> &[NodeIndex] {
        &self.edge_receivers
    }

    pub fn edge_types(&self) -> &[EdgeType] {
        &self.edge_types
    }

    pub fn num_nodes_per_block(&self) -> &[usize] {
        &self.num_nodes_per_block
    }

    pub fn num_edges_per_block(&self) -> &[usize] {
        &self.num_edges_per_block
    }

    pub fn global_features(&self) -> &[Vec<u32>] {
        &self.global_features
    }

    /// Per-edge integer feature: the numeric code of the edge type.
    pub fn edge_features(&self) -> Vec<u32> {
        self.edge_types.iter().map(|&e| e as u32).collect()
    }

    /// Boolean mask selecting the instruction nodes.
    pub fn instruction_node_mask(&self) -> Vec<bool> {
        self.node_types
            .iter()
            .map(|&t| t == NodeType::Instruction)
            .collect()
    }

    /// For each instruction node in global order, the zero-based index of
    /// the block it belongs to. Non-decreasing; the last value is
    /// `num_blocks() - 1`.
    ///
    /// # Panics
    ///
    /// Panics when the per-block bookkeeping is inconsistent with the node
    /// arrays (a builder bug) or when a trailing block contains no
    /// instruction nodes.
    pub fn delta_block_index(&self) -> Vec<usize> {
        let mut delta = Vec::new();
        let mut block: isize = -1;
        let mut block_end: usize = 0;
        for (node, node_type) in self.node_types.iter().enumerate() {
            if *node_type != NodeType::Instruction {
                continue;
            }
            while node >= block_end {
                block += 1;
                assert!(
                    (block as usize) < self.num_blocks(),
                    "instruction node {node} lies beyond the last block"
                );
                block_end += self.num_nodes_per_block[block as usize];
            }
            delta.push(block as usize);
        }
        assert_eq!(
            block,
            self.num_blocks() as isize - 1,
            "the last block contributed no instruction nodes"
        );
        assert_eq!(
            block_end,
            self.num_nodes(),
            "per-block node counts do not sum to the node array length"
        );
        delta
    }

    /// Readable dump of all accumulators, for debugging and golden tests.
    pub fn debug_string(&self) -> String {
        fn append_list<T: std::fmt::Debug>(buffer: &mut String, name: &str, items: &[T]) {
            let rendered: Vec<String> = items.iter().map(|i| format!("{i:?}")).collect();
            let _ = writeln!(buffer, "{name} = [{}]", rendered.join(","));
        }

        let mut buffer = String::new();
        let _ = writeln!(buffer, "num_blocks = {}", self.num_blocks());
        let _ = writeln!(buffer, "num_nodes = {}", self.num_nodes());
        let _ = writeln!(buffer, "num_edges = {}", self.num_edges());
        let _ = writeln!(buffer, "num_node_tokens = {}", self.num_node_tokens());
        append_list(&mut buffer, "num_nodes_per_block", &self.num_nodes_per_block);
        append_list(&mut buffer, "num_edges_per_block", &self.num_edges_per_block);
        append_list(&mut buffer, "node_types", &self.node_types);
        append_list(&mut buffer, "node_features", &self.node_features);
        append_list(&mut buffer, "edge_senders", &self.edge_senders);
        append_list(&mut buffer, "edge_receivers", &self.edge_receivers);
        append_list(&mut buffer, "edge_types", &self.edge_types);
        buffer
    }
}
