//! Graph representation of x86-64 basic blocks
//!
//! Builds a batched heterogeneous multigraph over a sequence of basic
//! blocks for graph-neural-network cost models:
//!
//! - **Nodes** for instructions, registers, immediates, address expressions,
//!   memory aliases and prefixes, labeled by vocabulary token indices
//! - **Typed edges** for structural ordering, operand flow and
//!   address-component roles
//! - **Per-block bookkeeping**: node/edge counts and global token
//!   histograms, plus derived views (instruction mask, delta block index,
//!   edge features) for tensor export
//!
//! The builder accumulates across blocks; each add is transactional and
//! rolls back on out-of-vocabulary tokens under the strict policy. See
//! [`BasicBlockGraphBuilder`].

mod builder;
mod vocab;

pub use builder::{BasicBlockGraphBuilder, EdgeType, NodeIndex, NodeType};
pub use vocab::{OovBehavior, TokenIndex, Vocabulary, VocabularyError};
