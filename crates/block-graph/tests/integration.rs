//! Integration tests: decoded machine code through the graph builder

use block_graph::{BasicBlockGraphBuilder, EdgeType, NodeType, OovBehavior};
use disasm::disassemble;

fn vocab() -> Vec<String> {
    [
        "immediate",
        "fp_immediate",
        "address",
        "memory",
        "add",
        "cmp",
        "mov",
        "nop",
        "rax",
        "rbx",
        "rcx",
        "rdx",
        "rflags",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn builder() -> BasicBlockGraphBuilder {
    BasicBlockGraphBuilder::new(
        vocab(),
        "immediate",
        "fp_immediate",
        "address",
        "memory",
        OovBehavior::ReturnError,
    )
    .unwrap()
}

#[test]
fn test_decoded_alu_block() {
    // add rcx, 1; cmp rdx, 64
    let instructions = disassemble(&[0x48, 0x83, 0xc1, 0x01, 0x48, 0x83, 0xfa, 0x40]).unwrap();
    let mut b = builder();
    assert!(b.add_basic_block(&instructions));

    // add: instruction, rcx read, immediate, rcx written, rflags written.
    // cmp: instruction, rdx read, immediate, rflags written.
    assert_eq!(b.num_blocks(), 1);
    assert_eq!(b.num_nodes(), 9);
    assert_eq!(
        b.node_types()
            .iter()
            .filter(|&&t| t == NodeType::Instruction)
            .count(),
        2
    );
    assert_eq!(
        b.edge_types()
            .iter()
            .filter(|&&t| t == EdgeType::StructuralDependency)
            .count(),
        1
    );

    assert_eq!(b.delta_block_index(), vec![0, 0]);
    let mask = b.instruction_node_mask();
    assert_eq!(mask.iter().filter(|&&m| m).count(), 2);
}

#[test]
fn test_decoded_load_block() {
    // mov rax, [rbx]
    let instructions = disassemble(&[0x48, 0x8b, 0x03]).unwrap();
    let mut b = builder();
    assert!(b.add_basic_block(&instructions));

    // instruction, address, rbx, memory, rax.
    assert_eq!(b.num_nodes(), 5);
    assert!(b.node_types().contains(&NodeType::AddressOperand));
    assert!(b.node_types().contains(&NodeType::MemoryOperand));
    assert_eq!(
        b.edge_types()
            .iter()
            .filter(|&&t| t == EdgeType::AddressBaseRegister)
            .count(),
        1
    );
    // No displacement: no immediate node.
    assert!(!b.node_types().contains(&NodeType::Immediate));
}

#[test]
fn test_batched_blocks_accumulate() {
    let mut b = builder();
    assert!(b.add_basic_block(&disassemble(&[0x90]).unwrap()));
    assert!(b.add_basic_block(&disassemble(&[0x48, 0x8b, 0x03]).unwrap()));
    assert!(b.add_basic_block(&disassemble(&[0x90]).unwrap()));

    assert_eq!(b.num_blocks(), 3);
    assert_eq!(b.num_nodes_per_block(), &[1, 5, 1]);
    assert_eq!(b.delta_block_index(), vec![0, 1, 2]);
    assert_eq!(
        b.num_nodes_per_block().iter().sum::<usize>(),
        b.num_nodes()
    );
    for (g, features) in b.global_features().iter().enumerate() {
        assert_eq!(
            features.iter().sum::<u32>() as usize,
            b.num_nodes_per_block()[g]
        );
    }
}

#[test]
fn test_oov_block_leaves_batch_intact() {
    let mut b = builder();
    assert!(b.add_basic_block(&disassemble(&[0x90]).unwrap()));
    let nodes_before = b.num_nodes();
    let blocks_before = b.num_blocks();

    // xor is not in the vocabulary.
    assert!(!b.add_basic_block(&disassemble(&[0x48, 0x31, 0xc0]).unwrap()));

    assert_eq!(b.num_nodes(), nodes_before);
    assert_eq!(b.num_blocks(), blocks_before);
}
