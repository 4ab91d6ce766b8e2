// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Register role analysis
//!
//! Two questions are answered about a basic block, both over canonical
//! full-width registers resolved through the register oracle:
//!
//! - which registers must the harness initialize before executing the block
//!   ([`used_registers`]): everything read before the block itself writes it
//! - which register can a repeater safely use as a decrement counter
//!   ([`loop_register`]): a GPR the block neither reads nor writes

use std::collections::BTreeSet;

use disasm::{regs, DecodedInstruction, Gpr, Operand, Reg, LOOP_CANDIDATES};

/// Canonical registers read by one instruction: explicit register inputs,
/// address components of memory operands, and implicit uses.
fn reads(instruction: &DecodedInstruction) -> impl Iterator<Item = Reg> + '_ {
    instruction.inputs().flat_map(|operand| {
        let mut found: Vec<Reg> = Vec::new();
        match operand {
            Operand::Register(name) => found.extend(regs::lookup(name)),
            Operand::Address(expr) => {
                for component in [&expr.base, &expr.index, &expr.segment] {
                    if let Some(name) = component {
                        found.extend(regs::lookup(name));
                    }
                }
            }
            _ => {}
        }
        found
    })
}

/// Canonical registers written by one instruction.
fn writes(instruction: &DecodedInstruction) -> impl Iterator<Item = Reg> + '_ {
    instruction.outputs().flat_map(|operand| match operand {
        Operand::Register(name) => regs::lookup(name),
        _ => None,
    })
}

/// Registers the harness must initialize: every register read by some
/// instruction before any earlier instruction of the block has written it.
/// Purely-written registers are excluded. The result is in canonical
/// register enumeration order.
///
/// The instruction pointer is never reported; it cannot be pre-set and is
/// implied by the code placement.
pub fn used_registers(instructions: &[DecodedInstruction]) -> Vec<Reg> {
    let mut used: BTreeSet<Reg> = BTreeSet::new();
    let mut defined: BTreeSet<Reg> = BTreeSet::new();

    for instruction in instructions {
        for reg in reads(instruction) {
            if reg != Reg::Rip && !defined.contains(&reg) {
                used.insert(reg);
            }
        }
        for reg in writes(instruction) {
            defined.insert(reg);
        }
    }

    used.into_iter().collect()
}

/// A general-purpose register the block neither reads nor writes, safe for
/// a repeater to decrement around the block. Candidates are tried in
/// allocation order (scratch registers first, stack registers last); the
/// first free one wins. `None` iff the block touches all sixteen GPRs.
pub fn loop_register(instructions: &[DecodedInstruction]) -> Option<Gpr> {
    let mut touched: BTreeSet<Reg> = BTreeSet::new();
    for instruction in instructions {
        touched.extend(reads(instruction));
        touched.extend(writes(instruction));
    }

    LOOP_CANDIDATES
        .iter()
        .copied()
        .find(|&candidate| !touched.contains(&Reg::Gpr(candidate)))
}

#[cfg(test)]
mod tests {
    use disasm::{disassemble, Gpr, Reg};

    use super::{loop_register, used_registers};

    #[test]
    fn test_nop_uses_nothing() {
        let block = disassemble(&[0x90]).unwrap();
        assert!(used_registers(&block).is_empty());
        assert_eq!(loop_register(&block), Some(Gpr::Rax));
    }

    #[test]
    fn test_add_cmp_block() {
        // add rcx, 1; cmp rdx, 64
        let block = disassemble(&[0x48, 0x83, 0xc1, 0x01, 0x48, 0x83, 0xfa, 0x40]).unwrap();
        assert_eq!(
            used_registers(&block),
            vec![Reg::Gpr(Gpr::Rcx), Reg::Gpr(Gpr::Rdx)]
        );
        assert_eq!(loop_register(&block), Some(Gpr::Rax));
    }

    #[test]
    fn test_load_uses_address_base() {
        // mov rax, [rbx]: rbx is read through the address expression, rax is
        // only written. rax is written, so the loop register moves on to rcx.
        let block = disassemble(&[0x48, 0x8b, 0x03]).unwrap();
        assert_eq!(used_registers(&block), vec![Reg::Gpr(Gpr::Rbx)]);
        assert_eq!(loop_register(&block), Some(Gpr::Rcx));
    }

    #[test]
    fn test_written_then_read_is_not_used() {
        // mov rax, 1; add rcx, rax: rax is defined in-block before the read.
        let block =
            disassemble(&[0x48, 0xc7, 0xc0, 0x01, 0x00, 0x00, 0x00, 0x48, 0x01, 0xc1]).unwrap();
        assert_eq!(used_registers(&block), vec![Reg::Gpr(Gpr::Rcx)]);
    }

    #[test]
    fn test_self_xor_reads_before_writing() {
        // xor rax, rax reads rax in the same instruction that writes it, so
        // the read is not covered by a preceding write.
        let block = disassemble(&[0x48, 0x31, 0xc0]).unwrap();
        assert_eq!(used_registers(&block), vec![Reg::Gpr(Gpr::Rax)]);
    }

    #[test]
    fn test_sub_register_write_defines_full_register() {
        // mov eax, 1; add rcx, rax: the 32-bit write defines the canonical
        // register, so rax is not in the used set.
        let block = disassemble(&[0xb8, 0x01, 0x00, 0x00, 0x00, 0x48, 0x01, 0xc1]).unwrap();
        assert_eq!(used_registers(&block), vec![Reg::Gpr(Gpr::Rcx)]);
    }

    #[test]
    fn test_flags_reader_reports_rflags() {
        // cmovz rax, rcx reads rflags (and rcx, and rax as the kept value).
        let block = disassemble(&[0x48, 0x0f, 0x44, 0xc1]).unwrap();
        let used = used_registers(&block);
        assert!(used.contains(&Reg::Rflags));
        assert!(used.contains(&Reg::Gpr(Gpr::Rcx)));
    }

    #[test]
    fn test_flags_writer_does_not_report_rflags() {
        // add rcx, 1 writes rflags but never reads it.
        let block = disassemble(&[0x48, 0x83, 0xc1, 0x01]).unwrap();
        assert!(!used_registers(&block).contains(&Reg::Rflags));
    }

    #[test]
    fn test_loop_register_skips_implicitly_touched() {
        // mul rcx touches rax and rdx implicitly; the loop register must
        // avoid rax, rcx and rdx.
        let block = disassemble(&[0x48, 0xf7, 0xe1]).unwrap();
        assert_eq!(loop_register(&block), Some(Gpr::Rsi));
    }

    #[test]
    fn test_loop_register_disjoint_from_touched_registers() {
        let block = disassemble(&[0x48, 0x8b, 0x03]).unwrap(); // mov rax, [rbx]
        let used = used_registers(&block);
        let loop_reg = loop_register(&block).unwrap();
        assert!(!used.contains(&Reg::Gpr(loop_reg)));
    }
}
