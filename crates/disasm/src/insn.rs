// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Instruction and operand model shared by the annotator and the graph builder

/// Address expression of a memory operand: `[base + index * scale + displacement]`,
/// optionally with a segment override.
///
/// Register names are the textual names produced by the disassembler
/// (`"rax"`, `"rbx"`, ...); `None` means the component is absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AddressExpr {
    pub base: Option<String>,
    pub index: Option<String>,
    pub segment: Option<String>,
    pub displacement: i64,
    pub scale: u8,
}

impl AddressExpr {
    /// An address expression consisting of a single base register.
    pub fn base(register: impl Into<String>) -> Self {
        Self {
            base: Some(register.into()),
            scale: 1,
            ..Self::default()
        }
    }
}

/// One operand of a decoded instruction.
///
/// A memory access is represented by *two* operands: an [`Operand::Address`]
/// carrying the addressing computation (always an input) and an
/// [`Operand::Memory`] carrying the access itself (input for loads, output
/// for stores). Memory operands that may alias carry the same alias group id.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A register, by its textual name (`"rax"`, `"ecx"`, `"xmm3"`, ...).
    Register(String),
    /// An integer immediate.
    Immediate(i64),
    /// A floating-point immediate.
    FpImmediate(f64),
    /// The addressing computation of a memory operand.
    Address(AddressExpr),
    /// A memory access, identified by its alias group.
    Memory(u32),
    /// An operand the disassembler could not classify.
    Unknown,
}

/// A single decoded x86-64 instruction.
///
/// Immutable once produced by [`crate::disassemble`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstruction {
    /// Lowercase mnemonic (`"add"`, `"mov"`, ...).
    pub mnemonic: String,
    /// Prefixes in instruction order (`"lock"`, `"rep"`, `"repne"`).
    pub prefixes: Vec<String>,
    /// Explicit input operands, in operand order.
    pub input_operands: Vec<Operand>,
    /// Explicit output operands, in operand order.
    pub output_operands: Vec<Operand>,
    /// Implicit input operands (registers read but not encoded).
    pub implicit_input_operands: Vec<Operand>,
    /// Implicit output operands (registers written but not encoded).
    pub implicit_output_operands: Vec<Operand>,
    /// Rendered assembly text.
    pub assembly: String,
    /// Raw machine code bytes of this instruction.
    pub machine_code: Vec<u8>,
    /// Byte offset of the instruction within the block.
    pub address: u64,
}

impl DecodedInstruction {
    /// Iterate over all input operands, explicit before implicit.
    pub fn inputs(&self) -> impl Iterator<Item = &Operand> {
        self.input_operands
            .iter()
            .chain(self.implicit_input_operands.iter())
    }

    /// Iterate over all output operands, explicit before implicit.
    pub fn outputs(&self) -> impl Iterator<Item = &Operand> {
        self.output_operands
            .iter()
            .chain(self.implicit_output_operands.iter())
    }
}
