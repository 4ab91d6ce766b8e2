//! x86-64 basic-block disassembly façade
//!
//! Decodes raw machine-code bytes into a structured instruction model that
//! the annotator and the graph builder both consume. The crate provides:
//!
//! - [`disassemble`]: bytes → ordered [`DecodedInstruction`]s with explicit
//!   and implicit operands, prefixes, assembly text, and byte spans
//! - [`regs`]: the register-info oracle (canonical identities, sub-register
//!   resolution, enumeration orders)
//! - [`isa`]: per-mnemonic operand-role classification backing the operand
//!   derivation

pub mod decode;
pub mod insn;
pub mod isa;
pub mod regs;

pub use decode::{disassemble, DisassemblyError, GLOBAL_ALIAS_GROUP};
pub use insn::{AddressExpr, DecodedInstruction, Operand};
pub use regs::{Gpr, Reg, Seg, LOOP_CANDIDATES};
