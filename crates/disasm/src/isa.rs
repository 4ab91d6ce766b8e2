//! x86-64 mnemonic classification
//!
//! Single source of truth for the operand roles of each mnemonic: whether
//! the first explicit operand is read, written or both, and which registers
//! the instruction touches implicitly. This stands in for the instruction
//! descriptions a full machine-code framework would provide; it only needs
//! to cover the mnemonics that occur in basic-block datasets.

use std::collections::HashMap;

use lazy_static::lazy_static;

/// Role of the first explicit operand. All later explicit operands are reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestRole {
    /// First operand is only read (`cmp`, `test`, `push`).
    Read,
    /// First operand is only written (`mov`, `lea`, `pop`, `setcc`).
    Write,
    /// First operand is read and written (`add`, `xor`, `shl`).
    ReadWrite,
}

/// Operand roles of one mnemonic.
#[derive(Debug, Clone, Copy)]
pub struct InsnRoles {
    /// Role of the first explicit operand.
    pub dest: DestRole,
    /// Registers read implicitly, by canonical lowercase name.
    pub implicit_uses: &'static [&'static str],
    /// Registers written implicitly, by canonical lowercase name.
    pub implicit_defs: &'static [&'static str],
    /// The memory operand, if any, is a pure address computation and is
    /// neither loaded nor stored (`lea`).
    pub address_only: bool,
}

impl InsnRoles {
    const fn rw(implicit_uses: &'static [&'static str], implicit_defs: &'static [&'static str]) -> Self {
        Self {
            dest: DestRole::ReadWrite,
            implicit_uses,
            implicit_defs,
            address_only: false,
        }
    }

    const fn w(implicit_uses: &'static [&'static str], implicit_defs: &'static [&'static str]) -> Self {
        Self {
            dest: DestRole::Write,
            implicit_uses,
            implicit_defs,
            address_only: false,
        }
    }

    const fn r(implicit_uses: &'static [&'static str], implicit_defs: &'static [&'static str]) -> Self {
        Self {
            dest: DestRole::Read,
            implicit_uses,
            implicit_defs,
            address_only: false,
        }
    }

    const fn lea() -> Self {
        Self {
            dest: DestRole::Write,
            implicit_uses: &[],
            implicit_defs: &[],
            address_only: true,
        }
    }

    /// Conservative default for mnemonics not in the table: read-write
    /// destination that also sets flags. Over-approximating reads only adds
    /// registers to the must-initialize set, which is harmless.
    pub const DEFAULT: Self = Self::rw(&[], &["rflags"]);
}

const FLAGS: &[&str] = &["rflags"];
const NONE: &[&str] = &[];

/// Roles for a mnemonic as printed by the disassembler (lowercase).
pub fn roles(mnemonic: &str) -> InsnRoles {
    BY_MNEMONIC
        .get(mnemonic)
        .copied()
        .unwrap_or(InsnRoles::DEFAULT)
}

/// True for the string operations, the only instructions where a
/// rep/repne prefix byte is a repeat count rather than an opcode
/// extension.
pub fn is_string_op(mnemonic: &str) -> bool {
    STRING_OPS.contains(&mnemonic)
}

const STRING_OPS: &[&str] = &[
    "movs", "movsb", "movsw", "movsq", "stos", "stosb", "stosw", "stosd", "stosq", "lods",
    "lodsb", "lodsw", "lodsd", "lodsq", "scas", "scasb", "scasw", "scasd", "scasq", "cmps",
    "cmpsb", "cmpsw", "cmpsq",
];

lazy_static! {
    static ref BY_MNEMONIC: HashMap<&'static str, InsnRoles> = {
        let entries: &[(&[&str], InsnRoles)] = &[
            // Data movement: destination written, flags untouched.
            (
                &[
                    "mov", "movzx", "movsx", "movsxd", "movabs", "movaps", "movups", "movapd",
                    "movupd", "movdqa", "movdqu", "movss", "movsd", "movd", "movq", "lddqu",
                    "vmovaps", "vmovups", "vmovdqa", "vmovdqu", "vmovss", "vmovsd",
                ],
                InsnRoles::w(NONE, NONE),
            ),
            (&["lea"], InsnRoles::lea()),
            // Exchanges read and write both sides; modeling the first
            // operand as read-write captures every read.
            (&["xchg", "xadd"], InsnRoles::rw(NONE, FLAGS)),
            // Plain ALU: dest read-write, flags written.
            (
                &[
                    "add", "sub", "and", "or", "xor", "inc", "dec", "neg", "shl", "shr", "sar",
                    "sal", "rol", "ror", "rcl", "rcr", "bt", "bts", "btr", "btc", "bsf", "bsr",
                    "popcnt", "lzcnt", "tzcnt", "shld", "shrd",
                ],
                InsnRoles::rw(NONE, FLAGS),
            ),
            (&["imul"], InsnRoles::rw(NONE, FLAGS)),
            (&["not"], InsnRoles::rw(NONE, NONE)),
            // Carry-consuming ALU additionally reads flags.
            (&["adc", "sbb"], InsnRoles::rw(FLAGS, FLAGS)),
            // Pure comparisons: everything is read.
            (&["cmp", "test", "ucomiss", "ucomisd", "comiss", "comisd"], InsnRoles::r(NONE, FLAGS)),
            // Packed SSE arithmetic: no flags.
            (
                &[
                    "addps", "addpd", "addss", "addsd", "subps", "subpd", "subss", "subsd",
                    "mulps", "mulpd", "mulss", "mulsd", "divps", "divpd", "divss", "divsd",
                    "minps", "maxps", "minsd", "maxsd", "sqrtss", "sqrtsd", "andps", "andpd",
                    "orps", "orpd", "xorps", "xorpd", "pand", "por", "pxor", "paddb", "paddw",
                    "paddd", "paddq", "psubb", "psubw", "psubd", "psubq", "punpcklbw",
                    "punpcklwd", "punpckldq", "punpcklqdq", "pshufd", "pshufb", "pcmpeqb",
                    "pcmpeqd", "pcmpgtb", "pmovmskb", "cvtsi2ss", "cvtsi2sd", "cvttss2si",
                    "cvttsd2si", "cvtss2sd", "cvtsd2ss",
                ],
                InsnRoles::rw(NONE, NONE),
            ),
            // Stack traffic.
            (&["push"], InsnRoles::r(&["rsp"], &["rsp"])),
            (&["pop"], InsnRoles::w(&["rsp"], &["rsp"])),
            (&["pushf", "pushfq"], InsnRoles::r(&["rsp", "rflags"], &["rsp"])),
            (&["popf", "popfq"], InsnRoles::r(&["rsp"], &["rsp", "rflags"])),
            (&["call"], InsnRoles::r(&["rsp"], &["rsp"])),
            (&["ret"], InsnRoles::r(&["rsp"], &["rsp"])),
            (&["leave"], InsnRoles::r(&["rbp"], &["rsp", "rbp"])),
            (&["enter"], InsnRoles::r(&["rsp", "rbp"], &["rsp", "rbp"])),
            // Widening/narrowing conversions on the accumulator.
            (&["cbw", "cwde", "cdqe"], InsnRoles::r(&["rax"], &["rax"])),
            (&["cwd", "cdq", "cqo"], InsnRoles::r(&["rax"], &["rdx"])),
            // One-operand multiply/divide on rax/rdx.
            (&["mul"], InsnRoles::r(&["rax"], &["rax", "rdx", "rflags"])),
            (&["div", "idiv"], InsnRoles::r(&["rax", "rdx"], &["rax", "rdx", "rflags"])),
            // Condition-consuming instructions.
            (
                &[
                    "jo", "jno", "jb", "jnb", "jae", "jz", "je", "jnz", "jne", "jbe", "ja",
                    "js", "jns", "jp", "jnp", "jl", "jge", "jle", "jg", "jc", "jnc",
                ],
                InsnRoles::r(FLAGS, NONE),
            ),
            (&["jmp"], InsnRoles::r(NONE, NONE)),
            (
                &[
                    "cmovo", "cmovno", "cmovb", "cmovnb", "cmovae", "cmovz", "cmove", "cmovnz",
                    "cmovne", "cmovbe", "cmova", "cmovs", "cmovns", "cmovp", "cmovnp", "cmovl",
                    "cmovge", "cmovle", "cmovg",
                ],
                InsnRoles::rw(FLAGS, NONE),
            ),
            (
                &[
                    "seto", "setno", "setb", "setnb", "setae", "setz", "sete", "setnz", "setne",
                    "setbe", "seta", "sets", "setns", "setp", "setnp", "setl", "setge", "setle",
                    "setg",
                ],
                InsnRoles::w(FLAGS, NONE),
            ),
            // String operations, with and without the width suffix (the
            // disassembler may render either form). The rcx dependency of
            // rep-prefixed forms is added by the decoder when the prefix is
            // present.
            (
                &["movs", "movsb", "movsw", "movsq"],
                InsnRoles::r(&["rsi", "rdi"], &["rsi", "rdi"]),
            ),
            (
                &["stos", "stosb", "stosw", "stosd", "stosq"],
                InsnRoles::r(&["rax", "rdi"], &["rdi"]),
            ),
            (
                &["lods", "lodsb", "lodsw", "lodsd", "lodsq"],
                InsnRoles::r(&["rsi"], &["rsi", "rax"]),
            ),
            (
                &["scas", "scasb", "scasw", "scasd", "scasq"],
                InsnRoles::r(&["rax", "rdi", "rflags"], &["rdi", "rflags"]),
            ),
            (
                &["cmps", "cmpsb", "cmpsw", "cmpsq"],
                InsnRoles::r(&["rsi", "rdi"], &["rsi", "rdi", "rflags"]),
            ),
            // Reads of machine state.
            (&["rdtsc"], InsnRoles::r(NONE, &["rax", "rdx"])),
            (&["rdtscp"], InsnRoles::r(NONE, &["rax", "rcx", "rdx"])),
            (&["cpuid"], InsnRoles::r(&["rax", "rcx"], &["rax", "rbx", "rcx", "rdx"])),
            (&["lahf"], InsnRoles::r(FLAGS, &["rax"])),
            (&["sahf"], InsnRoles::r(&["rax"], FLAGS)),
            (&["cmc", "clc", "stc", "cld", "std"], InsnRoles::r(FLAGS, FLAGS)),
            // No-ops touch nothing; a memory-form nop reads nothing either,
            // but its address registers still count as reads.
            (&["nop", "pause", "endbr64", "ud2"], InsnRoles::r(NONE, NONE)),
        ];

        let mut map = HashMap::new();
        for (mnemonics, roles) in entries {
            for mnemonic in *mnemonics {
                let previous = map.insert(*mnemonic, *roles);
                assert!(previous.is_none(), "duplicate mnemonic entry: {mnemonic}");
            }
        }
        map
    };
}
