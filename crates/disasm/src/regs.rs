// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Register-info oracle: canonical register identities, sub-register
//! resolution, and the enumeration orders used by the annotator.
//!
//! The disassembler reports registers by textual name and at whatever width
//! the instruction encodes (`"al"`, `"eax"`, ...). Everything downstream
//! works on canonical full-width identities: writing `eax` clobbers `rax`,
//! reading `r8d` reads `r8`.

use std::fmt;

/// The 16 general-purpose registers, in x86-64 encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    /// All GPRs in encoding order.
    pub const ALL: [Gpr; 16] = [
        Gpr::Rax,
        Gpr::Rcx,
        Gpr::Rdx,
        Gpr::Rbx,
        Gpr::Rsp,
        Gpr::Rbp,
        Gpr::Rsi,
        Gpr::Rdi,
        Gpr::R8,
        Gpr::R9,
        Gpr::R10,
        Gpr::R11,
        Gpr::R12,
        Gpr::R13,
        Gpr::R14,
        Gpr::R15,
    ];

    /// Hardware encoding number (0..=15).
    pub fn num(self) -> u8 {
        self as u8
    }

    /// Canonical uppercase name.
    pub fn name(self) -> &'static str {
        const NAMES: [&str; 16] = [
            "RAX", "RCX", "RDX", "RBX", "RSP", "RBP", "RSI", "RDI", "R8", "R9", "R10", "R11",
            "R12", "R13", "R14", "R15",
        ];
        NAMES[self as usize]
    }
}

/// Segment registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Seg {
    Cs,
    Ds,
    Es,
    Fs,
    Gs,
    Ss,
}

impl Seg {
    pub fn name(self) -> &'static str {
        match self {
            Seg::Cs => "CS",
            Seg::Ds => "DS",
            Seg::Es => "ES",
            Seg::Fs => "FS",
            Seg::Gs => "GS",
            Seg::Ss => "SS",
        }
    }
}

/// A canonical (full-width) register identity.
///
/// The derived `Ord` gives the deterministic enumeration order used when
/// reporting register sets: GPRs in encoding order, then vector registers,
/// then flags, instruction pointer and segment registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reg {
    Gpr(Gpr),
    Xmm(u8),
    Rflags,
    Rip,
    Seg(Seg),
}

impl Reg {
    /// Canonical uppercase name (`"RAX"`, `"XMM5"`, `"RFLAGS"`).
    pub fn name(self) -> &'static str {
        const XMM_NAMES: [&str; 16] = [
            "XMM0", "XMM1", "XMM2", "XMM3", "XMM4", "XMM5", "XMM6", "XMM7", "XMM8", "XMM9",
            "XMM10", "XMM11", "XMM12", "XMM13", "XMM14", "XMM15",
        ];
        match self {
            Reg::Gpr(gpr) => gpr.name(),
            Reg::Xmm(n) => XMM_NAMES[n as usize],
            Reg::Rflags => "RFLAGS",
            Reg::Rip => "RIP",
            Reg::Seg(seg) => seg.name(),
        }
    }

    /// Stable numeric id, used by the JSON emitter: GPRs 0..=15,
    /// XMM 16..=31, RFLAGS 32, RIP 33, segment registers 34..=39.
    pub fn id(self) -> u32 {
        match self {
            Reg::Gpr(gpr) => gpr as u32,
            Reg::Xmm(n) => 16 + n as u32,
            Reg::Rflags => 32,
            Reg::Rip => 33,
            Reg::Seg(seg) => 34 + seg as u32,
        }
    }

    /// True for the 16 canonical general-purpose registers.
    pub fn is_gpr(self) -> bool {
        matches!(self, Reg::Gpr(_))
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Loop-register election order: allocation order with the stack registers
/// last, so a free scratch register wins over RBP/RSP whenever one exists.
pub const LOOP_CANDIDATES: [Gpr; 16] = [
    Gpr::Rax,
    Gpr::Rcx,
    Gpr::Rdx,
    Gpr::Rsi,
    Gpr::Rdi,
    Gpr::R8,
    Gpr::R9,
    Gpr::R10,
    Gpr::R11,
    Gpr::Rbx,
    Gpr::R14,
    Gpr::R15,
    Gpr::R12,
    Gpr::R13,
    Gpr::Rbp,
    Gpr::Rsp,
];

/// Resolve a textual register name (any width, as printed by the
/// disassembler) to its canonical full-width identity.
///
/// Returns `None` for names outside the modeled classes (x87, MMX, control
/// and debug registers).
pub fn lookup(name: &str) -> Option<Reg> {
    let reg = match name {
        "rax" | "eax" | "ax" | "al" | "ah" => Reg::Gpr(Gpr::Rax),
        "rcx" | "ecx" | "cx" | "cl" | "ch" => Reg::Gpr(Gpr::Rcx),
        "rdx" | "edx" | "dx" | "dl" | "dh" => Reg::Gpr(Gpr::Rdx),
        "rbx" | "ebx" | "bx" | "bl" | "bh" => Reg::Gpr(Gpr::Rbx),
        "rsp" | "esp" | "sp" | "spl" => Reg::Gpr(Gpr::Rsp),
        "rbp" | "ebp" | "bp" | "bpl" => Reg::Gpr(Gpr::Rbp),
        "rsi" | "esi" | "si" | "sil" => Reg::Gpr(Gpr::Rsi),
        "rdi" | "edi" | "di" | "dil" => Reg::Gpr(Gpr::Rdi),
        "r8" | "r8d" | "r8w" | "r8b" => Reg::Gpr(Gpr::R8),
        "r9" | "r9d" | "r9w" | "r9b" => Reg::Gpr(Gpr::R9),
        "r10" | "r10d" | "r10w" | "r10b" => Reg::Gpr(Gpr::R10),
        "r11" | "r11d" | "r11w" | "r11b" => Reg::Gpr(Gpr::R11),
        "r12" | "r12d" | "r12w" | "r12b" => Reg::Gpr(Gpr::R12),
        "r13" | "r13d" | "r13w" | "r13b" => Reg::Gpr(Gpr::R13),
        "r14" | "r14d" | "r14w" | "r14b" => Reg::Gpr(Gpr::R14),
        "r15" | "r15d" | "r15w" | "r15b" => Reg::Gpr(Gpr::R15),
        "rflags" | "eflags" | "flags" => Reg::Rflags,
        "rip" | "eip" => Reg::Rip,
        "cs" => Reg::Seg(Seg::Cs),
        "ds" => Reg::Seg(Seg::Ds),
        "es" => Reg::Seg(Seg::Es),
        "fs" => Reg::Seg(Seg::Fs),
        "gs" => Reg::Seg(Seg::Gs),
        "ss" => Reg::Seg(Seg::Ss),
        _ => {
            // xmm/ymm/zmm all canonicalize to the XMM identity.
            let stripped = name
                .strip_prefix("xmm")
                .or_else(|| name.strip_prefix("ymm"))
                .or_else(|| name.strip_prefix("zmm"))?;
            let n: u8 = stripped.parse().ok()?;
            if n > 15 {
                return None;
            }
            Reg::Xmm(n)
        }
    };
    Some(reg)
}

#[cfg(test)]
mod tests {
    use super::{lookup, Gpr, Reg, LOOP_CANDIDATES};

    #[test]
    fn test_sub_register_resolution() {
        assert_eq!(lookup("al"), Some(Reg::Gpr(Gpr::Rax)));
        assert_eq!(lookup("eax"), Some(Reg::Gpr(Gpr::Rax)));
        assert_eq!(lookup("r8d"), Some(Reg::Gpr(Gpr::R8)));
        assert_eq!(lookup("spl"), Some(Reg::Gpr(Gpr::Rsp)));
        assert_eq!(lookup("ymm3"), Some(Reg::Xmm(3)));
        assert_eq!(lookup("eflags"), Some(Reg::Rflags));
        assert_eq!(lookup("st0"), None);
    }

    #[test]
    fn test_enumeration_order() {
        assert!(Reg::Gpr(Gpr::Rcx) < Reg::Gpr(Gpr::Rdx));
        assert!(Reg::Gpr(Gpr::R15) < Reg::Xmm(0));
        assert!(Reg::Xmm(15) < Reg::Rflags);
    }

    #[test]
    fn test_ids_are_stable_and_distinct() {
        let mut ids: Vec<u32> = Gpr::ALL.iter().map(|&g| Reg::Gpr(g).id()).collect();
        ids.extend((0..16).map(|n| Reg::Xmm(n).id()));
        ids.push(Reg::Rflags.id());
        ids.push(Reg::Rip.id());
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 34);
        assert_eq!(Reg::Gpr(Gpr::Rax).id(), 0);
        assert_eq!(Reg::Xmm(0).id(), 16);
    }

    #[test]
    fn test_loop_candidates_cover_all_gprs() {
        let mut candidates = LOOP_CANDIDATES.to_vec();
        candidates.sort_unstable();
        let mut all = Gpr::ALL.to_vec();
        all.sort_unstable();
        assert_eq!(candidates, all);
        assert_eq!(LOOP_CANDIDATES[0], Gpr::Rax);
        assert_eq!(LOOP_CANDIDATES[15], Gpr::Rsp);
    }
}
