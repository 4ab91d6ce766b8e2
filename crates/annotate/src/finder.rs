// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Accessed-address finder strategies
//!
//! Three interchangeable ways of producing an [`AccessedAddrs`] annotation:
//!
//! - [`FastFinder`]: run the block once and record the first faulting page.
//!   Cheap, approximate (a block touching several unmapped pages only
//!   reveals the first), and the only finder that reports the initial
//!   register snapshot.
//! - [`ExegesisFinder`]: iteratively map every faulting page and re-run
//!   until the block completes. Complete but more expensive.
//! - [`NoneFinder`]: no discovery at all; annotations carry no memory.

use std::collections::BTreeMap;

use disasm::Gpr;
use log::debug;

use crate::addrs::{align_down, page_size, AccessedAddrs, INITIAL_REG_VAL};
use crate::error::{FinderError, FinderResult};
use crate::harness::{ChildProcessHarness, Harness, RunOutcome};

/// Upper bound on map-and-retry rounds of the exegesis strategy. A basic
/// block of bounded length can only touch a bounded set of pages; needing
/// more rounds than this means the faults are not stabilizing.
pub const MAX_MAPPING_ROUNDS: usize = 64;

/// Discovers the memory annotation of one basic block.
pub trait AddressFinder {
    fn find(&self, code: &[u8]) -> FinderResult<AccessedAddrs>;
}

/// Single-run finder: every GPR is preset, the block runs once, and the
/// first segfault (if any) becomes the single accessed page.
pub struct FastFinder<H = ChildProcessHarness> {
    harness: H,
}

impl FastFinder<ChildProcessHarness> {
    pub fn new() -> Self {
        Self {
            harness: ChildProcessHarness::new(),
        }
    }
}

impl Default for FastFinder<ChildProcessHarness> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Harness> FastFinder<H> {
    pub fn with_harness(harness: H) -> Self {
        Self { harness }
    }
}

impl<H: Harness> AddressFinder for FastFinder<H> {
    fn find(&self, code: &[u8]) -> FinderResult<AccessedAddrs> {
        let block_size = page_size();
        let initial_regs: BTreeMap<Gpr, u64> =
            Gpr::ALL.iter().map(|&gpr| (gpr, INITIAL_REG_VAL)).collect();

        let accessed_blocks = match self.harness.run_once(code, &initial_regs)? {
            RunOutcome::Completed => Vec::new(),
            RunOutcome::Segfault(address) => vec![align_down(address, block_size)],
        };

        Ok(AccessedAddrs {
            block_size,
            accessed_blocks,
            initial_regs,
        })
    }
}

/// Fixed-point finder: map every page the block has faulted on so far and
/// re-run, until the block completes or the round bound is exhausted.
pub struct ExegesisFinder<H = ChildProcessHarness> {
    harness: H,
}

impl ExegesisFinder<ChildProcessHarness> {
    pub fn new() -> Self {
        Self {
            harness: ChildProcessHarness::new(),
        }
    }
}

impl Default for ExegesisFinder<ChildProcessHarness> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Harness> ExegesisFinder<H> {
    pub fn with_harness(harness: H) -> Self {
        Self { harness }
    }
}

impl<H: Harness> AddressFinder for ExegesisFinder<H> {
    fn find(&self, code: &[u8]) -> FinderResult<AccessedAddrs> {
        let block_size = page_size();
        let mut accessed_blocks: Vec<u64> = Vec::new();

        for round in 0..MAX_MAPPING_ROUNDS {
            match self
                .harness
                .run_with_mappings(code, block_size, &accessed_blocks)?
            {
                RunOutcome::Completed => {
                    debug!(
                        "block completed after {round} rounds with {} mappings",
                        accessed_blocks.len()
                    );
                    // Register state is left at the harness defaults; only
                    // the fast finder reports a snapshot.
                    return Ok(AccessedAddrs {
                        block_size,
                        accessed_blocks,
                        initial_regs: BTreeMap::new(),
                    });
                }
                RunOutcome::Segfault(address) => {
                    if address == 0 {
                        return Err(FinderError::FatalFault {
                            address,
                            signal: libc::SIGSEGV,
                        });
                    }
                    let page = align_down(address, block_size);
                    if accessed_blocks.contains(&page) {
                        // Faulting on a page that is already mapped cannot
                        // be fixed by mapping; this fault is not ours to
                        // resolve.
                        return Err(FinderError::FatalFault {
                            address,
                            signal: libc::SIGSEGV,
                        });
                    }
                    debug!("block faulted at {address:#x}; mapping page {page:#x}");
                    accessed_blocks.push(page);
                }
            }
        }

        Err(FinderError::NotConverged {
            rounds: MAX_MAPPING_ROUNDS,
        })
    }
}

/// No discovery: the annotation declares no memory and no register snapshot.
pub struct NoneFinder;

impl AddressFinder for NoneFinder {
    fn find(&self, _code: &[u8]) -> FinderResult<AccessedAddrs> {
        Ok(AccessedAddrs::empty(page_size()))
    }
}
