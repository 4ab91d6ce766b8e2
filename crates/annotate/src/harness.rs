//! Measurement-harness contract
//!
//! The address finders only need two capabilities from the execution
//! environment: run a block once under a given register state, and run it
//! with a set of memory regions mapped. [`Harness`] is that seam; the
//! production implementation is [`ChildProcessHarness`], which executes
//! blocks in a forked child (see [`crate::child`]). Tests substitute
//! scripted harnesses.

use std::collections::BTreeMap;
use std::time::Duration;

use disasm::Gpr;

use crate::addrs::{page_size, INITIAL_REG_VAL};
use crate::error::FinderResult;

/// What happened when a block was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The block ran to completion.
    Completed,
    /// The block faulted at the given address.
    Segfault(u64),
}

/// Execution capabilities consumed by the address finders.
pub trait Harness {
    /// Run the block once with the given initial GPR values; registers not
    /// in the map default to [`INITIAL_REG_VAL`].
    fn run_once(&self, code: &[u8], initial_regs: &BTreeMap<Gpr, u64>) -> FinderResult<RunOutcome>;

    /// Run the block with every region in `mappings` (each `block_size`
    /// bytes, filled with the initial memory value) mapped first. All GPRs
    /// hold [`INITIAL_REG_VAL`].
    fn run_with_mappings(
        &self,
        code: &[u8],
        block_size: u64,
        mappings: &[u64],
    ) -> FinderResult<RunOutcome>;
}

/// Harness executing blocks in a forked, signal-supervised child process.
#[derive(Debug, Clone)]
pub struct ChildProcessHarness {
    timeout: Duration,
}

/// Wall-clock cap per block execution. Basic blocks are straight-line code;
/// anything that runs this long is stuck on a serializing instruction or an
/// unmapped-but-mappable access pattern we cannot resolve.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

impl ChildProcessHarness {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ChildProcessHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
impl Harness for ChildProcessHarness {
    fn run_once(&self, code: &[u8], initial_regs: &BTreeMap<Gpr, u64>) -> FinderResult<RunOutcome> {
        let mut regs = [INITIAL_REG_VAL; 16];
        for (&gpr, &value) in initial_regs {
            regs[gpr.num() as usize] = value;
        }
        crate::child::run_block(&crate::child::RunRequest {
            code,
            initial_regs: regs,
            mappings: &[],
            block_size: page_size(),
            timeout: self.timeout,
        })
    }

    fn run_with_mappings(
        &self,
        code: &[u8],
        block_size: u64,
        mappings: &[u64],
    ) -> FinderResult<RunOutcome> {
        crate::child::run_block(&crate::child::RunRequest {
            code,
            initial_regs: [INITIAL_REG_VAL; 16],
            mappings,
            block_size,
            timeout: self.timeout,
        })
    }
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
impl Harness for ChildProcessHarness {
    fn run_once(
        &self,
        _code: &[u8],
        _initial_regs: &BTreeMap<Gpr, u64>,
    ) -> FinderResult<RunOutcome> {
        Err(crate::error::FinderError::Unsupported)
    }

    fn run_with_mappings(
        &self,
        _code: &[u8],
        _block_size: u64,
        _mappings: &[u64],
    ) -> FinderResult<RunOutcome> {
        Err(crate::error::FinderError::Unsupported)
    }
}
