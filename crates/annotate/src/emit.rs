// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Snippet emission
//!
//! Serializes [`AnnotatedBlock`]s to the two on-disk formats consumed by
//! the benchmarking harness:
//!
//! - per-block `.test` files: directive comments declaring register values,
//!   memory definitions/mappings and the loop register, followed by the
//!   assembly text of the block
//! - batched `.json` files: an array with one object per block, carrying
//!   the same annotations plus the original hex
//!
//! Both formats are bit-exact contracts; the harness infers the memory
//! value's bit width from the length of the rendered hex string.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use disasm::Reg;
use serde::Serialize;

use crate::addrs::{INITIAL_MEM_VAL, INITIAL_MEM_VAL_BIT_WIDTH, INITIAL_REG_VAL, MEM_NAME};
use crate::block::AnnotatedBlock;
use crate::error::PipelineError;

const REG_DEF_PREFIX: &str = "# LLVM-EXEGESIS-DEFREG ";
const MEM_DEF_PREFIX: &str = "# LLVM-EXEGESIS-MEM-DEF ";
const MEM_MAP_PREFIX: &str = "# LLVM-EXEGESIS-MEM-MAP ";
const LOOP_REGISTER_PREFIX: &str = "# LLVM-EXEGESIS-LOOP-REGISTER ";

/// The memory initial value as bare hex, zero-padded so its length encodes
/// [`INITIAL_MEM_VAL_BIT_WIDTH`].
pub fn initial_mem_val_str() -> String {
    let digits = (INITIAL_MEM_VAL_BIT_WIDTH / 4) as usize;
    format!("{INITIAL_MEM_VAL:0>digits$x}")
}

/// Value a used register must be initialized to: the fast finder's snapshot
/// when it recorded one for this GPR, the default otherwise.
fn register_value(block: &AnnotatedBlock, reg: Reg) -> u64 {
    match reg {
        Reg::Gpr(gpr) => block
            .accessed_addrs
            .initial_regs
            .get(&gpr)
            .copied()
            .unwrap_or(INITIAL_REG_VAL),
        _ => INITIAL_REG_VAL,
    }
}

/// Render the `.test` snippet for one block.
pub fn asm_snippet(block: &AnnotatedBlock) -> String {
    let mut out = String::new();

    for &reg in &block.used_registers {
        let value = register_value(block, reg);
        let _ = writeln!(out, "{REG_DEF_PREFIX}{} {value:x}", reg.name());
    }

    // One shared definition; every mapping points at it.
    if !block.accessed_addrs.accessed_blocks.is_empty() {
        let _ = writeln!(
            out,
            "{MEM_DEF_PREFIX}{MEM_NAME} {} {}",
            block.accessed_addrs.block_size,
            initial_mem_val_str()
        );
    }
    for &address in &block.accessed_addrs.accessed_blocks {
        let _ = writeln!(out, "{MEM_MAP_PREFIX}{MEM_NAME} {address}");
    }

    if let Some(loop_register) = block.loop_register {
        let _ = writeln!(out, "{LOOP_REGISTER_PREFIX}{}", loop_register.name());
    }

    for instruction in &block.instructions {
        let _ = writeln!(out, "{}", instruction.assembly);
    }

    out
}

#[derive(Debug, Serialize)]
pub struct RegisterDefinition {
    #[serde(rename = "Register")]
    pub register: u32,
    #[serde(rename = "Value")]
    pub value: u64,
}

#[derive(Debug, Serialize)]
pub struct MemoryDefinition {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "Value")]
    pub value: u64,
}

#[derive(Debug, Serialize)]
pub struct MemoryMapping {
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "Address")]
    pub address: u64,
}

/// One element of a JSON batch.
#[derive(Debug, Serialize)]
pub struct JsonSnippet {
    #[serde(rename = "RegisterDefinitions")]
    pub register_definitions: Vec<RegisterDefinition>,
    #[serde(rename = "LoopRegister")]
    pub loop_register: Option<u32>,
    #[serde(rename = "MemoryDefinitions")]
    pub memory_definitions: Vec<MemoryDefinition>,
    #[serde(rename = "MemoryMappings")]
    pub memory_mappings: Vec<MemoryMapping>,
    #[serde(rename = "Hex")]
    pub hex: String,
}

/// Build the JSON representation of one block. `hex` is the original input
/// record, carried through verbatim.
pub fn json_snippet(block: &AnnotatedBlock, hex: &str) -> JsonSnippet {
    let register_definitions = block
        .used_registers
        .iter()
        .map(|reg| RegisterDefinition {
            register: reg.id(),
            value: INITIAL_REG_VAL,
        })
        .collect();

    let (memory_definitions, memory_mappings) =
        if block.accessed_addrs.accessed_blocks.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let definitions = vec![MemoryDefinition {
                name: MEM_NAME.to_string(),
                size: block.accessed_addrs.block_size,
                value: INITIAL_MEM_VAL,
            }];
            let mappings = block
                .accessed_addrs
                .accessed_blocks
                .iter()
                .map(|&address| MemoryMapping {
                    value: MEM_NAME.to_string(),
                    address,
                })
                .collect();
            (definitions, mappings)
        };

    JsonSnippet {
        register_definitions,
        loop_register: block.loop_register.map(|gpr| Reg::Gpr(gpr).id()),
        memory_definitions,
        memory_mappings,
        hex: hex.to_string(),
    }
}

/// Accumulates JSON snippets and writes them out `blocks_per_file` at a
/// time as `<n>.json`, `n` counting batches from zero. A partial final
/// batch is written by [`JsonBatchWriter::finish`].
pub struct JsonBatchWriter {
    output_dir: PathBuf,
    blocks_per_file: usize,
    pending: Vec<JsonSnippet>,
    count: usize,
}

impl JsonBatchWriter {
    /// `blocks_per_file` must be positive (validated at configuration
    /// time).
    pub fn new(output_dir: PathBuf, blocks_per_file: usize) -> Self {
        debug_assert!(blocks_per_file > 0);
        Self {
            output_dir,
            blocks_per_file,
            pending: Vec::new(),
            count: 0,
        }
    }

    pub fn push(&mut self, snippet: JsonSnippet) -> Result<(), PipelineError> {
        self.pending.push(snippet);
        if (self.count + 1) % self.blocks_per_file == 0 {
            self.write_batch(self.count / self.blocks_per_file)?;
        }
        self.count += 1;
        Ok(())
    }

    /// Flush a partial final batch, if any.
    pub fn finish(&mut self) -> Result<(), PipelineError> {
        if !self.pending.is_empty() {
            self.write_batch(self.count / self.blocks_per_file)?;
        }
        Ok(())
    }

    fn write_batch(&mut self, file_number: usize) -> Result<(), PipelineError> {
        let path = self.output_dir.join(format!("{file_number}.json"));
        let rendered =
            serde_json::to_string_pretty(&self.pending).map_err(|e| PipelineError::EmitterIo {
                path: path.clone(),
                source: std::io::Error::other(e),
            })?;
        fs::write(&path, rendered).map_err(|e| PipelineError::EmitterIo {
            path: path.clone(),
            source: e,
        })?;
        self.pending.clear();
        Ok(())
    }
}
