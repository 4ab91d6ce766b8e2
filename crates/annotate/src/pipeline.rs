//! The annotation pipeline
//!
//! Drives the whole run: read BHive CSV records, disassemble each block,
//! analyze register roles, discover accessed memory with the configured
//! finder, apply the skip policy, and emit the enabled outputs. Processing
//! is strictly sequential; any parse, disassembly or finder failure aborts
//! the run so that the emitted dataset is never silently thinned.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use clap::ValueEnum;
use log::{info, warn};

use crate::block::AnnotatedBlock;
use crate::emit::{self, JsonBatchWriter};
use crate::error::PipelineError;
use crate::finder::{AddressFinder, ExegesisFinder, FastFinder, NoneFinder};
use crate::hex::parse_hex;

/// Which accessed-address finder to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AnnotatorKind {
    /// Complete page discovery via iterative mapping.
    Exegesis,
    /// Single-run discovery of the first faulting page.
    Fast,
    /// No memory discovery.
    None,
}

/// Pipeline configuration, mirrored by the CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Input CSV, one `<hex>,<throughput>` record per line.
    pub bhive_csv: PathBuf,
    /// Enables `.test` emission when set.
    pub asm_output_dir: Option<PathBuf>,
    /// Enables JSON emission when set.
    pub json_output_dir: Option<PathBuf>,
    pub annotator: AnnotatorKind,
    /// Blocks per JSON batch file; must be positive.
    pub blocks_per_json_file: usize,
    /// Upper bound on blocks written out.
    pub max_bb_count: usize,
    /// Progress log cadence in blocks; `usize::MAX` effectively disables it.
    pub report_progress_every: usize,
    /// Drop blocks without a loop register instead of emitting them.
    pub skip_no_loop_register: bool,
}

/// End-of-run accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    /// Blocks annotated and emitted.
    pub processed: usize,
    /// Blocks dropped by the loop-register skip policy.
    pub skipped_no_loop_register: usize,
}

/// First bytes of the hex record, for diagnostics.
fn hex_prefix(hex: &str) -> String {
    const PREFIX_LEN: usize = 16;
    if hex.chars().count() <= PREFIX_LEN {
        hex.to_string()
    } else {
        let prefix: String = hex.chars().take(PREFIX_LEN).collect();
        format!("{prefix}...")
    }
}

/// Run the pipeline to completion.
///
/// # Errors
///
/// Any input, disassembly or finder failure is fatal (the caller maps the
/// error to an exit code); a missing loop register under the skip policy is
/// counted, not failed.
pub fn run(config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
    let finder: Box<dyn AddressFinder> = match config.annotator {
        AnnotatorKind::Exegesis => Box::new(ExegesisFinder::new()),
        AnnotatorKind::Fast => Box::new(FastFinder::new()),
        AnnotatorKind::None => Box::new(NoneFinder),
    };

    let input = File::open(&config.bhive_csv).map_err(|e| PipelineError::Config {
        reason: format!("cannot open {}: {e}", config.bhive_csv.display()),
    })?;

    let mut json_writer = config
        .json_output_dir
        .as_ref()
        .map(|dir| JsonBatchWriter::new(dir.clone(), config.blocks_per_json_file));

    let mut file_counter: usize = 0;
    let mut skipped_no_loop_register: usize = 0;

    for (line_index, line) in BufReader::new(input).lines().enumerate() {
        if file_counter >= config.max_bb_count {
            break;
        }
        let line_number = line_index + 1;
        let line = line.map_err(|e| PipelineError::InputParse {
            line_number,
            reason: format!("read failed: {e}"),
        })?;

        let (hex, _throughput) =
            line.split_once(',')
                .ok_or_else(|| PipelineError::InputParse {
                    line_number,
                    reason: format!("no comma in record '{line}'"),
                })?;
        let code = parse_hex(hex).ok_or_else(|| PipelineError::InputParse {
            line_number,
            reason: format!("invalid hex '{}'", hex_prefix(hex)),
        })?;

        let instructions =
            disasm::disassemble(&code).map_err(|source| PipelineError::Disassembly {
                block_hex: hex_prefix(hex),
                source,
            })?;

        let accessed_addrs = finder.find(&code).map_err(|source| PipelineError::Finder {
            block_hex: hex_prefix(hex),
            source,
        })?;

        let block = AnnotatedBlock::new(instructions, accessed_addrs);

        // Without a loop register, downstream repeaters would execute an
        // incorrect iteration count; the policy is to drop such blocks.
        if block.loop_register.is_none() && config.skip_no_loop_register {
            warn!(
                "skipping block {}: no loop register available",
                hex_prefix(hex)
            );
            skipped_no_loop_register += 1;
            continue;
        }
        debug_assert!(block
            .loop_register
            .map_or(true, |l| !block.used_registers.contains(&disasm::Reg::Gpr(l))));

        if let Some(asm_dir) = &config.asm_output_dir {
            let path = asm_dir.join(format!("{file_counter}.test"));
            fs::write(&path, emit::asm_snippet(&block)).map_err(|source| {
                PipelineError::EmitterIo {
                    path: path.clone(),
                    source,
                }
            })?;
        }

        if let Some(writer) = &mut json_writer {
            writer.push(emit::json_snippet(&block, hex))?;
        }

        if config.report_progress_every != 0
            && file_counter != 0
            && file_counter % config.report_progress_every == 0
        {
            info!("finished annotating block #{file_counter}");
        }
        file_counter += 1;
    }

    if let Some(writer) = &mut json_writer {
        writer.finish()?;
    }

    Ok(PipelineReport {
        processed: file_counter,
        skipped_no_loop_register,
    })
}
