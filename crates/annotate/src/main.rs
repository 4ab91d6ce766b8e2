//! CLI for the basic-block annotator
//!
//! Converts a BHive CSV (`<hex>,<throughput>` per line) into annotated
//! benchmark snippets: per-block `.test` files and/or batched JSON bundles
//! declaring the registers to initialize, the memory to map, and a loop
//! register for repeaters.
//!
//! # Usage
//!
//! ```bash
//! annotate --bhive-csv blocks.csv \
//!     --asm-output-dir out/asm \
//!     --json-output-dir out/json \
//!     --annotator-implementation exegesis \
//!     --blocks-per-json-file 1000
//! ```
//!
//! Exit codes: 0 success, 1 configuration error, 2 input/disassembly/finder
//! error, 4 output I/O error.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use annotate::error::{EXIT_CONFIG, EXIT_SUCCESS};
use annotate::pipeline::{self, AnnotatorKind, PipelineConfig};

#[derive(Parser)]
#[command(name = "annotate")]
#[command(about = "Annotates BHive basic blocks with register and memory requirements")]
#[command(version)]
struct Cli {
    /// Input BHive CSV file
    #[arg(long)]
    bhive_csv: PathBuf,

    /// Directory for .test snippet files (omit to disable ASM output)
    #[arg(long)]
    asm_output_dir: Option<PathBuf>,

    /// Directory for JSON batch files (omit to disable JSON output)
    #[arg(long)]
    json_output_dir: Option<PathBuf>,

    /// The accessed-address finder to use
    #[arg(long, value_enum, default_value = "fast")]
    annotator_implementation: AnnotatorKind,

    /// Number of annotated blocks per JSON file
    #[arg(long, default_value_t = usize::MAX)]
    blocks_per_json_file: usize,

    /// Maximum number of basic blocks to process
    #[arg(long, default_value_t = usize::MAX)]
    max_bb_count: usize,

    /// Log progress every N blocks
    #[arg(long, default_value_t = usize::MAX)]
    report_progress_every: usize,

    /// Skip blocks for which no loop counter register can be found
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    skip_no_loop_register: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.blocks_per_json_file == 0 {
        eprintln!("error: --blocks-per-json-file must be greater than 0");
        process::exit(EXIT_CONFIG);
    }

    let config = PipelineConfig {
        bhive_csv: cli.bhive_csv,
        asm_output_dir: cli.asm_output_dir,
        json_output_dir: cli.json_output_dir,
        annotator: cli.annotator_implementation,
        blocks_per_json_file: cli.blocks_per_json_file,
        max_bb_count: cli.max_bb_count,
        report_progress_every: cli.report_progress_every,
        skip_no_loop_register: cli.skip_no_loop_register,
    };

    match pipeline::run(&config) {
        Ok(report) => {
            eprintln!(
                "annotated {} blocks; failed to find a loop register for {} blocks",
                report.processed, report.skipped_no_loop_register
            );
            process::exit(EXIT_SUCCESS);
        }
        Err(error) => {
            eprintln!("annotate error: {error}");
            process::exit(error.exit_code());
        }
    }
}
