//! Integration tests for the annotation pipeline
//!
//! The finder tests execute real machine code in forked children and are
//! gated to x86-64 Linux; the pipeline tests run everywhere via the `none`
//! annotator.

use std::fs;

use annotate::pipeline::{self, AnnotatorKind, PipelineConfig};
use tempfile::TempDir;

fn config(csv: &std::path::Path, annotator: AnnotatorKind) -> PipelineConfig {
    PipelineConfig {
        bhive_csv: csv.to_path_buf(),
        asm_output_dir: None,
        json_output_dir: None,
        annotator,
        blocks_per_json_file: usize::MAX,
        max_bb_count: usize::MAX,
        report_progress_every: usize::MAX,
        skip_no_loop_register: true,
    }
}

fn write_csv(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("blocks.csv");
    fs::write(&path, contents).expect("failed to write csv");
    path
}

#[test]
fn test_pipeline_emits_asm_and_json() {
    let dir = TempDir::new().unwrap();
    let asm_dir = dir.path().join("asm");
    let json_dir = dir.path().join("json");
    fs::create_dir(&asm_dir).unwrap();
    fs::create_dir(&json_dir).unwrap();

    let csv = write_csv(&dir, "90,1.0\n4883c1014883fa40,2.5\n");
    let mut cfg = config(&csv, AnnotatorKind::None);
    cfg.asm_output_dir = Some(asm_dir.clone());
    cfg.json_output_dir = Some(json_dir.clone());
    cfg.blocks_per_json_file = 1;

    let report = pipeline::run(&cfg).expect("pipeline failed");
    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped_no_loop_register, 0);

    // Block 0: a lone nop. No register definitions, loop register rax.
    let nop_snippet = fs::read_to_string(asm_dir.join("0.test")).unwrap();
    assert_eq!(nop_snippet, "# LLVM-EXEGESIS-LOOP-REGISTER RAX\nnop\n");

    // Block 1: add rcx, 1; cmp rdx, 64. rcx and rdx must be defined, no
    // memory directives.
    let add_snippet = fs::read_to_string(asm_dir.join("1.test")).unwrap();
    assert!(add_snippet.starts_with(
        "# LLVM-EXEGESIS-DEFREG RCX 12345600\n# LLVM-EXEGESIS-DEFREG RDX 12345600\n"
    ));
    assert!(add_snippet.contains("# LLVM-EXEGESIS-LOOP-REGISTER RAX\n"));
    assert!(!add_snippet.contains("MEM"));

    // One JSON file per block.
    for (file, hex) in [(0, "90"), (1, "4883c1014883fa40")] {
        let contents = fs::read_to_string(json_dir.join(format!("{file}.json"))).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        let entries = parsed.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["Hex"], hex);
        assert_eq!(entries[0]["MemoryDefinitions"], serde_json::json!([]));
    }
}

#[test]
fn test_pipeline_skips_blocks_without_loop_register() {
    // add reg, 1 over all sixteen GPRs leaves no free loop register.
    let mut hex = String::new();
    for n in 0..8 {
        hex.push_str(&format!("4883c{n:x}01"));
    }
    for n in 0..8 {
        hex.push_str(&format!("4983c{n:x}01"));
    }

    let dir = TempDir::new().unwrap();
    let asm_dir = dir.path().join("asm");
    fs::create_dir(&asm_dir).unwrap();
    let csv = write_csv(&dir, &format!("{hex},3.0\n90,1.0\n"));
    let mut cfg = config(&csv, AnnotatorKind::None);
    cfg.asm_output_dir = Some(asm_dir.clone());

    let report = pipeline::run(&cfg).expect("pipeline failed");
    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped_no_loop_register, 1);

    // The skipped block consumes no file number; the nop lands at 0.test.
    assert!(asm_dir.join("0.test").exists());
    assert!(!asm_dir.join("1.test").exists());
}

#[test]
fn test_pipeline_respects_max_bb_count() {
    let dir = TempDir::new().unwrap();
    let csv = write_csv(&dir, "90,1.0\n90,1.0\n90,1.0\n");
    let mut cfg = config(&csv, AnnotatorKind::None);
    cfg.max_bb_count = 2;

    let report = pipeline::run(&cfg).expect("pipeline failed");
    assert_eq!(report.processed, 2);
}

#[test]
fn test_pipeline_rejects_line_without_comma() {
    let dir = TempDir::new().unwrap();
    let csv = write_csv(&dir, "90\n");
    let error = pipeline::run(&config(&csv, AnnotatorKind::None)).unwrap_err();
    assert_eq!(error.exit_code(), 2);
}

#[test]
fn test_pipeline_rejects_empty_line() {
    let dir = TempDir::new().unwrap();
    let csv = write_csv(&dir, "90,1.0\n\n90,1.0\n");
    let error = pipeline::run(&config(&csv, AnnotatorKind::None)).unwrap_err();
    assert_eq!(error.exit_code(), 2);
}

#[test]
fn test_pipeline_rejects_bad_hex() {
    let dir = TempDir::new().unwrap();
    let csv = write_csv(&dir, "9z,1.0\n");
    let error = pipeline::run(&config(&csv, AnnotatorKind::None)).unwrap_err();
    assert_eq!(error.exit_code(), 2);
}

#[test]
fn test_pipeline_rejects_undecodable_block() {
    let dir = TempDir::new().unwrap();
    let csv = write_csv(&dir, "06,1.0\n");
    let error = pipeline::run(&config(&csv, AnnotatorKind::None)).unwrap_err();
    assert_eq!(error.exit_code(), 2);
    assert!(error.to_string().contains("06"));
}

#[test]
fn test_pipeline_missing_input_is_config_error() {
    let error = pipeline::run(&config(
        std::path::Path::new("/nonexistent/blocks.csv"),
        AnnotatorKind::None,
    ))
    .unwrap_err();
    assert_eq!(error.exit_code(), 1);
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod finders {
    use std::time::Duration;

    use annotate::{
        AddressFinder, ChildProcessHarness, ExegesisFinder, FastFinder, FinderError,
        INITIAL_REG_VAL,
    };
    use serial_test::serial;

    #[test]
    #[serial(child_process)]
    fn test_fast_finder_discovers_load_page() {
        // mov rax, [rbx] with rbx = 0x12345600 faults on page 0x12345000.
        let addrs = FastFinder::new().find(&[0x48, 0x8b, 0x03]).unwrap();
        assert_eq!(addrs.accessed_blocks, vec![0x12345000]);
        assert_eq!(addrs.initial_regs.len(), 16);
        assert!(addrs.initial_regs.values().all(|&v| v == INITIAL_REG_VAL));
    }

    #[test]
    #[serial(child_process)]
    fn test_fast_finder_discovers_store_page() {
        // mov [rbx], rax
        let addrs = FastFinder::new().find(&[0x48, 0x89, 0x03]).unwrap();
        assert_eq!(addrs.accessed_blocks, vec![0x12345000]);
    }

    #[test]
    #[serial(child_process)]
    fn test_fast_finder_discovers_stack_page() {
        // push rax writes just below rsp = 0x12345600.
        let addrs = FastFinder::new().find(&[0x50]).unwrap();
        assert_eq!(addrs.accessed_blocks, vec![0x12345000]);
    }

    #[test]
    #[serial(child_process)]
    fn test_fast_finder_clean_block_has_no_memory() {
        // add rcx, 1; cmp rdx, 64 never touches memory.
        let addrs = FastFinder::new()
            .find(&[0x48, 0x83, 0xc1, 0x01, 0x48, 0x83, 0xfa, 0x40])
            .unwrap();
        assert!(addrs.accessed_blocks.is_empty());
    }

    #[test]
    #[serial(child_process)]
    fn test_exegesis_finder_converges_on_single_load() {
        let addrs = ExegesisFinder::new().find(&[0x48, 0x8b, 0x03]).unwrap();
        assert_eq!(addrs.accessed_blocks, vec![0x12345000]);
        assert_eq!(addrs.block_size, 4096);
        assert!(addrs.initial_regs.is_empty());
    }

    #[test]
    #[serial(child_process)]
    fn test_exegesis_finder_collects_multiple_pages() {
        // mov rax, [rbx]; mov rcx, [rbx + 0x1000]
        let code = [0x48, 0x8b, 0x03, 0x48, 0x8b, 0x8b, 0x00, 0x10, 0x00, 0x00];
        let addrs = ExegesisFinder::new().find(&code).unwrap();
        assert_eq!(addrs.accessed_blocks, vec![0x12345000, 0x12346000]);
    }

    #[test]
    #[serial(child_process)]
    fn test_infinite_loop_times_out() {
        // jmp $ never finishes.
        let harness = ChildProcessHarness::with_timeout(Duration::from_millis(200));
        let result = FastFinder::with_harness(harness).find(&[0xeb, 0xfe]);
        assert!(matches!(result, Err(FinderError::Timeout { .. })));
    }

    #[test]
    #[serial(child_process)]
    fn test_illegal_instruction_is_fatal() {
        // ud2 raises SIGILL, which the finder cannot attribute to memory.
        let result = FastFinder::new().find(&[0x0f, 0x0b]);
        match result {
            Err(FinderError::FatalFault { signal, .. }) => {
                assert_eq!(signal, libc::SIGILL);
            }
            other => panic!("expected fatal fault, got {other:?}"),
        }
    }

    #[test]
    #[serial(child_process)]
    fn test_pipeline_with_fast_finder() {
        use annotate::pipeline::{self, AnnotatorKind};

        let dir = tempfile::TempDir::new().unwrap();
        let asm_dir = dir.path().join("asm");
        std::fs::create_dir(&asm_dir).unwrap();
        let csv = dir.path().join("blocks.csv");
        std::fs::write(&csv, "488b03,1.0\n").unwrap();

        let mut cfg = super::config(&csv, AnnotatorKind::Fast);
        cfg.asm_output_dir = Some(asm_dir.clone());

        let report = pipeline::run(&cfg).expect("pipeline failed");
        assert_eq!(report.processed, 1);

        let snippet = std::fs::read_to_string(asm_dir.join("0.test")).unwrap();
        assert!(snippet.contains("# LLVM-EXEGESIS-DEFREG RBX 12345600\n"));
        assert!(snippet.contains("# LLVM-EXEGESIS-MEM-DEF MEM 4096 00000008\n"));
        assert!(snippet.contains("# LLVM-EXEGESIS-MEM-MAP MEM 305418240\n"));
    }
}
