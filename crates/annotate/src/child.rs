// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Child-process block execution (Linux x86-64)
//!
//! Runs an untrusted basic block in a forked child so that whatever it does
//! to registers and memory dies with it. The protocol:
//!
//! 1. The parent maps a `MAP_SHARED` report page and forks.
//! 2. The child installs a `SIGSEGV`/`SIGBUS` handler on an alternate
//!    signal stack (the block is entered with rsp pointing at an arbitrary
//!    value, so fault delivery cannot use the block's stack), maps the
//!    requested data pages, maps a scratch code page, and jumps to
//!    prologue + block + epilogue.
//! 3. The prologue is generated machine code that loads every GPR with its
//!    requested initial value; the epilogue is an `exit_group(0)` syscall
//!    sequence, so completing the block needs no usable stack.
//! 4. On a fault the handler writes the faulting address to the report page
//!    and `_exit`s with a recognizable status; the parent decodes the wait
//!    status and the report.
//!
//! Everything the child does after `fork` is async-signal-safe: the
//! complete code image is assembled in the parent, and the child only maps,
//! copies and jumps.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::time::{Duration, Instant};

use libc::{c_int, c_void, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, MAP_SHARED, PROT_EXEC, PROT_READ, PROT_WRITE};

use crate::addrs::INITIAL_MEM_VAL;
use crate::error::{FinderError, FinderResult};
use crate::harness::RunOutcome;

/// Where the code image is placed, hint only. The address sits in the
/// middle of a large normally-empty range, so rip-relative addressing from
/// the block is likely to hit unmapped memory and be observed as a fault.
const DEFAULT_CODE_LOCATION: u64 = 0x2b00_0000_0000;

const EXIT_COMPLETED: i32 = 0;
const EXIT_SETUP: i32 = 57;
const EXIT_FAULT: i32 = 58;

const ALT_STACK_SIZE: usize = 64 * 1024;

const STAGE_SETUP: u32 = 0;
const STAGE_RUNNING: u32 = 1;
const STAGE_FAULTED: u32 = 2;

/// Report page shared between parent and child. Written by the child
/// strictly before `_exit`, read by the parent strictly after `waitpid`,
/// so plain volatile accesses are sufficient.
#[repr(C)]
struct Report {
    stage: u32,
    setup_errno: i32,
    fault_address: u64,
}

/// Report location for the fault handler; set in the child before the
/// handler is installed.
static REPORT_PTR: AtomicPtr<Report> = AtomicPtr::new(ptr::null_mut());

/// One block execution request.
pub(crate) struct RunRequest<'a> {
    /// Raw block bytes, without prologue/epilogue.
    pub code: &'a [u8],
    /// Initial GPR values, indexed by hardware encoding number.
    pub initial_regs: [u64; 16],
    /// Page-aligned data regions to map before running.
    pub mappings: &'a [u64],
    /// Size of each data region.
    pub block_size: u64,
    /// Wall-clock cap on the child.
    pub timeout: Duration,
}

/// `movabs` of every GPR, rsp last, followed by the block in the caller's
/// image layout.
fn prologue_code(initial_regs: &[u64; 16]) -> Vec<u8> {
    let mut code = Vec::with_capacity(16 * 10);
    for num in (0..16usize).filter(|&n| n != 4).chain([4]) {
        let rex = if num >= 8 { 0x49 } else { 0x48 };
        code.push(rex);
        code.push(0xb8 + (num as u8 & 7));
        code.extend_from_slice(&initial_regs[num].to_le_bytes());
    }
    code
}

/// `exit_group(0)`: mov eax, 231; xor edi, edi; syscall.
const EPILOGUE: [u8; 9] = [0xb8, 0xe7, 0x00, 0x00, 0x00, 0x31, 0xff, 0x0f, 0x05];

/// Run one block in a forked child.
pub(crate) fn run_block(request: &RunRequest<'_>) -> FinderResult<RunOutcome> {
    // The full code image is assembled before forking; the child must not
    // allocate (fork from a threaded process may leave the allocator lock
    // held by a thread that no longer exists).
    let mut image = prologue_code(&request.initial_regs);
    image.extend_from_slice(request.code);
    image.extend_from_slice(&EPILOGUE);

    // Safety: anonymous shared mapping of a fresh page; checked for
    // MAP_FAILED below.
    let report = unsafe {
        libc::mmap(
            ptr::null_mut(),
            std::mem::size_of::<Report>(),
            PROT_READ | PROT_WRITE,
            MAP_SHARED | MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if report == MAP_FAILED {
        return Err(FinderError::Child {
            reason: format!("mmap of report page failed: {}", last_errno()),
        });
    }
    let report = report as *mut Report;
    // Safety: report points at a valid, exclusively-owned mapping.
    unsafe {
        ptr::write_volatile(
            report,
            Report {
                stage: STAGE_SETUP,
                setup_errno: 0,
                fault_address: 0,
            },
        );
    }

    // Safety: fork followed by async-signal-safe-only calls in the child.
    let pid = unsafe { libc::fork() };
    let result = match pid {
        -1 => Err(FinderError::Child {
            reason: format!("fork failed: {}", last_errno()),
        }),
        0 => child_main(request, &image, report),
        _ => parent_wait(pid, report, request.timeout),
    };

    // Safety: unmapping the page mapped above; the child is gone.
    unsafe {
        libc::munmap(report as *mut c_void, std::mem::size_of::<Report>());
    }
    result
}

fn last_errno() -> std::io::Error {
    std::io::Error::last_os_error()
}

/// Child side. Never returns; exits with one of the recognized statuses.
fn child_main(request: &RunRequest<'_>, image: &[u8], report: *mut Report) -> ! {
    REPORT_PTR.store(report, Ordering::SeqCst);

    unsafe {
        // Alternate stack for fault delivery: rsp is garbage while the
        // block runs.
        let stack = libc::mmap(
            ptr::null_mut(),
            ALT_STACK_SIZE,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        );
        if stack == MAP_FAILED {
            setup_fail(report);
        }
        let alt_stack = libc::stack_t {
            ss_sp: stack,
            ss_flags: 0,
            ss_size: ALT_STACK_SIZE,
        };
        if libc::sigaltstack(&alt_stack, ptr::null_mut()) != 0 {
            setup_fail(report);
        }

        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = fault_handler as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
        libc::sigemptyset(&mut action.sa_mask);
        for signal in [libc::SIGSEGV, libc::SIGBUS] {
            if libc::sigaction(signal, &action, ptr::null_mut()) != 0 {
                setup_fail(report);
            }
        }

        // Previously discovered data pages, placed exactly where the block
        // expects them and filled with the initial memory value.
        for &address in request.mappings {
            let size = request.block_size as usize;
            let page = libc::mmap(
                address as *mut c_void,
                size,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS | libc::MAP_FIXED_NOREPLACE,
                -1,
                0,
            );
            if page == MAP_FAILED || page as u64 != address {
                setup_fail(report);
            }
            let words = page as *mut u32;
            for i in 0..size / 4 {
                ptr::write(words.add(i), INITIAL_MEM_VAL as u32);
            }
        }

        // Scratch code page; the location is a hint and whatever the kernel
        // returns is accepted.
        let code_page = libc::mmap(
            DEFAULT_CODE_LOCATION as *mut c_void,
            image.len(),
            PROT_READ | PROT_WRITE | PROT_EXEC,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        );
        if code_page == MAP_FAILED {
            setup_fail(report);
        }
        ptr::copy_nonoverlapping(image.as_ptr(), code_page as *mut u8, image.len());

        ptr::write_volatile(ptr::addr_of_mut!((*report).stage), STAGE_RUNNING);

        let entry: extern "C" fn() = std::mem::transmute(code_page);
        entry();

        // The epilogue exits the process; reaching this point means the
        // image was not executed at all.
        libc::_exit(EXIT_SETUP);
    }
}

/// Record the setup errno and bail out of the child.
fn setup_fail(report: *mut Report) -> ! {
    unsafe {
        let errno = last_errno().raw_os_error().unwrap_or(0);
        ptr::write_volatile(ptr::addr_of_mut!((*report).setup_errno), errno);
        libc::_exit(EXIT_SETUP);
    }
}

/// SIGSEGV/SIGBUS handler, running on the alternate stack. Only
/// async-signal-safe operations: volatile stores and `_exit`.
extern "C" fn fault_handler(_signal: c_int, info: *mut libc::siginfo_t, _context: *mut c_void) {
    let report = REPORT_PTR.load(Ordering::SeqCst);
    unsafe {
        if !report.is_null() {
            let address = (*info).si_addr() as u64;
            ptr::write_volatile(ptr::addr_of_mut!((*report).fault_address), address);
            ptr::write_volatile(ptr::addr_of_mut!((*report).stage), STAGE_FAULTED);
        }
        libc::_exit(EXIT_FAULT);
    }
}

/// Parent side: reap the child under a deadline and decode what happened.
fn parent_wait(pid: libc::pid_t, report: *const Report, timeout: Duration) -> FinderResult<RunOutcome> {
    let deadline = Instant::now() + timeout;
    loop {
        let mut status: c_int = 0;
        // Safety: pid is our direct child.
        let waited = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if waited == -1 {
            return Err(FinderError::Child {
                reason: format!("waitpid failed: {}", last_errno()),
            });
        }
        if waited == pid {
            return interpret_status(status, report);
        }

        if Instant::now() >= deadline {
            // Safety: kill + blocking reap of our own child.
            unsafe {
                libc::kill(pid, libc::SIGKILL);
                libc::waitpid(pid, ptr::null_mut(), 0);
            }
            return Err(FinderError::Timeout {
                millis: timeout.as_millis() as u64,
            });
        }
        std::thread::sleep(Duration::from_micros(200));
    }
}

fn interpret_status(status: c_int, report: *const Report) -> FinderResult<RunOutcome> {
    if libc::WIFEXITED(status) {
        // Safety: the child exited, so its writes to the shared report page
        // are complete and visible.
        let (stage, setup_errno, fault_address) = unsafe {
            (
                ptr::read_volatile(ptr::addr_of!((*report).stage)),
                ptr::read_volatile(ptr::addr_of!((*report).setup_errno)),
                ptr::read_volatile(ptr::addr_of!((*report).fault_address)),
            )
        };
        return match libc::WEXITSTATUS(status) {
            EXIT_COMPLETED => Ok(RunOutcome::Completed),
            EXIT_FAULT if stage == STAGE_FAULTED => Ok(RunOutcome::Segfault(fault_address)),
            EXIT_FAULT => Err(FinderError::Child {
                reason: "child reported a fault exit without a fault record".to_string(),
            }),
            EXIT_SETUP => Err(FinderError::Child {
                reason: format!("child setup failed (errno {setup_errno})"),
            }),
            other => Err(FinderError::Child {
                reason: format!("child exited with unexpected status {other}"),
            }),
        };
    }

    if libc::WIFSIGNALED(status) {
        // A signal the handler does not cover (SIGILL, SIGFPE, ...), or one
        // it could not survive. There is no address to attribute.
        return Err(FinderError::FatalFault {
            address: 0,
            signal: libc::WTERMSIG(status),
        });
    }

    Err(FinderError::Child {
        reason: format!("unexpected wait status {status:#x}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{prologue_code, EPILOGUE};

    #[test]
    fn test_prologue_is_sixteen_movabs() {
        let mut regs = [0u64; 16];
        for (i, reg) in regs.iter_mut().enumerate() {
            *reg = i as u64;
        }
        let code = prologue_code(&regs);
        assert_eq!(code.len(), 16 * 10);

        // First instruction: movabs rax, 0 (rax has encoding number 0).
        assert_eq!(&code[..10], &[0x48, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0]);
        // rsp (encoding 4) is loaded last.
        let last = &code[15 * 10..];
        assert_eq!(last[0], 0x48);
        assert_eq!(last[1], 0xb8 + 4);
        assert_eq!(u64::from_le_bytes(last[2..].try_into().unwrap()), 4);
    }

    #[test]
    fn test_prologue_uses_rex_b_for_extended_registers() {
        let code = prologue_code(&[0x12345600; 16]);
        // r8 (encoding 8) is the eighth instruction emitted (rsp deferred).
        let r8 = &code[7 * 10..8 * 10];
        assert_eq!(r8[0], 0x49);
        assert_eq!(r8[1], 0xb8);
    }

    #[test]
    fn test_epilogue_is_exit_group() {
        assert_eq!(EPILOGUE, [0xb8, 0xe7, 0x00, 0x00, 0x00, 0x31, 0xff, 0x0f, 0x05]);
    }
}
