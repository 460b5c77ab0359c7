//! Crash reporting
//!
//! A SIGSEGV handler is installed once per process. While a
//! [`CrashGuard`] is alive, the engine it registered is flushed by the
//! handler before the banner is printed and the process aborts.
//!
//! The handler runs on an alternate signal stack so that a stack overflow
//! in the parser or a lowering job can still be reported. The thread that
//! installs the handler gets one for its lifetime; other threads take a
//! [`SignalStack`] guard with [`alternate_signal_stack`].

use super::DiagnosticEngine;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Arc, Once};

static ACTIVE_ENGINE: AtomicPtr<DiagnosticEngine> = AtomicPtr::new(ptr::null_mut());
static HANDLING: AtomicBool = AtomicBool::new(false);
static INSTALL: Once = Once::new();

/// Usable size of each alternate signal stack. Rendering diagnostics and a
/// backtrace needs far more than `SIGSTKSZ`.
pub const SIGNAL_STACK_SIZE: usize = 1024 * 1024;

/// Keeps an engine registered for the crash handler. Dropping the guard
/// unregisters it.
#[must_use = "the engine is unregistered when the guard is dropped"]
pub struct CrashGuard {
    engine: Arc<DiagnosticEngine>,
}

impl CrashGuard {
    pub fn engine(&self) -> &Arc<DiagnosticEngine> {
        &self.engine
    }
}

impl Drop for CrashGuard {
    fn drop(&mut self) {
        let ours = Arc::as_ptr(&self.engine) as *mut DiagnosticEngine;
        // A newer registration stays in place.
        let _ = ACTIVE_ENGINE.compare_exchange(
            ours,
            ptr::null_mut(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Make `engine` the one flushed on a crash
pub fn register(engine: &Arc<DiagnosticEngine>) -> CrashGuard {
    ACTIVE_ENGINE.store(Arc::as_ptr(engine) as *mut DiagnosticEngine, Ordering::Release);
    CrashGuard {
        engine: Arc::clone(engine),
    }
}

/// Whether some engine is currently registered
pub fn has_registered_engine() -> bool {
    !ACTIVE_ENGINE.load(Ordering::Acquire).is_null()
}

/// Install the SIGSEGV handler. Later calls are no-ops.
///
/// The calling thread keeps an alternate signal stack until it exits.
pub fn install_signal_handler() {
    INSTALL.call_once(|| {
        #[cfg(unix)]
        install_unix();
        std::mem::forget(alternate_signal_stack());
        tracing::debug!("crash handler installed");
    });
}

/// An alternate signal stack installed for the current thread. Dropping it
/// restores the stack that was there before.
#[must_use = "the alternate stack is removed when the guard is dropped"]
pub struct SignalStack {
    #[cfg(unix)]
    installed: Option<InstalledStack>,
}

#[cfg(unix)]
struct InstalledStack {
    previous: libc::stack_t,
    memory: *mut libc::c_void,
    len: usize,
}

impl SignalStack {
    /// Whether this guard installed a stack, as opposed to finding a large
    /// enough one already in place
    pub fn is_installed(&self) -> bool {
        #[cfg(unix)]
        {
            self.installed.is_some()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

/// Give the current thread an alternate signal stack of at least
/// [`SIGNAL_STACK_SIZE`] bytes.
pub fn alternate_signal_stack() -> SignalStack {
    #[cfg(unix)]
    {
        // SAFETY: only this thread's signal stack is touched, and the memory
        // stays mapped until the guard restores the previous stack.
        SignalStack {
            installed: unsafe { install_signal_stack() },
        }
    }
    #[cfg(not(unix))]
    {
        SignalStack {}
    }
}

#[cfg(unix)]
unsafe fn install_signal_stack() -> Option<InstalledStack> {
    unsafe {
        let mut previous: libc::stack_t = std::mem::zeroed();
        if libc::sigaltstack(ptr::null(), &mut previous) != 0 {
            return None;
        }
        if previous.ss_flags & libc::SS_DISABLE == 0 && previous.ss_size >= SIGNAL_STACK_SIZE {
            return None;
        }

        let page = usize::try_from(libc::sysconf(libc::_SC_PAGESIZE))
            .unwrap_or(4096)
            .max(4096);
        let len = page + SIGNAL_STACK_SIZE;
        let memory = libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        );
        if memory == libc::MAP_FAILED {
            tracing::warn!("failed to map an alternate signal stack");
            return None;
        }
        // Guard page below the stack
        libc::mprotect(memory, page, libc::PROT_NONE);

        let mut stack: libc::stack_t = std::mem::zeroed();
        stack.ss_sp = memory.cast::<u8>().add(page).cast();
        stack.ss_flags = 0;
        stack.ss_size = SIGNAL_STACK_SIZE;
        if libc::sigaltstack(&stack, ptr::null_mut()) != 0 {
            tracing::warn!("failed to install an alternate signal stack");
            libc::munmap(memory, len);
            return None;
        }
        Some(InstalledStack {
            previous,
            memory,
            len,
        })
    }
}

impl Drop for SignalStack {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(stack) = self.installed.take() {
            // SAFETY: the guard is dropped on the thread that installed the
            // stack, outside any signal handler.
            unsafe {
                libc::sigaltstack(&stack.previous, ptr::null_mut());
                libc::munmap(stack.memory, stack.len);
            }
        }
    }
}

#[cfg(unix)]
fn install_unix() {
    let handler: extern "C" fn(libc::c_int) = handle_segv;
    // SAFETY: the action struct is fully initialised before use and the
    // handler has the signature sigaction expects without SA_SIGINFO.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = libc::SA_ONSTACK;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGSEGV, &action, ptr::null_mut()) != 0 {
            tracing::warn!("failed to install SIGSEGV handler");
        }
    }
}

#[cfg(unix)]
extern "C" fn handle_segv(_signal: libc::c_int) {
    if HANDLING.swap(true, Ordering::AcqRel) {
        // Faulted again while reporting.
        unsafe { libc::abort() }
    }
    report_crash();
    unsafe { libc::abort() }
}

/// Best effort: flush the registered engine, print the banner. Runs at most
/// once per registration.
fn report_crash() {
    let engine = ACTIVE_ENGINE.swap(ptr::null_mut(), Ordering::AcqRel);
    let mut position = None;
    if !engine.is_null() {
        // SAFETY: the pointer was published by `register`, whose guard keeps
        // the Arc alive until it clears the pointer again.
        let engine = unsafe { &*engine };
        let (text, last_position) = engine.render_for_crash();
        if let Some(text) = text.filter(|text| !text.is_empty()) {
            eprintln!("{text}");
        }
        position = last_position;
    }
    eprintln!("{}", crash_banner(position.as_ref()));
    // An overflowed stack can be hundreds of thousands of frames deep.
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        eprintln!("{backtrace}");
    } else {
        eprintln!("note: run with `RUST_BACKTRACE=1` to print a backtrace");
    }
}

fn crash_banner(position: Option<&super::SourcePosition>) -> String {
    let mut banner = String::from("arkc: segmentation fault");
    if let Some(position) = position.filter(|p| p.is_known()) {
        banner.push_str(&format!(" while compiling {position}"));
    }
    banner.push_str("\nThis is a compiler bug. Please file a report with the input that triggered it.");
    banner
}
