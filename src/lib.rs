//! Print a backtrace of the running process, with argument values, by
//! following saved frame pointers and a table of known functions.
//!
//! Build with `-C force-frame-pointers=yes`; frames without a frame pointer
//! cannot be walked.
//!
//! ```no_run
//! use fptrace::symtab::{self, ArgType, FunctionDescriptor, SymbolTable};
//!
//! # fn bar() {}
//! let mut table = SymbolTable::new();
//! table.push(FunctionDescriptor::new("bar", bar as *const () as usize).arg("x", ArgType::Int, -20));
//! symtab::install(table).unwrap();
//!
//! fptrace::traceback(&mut std::io::stdout());
//! ```

// Compile-time architecture verification
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("fptrace walks frame pointers on x86_64 and aarch64 only");

#[cfg(not(target_os = "linux"))]
compile_error!("fptrace probes memory with Linux system calls");

use std::io::{self, Write};
use std::os::fd::BorrowedFd;
use std::sync::{Mutex, PoisonError};

use log::{error, warn};

pub mod config;
pub mod error;
pub mod format;
pub mod loader;
pub mod maps;
pub mod probe;
pub mod symtab;
pub mod walker;

pub use crate::config::TraceOptions;
pub use crate::error::TraceError;
pub use crate::symtab::{ArgType, ArgumentDescriptor, FunctionDescriptor, SymbolTable};
pub use crate::walker::{Abort, FramePointer, FrameLayout, StackFrame, Tracer, WalkOutcome, frame_offset};

/// Held for the whole of every backtrace so concurrent callers take turns.
static TRACE_LOCK: Mutex<()> = Mutex::new(());

/// Print the caller's backtrace to `out` using the installed symbol table.
///
/// Failures never propagate: what has been written stays written and the
/// rest is logged.
#[inline(never)]
pub fn traceback<W: Write>(out: &mut W) {
    let base = crate::current_frame_base!();
    let empty = SymbolTable::new();
    let table = installed_or(&empty);
    trace_from(out, base, table, &TraceOptions::default());
}

/// Like [`traceback`], but with an explicit table and options.
#[inline(never)]
pub fn traceback_with<W: Write>(out: &mut W, table: &SymbolTable, options: &TraceOptions) {
    let base = crate::current_frame_base!();
    trace_from(out, base, table, options);
}

/// Like [`traceback`], writing straight to a file descriptor.
#[inline(never)]
pub fn traceback_fd(fd: BorrowedFd<'_>) {
    let base = crate::current_frame_base!();
    let empty = SymbolTable::new();
    let table = installed_or(&empty);
    trace_from(&mut FdWriter::new(fd), base, table, &TraceOptions::default());
}

fn installed_or(empty: &SymbolTable) -> &SymbolTable {
    match symtab::installed() {
        Some(table) => table,
        None => {
            warn!("no symbol table installed, frames will not be named");
            empty
        }
    }
}

fn trace_from<W: Write>(out: &mut W, base: usize, table: &SymbolTable, options: &TraceOptions) {
    let _guard = TRACE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    let result = Tracer::new(table)
        .options(options.clone())
        .trace(out, base)
        .and_then(|outcome| {
            out.flush()?;
            Ok(outcome)
        });
    if let Err(e) = result {
        error!("traceback failed: {e}");
    }
}

/// Unbuffered writes to a descriptor we do not own.
pub struct FdWriter<'fd>(BorrowedFd<'fd>);

impl<'fd> FdWriter<'fd> {
    pub fn new(fd: BorrowedFd<'fd>) -> Self {
        Self(fd)
    }
}

impl Write for FdWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(nix::unistd::write(self.0, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
