//! Walks the chain of saved frame pointers, printing one line per frame.

use std::io::Write;
use std::mem::size_of;

use log::{debug, warn};

use crate::config::TraceOptions;
use crate::error::TraceError;
use crate::format::Formatter;
use crate::probe::{Fault, Prober};
use crate::symtab::SymbolTable;

const WORD: usize = size_of::<usize>();

pub const FATAL_INVALID_FRAME: &str = "FATAL: Invalid frame base pointer";

/// Reads the frame base of the calling function.
///
/// The expansion is inlined into the caller, so the value is the frame of
/// whichever function uses the macro.
#[macro_export]
macro_rules! current_frame_base {
    () => {{
        let base: usize;
        #[cfg(target_arch = "x86_64")]
        // SAFETY: copies a register, touches no memory.
        unsafe {
            ::core::arch::asm!("mov {}, rbp", out(reg) base, options(nomem, nostack, preserves_flags));
        }
        #[cfg(target_arch = "aarch64")]
        // SAFETY: copies a register, touches no memory.
        unsafe {
            ::core::arch::asm!("mov {}, x29", out(reg) base, options(nomem, nostack, preserves_flags));
        }
        base
    }};
}

/// Byte offset of `value` from `base`, as stored in an argument descriptor.
pub fn frame_offset<T>(base: usize, value: &T) -> isize {
    (value as *const T as usize).wrapping_sub(base) as isize
}

/// One step of the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    /// Where the function owning this frame returns to.
    pub return_address: usize,
    /// Frame base of the function that return address belongs to.
    pub caller_base: usize,
}

/// Where a frame keeps the saved frame pointer and return address.
pub trait FrameLayout {
    fn unwind(&self, probe: &Prober, base: usize) -> Result<StackFrame, Fault>;
}

/// The standard frame-pointer layout on x86_64 and aarch64:
/// `[base]` holds the caller's frame pointer, `[base + WORD]` the return
/// address.
#[derive(Debug, Clone, Copy, Default)]
pub struct FramePointer;

impl FrameLayout for FramePointer {
    fn unwind(&self, probe: &Prober, base: usize) -> Result<StackFrame, Fault> {
        let caller_base = probe.read_usize(base)?;
        let slot = base.checked_add(WORD).ok_or(Fault { address: base })?;
        let return_address = probe.read_usize(slot)?;
        Ok(StackFrame {
            return_address,
            caller_base,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    /// A frame base was unreadable (NULL included) or did not move up the
    /// stack.
    InvalidFrame,
    /// The chain was longer than the configured ceiling.
    TooDeep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Reached the entry wrapper.
    Done,
    Aborted(Abort),
}

pub struct Tracer<'t, L = FramePointer> {
    table: &'t SymbolTable,
    options: TraceOptions,
    layout: L,
}

impl<'t> Tracer<'t> {
    pub fn new(table: &'t SymbolTable) -> Self {
        Self {
            table,
            options: TraceOptions::default(),
            layout: FramePointer,
        }
    }
}

impl<'t, L: FrameLayout> Tracer<'t, L> {
    pub fn options(mut self, options: TraceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn layout<M: FrameLayout>(self, layout: M) -> Tracer<'t, M> {
        Tracer {
            table: self.table,
            options: self.options,
            layout,
        }
    }

    /// Walk the chain starting at frame `base`, whose return address is the
    /// first one resolved.
    pub fn trace<W: Write>(&self, out: &mut W, base: usize) -> Result<WalkOutcome, TraceError> {
        let probe = Prober::new()?;
        self.walk(out, &probe, base)
    }

    fn walk<W: Write>(
        &self,
        out: &mut W,
        probe: &Prober,
        start: usize,
    ) -> Result<WalkOutcome, TraceError> {
        let formatter = Formatter::new(probe, &self.options);
        let mut base = start;
        let mut previous: Option<usize> = None;

        for depth in 0..self.options.max_frames {
            // Stacks grow down, so every caller frame sits above its callee.
            let climbed = previous.is_none_or(|prev| base > prev);
            let frame = match self.layout.unwind(probe, base) {
                Ok(frame) if climbed => frame,
                _ => {
                    warn!("invalid frame base 0x{base:x} at depth {depth}");
                    writeln!(out, "{FATAL_INVALID_FRAME}")?;
                    return Ok(WalkOutcome::Aborted(Abort::InvalidFrame));
                }
            };
            debug!(
                "frame 0x{base:x}: return 0x{:x}, caller 0x{:x}",
                frame.return_address, frame.caller_base
            );

            let resolved = self
                .table
                .resolve_within(frame.return_address, self.options.max_function_size);
            match resolved {
                None => writeln!(out, "Function 0x{:x}(...), in", frame.return_address)?,
                Some(function) if function.name == self.options.entry_wrapper => {
                    debug!("reached {} after {depth} frames", function.name);
                    return Ok(WalkOutcome::Done);
                }
                // Arguments live in the frame of the function being returned to.
                Some(function) => formatter.write_signature(out, frame.caller_base, function)?,
            }

            previous = Some(base);
            base = frame.caller_base;
        }

        warn!("gave up after {} frames", self.options.max_frames);
        writeln!(out, "FATAL: Frame chain exceeds {} frames", self.options.max_frames)?;
        Ok(WalkOutcome::Aborted(Abort::TooDeep))
    }
}
