//! Renders a function's signature with the live values of its arguments.
//!
//! Every byte is fetched through the [`Prober`]. When an argument's memory is
//! unreadable or does not look like what its type claims, that argument alone
//! falls back to a raw pointer; the rest of the line is unaffected.

use std::io::{self, Write};
use std::mem::size_of;

use crate::config::TraceOptions;
use crate::probe::Prober;
use crate::symtab::{ArgType, ArgumentDescriptor, FunctionDescriptor};

const WORD: usize = size_of::<usize>();

pub struct Formatter<'a> {
    probe: &'a Prober,
    string_preview: usize,
    array_preview: usize,
}

struct StringPreview {
    bytes: Vec<u8>,
    truncated: bool,
}

impl<'a> Formatter<'a> {
    pub fn new(probe: &'a Prober, options: &TraceOptions) -> Self {
        Self {
            probe,
            string_preview: options.string_preview,
            array_preview: options.array_preview,
        }
    }

    /// Write `Function name(args...), in` for a function whose frame base is
    /// `frame_base`.
    pub fn write_signature<W: Write>(
        &self,
        out: &mut W,
        frame_base: usize,
        function: &FunctionDescriptor,
    ) -> io::Result<()> {
        write!(out, "Function {}(", function.name)?;

        let mut count = 0;
        for arg in function.args() {
            if count > 0 {
                write!(out, ", ")?;
            }
            self.write_argument(out, frame_base.wrapping_add_signed(arg.offset), arg)?;
            count += 1;
        }

        if count == 0 {
            write!(out, "void")?;
        }
        writeln!(out, "), in")
    }

    fn write_argument<W: Write>(
        &self,
        out: &mut W,
        slot: usize,
        arg: &ArgumentDescriptor,
    ) -> io::Result<()> {
        let name = &arg.name;
        match arg.ty {
            ArgType::Char => {
                write!(out, "char {name}=")?;
                self.write_char(out, slot)
            }
            ArgType::Int => {
                write!(out, "int {name}=")?;
                match self.probe.read_i32(slot) {
                    Ok(value) => write!(out, "{value}"),
                    Err(_) => write_raw(out, slot),
                }
            }
            ArgType::Float => {
                write!(out, "float {name}=")?;
                match self.probe.read_f32(slot) {
                    Ok(value) => write!(out, "{value:.6}"),
                    Err(_) => write_raw(out, slot),
                }
            }
            ArgType::Double => {
                write!(out, "double {name}=")?;
                match self.probe.read_f64(slot) {
                    Ok(value) => write!(out, "{value:.6}"),
                    Err(_) => write_raw(out, slot),
                }
            }
            ArgType::String => {
                write!(out, "char *{name}=")?;
                match self.probe.read_usize(slot) {
                    Ok(pointer) => self.write_string(out, pointer),
                    Err(_) => write_raw(out, slot),
                }
            }
            ArgType::StringArray => {
                write!(out, "char **{name}=")?;
                match self.probe.read_usize(slot) {
                    Ok(array) => self.write_string_array(out, array),
                    Err(_) => write_raw(out, slot),
                }
            }
            ArgType::VoidStar => {
                write!(out, "void *{name}=")?;
                match self.probe.read_usize(slot) {
                    Ok(pointer) => write!(out, "0v{pointer:x}"),
                    Err(_) => write_raw(out, slot),
                }
            }
            ArgType::Unknown => write!(out, "UNKNOWN {name}"),
        }
    }

    fn write_char<W: Write>(&self, out: &mut W, slot: usize) -> io::Result<()> {
        match self.probe.read_u8(slot) {
            Ok(byte) if is_printable(byte) => write!(out, "'{}'", byte as char),
            Ok(byte) => write!(out, "'\\{byte:o}'"),
            Err(_) => write_raw(out, slot),
        }
    }

    /// Quoted preview of a C string, or the bare pointer if it cannot be
    /// shown faithfully.
    pub fn write_string<W: Write>(&self, out: &mut W, pointer: usize) -> io::Result<()> {
        let Some(preview) = self.preview_string(pointer) else {
            return write_raw(out, pointer);
        };

        out.write_all(b"\"")?;
        out.write_all(&preview.bytes)?;
        out.write_all(b"\"")?;
        if preview.truncated {
            out.write_all(b"...")?;
        }
        Ok(())
    }

    fn preview_string(&self, pointer: usize) -> Option<StringPreview> {
        let mut bytes = Vec::with_capacity(self.string_preview);

        for i in 0..self.string_preview {
            let byte = self.probe.read_u8(pointer.checked_add(i)?).ok()?;
            if byte == 0 {
                return Some(StringPreview {
                    bytes,
                    truncated: false,
                });
            }
            if !is_printable(byte) {
                return None;
            }
            bytes.push(byte);
        }

        // A string exactly as long as the preview is not truncated.
        let next = pointer.wrapping_add(self.string_preview);
        let truncated = self.probe.read_u8(next) != Ok(0);
        Some(StringPreview { bytes, truncated })
    }

    /// `{"a", "b", ...}` for a NULL-terminated array of C strings.
    pub fn write_string_array<W: Write>(&self, out: &mut W, array: usize) -> io::Result<()> {
        let mut entries = Vec::with_capacity(self.array_preview);
        let mut terminated = false;

        for i in 0..self.array_preview {
            let Ok(entry) = self.probe.read_usize(array.wrapping_add(i * WORD)) else {
                return write_raw(out, array);
            };
            if entry == 0 {
                terminated = true;
                break;
            }
            entries.push(entry);
        }

        if !terminated {
            let next = array.wrapping_add(self.array_preview * WORD);
            terminated = self.probe.read_usize(next) == Ok(0);
        }

        write!(out, "{{")?;
        for (i, &entry) in entries.iter().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            self.write_string(out, entry)?;
        }
        if !terminated {
            if !entries.is_empty() {
                write!(out, ", ")?;
            }
            write!(out, "...")?;
        }
        write!(out, "}}")
    }
}

fn write_raw<W: Write>(out: &mut W, address: usize) -> io::Result<()> {
    write!(out, "0x{address:x}")
}

/// Printable in the C locale: space through tilde.
fn is_printable(byte: u8) -> bool {
    byte == b' ' || byte.is_ascii_graphic()
}
