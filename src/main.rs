use std::error::Error;
use std::ffi::{c_char, c_void};
use std::hint::black_box;
use std::io::{self, Write};
use std::os::fd::{BorrowedFd, RawFd};
use std::ptr;
use std::time::Instant;

use clap::{Parser, Subcommand};
use log::info;

use fptrace::config::{ARRAY_PREVIEW_ENTRIES, MAX_FRAMES, STRING_PREVIEW_BYTES};
use fptrace::{
    ArgType, ArgumentDescriptor, FdWriter, FunctionDescriptor, SymbolTable, TraceOptions,
    frame_offset, loader,
};

// Architecture info helper
fn get_architecture_info() -> &'static str {
    #[cfg(target_arch = "x86_64")]
    return "x86_64";
    #[cfg(target_arch = "aarch64")]
    return "aarch64";
}

#[derive(Parser)]
#[command(
    name = "fptrace-demo",
    about = "Print frame-pointer backtraces of small reference call chains",
    after_help = "\
EXAMPLES:
    fptrace-demo simple                  bar(5, 17) called from foo()
    fptrace-demo voidstar --fd 2         foo(void *) calling bar, traced to stderr
    fptrace-demo strings --elf --entry main
                                         greet(...), then the Rust runtime up to C main"
)]
struct Args {
    #[command(subcommand)]
    scenario: Scenario,

    /// Write the backtrace to this file descriptor instead of stdout
    #[arg(long, value_name = "FD")]
    fd: Option<RawFd>,

    /// Also name every function symbol of this executable
    #[arg(long)]
    elf: bool,

    /// Stop the walk at this function (not printed)
    #[arg(long, default_value = DRIVER)]
    entry: String,

    #[arg(long, default_value_t = MAX_FRAMES)]
    max_frames: usize,

    #[arg(long, default_value_t = STRING_PREVIEW_BYTES)]
    string_preview: usize,

    #[arg(long, default_value_t = ARRAY_PREVIEW_ENTRIES)]
    array_preview: usize,
}

#[derive(Subcommand, Clone, Copy, Debug)]
enum Scenario {
    /// bar(int x, int y) called from foo()
    Simple,
    /// bar(int x, int y) called from foo(void *lookma)
    Voidstar,
    /// greet(char *, char **, char, double)
    Strings,
}

const DRIVER: &str = "driver";

/// The scenario runs twice: once to learn where each argument sits in its
/// frame, once to print the backtrace.
enum Pass<'a> {
    Calibrate(&'a mut SymbolTable),
    Trace {
        out: &'a mut dyn Write,
        table: &'a SymbolTable,
        options: &'a TraceOptions,
    },
}

#[inline(never)]
fn bar(x: i32, y: i32, pass: &mut Pass<'_>) {
    let base = fptrace::current_frame_base!();
    let args = [
        ArgumentDescriptor::new("x", ArgType::Int, frame_offset(base, black_box(&x))),
        ArgumentDescriptor::new("y", ArgType::Int, frame_offset(base, black_box(&y))),
    ];
    match pass {
        Pass::Calibrate(table) => {
            table.describe("bar", &args);
        }
        Pass::Trace {
            out,
            table,
            options,
        } => fptrace::traceback_with(out, *table, *options),
    }
}

#[inline(never)]
fn foo(pass: &mut Pass<'_>) {
    bar(5, 17, pass);
}

#[inline(never)]
fn foo_ptr(lookma: *const c_void, pass: &mut Pass<'_>) {
    let base = fptrace::current_frame_base!();
    let offset = frame_offset(base, black_box(&lookma));
    if let Pass::Calibrate(table) = pass {
        table.describe("foo", &[ArgumentDescriptor::new("lookma", ArgType::VoidStar, offset)]);
    }
    bar(5, 17, pass);
}

#[inline(never)]
fn greet(name: *const c_char, argv: *const *const c_char, mark: u8, ratio: f64, pass: &mut Pass<'_>) {
    let base = fptrace::current_frame_base!();
    let args = [
        ArgumentDescriptor::new("name", ArgType::String, frame_offset(base, black_box(&name))),
        ArgumentDescriptor::new("argv", ArgType::StringArray, frame_offset(base, black_box(&argv))),
        ArgumentDescriptor::new("mark", ArgType::Char, frame_offset(base, black_box(&mark))),
        ArgumentDescriptor::new("ratio", ArgType::Double, frame_offset(base, black_box(&ratio))),
    ];
    match pass {
        Pass::Calibrate(table) => {
            table.describe("greet", &args);
        }
        Pass::Trace {
            out,
            table,
            options,
        } => fptrace::traceback_with(out, *table, *options),
    }
}

#[inline(never)]
fn driver(scenario: Scenario, pass: &mut Pass<'_>) {
    match scenario {
        Scenario::Simple => foo(pass),
        Scenario::Voidstar => {
            let anchor = 0u64;
            foo_ptr(&anchor as *const u64 as *const c_void, pass);
        }
        Scenario::Strings => {
            let argv = [
                c"alpha".as_ptr(),
                c"beta".as_ptr(),
                c"gamma".as_ptr(),
                c"delta".as_ptr(),
                ptr::null(),
            ];
            greet(c"world".as_ptr(), argv.as_ptr(), b'!', 0.5, pass);
        }
    }
}

fn scenario_table(scenario: Scenario) -> SymbolTable {
    let mut table = SymbolTable::new();
    table.push(FunctionDescriptor::new(DRIVER, driver as *const () as usize));
    match scenario {
        Scenario::Simple => {
            table.push(FunctionDescriptor::new("foo", foo as *const () as usize));
            table.push(FunctionDescriptor::new("bar", bar as *const () as usize));
        }
        Scenario::Voidstar => {
            table.push(FunctionDescriptor::new("foo", foo_ptr as *const () as usize));
            table.push(FunctionDescriptor::new("bar", bar as *const () as usize));
        }
        Scenario::Strings => {
            table.push(FunctionDescriptor::new("greet", greet as *const () as usize));
        }
    }
    table
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();
    info!("fptrace-demo on {}, scenario {:?}", get_architecture_info(), args.scenario);

    let start_time = Instant::now();

    let mut table = scenario_table(args.scenario);
    driver(args.scenario, &mut Pass::Calibrate(&mut table));
    if args.elf {
        let symbols = loader::load_executable_symbols()?;
        table.extend(symbols.functions().cloned());
    }
    info!("symbol table ready with {} functions in {:?}", table.len(), start_time.elapsed());

    let options = TraceOptions::default()
        .max_frames(args.max_frames)
        .string_preview(args.string_preview)
        .array_preview(args.array_preview)
        .entry_wrapper(args.entry);

    let trace_start = Instant::now();
    match args.fd {
        Some(fd) => {
            // SAFETY: the descriptor belongs to our caller and outlives this
            // call; if it was never open, writes fail with EBADF and are logged.
            let fd = unsafe { BorrowedFd::borrow_raw(fd) };
            let mut out = FdWriter::new(fd);
            run(args.scenario, &mut out, &table, &options);
        }
        None => {
            let mut out = io::stdout().lock();
            run(args.scenario, &mut out, &table, &options);
        }
    }
    info!("backtrace took {:?}", trace_start.elapsed());

    Ok(())
}

fn run(scenario: Scenario, out: &mut dyn Write, table: &SymbolTable, options: &TraceOptions) {
    driver(
        scenario,
        &mut Pass::Trace {
            out,
            table,
            options,
        },
    );
}
