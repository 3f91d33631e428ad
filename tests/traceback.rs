//! Backtraces of real call chains in this test binary.
//!
//! Each chain runs twice: the first pass records where the arguments live
//! relative to their frame, the second prints the backtrace.

use std::ffi::{c_char, c_void};
use std::hint::black_box;
use std::ptr;

use fptrace::{
    ArgType, ArgumentDescriptor, FunctionDescriptor, SymbolTable, TraceOptions, frame_offset,
};

enum Pass<'a> {
    Calibrate(&'a mut SymbolTable),
    Trace(&'a SymbolTable, &'a mut Vec<u8>),
}

fn options() -> TraceOptions {
    TraceOptions::default().entry_wrapper("driver")
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
        Pass::Trace(table, out) => fptrace::traceback_with(&mut **out, *table, &options()),
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
        Pass::Trace(table, out) => fptrace::traceback_with(&mut **out, *table, &options()),
    }
}

#[derive(Clone, Copy)]
enum Chain {
    Simple,
    VoidStar(*const c_void),
    Strings,
}

#[inline(never)]
fn driver(chain: Chain, pass: &mut Pass<'_>) {
    match chain {
        Chain::Simple => foo(pass),
        Chain::VoidStar(pointer) => foo_ptr(pointer, pass),
        Chain::Strings => {
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

fn traced(table: &mut SymbolTable, chain: Chain) -> String {
    driver(chain, &mut Pass::Calibrate(&mut *table));
    let mut out = Vec::new();
    driver(chain, &mut Pass::Trace(&*table, &mut out));
    String::from_utf8(out).unwrap()
}

fn entry(name: &str, function: *const ()) -> FunctionDescriptor {
    FunctionDescriptor::new(name, function as usize)
}

fn simple_table() -> SymbolTable {
    SymbolTable::from(vec![
        entry("driver", driver as *const ()),
        entry("foo", foo as *const ()),
        entry("bar", bar as *const ()),
    ])
}

#[test]
fn bar_called_from_foo() {
    let mut table = simple_table();
    let text = traced(&mut table, Chain::Simple);
    assert_eq!(text, "Function bar(int x=5, int y=17), in\nFunction foo(void), in\n");
}

#[test]
fn tracing_twice_gives_the_same_output() {
    let mut table = simple_table();
    let first = traced(&mut table, Chain::Simple);
    let second = traced(&mut table, Chain::Simple);
    assert_eq!(first, second);
}

#[test]
fn void_pointer_argument_shows_its_value() {
    let anchor = 0u64;
    let pointer = &anchor as *const u64 as *const c_void;
    let mut table = SymbolTable::from(vec![
        entry("driver", driver as *const ()),
        entry("foo", foo_ptr as *const ()),
        entry("bar", bar as *const ()),
    ]);
    let text = traced(&mut table, Chain::VoidStar(pointer));
    assert_eq!(
        text,
        format!(
            "Function bar(int x=5, int y=17), in\nFunction foo(void *lookma=0v{:x}), in\n",
            pointer as usize
        )
    );
}

#[test]
fn string_arguments_show_previews() {
    let mut table = SymbolTable::from(vec![
        entry("driver", driver as *const ()),
        entry("greet", greet as *const ()),
    ]);
    let text = traced(&mut table, Chain::Strings);
    assert_eq!(
        text,
        "Function greet(char *name=\"world\", char **argv={\"alpha\", \"beta\", \"gamma\", ...}, \
         char mark='!', double ratio=0.500000), in\n"
    );
}
