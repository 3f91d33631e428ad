//! Seed a [`SymbolTable`] from the running executable's ELF symbols.
//!
//! Only names and entry addresses come from the file. Argument descriptors
//! are attached afterwards with [`SymbolTable::describe`].

use std::fs;
use std::path::Path;

use log::{debug, warn};
use object::{Object, ObjectKind, ObjectSegment, ObjectSymbol, SymbolKind};
use rustc_demangle::demangle;

use crate::error::TraceError;
use crate::maps;
use crate::symtab::{FUNCTS_MAX_NUM, FunctionDescriptor, SymbolTable};

const PAGE_MASK: u64 = 0xfff;

/// Load every defined function symbol of `/proc/self/exe`, relocated to
/// where it is mapped in this process.
pub fn load_executable_symbols() -> Result<SymbolTable, TraceError> {
    let executable = fs::read_link("/proc/self/exe")?;
    let data = fs::read(&executable)?;
    let file = object::File::parse(&*data)?;

    let bias = match file.kind() {
        // Position-independent: find where the kernel put us.
        ObjectKind::Dynamic => {
            let mappings = maps::read_self_maps()?;
            let base = maps::find_base_address(&mappings, &executable)
                .ok_or_else(|| TraceError::NoMapping(executable.display().to_string()))?;
            (base as u64).wrapping_sub(lowest_segment(&file))
        }
        _ => 0,
    };
    debug!("{} load bias 0x{bias:x}", executable.display());

    Ok(function_symbols(&file, bias))
}

/// Function symbols of an already-parsed object file, shifted by `bias`.
pub fn symbols_from_elf(data: &[u8], bias: u64) -> Result<SymbolTable, TraceError> {
    let file = object::File::parse(data)?;
    Ok(function_symbols(&file, bias))
}

pub fn load_file_symbols(path: &Path, bias: u64) -> Result<SymbolTable, TraceError> {
    let data = fs::read(path)?;
    symbols_from_elf(&data, bias)
}

fn lowest_segment(file: &object::File<'_>) -> u64 {
    file.segments()
        .map(|segment| segment.address())
        .min()
        .map_or(0, |address| address & !PAGE_MASK)
}

fn function_symbols(file: &object::File<'_>, bias: u64) -> SymbolTable {
    let mut functions: Vec<FunctionDescriptor> = file
        .symbols()
        .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.is_definition())
        .filter(|symbol| symbol.address() != 0)
        .filter_map(|symbol| {
            let name = symbol.name().ok()?;
            if name.is_empty() {
                return None;
            }
            let entry = symbol.address().wrapping_add(bias) as usize;
            Some(FunctionDescriptor::new(format!("{:#}", demangle(name)), entry))
        })
        .collect();

    // Stable, so aliases keep their file order and the first one wins ties.
    functions.sort_by_key(|function| function.entry);

    if functions.len() > FUNCTS_MAX_NUM {
        warn!(
            "{} function symbols, only the lowest {FUNCTS_MAX_NUM} are searchable",
            functions.len()
        );
    }
    debug!("loaded {} function symbols", functions.len());

    SymbolTable::from(functions)
}
