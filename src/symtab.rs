//! The table of known functions and the address resolver over it.
//!
//! The table is produced ahead of time (by hand, by a build step, or by
//! [`crate::loader`]) and is read-only once installed. A descriptor with an
//! empty name terminates a scan, for both functions and arguments.

use std::sync::OnceLock;

use crate::config::MAX_FUNCTION_SIZE_BYTES;
use crate::error::TraceError;

/// Upper bound on the number of table entries ever scanned.
pub const FUNCTS_MAX_NUM: usize = 1 << 16;

/// Upper bound on the number of arguments printed per function.
pub const ARGS_MAX_NUM: usize = 6;

static INSTALLED: OnceLock<SymbolTable> = OnceLock::new();

/// How an argument's bytes should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Char,
    Int,
    Float,
    Double,
    /// `char *`
    String,
    /// NULL-terminated `char **`
    StringArray,
    VoidStar,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentDescriptor {
    pub name: String,
    pub ty: ArgType,
    /// Byte offset from the owning function's frame base.
    pub offset: isize,
}

impl ArgumentDescriptor {
    pub fn new(name: impl Into<String>, ty: ArgType, offset: isize) -> Self {
        Self {
            name: name.into(),
            ty,
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub name: String,
    pub entry: usize,
    pub arguments: Vec<ArgumentDescriptor>,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, entry: usize) -> Self {
        Self {
            name: name.into(),
            entry,
            arguments: Vec::new(),
        }
    }

    /// Append an argument, in declaration order.
    pub fn arg(mut self, name: impl Into<String>, ty: ArgType, offset: isize) -> Self {
        self.arguments.push(ArgumentDescriptor::new(name, ty, offset));
        self
    }

    /// Declared arguments, up to the terminator and [`ARGS_MAX_NUM`].
    pub fn args(&self) -> impl Iterator<Item = &ArgumentDescriptor> {
        self.arguments
            .iter()
            .take(ARGS_MAX_NUM)
            .take_while(|arg| !arg.name.is_empty())
    }

    fn is_terminator(&self) -> bool {
        self.name.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    functions: Vec<FunctionDescriptor>,
}

impl From<Vec<FunctionDescriptor>> for SymbolTable {
    fn from(functions: Vec<FunctionDescriptor>) -> Self {
        Self { functions }
    }
}

impl Extend<FunctionDescriptor> for SymbolTable {
    fn extend<I: IntoIterator<Item = FunctionDescriptor>>(&mut self, iter: I) {
        self.functions.extend(iter);
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, function: FunctionDescriptor) {
        self.functions.push(function);
    }

    /// Attach argument descriptors to every entry called `name`.
    ///
    /// Returns whether any entry matched.
    pub fn describe(&mut self, name: &str, arguments: &[ArgumentDescriptor]) -> bool {
        let mut found = false;
        for function in self.functions.iter_mut().filter(|f| f.name == name) {
            function.arguments = arguments.to_vec();
            found = true;
        }
        found
    }

    /// Entries in scan order, stopping at the terminator.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionDescriptor> {
        self.functions
            .iter()
            .take(FUNCTS_MAX_NUM)
            .take_while(|f| !f.is_terminator())
    }

    pub fn len(&self) -> usize {
        self.functions().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resolve(&self, address: usize) -> Option<&FunctionDescriptor> {
        self.resolve_within(address, MAX_FUNCTION_SIZE_BYTES)
    }

    /// Find the closest entry strictly below `address` and no more than
    /// `max_size` bytes away. Ties go to the entry scanned first.
    pub fn resolve_within(&self, address: usize, max_size: usize) -> Option<&FunctionDescriptor> {
        let mut found: Option<(&FunctionDescriptor, usize)> = None;

        for function in self.functions() {
            if function.entry >= address {
                continue;
            }
            let distance = address - function.entry;
            if distance > max_size {
                continue;
            }
            if found.is_none_or(|(_, best)| distance < best) {
                found = Some((function, distance));
            }
        }

        found.map(|(function, _)| function)
    }
}

/// Make `table` the process-wide table used by [`crate::traceback`].
///
/// Only the first call succeeds; the table is never replaced or freed.
pub fn install(table: SymbolTable) -> Result<(), TraceError> {
    INSTALLED
        .set(table)
        .map_err(|_| TraceError::AlreadyInstalled)
}

pub fn installed() -> Option<&'static SymbolTable> {
    INSTALLED.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SymbolTable {
        SymbolTable::from(vec![
            FunctionDescriptor::new("alpha", 0x1000),
            FunctionDescriptor::new("beta", 0x1400),
            FunctionDescriptor::new("gamma", 0x9000),
        ])
    }

    #[test]
    fn picks_closest_preceding_entry() {
        let table = table();
        assert_eq!(table.resolve(0x1010).unwrap().name, "alpha");
        assert_eq!(table.resolve(0x1410).unwrap().name, "beta");
        assert_eq!(table.resolve(0x9001).unwrap().name, "gamma");
    }

    #[test]
    fn entry_address_itself_does_not_match() {
        let table = table();
        // 0x1400 is beta's entry, so the closest strictly-preceding is alpha.
        assert_eq!(table.resolve(0x1400).unwrap().name, "alpha");
        assert!(table.resolve(0x1000).is_none());
    }

    #[test]
    fn respects_size_bound() {
        let table = table();
        assert!(table.resolve_within(0x1500, 0x80).is_none());
        assert_eq!(table.resolve_within(0x1480, 0x80).unwrap().name, "beta");
        assert!(table.resolve(0x9000 + MAX_FUNCTION_SIZE_BYTES + 1).is_none());
    }

    #[test]
    fn ties_go_to_first_entry() {
        let table = SymbolTable::from(vec![
            FunctionDescriptor::new("first", 0x2000),
            FunctionDescriptor::new("second", 0x2000),
        ]);
        assert_eq!(table.resolve(0x2004).unwrap().name, "first");
    }

    #[test]
    fn unordered_entries_still_resolve() {
        let table = SymbolTable::from(vec![
            FunctionDescriptor::new("late", 0x5000),
            FunctionDescriptor::new("early", 0x1000),
        ]);
        assert_eq!(table.resolve(0x1100).unwrap().name, "early");
        assert_eq!(table.resolve(0x5100).unwrap().name, "late");
    }

    #[test]
    fn empty_name_terminates_scan() {
        let table = SymbolTable::from(vec![
            FunctionDescriptor::new("seen", 0x1000),
            FunctionDescriptor::new("", 0),
            FunctionDescriptor::new("hidden", 0x3000),
        ]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve(0x3010).unwrap().name, "seen");
    }

    #[test]
    fn argument_list_is_bounded() {
        let mut function = FunctionDescriptor::new("many", 0x1000);
        for i in 0..10 {
            function = function.arg(format!("a{i}"), ArgType::Int, i * 4);
        }
        assert_eq!(function.args().count(), ARGS_MAX_NUM);

        let function = FunctionDescriptor::new("cut", 0x1000)
            .arg("a", ArgType::Int, 8)
            .arg("", ArgType::Int, 12)
            .arg("c", ArgType::Int, 16);
        assert_eq!(function.args().count(), 1);
    }

    #[test]
    fn describe_attaches_arguments() {
        let mut table = table();
        let args = [ArgumentDescriptor::new("x", ArgType::Int, -4)];
        assert!(table.describe("beta", &args));
        assert!(!table.describe("missing", &args));
        assert_eq!(table.resolve(0x1401).unwrap().arguments, args);
    }
}
