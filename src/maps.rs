//! Parsing of `/proc/self/maps`, used to find where the executable was loaded.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::debug;

use crate::error::TraceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: usize,
    pub end: usize,
    pub offset: u64,
    pub pathname: String,
}

impl MemoryMapping {
    pub fn contains(&self, address: usize) -> bool {
        address >= self.start && address < self.end
    }
}

pub fn parse_memory_mapping(line: &str) -> Option<MemoryMapping> {
    // Format: address perms offset dev inode pathname
    // Example: 559a9c400000-559a9c401000 r--p 00000000 103:02 2621487 /path/to/exe
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return None;
    }

    let (start, end) = parts[0].split_once('-')?;
    let start = usize::from_str_radix(start, 16).ok()?;
    let end = usize::from_str_radix(end, 16).ok()?;
    let offset = u64::from_str_radix(parts[2], 16).ok()?;

    Some(MemoryMapping {
        start,
        end,
        offset,
        // Anonymous mappings have no pathname.
        pathname: parts[5..].join(" "),
    })
}

pub fn read_self_maps() -> Result<Vec<MemoryMapping>, TraceError> {
    let reader = BufReader::new(File::open("/proc/self/maps")?);
    let mut mappings = Vec::new();
    for line in reader.lines() {
        if let Some(mapping) = parse_memory_mapping(&line?) {
            mappings.push(mapping);
        }
    }
    Ok(mappings)
}

const DELETED: &str = " (deleted)";

/// Start of the first mapping of `executable`, i.e. the one at file offset 0.
///
/// A binary replaced on disk while running shows up with a ` (deleted)`
/// suffix both here and in `/proc/self/exe`; it is ignored on either side.
pub fn find_base_address(mappings: &[MemoryMapping], executable: &Path) -> Option<usize> {
    let lossy = executable.to_string_lossy();
    let wanted = lossy.trim_end_matches(DELETED);
    let found = mappings
        .iter()
        .find(|m| m.offset == 0 && m.pathname.trim_end_matches(DELETED) == wanted)
        .map(|m| m.start);
    if let Some(start) = found {
        debug!("{wanted} mapped at 0x{start:x}");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
559a9c400000-559a9c401000 r--p 00000000 103:02 2621487 /usr/bin/demo
559a9c401000-559a9c405000 r-xp 00001000 103:02 2621487 /usr/bin/demo
7ffd1c2e0000-7ffd1c301000 rw-p 00000000 00:00 0 [stack]
7f0000000000-7f0000021000 rw-p 00000000 00:00 0
garbage line";

    fn mappings() -> Vec<MemoryMapping> {
        MAPS.lines().filter_map(parse_memory_mapping).collect()
    }

    #[test]
    fn parses_lines() {
        let maps = mappings();
        assert_eq!(maps.len(), 4);
        assert_eq!(
            maps[1],
            MemoryMapping {
                start: 0x559a_9c40_1000,
                end: 0x559a_9c40_5000,
                offset: 0x1000,
                pathname: "/usr/bin/demo".to_string(),
            }
        );
        assert_eq!(maps[3].pathname, "");
        assert!(maps[2].contains(0x7ffd_1c2e_0010));
        assert!(!maps[2].contains(0x7ffd_1c30_1000));
    }

    #[test]
    fn finds_base_of_executable() {
        let maps = mappings();
        assert_eq!(find_base_address(&maps, Path::new("/usr/bin/demo")), Some(0x559a_9c40_0000));
        assert_eq!(find_base_address(&maps, Path::new("/usr/bin/other")), None);
    }

    #[test]
    fn deleted_executable_still_matches() {
        let maps: Vec<MemoryMapping> = [
            "559a9c400000-559a9c401000 r--p 00000000 103:02 2621487 /usr/bin/demo (deleted)",
            "559a9c401000-559a9c405000 r-xp 00001000 103:02 2621487 /usr/bin/demo (deleted)",
        ]
        .into_iter()
        .filter_map(parse_memory_mapping)
        .collect();
        assert_eq!(maps[0].pathname, "/usr/bin/demo (deleted)");

        let base = Some(0x559a_9c40_0000);
        assert_eq!(find_base_address(&maps, Path::new("/usr/bin/demo (deleted)")), base);
        assert_eq!(find_base_address(&maps, Path::new("/usr/bin/demo")), base);
        assert_eq!(find_base_address(&mappings(), Path::new("/usr/bin/demo (deleted)")), base);
    }

    #[test]
    fn reads_own_maps() {
        let maps = read_self_maps().unwrap();
        let local = 0u8;
        let address = &local as *const u8 as usize;
        assert!(maps.iter().any(|m| m.contains(address)));
    }
}
