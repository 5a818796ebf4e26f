//! Compilation-unit registry (component H, §4.8): an ordered set of
//! loaded CUs with linear lookup by name/PC, acceptable for the
//! tens-to-hundreds-of-CUs scale a debugger sees.
//!
//! Grounded in `debugger/dwarf/mod.rs`'s `DwarfContext::find_unit`
//! (linear scan over `unit_ranges`), generalized to hold this crate's
//! own [`Tree`] instead of that file's `ParsedUnit`.

use crate::container::OrderedSeq;
use crate::dwarf::die::{DieId, Tree};
use crate::dwarf::line_index::LineIndex;
use crate::error::{cu, DwarfError};

/// One loaded compilation unit: its root DIE's tree, line index, and
/// the header attributes §3 calls out (address size, header length,
/// abbrev offset, next-header offset).
pub struct CompilationUnit {
    pub header_length: u64,
    pub abbrev_offset: u64,
    pub address_size: u8,
    pub next_header_offset: u64,
    pub tree: Tree,
    pub lines: LineIndex,
}

impl CompilationUnit {
    pub fn root(&self) -> DieId {
        self.tree.root()
    }

    pub fn name(&self) -> Option<&str> {
        self.tree.get(self.tree.root()).name_str()
    }

    pub fn covers(&self, pc: u64) -> bool {
        let root = self.tree.get(self.tree.root());
        matches!((root.low_pc, root.high_pc), (Some(lo), Some(hi)) if pc >= lo && pc < hi)
    }
}

#[derive(Default)]
pub struct CuRegistry {
    units: OrderedSeq<CompilationUnit>,
}

impl CuRegistry {
    pub fn new() -> Self {
        CuRegistry::default()
    }

    pub fn push(&mut self, cu: CompilationUnit) -> usize {
        self.units.push(cu)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&CompilationUnit> {
        self.units.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompilationUnit> {
        self.units.iter()
    }

    pub fn find_by_filename(&self, name: &str) -> Result<&CompilationUnit, DwarfError> {
        self.units
            .iter()
            .find(|u| u.name() == Some(name))
            .ok_or_else(|| DwarfError::cu(cu::NOT_FOUND))
    }

    pub fn find_by_pc(&self, pc: u64) -> Result<&CompilationUnit, DwarfError> {
        self.units
            .iter()
            .find(|u| u.covers(pc))
            .ok_or_else(|| DwarfError::cu(cu::NOT_FOUND))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cu_named(name: &str, low: u64, high: u64) -> CompilationUnit {
        let mut tree = Tree::default();
        crate::dwarf::die::test_support::push_root(&mut tree, name, low, high);
        CompilationUnit {
            header_length: 0,
            abbrev_offset: 0,
            address_size: 8,
            next_header_offset: 0,
            tree,
            lines: LineIndex::new(vec![]),
        }
    }

    #[test]
    fn find_by_filename_and_pc() {
        let mut reg = CuRegistry::new();
        reg.push(cu_named("a.c", 0x1000, 0x2000));
        reg.push(cu_named("b.c", 0x2000, 0x3000));

        assert!(reg.find_by_filename("a.c").is_ok());
        assert!(reg.find_by_filename("zz.c").is_err());
        assert_eq!(reg.find_by_pc(0x1500).unwrap().name(), Some("a.c"));
        assert_eq!(reg.find_by_pc(0x2000).unwrap().name(), Some("b.c"));
        assert!(reg.find_by_pc(0x3000).is_err());
    }
}
