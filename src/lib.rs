//! `dwarfsym` parses DWARF debugging information out of an object file
//! and exposes it to a debugger front end: a trimmed, parent-linked DIE
//! tree per compilation unit, canonical type names and sizes, location
//! descriptions, and the source-line index that turns the tree into a
//! queryable symbol table.
//!
//! The façade (component I, §6) is [`DwarfContext`]: [`DwarfContext::open`]
//! loads every compilation unit in one pass, and every other type in
//! this crate borrows from the context that produced it — there is no
//! way to retain a [`Die`]/[`CompilationUnit`] reference past the
//! context's `Drop`, which is this crate's idiomatic rendering of the
//! specification's "valid only until `close`" discipline (§5).
//!
//! This crate does not itself interpret target memory or registers: it
//! returns symbolic/decoded location expressions (register names,
//! addresses, literal values) for the embedding debugger to resolve
//! against a live process.

pub mod container;
pub mod dwarf;
pub mod error;
pub mod location;
pub mod tag;

use crate::dwarf::adapter::{self, R};
use crate::dwarf::die::{Die, DieId, NameCounters};
use crate::dwarf::line_index::LineLookup;
use crate::dwarf::registry::{CompilationUnit, CuRegistry};
use crate::dwarf::type_chain::{BaseTag, TypeClass};
use crate::error::{die, DwarfError, LastError, Result};
use crate::location::{EvalResult, Evaluator};
use crate::tag::Tag;
use gimli::Unit;
use memmap2::Mmap;
use rayon::prelude::*;
use std::cell::Cell;
use std::path::Path;

/// Loader-level choices that govern how `open` acquires its DWARF data
/// (§10 "Configuration"). The library itself has nothing resembling a
/// config *file* — this is the full surface of its tunables.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    resolve_split_debug_info: bool,
    parallel_cu_build: bool,
    parallel_threshold: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            resolve_split_debug_info: true,
            parallel_cu_build: true,
            parallel_threshold: 4,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set (the default), a build-id/`.gnu_debuglink`-referenced
    /// split debug-info file is preferred over the primary binary's own
    /// `.debug_*` sections, matching the teacher's
    /// `DebugInformationBuilder`.
    pub fn resolve_split_debug_info(mut self, yes: bool) -> Self {
        self.resolve_split_debug_info = yes;
        self
    }

    /// When set (the default) and more than [`Self::parallel_threshold`]
    /// CUs are present, each CU's tree is built on a separate `rayon`
    /// worker (§5) — a load-time latency optimization only; the
    /// resulting context is identical to a fully sequential build.
    pub fn parallel_cu_build(mut self, yes: bool) -> Self {
        self.parallel_cu_build = yes;
        self
    }

    pub fn parallel_threshold(mut self, n: usize) -> Self {
        self.parallel_threshold = n;
        self
    }

    pub fn open(self, path: impl AsRef<Path>) -> Result<DwarfContext> {
        DwarfContext::open_with(path.as_ref(), self)
    }
}

/// Owns everything a loaded binary's debug info produced: the mapped
/// file(s), the bound `gimli::Dwarf<R>`, and every CU's tree and line
/// index. Created by [`DwarfContext::open`], destroyed by `Drop` (or,
/// for parity with the specification's explicit lifecycle, by the
/// consuming [`DwarfContext::close`]).
pub struct DwarfContext {
    loaded: dwarf::loader::LoadedDwarf,
    _primary_mmap: Mmap,
    registry: CuRegistry,
    last_error: Cell<LastError>,
}

impl DwarfContext {
    /// Load every compilation unit of the object file at `path` with
    /// default [`OpenOptions`]. Any failure releases everything
    /// acquired so far (§5 "Failure policy") — the partially built
    /// registry simply never escapes this function on an `Err` path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        OpenOptions::default().open(path)
    }

    fn open_with(path: &Path, opts: OpenOptions) -> Result<Self> {
        log::info!(target: "dwarfsym", "opening {}", path.display());
        let (loaded, mmap) = dwarf::loader::load(path, opts.resolve_split_debug_info)?;
        let registry = build_all_cus(&loaded.dwarf, &opts)?;
        log::info!(
            target: "dwarfsym",
            "{} loaded: {} compilation unit(s)",
            path.display(),
            registry.len()
        );
        Ok(DwarfContext {
            loaded,
            _primary_mmap: mmap,
            registry,
            last_error: Cell::new(LastError::default()),
        })
    }

    /// Idempotent by construction: consuming `self` by value means
    /// there is no handle left to call `close` on twice (§5, §6).
    pub fn close(self) {}

    /// Records `err` as the context's last condition (§6, §4.1). Takes
    /// `&self`: every query method below only ever reads from `self`
    /// afterwards, and a `Cell` lets error recording coexist with a
    /// borrow already held on a [`CompilationUnit`]/[`DieView`] returned
    /// by an earlier call.
    fn record_error(&self, err: &DwarfError) {
        let mut last = self.last_error.get();
        last.record(err);
        self.last_error.set(last);
    }

    // -- CU queries (§6) ----------------------------------------------

    pub fn compilation_units(&self) -> impl Iterator<Item = &CompilationUnit> {
        self.registry.iter()
    }

    pub fn cu_count(&self) -> usize {
        self.registry.len()
    }

    pub fn find_cu_by_name(&self, name: &str) -> Result<&CompilationUnit> {
        self.registry.find_by_filename(name).map_err(|e| {
            self.record_error(&e);
            e
        })
    }

    pub fn find_cu_by_pc(&self, pc: u64) -> Result<&CompilationUnit> {
        self.registry.find_by_pc(pc).map_err(|e| {
            self.record_error(&e);
            e
        })
    }

    // -- DIE queries (§6) ----------------------------------------------

    pub fn die<'ctx>(&'ctx self, cu: &'ctx CompilationUnit, id: DieId) -> DieView<'ctx> {
        DieView { cu, id }
    }

    pub fn cu_root<'ctx>(&'ctx self, cu: &'ctx CompilationUnit) -> DieView<'ctx> {
        self.die(cu, cu.root())
    }

    pub fn find_function_by_pc<'ctx>(
        &self,
        cu: &'ctx CompilationUnit,
        pc: u64,
    ) -> Result<DieView<'ctx>> {
        match cu.tree.find_function_by_pc(pc) {
            Some(id) => Ok(DieView { cu, id }),
            None => {
                let e = DwarfError::die(die::DIE_NOT_FOUND);
                self.record_error(&e);
                Err(e)
            }
        }
    }

    pub fn find_die_by_name<'ctx>(
        &self,
        cu: &'ctx CompilationUnit,
        name: &str,
    ) -> Result<DieView<'ctx>> {
        match cu.tree.find_by_name(name) {
            Some(id) => Ok(DieView { cu, id }),
            None => {
                let e = DwarfError::die(die::DIE_NOT_FOUND);
                self.record_error(&e);
                Err(e)
            }
        }
    }

    pub fn find_die_by_offset<'ctx>(
        &self,
        cu: &'ctx CompilationUnit,
        offset: u64,
    ) -> Result<DieView<'ctx>> {
        match cu.tree.find_by_offset(offset) {
            Some(id) => Ok(DieView { cu, id }),
            None => {
                let e = DwarfError::die(die::DIE_NOT_FOUND);
                self.record_error(&e);
                Err(e)
            }
        }
    }

    // -- Line queries (§6, §4.7) ---------------------------------------

    pub fn pc_to_place(&self, cu: &CompilationUnit, pc: u64) -> Result<Place> {
        let line = cu.lines.pc_to_line(pc).map_err(|e| {
            self.record_error(&e);
            e
        })?;
        let function = cu
            .tree
            .find_function_by_pc(pc)
            .and_then(|id| cu.tree.get(id).name_str().map(str::to_string));
        let file = cu.lines.basename(pc);
        Ok(Place {
            file,
            function,
            line,
        })
    }

    pub fn line_to_pc(&self, cu: &CompilationUnit, line: u64) -> Result<LineLookup> {
        cu.lines.line_to_pc(line).map_err(|e| {
            self.record_error(&e);
            e
        })
    }

    pub fn line_to_pcs(&self, cu: &CompilationUnit, line: u64) -> Vec<u64> {
        cu.lines.line_to_pcs(line)
    }

    pub fn next_line(&self, cu: &CompilationUnit, pc: u64) -> Result<LineLookup> {
        cu.lines.next_line(pc).map_err(|e| {
            self.record_error(&e);
            e
        })
    }

    // -- Location evaluation (§6, §4.4) --------------------------------

    /// Evaluate `die`'s location at `pc`. `die` must carry a location
    /// list (a `variable`/`formal_parameter`); its frame base (if any)
    /// was captured at tree-construction time (§3, §9 item iii) and is
    /// used automatically to resolve `DW_OP_fbreg`.
    pub fn evaluate_location(&self, die: DieView<'_>, pc: u64) -> EvalResult {
        let d = die.die();
        match &d.location {
            Some(list) => Evaluator::evaluate(list, pc, d.frame_base.as_ref()),
            None => EvalResult::Unavailable,
        }
    }

    // -- Error accessors (§6, §4.1) -------------------------------------

    pub fn last_error_message(&self) -> &'static str {
        self.last_error.get().message()
    }

    pub fn clear_error(&self) {
        self.last_error.set(LastError::cleared());
    }
}

/// Result of [`DwarfContext::pc_to_place`]: the specification's
/// PC→(file, function, line) query (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    pub file: Option<String>,
    pub function: Option<String>,
    pub line: u64,
}

/// A borrowed view of one DIE: a [`CompilationUnit`] reference plus the
/// [`DieId`] identifying a node in its tree. Cheap to copy (two
/// pointer-sized fields); every accessor reads straight out of the
/// arena, so building a `DieView` never allocates or walks the tree.
#[derive(Clone, Copy)]
pub struct DieView<'ctx> {
    cu: &'ctx CompilationUnit,
    id: DieId,
}

impl<'ctx> DieView<'ctx> {
    fn die(&self) -> &'ctx Die {
        self.cu.tree.get(self.id)
    }

    pub fn id(&self) -> DieId {
        self.id
    }

    pub fn tag(&self) -> Tag {
        self.die().tag
    }

    pub fn offset(&self) -> u64 {
        self.die().offset
    }

    pub fn name(&self) -> Option<&'ctx str> {
        self.die().name_str()
    }

    pub fn low_high_pc(&self) -> Option<(u64, u64)> {
        let d = self.die();
        match (d.low_pc, d.high_pc) {
            (Some(lo), Some(hi)) => Some((lo, hi)),
            _ => None,
        }
    }

    pub fn encloses_pc(&self, pc: u64) -> bool {
        self.die().encloses_pc(pc)
    }

    pub fn member_offset(&self) -> Option<u64> {
        self.die().member_offset
    }

    pub fn type_name(&self) -> Option<&'ctx str> {
        self.die().type_info.as_ref().map(|t| t.type_name.as_str())
    }

    pub fn byte_size(&self) -> Option<u64> {
        self.die().type_info.as_ref().and_then(|t| t.byte_size)
    }

    pub fn base_encoding(&self) -> Option<u8> {
        self.die().type_info.as_ref().and_then(|t| t.base_encoding)
    }

    pub fn base_tag(&self) -> Option<BaseTag> {
        self.die().type_info.as_ref().and_then(|t| t.base_tag)
    }

    pub fn array_elem_size(&self) -> Option<u64> {
        self.die().type_info.as_ref().and_then(|t| t.array_elem_size)
    }

    pub fn class(&self) -> TypeClass {
        self.die()
            .type_info
            .as_ref()
            .map(|t| t.class)
            .unwrap_or(TypeClass::empty())
    }

    pub fn is_pointer(&self) -> bool {
        self.class().contains(TypeClass::POINTER)
    }

    pub fn is_aggregate(&self) -> bool {
        self.class().contains(TypeClass::AGGREGATE)
    }

    pub fn is_array(&self) -> bool {
        self.class().contains(TypeClass::ARRAY)
    }

    pub fn parent(&self) -> Option<DieView<'ctx>> {
        self.die().parent().map(|id| DieView { cu: self.cu, id })
    }

    /// Direct parameters of a subprogram (§4.6). Fails if this DIE is
    /// not a subprogram.
    pub fn parameters(&self) -> Result<Vec<DieView<'ctx>>> {
        if self.tag() != Tag::Subprogram {
            return Err(DwarfError::die(die::NOT_SUBPROGRAM));
        }
        Ok(self
            .cu
            .tree
            .parameters_of(self.id)
            .into_iter()
            .map(|id| DieView { cu: self.cu, id })
            .collect())
    }

    /// Members of a struct/union: direct children when this DIE itself
    /// is the aggregate, or — when it is, say, a `variable` whose type
    /// chain terminates in one — the aggregate found via the resolver's
    /// recorded terminal offset (§4.6).
    pub fn members(&self) -> Result<Vec<DieView<'ctx>>> {
        let aggregate_id = if self.tag().is_aggregate() {
            self.id
        } else {
            let offset = self
                .die()
                .type_info
                .as_ref()
                .filter(|t| matches!(t.base_tag, Some(BaseTag::StructureType | BaseTag::UnionType)))
                .and_then(|t| t.terminal_offset)
                .ok_or_else(|| DwarfError::die(die::NOT_STRUCT_OR_UNION))?;
            self.cu
                .tree
                .find_by_offset(offset)
                .ok_or_else(|| DwarfError::die(die::NOT_STRUCT_OR_UNION))?
        };
        Ok(self
            .cu
            .tree
            .members_of(aggregate_id)
            .into_iter()
            .map(|id| DieView { cu: self.cu, id })
            .collect())
    }

    /// Every descendant tagged `variable`, pre-order (§4.6).
    pub fn variables(&self) -> Vec<DieView<'ctx>> {
        self.cu
            .tree
            .variables_under(self.id)
            .into_iter()
            .map(|id| DieView { cu: self.cu, id })
            .collect()
    }

    /// One-line rendering of this DIE alone (§6 "pretty-print").
    pub fn pretty_print(&self) -> String {
        let d = self.die();
        let name = d.name_str().unwrap_or("<unnamed>");
        let mut out = format!("<{:#x}> {} \"{}\"", d.offset, d.tag, name);
        if let Some((lo, hi)) = self.low_high_pc() {
            out.push_str(&format!(" [{lo:#x}, {hi:#x})"));
        }
        if let Some(type_name) = self.type_name() {
            out.push_str(&format!(" : {type_name}"));
        }
        out
    }

    /// Recursive, indented rendering of this DIE and its full subtree.
    pub fn pretty_print_subtree(&self) -> String {
        let mut out = String::new();
        self.write_subtree(&mut out, 0);
        out
    }

    fn write_subtree(&self, out: &mut String, depth: usize) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&self.pretty_print());
        out.push('\n');
        for &child in self.die().children() {
            let child_view = DieView {
                cu: self.cu,
                id: child,
            };
            child_view.write_subtree(out, depth + 1);
        }
    }
}

/// Build every CU's tree and line index from an already-loaded
/// `gimli::Dwarf<R>` (§4.3, §4.7, §4.8). Per-CU construction is
/// independent (§5), so when `opts` asks for it and there are enough
/// CUs to be worth the overhead, each is built on its own `rayon`
/// worker; the resulting [`CuRegistry`] is exactly what a sequential
/// build would have produced.
fn build_all_cus(dwarf: &gimli::Dwarf<R>, opts: &OpenOptions) -> Result<CuRegistry> {
    let mut headers = Vec::new();
    let mut iter = dwarf.units();
    while let Some(header) = iter.next()? {
        headers.push(header);
    }

    // `header_length`/`next_header_offset` (§3) are this crate's
    // rendering of libdwarf's `dwarf_next_cu_header_d` out-parameters.
    // `gimli` doesn't surface a CU's on-disk length directly, but the
    // offset of the next header in `.debug_info` order gives the same
    // information: derive both purely from each header's own `offset()`
    // (the one method this is unambiguously available on) rather than
    // from an assumed-present length accessor. The last CU has no
    // successor to diff against, so its length is left at the sentinel
    // `0` — a cosmetic header attribute no query in §4 depends on.
    let offsets: Vec<u64> = headers
        .iter()
        .map(|h| {
            h.offset()
                .as_debug_info_offset()
                .map(|o| o.0 as u64)
                .unwrap_or(0)
        })
        .collect();
    let next_offsets: Vec<u64> = offsets
        .iter()
        .skip(1)
        .copied()
        .chain(std::iter::once(0))
        .collect();

    let counters = NameCounters::default();
    let build_one = |(header, next_offset): (gimli::UnitHeader<R>, u64)| -> Result<CompilationUnit> {
        let unit = dwarf.unit(header)?;
        build_cu(dwarf, &unit, next_offset, &counters)
    };

    let indexed: Vec<(gimli::UnitHeader<R>, u64)> =
        headers.into_iter().zip(next_offsets).collect();

    let units: Vec<CompilationUnit> =
        if opts.parallel_cu_build && indexed.len() > opts.parallel_threshold {
            indexed
                .into_par_iter()
                .map(build_one)
                .collect::<Result<Vec<_>>>()?
        } else {
            indexed
                .into_iter()
                .map(build_one)
                .collect::<Result<Vec<_>>>()?
        };

    let mut registry = CuRegistry::new();
    for unit in units {
        registry.push(unit);
    }
    Ok(registry)
}

/// Build one CU's header attributes (§3), tree (§4.3) and line index
/// (§4.7). `next_header_offset` is precomputed across all headers
/// before any tree is built (see [`build_all_cus`]).
fn build_cu(
    dwarf: &gimli::Dwarf<R>,
    unit: &Unit<R>,
    next_header_offset: u64,
    counters: &NameCounters,
) -> Result<CompilationUnit> {
    let address_size = unit.header.address_size();
    let abbrev_offset = unit.header.debug_abbrev_offset().0 as u64;
    let header_offset = unit
        .header
        .offset()
        .as_debug_info_offset()
        .map(|o| o.0 as u64)
        .unwrap_or(0);
    let header_length = next_header_offset.saturating_sub(header_offset);

    let cu_low_pc = root_low_pc(unit)?;
    let tree = dwarf::die::build_tree(dwarf, unit, cu_low_pc, address_size, counters)?;
    let lines = dwarf::line_index::LineIndex::new(adapter::line_records(dwarf, unit)?);

    Ok(CompilationUnit {
        header_length,
        abbrev_offset,
        address_size,
        next_header_offset,
        tree,
        lines,
    })
}

/// The root DIE's low PC, needed before tree construction can anchor
/// loclist-relative ranges (§4.4) — read in a throwaway first pass
/// since `build_tree`'s own DFS hasn't produced it yet when it's first
/// needed.
fn root_low_pc(unit: &Unit<R>) -> Result<u64> {
    let mut cursor = unit.entries();
    if let Some((_, entry)) = cursor.next_dfs()? {
        let (low, _high) = adapter::die_low_high_pc(entry)?;
        return Ok(low.unwrap_or(0));
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_options_defaults_match_spec() {
        let opts = OpenOptions::default();
        assert!(opts.resolve_split_debug_info);
        assert!(opts.parallel_cu_build);
    }

    #[test]
    fn open_options_builder_is_chainable() {
        let opts = OpenOptions::new()
            .resolve_split_debug_info(false)
            .parallel_cu_build(false)
            .parallel_threshold(1);
        assert!(!opts.resolve_split_debug_info);
        assert!(!opts.parallel_cu_build);
        assert_eq!(opts.parallel_threshold, 1);
    }
}
