//! DIE tree (component F): construction, the arena, and tree search
//! (§4.6). The identity of a DIE is its index into a `CompilationUnit`'s
//! arena — a plain `usize` newtype rather than a pointer, and parent/
//! child links are indices rather than `Rc`/`Weak` (§9 "Parent
//! back-edges").
//!
//! Construction is grounded in `debugger/dwarf/parse.rs`'s
//! `Unit::from_unit` — the `cursor.next_dfs()` depth-first walk and its
//! `delta_depth`-driven parent bookkeeping — generalized into an
//! explicit, growable per-depth parent stack (§9 "Parent stack") so that
//! a non-admitted tag can be dropped from the tree while its children
//! still reattach to the nearest admitted ancestor (§4.3 step 3), which
//! the teacher's simpler "previous entry is the parent" scheme does not
//! need to handle since it keeps every visited node.

use crate::dwarf::adapter::{self, R};
use crate::dwarf::type_chain::{self, TypeInfo};
use crate::error::DwarfError;
use crate::location::LocationChain;
use crate::tag::Tag;
use gimli::{Dwarf, Unit};
use std::collections::HashMap;

/// Identity of a DIE: its index into the owning [`Tree`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DieId(pub usize);

/// Whether a DIE's name was handed back from the adapter unchanged or
/// synthesized by this crate's naming policy (§4.3). Vestigial for
/// memory management in the arena rendering (`Tree`'s `Drop` frees every
/// string uniformly) but kept so pretty-printing and tests can still
/// tell the two apart, per §9 "Ad-hoc naming".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOwner {
    Adapter,
    Library,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DieName {
    pub text: String,
    pub owner: StringOwner,
}

#[derive(Debug, Clone, Default)]
pub struct Die {
    pub tag: Tag,
    pub offset: u64,
    pub name: Option<DieName>,
    parent: Option<DieId>,
    children: Vec<DieId>,
    pub low_pc: Option<u64>,
    pub high_pc: Option<u64>,
    pub member_offset: Option<u64>,
    pub type_ref: Option<u64>,
    pub type_info: Option<TypeInfo>,
    pub location: Option<crate::location::LocationList>,
    /// Present on a subprogram (its own frame base) and, duplicated, on
    /// every descendant (§3 "Ownership summary", §9 item iii).
    pub frame_base: Option<LocationChain>,
    pub abstract_origin: Option<u64>,
}

impl Default for Tag {
    fn default() -> Self {
        Tag::CompileUnit
    }
}

impl Die {
    pub fn name_str(&self) -> Option<&str> {
        self.name.as_ref().map(|n| n.text.as_str())
    }

    pub fn parent(&self) -> Option<DieId> {
        self.parent
    }

    pub fn children(&self) -> &[DieId] {
        &self.children
    }

    pub fn encloses_pc(&self, pc: u64) -> bool {
        match (self.low_pc, self.high_pc) {
            (Some(lo), Some(hi)) => pc >= lo && pc < hi,
            _ => false,
        }
    }
}

/// A CU's DIE tree: an arena of [`Die`]s plus an index from DWARF global
/// offset back to arena position, used by the type-chain resolver and
/// by offset-based search (§4.6).
#[derive(Debug, Default)]
pub struct Tree {
    arena: Vec<Die>,
    by_offset: HashMap<u64, DieId>,
}

impl Tree {
    pub fn root(&self) -> DieId {
        DieId(0)
    }

    pub fn get(&self, id: DieId) -> &Die {
        &self.arena[id.0]
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn by_offset(&self, offset: u64) -> Option<DieId> {
        self.by_offset.get(&offset).copied()
    }

    /// Pre-order search for the first node matching `pred`.
    pub fn find(&self, pred: impl Fn(&Die) -> bool) -> Option<DieId> {
        self.find_from(self.root(), &pred)
    }

    fn find_from(&self, id: DieId, pred: &impl Fn(&Die) -> bool) -> Option<DieId> {
        let die = self.get(id);
        if pred(die) {
            return Some(id);
        }
        for &child in die.children() {
            if let Some(found) = self.find_from(child, pred) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_by_name(&self, name: &str) -> Option<DieId> {
        self.find(|d| d.name_str() == Some(name))
    }

    pub fn find_function_by_pc(&self, pc: u64) -> Option<DieId> {
        self.find(|d| d.tag == Tag::Subprogram && d.encloses_pc(pc))
    }

    pub fn find_by_offset(&self, offset: u64) -> Option<DieId> {
        self.by_offset(offset)
    }

    /// Every descendant of `id` tagged `variable`, pre-order.
    pub fn variables_under(&self, id: DieId) -> Vec<DieId> {
        let mut out = Vec::new();
        self.collect(id, &mut out, |d| d.tag == Tag::Variable);
        out
    }

    fn collect(&self, id: DieId, out: &mut Vec<DieId>, pred: impl Fn(&Die) -> bool + Copy) {
        let die = self.get(id);
        if pred(die) {
            out.push(id);
        }
        for &child in die.children() {
            self.collect(child, out, pred);
        }
    }

    /// Direct children tagged `formal_parameter`, in source order.
    pub fn parameters_of(&self, id: DieId) -> Vec<DieId> {
        self.get(id)
            .children()
            .iter()
            .copied()
            .filter(|&c| self.get(c).tag == Tag::FormalParameter)
            .collect()
    }

    /// Direct children tagged `member`, in source order. `id` must name
    /// a struct/union DIE.
    pub fn members_of(&self, id: DieId) -> Vec<DieId> {
        self.get(id)
            .children()
            .iter()
            .copied()
            .filter(|&c| self.get(c).tag == Tag::Member)
            .collect()
    }
}

/// Per-process synthetic-naming counters (§4.3). One [`NameCounters`] is
/// created per [`crate::DwarfContext`] and reset at `open` (§5), not a
/// global. Atomic so a single instance can be shared by reference
/// across the `rayon` workers that build each CU's tree concurrently
/// (§5, §10 "Object/section loading") — a global, never-repeated
/// per-kind counter value is all the naming policy requires; it does
/// not need the counters to advance in DFS order across CUs.
#[derive(Debug, Default)]
pub struct NameCounters {
    anon_struct: std::sync::atomic::AtomicU32,
    anon_union: std::sync::atomic::AtomicU32,
    anon_enum: std::sync::atomic::AtomicU32,
    lexical_block: std::sync::atomic::AtomicU32,
}

impl NameCounters {
    fn next_anon(&self, tag: gimli::DwTag) -> String {
        use std::sync::atomic::Ordering::Relaxed;
        match tag {
            gimli::DW_TAG_structure_type => {
                format!("ANON_STRUCT_{}", self.anon_struct.fetch_add(1, Relaxed))
            }
            gimli::DW_TAG_union_type => {
                format!("ANON_UNION_{}", self.anon_union.fetch_add(1, Relaxed))
            }
            gimli::DW_TAG_enumeration_type => {
                format!("ANON_ENUM_{}", self.anon_enum.fetch_add(1, Relaxed))
            }
            _ => unreachable!("next_anon called for a non-aggregate/enum tag"),
        }
    }

    fn next_lexical_block(&self) -> String {
        use std::sync::atomic::Ordering::Relaxed;
        format!("LEXICAL_BLOCK_{}", self.lexical_block.fetch_add(1, Relaxed))
    }
}

/// One slot of the depth-indexed parent stack (§9 "Parent stack"): the
/// nearest admitted ancestor's arena id at that depth, or `None` while
/// every ancestor up to that depth has been filtered out (possible only
/// at the very root, which is always admitted since `compile_unit` is
/// in the admitted set).
type ParentStack = Vec<Option<DieId>>;

/// Build the full DIE tree for one compilation unit (§4.3). `cu_low_pc`
/// anchors location-list ranges; `counters` carries the per-context
/// synthetic-name state across CUs.
pub fn build_tree(
    dwarf: &Dwarf<R>,
    unit: &Unit<R>,
    cu_low_pc: u64,
    cu_addr_size: u8,
    counters: &NameCounters,
) -> Result<Tree, DwarfError> {
    let mut tree = Tree::default();
    let mut parent_stack: ParentStack = Vec::new();
    let mut current_fb: Vec<Option<LocationChain>> = Vec::new();

    let mut depth: usize = 0;
    let mut cursor = unit.entries();
    while let Some((delta_depth, entry)) = cursor
        .next_dfs()
        .map_err(|e| DwarfError::from(e))?
    {
        depth = (depth as isize + delta_depth).max(0) as usize;

        let tag = Tag::from_dw_tag(entry.tag());
        let nearest_admitted_parent = parent_at_or_above(&parent_stack, depth);
        let frame_base_here = nearest_frame_base(&current_fb, depth);

        let Some(tag) = tag else {
            // Not in the admitted set: drop the node but keep the
            // traversal going into its children, which will reattach to
            // `nearest_admitted_parent` (§4.3 step 3). Subprograms are
            // always admitted so a dropped node never needs to seed a
            // new frame base; nothing else to remember for it.
            ensure_depth(&mut parent_stack, depth + 1);
            parent_stack[depth] = nearest_admitted_parent;
            ensure_depth(&mut current_fb, depth + 1);
            current_fb[depth] = frame_base_here;
            log::trace!(target: "dwarfsym::die", "dropping non-admitted tag {:?} at offset {:#x}", entry.tag(), adapter::global_offset(unit, entry));
            continue;
        };

        let offset = adapter::global_offset(unit, entry);
        let name = resolve_name(dwarf, unit, entry, tag, counters)?;
        let (low_pc, high_pc) = if tag.admits_range() {
            adapter::die_low_high_pc(entry)?
        } else {
            (None, None)
        };
        let member_offset = if tag == Tag::Member {
            adapter::die_member_location(entry)?
        } else {
            None
        };
        let type_ref = adapter::die_type_ref(unit, entry)?;
        let type_info = match type_ref {
            Some(off) => Some(type_chain::resolve(dwarf, unit, off, cu_addr_size)?),
            None => None,
        };
        let location = match entry
            .attr_value(gimli::DW_AT_location)
            .map_err(|e| DwarfError::from(e))?
        {
            Some(v) => Some(adapter::build_location_list(dwarf, unit, v, cu_low_pc)?),
            None => None,
        };
        let own_frame_base = if tag == Tag::Subprogram {
            match entry
                .attr_value(gimli::DW_AT_frame_base)
                .map_err(|e| DwarfError::from(e))?
            {
                Some(v) => {
                    let list = adapter::build_location_list(dwarf, unit, v, cu_low_pc)?;
                    list.chains.into_iter().next()
                }
                None => None,
            }
        } else {
            None
        };
        let abstract_origin = if tag == Tag::InlinedSubroutine {
            adapter::die_abstract_origin(unit, entry)?
        } else {
            None
        };

        // A descendant's frame base is a defensive copy of the
        // enclosing subprogram's chain (§3, §9 item iii); a subprogram's
        // own frame base is the one it just parsed.
        let effective_frame_base = own_frame_base.clone().or_else(|| frame_base_here.clone());

        let id = DieId(tree.arena.len());
        tree.arena.push(Die {
            tag,
            offset,
            name,
            parent: nearest_admitted_parent,
            children: Vec::new(),
            low_pc,
            high_pc,
            member_offset,
            type_ref,
            type_info,
            location,
            frame_base: effective_frame_base.clone(),
            abstract_origin,
        });
        tree.by_offset.insert(offset, id);
        if let Some(parent_id) = nearest_admitted_parent {
            tree.arena[parent_id.0].children.push(id);
        }

        ensure_depth(&mut parent_stack, depth + 1);
        parent_stack[depth] = Some(id);
        ensure_depth(&mut current_fb, depth + 1);
        current_fb[depth] = if tag == Tag::Subprogram {
            own_frame_base.or(effective_frame_base)
        } else {
            effective_frame_base
        };
    }

    Ok(tree)
}

/// Test-only helpers for other modules that need a minimal hand-built
/// tree (the registry's tests, in particular) without duplicating
/// `Tree`'s crate-private arena access.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn push_root(tree: &mut Tree, name: &str, low: u64, high: u64) {
        tree.arena.push(Die {
            tag: Tag::CompileUnit,
            offset: 0,
            name: Some(DieName {
                text: name.to_string(),
                owner: StringOwner::Adapter,
            }),
            parent: None,
            children: Vec::new(),
            low_pc: Some(low),
            high_pc: Some(high),
            ..Default::default()
        });
        tree.by_offset.insert(0, DieId(0));
    }
}

fn ensure_depth<T: Default + Clone>(stack: &mut Vec<T>, depth: usize) {
    if stack.len() <= depth {
        stack.resize(depth + 1, T::default());
    }
}

fn parent_at_or_above(parent_stack: &ParentStack, depth: usize) -> Option<DieId> {
    if depth == 0 {
        return None;
    }
    parent_stack.get(depth - 1).copied().flatten()
}

fn nearest_frame_base(
    current_fb: &[Option<LocationChain>],
    depth: usize,
) -> Option<LocationChain> {
    if depth == 0 {
        return None;
    }
    current_fb.get(depth - 1).cloned().flatten()
}

fn resolve_name(
    dwarf: &Dwarf<R>,
    unit: &Unit<R>,
    entry: &adapter::Die<'_>,
    tag: Tag,
    counters: &NameCounters,
) -> Result<Option<DieName>, DwarfError> {
    if let Some(text) = adapter::die_name(dwarf, unit, entry)? {
        return Ok(Some(DieName {
            text,
            owner: StringOwner::Adapter,
        }));
    }

    let synthetic = match tag {
        Tag::StructureType | Tag::UnionType | Tag::EnumerationType => {
            Some(counters.next_anon(entry.tag()))
        }
        Tag::LexicalBlock => Some(counters.next_lexical_block()),
        _ => None,
    };

    Ok(synthetic.map(|text| DieName {
        text,
        owner: StringOwner::Library,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{LocationChain, LocationNode, LocationOp};

    fn leaf(tag: Tag, offset: u64) -> Die {
        Die {
            tag,
            offset,
            ..Default::default()
        }
    }

    /// Hand-build a tiny tree (a compile unit containing one subprogram
    /// with one variable) to exercise search without an adapter.
    fn sample_tree() -> Tree {
        let mut tree = Tree::default();
        let cu = DieId(0);
        tree.arena.push(Die {
            parent: None,
            children: vec![DieId(1)],
            ..leaf(Tag::CompileUnit, 0)
        });
        tree.arena.push(Die {
            parent: Some(cu),
            children: vec![DieId(2)],
            low_pc: Some(0x1000),
            high_pc: Some(0x1100),
            name: Some(DieName {
                text: "foo".to_string(),
                owner: StringOwner::Adapter,
            }),
            ..leaf(Tag::Subprogram, 0x10)
        });
        tree.arena.push(Die {
            parent: Some(DieId(1)),
            children: vec![],
            name: Some(DieName {
                text: "x".to_string(),
                owner: StringOwner::Adapter,
            }),
            frame_base: Some(LocationChain::unbounded(vec![LocationNode::new(
                LocationOp::Reg(29),
            )])),
            ..leaf(Tag::Variable, 0x20)
        });
        tree.by_offset.insert(0, DieId(0));
        tree.by_offset.insert(0x10, DieId(1));
        tree.by_offset.insert(0x20, DieId(2));
        tree
    }

    #[test]
    fn find_function_by_pc_respects_half_open_range() {
        let tree = sample_tree();
        assert_eq!(tree.find_function_by_pc(0x1000), Some(DieId(1)));
        assert_eq!(tree.find_function_by_pc(0x10ff), Some(DieId(1)));
        assert_eq!(tree.find_function_by_pc(0x1100), None);
    }

    #[test]
    fn variables_under_collects_descendants() {
        let tree = sample_tree();
        let vars = tree.variables_under(tree.root());
        assert_eq!(vars, vec![DieId(2)]);
    }

    #[test]
    fn find_by_name_and_offset() {
        let tree = sample_tree();
        assert_eq!(tree.find_by_name("foo"), Some(DieId(1)));
        assert_eq!(tree.find_by_offset(0x20), Some(DieId(2)));
        assert_eq!(tree.find_by_name("zz"), None);
    }

    #[test]
    fn name_counters_are_monotonic_and_per_kind() {
        let counters = NameCounters::default();
        assert_eq!(counters.next_anon(gimli::DW_TAG_structure_type), "ANON_STRUCT_0");
        assert_eq!(counters.next_anon(gimli::DW_TAG_structure_type), "ANON_STRUCT_1");
        assert_eq!(counters.next_anon(gimli::DW_TAG_union_type), "ANON_UNION_0");
        assert_eq!(counters.next_lexical_block(), "LEXICAL_BLOCK_0");
    }
}
