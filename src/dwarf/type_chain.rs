//! Static type-chain resolver (component E, §4.5): given a DIE with a
//! type reference, follow it to a terminal node and build a canonical
//! type name, classification bits, and size information.
//!
//! Grounded in the shape of `debugger/dwarf/type.rs`'s `TypeDeclaration`
//! (structure/array/enum classification) but resolved once, statically,
//! at tree-construction time rather than that file's live-process,
//! `Pid`-driven `size_in_bytes`/bound evaluation — this crate never
//! touches a running process (§1 non-goal), so every size here is
//! either a DWARF constant or the declared sentinel.

use crate::dwarf::adapter::{self, Die, R};
use crate::error::DwarfError;
use bitflags::bitflags;
use gimli::{Dwarf, Unit};

/// Sentinel for "not a compile-time constant" byte sizes (runtime-sized
/// arrays whose bound is not in the debug info).
pub const NON_CONST_SIZE: u64 = u64::MAX;

/// Canonical type name is capped at this many characters (§4.5); past
/// this the resolver stops appending and the caller is warned.
pub const NAME_CAP: usize = 256;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeClass: u8 {
        const POINTER   = 0b001;
        const AGGREGATE = 0b010;
        const ARRAY     = 0b100;
    }
}

/// Tag of the terminal node of a type chain. Distinct from [`crate::tag::Tag`]
/// because `base_type` never becomes a tree node in its own right (it only
/// ever appears at the end of a type chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseTag {
    BaseType,
    EnumerationType,
    StructureType,
    UnionType,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeInfo {
    pub type_name: String,
    /// `None` means "non-compile-time constant" (§4.5's sentinel).
    pub byte_size: Option<u64>,
    pub base_tag: Option<BaseTag>,
    pub base_encoding: Option<u8>,
    pub array_elem_size: Option<u64>,
    pub class: TypeClass,
    /// `true` when the canonical name was truncated at [`NAME_CAP`].
    pub name_truncated: bool,
    /// Global offset of the chain's terminal node, when that terminal
    /// is a struct/union/enum (i.e. whenever `base_tag` is set to one
    /// of those). Member enumeration (§4.6) uses this to find the
    /// actual struct/union DIE tree node when the query started from a
    /// variable or member rather than the aggregate itself.
    pub terminal_offset: Option<u64>,
}

struct Accumulator {
    name_suffix: String,
    name_prefix: String,
    class: TypeClass,
    byte_size: Option<u64>,
    array_elem_size: Option<u64>,
    base_tag: Option<BaseTag>,
    base_encoding: Option<u8>,
    terminal_offset: Option<u64>,
    visited: Vec<u64>,
    truncated: bool,
    addr_size: u8,
}

impl Accumulator {
    fn new(addr_size: u8) -> Self {
        Accumulator {
            name_suffix: String::new(),
            name_prefix: String::new(),
            class: TypeClass::empty(),
            byte_size: None,
            array_elem_size: None,
            base_tag: None,
            base_encoding: None,
            terminal_offset: None,
            visited: Vec::new(),
            truncated: false,
            addr_size,
        }
    }

    fn push_prefix(&mut self, s: &str) {
        if self.name_prefix.len() + s.len() > NAME_CAP {
            self.warn_truncated();
            return;
        }
        self.name_prefix.push_str(s);
    }

    fn push_suffix(&mut self, s: &str) {
        if self.name_suffix.len() + s.len() > NAME_CAP {
            self.warn_truncated();
            return;
        }
        self.name_suffix.push_str(s);
    }

    fn warn_truncated(&mut self) {
        if !self.truncated {
            log::warn!(
                target: "dwarfsym::type_chain",
                "canonical type name exceeded {NAME_CAP} characters, truncating"
            );
        }
        self.truncated = true;
    }

    fn finish(mut self) -> TypeInfo {
        let mut name = self.name_prefix;
        name.push_str(&self.name_suffix);
        if name.len() > NAME_CAP {
            name.truncate(NAME_CAP);
            if !self.truncated {
                log::warn!(
                    target: "dwarfsym::type_chain",
                    "canonical type name exceeded {NAME_CAP} characters, truncating"
                );
            }
            self.truncated = true;
        }
        TypeInfo {
            type_name: name,
            byte_size: self.byte_size,
            base_tag: self.base_tag,
            base_encoding: self.base_encoding,
            array_elem_size: self.array_elem_size,
            class: self.class,
            name_truncated: self.truncated,
            terminal_offset: self.terminal_offset,
        }
    }
}

/// Resolve the type chain starting at `type_offset` (a global
/// `.debug_info` offset, as produced by [`adapter::die_type_ref`]).
pub fn resolve(
    dwarf: &Dwarf<R>,
    unit: &Unit<R>,
    type_offset: u64,
    cu_addr_size: u8,
) -> Result<TypeInfo, DwarfError> {
    let mut acc = Accumulator::new(cu_addr_size);
    walk(dwarf, unit, type_offset, &mut acc)?;
    Ok(acc.finish())
}

fn walk(
    dwarf: &Dwarf<R>,
    unit: &Unit<R>,
    offset: u64,
    acc: &mut Accumulator,
) -> Result<(), DwarfError> {
    if acc.visited.contains(&offset) {
        // Cycle in an ill-formed type chain: truncate here rather than
        // looping forever (§4.5).
        return Ok(());
    }
    acc.visited.push(offset);

    let unit_offset = adapter::offset_to_unit_offset(unit, offset);
    let entry = unit
        .header
        .entry(&unit.abbreviations, unit_offset)
        .map_err(|e| crate::error::DwarfError::from(e))?;

    match entry.tag() {
        gimli::DW_TAG_pointer_type => {
            acc.class |= TypeClass::POINTER;
            acc.byte_size = Some(acc.addr_size as u64);
            // No space between consecutive pointer stars (`const char **`,
            // not `const char * *`); the single leading space is only
            // needed before the first one.
            let sep = suffix_sep(&acc.name_suffix, '*');
            acc.push_suffix(&format!("{sep}*"));
            follow_next(dwarf, unit, &entry, acc)
        }
        gimli::DW_TAG_const_type | gimli::DW_TAG_volatile_type | gimli::DW_TAG_restrict_type => {
            let qualifier = match entry.tag() {
                gimli::DW_TAG_const_type => "const",
                gimli::DW_TAG_volatile_type => "volatile",
                _ => "restrict",
            };
            match adapter::die_type_ref(unit, &entry)? {
                Some(inner) => {
                    // A space only precedes the qualifier when the name
                    // built so far doesn't already end in `*` (§4.5).
                    let sep = if acc.name_prefix.ends_with('*') { "" } else { " " };
                    acc.push_prefix(&format!("{qualifier}{sep}"));
                    walk(dwarf, unit, inner, acc)
                }
                None => {
                    acc.push_prefix("void ");
                    Ok(())
                }
            }
        }
        gimli::DW_TAG_typedef => {
            let name = adapter::die_name(dwarf, unit, &entry)?.unwrap_or_default();
            // A typedef is the "source truth" name: replace whatever has
            // been accumulated so far rather than composing with it.
            acc.name_prefix.clear();
            acc.name_suffix.clear();
            acc.push_prefix(&name);
            // Once a pointer arm has set the chain's size to the CU
            // address size, nothing deeper in the chain may overwrite it
            // (§4.5: pointer byte size is sticky through the rest of the
            // walk).
            if !acc.class.contains(TypeClass::POINTER) {
                if let Some(size) = adapter::die_byte_size(&entry)? {
                    acc.byte_size = Some(size);
                }
            }
            Ok(())
        }
        gimli::DW_TAG_array_type => {
            acc.class |= TypeClass::ARRAY;
            let elem_offset = adapter::die_type_ref(unit, &entry)?;
            let elem_size = if let Some(elem_offset) = elem_offset {
                let mut elem_acc = Accumulator::new(acc.addr_size);
                walk(dwarf, unit, elem_offset, &mut elem_acc)?;
                let info = elem_acc.finish();
                acc.push_prefix(&info.type_name);
                info.byte_size
            } else {
                acc.push_prefix("void");
                None
            };
            acc.array_elem_size = elem_size;

            let mut total: Option<u64> = elem_size;
            let mut any_dim = false;
            let mut tree = unit.entries_tree(Some(entry.offset())).map_err(|e| crate::error::DwarfError::from(e))?;
            let root = tree.root().map_err(|e| crate::error::DwarfError::from(e))?;
            let mut children = root.children();
            while let Some(child) = children.next().map_err(|e| crate::error::DwarfError::from(e))? {
                let child_die = child.entry();
                if child_die.tag() != gimli::DW_TAG_subrange_type {
                    continue;
                }
                any_dim = true;
                // A single leading space precedes the first bracket group
                // (`int []`); subsequent groups chain with no space
                // between them (`struct foo [0x10][0x4]`).
                let sep = suffix_sep(&acc.name_suffix, ']');
                match adapter::subrange_upper_bound(child_die)? {
                    Some(ub) => {
                        let n = ub + 1;
                        acc.push_suffix(&format!("{sep}[{n:#x}]"));
                        total = total.and_then(|t| t.checked_mul(n));
                    }
                    None => {
                        acc.push_suffix(&format!("{sep}[]"));
                        total = None;
                    }
                }
            }
            if !any_dim {
                acc.push_suffix(" []");
                total = None;
            }
            if !acc.class.contains(TypeClass::POINTER) {
                acc.byte_size = total;
            }
            Ok(())
        }
        gimli::DW_TAG_structure_type | gimli::DW_TAG_union_type => {
            acc.class |= TypeClass::AGGREGATE;
            acc.base_tag = Some(if entry.tag() == gimli::DW_TAG_structure_type {
                BaseTag::StructureType
            } else {
                BaseTag::UnionType
            });
            let keyword = if entry.tag() == gimli::DW_TAG_structure_type {
                "struct"
            } else {
                "union"
            };
            let name = adapter::die_name(dwarf, unit, &entry)?
                .unwrap_or_else(|| "<anonymous>".to_string());
            acc.push_prefix(&format!("{keyword} {name}"));
            if !acc.class.contains(TypeClass::POINTER) {
                acc.byte_size = adapter::die_byte_size(&entry)?;
            }
            acc.terminal_offset = Some(adapter::global_offset(unit, &entry));
            Ok(())
        }
        gimli::DW_TAG_enumeration_type => {
            acc.base_tag = Some(BaseTag::EnumerationType);
            let name = adapter::die_name(dwarf, unit, &entry)?
                .unwrap_or_else(|| "<anonymous>".to_string());
            acc.push_prefix(&format!("enum {name}"));
            if !acc.class.contains(TypeClass::POINTER) {
                acc.byte_size = adapter::die_byte_size(&entry)?;
            }
            acc.terminal_offset = Some(adapter::global_offset(unit, &entry));
            Ok(())
        }
        gimli::DW_TAG_base_type => {
            acc.base_tag = Some(BaseTag::BaseType);
            acc.base_encoding = adapter::die_encoding(&entry)?;
            let name = adapter::die_name(dwarf, unit, &entry)?.unwrap_or_default();
            acc.push_prefix(&name);
            if !acc.class.contains(TypeClass::POINTER) {
                acc.byte_size = adapter::die_byte_size(&entry)?;
            }
            Ok(())
        }
        gimli::DW_TAG_subroutine_type => {
            let ret_offset = adapter::die_type_ref(unit, &entry)?;
            let ret_name = match ret_offset {
                Some(off) => {
                    let mut ret_acc = Accumulator::new(acc.addr_size);
                    walk(dwarf, unit, off, &mut ret_acc)?;
                    ret_acc.finish().type_name
                }
                None => "void".to_string(),
            };

            let mut params = Vec::new();
            let mut tree = unit.entries_tree(Some(entry.offset())).map_err(|e| crate::error::DwarfError::from(e))?;
            let root = tree.root().map_err(|e| crate::error::DwarfError::from(e))?;
            let mut children = root.children();
            while let Some(child) = children.next().map_err(|e| crate::error::DwarfError::from(e))? {
                let child_die = child.entry();
                if child_die.tag() != gimli::DW_TAG_formal_parameter {
                    continue;
                }
                let param_offset = adapter::die_type_ref(unit, child_die)?;
                let param_name = match param_offset {
                    Some(off) => {
                        let mut param_acc = Accumulator::new(acc.addr_size);
                        walk(dwarf, unit, off, &mut param_acc)?;
                        param_acc.finish().type_name
                    }
                    None => "void".to_string(),
                };
                params.push(param_name);
            }
            let param_list = if params.is_empty() {
                "void".to_string()
            } else {
                params.join(", ")
            };
            acc.push_prefix(&format!("{ret_name}({param_list})"));
            if !acc.class.contains(TypeClass::POINTER) {
                acc.byte_size = None;
            }
            Ok(())
        }
        _ => {
            // Any other node in a type chain (e.g. an unhandled
            // producer extension) is treated as an opaque terminal: keep
            // whatever has accumulated so far rather than failing the
            // whole resolution.
            Ok(())
        }
    }
}

/// Separator to place before appending another instance of a repeated
/// suffix token (`*` for pointers, `[` for array dimensions): empty once
/// the name already ends with that token's own close character, a
/// single space the first time (§4.5: `const char **`, `int [][4]`).
fn suffix_sep(name_suffix: &str, last_char: char) -> &'static str {
    if name_suffix.ends_with(last_char) {
        ""
    } else {
        " "
    }
}

fn follow_next(
    dwarf: &Dwarf<R>,
    unit: &Unit<R>,
    die: &Die<'_>,
    acc: &mut Accumulator,
) -> Result<(), DwarfError> {
    match adapter::die_type_ref(unit, die)? {
        Some(inner) => walk(dwarf, unit, inner, acc),
        None => {
            acc.push_prefix("void");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_class_bits_are_independent() {
        let mut c = TypeClass::empty();
        c |= TypeClass::POINTER;
        c |= TypeClass::ARRAY;
        assert!(c.contains(TypeClass::POINTER));
        assert!(c.contains(TypeClass::ARRAY));
        assert!(!c.contains(TypeClass::AGGREGATE));
    }

    #[test]
    fn non_const_size_is_distinguishable_sentinel() {
        let info = TypeInfo {
            byte_size: None,
            ..Default::default()
        };
        assert_eq!(info.byte_size, None);
    }

    #[test]
    fn suffix_sep_has_no_space_between_repeated_tokens() {
        assert_eq!(suffix_sep("", '*'), " ");
        assert_eq!(suffix_sep(" *", '*'), "");
        assert_eq!(suffix_sep(" [0x10]", ']'), "");
        assert_eq!(suffix_sep(" *", ']'), " ");
    }

    #[test]
    fn pointer_arm_freezes_byte_size_for_deeper_terminals() {
        // Simulates what `walk` does once it has crossed a pointer: the
        // POINTER bit and addr-size byte_size are set first, then a
        // terminal arm (base_type, here) must not be allowed to clobber
        // them on the way back out.
        let mut acc = Accumulator::new(8);
        acc.class |= TypeClass::POINTER;
        acc.byte_size = Some(8);
        if !acc.class.contains(TypeClass::POINTER) {
            acc.byte_size = Some(1); // what the unguarded base_type arm used to do
        }
        assert_eq!(acc.byte_size, Some(8));
    }
}
