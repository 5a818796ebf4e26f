//! The closed set of DIE tags admitted into the trimmed tree (§3), plus
//! the predicate construction uses to decide whether a raw DWARF entry
//! survives filtering.

use gimli::DwTag;

/// A tag admitted into the DIE tree. Every other `DwTag` the DWARF
/// producer emits (namespaces, template parameters, variant parts,
/// pointer/const/array/base type nodes that only ever appear inside a
/// type chain, …) is walked by the type-chain resolver (§4.5) but never
/// becomes a tree node in its own right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    CompileUnit,
    Subprogram,
    InlinedSubroutine,
    FormalParameter,
    EnumerationType,
    Enumerator,
    StructureType,
    UnionType,
    Member,
    Variable,
    LexicalBlock,
}

impl Tag {
    /// Classify a raw DWARF tag, or `None` if it is not in the admitted
    /// set and should be dropped from the tree.
    pub fn from_dw_tag(tag: DwTag) -> Option<Tag> {
        Some(match tag {
            gimli::DW_TAG_compile_unit => Tag::CompileUnit,
            gimli::DW_TAG_subprogram => Tag::Subprogram,
            gimli::DW_TAG_inlined_subroutine => Tag::InlinedSubroutine,
            gimli::DW_TAG_formal_parameter => Tag::FormalParameter,
            gimli::DW_TAG_enumeration_type => Tag::EnumerationType,
            gimli::DW_TAG_enumerator => Tag::Enumerator,
            gimli::DW_TAG_structure_type => Tag::StructureType,
            gimli::DW_TAG_union_type => Tag::UnionType,
            gimli::DW_TAG_member => Tag::Member,
            gimli::DW_TAG_variable => Tag::Variable,
            gimli::DW_TAG_lexical_block => Tag::LexicalBlock,
            _ => return None,
        })
    }

    /// True when the tag admits a PC range (low_pc/high_pc meaningful).
    pub fn admits_range(self) -> bool {
        matches!(
            self,
            Tag::CompileUnit | Tag::Subprogram | Tag::LexicalBlock
        )
    }

    pub fn is_aggregate(self) -> bool {
        matches!(self, Tag::StructureType | Tag::UnionType)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tag::CompileUnit => "compile_unit",
            Tag::Subprogram => "subprogram",
            Tag::InlinedSubroutine => "inlined_subroutine",
            Tag::FormalParameter => "formal_parameter",
            Tag::EnumerationType => "enumeration_type",
            Tag::Enumerator => "enumerator",
            Tag::StructureType => "structure_type",
            Tag::UnionType => "union_type",
            Tag::Member => "member",
            Tag::Variable => "variable",
            Tag::LexicalBlock => "lexical_block",
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admitted_tags_round_trip() {
        assert_eq!(
            Tag::from_dw_tag(gimli::DW_TAG_subprogram),
            Some(Tag::Subprogram)
        );
        assert_eq!(Tag::from_dw_tag(gimli::DW_TAG_pointer_type), None);
        assert_eq!(Tag::from_dw_tag(gimli::DW_TAG_namespace), None);
    }

    #[test]
    fn only_range_bearing_tags_admit_range() {
        assert!(Tag::Subprogram.admits_range());
        assert!(!Tag::Variable.admits_range());
    }
}
