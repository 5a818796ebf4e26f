//! DWARF adapter (component C): every call into the external DWARF
//! reader funnels through here and comes back a total function — a
//! well-typed value or a `DwarfError` of kind `DwarfAdapter`, never a
//! bare `gimli::Error`. This is the only module (besides the loader,
//! which only hands sections to `gimli::Dwarf::load`) allowed to name
//! `gimli` types in a public signature.
//!
//! Grounded in `debugger/dwarf/parse.rs`'s attribute-extraction calls
//! (`die.attr(DW_AT_*)`, `dwarf.attr_string`, `dwarf.die_ranges`) and in
//! `debugger/debugee/dwarf/loader.rs`'s choice of reader
//! (`gimli::EndianArcSlice<RunTimeEndian>`).

use crate::error::{adapter, DwarfError};
use crate::location::{LocationChain, LocationList, LocationNode, LocationOp};
use gimli::{
    AttributeValue, DW_AT_abstract_origin, DW_AT_byte_size, DW_AT_count, DW_AT_data_member_location,
    DW_AT_encoding, DW_AT_frame_base, DW_AT_high_pc, DW_AT_location, DW_AT_low_pc, DW_AT_name,
    DW_AT_type, DW_AT_upper_bound, DebuggingInformationEntry, Dwarf, Reader, Unit, UnitOffset,
};

/// The reader type threaded through every `gimli` structure this crate
/// touches. An `Arc`-backed slice, matching the teacher loader's
/// section-loading reader exactly, so sections and strings are cheaply
/// shared across every CU/DIE built from them.
pub type R = gimli::EndianArcSlice<gimli::RunTimeEndian>;

pub type Die<'u> = DebuggingInformationEntry<'u, 'u, R>;

fn gimli_err(code: u16, _e: gimli::Error) -> DwarfError {
    DwarfError::adapter(code)
}

/// Global (`.debug_info`-relative) offset of a DIE, used as the stable
/// identity the type-chain resolver and the tree's offset index key on.
pub fn global_offset(unit: &Unit<R>, die: &Die<'_>) -> u64 {
    die.offset()
        .to_debug_info_offset(&unit.header)
        .map(|o| o.0 as u64)
        .unwrap_or(0)
}

/// Inverse of [`global_offset`]: a unit-relative offset suitable for
/// `UnitHeader::entry`/`entries_at_offset`.
pub fn offset_to_unit_offset(unit: &Unit<R>, global: u64) -> UnitOffset<usize> {
    let base = unit
        .header
        .offset()
        .as_debug_info_offset()
        .map(|o| o.0)
        .unwrap_or(0);
    UnitOffset(global.saturating_sub(base as u64) as usize)
}

pub fn die_name(dwarf: &Dwarf<R>, unit: &Unit<R>, die: &Die<'_>) -> Result<Option<String>, DwarfError> {
    let attr = die
        .attr(DW_AT_name)
        .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))?;
    match attr {
        Some(attr) => {
            let s = dwarf
                .attr_string(unit, attr.value())
                .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))?;
            let s = s
                .to_string_lossy()
                .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))?;
            Ok(Some(s.into_owned()))
        }
        None => Ok(None),
    }
}

pub fn die_low_high_pc(die: &Die<'_>) -> Result<(Option<u64>, Option<u64>), DwarfError> {
    let low = die
        .attr_value(DW_AT_low_pc)
        .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))?
        .and_then(|v| match v {
            AttributeValue::Addr(a) => Some(a),
            _ => None,
        });

    let high = match die
        .attr_value(DW_AT_high_pc)
        .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))?
    {
        Some(AttributeValue::Addr(a)) => Some(a),
        Some(AttributeValue::Udata(off)) => low.map(|l| l + off),
        _ => None,
    };

    Ok((low, high))
}

pub fn die_type_ref(unit: &Unit<R>, die: &Die<'_>) -> Result<Option<u64>, DwarfError> {
    let attr = die
        .attr_value(DW_AT_type)
        .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))?;
    Ok(attr.and_then(|v| match v {
        AttributeValue::UnitRef(off) => off
            .to_debug_info_offset(&unit.header)
            .map(|o| o.0 as u64),
        AttributeValue::DebugInfoRef(off) => Some(off.0 as u64),
        _ => None,
    }))
}

pub fn die_abstract_origin(unit: &Unit<R>, die: &Die<'_>) -> Result<Option<u64>, DwarfError> {
    let attr = die
        .attr_value(DW_AT_abstract_origin)
        .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))?;
    Ok(attr.and_then(|v| match v {
        AttributeValue::UnitRef(off) => off
            .to_debug_info_offset(&unit.header)
            .map(|o| o.0 as u64),
        AttributeValue::DebugInfoRef(off) => Some(off.0 as u64),
        _ => None,
    }))
}

pub fn die_byte_size(die: &Die<'_>) -> Result<Option<u64>, DwarfError> {
    die.attr(DW_AT_byte_size)
        .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))
        .map(|a| a.and_then(|a| a.udata_value()))
}

pub fn die_encoding(die: &Die<'_>) -> Result<Option<u8>, DwarfError> {
    let attr = die
        .attr_value(DW_AT_encoding)
        .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))?;
    Ok(attr.and_then(|v| match v {
        AttributeValue::Encoding(enc) => Some(enc.0),
        _ => None,
    }))
}

pub fn die_member_location(die: &Die<'_>) -> Result<Option<u64>, DwarfError> {
    die.attr(DW_AT_data_member_location)
        .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))
        .map(|a| a.and_then(|a| a.udata_value()))
}

/// `DW_AT_upper_bound` if present, else `DW_AT_count - 1`; the element
/// count of a subrange is whichever of the two the producer emitted.
pub fn subrange_upper_bound(die: &Die<'_>) -> Result<Option<u64>, DwarfError> {
    if let Some(ub) = die
        .attr(DW_AT_upper_bound)
        .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))?
        .and_then(|a| a.udata_value())
    {
        return Ok(Some(ub));
    }
    Ok(die
        .attr(DW_AT_count)
        .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))?
        .and_then(|a| a.udata_value())
        .map(|c| c.saturating_sub(1)))
}

/// Decode a `DW_AT_location`/`DW_AT_frame_base` attribute into a
/// [`LocationList`]. `cu_low_pc` anchors list-entry-relative ranges to
/// absolute addresses per §4.4.
pub fn build_location_list(
    dwarf: &Dwarf<R>,
    unit: &Unit<R>,
    attr_value: AttributeValue<R>,
    cu_low_pc: u64,
) -> Result<LocationList, DwarfError> {
    match attr_value {
        AttributeValue::Exprloc(expr) => {
            let nodes = decode_operations(expr, unit.encoding())?;
            Ok(LocationList::single(LocationChain::unbounded(nodes)))
        }
        AttributeValue::LocationListsRef(offset) => {
            let mut chains = Vec::new();
            let mut iter = dwarf
                .locations(unit, offset)
                .map_err(|e| gimli_err(adapter::LOCATION_LIST, e))?;
            while let Some(entry) = iter
                .next()
                .map_err(|e| gimli_err(adapter::LOCATION_LIST, e))?
            {
                let nodes = decode_operations(entry.data, unit.encoding())?;
                chains.push(LocationChain::bounded(
                    nodes,
                    cu_low_pc + entry.range.begin,
                    cu_low_pc + entry.range.end,
                ));
            }
            Ok(LocationList { chains })
        }
        _ => Ok(LocationList::default()),
    }
}

fn decode_operations(
    expr: gimli::Expression<R>,
    encoding: gimli::Encoding,
) -> Result<Vec<LocationNode>, DwarfError> {
    let mut nodes = Vec::new();
    let mut reader = expr.0;
    while !reader.is_empty() {
        let op = gimli::Operation::parse(&mut reader, encoding)
            .map_err(|e| gimli_err(adapter::ATTRIBUTE, e))?;
        nodes.push(LocationNode::new(translate_operation(op)));
    }
    Ok(nodes)
}

/// Translate a decoded `gimli::Operation` into our own closed
/// [`LocationOp`] set. Anything outside §4.4's required opcodes becomes
/// `Unsupported` tagged with the matching `DW_OP_*` constant so
/// diagnostics can name exactly what was not evaluated.
fn translate_operation(op: gimli::Operation<R>) -> LocationOp {
    use gimli::Operation::*;
    match op {
        Address { address } => LocationOp::Addr(address),
        Literal { value } if value <= u8::MAX as u64 => LocationOp::Lit(value as u8),
        Register { register } => LocationOp::Reg(register.0),
        RegisterOffset {
            register, offset, ..
        } => LocationOp::Breg(register.0, offset),
        FrameOffset { offset } => LocationOp::Fbreg(offset),
        Nop => LocationOp::Nop,
        Plus => LocationOp::Plus,
        Minus => LocationOp::Minus,
        Mul => LocationOp::Mul,
        And => LocationOp::And,
        Or => LocationOp::Or,
        PlusConstant { value } => LocationOp::PlusUconst(value),
        Deref { size, .. } => LocationOp::DerefSize(size),
        StackValue => LocationOp::StackValue,
        Piece {
            size_in_bits,
            bit_offset: _,
        } => LocationOp::Piece(size_in_bits / 8),
        other => LocationOp::Unsupported(unsupported_code(&other)),
    }
}

/// Best-effort `DW_OP_*` value for an operation this crate does not
/// evaluate, for the diagnostics in `UnsupportedOpcode`. `gimli` has
/// already decoded the operand, so this recovers the opcode family
/// rather than the exact encoded byte (e.g. every comparison collapses
/// to its own constant, not to the single encoded instruction).
fn unsupported_code(op: &gimli::Operation<R>) -> u16 {
    use gimli::Operation::*;
    match op {
        Drop => gimli::constants::DW_OP_drop.0 as u16,
        Pick { .. } => gimli::constants::DW_OP_pick.0 as u16,
        Swap => gimli::constants::DW_OP_swap.0 as u16,
        Rot => gimli::constants::DW_OP_rot.0 as u16,
        Abs => gimli::constants::DW_OP_abs.0 as u16,
        Div => gimli::constants::DW_OP_div.0 as u16,
        Mod => gimli::constants::DW_OP_mod.0 as u16,
        Neg => gimli::constants::DW_OP_neg.0 as u16,
        Not => gimli::constants::DW_OP_not.0 as u16,
        Shl => gimli::constants::DW_OP_shl.0 as u16,
        Shr => gimli::constants::DW_OP_shr.0 as u16,
        Shra => gimli::constants::DW_OP_shra.0 as u16,
        Xor => gimli::constants::DW_OP_xor.0 as u16,
        Bra { .. } => gimli::constants::DW_OP_bra.0 as u16,
        Skip { .. } => gimli::constants::DW_OP_skip.0 as u16,
        Eq => gimli::constants::DW_OP_eq.0 as u16,
        Ge => gimli::constants::DW_OP_ge.0 as u16,
        Gt => gimli::constants::DW_OP_gt.0 as u16,
        Le => gimli::constants::DW_OP_le.0 as u16,
        Lt => gimli::constants::DW_OP_lt.0 as u16,
        Ne => gimli::constants::DW_OP_ne.0 as u16,
        Address { .. } => gimli::constants::DW_OP_addr.0 as u16,
        AddressIndex { .. } => gimli::constants::DW_OP_addrx.0 as u16,
        ImplicitValue { .. } => gimli::constants::DW_OP_implicit_value.0 as u16,
        EntryValue { .. } => gimli::constants::DW_OP_entry_value.0 as u16,
        CallFrameCFA => gimli::constants::DW_OP_call_frame_cfa.0 as u16,
        _ => 0xffff,
    }
}

/// Read every row of a unit's line-number program into [`LineRecord`]s,
/// resolving each row's file index to a full path. Mirrors
/// `parse_lines`/`parse_files`/`render_file_path` in the teacher's
/// `dwarf/parse.rs`, collapsed into the single `(address, file, line)`
/// triple this crate's line index needs.
pub fn line_records(
    dwarf: &Dwarf<R>,
    unit: &Unit<R>,
) -> Result<Vec<crate::dwarf::line_index::LineRecord>, DwarfError> {
    use crate::dwarf::line_index::LineRecord;
    use std::path::PathBuf;

    let Some(ref program) = unit.line_program else {
        return Ok(Vec::new());
    };
    let mut rows = program.clone().rows();

    let mut files: Vec<PathBuf> = Vec::new();
    {
        let header = rows.header();
        let mut index = 0u64;
        while let Some(file) = header.file(index) {
            files.push(render_file_path(dwarf, unit, &file, header)?);
            index += 1;
        }
    }

    let mut out = Vec::new();
    while let Some((_, row)) = rows
        .next_row()
        .map_err(|e| gimli_err(adapter::LINE_PROGRAM, e))?
    {
        let Some(line) = row.line() else { continue };
        let file = files
            .get(row.file_index() as usize)
            .cloned()
            .unwrap_or_default();
        out.push(LineRecord {
            address: row.address(),
            file,
            line: line.get(),
        });
    }
    Ok(out)
}

fn render_file_path(
    dwarf: &Dwarf<R>,
    unit: &Unit<R>,
    file: &gimli::FileEntry<R>,
    header: &gimli::LineProgramHeader<R>,
) -> Result<std::path::PathBuf, DwarfError> {
    let mut path = std::path::PathBuf::new();
    if let Some(ref comp_dir) = unit.comp_dir {
        path.push(
            comp_dir
                .to_string_lossy()
                .map_err(|e| gimli_err(adapter::LINE_PROGRAM, e))?
                .as_ref(),
        );
    }
    if file.directory_index() != 0 {
        if let Some(directory) = file.directory(header) {
            let dir = dwarf
                .attr_string(unit, directory)
                .map_err(|e| gimli_err(adapter::LINE_PROGRAM, e))?;
            path.push(
                dir.to_string_lossy()
                    .map_err(|e| gimli_err(adapter::LINE_PROGRAM, e))?
                    .as_ref(),
            );
        }
    }
    let name = dwarf
        .attr_string(unit, file.path_name())
        .map_err(|e| gimli_err(adapter::LINE_PROGRAM, e))?;
    path.push(
        name.to_string_lossy()
            .map_err(|e| gimli_err(adapter::LINE_PROGRAM, e))?
            .as_ref(),
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_breg_keeps_register_and_offset() {
        let op = gimli::Operation::<R>::RegisterOffset {
            register: gimli::Register(0),
            offset: 8,
            base_type: gimli::UnitOffset(0),
        };
        assert_eq!(translate_operation(op), LocationOp::Breg(0, 8));
    }

    #[test]
    fn translate_frame_offset_is_fbreg() {
        let op = gimli::Operation::<R>::FrameOffset { offset: -24 };
        assert_eq!(translate_operation(op), LocationOp::Fbreg(-24));
    }
}
