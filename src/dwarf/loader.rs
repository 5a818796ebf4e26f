//! Object/section loading (component J, §10 "Object/section loading"):
//! turns a path on disk into a `gimli::Dwarf<R>` ready for `open` to
//! iterate units from.
//!
//! Grounded in `debugger/debugee/dwarf/mod.rs`'s `DebugInformationBuilder`
//! (memory-map the file, parse it with `object`, resolve a split
//! debug-info file via build-id or `.gnu_debuglink`, searched for with
//! `walkdir`) and its `loader::load_par`/`load_section` (load each
//! `.debug_*` section through `object`, wrapped in the same
//! `gimli::EndianArcSlice` reader).

use crate::dwarf::adapter::R;
use crate::error::DwarfError;
use gimli::{
    AbbreviationsCache, DebugAbbrev, DebugAddr, DebugAranges, DebugInfo, DebugLine, DebugLineStr,
    DebugLoc, DebugLocLists, DebugRanges, DebugRngLists, DebugStr, DebugStrOffsets, DebugTypes,
    Dwarf, DwarfFileType, LocationLists, RangeLists, RunTimeEndian, Section, SectionId,
};
use memmap2::Mmap;
use object::{Object, ObjectSection};
use rayon::prelude::*;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

const DEBUG_FILES_DIR: &str = "/usr/lib/debug";

/// Owns the mapped file bytes for as long as a loaded context is alive.
/// Boxed so `open` can hold either the primary binary's mapping or a
/// resolved split debug-info file's mapping without the caller knowing
/// which.
pub struct MappedFile {
    _mmap: Mmap,
}

fn load_section(
    id: SectionId,
    file: &object::File,
    endian: RunTimeEndian,
) -> Result<gimli::EndianArcSlice<RunTimeEndian>, DwarfError> {
    let data = file
        .section_by_name(id.name())
        .and_then(|section| section.uncompressed_data().ok())
        .unwrap_or(Cow::Borrowed(&[]));
    Ok(gimli::EndianArcSlice::new(Arc::from(&*data), endian))
}

/// Locate a separate debug-info file via `.note.gnu.build-id` or
/// `.gnu_debuglink`, mirroring the teacher's
/// `get_dwarf_from_separate_debug_file`.
fn find_separate_debug_file(obj_file: &object::File) -> Option<(PathBuf, Mmap)> {
    if let Some(section) = obj_file.section_by_name(".note.gnu.build-id") {
        if let Ok(data) = section.data() {
            if data.len() > 18 {
                let note = &data[16..];
                let dir = format!("{:02x}", note[0]);
                let rest: String = note[1..].iter().map(|b| format!("{b:02x}")).collect();
                let path = PathBuf::from(DEBUG_FILES_DIR)
                    .join(".build-id")
                    .join(dir)
                    .join(format!("{rest}.debug"));
                if let Ok(file) = fs::File::open(&path) {
                    if let Ok(mmap) = unsafe { Mmap::map(&file) } {
                        return Some((path, mmap));
                    }
                }
            }
        }
    }

    if let Some(section) = obj_file.section_by_name(".gnu_debuglink") {
        if let Ok(data) = section.data() {
            let name: Vec<u8> = data.iter().take_while(|&&b| b != 0).copied().collect();
            if let Ok(debug_link) = std::str::from_utf8(&name) {
                for entry in WalkDir::new(DEBUG_FILES_DIR)
                    .into_iter()
                    .filter_map(|e| e.ok())
                {
                    if entry.file_name().to_string_lossy().contains(debug_link) {
                        if let Ok(file) = fs::File::open(entry.path()) {
                            if let Ok(mmap) = unsafe { Mmap::map(&file) } {
                                return Some((entry.path().to_path_buf(), mmap));
                            }
                        }
                    }
                }
            }
        }
    }

    None
}

/// The subset of `Dwarf`'s sections this crate needs to load, mirroring
/// the teacher's `loader::Sections`.
#[derive(Default)]
struct Sections {
    debug_abbrev: Option<DebugAbbrev<R>>,
    debug_addr: Option<DebugAddr<R>>,
    debug_aranges: Option<DebugAranges<R>>,
    debug_info: Option<DebugInfo<R>>,
    debug_line: Option<DebugLine<R>>,
    debug_line_str: Option<DebugLineStr<R>>,
    debug_str: Option<DebugStr<R>>,
    debug_str_offsets: Option<DebugStrOffsets<R>>,
    debug_types: Option<DebugTypes<R>>,
    debug_loc: Option<DebugLoc<R>>,
    debug_loclists: Option<DebugLocLists<R>>,
    debug_ranges: Option<DebugRanges<R>>,
    debug_rnglists: Option<DebugRngLists<R>>,
}

macro_rules! make_sect_loader {
    ($file:expr, $endian:expr, $field:tt) => {{
        move |dest: &Mutex<Sections>| -> Result<(), DwarfError> {
            let sect = Section::load(|id| load_section(id, $file, $endian))?;
            dest.lock().expect("section loader panicked").$field = Some(sect);
            Ok(())
        }
    }};
}

/// Load every `.debug_*` section of `file` in parallel (the teacher's
/// `load_par`), producing a `gimli::Dwarf<R>`.
fn load_sections(file: &object::File, endian: RunTimeEndian) -> Result<Dwarf<R>, DwarfError> {
    let dest = Mutex::new(Sections::default());

    let loaders: Vec<Box<dyn Fn(&Mutex<Sections>) -> Result<(), DwarfError> + Send + Sync>> = vec![
        Box::new(make_sect_loader!(file, endian, debug_abbrev)),
        Box::new(make_sect_loader!(file, endian, debug_addr)),
        Box::new(make_sect_loader!(file, endian, debug_aranges)),
        Box::new(make_sect_loader!(file, endian, debug_info)),
        Box::new(make_sect_loader!(file, endian, debug_line)),
        Box::new(make_sect_loader!(file, endian, debug_line_str)),
        Box::new(make_sect_loader!(file, endian, debug_str)),
        Box::new(make_sect_loader!(file, endian, debug_str_offsets)),
        Box::new(make_sect_loader!(file, endian, debug_types)),
        Box::new(make_sect_loader!(file, endian, debug_loc)),
        Box::new(make_sect_loader!(file, endian, debug_loclists)),
        Box::new(make_sect_loader!(file, endian, debug_ranges)),
        Box::new(make_sect_loader!(file, endian, debug_rnglists)),
    ];

    loaders
        .into_par_iter()
        .try_for_each(|loader| loader(&dest))?;

    let sections = dest.into_inner().expect("section loader panicked");
    const MUST_EXIST: &str = "required section must exist (even if empty)";
    Ok(Dwarf {
        debug_abbrev: sections.debug_abbrev.expect(MUST_EXIST),
        debug_addr: sections.debug_addr.expect(MUST_EXIST),
        debug_aranges: sections.debug_aranges.expect(MUST_EXIST),
        debug_info: sections.debug_info.expect(MUST_EXIST),
        debug_line: sections.debug_line.expect(MUST_EXIST),
        debug_line_str: sections.debug_line_str.expect(MUST_EXIST),
        debug_str: sections.debug_str.expect(MUST_EXIST),
        debug_str_offsets: sections.debug_str_offsets.expect(MUST_EXIST),
        debug_types: sections.debug_types.expect(MUST_EXIST),
        locations: LocationLists::new(
            sections.debug_loc.expect(MUST_EXIST),
            sections.debug_loclists.expect(MUST_EXIST),
        ),
        ranges: RangeLists::new(
            sections.debug_ranges.expect(MUST_EXIST),
            sections.debug_rnglists.expect(MUST_EXIST),
        ),
        file_type: DwarfFileType::Main,
        sup: None,
        abbreviations_cache: AbbreviationsCache::new(),
    })
}

/// Result of loading an object: the bound `gimli::Dwarf<R>`, the CU
/// iteration headers are consumed from directly by `open`.
pub struct LoadedDwarf {
    pub dwarf: gimli::Dwarf<R>,
    pub endian: RunTimeEndian,
    /// Kept alive only so the mapping behind a resolved split
    /// debug-info file outlives every section reader that borrows from
    /// it; unused otherwise since `R` already owns its bytes via `Arc`.
    _split_file: Option<MappedFile>,
}

/// Load the DWARF data for `path`. When `resolve_split_debug_info` is
/// set, a build-id/`.gnu_debuglink`-referenced separate debug file is
/// preferred over the primary binary's own `.debug_*` sections, per the
/// teacher's `DebugInformationBuilder::build`.
pub fn load(path: &Path, resolve_split_debug_info: bool) -> Result<(LoadedDwarf, Mmap), DwarfError> {
    let file = fs::File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let obj_file = object::File::parse(&*mmap)?;
    let endian = if obj_file.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };

    if resolve_split_debug_info {
        if let Some((split_path, split_mmap)) = find_separate_debug_file(&obj_file) {
            log::debug!(target: "dwarfsym::loader", "{path:?} resolved split debug info at {split_path:?}");
            let split_obj = object::File::parse(&*split_mmap)?;
            let dwarf = load_sections(&split_obj, endian)?;
            return Ok((
                LoadedDwarf {
                    dwarf,
                    endian,
                    _split_file: Some(MappedFile { _mmap: split_mmap }),
                },
                mmap,
            ));
        }
    }

    let dwarf = load_sections(&obj_file, endian)?;
    Ok((
        LoadedDwarf {
            dwarf,
            endian,
            _split_file: None,
        },
        mmap,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_files_dir_matches_teacher_convention() {
        assert_eq!(DEBUG_FILES_DIR, "/usr/lib/debug");
    }
}
