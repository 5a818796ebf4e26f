//! Error model: a tagged `(kind, code)` pair backed by a static message
//! table, wrapped in a `thiserror`-derived enum so callers can still use
//! `?` and `std::error::Error`.

use std::fmt;

/// Coarse category of a failure. Mirrors the taxonomy a debugger front
/// end needs to branch on without inspecting message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoError,
    Generic,
    DwarfAdapter,
    Cu,
    Die,
}

/// A small unsigned code scoped within its `ErrorKind`. Codes are not
/// globally unique, only unique within their kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u16);

impl ErrorKind {
    fn table(self) -> &'static [&'static str] {
        match self {
            ErrorKind::NoError => &["no error"],
            ErrorKind::Generic => &[
                "bad argument",
                "missing file",
                "null handle",
                "buffer overflow",
            ],
            ErrorKind::DwarfAdapter => &[
                "cu header parse failed",
                "abbreviation table load failed",
                "entry walk failed",
                "attribute decode failed",
                "location list decode failed",
                "line program decode failed",
                "section not found",
            ],
            ErrorKind::Cu => &["cu not found", "no more headers"],
            ErrorKind::Die => &[
                "not a compile unit",
                "not a subprogram",
                "no parent",
                "no data type",
                "not a struct or union",
                "die not found",
                "line not found",
                "next line not found",
                "unsupported opcode",
            ],
        }
    }

    /// Render `(self, code)` without allocating. Out-of-range codes (or
    /// an out-of-range kind, which cannot happen in safe Rust since
    /// `ErrorKind` is a closed enum) fall back to a generic message.
    pub fn message(self, code: ErrorCode) -> &'static str {
        self.table()
            .get(code.0 as usize)
            .copied()
            .unwrap_or("out of bounds error code")
    }
}

/// The library's error type. Adapter failures from `gimli`/`object`/I/O
/// are preserved with `#[from]` so the original cause is never lost;
/// every other condition is a `(kind, code)` pair rendered through the
/// static table above.
#[derive(Debug, thiserror::Error)]
pub enum DwarfError {
    #[error("{}", .kind.message(*.code))]
    Tagged { kind: ErrorKind, code: ErrorCode },

    #[error("dwarf adapter: {0}")]
    Gimli(#[from] gimli::Error),

    #[error("object file parsing: {0}")]
    Object(#[from] object::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl DwarfError {
    pub fn tagged(kind: ErrorKind, code: u16) -> Self {
        DwarfError::Tagged {
            kind,
            code: ErrorCode(code),
        }
    }

    pub fn generic(code: u16) -> Self {
        Self::tagged(ErrorKind::Generic, code)
    }

    pub fn cu(code: u16) -> Self {
        Self::tagged(ErrorKind::Cu, code)
    }

    pub fn die(code: u16) -> Self {
        Self::tagged(ErrorKind::Die, code)
    }

    pub fn adapter(code: u16) -> Self {
        Self::tagged(ErrorKind::DwarfAdapter, code)
    }

    /// The `(kind, code)` pair this error carries, for callers that want
    /// the specification's tagged-pair contract rather than `Display`.
    pub fn kind_code(&self) -> (ErrorKind, ErrorCode) {
        match self {
            DwarfError::Tagged { kind, code } => (*kind, *code),
            DwarfError::Gimli(_) => (ErrorKind::DwarfAdapter, ErrorCode(0)),
            DwarfError::Object(_) => (ErrorKind::DwarfAdapter, ErrorCode(0)),
            DwarfError::Io(_) => (ErrorKind::Generic, ErrorCode(1)),
        }
    }
}

/// Well-known generic codes, named the way the specification names them
/// rather than as bare integers at every call site.
pub mod generic {
    pub const BAD_ARGUMENT: u16 = 0;
    pub const MISSING_FILE: u16 = 1;
    pub const NULL_HANDLE: u16 = 2;
    pub const BUFFER_OVERFLOW: u16 = 3;
}

pub mod cu {
    pub const NOT_FOUND: u16 = 0;
    pub const NO_MORE_HEADERS: u16 = 1;
}

pub mod die {
    pub const NOT_COMPILE_UNIT: u16 = 0;
    pub const NOT_SUBPROGRAM: u16 = 1;
    pub const NO_PARENT: u16 = 2;
    pub const NO_DATA_TYPE: u16 = 3;
    pub const NOT_STRUCT_OR_UNION: u16 = 4;
    pub const DIE_NOT_FOUND: u16 = 5;
    pub const LINE_NOT_FOUND: u16 = 6;
    pub const NEXT_LINE_NOT_FOUND: u16 = 7;
    pub const UNSUPPORTED_OPCODE: u16 = 8;
}

pub mod adapter {
    pub const CU_HEADER: u16 = 0;
    pub const ABBREVIATIONS: u16 = 1;
    pub const ENTRY_WALK: u16 = 2;
    pub const ATTRIBUTE: u16 = 3;
    pub const LOCATION_LIST: u16 = 4;
    pub const LINE_PROGRAM: u16 = 5;
    pub const SECTION_NOT_FOUND: u16 = 6;
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DwarfError>;

/// Mirrors the specification's `(NO_ERROR, 0)` resting state, used by
/// the façade's error accessors (§6) for callers that want to inspect
/// the last condition without threading a `Result` through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastError {
    kind: ErrorKind,
    code: ErrorCode,
}

impl Default for LastError {
    fn default() -> Self {
        Self::cleared()
    }
}

impl LastError {
    pub fn cleared() -> Self {
        LastError {
            kind: ErrorKind::NoError,
            code: ErrorCode(0),
        }
    }

    pub fn set(&mut self, kind: ErrorKind, code: ErrorCode) {
        self.kind = kind;
        self.code = code;
    }

    pub fn record(&mut self, err: &DwarfError) {
        let (kind, code) = err.kind_code();
        self.set(kind, code);
    }

    pub fn clear(&mut self) {
        *self = Self::cleared();
    }

    pub fn message(&self) -> &'static str {
        self.kind.message(self.code)
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_never_allocates_on_bad_code() {
        assert_eq!(
            ErrorKind::Die.message(ErrorCode(200)),
            "out of bounds error code"
        );
    }

    #[test]
    fn tagged_error_renders_table_message() {
        let err = DwarfError::die(die::DIE_NOT_FOUND);
        assert_eq!(err.to_string(), "die not found");
    }

    #[test]
    fn last_error_clears_to_no_error() {
        let mut last = LastError::default();
        last.set(ErrorKind::Cu, ErrorCode(cu::NOT_FOUND));
        assert_eq!(last.message(), "cu not found");
        last.clear();
        assert_eq!(last.message(), "no error");
    }
}
