//! DWARF-facing subsystem: the adapter over the external reader (C),
//! the DIE tree (F), the type-chain resolver (E), the line index (G),
//! the CU registry (H) and the object/section loader (J). Everything
//! above this module (the façade in `lib.rs`) only ever sees the types
//! re-exported here, never `gimli` directly — except the adapter
//! module itself, which is the one place `gimli` types are named in a
//! public signature (§4.2).

pub mod adapter;
pub mod die;
pub mod line_index;
pub mod loader;
pub mod registry;
pub mod type_chain;
