//! Library-driven memory mapping.
//!
//! This crate maps abstract [`Memory`](memlib_netlist::Memory) cells onto RAM primitives
//! described by a target library.  The library declares, for every RAM cell type, its port
//! groups, geometry variants, and *capabilities*: the clocking, width, enable, reset,
//! transparency, and priority behaviors the cell supports, each possibly conditional on
//! committing cell or port options.
//!
//! Mapping one memory is a pipeline over a working set of candidate configurations: candidates
//! are seeded per RAM definition, multiplied through port assignment and capability choices,
//! extended with emulation flags where the library has no native answer, scored, split across
//! geometry variants, and pruned; the cheapest survivor is compared against a soft-logic
//! fallback and, if it wins, lowered into library cell instances plus emulation circuitry.

pub mod library;
mod parse;
mod sat;
mod map;
mod geometry;
mod emit;

pub use library::{Library, PassOptions};
pub use parse::{parse_library_file, parse_library_str, LibraryError};
pub use sat::{EnableOracle, StructuralOracle};
pub use map::{map_memories, map_memories_with, MapError, MemConfig, MemMapping, RdPortConfig, WrPortConfig};
