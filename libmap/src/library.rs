//! The RAM library model: everything the mapper knows about the target's RAM primitives.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use memlib_netlist::ParamValue;

/// Option settings accumulated while selecting capabilities.  Insertion-ordered so that emitted
/// parameters and diagnostics come out in declaration order.
pub type Options = IndexMap<String, ParamValue>;

/// Returns true iff the two option sets assign different values to some shared key.
pub fn opts_conflict(a: &Options, b: &Options) -> bool {
    a.iter().any(|(key, value)| b.get(key).is_some_and(|other| other != value))
}

/// Returns true iff every assignment in `src` is already present in `dst`.
pub fn opts_applied(dst: &Options, src: &Options) -> bool {
    src.iter().all(|(key, value)| dst.get(key) == Some(value))
}

/// Commits the assignments of `src` into `dst`.  Inserting a new key or re-asserting an identical
/// value succeeds; any disagreement fails and leaves `dst` partially updated (callers fork
/// candidates before applying, so a failed candidate is discarded wholesale).
pub fn apply_opts(dst: &mut Options, src: &Options) -> bool {
    for (key, value) in src {
        match dst.get(key) {
            None => {
                dst.insert(key.clone(), value.clone());
            }
            Some(existing) if existing == value => (),
            Some(_) => return false,
        }
    }
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamKind {
    Distributed,
    Block,
    Huge,
}

impl RamKind {
    pub fn tag(self) -> &'static str {
        match self {
            RamKind::Distributed => "distributed",
            RamKind::Block => "block",
            RamKind::Huge => "huge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryInitKind {
    None,
    Zero,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Ar,
    Sr,
    Sw,
    Arsw,
    Srsw,
}

impl PortKind {
    pub fn can_write(self) -> bool {
        matches!(self, PortKind::Sw | PortKind::Arsw | PortKind::Srsw)
    }

    pub fn can_read(self) -> bool {
        !matches!(self, PortKind::Sw)
    }

    pub fn is_sync_read(self) -> bool {
        matches!(self, PortKind::Sr | PortKind::Srsw)
    }

    pub fn is_async_read(self) -> bool {
        matches!(self, PortKind::Ar | PortKind::Arsw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClkPolKind {
    Anyedge,
    Posedge,
    Negedge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdEnKind {
    None,
    Any,
    WriteImplies,
    WriteExcludes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Init,
    Async,
    Sync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetValKind {
    None,
    Zero,
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrstKind {
    SrstOverEn,
    EnOverSrst,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransTarget {
    /// The read half of the same read+write port group.
    SelfPort,
    /// Any read port other than the one sharing this port group.
    Other,
    /// The port group with the given first name.
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransKind {
    New,
    Old,
}

#[derive(Debug, Clone)]
pub struct ClockDef {
    pub kind: ClkPolKind,
    /// Named clocks constrain every port binding the same name to the same signal.
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResetValDef {
    pub kind: ResetKind,
    pub val: ResetValKind,
}

#[derive(Debug, Clone)]
pub struct WrTransDef {
    pub target: TransTarget,
    pub kind: TransKind,
}

/// Width progression restriction for one port.  Empty lists stand for the full dims progression.
#[derive(Debug, Clone, Default)]
pub struct WidthDef {
    /// Read and write widths are constrained to be identical.
    pub tied: bool,
    pub wr_widths: Vec<usize>,
    pub rd_widths: Vec<usize>,
}

/// A library-declared permitted behavior, conditional on committing the carried options.
#[derive(Debug, Clone)]
pub struct Capability<T> {
    pub val: T,
    pub opts: Options,
    pub portopts: Options,
}

pub type Caps<T> = Vec<Capability<T>>;

/// One group of interchangeable physical ports; each name is one physical port slot.
#[derive(Debug, Clone)]
pub struct PortGroupDef {
    pub kind: PortKind,
    pub names: Vec<String>,
    pub clock: Caps<ClockDef>,
    pub width: Caps<WidthDef>,
    pub addrce: Caps<()>,
    pub rden: Caps<RdEnKind>,
    pub rdrstval: Caps<ResetValDef>,
    pub rdsrstmode: Caps<SrstKind>,
    pub wrprio: Caps<String>,
    pub wrtrans: Caps<WrTransDef>,
    pub wrcs: Caps<usize>,
}

impl PortGroupDef {
    pub fn new(kind: PortKind) -> Self {
        PortGroupDef {
            kind,
            names: vec![],
            clock: vec![],
            width: vec![],
            addrce: vec![],
            rden: vec![],
            rdrstval: vec![],
            rdsrstmode: vec![],
            wrprio: vec![],
            wrtrans: vec![],
            wrcs: vec![],
        }
    }
}

/// One geometry variant of a RAM definition.
#[derive(Debug, Clone)]
pub struct MemoryDimsDef {
    pub abits: usize,
    /// Strictly doubling data width progression; `dbits.len() - 1 <= abits`.
    pub dbits: Vec<usize>,
    /// Per-port independent widths are forbidden.
    pub tied: bool,
    /// Named pool of identical RAM instances, used for post-geometry pruning.
    pub resource_name: Option<String>,
    pub resource_count: usize,
    /// Cost of one unit, in the abstract cost model.
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub struct RamDef {
    pub id: String,
    pub kind: RamKind,
    /// Reject this definition for memories without write ports.
    pub prune_rom: bool,
    pub ports: Caps<PortGroupDef>,
    pub dims: Caps<MemoryDimsDef>,
    pub byte: Caps<usize>,
    pub init: Caps<MemoryInitKind>,
    pub style: Caps<String>,
}

impl RamDef {
    pub fn new(id: impl Into<String>, kind: RamKind) -> Self {
        RamDef { id: id.into(), kind, prune_rom: false, ports: vec![], dims: vec![], byte: vec![], init: vec![], style: vec![] }
    }
}

/// Global pass options, from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassOptions {
    pub no_auto_distributed: bool,
    pub no_auto_block: bool,
    pub no_auto_huge: bool,
    pub debug_geom: bool,
}

#[derive(Debug)]
pub struct Library {
    pub ram_defs: Vec<RamDef>,
    pub opts: PassOptions,
    pub defines: BTreeSet<String>,
    pub(crate) defines_unused: BTreeSet<String>,
}

impl Library {
    pub fn new(opts: PassOptions, defines: BTreeSet<String>) -> Self {
        Library { ram_defs: vec![], opts, defines_unused: defines.clone(), defines }
    }

    /// Called once all library files are parsed; warns about defines no file ever tested.
    pub fn prepare(&self) {
        for define in &self.defines_unused {
            log::warn!("define {define} not used in the library");
        }
    }
}
