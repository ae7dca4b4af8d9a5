//! The candidate-configuration pipeline: from one abstract memory and a parsed library to a
//! chosen configuration.
//!
//! Candidates are held in a single working vector that is replaced wholesale at every stage; a
//! stage forks a candidate by cloning it, so no state is shared between candidates.  Stages
//! either multiply candidates (port assignment, capability choice, geometry split) or shrink the
//! set (filters, pruning).

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use memlib_memory::MemoryExt;
use memlib_netlist::{Cell, Const, ControlNet, Design, Memory, MemoryPortRelation, Net, Value};

use crate::geometry;
use crate::emit;
use crate::library::{
    apply_opts, opts_applied, Capability, ClkPolKind, ClockDef, Library, MemoryInitKind, Options, PortKind, RamKind,
    RdEnKind, ResetKind, ResetValDef, ResetValKind, SrstKind, TransKind, TransTarget,
};
use crate::sat::{EnableOracle, StructuralOracle};

pub(crate) const FACTOR_MUX: f64 = 0.5;
pub(crate) const FACTOR_DEMUX: f64 = 0.5;
pub(crate) const FACTOR_EMU: f64 = 2.0;

/// The user-requested mapping style, resolved from the memory's attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapKind {
    Auto,
    Logic,
    NotLogic,
    Kind(RamKind),
}

/// A fatal mapping failure.
#[derive(Debug, Clone)]
pub enum MapError {
    NoRams { kind: Option<RamKind> },
    NoRamsWithStyle { style: String },
    NoValidMapping,
}

impl std::fmt::Display for MapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapError::NoRams { kind: Some(kind) } => write!(f, "no available {} RAMs", kind.tag()),
            MapError::NoRams { kind: None } => write!(f, "no available RAMs"),
            MapError::NoRamsWithStyle { style } => write!(f, "no available RAMs with style {style:?}"),
            MapError::NoValidMapping => write!(f, "no valid mapping found for memory"),
        }
    }
}

impl std::error::Error for MapError {}

#[derive(Debug, Clone)]
pub struct WrPortConfig {
    /// Index of the read port this port is merged with.
    pub rd_port: Option<usize>,
    /// Index of the port group in the RAM definition.
    pub port_def: usize,
    /// Already-decided port option settings.
    pub portopts: Options,
    /// Emulate priority over these (earlier) write ports.
    pub emu_prio: Vec<usize>,
    pub clkpol_kind: ClkPolKind,
    /// The chosen width capability.
    pub width_def: usize,
}

impl WrPortConfig {
    fn new(port_def: usize) -> Self {
        WrPortConfig {
            rd_port: None,
            port_def,
            portopts: Options::new(),
            emu_prio: vec![],
            clkpol_kind: ClkPolKind::Posedge,
            width_def: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RdPortConfig {
    /// Index of the write port this port is merged with.  When set, the write port's `portopts`
    /// are authoritative and this port's `portopts` stay empty.
    pub wr_port: Option<usize>,
    /// Index of the port group in the RAM definition.
    pub port_def: usize,
    pub portopts: Options,
    /// The named reset value assignments.
    pub resetvals: IndexMap<String, Const>,
    /// Synchronous source port mapped onto an asynchronous RAM port; an output register is added
    /// at emission.  Exclusive with the remaining emulation flags.
    pub emu_sync: bool,
    pub emu_en: bool,
    pub emu_arst: bool,
    pub emu_srst: bool,
    pub emu_init: bool,
    pub emu_srst_en_prio: bool,
    /// Drive the RAM port's read enable input.
    pub emit_en: bool,
    /// Emulate transparency against these write ports.
    pub emu_trans: Vec<usize>,
    pub clkpol_kind: ClkPolKind,
    pub width_def: usize,
}

impl RdPortConfig {
    fn new(port_def: usize) -> Self {
        RdPortConfig {
            wr_port: None,
            port_def,
            portopts: Options::new(),
            resetvals: IndexMap::new(),
            emu_sync: false,
            emu_en: false,
            emu_arst: false,
            emu_srst: false,
            emu_init: false,
            emu_srst_en_prio: false,
            emit_en: false,
            emu_trans: vec![],
            clkpol_kind: ClkPolKind::Posedge,
            width_def: 0,
        }
    }
}

/// One point in the mapping search space.
#[derive(Debug, Clone)]
pub struct MemConfig {
    /// Index of the RAM definition in the library.
    pub ram_def: usize,
    /// Already-decided option settings.
    pub opts: Options,
    pub wr_ports: Vec<WrPortConfig>,
    pub rd_ports: Vec<RdPortConfig>,
    /// Named anyedge clock assignments: name → bound clock.
    pub clocks_anyedge: IndexMap<String, ControlNet>,
    /// Named pos/negedge clock assignments: name → (signal, needs-inversion flag).
    pub clocks_pnedge: IndexMap<String, (Net, bool)>,
    /// Emulate read-first write-read behavior using soft logic.
    pub emu_read_first: bool,
    /// Geometry, filled in by the split and exploration stages.
    pub dims_def: usize,
    pub byte: usize,
    pub base_width_log2: usize,
    pub unit_width_log2: usize,
    /// Source bit for each RAM data bit of one unit; `None` is a padding bit.
    pub swizzle: Vec<Option<usize>>,
    pub hard_wide_mask: u32,
    pub emu_wide_mask: u32,
    /// Data-direction replication: how many RAM units side by side cover the data bits.
    pub repl_d: usize,
    /// Port-direction replication: how many copies of the whole array cover the read ports.
    pub repl_port: usize,
    pub score_emu: usize,
    pub score_mux: usize,
    pub score_demux: usize,
    pub cost: f64,
}

impl MemConfig {
    fn new(ram_def: usize) -> Self {
        MemConfig {
            ram_def,
            opts: Options::new(),
            wr_ports: vec![],
            rd_ports: vec![],
            clocks_anyedge: IndexMap::new(),
            clocks_pnedge: IndexMap::new(),
            emu_read_first: false,
            dims_def: 0,
            byte: 0,
            base_width_log2: 0,
            unit_width_log2: 0,
            swizzle: vec![],
            hard_wide_mask: 0,
            emu_wide_mask: 0,
            repl_d: 1,
            repl_port: 1,
            score_emu: 0,
            score_mux: 0,
            score_demux: 0,
            cost: 0.0,
        }
    }
}

pub(crate) fn apply_wrport_opts<T>(cfg: &mut MemConfig, pidx: usize, cap: &Capability<T>) -> bool {
    apply_opts(&mut cfg.opts, &cap.opts) && apply_opts(&mut cfg.wr_ports[pidx].portopts, &cap.portopts)
}

pub(crate) fn apply_rdport_opts<T>(cfg: &mut MemConfig, pidx: usize, cap: &Capability<T>) -> bool {
    if let Some(wr_port) = cfg.rd_ports[pidx].wr_port {
        return apply_wrport_opts(cfg, wr_port, cap);
    }
    apply_opts(&mut cfg.opts, &cap.opts) && apply_opts(&mut cfg.rd_ports[pidx].portopts, &cap.portopts)
}

pub(crate) fn wrport_opts_applied<T>(cfg: &MemConfig, pidx: usize, cap: &Capability<T>) -> bool {
    opts_applied(&cfg.opts, &cap.opts) && opts_applied(&cfg.wr_ports[pidx].portopts, &cap.portopts)
}

pub(crate) fn rdport_opts_applied<T>(cfg: &MemConfig, pidx: usize, cap: &Capability<T>) -> bool {
    if let Some(wr_port) = cfg.rd_ports[pidx].wr_port {
        return wrport_opts_applied(cfg, wr_port, cap);
    }
    opts_applied(&cfg.opts, &cap.opts) && opts_applied(&cfg.rd_ports[pidx].portopts, &cap.portopts)
}

/// Binds a named clock; either succeeds (new binding or exact match) or rejects the candidate.
fn apply_clock(cfg: &mut MemConfig, def: &ClockDef, clock: ControlNet) -> bool {
    let Some(ref name) = def.name else { return true };
    if def.kind == ClkPolKind::Anyedge {
        match cfg.clocks_anyedge.get(name) {
            None => {
                cfg.clocks_anyedge.insert(name.clone(), clock);
                true
            }
            Some(&bound) => bound == clock,
        }
    } else {
        let flip = clock.is_positive() ^ (def.kind == ClkPolKind::Posedge);
        match cfg.clocks_pnedge.get(name) {
            None => {
                cfg.clocks_pnedge.insert(name.clone(), (clock.net(), flip));
                true
            }
            Some(&bound) => bound == (clock.net(), flip),
        }
    }
}

/// Checks a reset value against a reset-value capability, recording named value bindings.
fn apply_rstval(pcfg: &mut RdPortConfig, def: &ResetValDef, val: &Const) -> bool {
    match def.val {
        ResetValKind::None => false,
        ResetValKind::Zero => !val.has_one(),
        ResetValKind::Named(ref name) => match pcfg.resetvals.get(name) {
            None => {
                pcfg.resetvals.insert(name.clone(), val.clone());
                true
            }
            Some(bound) => bound == val,
        },
    }
}

/// Canonicalisation map for x-propagating muxes: the output of a 2:1 mux with one fully undefined
/// input is equivalent to the other input when comparing addresses.
pub(crate) struct XmuxMap {
    map: BTreeMap<Net, Net>,
}

impl XmuxMap {
    pub(crate) fn build(design: &Design) -> Self {
        let mut map = BTreeMap::new();
        for cell_ref in design.iter_cells() {
            let cell = cell_ref.get();
            let Cell::Mux(_, ref arg1, ref arg2) = *cell else { continue };
            let source = if arg1.is_undef() {
                arg2.clone()
            } else if arg2.is_undef() {
                arg1.clone()
            } else {
                continue;
            };
            drop(cell);
            for (from, to) in cell_ref.output().iter().zip(source.iter()) {
                map.insert(from, to);
            }
        }
        XmuxMap { map }
    }

    pub(crate) fn canon_net(&self, mut net: Net) -> Net {
        while let Some(&to) = self.map.get(&net) {
            net = to;
        }
        net
    }

    pub(crate) fn canon_value(&self, value: &Value) -> Value {
        Value::from_iter(value.iter().map(|net| self.canon_net(net)))
    }
}

/// Resolves the user-requested mapping style from the memory's attributes.
fn determine_style(mem: &Memory) -> (MapKind, Option<String>) {
    for attr in
        ["ram_block", "rom_block", "ram_style", "rom_style", "ramstyle", "romstyle", "syn_ramstyle", "syn_romstyle"]
    {
        let Some(val) = mem.attributes.get(attr) else { continue };
        if val.as_int() == Some(1) {
            return (MapKind::NotLogic, None);
        }
        let Some(text) = val.as_str() else { return (MapKind::NotLogic, None) };
        return match text {
            "auto" => (MapKind::Auto, None),
            "logic" | "registers" => (MapKind::Logic, None),
            "distributed" => (MapKind::Kind(RamKind::Distributed), None),
            "block" | "block_ram" | "ebr" => (MapKind::Kind(RamKind::Block), None),
            "huge" | "ultra" => (MapKind::Kind(RamKind::Huge), None),
            _ => (MapKind::NotLogic, Some(text.to_owned())),
        };
    }
    if mem.attr_bool("logic_block") {
        return (MapKind::Logic, None);
    }
    (MapKind::Auto, None)
}

/// Whether the memory can be left to the downstream FF-mapping pass: all write ports in one
/// clock domain, and the user did not rule soft logic out.
fn determine_logic_ok(mem: &Memory, kind: MapKind) -> bool {
    if kind != MapKind::Auto && kind != MapKind::Logic {
        return false;
    }
    let mut clock = None;
    for port in &mem.write_ports {
        let Some(port_clock) = port.clock else { return false };
        if *clock.get_or_insert(port_clock) != port_clock {
            return false;
        }
    }
    true
}

pub struct MemMapping<'a> {
    design: &'a Design,
    lib: &'a Library,
    pub cfgs: Vec<MemConfig>,
    pub logic_ok: bool,
    pub logic_cost: f64,
    kind: MapKind,
    style: Option<String>,
    pub(crate) xmux: XmuxMap,
    implies_cache: HashMap<(usize, usize), bool>,
    excludes_cache: HashMap<(usize, usize), bool>,
}

impl<'a> MemMapping<'a> {
    /// Runs the whole exploration pipeline for one memory.  The result holds the surviving
    /// candidates; [`MemMapping::select`] picks the winner.
    pub fn new(
        design: &'a Design,
        mem: &Memory,
        lib: &'a Library,
        oracle: &mut dyn EnableOracle,
    ) -> Result<Self, MapError> {
        let (kind, style) = determine_style(mem);
        let logic_ok = determine_logic_ok(mem, kind);
        let mut this = MemMapping {
            design,
            lib,
            cfgs: vec![],
            logic_ok,
            logic_cost: (mem.width * mem.depth) as f64,
            kind,
            style,
            xmux: XmuxMap::build(design),
            implies_cache: HashMap::new(),
            excludes_cache: HashMap::new(),
        };
        if this.kind == MapKind::Logic {
            return Ok(this);
        }
        this.cfgs = (0..lib.ram_defs.len()).map(MemConfig::new).collect();
        this.handle_ram_kind()?;
        this.handle_ram_style()?;
        this.handle_init(mem);
        this.handle_wr_ports(mem);
        this.handle_rd_ports(mem, oracle);
        this.handle_trans(mem);
        // If we got this far, the memory is mappable.  The following can require emulating some
        // functionality, but cannot cause the mapping to fail.
        this.handle_priority(mem);
        this.handle_rd_init(mem);
        this.handle_rd_arst(mem);
        this.handle_rd_srst(mem);
        this.score_emu_ports();
        this.dump_configs("after initial split", false);
        this.handle_geom_split(mem);
        this.prune_pre_geom();
        this.dump_configs("after pre-geometry prune", false);
        geometry::handle_geom(mem, lib, &mut this.cfgs);
        this.dump_configs("post-geometry", true);
        this.prune_post_geom();
        this.dump_configs("after post-geometry prune", true);
        Ok(this)
    }

    /// Picks the cheapest candidate, or `None` when the soft-logic fallback wins.
    pub fn select(&self) -> Result<Option<usize>, MapError> {
        let mut best_index = None;
        let mut best_cost = self.logic_cost;
        if !self.logic_ok {
            if self.cfgs.is_empty() {
                return Err(MapError::NoValidMapping);
            }
            best_index = Some(0);
            best_cost = self.cfgs[0].cost;
        }
        for (index, cfg) in self.cfgs.iter().enumerate() {
            if cfg.cost < best_cost {
                best_index = Some(index);
                best_cost = cfg.cost;
            }
        }
        Ok(best_index)
    }

    fn addr_compatible(&self, mem: &Memory, wpidx: usize, rpidx: usize) -> bool {
        let wport = &mem.write_ports[wpidx];
        let rport = &mem.read_ports[rpidx];
        let max_wide_log2 = rport.wide_log2(mem).max(wport.wide_log2(mem));
        let raddr = rport.addr.slice(max_wide_log2.min(rport.addr.len())..);
        let waddr = wport.addr.slice(max_wide_log2.min(wport.addr.len())..);
        let abits = raddr.len().max(waddr.len());
        self.xmux.canon_value(&raddr.zext(abits)) == self.xmux.canon_value(&waddr.zext(abits))
    }

    fn wr_implies_rd(&mut self, mem: &Memory, oracle: &mut dyn EnableOracle, wpidx: usize, rpidx: usize) -> bool {
        if let Some(&cached) = self.implies_cache.get(&(wpidx, rpidx)) {
            return cached;
        }
        let rd_en = mem.read_ports[rpidx].flip_flop.as_ref().unwrap().enable;
        let result = oracle.wr_implies_rd(self.design, &mem.write_ports[wpidx].mask, rd_en);
        self.implies_cache.insert((wpidx, rpidx), result);
        result
    }

    fn wr_excludes_rd(&mut self, mem: &Memory, oracle: &mut dyn EnableOracle, wpidx: usize, rpidx: usize) -> bool {
        if let Some(&cached) = self.excludes_cache.get(&(wpidx, rpidx)) {
            return cached;
        }
        let rd_en = mem.read_ports[rpidx].flip_flop.as_ref().unwrap().enable;
        let result = oracle.wr_excludes_rd(self.design, &mem.write_ports[wpidx].mask, rd_en);
        self.excludes_cache.insert((wpidx, rpidx), result);
        result
    }

    /// Applies RAM kind restrictions (distributed/block/huge), if any.
    fn handle_ram_kind(&mut self) -> Result<(), MapError> {
        if self.style.is_some() {
            return Ok(());
        }
        let lib = self.lib;
        let requested = self.kind;
        self.cfgs.retain(|cfg| {
            let rdef = &lib.ram_defs[cfg.ram_def];
            match requested {
                MapKind::Kind(kind) => rdef.kind == kind,
                MapKind::Auto | MapKind::NotLogic => match rdef.kind {
                    RamKind::Distributed => !lib.opts.no_auto_distributed,
                    RamKind::Block => !lib.opts.no_auto_block,
                    RamKind::Huge => !lib.opts.no_auto_huge,
                },
                MapKind::Logic => false,
            }
        });
        if self.cfgs.is_empty() {
            match self.kind {
                MapKind::Kind(kind) => return Err(MapError::NoRams { kind: Some(kind) }),
                MapKind::NotLogic => return Err(MapError::NoRams { kind: None }),
                _ => (),
            }
        }
        Ok(())
    }

    /// Applies a specific RAM style restriction, if any.
    fn handle_ram_style(&mut self) -> Result<(), MapError> {
        let Some(ref style) = self.style else { return Ok(()) };
        let mut new_cfgs = vec![];
        for cfg in std::mem::take(&mut self.cfgs) {
            for def in &self.lib.ram_defs[cfg.ram_def].style {
                if def.val != *style {
                    continue;
                }
                let mut new_cfg = cfg.clone();
                if !apply_opts(&mut new_cfg.opts, &def.opts) {
                    continue;
                }
                new_cfgs.push(new_cfg);
            }
        }
        self.cfgs = new_cfgs;
        if self.cfgs.is_empty() {
            return Err(MapError::NoRamsWithStyle { style: style.clone() });
        }
        Ok(())
    }

    /// Filters candidates by memory initializer support.
    fn handle_init(&mut self, mem: &Memory) {
        let has_nonx = !mem.init_value.is_undef();
        let has_one = mem.init_value.has_one();
        if !has_nonx {
            return;
        }
        let mut new_cfgs = vec![];
        for cfg in std::mem::take(&mut self.cfgs) {
            for def in &self.lib.ram_defs[cfg.ram_def].init {
                if has_one {
                    if def.val != MemoryInitKind::Any {
                        continue;
                    }
                } else if def.val != MemoryInitKind::Any && def.val != MemoryInitKind::Zero {
                    continue;
                }
                let mut new_cfg = cfg.clone();
                if !apply_opts(&mut new_cfg.opts, &def.opts) {
                    continue;
                }
                new_cfgs.push(new_cfg);
            }
        }
        self.cfgs = new_cfgs;
    }

    /// Write port assignment, validating clock capabilities as it goes.
    fn handle_wr_ports(&mut self, mem: &Memory) {
        if mem.write_ports.is_empty() {
            let lib = self.lib;
            self.cfgs.retain(|cfg| !lib.ram_defs[cfg.ram_def].prune_rom);
        }
        for port in &mem.write_ports {
            let Some(port_clock) = port.clock else {
                // Asynchronous write ports are not supported by any RAM kind.
                self.cfgs.clear();
                return;
            };
            let mut new_cfgs = vec![];
            for cfg in std::mem::take(&mut self.cfgs) {
                let ram_def = &self.lib.ram_defs[cfg.ram_def];
                for (didx, def) in ram_def.ports.iter().enumerate() {
                    if !def.val.kind.can_write() {
                        continue;
                    }
                    // The target port group must still have a free slot.
                    let used = cfg.wr_ports.iter().filter(|pcfg| pcfg.port_def == didx).count();
                    if used >= def.val.names.len() {
                        continue;
                    }
                    let mut cfg2 = cfg.clone();
                    if !apply_opts(&mut cfg2.opts, &def.opts) {
                        continue;
                    }
                    for cdef in &def.val.clock {
                        let mut cfg3 = cfg2.clone();
                        let mut pcfg3 = WrPortConfig::new(didx);
                        if !apply_opts(&mut cfg3.opts, &cdef.opts) {
                            continue;
                        }
                        if !apply_opts(&mut pcfg3.portopts, &cdef.portopts) {
                            continue;
                        }
                        if !apply_clock(&mut cfg3, &cdef.val, port_clock) {
                            continue;
                        }
                        pcfg3.clkpol_kind = cdef.val.kind;
                        cfg3.wr_ports.push(pcfg3);
                        new_cfgs.push(cfg3);
                    }
                }
            }
            self.cfgs = new_cfgs;
        }
    }

    /// Read port assignment, validating clock and read-enable capabilities as it goes.
    fn handle_rd_ports(&mut self, mem: &Memory, oracle: &mut dyn EnableOracle) {
        for (pidx, port) in mem.read_ports.iter().enumerate() {
            let mut new_cfgs = vec![];
            for cfg in std::mem::take(&mut self.cfgs) {
                let ram_def = &self.lib.ram_defs[cfg.ram_def];
                // First pass: read port not shared with a write port.
                for (didx, def) in ram_def.ports.iter().enumerate() {
                    if !def.val.kind.can_read() {
                        continue;
                    }
                    // An asynchronous source fits only asynchronous RAM ports.
                    if port.flip_flop.is_none() && def.val.kind.is_sync_read() {
                        continue;
                    }
                    // The target port group must have a slot not used up by write ports.  Overuse
                    // by other read ports is fine and resolved by replicating the whole array.
                    let used = cfg.wr_ports.iter().filter(|pcfg| pcfg.port_def == didx).count();
                    if used >= def.val.names.len() {
                        continue;
                    }
                    let mut cfg2 = cfg.clone();
                    if !apply_opts(&mut cfg2.opts, &def.opts) {
                        continue;
                    }
                    let pcfg2 = RdPortConfig::new(didx);
                    if def.val.kind.is_sync_read() {
                        let flip_flop = port.flip_flop.as_ref().unwrap();
                        for cdef in &def.val.clock {
                            let mut cfg3 = cfg2.clone();
                            let mut pcfg3 = pcfg2.clone();
                            if !apply_opts(&mut cfg3.opts, &cdef.opts) {
                                continue;
                            }
                            if !apply_opts(&mut pcfg3.portopts, &cdef.portopts) {
                                continue;
                            }
                            if !apply_clock(&mut cfg3, &cdef.val, flip_flop.clock) {
                                continue;
                            }
                            pcfg3.clkpol_kind = cdef.val.kind;
                            for endef in &def.val.rden {
                                let mut cfg4 = cfg3.clone();
                                let mut pcfg4 = pcfg3.clone();
                                if !apply_opts(&mut cfg4.opts, &endef.opts) {
                                    continue;
                                }
                                if !apply_opts(&mut pcfg4.portopts, &endef.portopts) {
                                    continue;
                                }
                                if endef.val == RdEnKind::None && flip_flop.has_enable() {
                                    pcfg4.emu_en = true;
                                }
                                pcfg4.emit_en = endef.val != RdEnKind::None;
                                cfg4.rd_ports.push(pcfg4);
                                new_cfgs.push(cfg4);
                            }
                        }
                    } else {
                        let mut cfg2 = cfg2;
                        let mut pcfg2 = pcfg2;
                        pcfg2.emu_sync = port.flip_flop.is_some();
                        cfg2.rd_ports.push(pcfg2);
                        new_cfgs.push(cfg2);
                    }
                }
                // Second pass: read port shared with an already-bound write port.
                for (wpidx, wport) in mem.write_ports.iter().enumerate() {
                    let didx = cfg.wr_ports[wpidx].port_def;
                    let def = &ram_def.ports[didx];
                    if cfg.wr_ports[wpidx].rd_port.is_some() {
                        continue;
                    }
                    if !def.val.kind.can_read() {
                        continue;
                    }
                    if !self.addr_compatible(mem, wpidx, pidx) {
                        continue;
                    }
                    if def.val.kind == PortKind::Srsw {
                        let Some(ref flip_flop) = port.flip_flop else { continue };
                        if Some(flip_flop.clock) != wport.clock {
                            continue;
                        }
                    }
                    let mut cfg2 = cfg.clone();
                    cfg2.wr_ports[wpidx].rd_port = Some(pidx);
                    let mut pcfg2 = RdPortConfig::new(didx);
                    pcfg2.wr_port = Some(wpidx);
                    pcfg2.emu_sync = port.flip_flop.is_some() && def.val.kind == PortKind::Arsw;
                    if def.val.kind == PortKind::Srsw {
                        let flip_flop = port.flip_flop.as_ref().unwrap();
                        for endef in &def.val.rden {
                            let mut cfg3 = cfg2.clone();
                            let mut pcfg3 = pcfg2.clone();
                            if !apply_wrport_opts(&mut cfg3, wpidx, endef) {
                                continue;
                            }
                            match endef.val {
                                RdEnKind::None => pcfg3.emu_en = flip_flop.has_enable(),
                                RdEnKind::Any => (),
                                RdEnKind::WriteImplies => {
                                    pcfg3.emu_en = !self.wr_implies_rd(mem, oracle, wpidx, pidx)
                                }
                                RdEnKind::WriteExcludes => {
                                    if !self.wr_excludes_rd(mem, oracle, wpidx, pidx) {
                                        continue;
                                    }
                                }
                            }
                            pcfg3.emit_en = endef.val != RdEnKind::None;
                            cfg3.rd_ports.push(pcfg3);
                            new_cfgs.push(cfg3);
                        }
                    } else {
                        cfg2.rd_ports.push(pcfg2);
                        new_cfgs.push(cfg2);
                    }
                }
            }
            self.cfgs = new_cfgs;
        }
    }

    /// Validates transparency restrictions, deciding where to add soft transparency logic.
    fn handle_trans(&mut self, mem: &Memory) {
        if mem.emulate_read_first_ok() {
            let mut new_cfgs = vec![];
            for mut cfg in std::mem::take(&mut self.cfgs) {
                new_cfgs.push(cfg.clone());
                // Read-first rewriting breaks read-write port sharing.
                if cfg.rd_ports.iter().all(|pcfg| pcfg.wr_port.is_none()) {
                    cfg.emu_read_first = true;
                    new_cfgs.push(cfg);
                }
            }
            self.cfgs = new_cfgs;
        }
        for (rpidx, rport) in mem.read_ports.iter().enumerate() {
            let Some(ref rff) = rport.flip_flop else { continue };
            for (wpidx, wport) in mem.write_ports.iter().enumerate() {
                if wport.clock != Some(rff.clock) {
                    continue;
                }
                // A same-clock pair carries a same-cycle semantics restriction to uphold.
                let relation = rff.relations[wpidx];
                let mut new_cfgs = vec![];
                for mut cfg in std::mem::take(&mut self.cfgs) {
                    if relation == MemoryPortRelation::Undefined && !cfg.emu_read_first {
                        new_cfgs.push(cfg);
                        continue;
                    }
                    let transparent = relation == MemoryPortRelation::Transparent || cfg.emu_read_first;
                    if cfg.rd_ports[rpidx].emu_sync {
                        // The port is mapped through an asynchronous RAM port; transparency, if
                        // required, is soft logic around the extracted register.
                        if transparent {
                            cfg.rd_ports[rpidx].emu_trans.push(wpidx);
                        }
                        new_cfgs.push(cfg);
                    } else {
                        // Split across the matching transparency capabilities.  Non-transparent
                        // pairs need a kind=old capability; transparent pairs can fall back to
                        // emulation.
                        let rdef = &self.lib.ram_defs[cfg.ram_def];
                        let wpdef = &rdef.ports[cfg.wr_ports[wpidx].port_def];
                        let rpdef = &rdef.ports[cfg.rd_ports[rpidx].port_def];
                        let mut found_free = false;
                        for tdef in &wpdef.val.wrtrans {
                            match tdef.val.target {
                                TransTarget::SelfPort => {
                                    if cfg.wr_ports[wpidx].rd_port != Some(rpidx) {
                                        continue;
                                    }
                                }
                                TransTarget::Other => {
                                    if cfg.wr_ports[wpidx].rd_port == Some(rpidx) {
                                        continue;
                                    }
                                }
                                TransTarget::Named(ref name) => {
                                    if rpdef.val.names[0] != *name {
                                        continue;
                                    }
                                }
                            }
                            if transparent == (tdef.val.kind == TransKind::Old) {
                                continue;
                            }
                            let mut cfg2 = cfg.clone();
                            if wrport_opts_applied(&cfg2, wpidx, tdef) {
                                found_free = true;
                            } else if !apply_wrport_opts(&mut cfg2, wpidx, tdef) {
                                continue;
                            }
                            new_cfgs.push(cfg2);
                        }
                        if !found_free && transparent {
                            // No capability, or only capabilities with a splitting cost; consider
                            // emulation as well.
                            cfg.rd_ports[rpidx].emu_trans.push(wpidx);
                            new_cfgs.push(cfg);
                        }
                    }
                }
                self.cfgs = new_cfgs;
            }
        }
    }

    /// Decides where to add soft priority logic.
    fn handle_priority(&mut self, mem: &Memory) {
        for p1idx in 0..mem.write_ports.len() {
            for p2idx in 0..mem.write_ports.len() {
                if !mem.write_ports[p2idx].priority_mask.get(p1idx).copied().unwrap_or(false) {
                    continue;
                }
                let mut new_cfgs = vec![];
                for mut cfg in std::mem::take(&mut self.cfgs) {
                    let rdef = &self.lib.ram_defs[cfg.ram_def];
                    let p1def = &rdef.ports[cfg.wr_ports[p1idx].port_def];
                    let p2def = &rdef.ports[cfg.wr_ports[p2idx].port_def];
                    let mut found_free = false;
                    for prdef in &p2def.val.wrprio {
                        if p1def.val.names[0] != prdef.val {
                            continue;
                        }
                        let mut cfg2 = cfg.clone();
                        if wrport_opts_applied(&cfg2, p2idx, prdef) {
                            found_free = true;
                        } else if !apply_wrport_opts(&mut cfg2, p2idx, prdef) {
                            continue;
                        }
                        new_cfgs.push(cfg2);
                    }
                    if !found_free {
                        cfg.wr_ports[p2idx].emu_prio.push(p1idx);
                        new_cfgs.push(cfg);
                    }
                }
                self.cfgs = new_cfgs;
            }
        }
    }

    /// Decides where to add soft init value logic.
    fn handle_rd_init(&mut self, mem: &Memory) {
        for (pidx, port) in mem.read_ports.iter().enumerate() {
            let Some(ref flip_flop) = port.flip_flop else { continue };
            if !flip_flop.has_init_value() {
                continue;
            }
            let mut new_cfgs = vec![];
            for mut cfg in std::mem::take(&mut self.cfgs) {
                // An extracted register or emulated enable includes the init value for free.
                if cfg.rd_ports[pidx].emu_sync || cfg.rd_ports[pidx].emu_en {
                    new_cfgs.push(cfg);
                    continue;
                }
                let rdef = &self.lib.ram_defs[cfg.ram_def];
                let pdef = &rdef.ports[cfg.rd_ports[pidx].port_def];
                let mut found_free = false;
                for rstdef in &pdef.val.rdrstval {
                    if rstdef.val.kind != ResetKind::Init {
                        continue;
                    }
                    let mut cfg2 = cfg.clone();
                    if !apply_rstval(&mut cfg2.rd_ports[pidx], &rstdef.val, &flip_flop.init_value) {
                        continue;
                    }
                    if rdport_opts_applied(&cfg2, pidx, rstdef) {
                        found_free = true;
                    } else if !apply_rdport_opts(&mut cfg2, pidx, rstdef) {
                        continue;
                    }
                    new_cfgs.push(cfg2);
                }
                if !found_free {
                    cfg.rd_ports[pidx].emu_init = true;
                    new_cfgs.push(cfg);
                }
            }
            self.cfgs = new_cfgs;
        }
    }

    /// Decides where to add soft async reset logic.
    fn handle_rd_arst(&mut self, mem: &Memory) {
        for (pidx, port) in mem.read_ports.iter().enumerate() {
            let Some(ref flip_flop) = port.flip_flop else { continue };
            if !flip_flop.has_clear() {
                continue;
            }
            let mut new_cfgs = vec![];
            for mut cfg in std::mem::take(&mut self.cfgs) {
                if cfg.rd_ports[pidx].emu_sync || cfg.rd_ports[pidx].emu_en {
                    new_cfgs.push(cfg);
                    continue;
                }
                let rdef = &self.lib.ram_defs[cfg.ram_def];
                let pdef = &rdef.ports[cfg.rd_ports[pidx].port_def];
                let mut found_free = false;
                for rstdef in &pdef.val.rdrstval {
                    if rstdef.val.kind != ResetKind::Async {
                        continue;
                    }
                    let mut cfg2 = cfg.clone();
                    if !apply_rstval(&mut cfg2.rd_ports[pidx], &rstdef.val, &flip_flop.clear_value) {
                        continue;
                    }
                    if rdport_opts_applied(&cfg2, pidx, rstdef) {
                        found_free = true;
                    } else if !apply_rdport_opts(&mut cfg2, pidx, rstdef) {
                        continue;
                    }
                    new_cfgs.push(cfg2);
                }
                if !found_free {
                    cfg.rd_ports[pidx].emu_arst = true;
                    new_cfgs.push(cfg);
                }
            }
            self.cfgs = new_cfgs;
        }
    }

    /// Decides where to add soft sync reset logic, including the enable/reset priority handling.
    fn handle_rd_srst(&mut self, mem: &Memory) {
        for (pidx, port) in mem.read_ports.iter().enumerate() {
            let Some(ref flip_flop) = port.flip_flop else { continue };
            if !flip_flop.has_reset() {
                continue;
            }
            let ce_over_srst = !flip_flop.reset_over_enable;
            let mut new_cfgs = vec![];
            for mut cfg in std::mem::take(&mut self.cfgs) {
                if cfg.rd_ports[pidx].emu_sync || cfg.rd_ports[pidx].emu_en {
                    new_cfgs.push(cfg);
                    continue;
                }
                let rdef = &self.lib.ram_defs[cfg.ram_def];
                let pdef = &rdef.ports[cfg.rd_ports[pidx].port_def];
                let mut found_free = false;
                for rstdef in &pdef.val.rdrstval {
                    if rstdef.val.kind != ResetKind::Sync {
                        continue;
                    }
                    let mut cfg2 = cfg.clone();
                    if !apply_rstval(&mut cfg2.rd_ports[pidx], &rstdef.val, &flip_flop.reset_value) {
                        continue;
                    }
                    if rdport_opts_applied(&cfg2, pidx, rstdef) {
                        found_free = true;
                    } else if !apply_rdport_opts(&mut cfg2, pidx, rstdef) {
                        continue;
                    }
                    if !flip_flop.has_enable() {
                        new_cfgs.push(cfg2);
                    } else {
                        // The relative priority of enable and sync reset must be right; any mode
                        // is usable, at worst the priority is fixed up in soft logic.
                        for mdef in &pdef.val.rdsrstmode {
                            let mut cfg3 = cfg2.clone();
                            if mdef.val == SrstKind::SrstOverEn && ce_over_srst {
                                cfg3.rd_ports[pidx].emu_srst_en_prio = true;
                            }
                            if mdef.val == SrstKind::EnOverSrst && !ce_over_srst {
                                cfg3.rd_ports[pidx].emu_srst_en_prio = true;
                            }
                            if !apply_rdport_opts(&mut cfg3, pidx, mdef) {
                                continue;
                            }
                            new_cfgs.push(cfg3);
                        }
                    }
                }
                if !found_free {
                    cfg.rd_ports[pidx].emu_srst = true;
                    new_cfgs.push(cfg);
                }
            }
            self.cfgs = new_cfgs;
        }
    }

    /// Scores the emulation burden of every candidate and derives the port replication factor.
    fn score_emu_ports(&mut self) {
        for cfg in &mut self.cfgs {
            let rdef = &self.lib.ram_defs[cfg.ram_def];
            let mut port_usage_wr = vec![0usize; rdef.ports.len()];
            let mut port_usage_rd = vec![0usize; rdef.ports.len()];
            let mut score = 0;
            // 3 points for every write port if read-first behavior is emulated.
            if cfg.emu_read_first {
                score += 3 * cfg.wr_ports.len();
            }
            for pcfg in &cfg.wr_ports {
                // 1 point for every priority relation fixed up: a gate per distinct enable pair.
                score += pcfg.emu_prio.len();
                port_usage_wr[pcfg.port_def] += 1;
            }
            for pcfg in &cfg.rd_ports {
                // 3 points for every soft transparency instance: registers and other major mess.
                score += 3 * pcfg.emu_trans.len();
                // 3 points for soft clock enable; likewise involves registers.  Subsumes any
                // init/arst/srst emulation.
                if pcfg.emu_en {
                    score += 3;
                }
                // 2 points for soft init value / reset logic: a one-bit register and some muxes.
                if pcfg.emu_init {
                    score += 2;
                }
                if pcfg.emu_arst {
                    score += 2;
                }
                if pcfg.emu_srst {
                    score += 2;
                }
                // 1 point for the wrong srst/en priority, fixed with a single gate.
                if pcfg.emu_srst_en_prio {
                    score += 1;
                }
                // 1 point for every non-shared read port, as a tiebreaker that prefers
                // single-port configurations.
                if pcfg.wr_port.is_none() {
                    score += 1;
                    port_usage_rd[pcfg.port_def] += 1;
                }
            }
            cfg.score_emu = score;
            let mut repl_port = 1;
            for (index, def) in rdef.ports.iter().enumerate() {
                let space = def.val.names.len() - port_usage_wr[index];
                if port_usage_rd[index] > 0 {
                    assert!(space > 0);
                    let cur = port_usage_rd[index].div_ceil(space);
                    repl_port = repl_port.max(cur);
                }
            }
            cfg.repl_port = repl_port;
        }
    }

    /// Splits candidates across dims variants, byte widths, and per-port width capabilities.
    fn handle_geom_split(&mut self, mem: &Memory) {
        // Split dims.
        let mut new_cfgs = vec![];
        for cfg in std::mem::take(&mut self.cfgs) {
            let rdef = &self.lib.ram_defs[cfg.ram_def];
            for (didx, ddef) in rdef.dims.iter().enumerate() {
                let mut cfg2 = cfg.clone();
                if !apply_opts(&mut cfg2.opts, &ddef.opts) {
                    continue;
                }
                cfg2.dims_def = didx;
                new_cfgs.push(cfg2);
            }
        }
        self.cfgs = new_cfgs;
        // Split byte width.
        let mut new_cfgs = vec![];
        for mut cfg in std::mem::take(&mut self.cfgs) {
            let rdef = &self.lib.ram_defs[cfg.ram_def];
            let mut found_free = false;
            for bdef in &rdef.byte {
                let mut cfg2 = cfg.clone();
                if opts_applied(&cfg2.opts, &bdef.opts) {
                    found_free = true;
                } else if !apply_opts(&mut cfg2.opts, &bdef.opts) {
                    continue;
                }
                cfg2.byte = bdef.val;
                new_cfgs.push(cfg2);
            }
            if !found_free {
                cfg.byte = 0;
                new_cfgs.push(cfg);
            }
        }
        self.cfgs = new_cfgs;
        // Split per-port width choices.
        for pidx in 0..mem.write_ports.len() {
            let mut new_cfgs = vec![];
            for cfg in std::mem::take(&mut self.cfgs) {
                let rdef = &self.lib.ram_defs[cfg.ram_def];
                let pdef = &rdef.ports[cfg.wr_ports[pidx].port_def];
                for widx in 0..pdef.val.width.len() {
                    let wdef = &pdef.val.width[widx];
                    let mut cfg2 = cfg.clone();
                    if !apply_wrport_opts(&mut cfg2, pidx, wdef) {
                        continue;
                    }
                    cfg2.wr_ports[pidx].width_def = widx;
                    new_cfgs.push(cfg2);
                }
            }
            self.cfgs = new_cfgs;
        }
        for pidx in 0..mem.read_ports.len() {
            let mut new_cfgs = vec![];
            for mut cfg in std::mem::take(&mut self.cfgs) {
                if let Some(wr_port) = cfg.rd_ports[pidx].wr_port {
                    cfg.rd_ports[pidx].width_def = cfg.wr_ports[wr_port].width_def;
                    new_cfgs.push(cfg);
                    continue;
                }
                let rdef = &self.lib.ram_defs[cfg.ram_def];
                let pdef = &rdef.ports[cfg.rd_ports[pidx].port_def];
                for widx in 0..pdef.val.width.len() {
                    let wdef = &pdef.val.width[widx];
                    let mut cfg2 = cfg.clone();
                    if !apply_rdport_opts(&mut cfg2, pidx, wdef) {
                        continue;
                    }
                    cfg2.rd_ports[pidx].width_def = widx;
                    new_cfgs.push(cfg2);
                }
            }
            self.cfgs = new_cfgs;
        }
    }

    /// Collapses candidates with identical geometry, keeping the lowest emulation score.
    fn prune_pre_geom(&mut self) {
        let mut kept: Vec<MemConfig> = vec![];
        for cfg in std::mem::take(&mut self.cfgs) {
            match kept.iter_mut().find(|other| same_geom(&cfg, other)) {
                Some(other) => {
                    if cfg.score_emu < other.score_emu {
                        *other = cfg;
                    }
                }
                None => kept.push(cfg),
            }
        }
        self.cfgs = kept;
    }

    /// Keeps the lowest-cost candidate per library resource bucket.
    fn prune_post_geom(&mut self) {
        let mut buckets: IndexMap<String, MemConfig> = IndexMap::new();
        for cfg in std::mem::take(&mut self.cfgs) {
            let rdef = &self.lib.ram_defs[cfg.ram_def];
            let dims = &rdef.dims[cfg.dims_def].val;
            let key = match dims.resource_name {
                Some(ref name) => name.clone(),
                None => format!("[{}]", rdef.kind.tag()),
            };
            match buckets.get_mut(&key) {
                Some(other) => {
                    if cfg.cost < other.cost {
                        *other = cfg;
                    }
                }
                None => {
                    buckets.insert(key, cfg);
                }
            }
        }
        self.cfgs = buckets.into_values().collect();
    }

    fn dump_configs(&self, stage: &str, geom: bool) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        log::debug!("mapping candidates ({stage}):");
        if self.logic_ok {
            log::debug!("- logic fallback (cost {})", self.logic_cost);
        }
        for cfg in &self.cfgs {
            let rdef = &self.lib.ram_defs[cfg.ram_def];
            log::debug!("- {}:", rdef.id);
            for (key, value) in &cfg.opts {
                log::debug!("  - option {key} {value}");
            }
            log::debug!("  - emulation score: {}", cfg.score_emu);
            log::debug!("  - replicates (for ports): {}", cfg.repl_port);
            if geom {
                let dims = &rdef.dims[cfg.dims_def].val;
                log::debug!("  - abits {} dbits {:?}", dims.abits, dims.dbits);
                if cfg.byte != 0 {
                    log::debug!("  - byte width {}", cfg.byte);
                }
                log::debug!("  - chosen base width {}", dims.dbits[cfg.base_width_log2]);
                log::debug!("  - replicates (for data): {}", cfg.repl_d);
                log::debug!("  - mux score: {}", cfg.score_mux);
                log::debug!("  - demux score: {}", cfg.score_demux);
                log::debug!("  - cost: {}", cfg.cost);
                if cfg.hard_wide_mask != 0 {
                    log::debug!("  - hard wide mask: {:#x}", cfg.hard_wide_mask);
                }
            }
            if cfg.emu_read_first {
                log::debug!("  - emulate read-first behavior");
            }
            for (index, pcfg) in cfg.wr_ports.iter().enumerate() {
                let pdef = &rdef.ports[pcfg.port_def].val;
                match pcfg.rd_port {
                    None => log::debug!("  - write port {index}: port group {}", pdef.names[0]),
                    Some(rd_port) => {
                        log::debug!("  - write port {index}: port group {} (shared with read port {rd_port})", pdef.names[0])
                    }
                }
                for &other in &pcfg.emu_prio {
                    log::debug!("    - emulate priority over write port {other}");
                }
            }
            for (index, pcfg) in cfg.rd_ports.iter().enumerate() {
                let pdef = &rdef.ports[pcfg.port_def].val;
                match pcfg.wr_port {
                    None => log::debug!("  - read port {index}: port group {}", pdef.names[0]),
                    Some(wr_port) => {
                        log::debug!("  - read port {index}: port group {} (shared with write port {wr_port})", pdef.names[0])
                    }
                }
                if pcfg.emu_sync {
                    log::debug!("    - emulate data register");
                }
                if pcfg.emu_en {
                    log::debug!("    - emulate clock enable");
                }
                if pcfg.emu_arst {
                    log::debug!("    - emulate async reset");
                }
                if pcfg.emu_srst {
                    log::debug!("    - emulate sync reset");
                }
                if pcfg.emu_init {
                    log::debug!("    - emulate init value");
                }
                if pcfg.emu_srst_en_prio {
                    log::debug!("    - emulate sync reset / enable priority");
                }
                for &other in &pcfg.emu_trans {
                    log::debug!("    - emulate transparency with write port {other}");
                }
            }
        }
    }
}

fn same_geom(a: &MemConfig, b: &MemConfig) -> bool {
    if a.ram_def != b.ram_def || a.dims_def != b.dims_def || a.byte != b.byte {
        return false;
    }
    for (pa, pb) in a.wr_ports.iter().zip(&b.wr_ports) {
        if pa.rd_port != pb.rd_port || pa.port_def != pb.port_def || pa.width_def != pb.width_def {
            return false;
        }
    }
    for (pa, pb) in a.rd_ports.iter().zip(&b.rd_ports) {
        if pa.wr_port != pb.wr_port || pa.port_def != pb.port_def || pa.width_def != pb.width_def {
            return false;
        }
    }
    true
}

/// Maps every memory cell in the design onto library RAM primitives, leaving memories where the
/// soft-logic fallback wins untouched for a downstream FF-mapping pass.
pub fn map_memories(design: &mut Design, lib: &Library) -> Result<(), MapError> {
    let mut oracle = StructuralOracle::new();
    map_memories_with(design, lib, &mut oracle)
}

/// As [`map_memories`], with a caller-provided write-enable oracle.
pub fn map_memories_with(
    design: &mut Design,
    lib: &Library,
    oracle: &mut dyn EnableOracle,
) -> Result<(), MapError> {
    {
        let design = &*design;
        let memory_cells: Vec<_> = design
            .iter_cells()
            .filter(|cell_ref| matches!(&*cell_ref.get(), Cell::Memory(_)))
            .collect();
        for cell_ref in memory_cells {
            let memory = {
                let cell = cell_ref.get();
                let Cell::Memory(ref memory) = *cell else { unreachable!() };
                memory.clone()
            };
            let mapping = MemMapping::new(design, &memory, lib, oracle)?;
            match mapping.select()? {
                Some(index) => {
                    let mut memory = memory;
                    let mut output = cell_ref.output();
                    cell_ref.unalive();
                    emit::emit(design, &mut memory, &mut output, lib, &mapping.cfgs[index], &mapping.xmux);
                }
                None => {
                    log::debug!("leaving memory to the FF mapping fallback");
                }
            }
        }
    }
    design.apply();
    Ok(())
}
