use std::collections::BTreeMap;

use crate::{Const, ControlNet, Design, Net, ParamValue, Value};

/// An abstract memory array, before mapping to target RAM primitives.
///
/// The memory holds `depth` rows of `width` bits each.  Row `i` of the array corresponds to
/// address `start_offset + i` on the ports.  The output value of the memory cell is the
/// concatenation of the read port outputs, in port order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    pub depth: usize,
    pub width: usize,
    pub start_offset: usize,
    /// `depth * width` trits; undef where the memory is uninitialized.
    pub init_value: Const,
    /// Synthesis attributes attached to the source memory (mapping style requests and the like).
    pub attributes: BTreeMap<String, ParamValue>,
    pub write_ports: Vec<MemoryWritePort>,
    pub read_ports: Vec<MemoryReadPort>,
}

/// A write port.  Wide ports write `2**wide_log2` consecutive rows at once; their `data` and
/// `mask` are that many rows wide, and the low `wide_log2` bits of `addr` must be zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryWritePort {
    /// `None` for an asynchronous write port (not mappable to any RAM primitive).
    pub clock: Option<ControlNet>,
    pub addr: Value,
    pub data: Value,
    /// Per-bit write enable.
    pub mask: Value,
    /// `priority_mask[index]` is set when this port must win over earlier write port `index`
    /// whenever both write the same address in the same cycle.
    pub priority_mask: Vec<bool>,
}

/// A read port.  `flip_flop` is `None` for asynchronous (combinational) read ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryReadPort {
    pub addr: Value,
    pub data_len: usize,
    pub flip_flop: Option<MemoryReadFlipFlop>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryReadFlipFlop {
    pub clock: ControlNet,
    /// Asynchronous reset.
    pub clear: ControlNet,
    /// Synchronous reset.
    pub reset: ControlNet,
    pub enable: ControlNet,
    /// If true, `reset` has priority over `enable`.
    pub reset_over_enable: bool,

    pub clear_value: Const,
    pub reset_value: Const,
    pub init_value: Const,

    /// Same-cycle semantics against each write port, by write port index.
    pub relations: Vec<MemoryPortRelation>,
}

/// The same-cycle relation of a synchronous read port to a write port on the same clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MemoryPortRelation {
    /// The read value is undefined when the addresses collide.
    Undefined,
    /// The read returns the old (pre-write) value.
    #[default]
    ReadBeforeWrite,
    /// The read returns the newly written value.
    Transparent,
}

impl Memory {
    pub fn output_len(&self) -> usize {
        self.read_ports.iter().map(|port| port.data_len).sum()
    }

    pub fn read_port_output_slice(&self, port_index: usize) -> std::ops::Range<usize> {
        let mut start = 0;
        for port in &self.read_ports[..port_index] {
            start += port.data_len;
        }
        let port = &self.read_ports[port_index];
        start..start + port.data_len
    }

    /// Returns the initial contents of row `row_index` (relative to `start_offset`).
    pub fn init_row(&self, row_index: usize) -> Const {
        self.init_value.slice(row_index * self.width..(row_index + 1) * self.width)
    }

    pub fn has_init(&self) -> bool {
        !self.init_value.is_undef()
    }

    pub fn attr_string(&self, name: &str) -> Option<&str> {
        self.attributes.get(name)?.as_str()
    }

    pub fn attr_bool(&self, name: &str) -> bool {
        match self.attributes.get(name) {
            Some(ParamValue::Int(value)) => *value != 0,
            Some(ParamValue::Const(value)) => value.has_one(),
            Some(ParamValue::String(value)) => !value.is_empty(),
            None => false,
        }
    }

    pub fn visit(&self, mut f: impl FnMut(Net)) {
        for write_port in &self.write_ports {
            write_port.visit(&mut f);
        }
        for read_port in &self.read_ports {
            read_port.visit(&mut f);
        }
    }

    pub fn visit_mut(&mut self, mut f: impl FnMut(&mut Net)) {
        for write_port in &mut self.write_ports {
            write_port.visit_mut(&mut f);
        }
        for read_port in &mut self.read_ports {
            read_port.visit_mut(&mut f);
        }
    }
}

impl MemoryWritePort {
    pub fn new(clock: impl Into<ControlNet>, addr: impl Into<Value>, data: impl Into<Value>, mask: impl Into<Value>) -> Self {
        Self {
            clock: Some(clock.into()),
            addr: addr.into(),
            data: data.into(),
            mask: mask.into(),
            priority_mask: vec![],
        }
    }

    pub fn wide_log2(&self, memory: &Memory) -> usize {
        (self.data.len() / memory.width).ilog2() as usize
    }

    pub fn visit(&self, mut f: impl FnMut(Net)) {
        if let Some(clock) = self.clock {
            clock.visit(&mut f);
        }
        self.addr.visit(&mut f);
        self.data.visit(&mut f);
        self.mask.visit(&mut f);
    }

    pub fn visit_mut(&mut self, mut f: impl FnMut(&mut Net)) {
        if let Some(ref mut clock) = self.clock {
            clock.visit_mut(&mut f);
        }
        self.addr.visit_mut(&mut f);
        self.data.visit_mut(&mut f);
        self.mask.visit_mut(&mut f);
    }
}

impl MemoryReadPort {
    pub fn asynchronous(addr: impl Into<Value>, data_len: usize) -> Self {
        Self { addr: addr.into(), data_len, flip_flop: None }
    }

    pub fn clocked(addr: impl Into<Value>, data_len: usize, clock: impl Into<ControlNet>) -> Self {
        Self {
            addr: addr.into(),
            data_len,
            flip_flop: Some(MemoryReadFlipFlop {
                clock: clock.into(),
                clear: ControlNet::ZERO,
                reset: ControlNet::ZERO,
                enable: ControlNet::ONE,
                reset_over_enable: false,
                clear_value: Const::undef(data_len),
                reset_value: Const::undef(data_len),
                init_value: Const::undef(data_len),
                relations: vec![],
            }),
        }
    }

    pub fn is_asynchronous(&self) -> bool {
        self.flip_flop.is_none()
    }

    pub fn wide_log2(&self, memory: &Memory) -> usize {
        (self.data_len / memory.width).ilog2() as usize
    }

    pub fn visit(&self, mut f: impl FnMut(Net)) {
        self.addr.visit(&mut f);
        if let Some(ref flip_flop) = self.flip_flop {
            flip_flop.clock.visit(&mut f);
            flip_flop.clear.visit(&mut f);
            flip_flop.reset.visit(&mut f);
            flip_flop.enable.visit(&mut f);
        }
    }

    pub fn visit_mut(&mut self, mut f: impl FnMut(&mut Net)) {
        self.addr.visit_mut(&mut f);
        if let Some(ref mut flip_flop) = self.flip_flop {
            flip_flop.clock.visit_mut(&mut f);
            flip_flop.clear.visit_mut(&mut f);
            flip_flop.reset.visit_mut(&mut f);
            flip_flop.enable.visit_mut(&mut f);
        }
    }
}

impl MemoryReadFlipFlop {
    pub fn with_clear_value(self, clear: impl Into<ControlNet>, clear_value: impl Into<Const>) -> Self {
        Self { clear: clear.into(), clear_value: clear_value.into(), ..self }
    }

    pub fn with_reset_value(self, reset: impl Into<ControlNet>, reset_value: impl Into<Const>) -> Self {
        Self { reset: reset.into(), reset_over_enable: false, reset_value: reset_value.into(), ..self }
    }

    pub fn with_enable(self, enable: impl Into<ControlNet>) -> Self {
        Self { enable: enable.into(), reset_over_enable: true, ..self }
    }

    pub fn with_init(self, value: impl Into<Const>) -> Self {
        Self { init_value: value.into(), ..self }
    }

    pub fn with_relations(self, relations: Vec<MemoryPortRelation>) -> Self {
        Self { relations, ..self }
    }

    pub fn has_enable(&self) -> bool {
        !self.enable.is_always(true)
    }

    pub fn has_reset(&self) -> bool {
        !self.reset.is_always(false) && !self.reset_value.is_undef()
    }

    pub fn has_clear(&self) -> bool {
        !self.clear.is_always(false) && !self.clear_value.is_undef()
    }

    pub fn has_init_value(&self) -> bool {
        !self.init_value.is_undef()
    }

    /// Converts the read register to reset-over-enable form without changing its behavior.
    pub fn remap_reset_over_enable(&mut self, design: &Design) {
        if self.reset_over_enable {
            return;
        }
        self.reset_over_enable = true;
        if self.reset.is_always(false) || self.enable.is_always(true) {
            return;
        }
        let reset = self.reset.into_pos(design);
        let enable = self.enable.into_pos(design);
        self.reset = ControlNet::Pos(design.add_and1(reset, enable));
    }

    /// Converts the read register to enable-over-reset form without changing its behavior.
    pub fn remap_enable_over_reset(&mut self, design: &Design) {
        if !self.reset_over_enable {
            return;
        }
        self.reset_over_enable = false;
        if self.reset.is_always(false) || self.enable.is_always(true) {
            return;
        }
        let reset = self.reset.into_pos(design);
        let enable = self.enable.into_pos(design);
        self.enable = ControlNet::Pos(design.add_or1(reset, enable));
    }
}
