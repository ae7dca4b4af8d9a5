//! Common utilities for mapping abstract memories onto target RAM primitives.
//!
//! The mapping engine decides which features of a memory the chosen RAM primitive supports
//! natively; everything else is emulated in soft logic around the primitive, using the functions
//! in this crate:
//!
//! - [`MemoryExt::emulate_read_first`] rewrites read-before-write relations into transparent ones
//!   by delaying the involved write ports by half a cycle;
//! - [`MemoryExt::extract_rdff`] converts a synchronous read port into an asynchronous one plus an
//!   explicit output register, folding transparency into soft muxes;
//! - [`MemoryExt::emulate_rden`] removes a read enable, adding a hold register and a bypass mux
//!   (this subsumes init/reset emulation);
//! - [`MemoryExt::emulate_reset`] moves any subset of {init value, async reset, sync reset} off a
//!   read port into a bypass register pair;
//! - [`MemoryExt::emulate_priority`] gates an earlier write port's mask with the inverse of a
//!   later port's same-address write;
//! - [`MemoryExt::emulate_transparency`] adds soft transparency between one write and one read
//!   port;
//! - [`MemoryExt::generate_demux`] / [`MemoryExt::generate_mux`] decode the address bits that the
//!   target array does not decode itself, producing per-tile write enables and collecting
//!   per-tile read data.
//!
//! All functions that rewire a read port take the memory cell's output value and update it in
//! place to freshly added void nets, which the caller is expected to drive (directly or through
//! further rewrites).  The original memory cell must be unalived by the caller.

use memlib_netlist::{
    Const, ControlNet, Design, FlipFlop, Memory, MemoryPortRelation, Net, Value,
};

/// Computes the overlap of write port `write_port_index` with a port of the given address, wide
/// factor, and data width.  Returns the address-match condition together with the write data and
/// write mask realigned to the target port's data width.  Addresses include their zeroed low wide
/// bits, so the high parts can be compared directly.
fn align_write_port(
    memory: &Memory,
    design: &Design,
    target_addr: &Value,
    target_wide_log2: usize,
    target_len: usize,
    write_port_index: usize,
) -> (Net, Value, Value) {
    let write_port = &memory.write_ports[write_port_index];
    let write_wide_log2 = write_port.wide_log2(memory);
    let max_wide_log2 = write_wide_log2.max(target_wide_log2);

    let (write_data, write_mask) = match write_wide_log2.cmp(&target_wide_log2) {
        std::cmp::Ordering::Less => {
            // target wider than write: shift write data/mask into position using the write address
            // bits that select the sub-word.
            let select = write_port.addr.slice(write_wide_log2..target_wide_log2);
            let write_data =
                design.add_shl(write_port.data.zext(target_len), &select, write_port.data.len() as u32);
            let write_mask =
                design.add_shl(write_port.mask.zext(target_len), &select, write_port.mask.len() as u32);
            (write_data, write_mask)
        }
        std::cmp::Ordering::Equal => (write_port.data.clone(), write_port.mask.clone()),
        std::cmp::Ordering::Greater => {
            // write wider than target: select the write data/mask slice addressed by the target.
            let select = target_addr.slice(target_wide_log2..write_wide_log2);
            let write_data = design.add_ushr(&write_port.data, &select, target_len as u32).slice(..target_len);
            let write_mask = design.add_ushr(&write_port.mask, &select, target_len as u32).slice(..target_len);
            (write_data, write_mask)
        }
    };

    let target_hi = target_addr.slice(max_wide_log2.min(target_addr.len())..);
    let write_hi = write_port.addr.slice(max_wide_log2.min(write_port.addr.len())..);
    let abits = target_hi.len().max(write_hi.len());
    let addr_eq = design.add_eq(target_hi.zext(abits), write_hi.zext(abits));

    (addr_eq, write_data, write_mask)
}

// Creates a transparency mux, used by both sync-to-async conversion and transparency emulation.
// `data` and `mask` must be as wide as the read port.  If the write port is writing to the word
// the read port is reading, the write data is multiplexed onto the returned data according to the
// write mask, and the returned mask is the OR of the input mask and the write mask; otherwise the
// data and mask pass through unchanged.  The mask can be `None` if the caller does not track it.
fn transparency_mux(
    memory: &Memory,
    design: &Design,
    read_port_index: usize,
    write_port_index: usize,
    data: Value,
    mask: Option<Value>,
) -> (Value, Option<Value>) {
    let read_port = &memory.read_ports[read_port_index];
    let read_wide_log2 = read_port.wide_log2(memory);
    let (addr_eq, write_data, write_mask) =
        align_write_port(memory, design, &read_port.addr, read_wide_log2, read_port.data_len, write_port_index);

    let mut new_data = Value::new();
    for ((data_bit, write_data_bit), mask_bit) in data.iter().zip(&write_data).zip(&write_mask) {
        let sel_write = design.add_and1(addr_eq, mask_bit);
        new_data.push(design.add_mux1(sel_write, write_data_bit, data_bit));
    }
    let new_mask = mask.map(|mask| design.add_mux(addr_eq, design.add_or(&mask, write_mask), mask));

    (new_data, new_mask)
}

/// An extension trait for [`Memory`] with assorted memory lowering utility functions.
pub trait MemoryExt {
    /// Returns true if [`MemoryExt::emulate_read_first`] can be applied to this memory: there is
    /// at least one read-before-write relation, every read port is synchronous and clocked the
    /// same way as every write port, and no write port is subject to both a read-before-write and
    /// a transparent relation.
    fn emulate_read_first_ok(&self) -> bool;

    /// Rewrites all read-before-write relations into transparent ones, by delaying the involved
    /// write ports by half a cycle: the write clock polarity is flipped, and registers (clocked by
    /// the original clock) are added on the address, data, and mask inputs.
    fn emulate_read_first(&mut self, design: &Design);

    /// Converts a synchronous read port to an asynchronous read port, extracting the output
    /// register.  Transparent relations are folded into soft muxes ahead of the register.  Does
    /// nothing if the port is already asynchronous.
    fn extract_rdff(&mut self, design: &Design, port_index: usize, output: &mut Value);

    /// Rewrites a synchronous read port with a read enable into an always-enabled one, adding a
    /// hold register and bypass mux.  Init value and resets are folded into the added registers,
    /// so no separate [`MemoryExt::emulate_reset`] call is needed for such ports.
    fn emulate_rden(&mut self, design: &Design, port_index: usize, output: &mut Value);

    /// Moves the selected subset of {init value, async reset, sync reset} off a synchronous read
    /// port into a soft bypass register pair.  Does nothing if no feature is selected or present.
    fn emulate_reset(
        &mut self,
        design: &Design,
        port_index: usize,
        emu_init: bool,
        emu_arst: bool,
        emu_srst: bool,
        output: &mut Value,
    );

    /// Makes write port `later_index` win over write port `earlier_index` in soft logic, by
    /// masking off the earlier port's write enables wherever the later port writes the same bits.
    fn emulate_priority(&mut self, design: &Design, earlier_index: usize, later_index: usize);

    /// Adds soft transparency between `write_port_index` and the synchronous read port
    /// `read_port_index`, downgrading their relation to [`MemoryPortRelation::Undefined`].
    fn emulate_transparency(&mut self, design: &Design, write_port_index: usize, read_port_index: usize, output: &mut Value);

    /// Produces per-tile write enable vectors for a write port.  Tiles are indexed by the address
    /// pattern: bit `i` of the tile index corresponds to address bit `addr_mux_bits[i]`, and the
    /// remaining high tile-index bits select the `2**addr_shift`-word chunk of the address space,
    /// starting at `start_offset` rounded down.  Entry `tile` of the result is the port's mask
    /// gated by the tile's address match.
    fn generate_demux(&self, design: &Design, port_index: usize, addr_shift: usize, addr_mux_bits: &[usize])
        -> Vec<Value>;

    /// Produces per-tile read data collection points for a read port: one void value per tile (to
    /// be driven by the caller), muxed together by the tile address matches (registered through
    /// the port's clock and enable for synchronous ports) and rewired onto the port's output.
    fn generate_mux(
        &self,
        design: &Design,
        output: &Value,
        port_index: usize,
        addr_shift: usize,
        addr_mux_bits: &[usize],
    ) -> Vec<Value>;
}

fn tile_count(memory: &Memory, addr_shift: usize, addr_mux_bits: &[usize]) -> (usize, usize) {
    let chunk = 1 << addr_shift;
    let addr_start = memory.start_offset & !(chunk - 1);
    let addr_end = ((memory.start_offset + memory.depth - 1) | (chunk - 1)) + 1;
    let hnum = (addr_end - addr_start) >> addr_shift;
    (hnum, addr_start >> addr_shift)
}

fn tile_match(
    design: &Design,
    addr: &Value,
    addr_shift: usize,
    addr_mux_bits: &[usize],
    hi_index: usize,
    hi_base: usize,
    sub: usize,
) -> Net {
    let mut sel = Net::ONE;
    for (bit_index, &addr_bit) in addr_mux_bits.iter().enumerate() {
        let net = if addr_bit < addr.len() { addr[addr_bit] } else { Net::ZERO };
        let term = if sub & 1 << bit_index != 0 { net } else { design.add_not1(net) };
        sel = design.add_and1(sel, term);
    }
    let hi = addr.slice(addr_shift.min(addr.len())..);
    if !hi.is_empty() {
        let want = hi_base + hi_index;
        if want >> hi.len() != 0 {
            return Net::ZERO;
        }
        let hi_len = hi.len();
        sel = design.add_and1(sel, design.add_eq(hi, Value::from(Const::from_uint(want as u128, hi_len))));
    } else if hi_base + hi_index != 0 {
        return Net::ZERO;
    }
    sel
}

impl MemoryExt for Memory {
    fn emulate_read_first_ok(&self) -> bool {
        if self.write_ports.is_empty() || self.read_ports.is_empty() {
            return false;
        }
        let mut clock = None;
        for port in &self.read_ports {
            let Some(ref flip_flop) = port.flip_flop else { return false };
            if *clock.get_or_insert(flip_flop.clock) != flip_flop.clock {
                return false;
            }
        }
        let clock = clock.unwrap();
        for port in &self.write_ports {
            if port.clock != Some(clock) {
                return false;
            }
        }
        let mut found_read_first = false;
        for write_port_index in 0..self.write_ports.len() {
            let mut read_first = false;
            let mut transparent = false;
            for port in &self.read_ports {
                match port.flip_flop.as_ref().unwrap().relations[write_port_index] {
                    MemoryPortRelation::Undefined => (),
                    MemoryPortRelation::ReadBeforeWrite => read_first = true,
                    MemoryPortRelation::Transparent => transparent = true,
                }
            }
            if read_first && transparent {
                return false;
            }
            found_read_first |= read_first;
        }
        found_read_first
    }

    fn emulate_read_first(&mut self, design: &Design) {
        debug_assert!(self.emulate_read_first_ok());
        let mut rdfirst_write_ports = vec![false; self.write_ports.len()];
        for port in &mut self.read_ports {
            let flip_flop = port.flip_flop.as_mut().unwrap();
            for (write_port_index, relation) in flip_flop.relations.iter_mut().enumerate() {
                if *relation == MemoryPortRelation::ReadBeforeWrite {
                    rdfirst_write_ports[write_port_index] = true;
                    *relation = MemoryPortRelation::Transparent;
                }
            }
        }

        let init_undef = self.init_value.is_undef();
        for (port_index, port) in self.write_ports.iter_mut().enumerate() {
            if !rdfirst_write_ports[port_index] {
                continue;
            }
            let clock = port.clock.unwrap();
            port.addr = design.add_dff(FlipFlop::new(std::mem::take(&mut port.addr), clock));
            port.data = design.add_dff(FlipFlop::new(std::mem::take(&mut port.data), clock));
            port.mask = design.add_dff(FlipFlop::new(std::mem::take(&mut port.mask), clock).with_init(if init_undef {
                Const::undef(port.data.len())
            } else {
                Const::zero(port.data.len())
            }));
            port.clock = Some(!clock);
        }
    }

    fn extract_rdff(&mut self, design: &Design, port_index: usize, output: &mut Value) {
        let read_port = &mut self.read_ports[port_index];
        let Some(port_flip_flop) = read_port.flip_flop.take() else {
            return;
        };
        let read_port = &self.read_ports[port_index];
        let new_port_output = design.add_void(read_port.data_len);
        let mut data = new_port_output.clone();
        for (write_port_index, relation) in port_flip_flop.relations.iter().enumerate() {
            if *relation == MemoryPortRelation::Transparent {
                (data, _) = transparency_mux(self, design, port_index, write_port_index, data, None);
            }
        }
        let q = design.add_dff(FlipFlop {
            data,
            clock: port_flip_flop.clock,
            clear: port_flip_flop.clear,
            reset: port_flip_flop.reset,
            enable: port_flip_flop.enable,
            reset_over_enable: port_flip_flop.reset_over_enable,
            clear_value: port_flip_flop.clear_value,
            reset_value: port_flip_flop.reset_value,
            init_value: port_flip_flop.init_value,
        });
        let output_slice = self.read_port_output_slice(port_index);
        design.replace_value(output.slice(output_slice.clone()), q);
        output[output_slice.clone()].copy_from_slice(&new_port_output[..]);
    }

    fn emulate_rden(&mut self, design: &Design, port_index: usize, output: &mut Value) {
        let data_len = self.read_ports[port_index].data_len;
        let flip_flop = self.read_ports[port_index].flip_flop.as_ref().unwrap().clone();
        let enable = flip_flop.enable.into_pos(design);

        // The sync reset takes effect regardless of the enable when it wins the priority; fold
        // the priority into the effective reset condition up front.
        let reset = if flip_flop.has_reset() {
            let reset = flip_flop.reset.into_pos(design);
            if flip_flop.reset_over_enable {
                reset
            } else {
                design.add_and1(reset, enable)
            }
        } else {
            Net::ZERO
        };

        let new_port_output = design.add_void(data_len);
        let visible = design.add_void(data_len);

        // Did the last active edge load fresh data through the always-enabled port?
        let mut loaded_ff = FlipFlop::new(Value::from(enable), flip_flop.clock).with_init(Const::zero(1));
        loaded_ff.reset = ControlNet::Pos(reset);
        loaded_ff.reset_value = Const::zero(1);
        loaded_ff.reset_over_enable = true;
        if flip_flop.has_clear() {
            loaded_ff.clear = flip_flop.clear;
            loaded_ff.clear_value = Const::zero(1);
        }
        let loaded = design.add_dff(loaded_ff)[0];

        // Holds the visible output across disabled cycles, and supplies reset/init values.
        let mut hold_ff = FlipFlop::new(visible.clone(), flip_flop.clock);
        hold_ff.init_value = flip_flop.init_value.clone();
        hold_ff.reset = ControlNet::Pos(reset);
        hold_ff.reset_value = flip_flop.reset_value.clone();
        hold_ff.reset_over_enable = true;
        if flip_flop.has_clear() {
            hold_ff.clear = flip_flop.clear;
            hold_ff.clear_value = flip_flop.clear_value.clone();
        }
        let hold = design.add_dff(hold_ff);

        let mut mux = Value::new();
        for (new_output_bit, hold_bit) in new_port_output.iter().zip(&hold) {
            mux.push(design.add_mux1(loaded, new_output_bit, hold_bit));
        }
        design.replace_value(&visible, &mux);

        let output_slice = self.read_port_output_slice(port_index);
        design.replace_value(output.slice(output_slice.clone()), mux);
        output[output_slice.clone()].copy_from_slice(&new_port_output[..]);

        let flip_flop = self.read_ports[port_index].flip_flop.as_mut().unwrap();
        flip_flop.enable = ControlNet::ONE;
        flip_flop.clear = ControlNet::ZERO;
        flip_flop.reset = ControlNet::ZERO;
        flip_flop.clear_value = Const::undef(data_len);
        flip_flop.reset_value = Const::undef(data_len);
        flip_flop.init_value = Const::undef(data_len);
    }

    fn emulate_reset(
        &mut self,
        design: &Design,
        port_index: usize,
        emu_init: bool,
        emu_arst: bool,
        emu_srst: bool,
        output: &mut Value,
    ) {
        let read_port = &mut self.read_ports[port_index];
        let data_len = read_port.data_len;
        let flip_flop = read_port.flip_flop.as_mut().unwrap();

        let emu_init = emu_init && flip_flop.has_init_value();
        let emu_arst = emu_arst && flip_flop.has_clear();
        let emu_srst = emu_srst && flip_flop.has_reset();
        if !emu_init && !emu_arst && !emu_srst {
            return;
        }

        // A register pair carries the override value and its per-bit validity; whenever the mask
        // is set, the override replaces the RAM output.  A load cycle clears the mask.
        let mut data_ff = FlipFlop::new(Value::undef(data_len), flip_flop.clock);
        let mut mask_ff = FlipFlop::new(Value::zero(data_len), flip_flop.clock);
        data_ff.enable = flip_flop.enable;
        mask_ff.enable = flip_flop.enable;
        data_ff.reset_over_enable = flip_flop.reset_over_enable;
        mask_ff.reset_over_enable = flip_flop.reset_over_enable;
        mask_ff.init_value = Const::zero(data_len);

        if emu_init {
            data_ff.init_value = std::mem::replace(&mut flip_flop.init_value, Const::undef(data_len));
            mask_ff.init_value = Const::ones(data_len);
        }
        if emu_arst {
            data_ff.clear = flip_flop.clear;
            mask_ff.clear = flip_flop.clear;
            data_ff.clear_value = std::mem::replace(&mut flip_flop.clear_value, Const::undef(data_len));
            mask_ff.clear_value = Const::ones(data_len);
            flip_flop.clear = ControlNet::ZERO;
        }
        if emu_srst {
            data_ff.reset = flip_flop.reset;
            mask_ff.reset = flip_flop.reset;
            data_ff.reset_value = std::mem::replace(&mut flip_flop.reset_value, Const::undef(data_len));
            mask_ff.reset_value = Const::ones(data_len);
            flip_flop.reset = ControlNet::ZERO;
        }

        let data = design.add_dff(data_ff);
        let mask = design.add_dff(mask_ff);

        let new_port_output = design.add_void(data_len);
        let mut mux = Value::new();
        for ((new_output_bit, data_bit), mask_bit) in new_port_output.iter().zip(&data).zip(&mask) {
            mux.push(design.add_mux1(mask_bit, data_bit, new_output_bit));
        }

        let output_slice = self.read_port_output_slice(port_index);
        design.replace_value(output.slice(output_slice.clone()), mux);
        output[output_slice.clone()].copy_from_slice(&new_port_output[..]);
    }

    fn emulate_priority(&mut self, design: &Design, earlier_index: usize, later_index: usize) {
        let earlier_addr = self.write_ports[earlier_index].addr.clone();
        let earlier_wide_log2 = self.write_ports[earlier_index].wide_log2(self);
        let earlier_len = self.write_ports[earlier_index].data.len();
        let (addr_eq, _, later_mask) =
            align_write_port(self, design, &earlier_addr, earlier_wide_log2, earlier_len, later_index);
        let mut new_mask = Value::new();
        for (mask_bit, later_bit) in self.write_ports[earlier_index].mask.iter().zip(&later_mask) {
            let collide = design.add_and1(addr_eq, later_bit);
            new_mask.push(design.add_and1(mask_bit, design.add_not1(collide)));
        }
        self.write_ports[earlier_index].mask = new_mask;
        if let Some(flag) = self.write_ports[later_index].priority_mask.get_mut(earlier_index) {
            *flag = false;
        }
    }

    fn emulate_transparency(
        &mut self,
        design: &Design,
        write_port_index: usize,
        read_port_index: usize,
        output: &mut Value,
    ) {
        let data_len = self.read_ports[read_port_index].data_len;
        let (data, mask) = transparency_mux(
            self,
            design,
            read_port_index,
            write_port_index,
            Value::undef(data_len),
            Some(Value::zero(data_len)),
        );
        let mask = mask.unwrap();

        // Delay the captured write by one cycle, tracking the port's enable; the mask is dropped
        // on any reset, where the RAM side provides the value.
        let flip_flop = self.read_ports[read_port_index].flip_flop.as_mut().unwrap();
        let mut data_ff = FlipFlop::new(data, flip_flop.clock);
        data_ff.enable = flip_flop.enable;
        let mut mask_ff = FlipFlop::new(mask, flip_flop.clock);
        mask_ff.enable = flip_flop.enable;
        mask_ff.reset_over_enable = flip_flop.reset_over_enable;
        mask_ff.init_value = Const::zero(data_len);
        if !flip_flop.clear.is_always(false) {
            mask_ff.clear = flip_flop.clear;
            mask_ff.clear_value = Const::zero(data_len);
        }
        if !flip_flop.reset.is_always(false) {
            mask_ff.reset = flip_flop.reset;
            mask_ff.reset_value = Const::zero(data_len);
        }
        flip_flop.relations[write_port_index] = MemoryPortRelation::Undefined;

        let data = design.add_dff(data_ff);
        let mask = design.add_dff(mask_ff);

        let new_port_output = design.add_void(data_len);
        let mut mux = Value::new();
        for ((new_output_bit, data_bit), mask_bit) in new_port_output.iter().zip(&data).zip(&mask) {
            mux.push(design.add_mux1(mask_bit, data_bit, new_output_bit));
        }

        let output_slice = self.read_port_output_slice(read_port_index);
        design.replace_value(output.slice(output_slice.clone()), mux);
        output[output_slice.clone()].copy_from_slice(&new_port_output[..]);
    }

    fn generate_demux(
        &self,
        design: &Design,
        port_index: usize,
        addr_shift: usize,
        addr_mux_bits: &[usize],
    ) -> Vec<Value> {
        let port = &self.write_ports[port_index];
        let (hnum, hi_base) = tile_count(self, addr_shift, addr_mux_bits);
        let mut result = vec![];
        for hi_index in 0..hnum {
            for sub in 0..1 << addr_mux_bits.len() {
                let sel = tile_match(design, &port.addr, addr_shift, addr_mux_bits, hi_index, hi_base, sub);
                let mut gated = Value::new();
                for mask_bit in &port.mask {
                    gated.push(design.add_and1(mask_bit, sel));
                }
                result.push(gated);
            }
        }
        result
    }

    fn generate_mux(
        &self,
        design: &Design,
        output: &Value,
        port_index: usize,
        addr_shift: usize,
        addr_mux_bits: &[usize],
    ) -> Vec<Value> {
        let port = &self.read_ports[port_index];
        let (hnum, hi_base) = tile_count(self, addr_shift, addr_mux_bits);
        let tiles = hnum << addr_mux_bits.len();
        let mut result = vec![];
        let mut selects = vec![];
        for hi_index in 0..hnum {
            for sub in 0..1 << addr_mux_bits.len() {
                let mut sel = Net::ONE;
                if tiles > 1 {
                    sel = tile_match(design, &port.addr, addr_shift, addr_mux_bits, hi_index, hi_base, sub);
                    if let Some(ref flip_flop) = port.flip_flop {
                        // The select must change in lockstep with the data registered inside the RAM.
                        let mut sel_ff = FlipFlop::new(Value::from(sel), flip_flop.clock);
                        sel_ff.enable = flip_flop.enable;
                        sel = design.add_dff(sel_ff)[0];
                    }
                }
                selects.push(sel);
                result.push(design.add_void(port.data_len));
            }
        }
        let mut muxed = result[0].clone();
        for tile in 1..tiles {
            muxed = design.add_mux(selects[tile], &result[tile], muxed);
        }
        let output_slice = self.read_port_output_slice(port_index);
        design.replace_value(output.slice(output_slice), muxed);
        result
    }
}
