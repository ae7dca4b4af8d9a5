//! Emission of the chosen configuration: soft-logic emulation first, then one library cell
//! instance per (port replica, data tile), with swizzled init and reset values and decoded
//! addresses.

use memlib_memory::MemoryExt;
use memlib_netlist::{Const, ControlNet, Design, Instance, Memory, MemoryPortRelation, Net, Trit, Value};

use crate::geometry::xlat_width_range;
use crate::library::{ClkPolKind, Library, PortKind};
use crate::map::{MemConfig, XmuxMap};

#[derive(Debug, Clone, Copy)]
struct SwizzleBit {
    valid: bool,
    mux_idx: usize,
    addr: usize,
    bit: usize,
}

/// Maps every data bit of every tile back to a source (address, bit) pair, together with the
/// address-mux index that selects the tile.
struct Swizzle {
    addr_shift: usize,
    addr_mux_bits: Vec<usize>,
    bits: Vec<Vec<SwizzleBit>>,
}

fn ceil_log2(value: usize) -> usize {
    if value <= 1 {
        0
    } else {
        (usize::BITS - (value - 1).leading_zeros()) as usize
    }
}

fn gen_swizzle(mem: &Memory, lib: &Library, cfg: &MemConfig, sw_wide_log2: usize, hw_wide_log2: usize) -> Swizzle {
    let rdef = &lib.ram_defs[cfg.ram_def];
    let dims = &rdef.dims[cfg.dims_def].val;

    let mut emu_wide_bits = vec![];
    let mut hard_wide_bits = vec![];
    for bit in 0..ceil_log2(mem.depth) {
        if cfg.emu_wide_mask & 1 << bit != 0 {
            emu_wide_bits.push(bit);
        } else if hard_wide_bits.len() < hw_wide_log2.saturating_sub(cfg.base_width_log2) {
            hard_wide_bits.push(bit);
        }
    }
    let mut addr_mux_bits = vec![];
    for &bit in &hard_wide_bits {
        if bit >= sw_wide_log2 {
            addr_mux_bits.push(bit);
        }
    }
    for &bit in &emu_wide_bits {
        if bit >= sw_wide_log2 {
            addr_mux_bits.push(bit);
        }
    }

    let addr_shift = dims.abits - cfg.base_width_log2 + emu_wide_bits.len();
    let addr_start = mem.start_offset & !((1 << addr_shift) - 1);
    let addr_end = ((mem.start_offset + mem.depth - 1) | ((1 << addr_shift) - 1)) + 1;
    let hnum = (addr_end - addr_start) >> addr_shift;
    let unit_width = dims.dbits[cfg.unit_width_log2];

    let mut bits = vec![
        vec![SwizzleBit { valid: false, mux_idx: 0, addr: 0, bit: 0 }; dims.dbits[hw_wide_log2]];
        cfg.repl_d
    ];

    for hi in 0..hnum {
        for ewi in 0..1usize << emu_wide_bits.len() {
            for hwi in 0..1usize << hard_wide_bits.len() {
                let mut mux_idx = 0;
                let mut sub = 0;
                let mut mux_bit = 0;
                let mut hbit_base = 0;
                for (index, &bit) in hard_wide_bits.iter().enumerate() {
                    if bit < sw_wide_log2 {
                        if hwi & 1 << index != 0 {
                            sub |= 1 << bit;
                        }
                    } else {
                        if hwi & 1 << index != 0 {
                            mux_idx |= 1 << mux_bit;
                        }
                        mux_bit += 1;
                    }
                    if hwi & 1 << index != 0 {
                        hbit_base += dims.dbits[index + cfg.base_width_log2];
                    }
                }
                for (index, &bit) in emu_wide_bits.iter().enumerate() {
                    if bit < sw_wide_log2 {
                        if ewi & 1 << index != 0 {
                            sub |= 1 << bit;
                        }
                    } else {
                        if ewi & 1 << index != 0 {
                            mux_idx |= 1 << mux_bit;
                        }
                        mux_bit += 1;
                    }
                }
                mux_idx |= hi << mux_bit;
                let mut addr = addr_start + (hi << addr_shift);
                for (index, &mux_addr_bit) in addr_mux_bits.iter().enumerate() {
                    if mux_idx & 1 << index != 0 {
                        addr += 1 << mux_addr_bit;
                    }
                }
                for (position, &source) in cfg.swizzle.iter().enumerate() {
                    let Some(source) = source else { continue };
                    let rbit = position + cfg.swizzle.len() * (ewi + (hi << emu_wide_bits.len()));
                    let rep = rbit / unit_width;
                    let hbit = hbit_base + rbit % unit_width;
                    bits[rep][hbit] =
                        SwizzleBit { valid: true, mux_idx, addr, bit: source + sub * mem.width };
                }
            }
        }
    }

    Swizzle { addr_shift, addr_mux_bits, bits }
}

pub(crate) fn emit(
    design: &Design,
    mem: &mut Memory,
    output: &mut Value,
    lib: &Library,
    cfg: &MemConfig,
    xmux: &XmuxMap,
) {
    let rdef = &lib.ram_defs[cfg.ram_def];
    let dims = &rdef.dims[cfg.dims_def].val;
    log::info!("mapping memory via {}", rdef.id);

    // Apply the emulations first: read-first rewriting, then per read port either register
    // extraction, enable emulation, or reset/init emulation (with the srst/enable priority fixup
    // where requested), then priority, then any transparency still required.
    if cfg.emu_read_first {
        mem.emulate_read_first(design);
    }
    for (pidx, pcfg) in cfg.rd_ports.iter().enumerate() {
        if pcfg.emu_sync {
            mem.extract_rdff(design, pidx, output);
        } else if pcfg.emu_en {
            mem.emulate_rden(design, pidx, output);
        } else {
            if pcfg.emu_srst_en_prio {
                let flip_flop = mem.read_ports[pidx].flip_flop.as_mut().unwrap();
                if !flip_flop.reset_over_enable {
                    flip_flop.remap_reset_over_enable(design);
                } else {
                    flip_flop.remap_enable_over_reset(design);
                }
            }
            mem.emulate_reset(design, pidx, pcfg.emu_init, pcfg.emu_arst, pcfg.emu_srst, output);
        }
    }
    for (pidx, pcfg) in cfg.wr_ports.iter().enumerate() {
        for &earlier in &pcfg.emu_prio {
            mem.emulate_priority(design, earlier, pidx);
        }
    }
    for (pidx, pcfg) in cfg.rd_ports.iter().enumerate() {
        for &wpidx in &pcfg.emu_trans {
            // The pair may no longer be transparent: register extraction folds transparency in.
            let still_transparent = mem.read_ports[pidx]
                .flip_flop
                .as_ref()
                .is_some_and(|flip_flop| flip_flop.relations[wpidx] == MemoryPortRelation::Transparent);
            if still_transparent {
                mem.emulate_transparency(design, wpidx, pidx, output);
            }
        }
    }

    // Assign source ports to (replica, port group, slot) positions.
    let mut slots: Vec<Vec<Vec<(Option<usize>, Option<usize>)>>> =
        vec![vec![vec![]; rdef.ports.len()]; cfg.repl_port];
    for (wpidx, pcfg) in cfg.wr_ports.iter().enumerate() {
        for (rp, replica) in slots.iter_mut().enumerate() {
            let rd_port = if rp == 0 { pcfg.rd_port } else { None };
            replica[pcfg.port_def].push((Some(wpidx), rd_port));
        }
    }
    for (rpidx, pcfg) in cfg.rd_ports.iter().enumerate() {
        if pcfg.wr_port.is_some() {
            continue;
        }
        let names = rdef.ports[pcfg.port_def].val.names.len();
        let replica = slots
            .iter_mut()
            .find(|replica| replica[pcfg.port_def].len() < names)
            .expect("port replication accounts for every read port");
        replica[pcfg.port_def].push((None, Some(rpidx)));
    }

    let init_swz = gen_swizzle(mem, lib, cfg, 0, dims.dbits.len() - 1);

    // Map hardware address bits back to source word-address bits; the low base-width bits of the
    // cell address space are covered by the data width.
    let mut hw_addr_swizzle: Vec<Option<usize>> = vec![None; cfg.base_width_log2];
    for bit in 0..init_swz.addr_shift {
        if cfg.emu_wide_mask & 1 << bit == 0 {
            hw_addr_swizzle.push(Some(bit));
        }
    }
    assert_eq!(hw_addr_swizzle.len(), dims.abits);

    let mut cells: Vec<Vec<Instance>> = vec![];
    let mut connections: Vec<Vec<Vec<(usize, Net)>>> = vec![vec![vec![]; cfg.repl_d]; cfg.repl_port];
    for _rp in 0..cfg.repl_port {
        let mut replica = vec![];
        for rd in 0..cfg.repl_d {
            let mut cell = Instance::new(rdef.id.clone());
            cell.add_param("ABITS", dims.abits as i64);
            cell.add_param("BYTE", cfg.byte as i64);
            if dims.tied {
                cell.add_param("WIDTH", dims.dbits[cfg.base_width_log2] as i64);
            }
            for (key, value) in &cfg.opts {
                cell.add_param(format!("OPTION_{key}"), value.clone());
            }
            for (name, &clock) in &cfg.clocks_anyedge {
                cell.add_param(format!("CLKPOL_{name}"), clock.is_positive());
                cell.add_input(format!("CLK_{name}"), clock.net());
            }
            for (name, &(net, flip)) in &cfg.clocks_pnedge {
                let net = if flip { design.add_not1(net) } else { net };
                cell.add_input(format!("CLK_{name}"), net);
            }
            let mut init_value = Const::new();
            for hwa in (0..1usize << dims.abits).step_by(1 << (dims.dbits.len() - 1)) {
                for bit in &init_swz.bits[rd] {
                    if !bit.valid {
                        init_value.push(Trit::Undef);
                        continue;
                    }
                    let mut addr = bit.addr;
                    for i in (dims.dbits.len() - 1)..dims.abits {
                        if hwa & 1 << i != 0 {
                            addr += 1 << hw_addr_swizzle[i].unwrap();
                        }
                    }
                    if addr >= mem.start_offset && addr < mem.start_offset + mem.depth {
                        init_value.push(mem.init_value[(addr - mem.start_offset) * mem.width + bit.bit]);
                    } else {
                        init_value.push(Trit::Undef);
                    }
                }
            }
            cell.add_param("INIT", init_value);
            replica.push(cell);
        }
        cells.push(replica);
    }

    for rp in 0..cfg.repl_port {
        for (pgi, pdef) in rdef.ports.iter().enumerate() {
            for (pi, pname) in pdef.val.names.iter().enumerate() {
                if pi >= slots[rp][pgi].len() {
                    for cell in &mut cells[rp] {
                        cell.add_param(format!("PORT_{pname}_USED"), false);
                    }
                    continue;
                }
                let (wpidx, rpidx) = slots[rp][pgi][pi];
                for cell in &mut cells[rp] {
                    cell.add_param(format!("PORT_{pname}_USED"), true);
                    if matches!(pdef.val.kind, PortKind::Srsw | PortKind::Arsw) {
                        cell.add_param(format!("PORT_{pname}_WR_USED"), wpidx.is_some());
                        cell.add_param(format!("PORT_{pname}_RD_USED"), rpidx.is_some());
                    }
                }

                let mut addr;
                let width_def;
                let mut wide_log2;
                let mut wr_wide_log2 = 0;
                let mut rd_wide_log2 = 0;
                let mut clock = ControlNet::Pos(Net::ZERO);
                let mut clkpol_kind = ClkPolKind::Posedge;
                if let Some(wpidx) = wpidx {
                    let wpcfg = &cfg.wr_ports[wpidx];
                    let wport = &mem.write_ports[wpidx];
                    for (key, value) in &wpcfg.portopts {
                        for cell in &mut cells[rp] {
                            cell.add_param(format!("PORT_{pname}_OPTION_{key}"), value.clone());
                        }
                    }
                    clock = wport.clock.unwrap();
                    clkpol_kind = wpcfg.clkpol_kind;
                    addr = wport.addr.clone();
                    width_def = wpcfg.width_def;
                    wr_wide_log2 = wport.wide_log2(mem);
                    wide_log2 = wr_wide_log2;
                    if let Some(rpidx) = rpidx {
                        let rport = &mem.read_ports[rpidx];
                        rd_wide_log2 = rport.wide_log2(mem);
                        if rd_wide_log2 > wr_wide_log2 {
                            wide_log2 = rd_wide_log2;
                        } else {
                            // The narrower port's address carries the sub-word select bits.
                            addr = rport.addr.clone();
                        }
                    }
                } else {
                    let rpidx = rpidx.unwrap();
                    let rpcfg = &cfg.rd_ports[rpidx];
                    let rport = &mem.read_ports[rpidx];
                    for (key, value) in &rpcfg.portopts {
                        for cell in &mut cells[rp] {
                            cell.add_param(format!("PORT_{pname}_OPTION_{key}"), value.clone());
                        }
                    }
                    if let Some(ref flip_flop) = rport.flip_flop {
                        clock = flip_flop.clock;
                        clkpol_kind = rpcfg.clkpol_kind;
                    }
                    addr = rport.addr.clone();
                    width_def = rpcfg.width_def;
                    rd_wide_log2 = rport.wide_log2(mem);
                    wide_log2 = rd_wide_log2;
                }
                let addr = xmux.canon_value(&addr);

                if pdef.val.kind != PortKind::Ar {
                    let mut clock_net = clock.net();
                    match clkpol_kind {
                        ClkPolKind::Posedge => {
                            if clock.is_negative() {
                                clock_net = design.add_not1(clock_net);
                            }
                        }
                        ClkPolKind::Negedge => {
                            if clock.is_positive() {
                                clock_net = design.add_not1(clock_net);
                            }
                        }
                        ClkPolKind::Anyedge => {
                            for cell in &mut cells[rp] {
                                cell.add_param(format!("PORT_{pname}_CLKPOL"), clock.is_positive());
                            }
                        }
                    }
                    for cell in &mut cells[rp] {
                        cell.add_input(format!("PORT_{pname}_CLK"), clock_net);
                    }
                }

                // Width determination.
                let wdef = &pdef.val.width[width_def].val;
                let wr_width_range = xlat_width_range(dims, &wdef.wr_widths);
                let rd_width_range = xlat_width_range(dims, &wdef.rd_widths);
                if wdef.tied {
                    wr_wide_log2 = wide_log2;
                    rd_wide_log2 = wide_log2;
                }
                let hard_below = |wide: usize| (0..wide).filter(|&bit| cfg.hard_wide_mask & 1 << bit != 0).count();
                let hw_wr_wide_log2 =
                    (cfg.base_width_log2 + hard_below(wr_wide_log2)).clamp(wr_width_range.0, wr_width_range.1);
                let hw_rd_wide_log2 =
                    (cfg.base_width_log2 + hard_below(rd_wide_log2)).clamp(rd_width_range.0, rd_width_range.1);
                if !dims.tied {
                    for cell in &mut cells[rp] {
                        if wdef.tied {
                            cell.add_param(format!("PORT_{pname}_WIDTH"), dims.dbits[hw_wr_wide_log2] as i64);
                        } else {
                            if wpidx.is_some() {
                                cell.add_param(format!("PORT_{pname}_WR_WIDTH"), dims.dbits[hw_wr_wide_log2] as i64);
                            }
                            if rpidx.is_some() {
                                cell.add_param(format!("PORT_{pname}_RD_WIDTH"), dims.dbits[hw_rd_wide_log2] as i64);
                            }
                        }
                    }
                }

                // Address determination: hardware address bits come from the source word
                // address, with the bits covered by hard wide ports forced to zero.
                let mut hw_addr = Value::new();
                for &source in &hw_addr_swizzle {
                    match source {
                        Some(bit) if bit < addr.len() => hw_addr.push(addr[bit]),
                        _ => hw_addr.push(Net::ZERO),
                    }
                }
                for bit in 0..hw_wr_wide_log2.min(hw_rd_wide_log2) {
                    hw_addr[bit] = Net::ZERO;
                }
                for cell in &mut cells[rp] {
                    cell.add_input(format!("PORT_{pname}_ADDR"), &hw_addr);
                }

                if let Some(wpidx) = wpidx {
                    let wport = &mem.write_ports[wpidx];
                    let port_swz = gen_swizzle(mem, lib, cfg, wport.wide_log2(mem), hw_wr_wide_log2);
                    let mut effective_byte = cfg.byte;
                    if effective_byte == 0 || effective_byte > dims.dbits[hw_wr_wide_log2] {
                        effective_byte = dims.dbits[hw_wr_wide_log2];
                    }
                    let big_wren = mem.generate_demux(design, wpidx, port_swz.addr_shift, &port_swz.addr_mux_bits);
                    for rd in 0..cfg.repl_d {
                        let mut hw_wdata = Value::new();
                        let mut hw_wren = Value::new();
                        for bit in &port_swz.bits[rd] {
                            if bit.valid {
                                hw_wdata.push(wport.data[bit.bit]);
                            } else {
                                hw_wdata.push(Net::UNDEF);
                            }
                        }
                        for chunk in port_swz.bits[rd].chunks(effective_byte) {
                            let bit = &chunk[0];
                            if bit.valid {
                                hw_wren.push(big_wren[bit.mux_idx][bit.bit]);
                            } else {
                                hw_wren.push(Net::ZERO);
                            }
                        }
                        let cell = &mut cells[rp][rd];
                        cell.add_param(format!("PORT_{pname}_WR_EN_WIDTH"), hw_wren.len() as i64);
                        cell.add_input(format!("PORT_{pname}_WR_DATA"), hw_wdata);
                        cell.add_input(format!("PORT_{pname}_WR_EN"), hw_wren);
                    }
                }

                if let Some(rpidx) = rpidx {
                    let rpcfg = &cfg.rd_ports[rpidx];
                    let rport = &mem.read_ports[rpidx];
                    let port_swz = gen_swizzle(mem, lib, cfg, rport.wide_log2(mem), hw_rd_wide_log2);
                    let big_rdata =
                        mem.generate_mux(design, output, rpidx, port_swz.addr_shift, &port_swz.addr_mux_bits);
                    for rd in 0..cfg.repl_d {
                        let cell = &mut cells[rp][rd];
                        if let Some(ref flip_flop) = rport.flip_flop {
                            if rpcfg.emit_en {
                                cell.add_input(format!("PORT_{pname}_RD_EN"), flip_flop.enable.into_pos(design));
                            }
                            if !flip_flop.clear.is_always(false) {
                                cell.add_input(format!("PORT_{pname}_RD_ARST"), flip_flop.clear.into_pos(design));
                                cell.add_param(format!("PORT_{pname}_RD_ARST_USED"), true);
                            }
                            if !flip_flop.reset.is_always(false) {
                                cell.add_input(format!("PORT_{pname}_RD_SRST"), flip_flop.reset.into_pos(design));
                                cell.add_param(format!("PORT_{pname}_RD_SRST_USED"), true);
                                cell.add_param(format!("PORT_{pname}_RD_CE_OVER_SRST"), !flip_flop.reset_over_enable);
                            }
                        }
                        for (name, value) in &rpcfg.resetvals {
                            let mut swizzled = Const::new();
                            for bit in &port_swz.bits[rd] {
                                if bit.valid {
                                    swizzled.push(value[bit.bit]);
                                } else {
                                    swizzled.push(Trit::Undef);
                                }
                            }
                            cell.add_param(format!("PORT_{pname}_{name}"), swizzled);
                        }
                        let range = cell.add_output(format!("PORT_{pname}_RD_DATA"), dims.dbits[hw_rd_wide_log2]);
                        for (offset, bit) in port_swz.bits[rd].iter().enumerate() {
                            if bit.valid {
                                connections[rp][rd].push((range.start + offset, big_rdata[bit.mux_idx][bit.bit]));
                            }
                        }
                    }
                }
            }
        }
    }

    for (rp, replica) in cells.into_iter().enumerate() {
        for (rd, cell) in replica.into_iter().enumerate() {
            let cell_output = design.add_other(cell);
            for &(offset, net) in &connections[rp][rd] {
                design.replace_net(net, cell_output[offset]);
            }
        }
    }
}
