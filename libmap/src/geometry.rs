//! Geometry exploration: for every candidate, pick the base width, the hard-wide bit mask, and
//! the data swizzle that minimise the cost function.
//!
//! The search is intentionally greedy: hard wide bits are added one at a time, preferring bits
//! that work towards unmet minimum-width constraints, then uniformly-written bits (needed below
//! the byte width), then the rest; every successful addition is evaluated and the cheapest
//! configuration seen wins.  The ordering is part of the contract — it decides cost outcomes on
//! existing libraries.

use memlib_netlist::{Memory, Net};

use crate::library::{Library, MemoryDimsDef};
use crate::map::{MemConfig, FACTOR_DEMUX, FACTOR_EMU, FACTOR_MUX};

/// Translates a width progression restriction into an inclusive range of dbits indices.
pub(crate) fn xlat_width_range(dims: &MemoryDimsDef, widths: &[usize]) -> (usize, usize) {
    let Some(&first) = widths.first() else { return (0, dims.dbits.len() - 1) };
    for (index, &dbit) in dims.dbits.iter().enumerate() {
        if dbit == first {
            return (index, index + widths.len() - 1);
        }
    }
    unreachable!("port width list validated against the dims progression");
}

/// Byte boundaries: bit positions in the source word where a write enable differs from the
/// previous bit in any wide sub-word of any write port.  Bit 0 always starts a byte.
fn byte_boundaries(mem: &Memory) -> Vec<bool> {
    let mut boundary = vec![false; mem.width];
    if mem.width > 0 {
        boundary[0] = true;
    }
    for port in &mem.write_ports {
        for sub in 0..1 << port.wide_log2(mem) {
            for bit in 1..mem.width {
                let pos = sub * mem.width + bit;
                if port.mask[pos] != port.mask[pos - 1] {
                    boundary[bit] = true;
                }
            }
        }
    }
    boundary
}

/// The number of distinct write enable signals of each write port.
fn wren_sizes(mem: &Memory) -> Vec<usize> {
    mem.write_ports
        .iter()
        .map(|port| {
            let mut nets: Vec<Net> = port.mask.iter().collect();
            nets.sort();
            nets.dedup();
            nets.len()
        })
        .collect()
}

pub(crate) fn handle_geom(mem: &Memory, lib: &Library, cfgs: &mut [MemConfig]) {
    let byte_boundary = byte_boundaries(mem);
    let wren_size = wren_sizes(mem);

    let max_wr_wide_log2 = mem.write_ports.iter().map(|port| port.wide_log2(mem)).max().unwrap_or(0);
    let max_wide_log2 =
        max_wr_wide_log2.max(mem.read_ports.iter().map(|port| port.wide_log2(mem)).max().unwrap_or(0));

    for cfg in cfgs.iter_mut() {
        let rdef = &lib.ram_defs[cfg.ram_def];
        let dims = &rdef.dims[cfg.dims_def].val;
        let mut got_config = false;
        let mut best_cost = 0.0f64;

        let wr_width_range: Vec<(usize, usize)> = cfg
            .wr_ports
            .iter()
            .map(|pcfg| {
                let wdef = &rdef.ports[pcfg.port_def].val.width[pcfg.width_def].val;
                xlat_width_range(dims, &wdef.wr_widths)
            })
            .collect();
        let rd_width_range: Vec<(usize, usize)> = cfg
            .rd_ports
            .iter()
            .map(|pcfg| {
                let wdef = &rdef.ports[pcfg.port_def].val.width[pcfg.width_def].val;
                xlat_width_range(dims, if wdef.tied { &wdef.wr_widths } else { &wdef.rd_widths })
            })
            .collect();

        let mut byte_width_log2 = 0;
        for (index, &dbit) in dims.dbits.iter().enumerate() {
            if cfg.byte >= dbit {
                byte_width_log2 = index;
            }
        }
        if cfg.byte == 0 {
            byte_width_log2 = dims.dbits.len() - 1;
        }

        // Classify the wide address bits of the write ports: a bit is uniform if widening
        // through it keeps the write enables identical between the two halves.
        let mut wide_nu_start = max_wide_log2;
        let mut wide_nu_end = max_wr_wide_log2;
        for (pidx, port) in mem.write_ports.iter().enumerate() {
            let pcfg = &cfg.wr_ports[pidx];
            let wdef = &rdef.ports[pcfg.port_def].val.width[pcfg.width_def].val;
            let wide_log2 = port.wide_log2(mem);
            for bit in 0..wide_log2 {
                let mut uniform = true;
                let mut sub = 0;
                while sub < 1 << wide_log2 {
                    let lo = port.mask.slice(sub * mem.width..(sub + (1 << bit)) * mem.width);
                    let hi = port
                        .mask
                        .slice((sub + (1 << bit)) * mem.width..(sub + (2 << bit)) * mem.width);
                    if lo != hi {
                        uniform = false;
                    }
                    sub += 2 << bit;
                }
                if !uniform {
                    wide_nu_start = wide_nu_start.min(bit);
                    break;
                }
            }
            if wdef.tied {
                if let Some(rd_port) = pcfg.rd_port {
                    // A merged read port wider than its tied write port forces the write port to
                    // be artificially widened, with the added bits driven by non-uniform enables.
                    let rd_wide_log2 = mem.read_ports[rd_port].wide_log2(mem);
                    if rd_wide_log2 > wide_log2 {
                        wide_nu_start = wide_nu_start.min(wide_log2);
                        wide_nu_end = wide_nu_end.max(rd_wide_log2);
                    }
                }
            }
        }

        // The lowest base width any port can use.
        let mut start_base = dims.dbits.len() - 1;
        for &(lo, _) in wr_width_range.iter().chain(&rd_width_range) {
            start_base = start_base.min(lo);
        }

        'base: for base_width_log2 in start_base..dims.dbits.len() {
            // The data bits actually available: usually dbits[base], smaller when a max-width
            // restriction bites.  Such configurations are only useful to satisfy a minimum width.
            let mut unit_width_log2 = base_width_log2;
            for &(_, hi) in wr_width_range.iter().chain(&rd_width_range) {
                unit_width_log2 = unit_width_log2.min(hi);
            }
            if unit_width_log2 != base_width_log2 && got_config {
                break 'base;
            }
            let unit_width = dims.dbits[unit_width_log2];

            // Effective byte width: the granularity of write enables.
            let mut effective_byte = cfg.byte;
            if cfg.byte == 0 || cfg.byte > unit_width {
                effective_byte = unit_width;
            }
            if mem.write_ports.is_empty() {
                effective_byte = 1;
            }
            assert_eq!(unit_width % effective_byte, 0);

            // Emit source bits in order, padding to byte alignment at each byte boundary.
            let mut swizzle: Vec<Option<usize>> = vec![];
            for bit in 0..mem.width {
                if byte_boundary[bit] {
                    while swizzle.len() % effective_byte != 0 {
                        swizzle.push(None);
                    }
                }
                swizzle.push(Some(bit));
            }
            while swizzle.len() % effective_byte != 0 {
                swizzle.push(None);
            }

            let mut hard_wide_mask: u32 = 0;
            let mut hard_wide_num = 0usize;
            let mut byte_failed = false;
            'extend: loop {
                // Check the minimum width constraints.  They only matter for write ports below
                // the byte width; wider ports can emulate a narrow write with enables.
                let mut min_width_ok = true;
                let mut min_width_bit = wide_nu_start;
                for (pidx, port) in mem.write_ports.iter().enumerate() {
                    let wide_log2 = port.wide_log2(mem);
                    let hard_below = (0..wide_log2).filter(|&bit| hard_wide_mask & 1 << bit != 0).count();
                    let width = base_width_log2 + hard_below;
                    if width < wr_width_range[pidx].0 && width < byte_width_log2 {
                        min_width_ok = false;
                        min_width_bit = min_width_bit.min(wide_log2);
                    }
                }

                if min_width_ok {
                    let emu_wide_bits = max_wide_log2 - hard_wide_num;
                    let mult_wide = 1usize << emu_wide_bits;
                    let addrs = 1usize << (dims.abits - base_width_log2 + emu_wide_bits);
                    let min_addr = mem.start_offset / addrs;
                    let max_addr = (mem.start_offset + mem.depth - 1) / addrs;
                    let mult_a = max_addr - min_addr + 1;
                    let bits = mult_a * mult_wide * swizzle.len();
                    let repl_d = bits.div_ceil(unit_width);
                    let mut score_demux = 0usize;
                    for (pidx, port) in mem.write_ports.iter().enumerate() {
                        let wide_log2 = port.wide_log2(mem);
                        let soft_below = (0..wide_log2).filter(|&bit| hard_wide_mask & 1 << bit == 0).count();
                        let soft = emu_wide_bits - soft_below;
                        if soft != 0 || mult_a != 1 {
                            score_demux += (mult_a << soft) * wren_size[pidx];
                        }
                    }
                    let mut score_mux = 0usize;
                    for port in &mem.read_ports {
                        let wide_log2 = port.wide_log2(mem);
                        let soft_below = (0..wide_log2).filter(|&bit| hard_wide_mask & 1 << bit == 0).count();
                        let soft = emu_wide_bits - soft_below;
                        score_mux += ((mult_a << soft) - 1) * port.data_len;
                    }
                    let cost = dims.cost * repl_d as f64 * cfg.repl_port as f64
                        + score_mux as f64 * FACTOR_MUX
                        + score_demux as f64 * FACTOR_DEMUX
                        + cfg.score_emu as f64 * FACTOR_EMU;
                    if !got_config || cost < best_cost {
                        cfg.base_width_log2 = base_width_log2;
                        cfg.unit_width_log2 = unit_width_log2;
                        cfg.swizzle = swizzle.clone();
                        cfg.hard_wide_mask = hard_wide_mask;
                        cfg.emu_wide_mask = ((1u32 << max_wide_log2) - 1) & !hard_wide_mask;
                        cfg.repl_d = repl_d;
                        cfg.score_demux = score_demux;
                        cfg.score_mux = score_mux;
                        cfg.cost = cost;
                        best_cost = cost;
                        got_config = true;
                    }
                }

                if dims.tied {
                    break 'extend;
                }

                // Pick the next bit to add to the hard wide mask.
                'pick: loop {
                    let (scan_from, scan_to, retry) = if !min_width_ok {
                        // Work towards the unmet minimum width limits, highest useful bit first.
                        (min_width_bit, 0, false)
                    } else if byte_failed {
                        // Uniform bits ran out; take bits only involved in reads.
                        (max_wide_log2, wide_nu_end, false)
                    } else if base_width_log2 + hard_wide_num < byte_width_log2 {
                        // Still below the byte width: only uniform bits keep enables legal.
                        (wide_nu_start, 0, true)
                    } else {
                        (max_wide_log2, 0, false)
                    };
                    let mut candidate = None;
                    let mut bit = scan_from;
                    while bit > scan_to {
                        bit -= 1;
                        if hard_wide_mask & 1 << bit == 0 {
                            candidate = Some(bit);
                            break;
                        }
                    }
                    let Some(bit) = candidate else {
                        if retry {
                            byte_failed = true;
                            continue 'pick;
                        }
                        break 'extend;
                    };
                    let new_mask = hard_wide_mask | 1 << bit;
                    // Check the maximum width constraints against the extended mask.
                    let mut max_width_ok = true;
                    for (pidx, port) in mem.write_ports.iter().enumerate() {
                        let wide_log2 = port.wide_log2(mem);
                        let hard_below = (0..wide_log2).filter(|&bit| new_mask & 1 << bit != 0).count();
                        if base_width_log2 + hard_below > wr_width_range[pidx].1 {
                            max_width_ok = false;
                        }
                    }
                    for (pidx, port) in mem.read_ports.iter().enumerate() {
                        let wide_log2 = port.wide_log2(mem);
                        let hard_below = (0..wide_log2).filter(|&bit| new_mask & 1 << bit != 0).count();
                        if base_width_log2 + hard_below > rd_width_range[pidx].1 {
                            max_width_ok = false;
                        }
                    }
                    if !max_width_ok {
                        if retry {
                            byte_failed = true;
                            continue 'pick;
                        }
                        break 'extend;
                    }
                    hard_wide_mask = new_mask;
                    hard_wide_num += 1;
                    break 'pick;
                }
            }
        }
        assert!(got_config, "geometry exploration found no feasible configuration");
        if lib.opts.debug_geom {
            log::debug!(
                "geometry for {}: base {} unit {} hard {:#x} repl_d {} cost {}",
                rdef.id,
                dims.dbits[cfg.base_width_log2],
                dims.dbits[cfg.unit_width_log2],
                cfg.hard_wide_mask,
                cfg.repl_d,
                cfg.cost,
            );
        }
    }
}
