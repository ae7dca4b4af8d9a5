use std::collections::BTreeMap;

use memlib_memory::MemoryExt;
use memlib_netlist::{Cell, Const, Design, Memory, MemoryReadPort, MemoryWritePort, Net, Value};

/// A 32-deep memory to be split into 16-deep tiles: one soft-decoded address bit.
fn deep_memory(design: &Design) -> (Memory, Value) {
    let clk = design.add_input("clk", 1)[0];
    let waddr = design.add_input("waddr", 5);
    let raddr = design.add_input("raddr", 5);
    let wdata = design.add_input("wdata", 4);
    let wen = design.add_input("wen", 1)[0];
    let mask = Value::from_iter(std::iter::repeat_n(wen, 4));
    let memory = Memory {
        depth: 32,
        width: 4,
        start_offset: 0,
        init_value: Const::undef(32 * 4),
        attributes: BTreeMap::new(),
        write_ports: vec![MemoryWritePort::new(Net::from(clk), waddr, wdata, mask)],
        read_ports: vec![MemoryReadPort::asynchronous(raddr, 4)],
    };
    let output = design.add_memory(memory.clone());
    (memory, output)
}

#[test]
fn test_demux_tiles() {
    let design = Design::new();
    let (memory, _output) = deep_memory(&design);
    let big_wren = memory.generate_demux(&design, 0, 4, &[]);
    // Two 16-word chunks, each gated by the high address bit.
    assert_eq!(big_wren.len(), 2);
    for tile in &big_wren {
        assert_eq!(tile.len(), 4);
    }
    // The gating differs between the tiles.
    assert_ne!(big_wren[0], big_wren[1]);
}

#[test]
fn test_mux_tiles() {
    let mut design = Design::new();
    let (memory, output) = deep_memory(&design);
    design.add_output("rdata", output.clone());
    let big_rdata = memory.generate_mux(&design, &output, 0, 4, &[]);
    assert_eq!(big_rdata.len(), 2);
    // Drive the tiles with distinct signals and check the output became a mux of them.
    let tile0 = design.add_input("tile0", 4);
    let tile1 = design.add_input("tile1", 4);
    design.replace_value(&big_rdata[0], &tile0);
    design.replace_value(&big_rdata[1], &tile1);
    design.apply();
    let mut muxes = 0;
    for cell_ref in design.iter_cells() {
        if let Cell::Mux(_, arg1, arg2) = &*cell_ref.get() {
            muxes += 1;
            assert_eq!(arg1, &tile1);
            assert_eq!(arg2, &tile0);
        }
    }
    assert_eq!(muxes, 1);
}

#[test]
fn test_single_tile_passthrough() {
    let design = Design::new();
    let (memory, output) = deep_memory(&design);
    let before = design.cell_count();
    let big_rdata = memory.generate_mux(&design, &output, 0, 5, &[]);
    assert_eq!(big_rdata.len(), 1);
    // One tile covers the whole array: only the collection voids are added, no muxing.
    assert_eq!(design.cell_count(), before + 1);
}

#[test]
fn test_priority_gates_earlier_port() {
    let design = Design::new();
    let clk = design.add_input("clk", 1)[0];
    let addr1 = design.add_input("addr1", 3);
    let addr2 = design.add_input("addr2", 3);
    let data = design.add_input("data", 4);
    let en1 = design.add_input("en1", 1)[0];
    let en2 = design.add_input("en2", 1)[0];
    let mut port1 = MemoryWritePort::new(Net::from(clk), addr1, data.clone(), Value::from_iter(std::iter::repeat_n(en1, 4)));
    port1.priority_mask = vec![false];
    let mut port2 = MemoryWritePort::new(Net::from(clk), addr2, data.clone(), Value::from_iter(std::iter::repeat_n(en2, 4)));
    port2.priority_mask = vec![true, false];
    let mut memory = Memory {
        depth: 8,
        width: 4,
        start_offset: 0,
        init_value: Const::undef(32),
        attributes: BTreeMap::new(),
        write_ports: vec![port1, port2],
        read_ports: vec![],
    };
    let old_mask = memory.write_ports[0].mask.clone();
    memory.emulate_priority(&design, 0, 1);
    assert_ne!(memory.write_ports[0].mask, old_mask);
    assert!(!memory.write_ports[1].priority_mask[0]);
    // The later port is untouched.
    assert!(memory.write_ports[1].mask.iter().all(|net| net == en2));
}
