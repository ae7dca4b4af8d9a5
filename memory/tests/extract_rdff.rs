use std::collections::BTreeMap;

use memlib_memory::MemoryExt;
use memlib_netlist::{
    Cell, Const, ControlNet, Design, Memory, MemoryPortRelation, MemoryReadPort, MemoryWritePort, Net, Value,
};

fn sync_read_memory(design: &Design, relation: MemoryPortRelation) -> (Memory, Value) {
    let clk = design.add_input("clk", 1)[0];
    let waddr = design.add_input("waddr", 3);
    let raddr = design.add_input("raddr", 3);
    let wdata = design.add_input("wdata", 4);
    let wen = design.add_input("wen", 1)[0];
    let mask = Value::from_iter(std::iter::repeat_n(wen, 4));
    let mut read_port = MemoryReadPort::clocked(raddr, 4, Net::from(clk));
    read_port.flip_flop.as_mut().unwrap().relations = vec![relation];
    let memory = Memory {
        depth: 8,
        width: 4,
        start_offset: 0,
        init_value: Const::undef(32),
        attributes: BTreeMap::new(),
        write_ports: vec![MemoryWritePort::new(Net::from(clk), waddr, wdata, mask)],
        read_ports: vec![read_port],
    };
    let output = design.add_memory(memory.clone());
    (memory, output)
}

fn count_cells(design: &Design, matcher: impl Fn(&Cell) -> bool) -> usize {
    design.iter_cells().filter(|cell_ref| matcher(&cell_ref.get())).count()
}

#[test]
fn test_extract_plain() {
    let design = Design::new();
    let (mut memory, mut output) = sync_read_memory(&design, MemoryPortRelation::Undefined);
    let clock = memory.read_ports[0].flip_flop.as_ref().unwrap().clock;
    memory.extract_rdff(&design, 0, &mut output);
    assert!(memory.read_ports[0].flip_flop.is_none());
    assert_eq!(count_cells(&design, |cell| matches!(cell, Cell::Dff(_))), 1);
    for cell_ref in design.iter_cells() {
        if let Cell::Dff(flip_flop) = &*cell_ref.get() {
            assert_eq!(flip_flop.clock, clock);
            assert_eq!(flip_flop.output_len(), 4);
        }
    }
    // The port output was rewired onto fresh nets to be driven by the now-asynchronous port.
    assert!(design.find_cell(output[0]).is_ok());
}

#[test]
fn test_extract_transparent_adds_bypass() {
    let design = Design::new();
    let (mut memory, mut output) = sync_read_memory(&design, MemoryPortRelation::Transparent);
    memory.extract_rdff(&design, 0, &mut output);
    assert!(memory.read_ports[0].flip_flop.is_none());
    // Transparency is folded in ahead of the register: address compare plus per-bit muxes.
    assert_eq!(count_cells(&design, |cell| matches!(cell, Cell::Dff(_))), 1);
    assert_eq!(count_cells(&design, |cell| matches!(cell, Cell::Eq(_, _))), 1);
    assert_eq!(count_cells(&design, |cell| matches!(cell, Cell::Mux(_, _, _))), 4);
}

#[test]
fn test_extract_async_is_noop() {
    let design = Design::new();
    let raddr = design.add_input("raddr", 3);
    let mut memory = Memory {
        depth: 8,
        width: 4,
        start_offset: 0,
        init_value: Const::undef(32),
        attributes: BTreeMap::new(),
        write_ports: vec![],
        read_ports: vec![MemoryReadPort::asynchronous(raddr, 4)],
    };
    let mut output = design.add_memory(memory.clone());
    let before = design.cell_count();
    memory.extract_rdff(&design, 0, &mut output);
    assert_eq!(design.cell_count(), before);
}

#[test]
fn test_emulate_reset_moves_values() {
    let design = Design::new();
    let (mut memory, mut output) = sync_read_memory(&design, MemoryPortRelation::Undefined);
    let arst = design.add_input("arst", 1)[0];
    {
        let flip_flop = memory.read_ports[0].flip_flop.as_mut().unwrap();
        flip_flop.clear = ControlNet::Pos(arst);
        flip_flop.clear_value = Const::zero(4);
        flip_flop.init_value = Const::ones(4);
    }
    memory.emulate_reset(&design, 0, true, true, false, &mut output);
    let flip_flop = memory.read_ports[0].flip_flop.as_ref().unwrap();
    assert!(!flip_flop.has_clear());
    assert!(!flip_flop.has_init_value());
    // A data/mask register pair plus four bypass muxes.
    assert_eq!(count_cells(&design, |cell| matches!(cell, Cell::Dff(_))), 2);
    assert_eq!(count_cells(&design, |cell| matches!(cell, Cell::Mux(_, _, _))), 4);
}
