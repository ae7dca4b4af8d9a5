use std::collections::BTreeMap;

use memlib_memory::MemoryExt;
use memlib_netlist::{
    Cell, Const, ControlNet, Design, Memory, MemoryPortRelation, MemoryReadPort, MemoryWritePort, Net, Value,
};

fn read_first_memory(design: &Design) -> Memory {
    let clk = design.add_input("clk", 1)[0];
    let waddr = design.add_input("waddr", 3);
    let raddr = design.add_input("raddr", 3);
    let wdata = design.add_input("wdata", 4);
    let wen = design.add_input("wen", 1)[0];
    let mask = Value::from_iter(std::iter::repeat_n(wen, 4));
    let mut read_port = MemoryReadPort::clocked(raddr, 4, Net::from(clk));
    read_port.flip_flop.as_mut().unwrap().relations = vec![MemoryPortRelation::ReadBeforeWrite];
    Memory {
        depth: 8,
        width: 4,
        start_offset: 0,
        init_value: Const::undef(32),
        attributes: BTreeMap::new(),
        write_ports: vec![MemoryWritePort::new(Net::from(clk), waddr, wdata, mask)],
        read_ports: vec![read_port],
    }
}

#[test]
fn test_ok_conditions() {
    let design = Design::new();
    let mut memory = read_first_memory(&design);
    assert!(memory.emulate_read_first_ok());

    // No read-before-write relation left: nothing to do.
    memory.read_ports[0].flip_flop.as_mut().unwrap().relations = vec![MemoryPortRelation::Undefined];
    assert!(!memory.emulate_read_first_ok());

    // A transparent and a read-before-write relation against the same write port conflict.
    let mut memory = read_first_memory(&design);
    let raddr2 = design.add_input("raddr2", 3);
    let mut second = MemoryReadPort::clocked(raddr2, 4, memory.read_ports[0].flip_flop.as_ref().unwrap().clock);
    second.flip_flop.as_mut().unwrap().relations = vec![MemoryPortRelation::Transparent];
    memory.read_ports.push(second);
    assert!(!memory.emulate_read_first_ok());

    // An asynchronous read port rules the rewrite out.
    let mut memory = read_first_memory(&design);
    let raddr2 = design.add_input("raddr3", 3);
    memory.read_ports.push(MemoryReadPort::asynchronous(raddr2, 4));
    assert!(!memory.emulate_read_first_ok());
}

#[test]
fn test_rewrite() {
    let design = Design::new();
    let mut memory = read_first_memory(&design);
    let old_clock = memory.write_ports[0].clock.unwrap();
    memory.emulate_read_first(&design);

    // The write port is delayed by half a cycle: inverted clock, registered inputs.
    let port = &memory.write_ports[0];
    assert_eq!(port.clock, Some(!old_clock));
    for value in [&port.addr, &port.data, &port.mask] {
        let (cell_ref, _) = design.find_cell(value[0]).unwrap();
        assert!(matches!(&*cell_ref.get(), Cell::Dff(_)));
    }
    // The delayed pair now behaves transparently.
    let flip_flop = memory.read_ports[0].flip_flop.as_ref().unwrap();
    assert_eq!(flip_flop.relations[0], MemoryPortRelation::Transparent);
}

#[test]
fn test_rewrite_keeps_unrelated_ports() {
    let design = Design::new();
    let mut memory = read_first_memory(&design);
    let clk2 = design.add_input("clk2", 1)[0];
    let waddr2 = design.add_input("waddr2", 3);
    let wdata2 = design.add_input("wdata2", 4);
    let second = MemoryWritePort::new(ControlNet::Pos(clk2), waddr2.clone(), wdata2, Value::ones(4));
    memory.write_ports.push(second);
    memory.read_ports[0].flip_flop.as_mut().unwrap().relations.push(MemoryPortRelation::Undefined);
    // The second write port is in another clock domain, so the rewrite does not apply.
    assert!(!memory.emulate_read_first_ok());
}
