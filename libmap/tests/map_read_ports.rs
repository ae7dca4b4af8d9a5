use std::collections::{BTreeMap, BTreeSet};

use memlib_libmap::{map_memories, parse_library_str, Library, MemMapping, PassOptions, StructuralOracle};
use memlib_netlist::{
    Cell, Const, Design, Memory, MemoryPortRelation, MemoryReadPort, MemoryWritePort, Net, Value,
};

fn parse_library(source: &str) -> Library {
    let mut lib = Library::new(PassOptions::default(), BTreeSet::new());
    parse_library_str(&mut lib, "<test>", source).unwrap();
    lib
}

/// A LUT RAM whose only read ports are asynchronous.
fn lutram_library() -> Library {
    parse_library(concat!(
        "ram distributed $__TEST_LUTRAM {\n",
        "    abits 4 dbits 16 cost 4.0;\n",
        "    port ar \"R\" { }\n",
        "    port sw \"W\" {\n",
        "        clock posedge;\n",
        "    }\n",
        "}\n",
    ))
}

fn dual_port_memory(design: &Design) -> Memory {
    let clk = design.add_input("clk", 1)[0];
    let waddr = design.add_input("waddr", 4);
    let raddr = design.add_input("raddr", 4);
    let wdata = design.add_input("wdata", 16);
    let wen = design.add_input("wen", 1)[0];
    let mask = Value::from_iter(std::iter::repeat_n(wen, 16));
    let mut read_port = MemoryReadPort::clocked(raddr, 16, Net::from(clk));
    read_port.flip_flop.as_mut().unwrap().relations = vec![MemoryPortRelation::Undefined];
    Memory {
        depth: 16,
        width: 16,
        start_offset: 0,
        init_value: Const::undef(16 * 16),
        attributes: BTreeMap::new(),
        write_ports: vec![MemoryWritePort::new(Net::from(clk), waddr, wdata, mask)],
        read_ports: vec![read_port],
    }
}

#[test]
fn test_sync_read_on_async_port() {
    let lib = lutram_library();
    let design = Design::new();
    let memory = dual_port_memory(&design);
    let mut oracle = StructuralOracle::new();
    let mapping = MemMapping::new(&design, &memory, &lib, &mut oracle).unwrap();
    // The synchronous read port lands on the asynchronous RAM port; an output register is
    // materialized at emission.
    assert_eq!(mapping.cfgs.len(), 1);
    let cfg = &mapping.cfgs[0];
    assert!(cfg.rd_ports[0].emu_sync);
    assert_eq!(cfg.rd_ports[0].wr_port, None);
    assert_eq!(cfg.score_emu, 1);
    assert_eq!(cfg.repl_port, 1);
    assert_eq!(cfg.repl_d, 1);
}

#[test]
fn test_sync_read_emission_adds_register() {
    let lib = lutram_library();
    let mut design = Design::new();
    let memory = dual_port_memory(&design);
    let output = design.add_memory(memory);
    design.add_output("rdata", output);
    map_memories(&mut design, &lib).unwrap();

    let mut dffs = 0;
    let mut instances = 0;
    for cell_ref in design.iter_cells() {
        match &*cell_ref.get() {
            Cell::Memory(_) => panic!("abstract memory left in design"),
            Cell::Dff(flip_flop) => {
                dffs += 1;
                assert_eq!(flip_flop.output_len(), 16);
            }
            Cell::Other(instance) => {
                instances += 1;
                assert_eq!(instance.kind, "$__TEST_LUTRAM");
            }
            _ => (),
        }
    }
    assert_eq!(dffs, 1);
    assert_eq!(instances, 1);
}

#[test]
fn test_async_source_rejected_on_sync_only_library() {
    let lib = parse_library(concat!(
        "ram block $__TEST_BRAM {\n",
        "    abits 4 dbits 16 cost 4.0;\n",
        "    port sr \"R\" {\n",
        "        clock posedge;\n",
        "        rden none;\n",
        "    }\n",
        "    port sw \"W\" {\n",
        "        clock posedge;\n",
        "    }\n",
        "}\n",
    ));
    let design = Design::new();
    let mut memory = dual_port_memory(&design);
    // Make the read port asynchronous: no synchronous-read RAM port can serve it.
    let addr = memory.read_ports[0].addr.clone();
    memory.read_ports[0] = MemoryReadPort::asynchronous(addr, 16);
    let mut oracle = StructuralOracle::new();
    let mapping = MemMapping::new(&design, &memory, &lib, &mut oracle).unwrap();
    assert!(mapping.cfgs.is_empty());
    // All write ports share one clock, so the memory falls back to soft logic.
    assert_eq!(mapping.select().unwrap(), None);
}

#[test]
fn test_async_write_unmappable() {
    let lib = lutram_library();
    let design = Design::new();
    let mut memory = dual_port_memory(&design);
    memory.write_ports[0].clock = None;
    let mut oracle = StructuralOracle::new();
    let mapping = MemMapping::new(&design, &memory, &lib, &mut oracle).unwrap();
    assert!(mapping.cfgs.is_empty());
    assert!(!mapping.logic_ok);
    assert!(mapping.select().is_err());
}
