use std::collections::{BTreeMap, BTreeSet};

use memlib_libmap::{parse_library_str, Library, MemMapping, PassOptions, StructuralOracle};
use memlib_netlist::{Const, Design, Memory, MemoryPortRelation, MemoryReadPort, MemoryWritePort, Net, Value};

fn parse_library(source: &str) -> Library {
    let mut lib = Library::new(PassOptions::default(), BTreeSet::new());
    parse_library_str(&mut lib, "<test>", source).unwrap();
    lib
}

/// A memory with a read-before-write constraint between its only two ports, on one clock.
fn read_first_memory(design: &Design) -> Memory {
    let clk = design.add_input("clk", 1)[0];
    let waddr = design.add_input("waddr", 4);
    let raddr = design.add_input("raddr", 4);
    let wdata = design.add_input("wdata", 8);
    let wen = design.add_input("wen", 1)[0];
    let mask = Value::from_iter(std::iter::repeat_n(wen, 8));
    let mut read_port = MemoryReadPort::clocked(raddr, 8, Net::from(clk));
    read_port.flip_flop.as_mut().unwrap().relations = vec![MemoryPortRelation::ReadBeforeWrite];
    Memory {
        depth: 16,
        width: 8,
        start_offset: 0,
        init_value: Const::undef(16 * 8),
        attributes: BTreeMap::new(),
        write_ports: vec![MemoryWritePort::new(Net::from(clk), waddr, wdata, mask)],
        read_ports: vec![read_port],
    }
}

#[test]
fn test_read_first_emulated_without_capability() {
    // No `wrtrans` capability at all: the read-before-write pair can only be upheld by the
    // read-first rewrite, which turns the pair transparent and emulates the transparency.
    let lib = parse_library(concat!(
        "ram block $__TEST_BRAM {\n",
        "    abits 4 dbits 8 cost 2.0;\n",
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
    let memory = read_first_memory(&design);
    let mut oracle = StructuralOracle::new();
    let mapping = MemMapping::new(&design, &memory, &lib, &mut oracle).unwrap();
    assert_eq!(mapping.cfgs.len(), 1);
    let cfg = &mapping.cfgs[0];
    assert!(cfg.emu_read_first);
    assert_eq!(cfg.rd_ports[0].emu_trans, vec![0]);
    // 3 per write port for read-first, 3 for the soft transparency, 1 unshared-read tiebreak.
    assert_eq!(cfg.score_emu, 7);
    let selected = mapping.select().unwrap().unwrap();
    assert!(mapping.cfgs[selected].emu_read_first);
}

#[test]
fn test_read_first_native_capability_wins() {
    // With a `wrtrans other old` capability the pair is served natively; the read-first fork
    // loses the pre-geometry prune on emulation score.
    let lib = parse_library(concat!(
        "ram block $__TEST_BRAM {\n",
        "    abits 4 dbits 8 cost 2.0;\n",
        "    port sr \"R\" {\n",
        "        clock posedge;\n",
        "        rden none;\n",
        "    }\n",
        "    port sw \"W\" {\n",
        "        clock posedge;\n",
        "        wrtrans other old;\n",
        "    }\n",
        "}\n",
    ));
    let design = Design::new();
    let memory = read_first_memory(&design);
    let mut oracle = StructuralOracle::new();
    let mapping = MemMapping::new(&design, &memory, &lib, &mut oracle).unwrap();
    assert_eq!(mapping.cfgs.len(), 1);
    let cfg = &mapping.cfgs[0];
    assert!(!cfg.emu_read_first);
    assert!(cfg.rd_ports[0].emu_trans.is_empty());
    assert_eq!(cfg.score_emu, 1);
}
