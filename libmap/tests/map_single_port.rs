use std::collections::{BTreeMap, BTreeSet};

use memlib_libmap::{map_memories, parse_library_str, Library, MemMapping, PassOptions, StructuralOracle};
use memlib_netlist::{
    Cell, Const, Design, Memory, MemoryPortRelation, MemoryReadPort, MemoryWritePort, Net, ParamValue, Value,
};

fn parse_library(source: &str) -> Library {
    let mut lib = Library::new(PassOptions::default(), BTreeSet::new());
    parse_library_str(&mut lib, "<test>", source).unwrap();
    lib
}

fn spram_library() -> Library {
    parse_library(concat!(
        "ram block $__TEST_SPRAM {\n",
        "    abits 12 dbits 8 16 32 cost 8.0;\n",
        "    port srsw \"A\" {\n",
        "        clock posedge;\n",
        "        rden none;\n",
        "        wrtrans self new;\n",
        "    }\n",
        "}\n",
    ))
}

/// A 1024x32 single-port RAM: synchronous write and transparent synchronous read sharing one
/// clock and one address.
fn spram_memory(design: &Design) -> Memory {
    let clk = design.add_input("clk", 1)[0];
    let addr = design.add_input("addr", 10);
    let wdata = design.add_input("wdata", 32);
    let wen = design.add_input("wen", 1)[0];
    let mask = Value::from_iter(std::iter::repeat_n(wen, 32));
    let mut read_port = MemoryReadPort::clocked(addr.clone(), 32, Net::from(clk));
    read_port.flip_flop.as_mut().unwrap().relations = vec![MemoryPortRelation::Transparent];
    Memory {
        depth: 1024,
        width: 32,
        start_offset: 0,
        init_value: Const::undef(1024 * 32),
        attributes: BTreeMap::new(),
        write_ports: vec![MemoryWritePort::new(Net::from(clk), addr, wdata, mask)],
        read_ports: vec![read_port],
    }
}

#[test]
fn test_shared_port_transparency() {
    let lib = spram_library();
    let design = Design::new();
    let memory = spram_memory(&design);
    let mut oracle = StructuralOracle::new();
    let mapping = MemMapping::new(&design, &memory, &lib, &mut oracle).unwrap();
    assert_eq!(mapping.cfgs.len(), 1);
    let cfg = &mapping.cfgs[0];
    // The read port merges with the write port; the native `wrtrans self new` capability covers
    // the transparency request with no emulation.
    assert_eq!(cfg.wr_ports[0].rd_port, Some(0));
    assert_eq!(cfg.rd_ports[0].wr_port, Some(0));
    assert!(cfg.rd_ports[0].emu_trans.is_empty());
    assert!(!cfg.rd_ports[0].emu_en);
    assert_eq!(cfg.score_emu, 0);
    // The widest geometry wins: one 32-bit unit covers the whole array.
    assert_eq!(cfg.base_width_log2, 2);
    assert_eq!(cfg.repl_d, 1);
    assert_eq!(cfg.repl_port, 1);
    assert_eq!(cfg.cost, 8.0);
}

#[test]
fn test_shared_port_emission() {
    let lib = spram_library();
    let mut design = Design::new();
    let memory = spram_memory(&design);
    let output = design.add_memory(memory);
    design.add_output("rdata", output);
    map_memories(&mut design, &lib).unwrap();

    let mut instances = 0;
    for cell_ref in design.iter_cells() {
        match &*cell_ref.get() {
            Cell::Memory(_) => panic!("abstract memory left in design"),
            Cell::Other(instance) => {
                instances += 1;
                assert_eq!(instance.kind, "$__TEST_SPRAM");
                assert_eq!(instance.get_param("ABITS"), Some(&ParamValue::Int(12)));
                assert_eq!(instance.get_param("PORT_A_USED"), Some(&ParamValue::from(true)));
                assert_eq!(instance.get_param("PORT_A_WR_USED"), Some(&ParamValue::from(true)));
                assert_eq!(instance.get_param("PORT_A_RD_USED"), Some(&ParamValue::from(true)));
                assert_eq!(instance.get_param("PORT_A_WIDTH"), Some(&ParamValue::Int(32)));
                // One enable bit per 32-bit unit.
                assert_eq!(instance.get_param("PORT_A_WR_EN_WIDTH"), Some(&ParamValue::Int(1)));
                let addr = instance.get_input("PORT_A_ADDR").unwrap();
                assert_eq!(addr.len(), 12);
                assert_eq!(addr[0], Net::ZERO);
                assert_eq!(addr[1], Net::ZERO);
                assert!(instance.get_input("PORT_A_RD_EN").is_none());
            }
            _ => (),
        }
    }
    assert_eq!(instances, 1);
}
