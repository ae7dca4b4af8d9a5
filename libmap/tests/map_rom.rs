use std::collections::{BTreeMap, BTreeSet};

use memlib_libmap::{map_memories, parse_library_str, Library, MemMapping, PassOptions, StructuralOracle};
use memlib_netlist::{Cell, Const, Design, Memory, MemoryReadPort, ParamValue};

fn parse_library(source: &str) -> Library {
    let mut lib = Library::new(PassOptions::default(), BTreeSet::new());
    parse_library_str(&mut lib, "<test>", source).unwrap();
    lib
}

fn rom_library() -> Library {
    parse_library(concat!(
        "ram distributed $__TEST_LUTRAM {\n",
        "    abits 3 dbits 4 cost 4.0;\n",
        "    init any;\n",
        "    port ar \"R\" { }\n",
        "}\n",
    ))
}

fn rom_memory(design: &Design) -> Memory {
    let addr = design.add_input("ra", 3);
    Memory {
        depth: 8,
        width: 4,
        start_offset: 0,
        init_value: Const::ones(32),
        attributes: BTreeMap::new(),
        write_ports: vec![],
        read_ports: vec![MemoryReadPort::asynchronous(addr, 4)],
    }
}

#[test]
fn test_rom_candidate() {
    let lib = rom_library();
    let design = Design::new();
    let memory = rom_memory(&design);
    let mut oracle = StructuralOracle::new();
    let mapping = MemMapping::new(&design, &memory, &lib, &mut oracle).unwrap();
    assert!(mapping.logic_ok);
    assert_eq!(mapping.cfgs.len(), 1);
    let cfg = &mapping.cfgs[0];
    assert_eq!(cfg.score_emu, 1);
    assert_eq!(cfg.repl_port, 1);
    assert_eq!(cfg.repl_d, 1);
    assert_eq!(cfg.base_width_log2, 0);
    assert_eq!(cfg.swizzle, vec![Some(0), Some(1), Some(2), Some(3)]);
    // The hard candidate beats the soft-logic fallback (4 * 8 bits of registers).
    let selected = mapping.select().unwrap();
    assert_eq!(selected, Some(0));
    assert!(mapping.cfgs[0].cost < mapping.logic_cost);
}

#[test]
fn test_rom_emission() {
    let lib = rom_library();
    let mut design = Design::new();
    let memory = rom_memory(&design);
    let output = design.add_memory(memory);
    design.add_output("rdata", output);
    map_memories(&mut design, &lib).unwrap();

    let mut instances = 0;
    for cell_ref in design.iter_cells() {
        match &*cell_ref.get() {
            Cell::Memory(_) => panic!("abstract memory left in design"),
            Cell::Other(instance) => {
                instances += 1;
                assert_eq!(instance.kind, "$__TEST_LUTRAM");
                assert_eq!(instance.get_param("ABITS"), Some(&ParamValue::Int(3)));
                assert_eq!(instance.get_param("INIT"), Some(&ParamValue::Const(Const::ones(32))));
                assert_eq!(instance.get_param("PORT_R_USED"), Some(&ParamValue::from(true)));
                assert_eq!(instance.get_output("PORT_R_RD_DATA").map(|range| range.len()), Some(4));
            }
            _ => (),
        }
    }
    assert_eq!(instances, 1);
}

#[test]
fn test_rom_pruned_for_prune_rom() {
    let lib = parse_library(concat!(
        "ram distributed $__TEST_LUTRAM {\n",
        "    abits 3 dbits 4 cost 4.0;\n",
        "    prune rom;\n",
        "    init any;\n",
        "    port ar \"R\" { }\n",
        "}\n",
    ));
    let design = Design::new();
    let memory = rom_memory(&design);
    let mut oracle = StructuralOracle::new();
    let mapping = MemMapping::new(&design, &memory, &lib, &mut oracle).unwrap();
    // The only definition asks for ROMs to be pruned; the soft-logic fallback remains.
    assert!(mapping.cfgs.is_empty());
    assert_eq!(mapping.select().unwrap(), None);
}
