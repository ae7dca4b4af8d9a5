use std::collections::{BTreeMap, BTreeSet};

use memlib_libmap::{map_memories, parse_library_str, Library, MapError, PassOptions};
use memlib_netlist::{
    Cell, Const, Design, Memory, MemoryPortRelation, MemoryReadPort, MemoryWritePort, Net, ParamValue, Value,
};

fn zero_init_library() -> Library {
    let mut lib = Library::new(PassOptions::default(), BTreeSet::new());
    parse_library_str(
        &mut lib,
        "<test>",
        concat!(
            "ram block $__TEST_BRAM {\n",
            "    abits 3 dbits 4 cost 1.0;\n",
            "    init zero;\n",
            "    port sr \"R\" {\n",
            "        clock posedge;\n",
            "        rden none;\n",
            "    }\n",
            "    port sw \"W\" {\n",
            "        clock posedge;\n",
            "    }\n",
            "}\n",
        ),
    )
    .unwrap();
    lib
}

fn init_memory(design: &Design, init_value: Const) -> Memory {
    let clk = design.add_input("clk", 1)[0];
    let waddr = design.add_input("waddr", 3);
    let raddr = design.add_input("raddr", 3);
    let wdata = design.add_input("wdata", 4);
    let wen = design.add_input("wen", 1)[0];
    let mask = Value::from_iter(std::iter::repeat_n(wen, 4));
    let mut read_port = MemoryReadPort::clocked(raddr, 4, Net::from(clk));
    read_port.flip_flop.as_mut().unwrap().relations = vec![MemoryPortRelation::Undefined];
    let mut attributes = BTreeMap::new();
    // Rule out the soft-logic fallback so an unmappable init is a hard error.
    attributes.insert("ram_style".to_owned(), ParamValue::String("block".to_owned()));
    Memory {
        depth: 8,
        width: 4,
        start_offset: 0,
        init_value,
        attributes,
        write_ports: vec![MemoryWritePort::new(Net::from(clk), waddr, wdata, mask)],
        read_ports: vec![read_port],
    }
}

#[test]
fn test_zero_init_maps() {
    let lib = zero_init_library();
    let mut design = Design::new();
    let memory = init_memory(&design, Const::zero(32));
    let output = design.add_memory(memory);
    design.add_output("rdata", output);
    map_memories(&mut design, &lib).unwrap();
    let mut instances = 0;
    for cell_ref in design.iter_cells() {
        if let Cell::Other(instance) = &*cell_ref.get() {
            instances += 1;
            assert_eq!(instance.get_param("INIT"), Some(&ParamValue::Const(Const::zero(32))));
        }
    }
    assert_eq!(instances, 1);
}

#[test]
fn test_mixed_init_rejected() {
    let lib = zero_init_library();
    let mut design = Design::new();
    let mut init_value = Const::zero(32);
    init_value[5] = memlib_netlist::Trit::One;
    let memory = init_memory(&design, init_value);
    let output = design.add_memory(memory);
    design.add_output("rdata", output);
    let error = map_memories(&mut design, &lib).unwrap_err();
    assert!(matches!(error, MapError::NoValidMapping));
}

#[test]
fn test_undef_init_ignores_filter() {
    let lib = zero_init_library();
    let mut design = Design::new();
    let memory = init_memory(&design, Const::undef(32));
    let output = design.add_memory(memory);
    design.add_output("rdata", output);
    map_memories(&mut design, &lib).unwrap();
}
