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

fn byte_library() -> Library {
    parse_library(concat!(
        "ram block $__TEST_BRAM {\n",
        "    abits 6 dbits 4 8 16 32 cost 8.0;\n",
        "    byte 8;\n",
        "    port sr \"R\" {\n",
        "        clock posedge;\n",
        "        rden any;\n",
        "    }\n",
        "    port sw \"W\" {\n",
        "        clock posedge;\n",
        "    }\n",
        "}\n",
    ))
}

/// An 8x24 memory whose write enables come in four groups of six bits: the source word does not
/// line up with the RAM's 8-bit write-enable granularity, so padding bits are inserted at every
/// enable boundary.
fn grouped_enable_memory(design: &Design) -> Memory {
    let clk = design.add_input("clk", 1)[0];
    let waddr = design.add_input("waddr", 3);
    let raddr = design.add_input("raddr", 3);
    let wdata = design.add_input("wdata", 24);
    let wen = design.add_input("wen", 4);
    let ren = design.add_input("ren", 1)[0];
    let mut mask = Value::new();
    for group in 0..4 {
        mask.extend(std::iter::repeat_n(wen[group], 6));
    }
    let mut read_port = MemoryReadPort::clocked(raddr, 24, Net::from(clk));
    {
        let flip_flop = read_port.flip_flop.as_mut().unwrap();
        flip_flop.relations = vec![MemoryPortRelation::Undefined];
        flip_flop.enable = memlib_netlist::ControlNet::Pos(ren);
        flip_flop.reset_over_enable = true;
    }
    Memory {
        depth: 8,
        width: 24,
        start_offset: 0,
        init_value: Const::undef(8 * 24),
        attributes: BTreeMap::new(),
        write_ports: vec![MemoryWritePort::new(Net::from(clk), waddr, wdata, mask)],
        read_ports: vec![read_port],
    }
}

#[test]
fn test_byte_padding_swizzle() {
    let lib = byte_library();
    let design = Design::new();
    let memory = grouped_enable_memory(&design);
    let mut oracle = StructuralOracle::new();
    let mapping = MemMapping::new(&design, &memory, &lib, &mut oracle).unwrap();
    assert_eq!(mapping.cfgs.len(), 1);
    let cfg = &mapping.cfgs[0];
    assert_eq!(cfg.byte, 8);
    // 24 source bits padded to the 8-bit enable granularity at each of the four boundaries.
    assert_eq!(cfg.swizzle.len(), 32);
    assert_eq!(cfg.swizzle.iter().filter(|bit| bit.is_none()).count(), 8);
    for (position, source) in [(0, 0), (8, 6), (16, 12), (24, 18)] {
        assert_eq!(cfg.swizzle[position], Some(source));
    }
    // The widest unit covers the padded word in one go.
    assert_eq!(cfg.base_width_log2, 3);
    assert_eq!(cfg.repl_d, 1);
    assert_eq!(cfg.repl_port, 1);
    // Swizzle length is a multiple of the effective byte width.
    assert_eq!(cfg.swizzle.len() % 8, 0);
}

#[test]
fn test_byte_granularity_emission() {
    let lib = byte_library();
    let mut design = Design::new();
    let memory = grouped_enable_memory(&design);
    let wen = memory.write_ports[0].mask.clone();
    let ren = memory.read_ports[0].flip_flop.as_ref().unwrap().enable;
    let output = design.add_memory(memory);
    design.add_output("rdata", output);
    map_memories(&mut design, &lib).unwrap();

    let mut instances = 0;
    for cell_ref in design.iter_cells() {
        if let Cell::Other(instance) = &*cell_ref.get() {
            instances += 1;
            assert_eq!(instance.get_param("BYTE"), Some(&ParamValue::Int(8)));
            assert_eq!(instance.get_param("PORT_W_WR_EN_WIDTH"), Some(&ParamValue::Int(4)));
            // One enable per group, in source order.
            let hw_wren = instance.get_input("PORT_W_WR_EN").unwrap();
            assert_eq!(hw_wren.len(), 4);
            for group in 0..4 {
                assert_eq!(hw_wren[group], wen[group * 6]);
            }
            // Padding bits carry undefined write data.
            let hw_wdata = instance.get_input("PORT_W_WR_DATA").unwrap();
            assert_eq!(hw_wdata.len(), 32);
            assert_eq!(hw_wdata[6], Net::UNDEF);
            assert_eq!(hw_wdata[7], Net::UNDEF);
            assert_eq!(instance.get_input("PORT_R_RD_EN"), Some(&Value::from(ren.net())));
        }
    }
    assert_eq!(instances, 1);
}
