use std::{collections::BTreeSet, error::Error};

use memlib_libmap::{library::RamDef, parse_library_file, Library, PassOptions};

fn dump_ram_def(ram: &RamDef) {
    println!("ram {} {}{}", ram.kind.tag(), ram.id, if ram.prune_rom { " (prune rom)" } else { "" });
    for dims in &ram.dims {
        let tied = if dims.val.tied { " tied" } else { "" };
        let resource = match dims.val.resource_name {
            Some(ref name) => format!(" resource {:?} {}", name, dims.val.resource_count),
            None => String::new(),
        };
        println!("  abits {} dbits {:?}{}{} cost {}", dims.val.abits, dims.val.dbits, tied, resource, dims.val.cost);
    }
    for byte in &ram.byte {
        println!("  byte {}", byte.val);
    }
    for init in &ram.init {
        println!("  init {:?}", init.val);
    }
    for style in &ram.style {
        println!("  style {:?}", style.val);
    }
    for port in &ram.ports {
        println!(
            "  port {:?} {:?}: {} clock, {} width, {} rden, {} rdrstval, {} rdsrstmode, {} wrprio, {} wrtrans caps",
            port.val.kind,
            port.val.names,
            port.val.clock.len(),
            port.val.width.len(),
            port.val.rden.len(),
            port.val.rdrstval.len(),
            port.val.rdsrstmode.len(),
            port.val.wrprio.len(),
            port.val.wrtrans.len(),
        );
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let mut lib_files: Vec<String> = vec![];
    let mut defines: Vec<String> = vec![];
    let mut no_auto_distributed = false;
    let mut no_auto_block = false;
    let mut no_auto_huge = false;
    let mut debug_geom = false;
    {
        let mut parser = argparse::ArgumentParser::new();
        parser.set_description("Parse RAM library descriptions and report the available mapping targets.");
        parser.refer(&mut lib_files).add_option(
            &["-lib"],
            argparse::Collect,
            "Library file with RAM cell definitions (may be given more than once)",
        );
        parser.refer(&mut defines).add_option(
            &["-D"],
            argparse::Collect,
            "Enable a condition checked within the library files (may be given any number of times)",
        );
        parser.refer(&mut no_auto_distributed).add_option(
            &["-no-auto-distributed"],
            argparse::StoreTrue,
            "Disable automatic mapping to distributed RAM",
        );
        parser.refer(&mut no_auto_block).add_option(
            &["-no-auto-block"],
            argparse::StoreTrue,
            "Disable automatic mapping to block RAM",
        );
        parser.refer(&mut no_auto_huge).add_option(
            &["-no-auto-huge"],
            argparse::StoreTrue,
            "Disable automatic mapping to huge RAM",
        );
        parser.refer(&mut debug_geom).add_option(
            &["-debug-geom"],
            argparse::StoreTrue,
            "Print details of the geometry exploration",
        );
        parser.parse_args_or_exit();
    }

    if lib_files.is_empty() {
        Err("no library files given (use -lib <file>)")?;
    }

    let opts = PassOptions { no_auto_distributed, no_auto_block, no_auto_huge, debug_geom };
    let mut lib = Library::new(opts, BTreeSet::from_iter(defines));
    for file in &lib_files {
        parse_library_file(&mut lib, file)?;
    }
    lib.prepare();

    for ram in &lib.ram_defs {
        dump_ram_def(ram);
    }
    Ok(())
}

fn main() {
    env_logger::init();
    if let Err(error) = run() {
        eprintln!("error: {}", error);
        std::process::exit(1)
    }
}
