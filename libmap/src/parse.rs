//! Parser for RAM library description files.
//!
//! The format is a free-form token stream: `#` starts a line comment, items end with `;`, blocks
//! are enclosed in `{ … }`.  `ifdef`/`ifndef` (with optional `else`) select items based on
//! command-line defines, and `option "KEY" VALUE { … }` / `portoption "KEY" VALUE { … }` push
//! key→value pairs onto the option sets of every capability declared inside the block.

use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::Display;
use std::path::Path;

use memlib_netlist::ParamValue;

use crate::library::{
    Capability, Caps, ClkPolKind, ClockDef, Library, MemoryDimsDef, MemoryInitKind, Options, PortGroupDef, PortKind,
    RamDef, RamKind, RdEnKind, ResetKind, ResetValDef, ResetValKind, SrstKind, TransKind, TransTarget, WidthDef,
    WrTransDef, opts_conflict,
};

/// A diagnostic from library parsing or validation, carrying the file name and line number.
#[derive(Debug, Clone)]
pub struct LibraryError {
    pub filename: String,
    pub line: usize,
    pub message: String,
}

impl Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.filename, self.line, self.message)
    }
}

impl Error for LibraryError {}

struct Parser<'a> {
    filename: String,
    lib: &'a mut Library,
    tokens: Vec<(String, usize)>,
    index: usize,
    option_stack: Vec<(String, ParamValue)>,
    portoption_stack: Vec<(String, ParamValue)>,
    active: bool,
}

fn tokenize(filename: &str, source: &str) -> Result<Vec<(String, usize)>, LibraryError> {
    let mut tokens = vec![];
    for (line_index, line) in source.lines().enumerate() {
        let line_number = line_index + 1;
        let mut chars = line.chars().peekable();
        while let Some(&chr) = chars.peek() {
            if chr.is_whitespace() {
                chars.next();
            } else if chr == '#' {
                break;
            } else if chr == '"' {
                chars.next();
                let mut text = String::from('"');
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => text.push(escaped),
                            None => {
                                return Err(LibraryError {
                                    filename: filename.to_owned(),
                                    line: line_number,
                                    message: "unterminated string".into(),
                                })
                            }
                        },
                        Some(chr) => text.push(chr),
                        None => {
                            return Err(LibraryError {
                                filename: filename.to_owned(),
                                line: line_number,
                                message: "unterminated string".into(),
                            })
                        }
                    }
                }
                text.push('"');
                tokens.push((text, line_number));
            } else if chr == ';' || chr == '{' || chr == '}' {
                chars.next();
                tokens.push((chr.to_string(), line_number));
            } else {
                let mut text = String::new();
                while let Some(&chr) = chars.peek() {
                    if chr.is_whitespace() || matches!(chr, ';' | '{' | '}' | '"' | '#') {
                        break;
                    }
                    text.push(chr);
                    chars.next();
                }
                tokens.push((text, line_number));
            }
        }
    }
    Ok(tokens)
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> LibraryError {
        let line = match self.tokens.get(self.index.min(self.tokens.len().saturating_sub(1))) {
            Some(&(_, line)) => line,
            None => 0,
        };
        LibraryError { filename: self.filename.clone(), line, message: message.into() }
    }

    fn peek_token(&self) -> &str {
        match self.tokens.get(self.index) {
            Some((text, _)) => text,
            None => "",
        }
    }

    fn get_token(&mut self) -> String {
        match self.tokens.get(self.index) {
            Some((text, _)) => {
                self.index += 1;
                text.clone()
            }
            None => String::new(),
        }
    }

    fn eat_token(&mut self, expected: &str) -> Result<(), LibraryError> {
        let token = self.get_token();
        if token != expected {
            return Err(self.error(format!("expected `{expected}`, got `{token}`")));
        }
        Ok(())
    }

    fn get_semi(&mut self) -> Result<(), LibraryError> {
        let token = self.get_token();
        if token != ";" {
            return Err(self.error(format!("expected `;`, got `{token}`")));
        }
        Ok(())
    }

    fn get_id(&mut self) -> Result<String, LibraryError> {
        let token = self.get_token();
        if !token.starts_with('$') && !token.starts_with('\\') {
            return Err(self.error(format!("expected id string, got `{token}`")));
        }
        Ok(token)
    }

    fn get_name(&mut self) -> Result<String, LibraryError> {
        let token = self.get_token();
        let valid = token.chars().next().is_some_and(|chr| chr.is_ascii_alphabetic() || chr == '_')
            && token.chars().all(|chr| chr.is_ascii_alphanumeric() || chr == '_');
        if !valid {
            return Err(self.error(format!("expected name, got `{token}`")));
        }
        Ok(token)
    }

    fn peek_string(&self) -> bool {
        self.peek_token().starts_with('"')
    }

    fn get_string(&mut self) -> Result<String, LibraryError> {
        let token = self.get_token();
        if token.len() < 2 || !token.starts_with('"') || !token.ends_with('"') {
            return Err(self.error(format!("expected string, got `{token}`")));
        }
        Ok(token[1..token.len() - 1].to_owned())
    }

    fn peek_int(&self) -> bool {
        self.peek_token().chars().next().is_some_and(|chr| chr.is_ascii_digit())
    }

    fn get_int(&mut self) -> Result<i64, LibraryError> {
        let token = self.get_token();
        let parsed = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).ok()
        } else {
            token.parse::<i64>().ok()
        };
        parsed.ok_or_else(|| self.error(format!("expected int, got `{token}`")))
    }

    fn get_double(&mut self) -> Result<f64, LibraryError> {
        let token = self.get_token();
        token.parse::<f64>().map_err(|_| self.error(format!("expected float, got `{token}`")))
    }

    fn get_value(&mut self) -> Result<ParamValue, LibraryError> {
        if self.peek_string() {
            Ok(ParamValue::String(self.get_string()?))
        } else {
            Ok(ParamValue::Int(self.get_int()?))
        }
    }

    fn enter_ifdef(&mut self, polarity: bool) -> Result<bool, LibraryError> {
        let save = self.active;
        let name = self.get_name()?;
        self.lib.defines_unused.remove(&name);
        if self.lib.defines.contains(&name) {
            self.active = polarity;
        } else {
            self.active = !polarity;
        }
        Ok(save)
    }

    fn enter_else(&mut self, save: bool) {
        self.get_token();
        self.active = !self.active && save;
    }

    fn get_options(&self) -> Options {
        self.option_stack.iter().cloned().collect()
    }

    fn get_portoptions(&self) -> Options {
        self.portoption_stack.iter().cloned().collect()
    }

    fn add_cap<T>(&self, caps: &mut Caps<T>, val: T) {
        if self.active {
            caps.push(Capability { val, opts: self.get_options(), portopts: self.get_portoptions() });
        }
    }

    fn parse_port_block(&mut self, port: &mut PortGroupDef) -> Result<(), LibraryError> {
        if self.peek_token() == "{" {
            self.get_token();
            while self.peek_token() != "}" {
                self.parse_port_item(port)?;
            }
            self.get_token();
        } else {
            self.parse_port_item(port)?;
        }
        Ok(())
    }

    fn parse_port_item(&mut self, port: &mut PortGroupDef) -> Result<(), LibraryError> {
        let token = self.get_token();
        match token.as_str() {
            "ifdef" | "ifndef" => {
                let save = self.enter_ifdef(token == "ifdef")?;
                self.parse_port_block(port)?;
                if self.peek_token() == "else" {
                    self.enter_else(save);
                    self.parse_port_block(port)?;
                }
                self.active = save;
            }
            "option" => {
                let name = self.get_string()?;
                let val = self.get_value()?;
                self.option_stack.push((name, val));
                self.parse_port_block(port)?;
                self.option_stack.pop();
            }
            "portoption" => {
                let name = self.get_string()?;
                let val = self.get_value()?;
                self.portoption_stack.push((name, val));
                self.parse_port_block(port)?;
                self.portoption_stack.pop();
            }
            "clock" => {
                if port.kind == PortKind::Ar {
                    return Err(self.error("`clock` not allowed in async read port"));
                }
                let kind = match self.peek_token() {
                    "anyedge" => ClkPolKind::Anyedge,
                    "posedge" => ClkPolKind::Posedge,
                    "negedge" => ClkPolKind::Negedge,
                    token => {
                        return Err(self.error(format!("expected `posedge`, `negedge`, or `anyedge`, got `{token}`")))
                    }
                };
                self.get_token();
                let name = if self.peek_string() { Some(self.get_string()?) } else { None };
                self.get_semi()?;
                self.add_cap(&mut port.clock, ClockDef { kind, name });
            }
            "width" => {
                let mut def = WidthDef::default();
                let is_rw = matches!(port.kind, PortKind::Srsw | PortKind::Arsw);
                match self.peek_token() {
                    "tied" => {
                        self.get_token();
                        if !is_rw {
                            return Err(self.error("`tied` only makes sense for read+write ports"));
                        }
                        while self.peek_int() {
                            def.wr_widths.push(self.get_width()?);
                        }
                        def.tied = true;
                    }
                    "mix" => {
                        self.get_token();
                        if !is_rw {
                            return Err(self.error("`mix` only makes sense for read+write ports"));
                        }
                        while self.peek_int() {
                            def.wr_widths.push(self.get_width()?);
                        }
                        def.rd_widths = def.wr_widths.clone();
                        def.tied = false;
                    }
                    "rd" => {
                        self.get_token();
                        if !is_rw {
                            return Err(self.error("`rd` only makes sense for read+write ports"));
                        }
                        loop {
                            def.rd_widths.push(self.get_width()?);
                            if !self.peek_int() {
                                break;
                            }
                        }
                        self.eat_token("wr")?;
                        loop {
                            def.wr_widths.push(self.get_width()?);
                            if !self.peek_int() {
                                break;
                            }
                        }
                        def.tied = false;
                    }
                    "wr" => {
                        self.get_token();
                        if !is_rw {
                            return Err(self.error("`wr` only makes sense for read+write ports"));
                        }
                        loop {
                            def.wr_widths.push(self.get_width()?);
                            if !self.peek_int() {
                                break;
                            }
                        }
                        self.eat_token("rd")?;
                        loop {
                            def.rd_widths.push(self.get_width()?);
                            if !self.peek_int() {
                                break;
                            }
                        }
                        def.tied = false;
                    }
                    _ => {
                        loop {
                            def.wr_widths.push(self.get_width()?);
                            if !self.peek_int() {
                                break;
                            }
                        }
                        def.tied = true;
                    }
                }
                self.get_semi()?;
                self.add_cap(&mut port.width, def);
            }
            "addrce" => {
                self.get_semi()?;
                self.add_cap(&mut port.addrce, ());
            }
            "rden" => {
                if !port.kind.is_sync_read() {
                    return Err(self.error("`rden` only allowed on sync read ports"));
                }
                let token = self.get_token();
                let val = match token.as_str() {
                    "none" => RdEnKind::None,
                    "any" => RdEnKind::Any,
                    "write-implies" => {
                        if port.kind != PortKind::Srsw {
                            return Err(self.error("`write-implies` only makes sense for read+write ports"));
                        }
                        RdEnKind::WriteImplies
                    }
                    "write-excludes" => {
                        if port.kind != PortKind::Srsw {
                            return Err(self.error("`write-excludes` only makes sense for read+write ports"));
                        }
                        RdEnKind::WriteExcludes
                    }
                    _ => {
                        return Err(self.error(format!(
                            "expected `none`, `any`, `write-implies`, or `write-excludes`, got `{token}`"
                        )))
                    }
                };
                self.get_semi()?;
                self.add_cap(&mut port.rden, val);
            }
            "rdinitval" | "rdsrstval" | "rdarstval" => {
                if !port.kind.is_sync_read() {
                    return Err(self.error(format!("`{token}` only allowed on sync read ports")));
                }
                let kind = match token.as_str() {
                    "rdinitval" => ResetKind::Init,
                    "rdsrstval" => ResetKind::Sync,
                    "rdarstval" => ResetKind::Async,
                    _ => unreachable!(),
                };
                let val = match self.peek_token() {
                    "none" => {
                        self.get_token();
                        ResetValKind::None
                    }
                    "zero" => {
                        self.get_token();
                        ResetValKind::Zero
                    }
                    _ => ResetValKind::Named(self.get_string()?),
                };
                self.get_semi()?;
                self.add_cap(&mut port.rdrstval, ResetValDef { kind, val });
            }
            "rdsrstmode" => {
                if !port.kind.is_sync_read() {
                    return Err(self.error("`rdsrstmode` only allowed on sync read ports"));
                }
                let token = self.get_token();
                let val = match token.as_str() {
                    "en-over-srst" => SrstKind::EnOverSrst,
                    "srst-over-en" => SrstKind::SrstOverEn,
                    "any" => SrstKind::Any,
                    _ => {
                        return Err(
                            self.error(format!("expected `en-over-srst`, `srst-over-en`, or `any`, got `{token}`"))
                        )
                    }
                };
                self.get_semi()?;
                self.add_cap(&mut port.rdsrstmode, val);
            }
            "wrprio" => {
                if !port.kind.can_write() {
                    return Err(self.error("`wrprio` only allowed on write ports"));
                }
                loop {
                    let name = self.get_string()?;
                    self.add_cap(&mut port.wrprio, name);
                    if !self.peek_string() {
                        break;
                    }
                }
                self.get_semi()?;
            }
            "wrtrans" => {
                if !port.kind.can_write() {
                    return Err(self.error("`wrtrans` only allowed on write ports"));
                }
                let target = match self.peek_token() {
                    "self" => {
                        if port.kind != PortKind::Srsw {
                            return Err(self.error("`wrtrans self` only allowed on sync read + sync write ports"));
                        }
                        self.get_token();
                        TransTarget::SelfPort
                    }
                    "other" => {
                        self.get_token();
                        TransTarget::Other
                    }
                    _ => TransTarget::Named(self.get_string()?),
                };
                let token = self.get_token();
                let kind = match token.as_str() {
                    "new" => TransKind::New,
                    "old" => TransKind::Old,
                    _ => return Err(self.error(format!("expected `new` or `old`, got `{token}`"))),
                };
                self.get_semi()?;
                self.add_cap(&mut port.wrtrans, WrTransDef { target, kind });
            }
            "wrcs" => {
                if !port.kind.can_write() {
                    return Err(self.error("`wrcs` only allowed on write ports"));
                }
                let val = self.get_width()?;
                self.add_cap(&mut port.wrcs, val);
                self.get_semi()?;
            }
            "" => return Err(self.error("unexpected EOF while parsing port item")),
            _ => return Err(self.error(format!("unknown port-level item `{token}`"))),
        }
        Ok(())
    }

    fn get_width(&mut self) -> Result<usize, LibraryError> {
        let val = self.get_int()?;
        if val <= 0 {
            return Err(self.error(format!("width {val} not positive")));
        }
        Ok(val as usize)
    }

    fn parse_ram_block(&mut self, ram: &mut RamDef) -> Result<(), LibraryError> {
        if self.peek_token() == "{" {
            self.get_token();
            while self.peek_token() != "}" {
                self.parse_ram_item(ram)?;
            }
            self.get_token();
        } else {
            self.parse_ram_item(ram)?;
        }
        Ok(())
    }

    fn parse_ram_item(&mut self, ram: &mut RamDef) -> Result<(), LibraryError> {
        let token = self.get_token();
        match token.as_str() {
            "ifdef" | "ifndef" => {
                let save = self.enter_ifdef(token == "ifdef")?;
                self.parse_ram_block(ram)?;
                if self.peek_token() == "else" {
                    self.enter_else(save);
                    self.parse_ram_block(ram)?;
                }
                self.active = save;
            }
            "option" => {
                let name = self.get_string()?;
                let val = self.get_value()?;
                self.option_stack.push((name, val));
                self.parse_ram_block(ram)?;
                self.option_stack.pop();
            }
            "prune" => {
                self.eat_token("rom")?;
                self.get_semi()?;
                ram.prune_rom = true;
            }
            "abits" => {
                let abits = self.get_int()?;
                if abits < 0 {
                    return Err(self.error(format!("abits {abits} negative")));
                }
                let abits = abits as usize;
                self.eat_token("dbits")?;
                let mut dbits = vec![];
                let mut last = 0;
                loop {
                    let width = self.get_int()?;
                    if width <= 0 {
                        return Err(self.error(format!("dbits {width} not positive")));
                    }
                    let width = width as usize;
                    if width < last * 2 {
                        return Err(
                            self.error(format!("dbits {width} smaller than {} required for progression", last * 2))
                        );
                    }
                    last = width;
                    dbits.push(width);
                    if !self.peek_int() {
                        break;
                    }
                }
                if dbits.len() - 1 > abits {
                    return Err(self.error(format!("abits {abits} too small for dbits progression")));
                }
                let mut tied = false;
                if self.peek_token() == "tied" {
                    self.get_token();
                    tied = true;
                }
                let mut resource_name = None;
                let mut resource_count = 1;
                if self.peek_token() == "resource" {
                    self.get_token();
                    resource_name = Some(self.get_string()?);
                    if self.peek_int() {
                        resource_count = self.get_int()? as usize;
                    }
                }
                self.eat_token("cost")?;
                let cost = self.get_double()?;
                self.get_semi()?;
                self.add_cap(&mut ram.dims, MemoryDimsDef { abits, dbits, tied, resource_name, resource_count, cost });
            }
            "byte" => {
                let val = self.get_width()?;
                self.add_cap(&mut ram.byte, val);
                self.get_semi()?;
            }
            "init" => {
                let token = self.get_token();
                let kind = match token.as_str() {
                    "zero" => MemoryInitKind::Zero,
                    "any" => MemoryInitKind::Any,
                    "none" => MemoryInitKind::None,
                    _ => return Err(self.error(format!("expected `zero`, `any`, or `none`, got `{token}`"))),
                };
                self.get_semi()?;
                self.add_cap(&mut ram.init, kind);
            }
            "style" => {
                loop {
                    let tag = self.get_string()?;
                    self.add_cap(&mut ram.style, tag);
                    if !self.peek_string() {
                        break;
                    }
                }
                self.get_semi()?;
            }
            "port" => {
                let token = self.get_token();
                let kind = match token.as_str() {
                    "ar" => PortKind::Ar,
                    "sr" => PortKind::Sr,
                    "sw" => PortKind::Sw,
                    "arsw" => PortKind::Arsw,
                    "srsw" => PortKind::Srsw,
                    _ => return Err(self.error(format!("expected `ar`, `sr`, `sw`, `arsw`, or `srsw`, got `{token}`"))),
                };
                let mut port = PortGroupDef::new(kind);
                loop {
                    port.names.push(self.get_string()?);
                    if !self.peek_string() {
                        break;
                    }
                }
                self.parse_port_block(&mut port)?;
                if self.active {
                    // Add defaults for some capabilities.
                    if port.kind != PortKind::Ar && port.clock.is_empty() {
                        self.add_cap(&mut port.clock, ClockDef { kind: ClkPolKind::Anyedge, name: None });
                    }
                    if port.width.is_empty() {
                        self.add_cap(&mut port.width, WidthDef { tied: true, ..Default::default() });
                    }
                    // Refuse to guess this one; there is no safe default.
                    if port.kind.is_sync_read() && port.rden.is_empty() {
                        return Err(self.error("`rden` capability should be specified"));
                    }
                    self.add_cap(&mut ram.ports, port);
                }
            }
            "" => return Err(self.error("unexpected EOF while parsing ram item")),
            _ => return Err(self.error(format!("unknown ram-level item `{token}`"))),
        }
        Ok(())
    }

    fn parse_top_item(&mut self) -> Result<(), LibraryError> {
        let token = self.get_token();
        match token.as_str() {
            "ifdef" | "ifndef" => {
                let save = self.enter_ifdef(token == "ifdef")?;
                self.parse_top_block()?;
                if self.peek_token() == "else" {
                    self.enter_else(save);
                    self.parse_top_block()?;
                }
                self.active = save;
            }
            "ram" => {
                let token = self.get_token();
                let kind = match token.as_str() {
                    "distributed" => RamKind::Distributed,
                    "block" => RamKind::Block,
                    "huge" => RamKind::Huge,
                    _ => return Err(self.error(format!("expected `distributed`, `block`, or `huge`, got `{token}`"))),
                };
                let id = self.get_id()?;
                let mut ram = RamDef::new(id, kind);
                self.parse_ram_block(&mut ram)?;
                if self.active {
                    if ram.dims.is_empty() {
                        return Err(self.error("`dims` capability should be specified"));
                    }
                    if ram.ports.is_empty() {
                        return Err(self.error("at least one port group should be specified"));
                    }
                    let mut pnedge_clock = BTreeSet::new();
                    let mut anyedge_clock = BTreeSet::new();
                    for port in &ram.ports {
                        for def in &port.val.clock {
                            let Some(ref name) = def.val.name else { continue };
                            if def.val.kind == ClkPolKind::Anyedge {
                                anyedge_clock.insert(name.clone());
                            } else {
                                pnedge_clock.insert(name.clone());
                            }
                        }
                    }
                    if let Some(name) = pnedge_clock.intersection(&anyedge_clock).next() {
                        return Err(self.error(format!(
                            "named clock \"{name}\" used with both posedge/negedge and anyedge clocks"
                        )));
                    }
                    self.validate_widths(&ram)?;
                    self.lib.ram_defs.push(ram);
                }
            }
            "" => return Err(self.error("unexpected EOF while parsing top item")),
            _ => return Err(self.error(format!("unknown top-level item `{token}`"))),
        }
        Ok(())
    }

    fn parse_top_block(&mut self) -> Result<(), LibraryError> {
        if self.peek_token() == "{" {
            self.get_token();
            while self.peek_token() != "}" {
                self.parse_top_item()?;
            }
            self.get_token();
        } else {
            self.parse_top_item()?;
        }
        Ok(())
    }

    fn validate_widths(&self, ram: &RamDef) -> Result<(), LibraryError> {
        for ddef in &ram.dims {
            let dbits = &ddef.val.dbits;
            for bdef in &ram.byte {
                if opts_conflict(&ddef.opts, &bdef.opts) {
                    continue;
                }
                let byte = bdef.val;
                let ok = dbits[0] % byte == 0 || byte % dbits[dbits.len() - 1] == 0 || dbits.contains(&byte);
                if !ok {
                    return Err(self.error(format!("byte width {byte} invalid for dbits")));
                }
            }
            for pdef in &ram.ports {
                if opts_conflict(&ddef.opts, &pdef.opts) {
                    continue;
                }
                for wdef in &pdef.val.width {
                    if opts_conflict(&ddef.opts, &wdef.opts) {
                        continue;
                    }
                    if ddef.val.tied && !wdef.val.wr_widths.is_empty() {
                        return Err(self.error("per-port width doesn't make sense for tied dbits"));
                    }
                    self.validate_widthdef(dbits, &wdef.val.wr_widths)?;
                    self.validate_widthdef(dbits, &wdef.val.rd_widths)?;
                }
            }
        }
        Ok(())
    }

    fn validate_widthdef(&self, dbits: &[usize], widths: &[usize]) -> Result<(), LibraryError> {
        let Some(&first) = widths.first() else { return Ok(()) };
        for (start, &dbit) in dbits.iter().enumerate() {
            if dbit == first {
                for (offset, &width) in widths.iter().enumerate() {
                    if start + offset >= dbits.len() || dbits[start + offset] != width {
                        return Err(self.error(format!("port width {width} doesn't match dbits progression")));
                    }
                }
                return Ok(());
            }
        }
        Err(self.error(format!("port width {first} invalid for dbits")))
    }

    fn parse(&mut self) -> Result<(), LibraryError> {
        while !self.peek_token().is_empty() {
            self.parse_top_item()?;
        }
        Ok(())
    }
}

/// Parses one library file's contents into `lib`.  `filename` is used for diagnostics only.
pub fn parse_library_str(lib: &mut Library, filename: &str, source: &str) -> Result<(), LibraryError> {
    let tokens = tokenize(filename, source)?;
    let mut parser = Parser {
        filename: filename.to_owned(),
        lib,
        tokens,
        index: 0,
        option_stack: vec![],
        portoption_stack: vec![],
        active: true,
    };
    parser.parse()
}

/// Reads and parses one library file into `lib`.
pub fn parse_library_file(lib: &mut Library, path: impl AsRef<Path>) -> Result<(), LibraryError> {
    let path = path.as_ref();
    let filename = path.display().to_string();
    let source = std::fs::read_to_string(path).map_err(|error| LibraryError {
        filename: filename.clone(),
        line: 0,
        message: format!("failed to open: {error}"),
    })?;
    parse_library_str(lib, &filename, &source)
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use memlib_netlist::ParamValue;

    use crate::library::{ClkPolKind, Library, MemoryInitKind, PassOptions, PortKind, RdEnKind};
    use super::parse_library_str;

    fn parse(source: &str) -> Result<Library, super::LibraryError> {
        parse_with_defines(source, [])
    }

    fn parse_with_defines(source: &str, defines: impl IntoIterator<Item = &'static str>) -> Result<Library, super::LibraryError> {
        let defines = BTreeSet::from_iter(defines.into_iter().map(str::to_owned));
        let mut lib = Library::new(PassOptions::default(), defines);
        parse_library_str(&mut lib, "<test>", source)?;
        Ok(lib)
    }

    #[test]
    fn test_basic() {
        let lib = parse(concat!(
            "ram distributed $__TEST_RAM {\n",
            "    abits 5 dbits 8 16 cost 4.0;\n",
            "    init any;\n",
            "    port ar \"R\" { }\n",
            "    port sw \"W\" {\n",
            "        clock posedge;\n",
            "    }\n",
            "}\n",
        ))
        .unwrap();
        assert_eq!(lib.ram_defs.len(), 1);
        let ram = &lib.ram_defs[0];
        assert_eq!(ram.id, "$__TEST_RAM");
        assert_eq!(ram.dims[0].val.abits, 5);
        assert_eq!(ram.dims[0].val.dbits, vec![8, 16]);
        assert_eq!(ram.init[0].val, MemoryInitKind::Any);
        assert_eq!(ram.ports.len(), 2);
        assert_eq!(ram.ports[0].val.kind, PortKind::Ar);
        // Write port width defaults to a single tied progression-wide capability.
        assert_eq!(ram.ports[1].val.width.len(), 1);
        assert!(ram.ports[1].val.width[0].val.tied);
        assert_eq!(ram.ports[1].val.clock[0].val.kind, ClkPolKind::Posedge);
    }

    #[test]
    fn test_option_stacking() {
        let lib = parse(concat!(
            "ram block $__TEST_RAM {\n",
            "    abits 4 dbits 4 cost 1.0;\n",
            "    option \"MODE\" 1 {\n",
            "        port sr \"R\" {\n",
            "            clock posedge;\n",
            "            rden any;\n",
            "        }\n",
            "    }\n",
            "    port sw \"W\" { }\n",
            "}\n",
        ))
        .unwrap();
        let ram = &lib.ram_defs[0];
        assert_eq!(ram.ports[0].opts.get("MODE"), Some(&ParamValue::Int(1)));
        assert!(ram.ports[1].opts.is_empty());
    }

    #[test]
    fn test_ifdef() {
        let source = concat!(
            "ram block $__TEST_RAM {\n",
            "    abits 4 dbits 4 cost 1.0;\n",
            "    ifdef HAS_SR {\n",
            "        port sr \"R\" { rden none; }\n",
            "    } else {\n",
            "        port ar \"R\" { }\n",
            "    }\n",
            "    port sw \"W\" { }\n",
            "}\n",
        );
        let lib = parse_with_defines(source, ["HAS_SR"]).unwrap();
        assert_eq!(lib.ram_defs[0].ports[0].val.kind, PortKind::Sr);
        assert_eq!(lib.ram_defs[0].ports[0].val.rden[0].val, RdEnKind::None);
        let lib = parse_with_defines(source, []).unwrap();
        assert_eq!(lib.ram_defs[0].ports[0].val.kind, PortKind::Ar);
    }

    #[test]
    fn test_bad_dbits() {
        let error = parse("ram block $__TEST_RAM { abits 4 dbits 8 12 cost 1.0; port ar \"R\" { } }\n").unwrap_err();
        assert_eq!(error.line, 1);
        assert!(error.message.contains("progression"), "{}", error.message);
    }

    #[test]
    fn test_missing_rden() {
        let error = parse(concat!(
            "ram block $__TEST_RAM {\n",
            "    abits 4 dbits 4 cost 1.0;\n",
            "    port sr \"R\" { clock posedge; }\n",
            "}\n",
        ))
        .unwrap_err();
        assert!(error.message.contains("rden"), "{}", error.message);
    }

    #[test]
    fn test_unknown_item_line() {
        let error = parse("ram block $__TEST_RAM {\n    abits 4 dbits 4 cost 1.0;\n    frobnicate;\n}\n").unwrap_err();
        assert_eq!(error.line, 3);
    }
}
