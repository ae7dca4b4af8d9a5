use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;

use crate::{Cell, Const, FlipFlop, Instance, Memory, Net, Trit, Value};

/// An append-only arena of cells.
///
/// Builder methods take `&self`: cells may be added while the design is being traversed.  Net
/// replacements are queued with [`Design::replace_net`]/[`Design::replace_value`] and committed
/// with [`Design::apply`], which rewrites every cell input through the replacement map.  Trivially
/// constant cells are folded at construction time and never enter the arena.
#[derive(Debug, Default)]
pub struct Design {
    cells: RefCell<Vec<Cell>>,
    replaced: RefCell<BTreeMap<Net, Net>>,
}

impl Design {
    pub fn new() -> Design {
        Design::default()
    }

    pub fn add_cell(&self, cell: Cell) -> Value {
        let mut cells = self.cells.borrow_mut();
        let index = cells.len();
        let output_len = cell.output_len();
        cells.push(cell);
        for _ in 1..output_len.max(1) {
            cells.push(Cell::Skip(index as u32));
        }
        Value::cell(index, output_len)
    }

    /// Adds an output-only placeholder, to be rewired onto a real driver later.
    pub fn add_void(&self, width: usize) -> Value {
        if width == 0 {
            return Value::EMPTY;
        }
        self.add_cell(Cell::Void(width as u32))
    }

    pub fn add_input(&self, name: impl Into<String>, width: usize) -> Value {
        self.add_cell(Cell::Input(name.into(), width as u32))
    }

    pub fn add_output(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.add_cell(Cell::Output(name.into(), value.into()));
    }

    pub fn add_not(&self, arg: impl Into<Value>) -> Value {
        let arg = arg.into();
        match arg.as_const() {
            Some(value) => Value::from(value.not()),
            None => self.add_cell(Cell::Not(arg)),
        }
    }

    pub fn add_not1(&self, arg: Net) -> Net {
        self.add_not(Value::from(arg))[0]
    }

    pub fn add_and(&self, arg1: impl Into<Value>, arg2: impl Into<Value>) -> Value {
        let (arg1, arg2) = (arg1.into(), arg2.into());
        assert_eq!(arg1.len(), arg2.len());
        if arg1.is_zero() || arg2.is_ones() || arg1 == arg2 {
            return arg1;
        }
        if arg2.is_zero() || arg1.is_ones() {
            return arg2;
        }
        match (arg1.as_const(), arg2.as_const()) {
            (Some(const1), Some(const2)) => Value::from(const1.and(const2)),
            _ => self.add_cell(Cell::And(arg1, arg2)),
        }
    }

    pub fn add_and1(&self, arg1: Net, arg2: Net) -> Net {
        self.add_and(Value::from(arg1), Value::from(arg2))[0]
    }

    pub fn add_or(&self, arg1: impl Into<Value>, arg2: impl Into<Value>) -> Value {
        let (arg1, arg2) = (arg1.into(), arg2.into());
        assert_eq!(arg1.len(), arg2.len());
        if arg1.is_ones() || arg2.is_zero() || arg1 == arg2 {
            return arg1;
        }
        if arg2.is_ones() || arg1.is_zero() {
            return arg2;
        }
        match (arg1.as_const(), arg2.as_const()) {
            (Some(const1), Some(const2)) => Value::from(const1.or(const2)),
            _ => self.add_cell(Cell::Or(arg1, arg2)),
        }
    }

    pub fn add_or1(&self, arg1: Net, arg2: Net) -> Net {
        self.add_or(Value::from(arg1), Value::from(arg2))[0]
    }

    pub fn add_xor(&self, arg1: impl Into<Value>, arg2: impl Into<Value>) -> Value {
        let (arg1, arg2) = (arg1.into(), arg2.into());
        assert_eq!(arg1.len(), arg2.len());
        self.add_cell(Cell::Xor(arg1, arg2))
    }

    pub fn add_mux(&self, sel: Net, arg1: impl Into<Value>, arg2: impl Into<Value>) -> Value {
        let (arg1, arg2) = (arg1.into(), arg2.into());
        assert_eq!(arg1.len(), arg2.len());
        match sel.as_const() {
            Some(Trit::One) => arg1,
            Some(Trit::Zero) => arg2,
            _ if arg1 == arg2 => arg1,
            _ => self.add_cell(Cell::Mux(sel, arg1, arg2)),
        }
    }

    pub fn add_mux1(&self, sel: Net, arg1: Net, arg2: Net) -> Net {
        self.add_mux(sel, Value::from(arg1), Value::from(arg2))[0]
    }

    pub fn add_eq(&self, arg1: impl Into<Value>, arg2: impl Into<Value>) -> Net {
        let (arg1, arg2) = (arg1.into(), arg2.into());
        assert_eq!(arg1.len(), arg2.len());
        if arg1 == arg2 {
            return Net::ONE;
        }
        if let (Some(const1), Some(const2)) = (arg1.as_const(), arg2.as_const()) {
            if !const1.has_undef() && !const2.has_undef() {
                return Net::from(const1 == const2);
            }
        }
        self.add_cell(Cell::Eq(arg1, arg2))[0]
    }

    /// Shift `arg1` left by `arg2 * stride` bits, filling with zeros.
    pub fn add_shl(&self, arg1: impl Into<Value>, arg2: &Value, stride: u32) -> Value {
        let arg1 = arg1.into();
        if let Some(amount) = arg2.as_const().and_then(|value| value.as_uint()) {
            let amount = (amount as usize).saturating_mul(stride as usize).min(arg1.len());
            return Value::zero(amount).concat(arg1.slice(..arg1.len() - amount));
        }
        self.add_cell(Cell::Shl(arg1, arg2.clone(), stride))
    }

    /// Shift `arg1` right by `arg2 * stride` bits, filling with zeros.
    pub fn add_ushr(&self, arg1: impl Into<Value>, arg2: &Value, stride: u32) -> Value {
        let arg1 = arg1.into();
        if let Some(amount) = arg2.as_const().and_then(|value| value.as_uint()) {
            let amount = (amount as usize).saturating_mul(stride as usize).min(arg1.len());
            return arg1.slice(amount..).concat(Value::zero(amount));
        }
        self.add_cell(Cell::UShr(arg1, arg2.clone(), stride))
    }

    pub fn add_dff(&self, flip_flop: FlipFlop) -> Value {
        self.add_cell(Cell::Dff(flip_flop))
    }

    pub fn add_memory(&self, memory: Memory) -> Value {
        assert_eq!(memory.init_value.len(), memory.depth * memory.width);
        for port in &memory.write_ports {
            assert_eq!(port.data.len(), port.mask.len());
            assert_eq!(port.data.len() % memory.width.max(1), 0);
            assert!((port.data.len() / memory.width.max(1)).is_power_of_two());
        }
        self.add_cell(Cell::Memory(memory))
    }

    pub fn add_other(&self, instance: Instance) -> Value {
        self.add_cell(Cell::Other(instance))
    }

    pub fn replace_net(&self, from: Net, to: Net) {
        assert!(from.as_cell().is_some(), "cannot replace a constant net");
        if from != to {
            self.replaced.borrow_mut().insert(from, to);
        }
    }

    pub fn replace_value(&self, from: impl Into<Value>, to: impl Into<Value>) {
        let (from, to) = (from.into(), to.into());
        assert_eq!(from.len(), to.len());
        for (from, to) in from.iter().zip(to.iter()) {
            self.replace_net(from, to);
        }
    }

    /// Commits queued net replacements, rewriting every cell input through the replacement map.
    pub fn apply(&mut self) {
        let map = std::mem::take(&mut *self.replaced.borrow_mut());
        if map.is_empty() {
            return;
        }
        for cell in self.cells.borrow_mut().iter_mut() {
            if let Cell::Skip(_) = cell {
                continue;
            }
            cell.visit_mut(|net| {
                while let Some(&to) = map.get(net) {
                    *net = to;
                }
            });
        }
    }

    /// Commits replacements, then removes cells not reachable from an output or an instance.
    pub fn compact(&mut self) {
        self.apply();
        let mut keep = {
            let cells = self.cells.borrow();
            let mut keep = vec![false; cells.len()];
            let mut queue = vec![];
            for (index, cell) in cells.iter().enumerate() {
                if matches!(cell, Cell::Output(_, _) | Cell::Other(_) | Cell::Memory(_)) {
                    queue.push(index);
                }
            }
            while let Some(index) = queue.pop() {
                if keep[index] {
                    continue;
                }
                keep[index] = true;
                cells[index].visit(|net| {
                    if let Some(slot) = net.as_cell() {
                        let start = match cells[slot] {
                            Cell::Skip(start) => start as usize,
                            _ => slot,
                        };
                        if !keep[start] {
                            queue.push(start);
                        }
                    }
                });
            }
            keep
        };
        // Skip slots share the fate of their cell.
        {
            let cells = self.cells.borrow();
            for (index, cell) in cells.iter().enumerate() {
                if let Cell::Skip(start) = cell {
                    keep[index] = keep[*start as usize];
                }
            }
        }
        let old_cells = std::mem::take(&mut *self.cells.borrow_mut());
        let mut slot_map = vec![None; old_cells.len()];
        let mut new_cells = vec![];
        for (index, cell) in old_cells.into_iter().enumerate() {
            if keep[index] {
                slot_map[index] = Some(new_cells.len());
                new_cells.push(cell);
            }
        }
        for cell in new_cells.iter_mut() {
            if let Cell::Skip(start) = cell {
                *start = slot_map[*start as usize].unwrap() as u32;
                continue;
            }
            cell.visit_mut(|net| {
                if let Some(slot) = net.as_cell() {
                    *net = Net::from_cell(slot_map[slot].expect("kept cell references a removed cell"));
                }
            });
        }
        *self.cells.borrow_mut() = new_cells;
    }

    /// Looks up the driver of a net: the driving cell and the bit offset into its output.
    pub fn find_cell(&self, net: Net) -> Result<(CellRef, usize), Trit> {
        if let Some(trit) = net.as_const() {
            return Err(trit);
        }
        let slot = net.as_cell().unwrap();
        let cells = self.cells.borrow();
        let (index, offset) = match cells[slot] {
            Cell::Skip(start) => (start as usize, slot - start as usize),
            _ => (slot, 0),
        };
        Ok((CellRef { design: self, index }, offset))
    }

    pub fn iter_cells(&self) -> CellIter {
        CellIter { design: self, index: 0 }
    }

    pub fn cell_count(&self) -> usize {
        self.iter_cells().count()
    }
}

#[derive(Clone, Copy)]
pub struct CellRef<'a> {
    design: &'a Design,
    index: usize,
}

impl<'a> CellRef<'a> {
    pub fn get(&self) -> Ref<'a, Cell> {
        Ref::map(self.design.cells.borrow(), |cells| &cells[self.index])
    }

    pub fn output(&self) -> Value {
        Value::cell(self.index, self.get().output_len())
    }

    /// Replaces the cell with a placeholder of the same width; its outputs must have been (or must
    /// be about to be) rewired elsewhere.
    pub fn unalive(&self) {
        let output_len = self.get().output_len();
        self.design.cells.borrow_mut()[self.index] = Cell::Void(output_len as u32);
    }
}

impl PartialEq for CellRef<'_> {
    fn eq(&self, other: &CellRef<'_>) -> bool {
        std::ptr::eq(self.design, other.design) && self.index == other.index
    }
}

impl Eq for CellRef<'_> {}

pub struct CellIter<'a> {
    design: &'a Design,
    index: usize,
}

impl<'a> Iterator for CellIter<'a> {
    type Item = CellRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let cells = self.design.cells.borrow();
        if self.index >= cells.len() {
            return None;
        }
        let cell_ref = CellRef { design: self.design, index: self.index };
        self.index += cells[self.index].output_len().max(1);
        Some(cell_ref)
    }
}

#[cfg(test)]
mod test {
    use crate::{Cell, Const, Design, FlipFlop, Net, Value};

    #[test]
    fn test_fold() {
        let design = Design::new();
        assert_eq!(design.add_and1(Net::ONE, Net::ZERO), Net::ZERO);
        assert_eq!(design.add_or1(Net::ONE, Net::ZERO), Net::ONE);
        assert_eq!(design.add_mux1(Net::ZERO, Net::ONE, Net::UNDEF), Net::UNDEF);
        assert_eq!(design.add_eq(Value::zero(2), Value::zero(2)), Net::ONE);
        assert_eq!(design.add_eq(Value::zero(2), Value::ones(2)), Net::ZERO);
        assert_eq!(design.cell_count(), 0);
    }

    #[test]
    fn test_const_shift() {
        let design = Design::new();
        let arg = Value::from(Const::lit("1011"));
        assert_eq!(design.add_shl(&arg, &Value::from(Net::ONE), 2), Value::from(Const::lit("1100")));
        assert_eq!(design.add_ushr(&arg, &Value::from(Net::ONE), 2), Value::from(Const::lit("0010")));
    }

    #[test]
    fn test_replace() {
        let mut design = Design::new();
        let input = design.add_input("data", 2);
        let void = design.add_void(2);
        let q = design.add_dff(FlipFlop::new(void.clone(), Net::ONE));
        design.add_output("q", q);
        design.replace_value(&void, &input);
        design.apply();
        let mut seen_dff = false;
        for cell_ref in design.iter_cells() {
            if let Cell::Dff(flip_flop) = &*cell_ref.get() {
                assert_eq!(flip_flop.data, input);
                seen_dff = true;
            }
        }
        assert!(seen_dff);
    }

    #[test]
    fn test_compact() {
        let mut design = Design::new();
        let input = design.add_input("data", 1);
        design.add_not(input.clone());
        let kept = design.add_not(input.clone());
        design.add_output("q", kept);
        assert_eq!(design.cell_count(), 4);
        design.compact();
        assert_eq!(design.cell_count(), 3);
    }
}
