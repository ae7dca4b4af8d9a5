//! The write-enable satisfiability oracle.
//!
//! Two pipeline decisions depend on proving a relation between a write port's enables and a read
//! port's enable: a `write-implies` read-enable capability needs `wr ⇒ rd`, and a
//! `write-excludes` capability needs `wr ⇒ ¬rd`.  The prover itself is outside this crate; the
//! mapper talks to it through [`EnableOracle`] and caches answers per memory.  An oracle must be
//! conservative: answering `false` is always sound and merely costs an emulation fork or a
//! rejected capability.

use memlib_netlist::{Cell, ControlNet, Design, Net, Value};

pub trait EnableOracle {
    /// Whether, whenever any bit of `wr_mask` is active, `rd_en` is active too.
    fn wr_implies_rd(&mut self, design: &Design, wr_mask: &Value, rd_en: ControlNet) -> bool;

    /// Whether no bit of `wr_mask` can be active while `rd_en` is active.
    fn wr_excludes_rd(&mut self, design: &Design, wr_mask: &Value, rd_en: ControlNet) -> bool;
}

/// A purely structural oracle: decides from constants, identical nets, and direct negations, and
/// answers `false` whenever it cannot tell.
#[derive(Debug, Default)]
pub struct StructuralOracle;

impl StructuralOracle {
    pub fn new() -> Self {
        StructuralOracle
    }

    /// True iff `net` is driven by an inverter whose input is `other`.
    fn is_not_of(design: &Design, net: Net, other: Net) -> bool {
        match design.find_cell(net) {
            Ok((cell_ref, offset)) => match &*cell_ref.get() {
                Cell::Not(arg) => arg[offset] == other,
                _ => false,
            },
            Err(_) => false,
        }
    }

    /// True iff activating `bit` forces `en` active.
    fn bit_implies(design: &Design, bit: Net, en: ControlNet) -> bool {
        if bit == Net::ZERO {
            return true;
        }
        match en {
            ControlNet::Pos(net) => bit == net,
            ControlNet::Neg(net) => Self::is_not_of(design, bit, net) || Self::is_not_of(design, net, bit),
        }
    }

    /// True iff activating `bit` forces `en` inactive.
    fn bit_excludes(design: &Design, bit: Net, en: ControlNet) -> bool {
        if bit == Net::ZERO {
            return true;
        }
        match en {
            ControlNet::Pos(net) => Self::is_not_of(design, bit, net) || Self::is_not_of(design, net, bit),
            ControlNet::Neg(net) => bit == net,
        }
    }
}

impl EnableOracle for StructuralOracle {
    fn wr_implies_rd(&mut self, design: &Design, wr_mask: &Value, rd_en: ControlNet) -> bool {
        if rd_en.is_always(true) || wr_mask.is_zero() {
            return true;
        }
        wr_mask.iter().all(|bit| Self::bit_implies(design, bit, rd_en))
    }

    fn wr_excludes_rd(&mut self, design: &Design, wr_mask: &Value, rd_en: ControlNet) -> bool {
        if rd_en.is_always(false) || wr_mask.is_zero() {
            return true;
        }
        wr_mask.iter().all(|bit| Self::bit_excludes(design, bit, rd_en))
    }
}

#[cfg(test)]
mod test {
    use memlib_netlist::{ControlNet, Design, Net, Value};

    use super::{EnableOracle, StructuralOracle};

    #[test]
    fn test_structural() {
        let design = Design::new();
        let en = design.add_input("en", 1)[0];
        let nen = design.add_not1(en);
        let other = design.add_input("other", 1)[0];
        let mut oracle = StructuralOracle::new();

        let mask = Value::from_iter([en, en]);
        assert!(oracle.wr_implies_rd(&design, &mask, ControlNet::Pos(en)));
        assert!(!oracle.wr_implies_rd(&design, &mask, ControlNet::Pos(other)));
        assert!(oracle.wr_implies_rd(&design, &mask, ControlNet::Neg(nen)));

        assert!(oracle.wr_excludes_rd(&design, &mask, ControlNet::Pos(nen)));
        assert!(oracle.wr_excludes_rd(&design, &mask, ControlNet::Neg(en)));
        assert!(!oracle.wr_excludes_rd(&design, &mask, ControlNet::Pos(en)));

        assert!(oracle.wr_implies_rd(&design, &Value::zero(2), ControlNet::Pos(other)));
        assert!(oracle.wr_implies_rd(&design, &mask, ControlNet::ONE));
    }
}
