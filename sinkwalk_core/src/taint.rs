use crate::expr::{AddrExpr, VarOrigin};

/// Classifies whether an address expression is attributable to the
/// externally supplied input buffer. Pure classification, no side
/// effects.
#[derive(Debug, Clone, Copy)]
pub struct TaintOracle {
    allow_multi_source: bool,
}

impl TaintOracle {
    /// `allow_multi_source` set to false rejects any expression that
    /// depends on more than one distinct source. Addresses that mix a
    /// controlled offset with an unrelated uninitialized register are a
    /// recurring false-positive shape, and this is the knob that
    /// suppresses them.
    pub fn new(allow_multi_source: bool) -> Self {
        Self { allow_multi_source }
    }

    pub fn is_tainted(&self, addr: &AddrExpr) -> bool {
        if !self.allow_multi_source && addr.distinct_sources() != 1 {
            return false;
        }
        if addr
            .vars()
            .iter()
            .any(|v| v.origin == VarOrigin::Synthetic)
        {
            return false;
        }
        addr.vars()
            .iter()
            .any(|v| v.origin == VarOrigin::InputBuffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::SymVar;

    fn mixed_expr() -> AddrExpr {
        AddrExpr::from_var(SymVar::input("in_buf"))
            .join(&AddrExpr::from_var(SymVar::ambient("r9_uninit")))
    }

    #[test]
    fn single_input_source_is_tainted() {
        let oracle = TaintOracle::new(false);
        let expr = AddrExpr::from_var(SymVar::input("in_buf")).offset(0x20);
        assert!(oracle.is_tainted(&expr));
    }

    #[test]
    fn multi_source_is_rejected_unless_allowed() {
        let expr = mixed_expr();
        assert!(!TaintOracle::new(false).is_tainted(&expr));
        assert!(TaintOracle::new(true).is_tainted(&expr));
    }

    #[test]
    fn synthetic_sources_are_never_tainted() {
        let oracle = TaintOracle::new(true);
        let fake = AddrExpr::from_var(SymVar::synthetic("fake_ret_3"));
        assert!(!oracle.is_tainted(&fake));

        // Even combined with a genuine input source the synthetic
        // variable poisons the whole expression.
        let combined = fake.join(&AddrExpr::from_var(SymVar::input("in_buf")));
        assert!(!oracle.is_tainted(&combined));
    }

    #[test]
    fn concrete_and_ambient_addresses_are_clean() {
        let oracle = TaintOracle::new(true);
        assert!(!oracle.is_tainted(&AddrExpr::concrete(0x1000)));
        assert!(!oracle.is_tainted(&AddrExpr::from_var(SymVar::ambient("mem_1"))));
    }
}
