use crate::addr::Address;
use crate::expr::{AddrExpr, SymVar};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    /// A concrete value was required but the register holds a symbolic one.
    #[error("register {0} holds a symbolic value where a concrete one is required")]
    SymbolicRegister(Reg),
    /// The register has never been written in this state.
    #[error("register {0} is not initialized")]
    UninitRegister(Reg),
}

/// General-purpose register index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u8);

impl Reg {
    /// Return-value register.
    pub const RET: Reg = Reg(0);
    /// Link register, holding the return address after a call.
    pub const LR: Reg = Reg(14);

    /// The registers carrying the first three service-call arguments.
    pub const SYSCALL_ARGS: [Reg; 3] = [Reg(1), Reg(2), Reg(3)];
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A register's contents: either a known machine word or a symbolic
/// expression summarized by its sources.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Concrete(u64),
    Symbolic(AddrExpr),
}

impl Value {
    /// The provenance view of the value, lifting concrete words into
    /// source-free expressions.
    pub fn expr(&self) -> AddrExpr {
        match self {
            Value::Concrete(v) => AddrExpr::concrete(*v),
            Value::Symbolic(e) => e.clone(),
        }
    }

    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Concrete(a), Value::Concrete(b)) => Value::Concrete(a.wrapping_add(*b)),
            _ => Value::Symbolic(self.expr().join(&other.expr())),
        }
    }
}

/// A memory region bound to a named symbolic source, e.g. the input
/// buffer mapped at a fixed address before exploration starts.
#[derive(Clone, Debug)]
pub struct MemBinding {
    pub base: u64,
    pub len: u64,
    pub var: SymVar,
}

impl MemBinding {
    fn covers(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.len
    }
}

/// Snapshot of the machine at one program point: a register file plus
/// the symbolic memory bindings established at seed time.
///
/// A state is owned by exactly one exploration unit. Whenever two
/// successors are derived from the same point the state is cloned, never
/// aliased, so each successor evolves independently.
#[derive(Clone, Debug)]
pub struct MachineState {
    pc: Address,
    regs: BTreeMap<Reg, Value>,
    bindings: Vec<MemBinding>,
    path_constraints: Vec<String>,
}

impl MachineState {
    pub fn new(entry: Address) -> Self {
        Self {
            pc: entry,
            regs: BTreeMap::new(),
            bindings: Vec::new(),
            path_constraints: Vec::new(),
        }
    }

    pub fn pc(&self) -> Address {
        self.pc
    }

    pub fn set_pc(&mut self, pc: Address) {
        self.pc = pc;
    }

    pub fn reg(&self, reg: Reg) -> Option<&Value> {
        self.regs.get(&reg)
    }

    pub fn set_reg(&mut self, reg: Reg, value: Value) {
        self.regs.insert(reg, value);
    }

    /// Reads a register that must resolve to a single machine word.
    pub fn concrete_reg(&self, reg: Reg) -> Result<u64, StateError> {
        match self.regs.get(&reg) {
            None => Err(StateError::UninitRegister(reg)),
            Some(Value::Concrete(v)) => Ok(*v),
            Some(Value::Symbolic(expr)) => expr
                .as_concrete()
                .ok_or(StateError::SymbolicRegister(reg)),
        }
    }

    /// Binds `[base, base+len)` to a named symbolic source. Loads whose
    /// address falls inside the region yield that source.
    pub fn bind_region(&mut self, base: u64, len: u64, var: SymVar) {
        self.bindings.push(MemBinding { base, len, var });
    }

    pub fn binding_at(&self, addr: u64) -> Option<&MemBinding> {
        self.bindings.iter().find(|b| b.covers(addr))
    }

    /// Records a path condition picked up while deriving this state.
    pub fn record_constraint(&mut self, note: impl Into<String>) {
        self.path_constraints.push(note.into());
    }

    pub fn constraint_count(&self) -> usize {
        self.path_constraints.len()
    }

    /// Drops the accumulated constraint history. Satisfiability has
    /// already been decided by the stepper, so once a successor is
    /// admitted to the worklist the history only costs memory.
    pub fn release_constraints(&mut self) {
        self.path_constraints.clear();
        self.path_constraints.shrink_to_fit();
    }
}
