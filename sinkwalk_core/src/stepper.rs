use crate::addr::Address;
use crate::callstack::CallStack;
use crate::expr::{AddrExpr, SymVar};
use crate::program::{BasicBlock, Operand, Stmt, Terminator};
use crate::state::{MachineState, Reg, StateError, Value};
use log::debug;
use std::fmt;
use thiserror::Error;

/// How control left the stepped block. Every successor carries exactly
/// one kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Call,
    Return,
    /// Synthesized return used to approximate a skipped callee.
    FakeReturn,
    Syscall,
    /// Undecodable or invalid transfer.
    NoDecode,
    /// Fallthrough or branch.
    Normal,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferKind::Call => "call",
            TransferKind::Return => "return",
            TransferKind::FakeReturn => "fake-return",
            TransferKind::Syscall => "syscall",
            TransferKind::NoDecode => "no-decode",
            TransferKind::Normal => "normal",
        };
        f.write_str(name)
    }
}

/// The stepper's verdict on a successor's path condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Satisfiability {
    Sat,
    Unsat,
    /// The successor address could not be resolved to a concrete or
    /// finite set of targets.
    Unconstrained,
}

/// One state derived by advancing a unit one basic block.
#[derive(Clone, Debug)]
pub struct Successor {
    pub state: MachineState,
    pub kind: TransferKind,
    pub sat: Satisfiability,
}

/// All successors of one step, every partition tagged.
#[derive(Debug, Default)]
pub struct StepOutcome {
    pub successors: Vec<Successor>,
}

/// Ambient context threaded into a step for the hooks fired during it.
/// Valid only for the duration of that one step invocation.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub stack: &'a CallStack,
}

/// Callbacks fired synchronously while a block executes. `at` is the
/// address of the instruction the event belongs to.
pub trait SinkHooks {
    fn on_mem_read(&mut self, ctx: &StepContext<'_>, at: Address, addr: &AddrExpr);

    fn on_mem_write(&mut self, ctx: &StepContext<'_>, at: Address, addr: &AddrExpr);

    /// Fired at a service-call boundary with the state about to enter
    /// it. May mutate control registers; returning `Some` overrides the
    /// address execution resumes at.
    fn on_syscall(
        &mut self,
        ctx: &StepContext<'_>,
        at: Address,
        state: &mut MachineState,
    ) -> Option<Address>;
}

/// Hooks that observe nothing. Useful when stepping outside a full
/// exploration run.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoOpHooks;

impl SinkHooks for NoOpHooks {
    fn on_mem_read(&mut self, _ctx: &StepContext<'_>, _at: Address, _addr: &AddrExpr) {}

    fn on_mem_write(&mut self, _ctx: &StepContext<'_>, _at: Address, _addr: &AddrExpr) {}

    fn on_syscall(
        &mut self,
        _ctx: &StepContext<'_>,
        _at: Address,
        _state: &mut MachineState,
    ) -> Option<Address> {
        None
    }
}

#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("stepper failure: {0}")]
    Other(String),
}

/// Advances one machine state by one basic block.
///
/// `node` is the Program Model's block at the state's address when one
/// is known; it bounds the step. With no node the implementation takes
/// its best unhinted step — a degraded-precision path, not a failure.
pub trait Stepper {
    fn step(
        &mut self,
        state: &MachineState,
        node: Option<&BasicBlock>,
        ctx: &StepContext<'_>,
        hooks: &mut dyn SinkHooks,
    ) -> Result<StepOutcome, StepError>;
}

/// A small block interpreter over `ProgramModel` blocks: evaluates the
/// statement list, fires the sink hooks, and emits kind-tagged
/// successors from the terminator. Not an ISA — just the machinery the
/// exploration engine needs from its lower layer.
#[derive(Debug, Default)]
pub struct BlockStepper {
    fresh: u64,
}

impl BlockStepper {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_ambient(&mut self, what: &str) -> SymVar {
        self.fresh += 1;
        SymVar::ambient(format!("{}_{}", what, self.fresh))
    }

    /// Current contents of `reg`, materializing an ambient symbolic
    /// value for registers never written in this state.
    fn reg_value(&mut self, state: &mut MachineState, reg: Reg) -> Value {
        if let Some(value) = state.reg(reg) {
            return value.clone();
        }
        let var = SymVar::ambient(format!("{reg}_uninit"));
        let value = Value::Symbolic(AddrExpr::from_var(var));
        state.set_reg(reg, value.clone());
        value
    }

    fn eval(&mut self, state: &mut MachineState, op: &Operand) -> Value {
        match op {
            Operand::Imm(v) => Value::Concrete(*v),
            Operand::Reg(r) => self.reg_value(state, *r),
            Operand::Sum(a, b) => {
                let lhs = self.reg_value(state, *a);
                let rhs = self.reg_value(state, *b);
                lhs.add(&rhs)
            }
            Operand::Offset(r, d) => self.reg_value(state, *r).add(&Value::Concrete(*d)),
        }
    }

    /// The value a load produces: the bound symbolic source when the
    /// address resolves into a seeded region, a fresh ambient value
    /// otherwise.
    fn loaded_value(&mut self, state: &MachineState, addr: &AddrExpr) -> Value {
        if let Some(concrete) = addr.as_concrete() {
            if let Some(binding) = state.binding_at(concrete) {
                return Value::Symbolic(AddrExpr::from_var(binding.var.clone()));
            }
        }
        Value::Symbolic(AddrExpr::from_var(self.fresh_ambient("mem")))
    }
}

impl Stepper for BlockStepper {
    fn step(
        &mut self,
        state: &MachineState,
        node: Option<&BasicBlock>,
        ctx: &StepContext<'_>,
        hooks: &mut dyn SinkHooks,
    ) -> Result<StepOutcome, StepError> {
        let Some(block) = node else {
            debug!("no block at {}, nothing to interpret", state.pc());
            return Ok(StepOutcome::default());
        };

        let mut state = state.clone();
        let mut at = block.addr;
        let mut side_exits: Vec<(Address, Address)> = Vec::new();

        for stmt in &block.stmts {
            match stmt {
                Stmt::InsnMark { addr } => at = *addr,
                // Decode-time bookkeeping with no dynamic effect here;
                // the exit filter is the consumer.
                Stmt::ConstTmp { .. } | Stmt::SetPredState { .. } => {}
                Stmt::CondExit { target } => side_exits.push((at, *target)),
                Stmt::Load { dst, addr, size: _ } => {
                    let expr = self.eval(&mut state, addr).expr();
                    hooks.on_mem_read(ctx, at, &expr);
                    let value = self.loaded_value(&state, &expr);
                    state.set_reg(*dst, value);
                }
                Stmt::Store { addr, src: _, size: _ } => {
                    let expr = self.eval(&mut state, addr).expr();
                    hooks.on_mem_write(ctx, at, &expr);
                }
            }
        }

        let mut successors = Vec::new();
        for (exit_at, target) in side_exits {
            let mut taken = state.clone();
            taken.set_pc(target);
            taken.record_constraint(format!("side exit at {exit_at} to {target}"));
            successors.push(Successor {
                state: taken,
                kind: TransferKind::Normal,
                sat: Satisfiability::Sat,
            });
        }

        match &block.term {
            Terminator::Jump { target } => {
                let mut next = state.clone();
                next.set_pc(*target);
                successors.push(Successor {
                    state: next,
                    kind: TransferKind::Normal,
                    sat: Satisfiability::Sat,
                });
            }
            Terminator::Call { target, ret } => {
                let mut callee = state.clone();
                callee.set_reg(Reg::LR, Value::Concrete(ret.value()));
                callee.set_pc(*target);
                successors.push(Successor {
                    state: callee,
                    kind: TransferKind::Call,
                    sat: Satisfiability::Sat,
                });
            }
            Terminator::Return => match state.concrete_reg(Reg::LR) {
                Ok(ret) => {
                    let mut next = state.clone();
                    next.set_pc(Address(ret));
                    successors.push(Successor {
                        state: next,
                        kind: TransferKind::Return,
                        sat: Satisfiability::Sat,
                    });
                }
                Err(_) => {
                    debug!("return at {at} through unresolved link register");
                    successors.push(Successor {
                        state: state.clone(),
                        kind: TransferKind::Return,
                        sat: Satisfiability::Unconstrained,
                    });
                }
            },
            Terminator::ServiceCall { ret } => {
                let mut next = state.clone();
                let resume = hooks.on_syscall(ctx, at, &mut next).unwrap_or(*ret);
                next.set_pc(resume);
                successors.push(Successor {
                    state: next,
                    kind: TransferKind::Syscall,
                    sat: Satisfiability::Sat,
                });
            }
            Terminator::NoDecode => {
                successors.push(Successor {
                    state: state.clone(),
                    kind: TransferKind::NoDecode,
                    sat: Satisfiability::Sat,
                });
            }
        }

        Ok(StepOutcome { successors })
    }
}
