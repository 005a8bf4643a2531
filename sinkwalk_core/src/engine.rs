use crate::addr::Address;
use crate::callstack::{self, CallStack};
use crate::config::ExplorerSettings;
use crate::expr::{AddrExpr, SymVar};
use crate::filter::filter_compact_exits;
use crate::finding::{FindingKind, FindingSet};
use crate::program::ProgramModel;
use crate::state::{MachineState, Reg, Value};
use crate::stepper::{Satisfiability, SinkHooks, StepContext, Stepper, Successor, TransferKind};
use crate::taint::TaintOracle;
use log::{debug, warn};
use rand_core::RngCore;
use std::collections::{HashSet, VecDeque};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplorerError {
    /// A run needs at least one seed unit to start from.
    #[error("no seed units supplied")]
    NoSeeds,
}

/// One unit of work: a call stack paired with the machine state that it
/// exclusively owns. Units are transient — created as seeds or derived
/// from a stepped unit's successors, dropped once stepped or recognized
/// as duplicates.
#[derive(Clone, Debug)]
pub struct ExplorationUnit {
    pub stack: CallStack,
    pub state: MachineState,
    /// The transfer that produced this unit. Part of the re-visit key.
    pub kind: TransferKind,
}

impl ExplorationUnit {
    /// A seed at the state's current address, rooted in a stack naming
    /// the entry point itself.
    pub fn seed(state: MachineState) -> Self {
        Self {
            stack: CallStack::from_entry(state.pc()),
            state,
            kind: TransferKind::Normal,
        }
    }
}

/// The hook sink handed to the stepper: consults the oracle, records
/// first-per-path findings, and short-circuits service calls.
struct HookRecorder<'a> {
    oracle: &'a TaintOracle,
    findings: &'a mut FindingSet,
    sentinel: Address,
}

impl SinkHooks for HookRecorder<'_> {
    fn on_mem_read(&mut self, ctx: &StepContext<'_>, at: Address, addr: &AddrExpr) {
        if self.oracle.is_tainted(addr)
            && self
                .findings
                .record(FindingKind::TaintedRead, at, ctx.stack)
        {
            warn!("tainted read at {at} under [{}]", ctx.stack);
        }
    }

    fn on_mem_write(&mut self, ctx: &StepContext<'_>, at: Address, addr: &AddrExpr) {
        if self.oracle.is_tainted(addr)
            && self
                .findings
                .record(FindingKind::TaintedWrite, at, ctx.stack)
        {
            warn!("tainted write at {at} under [{}]", ctx.stack);
        }
    }

    fn on_syscall(
        &mut self,
        ctx: &StepContext<'_>,
        at: Address,
        state: &mut MachineState,
    ) -> Option<Address> {
        for reg in Reg::SYSCALL_ARGS {
            let Some(value) = state.reg(reg) else {
                continue;
            };
            if self.oracle.is_tainted(&value.expr())
                && self
                    .findings
                    .record(FindingKind::TaintedSyscall, at, ctx.stack)
            {
                warn!(
                    "tainted service-call argument {reg} at {at} under [{}]",
                    ctx.stack
                );
            }
        }
        // Never descend into the service handler: poison the return
        // path so the successor dies at the sentinel.
        state.set_reg(Reg::LR, Value::Concrete(self.sentinel.value()));
        Some(self.sentinel)
    }
}

/// The call-stack-sensitive exploration engine. Owns the worklist, the
/// dedup sets, and the accumulated findings; strictly sequential, one
/// unit at a time.
pub struct Explorer<'p, P: ProgramModel, S: Stepper> {
    program: &'p P,
    stepper: S,
    oracle: TaintOracle,
    settings: ExplorerSettings,
    findings: FindingSet,
    worklist: VecDeque<ExplorationUnit>,
    seen: HashSet<(CallStack, Address)>,
    processed: HashSet<(CallStack, Address, TransferKind)>,
    units_stepped: u64,
    fresh_fake: u64,
}

impl<'p, P: ProgramModel, S: Stepper> Explorer<'p, P, S> {
    pub fn new(program: &'p P, stepper: S, settings: ExplorerSettings) -> Self {
        let oracle = TaintOracle::new(settings.allow_multi_source);
        Self {
            program,
            stepper,
            oracle,
            settings,
            findings: FindingSet::new(),
            worklist: VecDeque::new(),
            seen: HashSet::new(),
            processed: HashSet::new(),
            units_stepped: 0,
            fresh_fake: 0,
        }
    }

    pub fn findings(&self) -> &FindingSet {
        &self.findings
    }

    pub fn into_findings(self) -> FindingSet {
        self.findings
    }

    pub fn units_stepped(&self) -> u64 {
        self.units_stepped
    }

    pub fn stepper(&self) -> &S {
        &self.stepper
    }

    /// Walks the program breadth-first from the seeds until the
    /// worklist empties or the iteration cap strikes. Findings
    /// accumulate as a side effect of the hooks fired during stepping.
    pub fn run(
        &mut self,
        seeds: Vec<ExplorationUnit>,
        rng: &mut dyn RngCore,
    ) -> Result<(), ExplorerError> {
        if seeds.is_empty() {
            return Err(ExplorerError::NoSeeds);
        }
        for unit in seeds {
            self.seen.insert((unit.stack.clone(), unit.state.pc()));
            self.worklist.push_back(unit);
        }
        let sentinel = Address(self.settings.sentinel_return);

        while let Some(unit) = self.worklist.pop_front() {
            if let Some(cap) = self.settings.max_iterations {
                if self.units_stepped >= cap {
                    warn!(
                        "iteration cap of {cap} reached, stopping with {} units queued",
                        self.worklist.len()
                    );
                    break;
                }
            }

            let addr = unit.state.pc();
            if addr == sentinel {
                continue;
            }

            // A unit can be pushed once but re-derived by several paths
            // before it is dequeued; the processed set makes re-visits
            // idempotent where the admission-time seen set cannot.
            let key = (unit.stack.clone(), addr, unit.kind);
            if self.processed.contains(&key) {
                continue;
            }
            self.processed.insert(key);
            self.units_stepped += 1;
            debug!(
                "processing {addr} (stack depth {}, kind {})",
                unit.stack.depth(),
                unit.kind
            );

            let node = self.program.node(addr);
            if node.is_none() {
                debug!("no node at {addr}, taking unhinted step");
            }
            let ctx = StepContext { stack: &unit.stack };
            let mut recorder = HookRecorder {
                oracle: &self.oracle,
                findings: &mut self.findings,
                sentinel,
            };
            let mut successors = match self.stepper.step(&unit.state, node, &ctx, &mut recorder) {
                Ok(outcome) => outcome.successors,
                Err(e) => {
                    debug!("step at {addr} failed: {e}");
                    continue;
                }
            };

            // Some lower layers present an import or veneer call as a
            // call back into the block being stepped. There is no body
            // to walk; run the boundary check on the current state and
            // end the path here.
            if self.settings.self_call_boundary
                && successors.iter().any(|s| {
                    s.sat == Satisfiability::Sat
                        && s.kind == TransferKind::Call
                        && s.state.pc() == addr
                })
            {
                debug!("call re-enters {addr}, treating as import boundary");
                let mut boundary = unit.state.clone();
                recorder.on_syscall(&ctx, addr, &mut boundary);
                continue;
            }

            let any_call = successors.iter().any(|s| s.kind == TransferKind::Call);
            let any_fake = successors.iter().any(|s| s.kind == TransferKind::FakeReturn);
            if self.settings.use_fake_returns && any_call && !any_fake {
                if let Some(fake) = self.synthesize_fake_return(&unit, &successors) {
                    successors.push(fake);
                }
            }

            // Statically recovered edges the stepper failed to produce,
            // e.g. an indirect jump it could not resolve.
            let stepped_addrs: HashSet<Address> = successors
                .iter()
                .filter(|s| s.sat != Satisfiability::Unconstrained)
                .map(|s| s.state.pc())
                .collect();
            let missing: Vec<Address> = self
                .program
                .static_successors(addr)
                .iter()
                .copied()
                .filter(|a| !stepped_addrs.contains(a))
                .collect();

            let candidates: Vec<Successor> = successors
                .into_iter()
                .filter(|s| {
                    s.kind != TransferKind::NoDecode && s.sat != Satisfiability::Unconstrained
                })
                .collect();
            if candidates.is_empty() {
                debug!("no viable successors at {addr}, abandoning path");
                continue;
            }

            let mut candidates = filter_compact_exits(self.program, addr, candidates, rng);
            if candidates.is_empty() {
                debug!("all successors of {addr} filtered out, abandoning path");
                continue;
            }

            // A real return supersedes whatever other exits survived.
            if candidates.iter().any(|s| s.kind == TransferKind::Return) {
                candidates.retain(|s| s.kind == TransferKind::Return);
            }

            for target in missing {
                let mut forced = candidates[0].clone();
                forced.state.set_pc(target);
                candidates.push(forced);
            }

            let mut appended = 0usize;
            for succ in candidates {
                let dest = succ.state.pc();
                let call_return = if succ.kind == TransferKind::Call {
                    match succ.state.concrete_reg(Reg::LR) {
                        Ok(ret) => Some(Address(ret)),
                        Err(e) => {
                            debug!("call successor at {dest} has no usable return address: {e}");
                            None
                        }
                    }
                } else {
                    None
                };

                let Some(new_stack) =
                    callstack::transfer(&unit.stack, succ.kind, unit.kind, dest, call_return)
                else {
                    debug!("discarding call successor into live frame at {dest}");
                    continue;
                };

                if self.seen.contains(&(new_stack.clone(), dest)) {
                    continue;
                }
                // Fake returns may revisit addresses a real return
                // already covers; keeping them out of the seen set
                // stops them from shadowing those returns.
                if succ.kind != TransferKind::FakeReturn {
                    self.seen.insert((new_stack.clone(), dest));
                }

                let mut state = succ.state;
                state.release_constraints();
                self.worklist.push_back(ExplorationUnit {
                    stack: new_stack,
                    state,
                    kind: succ.kind,
                });
                appended += 1;
            }
            debug!("appended {appended} successors from {addr}");
        }

        Ok(())
    }

    /// Builds the sibling successor that models "the call happened and
    /// returned something unknown": control lands at the call's return
    /// site, the link register is restored to the caller's, and the
    /// return-value register is replaced with a synthesized source the
    /// oracle excludes.
    fn synthesize_fake_return(
        &mut self,
        unit: &ExplorationUnit,
        successors: &[Successor],
    ) -> Option<Successor> {
        let call = successors.iter().find(|s| s.kind == TransferKind::Call)?;
        let ret = match call.state.concrete_reg(Reg::LR) {
            Ok(ret) => Address(ret),
            Err(e) => {
                debug!("cannot synthesize fake return: {e}");
                return None;
            }
        };

        let mut state = call.state.clone();
        state.set_pc(ret);
        if let Some(caller_lr) = unit.state.reg(Reg::LR) {
            state.set_reg(Reg::LR, caller_lr.clone());
        }
        self.fresh_fake += 1;
        state.set_reg(
            Reg::RET,
            Value::Symbolic(AddrExpr::from_var(SymVar::synthetic(format!(
                "fake_ret_{}",
                self.fresh_fake
            )))),
        );

        Some(Successor {
            state,
            kind: TransferKind::FakeReturn,
            sat: Satisfiability::Sat,
        })
    }
}
