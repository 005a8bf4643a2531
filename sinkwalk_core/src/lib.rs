pub mod addr;
pub mod callstack;
pub mod config;
pub mod engine;
pub mod expr;
pub mod filter;
pub mod finding;
pub mod program;
pub mod report;
pub mod state;
pub mod stepper;
pub mod taint;

pub use addr::Address;
pub use callstack::CallStack;
pub use config::{ExplorerSettings, ReportSettings, SinkwalkConfig};
pub use engine::{ExplorationUnit, Explorer, ExplorerError};
pub use expr::{AddrExpr, SymVar, VarOrigin};
pub use filter::{COMPACT_BRANCH_MNEMONICS, filter_compact_exits};
pub use finding::{Finding, FindingKind, FindingSet};
pub use program::{
    BasicBlock, Instruction, Operand, ProgramModel, StaticProgram, Stmt, Terminator,
};
pub use state::{MachineState, MemBinding, Reg, StateError, Value};
pub use stepper::{
    BlockStepper, NoOpHooks, Satisfiability, SinkHooks, StepContext, StepError, StepOutcome,
    Stepper, Successor, TransferKind,
};
pub use taint::TaintOracle;
