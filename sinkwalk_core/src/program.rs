use crate::addr::Address;
use crate::state::Reg;
use std::collections::HashMap;

/// An operand of a load or store, evaluated against the machine state.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Imm(u64),
    Reg(Reg),
    /// `base + index`.
    Sum(Reg, Reg),
    /// `base + displacement`.
    Offset(Reg, u64),
}

/// One decoded statement of a basic block.
///
/// This is the closed vocabulary the exit filter scans plus the memory
/// and service-call effects the sink hooks observe. It is deliberately
/// not a full IR.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// Start of the instruction at `addr`; statements up to the next
    /// mark belong to it.
    InsnMark { addr: Address },
    /// Load of a compile-time constant into temporary `tmp`.
    ConstTmp { tmp: u32, value: u64 },
    /// Write of temporary `tmp` into the predication-state register.
    SetPredState { tmp: u32 },
    /// Conditional side exit to `target`, attached to the current
    /// instruction.
    CondExit { target: Address },
    /// Read of `size` bytes at `addr` into `dst`.
    Load { dst: Reg, addr: Operand, size: u8 },
    /// Write of `size` bytes of `src` at `addr`.
    Store { addr: Operand, src: Operand, size: u8 },
}

/// How control leaves a block.
#[derive(Clone, Debug, PartialEq)]
pub enum Terminator {
    /// Fallthrough or unconditional branch.
    Jump { target: Address },
    /// Direct call; `ret` is the address the callee returns to.
    Call { target: Address, ret: Address },
    /// Return through the link register.
    Return,
    /// Service-call boundary; execution resumes at `ret`.
    ServiceCall { ret: Address },
    /// Undecodable tail.
    NoDecode,
}

/// Instruction-level view of a block entry: just enough for mnemonic
/// checks.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub addr: Address,
    pub mnemonic: String,
}

impl Instruction {
    pub fn new(addr: Address, mnemonic: impl Into<String>) -> Self {
        Self {
            addr,
            mnemonic: mnemonic.into(),
        }
    }
}

/// A recovered basic block: address, byte size (the stepper's bound),
/// instruction list, statement list and terminator.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub addr: Address,
    pub size: u64,
    pub insns: Vec<Instruction>,
    pub stmts: Vec<Stmt>,
    pub term: Terminator,
}

/// The pre-built control-flow graph the engine explores. Recovery of
/// the graph happens elsewhere; this layer only answers lookups.
pub trait ProgramModel {
    /// The basic block starting at `addr`, if one was recovered there.
    fn node(&self, addr: Address) -> Option<&BasicBlock>;

    /// Statically recovered successor edges of the node at `addr`.
    /// Empty when the node is unknown or has no recovered edges.
    fn static_successors(&self, addr: Address) -> &[Address];
}

/// In-memory `ProgramModel` built block by block.
#[derive(Debug, Default)]
pub struct StaticProgram {
    blocks: HashMap<Address, BasicBlock>,
    edges: HashMap<Address, Vec<Address>>,
}

impl StaticProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, block: BasicBlock) {
        self.blocks.insert(block.addr, block);
    }

    /// Records a statically known edge `from -> to`.
    pub fn add_edge(&mut self, from: Address, to: Address) {
        self.edges.entry(from).or_default().push(to);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl ProgramModel for StaticProgram {
    fn node(&self, addr: Address) -> Option<&BasicBlock> {
        self.blocks.get(&addr)
    }

    fn static_successors(&self, addr: Address) -> &[Address] {
        self.edges.get(&addr).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jump_block(addr: u64, target: u64) -> BasicBlock {
        BasicBlock {
            addr: Address(addr),
            size: 4,
            insns: vec![Instruction::new(Address(addr), "b")],
            stmts: vec![Stmt::InsnMark {
                addr: Address(addr),
            }],
            term: Terminator::Jump {
                target: Address(target),
            },
        }
    }

    #[test]
    fn lookup_returns_inserted_blocks() {
        let mut program = StaticProgram::new();
        assert!(program.is_empty());
        program.add_block(jump_block(0x1000, 0x1004));
        program.add_block(jump_block(0x1004, 0x1008));

        assert_eq!(program.len(), 2);
        assert_eq!(program.node(Address(0x1000)).unwrap().size, 4);
        assert!(program.node(Address(0x2000)).is_none());
    }

    #[test]
    fn static_successors_default_to_empty() {
        let mut program = StaticProgram::new();
        program.add_block(jump_block(0x1000, 0x1004));
        assert!(program.static_successors(Address(0x1000)).is_empty());

        program.add_edge(Address(0x1000), Address(0x1004));
        program.add_edge(Address(0x1000), Address(0x3000));
        assert_eq!(
            program.static_successors(Address(0x1000)),
            &[Address(0x1004), Address(0x3000)]
        );
    }
}
