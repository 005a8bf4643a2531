use crate::addr::Address;
use crate::program::{ProgramModel, Stmt};
use crate::stepper::{Satisfiability, Successor};
use log::debug;
use rand_core::RngCore;
use std::collections::{HashMap, HashSet};

/// Conditional-branch and compare-and-branch mnemonics of the compact
/// encoding. An exit attached to one of these is a real branch no
/// matter what the predication state says.
pub const COMPACT_BRANCH_MNEMONICS: [&str; 18] = [
    "beq", "bne", "bcs", "bhs", "bcc", "blo", "bmi", "bpl", "bvs", "bvc", "bhi", "bls", "bge",
    "blt", "bgt", "ble", "cbz", "cbnz",
];

/// Removes successors of a compact-mode block that are artifacts of the
/// predicated encoding rather than real control transfers.
///
/// Predicated encodings decide branches at instruction-decode time, not
/// at a branch opcode, so a naive successor enumeration invents exits
/// the architecture never takes. The scan below recognizes the
/// predication-state load, counts how many following instructions it
/// guards, and treats only those (plus anything with a genuine branch
/// mnemonic) as able to produce an exit. An exit from any other
/// instruction whose destination the recovered graph does not already
/// know is dropped.
///
/// Blocks outside compact mode pass through unchanged. When several
/// successors share a suspect destination, exactly one is dropped: an
/// unsatisfiable copy when one exists, otherwise an arbitrary one drawn
/// from `rng` — the tie has no meaningful order.
pub fn filter_compact_exits<P: ProgramModel>(
    program: &P,
    addr: Address,
    mut successors: Vec<Successor>,
    rng: &mut dyn RngCore,
) -> Vec<Successor> {
    if successors.is_empty() || !addr.is_compact() {
        return successors;
    }
    let Some(block) = program.node(addr) else {
        return successors;
    };
    let static_edges = program.static_successors(addr);

    let mut guard_left = 0u32;
    let mut const_tmps: HashMap<u32, u64> = HashMap::new();
    let mut eligible: HashSet<Address> = HashSet::new();

    for stmt in &block.stmts {
        match stmt {
            Stmt::InsnMark { addr } => {
                if guard_left > 0 {
                    guard_left -= 1;
                    eligible.insert(*addr);
                }
            }
            Stmt::ConstTmp { tmp, value } => {
                const_tmps.insert(*tmp, *value);
            }
            Stmt::SetPredState { tmp } => {
                if let Some(&encoded) = const_tmps.get(tmp) {
                    // One guarded instruction per occupied byte of the
                    // predication state.
                    guard_left = 0;
                    let mut bits = encoded;
                    while bits != 0 {
                        guard_left += 1;
                        bits >>= 8;
                    }
                }
            }
            _ => {}
        }
    }

    for insn in &block.insns {
        if COMPACT_BRANCH_MNEMONICS.contains(&insn.mnemonic.as_str()) {
            eligible.insert(insn.addr);
        }
    }

    let mut at = block.addr;
    for stmt in &block.stmts {
        match stmt {
            Stmt::InsnMark { addr } => at = *addr,
            Stmt::CondExit { target }
                if !eligible.contains(&at) && !static_edges.contains(target) =>
            {
                let dups: Vec<usize> = successors
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.state.pc() == *target)
                    .map(|(i, _)| i)
                    .collect();
                match dups.len() {
                    0 => {}
                    1 => {
                        debug!("dropping spurious exit {at} -> {target}");
                        successors.remove(dups[0]);
                    }
                    _ => {
                        let victim = dups
                            .iter()
                            .copied()
                            .find(|&i| successors[i].sat == Satisfiability::Unsat)
                            .unwrap_or_else(|| {
                                dups[(rng.next_u64() as usize) % dups.len()]
                            });
                        debug!("dropping one duplicate exit {at} -> {target}");
                        successors.remove(victim);
                    }
                }
            }
            _ => {}
        }
    }

    successors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{BasicBlock, Instruction, StaticProgram, Terminator};
    use crate::state::MachineState;
    use crate::stepper::TransferKind;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    fn succ_at(addr: u64, sat: Satisfiability) -> Successor {
        Successor {
            state: MachineState::new(Address(addr)),
            kind: TransferKind::Normal,
            sat,
        }
    }

    /// A compact-mode block whose predication state guards exactly two
    /// instructions, with a conditional exit attached to a third,
    /// unguarded one.
    fn predicated_block(third_mnemonic: &str) -> BasicBlock {
        let a0 = Address(0x1001);
        let a1 = Address(0x1003);
        let a2 = Address(0x1005);
        let a3 = Address(0x1007);
        BasicBlock {
            addr: a0,
            size: 8,
            insns: vec![
                Instruction::new(a0, "it"),
                Instruction::new(a1, "addeq"),
                Instruction::new(a2, "moveq"),
                Instruction::new(a3, third_mnemonic),
            ],
            stmts: vec![
                Stmt::InsnMark { addr: a0 },
                // Two occupied bytes: two guarded instructions follow.
                Stmt::ConstTmp {
                    tmp: 1,
                    value: 0x0c04,
                },
                Stmt::SetPredState { tmp: 1 },
                Stmt::InsnMark { addr: a1 },
                Stmt::CondExit {
                    target: Address(0x1011),
                },
                Stmt::InsnMark { addr: a2 },
                Stmt::InsnMark { addr: a3 },
                Stmt::CondExit {
                    target: Address(0x1021),
                },
            ],
            term: Terminator::Jump {
                target: Address(0x1009),
            },
        }
    }

    fn program_with(block: BasicBlock) -> StaticProgram {
        let mut program = StaticProgram::new();
        program.add_block(block);
        program
    }

    #[test]
    fn normal_mode_blocks_pass_through() {
        let program = StaticProgram::new();
        let mut rng = ChaCha8Rng::from_seed([0; 32]);
        let succs = vec![succ_at(0x2000, Satisfiability::Sat)];
        let out = filter_compact_exits(&program, Address(0x1000), succs, &mut rng);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn unguarded_exit_is_dropped_without_branch_mnemonic() {
        let program = program_with(predicated_block("mov"));
        let mut rng = ChaCha8Rng::from_seed([1; 32]);
        // Exit from the guarded instruction survives, exit from the
        // third (unguarded, non-branch) instruction does not.
        let succs = vec![
            succ_at(0x1011, Satisfiability::Sat),
            succ_at(0x1021, Satisfiability::Sat),
            succ_at(0x1009, Satisfiability::Sat),
        ];
        let out = filter_compact_exits(&program, Address(0x1001), succs, &mut rng);
        let addrs: Vec<u64> = out.iter().map(|s| s.state.pc().value()).collect();
        assert_eq!(addrs, vec![0x1011, 0x1009]);
    }

    #[test]
    fn branch_mnemonic_overrides_predication_suppression() {
        let program = program_with(predicated_block("cbz"));
        let mut rng = ChaCha8Rng::from_seed([2; 32]);
        let succs = vec![
            succ_at(0x1011, Satisfiability::Sat),
            succ_at(0x1021, Satisfiability::Sat),
        ];
        let out = filter_compact_exits(&program, Address(0x1001), succs, &mut rng);
        assert_eq!(out.len(), 2, "real branch exits must survive");
    }

    #[test]
    fn statically_known_destination_is_kept() {
        let mut program = program_with(predicated_block("mov"));
        program.add_edge(Address(0x1001), Address(0x1021));
        let mut rng = ChaCha8Rng::from_seed([3; 32]);
        let succs = vec![
            succ_at(0x1011, Satisfiability::Sat),
            succ_at(0x1021, Satisfiability::Sat),
        ];
        let out = filter_compact_exits(&program, Address(0x1001), succs, &mut rng);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn duplicate_destination_drops_unsatisfiable_copy_first() {
        let program = program_with(predicated_block("mov"));
        let mut rng = ChaCha8Rng::from_seed([4; 32]);
        let succs = vec![
            succ_at(0x1021, Satisfiability::Unsat),
            succ_at(0x1021, Satisfiability::Sat),
        ];
        let out = filter_compact_exits(&program, Address(0x1001), succs, &mut rng);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sat, Satisfiability::Sat);
    }

    #[test]
    fn all_satisfiable_duplicates_lose_exactly_one() {
        let program = program_with(predicated_block("mov"));
        let mut rng = ChaCha8Rng::from_seed([5; 32]);
        let succs = vec![
            succ_at(0x1021, Satisfiability::Sat),
            succ_at(0x1021, Satisfiability::Sat),
            succ_at(0x1021, Satisfiability::Sat),
        ];
        let out = filter_compact_exits(&program, Address(0x1001), succs, &mut rng);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|s| s.sat == Satisfiability::Sat));
    }
}
