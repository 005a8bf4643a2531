use crate::addr::Address;
use crate::callstack::CallStack;
use std::collections::HashSet;
use std::fmt;

/// The category of a taint-reaches-sink event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FindingKind {
    TaintedRead,
    TaintedWrite,
    TaintedSyscall,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FindingKind::TaintedRead => "tainted-read",
            FindingKind::TaintedWrite => "tainted-write",
            FindingKind::TaintedSyscall => "tainted-syscall",
        };
        f.write_str(name)
    }
}

/// One reported event: category, triggering address, and the full call
/// stack it was observed under. Findings are created once per unique
/// key and never mutated — they are the permanent output of a run.
#[derive(Clone, Debug)]
pub struct Finding {
    pub kind: FindingKind,
    pub at: Address,
    pub stack: CallStack,
    /// Stable hex identifier over the call path and address, for
    /// cross-run tracking of the same sink.
    pub id: String,
}

/// Dedup key: memory sinks are unique per (stack, address), service
/// calls once per stack.
#[derive(PartialEq, Eq, Hash)]
enum FindingKey {
    MemSink(CallStack, Address),
    Syscall(CallStack),
}

fn finding_id(kind: FindingKind, at: Address, stack: &CallStack) -> String {
    let mut bytes = Vec::with_capacity(1 + 8 + stack.depth() * 8);
    bytes.push(match kind {
        FindingKind::TaintedRead => 0u8,
        FindingKind::TaintedWrite => 1,
        FindingKind::TaintedSyscall => 2,
    });
    bytes.extend_from_slice(&at.value().to_le_bytes());
    for frame in stack.frames() {
        bytes.extend_from_slice(&frame.value().to_le_bytes());
    }
    format!("{:x}", md5::compute(&bytes))
}

/// The accumulated findings of a run, deduplicated at insertion so only
/// the first occurrence along a given call path is kept.
#[derive(Default)]
pub struct FindingSet {
    findings: Vec<Finding>,
    seen: HashSet<FindingKey>,
}

impl FindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the event iff it is the first for its key. Returns
    /// whether a new finding was created.
    pub fn record(&mut self, kind: FindingKind, at: Address, stack: &CallStack) -> bool {
        let key = match kind {
            FindingKind::TaintedSyscall => FindingKey::Syscall(stack.clone()),
            _ => FindingKey::MemSink(stack.clone(), at),
        };
        if !self.seen.insert(key) {
            return false;
        }
        self.findings.push(Finding {
            kind,
            at,
            stack: stack.clone(),
            id: finding_id(kind, at, stack),
        });
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter()
    }

    pub fn as_slice(&self) -> &[Finding] {
        &self.findings
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}
