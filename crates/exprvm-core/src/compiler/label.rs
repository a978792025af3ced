use std::fmt;

/// Handle to a `BranchLabel` owned by an `InstructionList`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub(crate) usize);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label#{}", self.0)
    }
}

/// Resolved jump target used by indexed branches at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeLabel {
    pub index: usize,
    pub stack_depth: usize,
    pub continuation_stack_depth: usize,
}

impl RuntimeLabel {
    pub fn new(index: usize, stack_depth: usize, continuation_stack_depth: usize) -> Self {
        Self {
            index,
            stack_depth,
            continuation_stack_depth,
        }
    }
}

impl fmt::Display for RuntimeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "->{} [stack {}, continuations {}]",
            self.index, self.stack_depth, self.continuation_stack_depth
        )
    }
}

/// Compile-time jump target.
///
/// A label is marked exactly once. Offset branches emitted before the mark
/// are queued and patched when it happens; indexed branches refer to the
/// label through its runtime-label index instead.
#[derive(Debug, Default)]
pub(crate) struct BranchLabel {
    label_index: Option<usize>,
    target: Option<RuntimeLabel>,
    forward_branch_fixups: Vec<usize>,
}

impl BranchLabel {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn label_index(&self) -> Option<usize> {
        self.label_index
    }

    pub(crate) fn set_label_index(&mut self, index: usize) {
        debug_assert!(self.label_index.is_none());
        self.label_index = Some(index);
    }

    pub(crate) fn target(&self) -> Option<RuntimeLabel> {
        self.target
    }

    /// Whether branches are still waiting for this label to be marked.
    pub(crate) fn has_pending_branches(&self) -> bool {
        !self.forward_branch_fixups.is_empty()
    }

    /// Records the target and hands back the branches waiting for it.
    pub(crate) fn mark(&mut self, target: RuntimeLabel) -> Vec<usize> {
        assert!(self.target.is_none(), "label marked twice");
        self.target = Some(target);
        std::mem::take(&mut self.forward_branch_fixups)
    }

    /// Registers the branch at `branch_index`; returns its offset when the
    /// target is already known.
    pub(crate) fn add_branch(&mut self, branch_index: usize) -> Option<i32> {
        match self.target {
            Some(target) => Some(target.index as i32 - branch_index as i32),
            None => {
                self.forward_branch_fixups.push(branch_index);
                None
            }
        }
    }

    pub(crate) fn to_runtime_label(&self) -> RuntimeLabel {
        match self.target {
            Some(target) => target,
            None => panic!("label referenced by an indexed branch was never marked"),
        }
    }
}
