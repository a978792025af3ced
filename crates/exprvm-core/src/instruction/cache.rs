use std::sync::{Arc, OnceLock};

use super::Instruction;

/// Fixed-size table of lazily created shared instructions.
///
/// Each slot is initialized at most once; concurrent callers racing on an
/// empty slot all observe the single winning instance.
pub(crate) struct Flyweights<const N: usize> {
    slots: [OnceLock<Arc<Instruction>>; N],
}

impl<const N: usize> Flyweights<N> {
    pub(crate) const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: OnceLock<Arc<Instruction>> = OnceLock::new();
        Self { slots: [EMPTY; N] }
    }

    pub(crate) const fn len(&self) -> usize {
        N
    }

    pub(crate) fn get_or_init(
        &self,
        index: usize,
        create: impl FnOnce() -> Instruction,
    ) -> Arc<Instruction> {
        self.slots[index]
            .get_or_init(|| Arc::new(create()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_initialized_once() {
        static TABLE: Flyweights<4> = Flyweights::new();
        let first = TABLE.get_or_init(2, || Instruction::Pop);
        let second = TABLE.get_or_init(2, || Instruction::Dup);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(*second, Instruction::Pop));
        assert_eq!(TABLE.len(), 4);
    }
}
