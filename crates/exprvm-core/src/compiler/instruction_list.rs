use rustc_hash::FxHashMap;
use std::fmt::Write;
use std::sync::Arc;

use super::label::{BranchLabel, LabelId, RuntimeLabel};
use crate::instruction::{
    self, arithmetic, bitwise, comparison, control, convert, locals, ArithmeticOp, BitwiseOp,
    BranchKind, CompareOp, HostMethod, Instruction, LocalAccess, TryCatchFinallyHandler,
    TryFaultHandler, UnaryOp, LOAD_OBJECT_CACHE_SIZE,
};
use crate::types::Type;
use crate::vm::value::Value;

/// A finished program: instructions with every label resolved.
#[derive(Debug, Clone, Default)]
pub struct InstructionArray {
    pub instructions: Vec<Arc<Instruction>>,
    pub objects: Vec<Value>,
    pub labels: Vec<RuntimeLabel>,
    pub max_stack_depth: usize,
    pub max_continuation_depth: usize,
}

impl InstructionArray {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Listing with stack effects and the runtime labels pointing at each instruction.
    pub fn disassemble(&self, name: &str) -> String {
        let mut targets: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        for (label_index, label) in self.labels.iter().enumerate() {
            targets.entry(label.index).or_default().push(label_index);
        }

        let mut out = String::new();
        let _ = writeln!(out, "--- {} ---", name);
        let _ = writeln!(
            out,
            "{} instructions, {} objects, {} labels, max stack {}, max continuations {}",
            self.instructions.len(),
            self.objects.len(),
            self.labels.len(),
            self.max_stack_depth,
            self.max_continuation_depth
        );
        for (index, instruction) in self.instructions.iter().enumerate() {
            if let Some(labels) = targets.get(&index) {
                for label_index in labels {
                    let _ = writeln!(out, "L{}:", label_index);
                }
            }
            let _ = writeln!(
                out,
                "{:04} -{} +{}  {}",
                index,
                instruction.consumed_stack(),
                instruction.produced_stack(),
                instruction
            );
        }
        if let Some(labels) = targets.get(&self.instructions.len()) {
            for label_index in labels {
                let _ = writeln!(out, "L{}:", label_index);
            }
        }
        out
    }
}

/// Builder a compiler drives to emit a program.
///
/// Tracks the operand-stack and continuation-stack depth after every
/// emitted instruction so labels can record what their targets expect.
#[derive(Debug, Default)]
pub struct InstructionList {
    instructions: Vec<Arc<Instruction>>,
    objects: Vec<Value>,
    current_stack_depth: usize,
    max_stack_depth: usize,
    current_continuations_depth: usize,
    max_continuations_depth: usize,
    runtime_label_count: usize,
    labels: Vec<BranchLabel>,
}

impl InstructionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.instructions.len()
    }

    pub fn current_stack_depth(&self) -> usize {
        self.current_stack_depth
    }

    pub fn current_continuations_depth(&self) -> usize {
        self.current_continuations_depth
    }

    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    pub fn get_instruction(&self, index: usize) -> &Arc<Instruction> {
        &self.instructions[index]
    }

    /// Appends `instruction`, returning its index.
    pub fn emit(&mut self, instruction: Arc<Instruction>) -> usize {
        self.update_stack_depth(&instruction);
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    fn update_stack_depth(&mut self, instruction: &Instruction) {
        assert!(
            instruction.consumed_stack() <= self.current_stack_depth,
            "{} consumes {} values with {} on the stack",
            instruction,
            instruction.consumed_stack(),
            self.current_stack_depth
        );
        self.current_stack_depth -= instruction.consumed_stack();
        self.current_stack_depth += instruction.produced_stack();
        self.max_stack_depth = self.max_stack_depth.max(self.current_stack_depth);

        assert!(
            instruction.consumed_continuations() <= self.current_continuations_depth,
            "{} leaves a protected region that was never entered",
            instruction
        );
        self.current_continuations_depth -= instruction.consumed_continuations();
        self.current_continuations_depth += instruction.produced_continuations();
        self.max_continuations_depth = self
            .max_continuations_depth
            .max(self.current_continuations_depth);
    }

    /// Resolves every label and hands the program over.
    ///
    /// # Panics
    /// When a label used by a branch or an indexed jump was never marked.
    pub fn to_array(self) -> InstructionArray {
        let mut labels = vec![RuntimeLabel::new(0, 0, 0); self.runtime_label_count];
        for label in &self.labels {
            assert!(
                !label.has_pending_branches(),
                "label targeted by a branch was never marked"
            );
            if let Some(label_index) = label.label_index() {
                labels[label_index] = label.to_runtime_label();
            }
        }
        InstructionArray {
            instructions: self.instructions,
            objects: self.objects,
            labels,
            max_stack_depth: self.max_stack_depth,
            max_continuation_depth: self.max_continuations_depth,
        }
    }

    // Stack

    pub fn emit_pop(&mut self) {
        self.emit(instruction::pop());
    }

    pub fn emit_dup(&mut self) {
        self.emit(instruction::dup());
    }

    /// Pushes a constant. Null, booleans and small integers use shared
    /// instructions; other values go to the object table while it has room.
    pub fn emit_load(&mut self, value: Value) {
        if let Some(shared) = instruction::load_constant(&value) {
            self.emit(shared);
        } else if self.objects.len() < LOAD_OBJECT_CACHE_SIZE {
            let index = self.objects.len();
            self.objects.push(value);
            self.emit(instruction::load_cached_object(index));
        } else {
            self.emit(Arc::new(Instruction::LoadObject(value)));
        }
    }

    // Operators

    pub fn emit_arithmetic(&mut self, op: ArithmeticOp, ty: &Type) {
        self.emit(arithmetic::create(op, ty));
    }

    pub fn emit_add(&mut self, ty: &Type, checked: bool) {
        let op = if checked { ArithmeticOp::AddChecked } else { ArithmeticOp::Add };
        self.emit_arithmetic(op, ty);
    }

    pub fn emit_sub(&mut self, ty: &Type, checked: bool) {
        let op = if checked { ArithmeticOp::SubChecked } else { ArithmeticOp::Sub };
        self.emit_arithmetic(op, ty);
    }

    pub fn emit_mul(&mut self, ty: &Type, checked: bool) {
        let op = if checked { ArithmeticOp::MulChecked } else { ArithmeticOp::Mul };
        self.emit_arithmetic(op, ty);
    }

    pub fn emit_div(&mut self, ty: &Type) {
        self.emit_arithmetic(ArithmeticOp::Div, ty);
    }

    pub fn emit_modulo(&mut self, ty: &Type) {
        self.emit_arithmetic(ArithmeticOp::Modulo, ty);
    }

    pub fn emit_unary(&mut self, op: UnaryOp, ty: &Type) {
        self.emit(arithmetic::create_unary(op, ty));
    }

    pub fn emit_compare(&mut self, op: CompareOp, ty: &Type, lifted_to_null: bool) {
        self.emit(comparison::create(op, ty, lifted_to_null));
    }

    pub fn emit_bitwise(&mut self, op: BitwiseOp, ty: &Type) {
        self.emit(bitwise::create(op, ty));
    }

    pub fn emit_convert(&mut self, from: &Type, to: &Type, checked: bool) {
        let lifted = from.is_nullable() && to.is_nullable();
        self.emit(convert::create(from, to, checked, lifted));
    }

    // Locals

    pub fn emit_local(&mut self, access: LocalAccess, index: usize) {
        self.emit(locals::create(access, index));
    }

    pub fn emit_load_local(&mut self, index: usize) {
        self.emit_local(LocalAccess::Load, index);
    }

    pub fn emit_load_local_boxed(&mut self, index: usize) {
        self.emit_local(LocalAccess::LoadBoxed, index);
    }

    pub fn emit_load_local_from_closure(&mut self, index: usize) {
        self.emit_local(LocalAccess::LoadFromClosure, index);
    }

    pub fn emit_load_local_from_closure_boxed(&mut self, index: usize) {
        self.emit_local(LocalAccess::LoadFromClosureBoxed, index);
    }

    pub fn emit_store_local(&mut self, index: usize) {
        self.emit_local(LocalAccess::Store, index);
    }

    pub fn emit_store_local_boxed(&mut self, index: usize) {
        self.emit_local(LocalAccess::StoreBoxed, index);
    }

    pub fn emit_assign_local(&mut self, index: usize) {
        self.emit_local(LocalAccess::Assign, index);
    }

    pub fn emit_assign_local_boxed(&mut self, index: usize) {
        self.emit_local(LocalAccess::AssignBoxed, index);
    }

    pub fn emit_assign_local_to_closure(&mut self, index: usize) {
        self.emit_local(LocalAccess::AssignToClosure, index);
    }

    pub fn emit_initialize_local(&mut self, index: usize, ty: &Type) {
        self.emit(locals::initialize(index, ty));
    }

    pub fn emit_initialize_parameter(&mut self, index: usize) {
        self.emit(locals::initialize_parameter(index));
    }

    /// Rewrites the instruction at `instruction_index` to its boxed form when
    /// it touches local `index`.
    pub fn switch_to_boxed(&mut self, index: usize, instruction_index: usize) {
        if let Some(boxed) = self.instructions[instruction_index].box_if_index_matches(index) {
            self.instructions[instruction_index] = boxed;
        }
    }

    // Labels and branches

    pub fn make_label(&mut self) -> LabelId {
        self.labels.push(BranchLabel::new());
        LabelId(self.labels.len() - 1)
    }

    /// Binds `label` to the next instruction and patches the branches waiting for it.
    pub fn mark_label(&mut self, label: LabelId) {
        let target = RuntimeLabel::new(
            self.instructions.len(),
            self.current_stack_depth,
            self.current_continuations_depth,
        );
        for branch_index in self.labels[label.0].mark(target) {
            self.fixup_branch(branch_index, target.index as i32 - branch_index as i32);
        }
    }

    /// Marks a fresh label here and returns its runtime-label index.
    pub fn mark_runtime_label(&mut self) -> usize {
        let label = self.make_label();
        self.mark_label(label);
        self.ensure_label_index(label)
    }

    pub fn ensure_label_index(&mut self, label: LabelId) -> usize {
        if let Some(label_index) = self.labels[label.0].label_index() {
            return label_index;
        }
        let label_index = self.runtime_label_count;
        self.runtime_label_count += 1;
        self.labels[label.0].set_label_index(label_index);
        label_index
    }

    /// Instruction index `label` was marked at, if it has been marked.
    pub fn label_target(&self, label: LabelId) -> Option<usize> {
        self.labels[label.0].target().map(|target| target.index)
    }

    fn fixup_branch(&mut self, branch_index: usize, offset: i32) {
        let fixed = self.instructions[branch_index].fixup(offset);
        self.instructions[branch_index] = fixed;
    }

    fn emit_offset_branch(&mut self, kind: BranchKind, label: LabelId) {
        let branch_index = self.emit(control::branch(kind));
        if let Some(offset) = self.labels[label.0].add_branch(branch_index) {
            self.fixup_branch(branch_index, offset);
        }
    }

    pub fn emit_branch(&mut self, label: LabelId) {
        self.emit_branch_with(label, false, false);
    }

    pub fn emit_branch_with(&mut self, label: LabelId, has_result: bool, has_value: bool) {
        self.emit_offset_branch(
            BranchKind::Always {
                has_result,
                has_value,
            },
            label,
        );
    }

    pub fn emit_branch_true(&mut self, label: LabelId) {
        self.emit_offset_branch(BranchKind::IfTrue, label);
    }

    pub fn emit_branch_false(&mut self, label: LabelId) {
        self.emit_offset_branch(BranchKind::IfFalse, label);
    }

    pub fn emit_coalescing_branch(&mut self, label: LabelId) {
        self.emit_offset_branch(BranchKind::Coalescing, label);
    }

    pub fn emit_goto(
        &mut self,
        label: LabelId,
        has_result: bool,
        has_value: bool,
        label_target_gets_value: bool,
    ) {
        let label_index = self.ensure_label_index(label);
        self.emit(control::goto(
            label_index,
            has_result,
            has_value,
            label_target_gets_value,
        ));
    }

    // Protected regions

    pub fn emit_enter_try_finally(&mut self, finally_start: LabelId) -> usize {
        let label_index = self.ensure_label_index(finally_start);
        self.emit(Arc::new(Instruction::EnterTryCatchFinally {
            label_index,
            has_finally: true,
            handler: None,
        }))
    }

    pub fn emit_enter_try_catch(&mut self) -> usize {
        self.emit(Arc::new(Instruction::EnterTryCatchFinally {
            label_index: control::NO_LABEL,
            has_finally: false,
            handler: None,
        }))
    }

    pub fn emit_enter_try_fault(&mut self, fault_start: LabelId) -> usize {
        let label_index = self.ensure_label_index(fault_start);
        self.emit(Arc::new(Instruction::EnterTryFault {
            label_index,
            handler: None,
        }))
    }

    /// Attaches the handler descriptor to the try entry at `index`.
    ///
    /// # Panics
    /// When `index` is not an unset `EnterTryCatchFinally`, or the descriptor
    /// disagrees with it about the finally block.
    pub fn set_try_handler(&mut self, index: usize, handler: TryCatchFinallyHandler) {
        let updated = match &*self.instructions[index] {
            Instruction::EnterTryCatchFinally {
                label_index,
                has_finally,
                handler: None,
            } => {
                assert_eq!(
                    *has_finally,
                    handler.has_finally(),
                    "finally block of the try at {} disagrees with its entry",
                    index
                );
                Instruction::EnterTryCatchFinally {
                    label_index: *label_index,
                    has_finally: *has_finally,
                    handler: Some(Arc::new(handler)),
                }
            }
            other => panic!("instruction {} ({}) is not an unset try entry", index, other),
        };
        self.instructions[index] = Arc::new(updated);
    }

    pub fn set_try_fault_handler(&mut self, index: usize, handler: TryFaultHandler) {
        let updated = match &*self.instructions[index] {
            Instruction::EnterTryFault {
                label_index,
                handler: None,
            } => Instruction::EnterTryFault {
                label_index: *label_index,
                handler: Some(Arc::new(handler)),
            },
            other => panic!("instruction {} ({}) is not an unset try/fault entry", index, other),
        };
        self.instructions[index] = Arc::new(updated);
    }

    pub fn emit_enter_finally(&mut self, finally_start: LabelId) {
        let label_index = self.ensure_label_index(finally_start);
        self.emit(Arc::new(Instruction::EnterFinally(label_index)));
    }

    pub fn emit_leave_finally(&mut self) {
        self.emit(Arc::new(Instruction::LeaveFinally));
    }

    pub fn emit_enter_fault(&mut self, fault_start: LabelId) {
        let label_index = self.ensure_label_index(fault_start);
        self.emit(Arc::new(Instruction::EnterFault(label_index)));
    }

    pub fn emit_leave_fault(&mut self) {
        self.emit(Arc::new(Instruction::LeaveFault));
    }

    pub fn emit_enter_exception_handler(&mut self, has_value: bool) {
        self.emit(Arc::new(Instruction::EnterExceptionHandler { has_value }));
    }

    pub fn emit_leave_exception_handler(&mut self, has_value: bool, try_expression_end: LabelId) {
        let label_index = self.ensure_label_index(try_expression_end);
        self.emit(Arc::new(Instruction::LeaveExceptionHandler {
            label_index,
            has_value,
        }));
    }

    pub fn emit_enter_exception_filter(&mut self, has_value: bool) {
        self.emit(Arc::new(Instruction::EnterExceptionFilter { has_value }));
    }

    pub fn emit_leave_exception_filter(&mut self, has_value: bool) {
        self.emit(Arc::new(Instruction::LeaveExceptionFilter { has_value }));
    }

    pub fn emit_throw(&mut self) {
        self.emit(control::throw(true, false));
    }

    pub fn emit_throw_void(&mut self) {
        self.emit(control::throw(false, false));
    }

    pub fn emit_rethrow(&mut self) {
        self.emit(control::throw(true, true));
    }

    pub fn emit_rethrow_void(&mut self) {
        self.emit(control::throw(false, true));
    }

    // Objects and arrays

    pub fn emit_new(&mut self, ty: &Type, arg_count: usize) {
        self.emit(Arc::new(Instruction::New {
            ty: ty.clone(),
            arg_count,
        }));
    }

    pub fn emit_load_field(&mut self, field_index: usize) {
        self.emit(Arc::new(Instruction::LoadField(field_index)));
    }

    pub fn emit_store_field(&mut self, field_index: usize) {
        self.emit(Arc::new(Instruction::StoreField(field_index)));
    }

    pub fn emit_type_is(&mut self, ty: &Type) {
        self.emit(Arc::new(Instruction::TypeIs(ty.clone())));
    }

    pub fn emit_type_as(&mut self, ty: &Type) {
        self.emit(Arc::new(Instruction::TypeAs(ty.clone())));
    }

    pub fn emit_cast(&mut self, ty: &Type) {
        self.emit(Arc::new(Instruction::Cast(ty.clone())));
    }

    pub fn emit_null_check(&mut self) {
        self.emit(Arc::new(Instruction::NullCheck));
    }

    pub fn emit_call(&mut self, method: Arc<HostMethod>) {
        self.emit(Arc::new(Instruction::Call(method)));
    }

    pub fn emit_new_array(&mut self, element_type: &Type) {
        self.emit(Arc::new(Instruction::NewArray(element_type.clone())));
    }

    pub fn emit_new_array_init(&mut self, element_type: &Type, count: usize) {
        self.emit(Arc::new(Instruction::NewArrayInit {
            element_type: element_type.clone(),
            count,
        }));
    }

    pub fn emit_get_array_item(&mut self) {
        self.emit(Arc::new(Instruction::GetArrayItem));
    }

    pub fn emit_set_array_item(&mut self) {
        self.emit(Arc::new(Instruction::SetArrayItem));
    }

    pub fn emit_array_length(&mut self) {
        self.emit(Arc::new(Instruction::ArrayLength));
    }
}
