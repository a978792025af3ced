// Local-variable slots and closure variables of one compiled lambda.
//
// Variables are keyed by name. Redefining a name opens a nested scope that
// shadows the outer one until it is undefined again.

use rustc_hash::FxHashMap;

use super::instruction_list::InstructionList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub index: usize,
    pub is_boxed: bool,
    pub in_closure: bool,
}

impl LocalVariable {
    fn new(index: usize, in_closure: bool) -> Self {
        Self {
            index,
            is_boxed: false,
            in_closure,
        }
    }

    pub fn in_closure_or_boxed(&self) -> bool {
        self.in_closure || self.is_boxed
    }

    pub fn emit_load(&self, list: &mut InstructionList) {
        if self.in_closure {
            list.emit_load_local_from_closure(self.index);
        } else if self.is_boxed {
            list.emit_load_local_boxed(self.index);
        } else {
            list.emit_load_local(self.index);
        }
    }

    /// Pushes the cell holding the variable, for a nested closure to capture.
    ///
    /// # Panics
    /// When the variable is neither boxed nor in the closure.
    pub fn emit_load_cell(&self, list: &mut InstructionList) {
        assert!(self.in_closure_or_boxed(), "local {} has no cell", self.index);
        if self.in_closure {
            list.emit_load_local_from_closure_boxed(self.index);
        } else {
            list.emit_load_local(self.index);
        }
    }

    pub fn emit_store(&self, list: &mut InstructionList) {
        if self.in_closure {
            list.emit_assign_local_to_closure(self.index);
            list.emit_pop();
        } else if self.is_boxed {
            list.emit_store_local_boxed(self.index);
        } else {
            list.emit_store_local(self.index);
        }
    }

    pub fn emit_assign(&self, list: &mut InstructionList) {
        if self.in_closure {
            list.emit_assign_local_to_closure(self.index);
        } else if self.is_boxed {
            list.emit_assign_local_boxed(self.index);
        } else {
            list.emit_assign_local(self.index);
        }
    }
}

/// Handle returned by `define_local`, consumed by `undefine_local`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDefinition {
    pub index: usize,
    pub name: String,
}

#[derive(Debug)]
struct VariableScope {
    variable: LocalVariable,
    start: usize,
    stop: usize,
    parent: Option<usize>,
    child_scopes: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct LocalVariables {
    scopes: Vec<VariableScope>,
    variables: FxHashMap<String, usize>,
    closure_variables: FxHashMap<String, LocalVariable>,
    local_count: usize,
    max_local_count: usize,
}

impl LocalVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a slot for `name`, live from instruction `start`.
    pub fn define_local(&mut self, name: &str, start: usize) -> LocalDefinition {
        let variable = LocalVariable::new(self.local_count, false);
        self.local_count += 1;
        self.max_local_count = self.max_local_count.max(self.local_count);

        let parent = self.variables.get(name).copied();
        let scope_id = self.scopes.len();
        self.scopes.push(VariableScope {
            variable,
            start,
            stop: usize::MAX,
            parent,
            child_scopes: Vec::new(),
        });
        if let Some(parent) = parent {
            self.scopes[parent].child_scopes.push(scope_id);
        }
        self.variables.insert(name.to_string(), scope_id);
        LocalDefinition {
            index: variable.index,
            name: name.to_string(),
        }
    }

    /// Ends the scope of `definition` at instruction `end`, uncovering any outer scope.
    ///
    /// # Panics
    /// When the variable is not defined.
    pub fn undefine_local(&mut self, definition: &LocalDefinition, end: usize) {
        let scope_id = self.scope_of(&definition.name);
        let scope = &mut self.scopes[scope_id];
        scope.stop = end;
        match scope.parent {
            Some(parent) => {
                self.variables.insert(definition.name.clone(), parent);
            }
            None => {
                self.variables.remove(&definition.name);
            }
        }
        self.local_count -= 1;
    }

    /// Switches `name` to a boxed slot, rewriting the accesses already emitted
    /// in its scope. Nested scopes that shadow it are left alone.
    pub fn box_variable(&mut self, name: &str, instructions: &mut InstructionList) {
        let scope_id = self.scope_of(name);
        self.scopes[scope_id].variable.is_boxed = true;

        let scope = &self.scopes[scope_id];
        let index = scope.variable.index;
        let stop = scope.stop.min(instructions.count());
        let mut children = scope.child_scopes.iter().map(|&child| &self.scopes[child]).peekable();
        let mut i = scope.start;
        while i < stop {
            if let Some(child) = children.peek() {
                if child.start == i {
                    i = child.stop;
                    children.next();
                    continue;
                }
            }
            instructions.switch_to_boxed(index, i);
            i += 1;
        }
    }

    /// Registers a variable captured from an enclosing lambda.
    pub fn add_closure_variable(&mut self, name: &str) -> LocalVariable {
        let variable = LocalVariable::new(self.closure_variables.len(), true);
        self.closure_variables.insert(name.to_string(), variable);
        variable
    }

    /// The innermost local named `name`, falling back to the closure.
    pub fn lookup(&self, name: &str) -> Option<LocalVariable> {
        match self.variables.get(name) {
            Some(&scope_id) => Some(self.scopes[scope_id].variable),
            None => self.closure_variables.get(name).copied(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Slots a frame must reserve for locals.
    pub fn local_count(&self) -> usize {
        self.max_local_count
    }

    pub fn closure_variables(&self) -> &FxHashMap<String, LocalVariable> {
        &self.closure_variables
    }

    fn scope_of(&self, name: &str) -> usize {
        match self.variables.get(name) {
            Some(&scope_id) => scope_id,
            None => panic!("variable '{}' is not defined", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Instruction, LocalAccess};
    use crate::vm::value::Value;

    #[test]
    fn test_nested_scopes_reuse_slots() {
        let mut locals = LocalVariables::new();
        let x = locals.define_local("x", 0);
        let y = locals.define_local("y", 0);
        assert_eq!((x.index, y.index), (0, 1));
        locals.undefine_local(&y, 3);
        let z = locals.define_local("z", 3);
        assert_eq!(z.index, 1);
        assert_eq!(locals.local_count(), 2);
    }

    #[test]
    fn test_shadowing_restores_outer() {
        let mut locals = LocalVariables::new();
        locals.define_local("x", 0);
        let inner = locals.define_local("x", 2);
        assert_eq!(locals.lookup("x").map(|v| v.index), Some(1));
        locals.undefine_local(&inner, 4);
        assert_eq!(locals.lookup("x").map(|v| v.index), Some(0));
    }

    #[test]
    fn test_box_variable_skips_shadowing_scope() {
        let mut list = InstructionList::new();
        let mut locals = LocalVariables::new();

        let outer = locals.define_local("x", list.count());
        list.emit_load(Value::Int32(1));
        list.emit_store_local(outer.index);

        let inner = locals.define_local("x", list.count());
        list.emit_load(Value::Int32(2));
        list.emit_store_local(inner.index);
        locals.undefine_local(&inner, list.count());

        list.emit_load_local(outer.index);
        locals.box_variable("x", &mut list);

        let access = |i: usize| match **list.get_instruction(i) {
            Instruction::Local { access, .. } => access,
            ref other => panic!("unexpected {}", other),
        };
        assert_eq!(access(1), LocalAccess::StoreBoxed);
        assert_eq!(access(3), LocalAccess::Store);
        assert_eq!(access(4), LocalAccess::LoadBoxed);
        assert!(locals.lookup("x").map_or(false, |v| v.is_boxed));
    }

    #[test]
    fn test_closure_variables_resolve_after_locals() {
        let mut locals = LocalVariables::new();
        let captured = locals.add_closure_variable("counter");
        assert!(captured.in_closure);
        assert_eq!(locals.lookup("counter"), Some(captured));
        assert!(!locals.contains("counter"));
        assert_eq!(locals.closure_variables().len(), 1);
    }
}
