pub mod instruction_list;
pub mod label;
pub mod locals;

pub use instruction_list::{InstructionArray, InstructionList};
pub use label::{LabelId, RuntimeLabel};
pub use locals::{LocalDefinition, LocalVariable, LocalVariables};
