pub mod debug_info;
pub mod frame;
pub mod interpreter;
pub mod value;

pub use debug_info::DebugInfo;
pub use frame::Frame;
pub use interpreter::Interpreter;
pub use value::{ArrayObject, CellArena, CellId, Char16, Object, Primitive, Value};
