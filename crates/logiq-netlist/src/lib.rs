//! logiq netlist - circuit graph for the logiq logic editor
//!
//! This crate handles:
//! - Node storage behind generational handles
//! - Wiring with single-driver inputs and symmetric bookkeeping
//! - Immutable compound templates and their registry
//! - Compiling a selected sub-circuit into a template

pub mod compile;
pub mod error;
pub mod netlist;
pub mod node;
pub mod template;

pub use compile::{compile_selection, CompileError, CompiledSelection, WireDirection};
pub use error::{NetlistError, Result};
pub use netlist::Netlist;
pub use node::{Arity, Bit, Node, NodeHandle, NodeKind, Pin, Vec2, Wire};
pub use template::{Template, TemplateId, TemplateNode, TemplatePin, TemplateRegistry};
