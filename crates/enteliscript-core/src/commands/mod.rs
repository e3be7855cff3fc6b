//! Command table, argument schema and input parsing.

mod enteliweb;
mod parse;
mod registry;

pub use enteliweb::{builtin_commands, builtin_registry};
pub use parse::{split_command, tokenize};
pub use registry::{
    ArgSpec, ArgType, ArgValue, Arguments, BatchItem, BatchLoader, CommandSpec, Invoke, Registry,
    RequestBuilder, SessionOp, UiAction,
};
