pub mod backend;
pub mod catalog;
pub mod convert;
pub mod disasm;
pub mod encoder;
pub mod error;
pub mod num_util;
pub mod state;
pub mod symbols;
pub mod trace;
