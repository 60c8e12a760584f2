//! Data models for costwatch

mod alert;
mod billing;

pub use alert::*;
pub use billing::*;
