use std::result;

use thiserror::Error;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("cannot generate file name in {0}: path too long ({1} bytes left)")]
    BudgetExhaustedError(String, usize),
}
