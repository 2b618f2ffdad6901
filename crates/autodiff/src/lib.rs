mod fwd;
mod rev;
pub mod rules;
mod state;

use std::fmt;
use tangle::{id::Name, Lambda};

pub use fwd::{forward, forward_bundled};
pub use rev::reverse;
pub use rules::{Builtins, Rules};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Forward,
    Reverse,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Forward => write!(f, "forward"),
            Mode::Reverse => write!(f, "reverse"),
        }
    }
}

/// Every failure aborts differentiation of the whole lambda.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported construct for {mode} differentiation: {stm}")]
    Unsupported { mode: Mode, stm: String },

    #[error("no derivative rule for builtin function {func}")]
    MissingRule { func: String },

    #[error("{mode} differentiation expected {expected} pattern elements, found {found}: {stm}")]
    Pattern {
        mode: Mode,
        expected: usize,
        found: usize,
        stm: String,
    },

    #[error("{0} is an accumulator where a value was expected")]
    Accumulator(Name),

    #[error(transparent)]
    Build(#[from] tangle::build::Error),
}

/// Number of parameters and results, for logging.
fn arity(lam: &Lambda) -> (usize, usize) {
    (lam.params.len(), lam.body.result.len())
}
