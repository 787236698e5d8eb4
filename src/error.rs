use crate::record::Pc;
use crate::word::CTag;
use thiserror::Error;

/// Errors surfaced by the driver and the registration interface.
///
/// Structural invariant violations (bad depth, value aliasing, black-hole
/// reentry, measured-degree mismatch) are not represented here: they
/// indicate bugs in the code generator or in the memoizer itself and abort
/// via assertion instead.
#[derive(Error, Debug)]
pub enum MachineError {
    #[error("unknown program counter: {0}")]
    UnknownPc(Pc),
    #[error("step table and constructor degrees are frozen after first execution")]
    TableFrozen,
    #[error("constructor {got} registered out of order (expected tag {expected})")]
    ConstructorOrder { expected: usize, got: CTag },
    #[error("constructor {ctag} registered with degree {degree}, but degrees never exceed 1")]
    InvalidDegree { ctag: CTag, degree: i64 },
    #[error("step limit exceeded after {0} steps")]
    StepLimitExceeded(usize),
    #[error("machine input is not a single materialized value: {0}")]
    InvalidInput(String),
    #[error("terminal state has an empty environment")]
    EmptyResult,
    #[error("conversion error: {0}")]
    Data(#[from] DataError),
}

/// Errors from the host-data conversion layer (`data` module). Malformed
/// host data is a caller mistake, not a machine invariant, so it is typed
/// rather than fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("sequence is not fully materialized")]
    NotMaterialized,
    #[error("expected a single integer word, found {0}")]
    NotAnInt(String),
    #[error("sequence does not decompose into whole values")]
    Malformed,
}
