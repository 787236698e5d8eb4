//! Process-wide registration tables filled by the code generator.
//!
//! Both tables are append-only and set up before any execution: the step
//! table maps dense program counters to one-step transition functions, and
//! the degree table maps constructor tags to their degrees. The core is
//! single-threaded, so the tables are thread-local; they freeze at the
//! first execution and reject mutation afterwards.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::MachineError;
use crate::eval::Evaluator;
use crate::record::{Pc, State};
use crate::word::CTag;

pub type StepFn = Rc<dyn Fn(State, &mut Evaluator) -> Result<State, MachineError>>;

thread_local! {
    static EXPS: RefCell<Vec<StepFn>> = RefCell::new(Vec::new());
    static DEGREES: RefCell<Vec<i64>> = RefCell::new(Vec::new());
    static FROZEN: Cell<bool> = const { Cell::new(false) };
}

/// Append a step function and return its program counter. PCs are dense and
/// assigned in registration order.
pub fn add_exp<F>(step: F) -> Result<Pc, MachineError>
where
    F: Fn(State, &mut Evaluator) -> Result<State, MachineError> + 'static,
{
    if FROZEN.with(|f| f.get()) {
        return Err(MachineError::TableFrozen);
    }
    EXPS.with(|t| {
        let mut t = t.borrow_mut();
        t.push(Rc::new(step));
        Ok(t.len() - 1)
    })
}

/// Register the degree of constructor `ctag`. Must be called once per tag
/// in ascending tag order; a 0-ary constructor has degree 1, an n-ary one
/// `1 - n`.
pub fn set_constructor_degree(ctag: CTag, degree: i64) -> Result<(), MachineError> {
    if FROZEN.with(|f| f.get()) {
        return Err(MachineError::TableFrozen);
    }
    if degree > 1 {
        return Err(MachineError::InvalidDegree { ctag, degree });
    }
    DEGREES.with(|t| {
        let mut t = t.borrow_mut();
        if t.len() != ctag as usize {
            return Err(MachineError::ConstructorOrder {
                expected: t.len(),
                got: ctag,
            });
        }
        t.push(degree);
        Ok(())
    })
}

/// Degree of a registered constructor. An unknown tag is fatal: step
/// functions assume well-formed words.
pub fn constructor_degree(ctag: CTag) -> i64 {
    DEGREES.with(|t| {
        *t.borrow()
            .get(ctag as usize)
            .unwrap_or_else(|| panic!("unknown constructor tag {ctag}"))
    })
}

pub fn constructor_arity(ctag: CTag) -> u64 {
    (1 - constructor_degree(ctag)) as u64
}

pub fn constructor_count() -> usize {
    DEGREES.with(|t| t.borrow().len())
}

pub(crate) fn step_fn(pc: Pc) -> Result<StepFn, MachineError> {
    EXPS.with(|t| {
        t.borrow()
            .get(pc)
            .cloned()
            .ok_or(MachineError::UnknownPc(pc))
    })
}

/// Called at the first execution; registration is initialization-phase
/// data only.
pub(crate) fn freeze() {
    FROZEN.with(|f| f.set(true));
}
