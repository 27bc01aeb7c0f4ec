//! The central state machine: one pair cycle is fetch -> compute -> decide
//! -> execute -> persist -> log, invoked by the scheduler once per enabled
//! pair per interval.

mod cycle;
mod registry;

pub use cycle::PairCycle;
pub use registry::PairLockRegistry;
