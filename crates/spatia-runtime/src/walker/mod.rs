pub mod ability;
pub mod engine;

pub use ability::{Ability, AbilityTable, Event, TypeTag};
pub use engine::{run, RunOutcome, Step};
