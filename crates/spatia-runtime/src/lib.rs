pub mod context;
pub mod filter;
pub mod response;
pub mod session;
pub mod walker;

pub use context::{ContextRequest, ExecutionContext, STATUS_OK};
pub use filter::{Direction, EdgeFilter, EdgeSpec};
pub use response::{Projector, Response};
pub use session::{SessionManager, SharedContext};
pub use walker::{run, AbilityTable, Event, RunOutcome, Step, TypeTag};
