mod state_machine;
mod status;

pub use state_machine::*;
pub use status::*;
