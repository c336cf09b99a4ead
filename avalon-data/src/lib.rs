mod events;
mod model;
mod store;

pub use events::*;
pub use model::*;
pub use store::*;
