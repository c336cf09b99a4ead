mod elo;
mod error;
mod processor;

pub use elo::*;
pub use error::*;
pub use processor::*;
