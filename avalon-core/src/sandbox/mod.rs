mod bot;
mod host;

pub use bot::*;
pub use host::*;
