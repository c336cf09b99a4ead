mod client;
mod gateway;
mod pool;

pub use client::*;
pub use gateway::*;
pub use pool::*;
