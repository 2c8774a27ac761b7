mod account;
mod block;
mod chain;
mod money;

pub use account::*;
pub use block::*;
pub use chain::*;
pub use money::*;
