pub mod market;
pub mod order;
pub mod reference;
pub mod state;

pub use market::*;
pub use order::*;
pub use reference::*;
pub use state::*;
