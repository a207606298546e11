pub mod coordination;
pub mod storage;

pub use coordination::*;
pub use storage::*;
