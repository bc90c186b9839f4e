//! CLI commands implementation

pub mod budget;
pub mod evaluate;
pub mod init;
pub mod retention;

pub use budget::*;
pub use evaluate::*;
pub use init::*;
pub use retention::*;
