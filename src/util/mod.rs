//! Small shared helpers.

mod logging;
mod shutdown;

pub use logging::{init_logging, try_init_logging};
pub use shutdown::ShutdownSignal;
