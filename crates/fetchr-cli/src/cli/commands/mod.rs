//! CLI command handlers, one file per subcommand.

mod cancel;
mod forget;
mod get;
mod health;
mod status;

pub use cancel::run_cancel;
pub use forget::run_forget;
pub use get::run_get;
pub use health::run_health;
pub use status::run_status;
