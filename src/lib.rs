#![warn(clippy::pedantic)]
// Noisy doc/signature lints — would require annotating most pub functions
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Style preference — keeping format!("{}", x) over format!("{x}") for readability with complex exprs
#![allow(clippy::uninlined_format_args)]
// Intentional casts in wire-format handling (declared lengths, timestamps)
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod codec;
pub mod commands;
pub mod config;
pub mod crypto;
pub mod dedup;
mod errors;
pub mod gateway;
pub mod media;
pub mod menu;
pub mod notify;
pub mod search;
pub mod session;
pub mod token;
pub(crate) mod utils;

pub use errors::GatewayError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
