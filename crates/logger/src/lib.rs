//! Process-wide tracing setup shared by the apimon binaries

mod subscriber;

pub use subscriber::{LogFormat, init_tracing, parse_level};
