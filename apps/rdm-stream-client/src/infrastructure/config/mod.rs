//! Configuration Module
//!
//! Command line parsing, item sources and validation into a
//! [`ClientConfig`].

mod items;
mod settings;

pub use items::{ItemSource, domain_name, parse_domain_tagged, parse_inline, parse_plain};
pub use settings::{CliOptions, ClientConfig, ConfigError, ConnectionSettings};
