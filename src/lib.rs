pub mod cache;
pub mod choices;
pub mod cli;
pub mod commands;
pub mod config;
pub mod crd;
pub mod error;
pub mod external;
pub mod helpers;
pub mod kube_client;
pub mod logging;
pub mod output;
pub mod path;
pub mod rest;
pub mod schedule;
pub mod session;
pub mod surface;
pub mod templates;
pub mod waiter;

pub use error::{Result, ToolkitError};
