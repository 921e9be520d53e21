#![doc = include_str!("../README.md")]

mod channel;
mod config;
mod drain;
mod error;
mod job;
mod multiplex;
mod partition;
mod pipeline;
mod pool;

pub use crate::channel::*;
pub use crate::config::*;
pub use crate::drain::*;
pub use crate::error::*;
pub use crate::job::*;
pub use crate::multiplex::*;
pub use crate::partition::*;
pub use crate::pipeline::*;
pub use crate::pool::{barrier::*, manager::*, report::*};
