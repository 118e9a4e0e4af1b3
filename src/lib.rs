#![doc = include_str!("../README.md")]
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, clippy::unimplemented)]

pub mod format;

pub mod engine;
pub use engine::Engine;

pub mod driver;
pub use driver::{Driver, Transport, Yate};

pub mod ivr;
pub use ivr::{ChannelEvent, Ivr};
