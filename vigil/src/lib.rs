//! The shared models, config, and clients for the vigil monitoring controller

#[macro_use]
extern crate serde_derive;

pub mod client;
pub mod conf;
mod error;
pub mod models;
pub mod utils;

pub use client::Clients;
pub use conf::Conf;
pub use error::Error;
