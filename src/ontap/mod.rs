pub mod client;
pub mod node;

pub use client::{Connection, ZapiClient};
pub use node::Node;
