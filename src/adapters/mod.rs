//! Concrete implementations of the ports.

pub mod sim;

pub use sim::{SimBroker, SimFeed, SimMarket};
