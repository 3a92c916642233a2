//! DuckArrow flight - Flight SQL client wrapper and connection pool

pub mod client;
pub mod pool;
pub mod testing;
mod tls;

pub use client::{FlightClient, QueryReader, Statement};
pub use pool::{ConnectionResult, Pool};
