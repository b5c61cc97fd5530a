pub mod config;
pub mod gateway;
pub mod message;
pub mod persistence;
pub mod session;
