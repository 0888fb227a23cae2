pub mod health;
pub mod keys;
pub mod network;
pub mod query;
pub mod rpc;
pub mod script;
pub mod tx;
