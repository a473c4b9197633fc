pub mod amount;
pub mod avalanche;
pub mod cli;
pub mod commands;
pub mod config;
pub mod cosmos;
pub mod crypto;
pub mod error;
pub mod journal;
pub mod near;
pub mod pipeline;
pub mod prompt;
pub mod rpc;
pub mod signer;
pub mod substrate;
