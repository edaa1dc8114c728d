pub mod campaign;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod ledger;
pub mod lock;
pub mod log;
pub mod pacer;
pub mod pipeline;
pub mod preview;
pub mod registry;
pub mod store;
pub mod types;
