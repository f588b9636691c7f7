pub mod configure;
pub mod logger;
pub mod mocks;
pub mod models;
pub mod rail_core;
pub mod token_registry;
