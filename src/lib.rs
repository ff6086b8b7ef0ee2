pub mod admin;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod load_balancers;
pub mod logger;
pub mod registry;
pub mod store;
