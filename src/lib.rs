pub mod app;
pub mod config;
pub mod controller;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod stream;
pub mod tools;
pub mod upstream;
