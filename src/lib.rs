pub mod app;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod focus;
pub mod input;
pub mod library;
pub mod logging;
pub mod model;
pub mod player;
pub mod queue;
pub mod recovery;
pub mod resources;
pub mod route;
