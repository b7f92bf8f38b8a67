//! Streaming engine and its collaborators.

pub mod classifier;
pub mod planner;
pub mod pool;
pub mod proxy;
pub mod resolver;
pub mod stream_service;
pub mod streamer;
pub mod upstream;
