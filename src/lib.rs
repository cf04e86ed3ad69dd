// Kindred: activity patterns and compatibility
//
// This is the library root. Each module corresponds to a major subsystem
// of the engine.

pub mod auth;
pub mod classify;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod matching;
pub mod output;
pub mod patterns;
pub mod scoring;
pub mod status;
