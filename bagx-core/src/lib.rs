pub mod bag;
pub mod builder;
pub mod classify;
pub mod config;
pub mod digest;
pub mod download;
pub mod error;
pub mod export;
pub mod keystone;
pub mod logs;
pub mod manifest;
pub mod memory;
pub mod path_safety;
pub mod progress;
pub mod ship;
pub mod store;
pub mod swift;
pub mod verify;
