#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod data;
pub mod listing;
pub mod logging;
pub mod reputation;
pub mod search;
pub mod servlet;
pub mod ui;
pub mod view;
pub mod widget;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
