pub mod clipboard;
pub mod codec;
pub mod commands;
pub mod monitor;
pub mod reader;
pub mod sink;
pub mod utils;
