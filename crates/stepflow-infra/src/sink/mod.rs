//! Output sink implementations.

pub mod file;

pub use file::FileSink;
