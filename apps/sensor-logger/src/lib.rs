pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod flusher;
pub mod lifecycle;
pub mod registry;
pub mod sink;
pub mod source;
pub mod sources;
pub mod window;

#[cfg(test)]
pub mod test_support;
