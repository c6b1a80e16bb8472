pub mod config;
pub mod link;
pub mod loader;
pub mod report;
pub mod service;
pub mod telemetry;
pub mod worker;

#[cfg(test)]
mod tests;
