// Core infrastructure modules
pub mod core;

// Configuration and the batch factory built on it
pub mod config;
pub mod fixture;

#[cfg(test)]
pub(crate) mod test_utils;
