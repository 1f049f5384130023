#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod documents;
pub mod logging;
pub mod pipeline;

#[cfg(test)]
mod test;
