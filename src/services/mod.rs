pub mod monitor;
pub mod overrides;
pub mod provider;
pub mod refresh;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod snapshot;
pub mod synoptic;
pub mod wunderground;

#[cfg(test)]
pub(crate) mod test_support;
