pub mod client;
pub mod config;
pub mod context;
pub mod evaluation;
pub mod fetcher;
pub mod refresh;
pub mod routes;
pub mod state;

#[cfg(test)]
mod test_utils;
