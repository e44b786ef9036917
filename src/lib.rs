pub mod error;
pub mod logging;
pub mod settings;
pub mod config;
pub mod context;
pub mod dimension;
pub mod grid_spec;
pub mod coord_grid;
pub mod nc_utils;
pub mod grid;
pub mod field;
pub mod resize;
pub mod engine;
pub mod local_engine;
pub mod spec;
pub mod operations;
pub mod describe;

#[cfg(test)]
pub(crate) mod test_utils;
