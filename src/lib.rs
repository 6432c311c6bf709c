pub mod config;
pub mod core;
pub mod cosmology;
pub mod data;
pub mod ensemble;
pub mod errors;
pub mod inference;
pub mod io;
pub mod likelihood;
pub mod model;
pub mod optimize;
pub mod stats;
