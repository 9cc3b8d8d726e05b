pub mod config;
pub mod driver;
pub mod errors;
pub mod logging;
pub mod pairing;
pub mod parallel;
pub mod phase;
pub mod pipeline;
pub mod provenance;
pub mod resources;
pub mod run_spec;
pub mod scheduler;
pub mod work_unit;
pub mod world;
