//! CLI command implementations.
//!
//! | Module      | Commands handled        |
//! |-------------|-------------------------|
//! | `run`       | `Run`                   |
//! | `pipelines` | `Pipelines`, `Plan`     |
//! | `check`     | `Check`                 |

pub mod check;
pub mod pipelines;
pub mod run;

pub use check::cmd_check;
pub use pipelines::{cmd_pipelines, cmd_plan};
pub use run::cmd_run;
