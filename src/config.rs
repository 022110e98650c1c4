//! Configuration system.
//!
//! Hierarchical loading, lowest priority first:
//! - built-in defaults
//! - `morsel.toml` in the working directory
//! - environment variables (`tpchpath`, `runs`, `threads`, `chunk_size`,
//!   `scheduler`)
//!
//! The environment names are part of the external interface and are kept
//! lowercase on purpose: `tpchpath=/data/sf1 runs=1 morsel`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::EngineError;

/// Which scheduler executes the compiled pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    /// Single-threaded; every scan runs over the whole table range.
    Simple,
    /// Chunked work-stealing scans over a fixed worker pool.
    #[default]
    Multithreaded,
    /// Compile and resolve pipelines but never call them (benchmark mode).
    CompileOnly,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory containing one subdirectory per TPC-H table.
    pub tpchpath: PathBuf,

    /// Number of times the driver replays the query.
    pub runs: u32,

    /// Worker threads for scans and continuations.
    pub threads: usize,

    /// Rows claimed per scan chunk.
    pub chunk_size: u64,

    /// Scheduler variant.
    pub scheduler: SchedulerKind,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tpchpath: PathBuf::from("../data-generator/output"),
            runs: 3,
            threads: num_cpus::get(),
            chunk_size: 10_000,
            scheduler: SchedulerKind::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, `morsel.toml` and the environment.
    pub fn load() -> Result<Config, EngineError> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("morsel.toml"))
            .merge(Env::raw().only(&["tpchpath", "runs", "threads", "chunk_size", "scheduler"]))
            .extract()?;
        Ok(config)
    }

    /// Threads the runtime contexts must be sized for. The simple and
    /// compile-only schedulers run everything on the calling thread.
    pub fn effective_threads(&self) -> usize {
        match self.scheduler {
            SchedulerKind::Multithreaded => self.threads.max(1),
            _ => 1,
        }
    }
}
