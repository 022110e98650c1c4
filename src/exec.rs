//! Scan-partition schedulers.
//!
//! A compiled pipeline is a pure function over `(table range, args)`; the
//! scheduler decides the fan-out. The multithreaded variant claims
//! fixed-size row chunks from a shared atomic counter until the table is
//! exhausted, and fans continuations out once per worker. Joining the pool
//! between pipelines is the only cross-pipeline synchronization; pipeline
//! N is fully complete before pipeline N+1 starts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::{Config, SchedulerKind};
use crate::codegen::PipelineKind;
use crate::compile::CompiledPipeline;
use crate::error::EngineError;
use crate::storage::Database;

type ScanFn = unsafe extern "C" fn(*const u8, u64, u64, u64, *const *mut u8);
type PlainFn = unsafe extern "C" fn(*const *mut u8);

/// Raw pointer that crosses the worker-pool boundary.
#[derive(Clone, Copy)]
struct SendPtr<T>(*const T);
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

/// Executes compiled pipelines in plan order.
pub struct Scheduler {
    kind: SchedulerKind,
    chunk_size: u64,
    pool: Option<rayon::ThreadPool>,
    threads: usize,
}

impl Scheduler {
    pub fn from_config(config: &Config) -> Result<Scheduler, EngineError> {
        let threads = config.effective_threads();
        let pool = match config.scheduler {
            SchedulerKind::Multithreaded => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| EngineError::Jit(e.to_string()))?,
            ),
            _ => None,
        };
        Ok(Scheduler {
            kind: config.scheduler,
            chunk_size: config.chunk_size.max(1),
            pool,
            threads,
        })
    }

    /// Run one pipeline to completion.
    pub fn execute(&self, pipeline: &CompiledPipeline, db: &Database) {
        let start = Instant::now();
        match self.kind {
            SchedulerKind::CompileOnly => {}
            SchedulerKind::Simple => self.execute_simple(pipeline, db),
            SchedulerKind::Multithreaded => self.execute_parallel(pipeline, db),
        }
        tracing::debug!(
            pipeline = %pipeline.name,
            kind = ?pipeline.kind,
            elapsed_us = start.elapsed().as_micros() as u64,
            "pipeline executed"
        );
    }

    fn execute_simple(&self, pipeline: &CompiledPipeline, db: &Database) {
        let args = pipeline.args.as_ptr();
        match pipeline.kind {
            PipelineKind::Scan => {
                let table = db.table(pipeline.table_index.expect("scan without table"));
                let f: ScanFn = unsafe { std::mem::transmute(pipeline.addr) };
                unsafe { f(table.base(), 0, table.rows(), 1, args) };
            }
            PipelineKind::Default | PipelineKind::Continuation => {
                let f: PlainFn = unsafe { std::mem::transmute(pipeline.addr) };
                unsafe { f(args) };
            }
        }
    }

    fn execute_parallel(&self, pipeline: &CompiledPipeline, db: &Database) {
        let pool = self.pool.as_ref().expect("multithreaded without pool");
        let args = SendPtr(pipeline.args.as_ptr().cast::<*mut u8>());
        match pipeline.kind {
            PipelineKind::Scan => {
                let table = db.table(pipeline.table_index.expect("scan without table"));
                let rows = table.rows();
                let base = SendPtr(table.base());
                let f: ScanFn = unsafe { std::mem::transmute(pipeline.addr) };
                let next_chunk = AtomicU64::new(0);
                let chunk = self.chunk_size;
                let threads = self.threads as u64;
                // broadcast joins all workers before returning
                pool.broadcast(|_| {
                    let base = base;
                    let args = args;
                    loop {
                        let begin = next_chunk.fetch_add(chunk, Ordering::SeqCst);
                        if begin >= rows {
                            break;
                        }
                        let end = (begin + chunk).min(rows);
                        unsafe { f(base.0, begin, end, threads, args.0.cast()) };
                    }
                });
            }
            PipelineKind::Continuation => {
                let f: PlainFn = unsafe { std::mem::transmute(pipeline.addr) };
                pool.broadcast(|_| {
                    let args = args;
                    unsafe { f(args.0.cast()) }
                });
            }
            PipelineKind::Default => {
                let f: PlainFn = unsafe { std::mem::transmute(pipeline.addr) };
                unsafe { f(args.0.cast()) };
            }
        }
    }
}
