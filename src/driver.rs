//! The library entrypoint: lower, compile, execute.

use std::sync::Arc;
use std::time::Instant;

use crate::codegen::{CodeGen, SymbolRegistry};
use crate::compile;
use crate::config::Config;
use crate::error::EngineError;
use crate::exec::Scheduler;
use crate::iu::Iu;
use crate::ops::{Operator, Sink};
use crate::storage::Database;

/// Load configuration and data, then replay the query `runs` times.
pub fn produce(
    plan: &mut dyn Operator,
    outputs: &[Iu],
    names: &[String],
    sink: &mut dyn Sink,
) -> Result<(), EngineError> {
    let config = Config::load()?;
    let db = Database::open(&config.tpchpath)?;
    produce_with(&config, &db, plan, outputs, names, sink)
}

/// Run the query against an already-loaded database.
pub fn produce_with(
    config: &Config,
    db: &Database,
    plan: &mut dyn Operator,
    outputs: &[Iu],
    names: &[String],
    sink: &mut dyn Sink,
) -> Result<(), EngineError> {
    for run in 0..config.runs.max(1) {
        tracing::info!(run, "executing query");
        run_once(config, db, plan, outputs, names, sink)?;
    }
    Ok(())
}

fn run_once(
    config: &Config,
    db: &Database,
    plan: &mut dyn Operator,
    outputs: &[Iu],
    names: &[String],
    sink: &mut dyn Sink,
) -> Result<(), EngineError> {
    let lowering = Instant::now();
    let symbols = Arc::new(SymbolRegistry::default());
    let module = compile::create_module(&symbols)?;
    let mut cg = CodeGen::new(module, symbols, config.effective_threads());

    sink.produce(plan, outputs, names, &mut cg)?;
    let compiled = compile::finalize(cg)?;
    tracing::debug!(
        pipelines = compiled.pipelines.len(),
        elapsed_us = lowering.elapsed().as_micros() as u64,
        "query compiled"
    );

    let scheduler = Scheduler::from_config(config)?;
    let execution = Instant::now();
    for pipeline in &compiled.pipelines {
        scheduler.execute(pipeline, db);
    }
    tracing::info!(
        elapsed_us = execution.elapsed().as_micros() as u64,
        "query executed"
    );
    compiled.free();
    Ok(())
}
