//! # Task Scheduler
//!
//! A fixed worker pool fed through a bounded channel. A physical plan
//! decomposes into one task per sink, scheduled bottom-up; each task
//! fans out to `min(threads, pipeline max parallelism)` workers, every
//! worker cloning the sink subtree, populating its own result set from
//! the sink's descriptor and driving the pipeline to completion. When
//! the last worker of a task is done the sink finalizes. There is no
//! work stealing within a pipeline; morsels are the only load balancing.
//!
//! Errors raised on any worker set the cancel flag, pipelines drain at
//! their next poll point, and the first error is reported.

use crate::error::{QuiverError, QuiverResult};
use crate::execution::{ExecutionContext, PhysicalOperator, PhysicalPlan};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Counts outstanding workers of one task
struct WaitGroup {
    remaining: Mutex<usize>,
    on_zero: Condvar,
}

impl WaitGroup {
    fn new(count: usize) -> Arc<Self> {
        Arc::new(WaitGroup {
            remaining: Mutex::new(count),
            on_zero: Condvar::new(),
        })
    }

    fn done(&self) {
        let mut remaining = self.remaining.lock();
        *remaining -= 1;
        if *remaining == 0 {
            self.on_zero.notify_all();
        }
    }

    fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.on_zero.wait(&mut remaining);
        }
    }
}

/// The fixed worker pool
pub struct TaskScheduler {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskScheduler {
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let (sender, receiver): (Sender<Job>, Receiver<Job>) =
            crossbeam_channel::bounded(num_threads * 4);
        let workers = (0..num_threads)
            .map(|idx| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("quiver-worker-{idx}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("spawn worker thread")
            })
            .collect();
        TaskScheduler {
            sender: Some(sender),
            workers,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Execute a physical plan: one pipeline task per sink, bottom-up
    pub fn execute_plan(
        &self,
        plan: &PhysicalPlan,
        ctx: &Arc<ExecutionContext>,
    ) -> QuiverResult<()> {
        let mut sinks: Vec<PhysicalOperator> = Vec::new();
        collect_sinks(&plan.root, &mut sinks);
        debug!(pipelines = sinks.len(), "scheduling plan");
        for sink in sinks {
            self.run_pipeline(sink, ctx)?;
        }
        Ok(())
    }

    /// Run one sink-rooted pipeline across the pool and finalize it
    fn run_pipeline(
        &self,
        sink: PhysicalOperator,
        ctx: &Arc<ExecutionContext>,
    ) -> QuiverResult<()> {
        let num_workers = ctx
            .num_threads
            .max(1)
            .min(sink.max_parallelism())
            .min(self.workers.len());
        debug!(
            pipeline = sink.name(),
            workers = num_workers,
            "running pipeline"
        );
        let wait = WaitGroup::new(num_workers);
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| QuiverError::internal("scheduler is shut down"))?;
        for _ in 0..num_workers {
            let mut worker_op = sink.clone();
            let worker_ctx = Arc::clone(ctx);
            let worker_wait = Arc::clone(&wait);
            let job: Job = Box::new(move || {
                let result = (|| -> QuiverResult<()> {
                    worker_op.init(&worker_ctx)?;
                    let mut rs = worker_op.sink_descriptor().populate();
                    worker_op.sink_execute(&mut rs, &worker_ctx)
                })();
                if let Err(error) = result {
                    worker_ctx.record_error(error);
                }
                worker_wait.done();
            });
            sender
                .send(job)
                .map_err(|_| QuiverError::internal("worker pool is gone"))?;
        }
        wait.wait();

        if let Some(error) = ctx.take_error() {
            return Err(error);
        }
        if ctx.is_interrupted() {
            return Err(QuiverError::Interrupted);
        }
        let mut finalizer = sink;
        finalizer.sink_finalize(ctx)?;
        Ok(())
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.sender = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Post-order sink collection: a sink's upstream sinks schedule first
fn collect_sinks(op: &PhysicalOperator, out: &mut Vec<PhysicalOperator>) {
    for child in op.children() {
        collect_sinks(child, out);
    }
    if op.is_sink() {
        out.push(op.clone());
    }
}
