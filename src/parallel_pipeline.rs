// THEORY:
// The parallel pipeline drives the same per-tile stages as
// `TracingPipeline`, but across a pool of worker tasks: a dispatcher
// distributes tile tasks round-robin over per-worker channels, each worker
// answers through a oneshot, and the run joins every answer before it may
// finalize. The region accumulator is the only state workers share, and its
// per-class locks are the only place they can block on each other.
//
// Two discipline points carried over from the sequential driver:
// 1.  **Completion before finalization**: every tile of the grid is
//     accounted for (processed, failed or cancelled) before
//     materialization starts, and finalization runs on the caller's
//     context only, so the hierarchy is mutated from a single place.
// 2.  **Cancellation between tiles**: workers check the shared flag before
//     each tile; a union already in flight is allowed to finish so the
//     accumulator is never left mid-mutation.

use crate::core_modules::accumulator::RegionAccumulator;
use crate::core_modules::error::{PipelineError, TileError};
use crate::core_modules::hierarchy::ObjectHierarchy;
use crate::core_modules::label_raster::{RegionRequest, TileRegion};
use crate::core_modules::materializer::ObjectFactory;
use crate::core_modules::tile_source::{ClassId, TileSource};
use crate::pipeline::{
    finalize, process_tile, CancellationFlag, MaterializeOptions, PipelineConfig, PipelineState,
    RunSummary,
};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

pub struct TileTask {
    pub region: TileRegion,
    pub result_sender: oneshot::Sender<Result<(), TileError>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<TileTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new<S: TileSource + 'static>(
        source: Arc<S>,
        config: PipelineConfig,
        table: Arc<HashMap<i32, ClassId>>,
        accumulator: Arc<RegionAccumulator>,
        cancel: CancellationFlag,
    ) -> Self {
        let worker_count = config.worker_count.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<TileTask>();
        let mut workers = Vec::new();

        // A single dispatcher distributes tasks to workers round-robin.
        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<TileTask>())
            .unzip();

        let dispatcher_senders = worker_senders;
        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = dispatcher_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % dispatcher_senders.len();
            }
        });

        for mut worker_receiver in worker_receivers {
            let worker_source = source.clone();
            let worker_config = config.clone();
            let worker_table = table.clone();
            let worker_accumulator = accumulator.clone();
            let worker_cancel = cancel.clone();

            let worker = tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let result = if worker_cancel.is_cancelled() {
                        Err(TileError::Cancelled)
                    } else {
                        process_tile(
                            worker_source.as_ref(),
                            &worker_config,
                            &worker_table,
                            &worker_accumulator,
                            task.region,
                        )
                    };
                    let _ = task.result_sender.send(result);
                }
            });
            workers.push(worker);
        }

        Self {
            task_sender,
            workers,
        }
    }

    pub fn submit(&self, task: TileTask) -> Result<(), PipelineError> {
        self.task_sender
            .send(task)
            .map_err(|_| PipelineError::Cancelled)
    }
}

/// The worker-pool pipeline driver. Same contract and state machine as
/// `TracingPipeline`, with tiles processed concurrently.
pub struct ParallelTracingPipeline<S: TileSource + 'static> {
    source: Arc<S>,
    config: PipelineConfig,
    state: PipelineState,
}

impl<S: TileSource + 'static> ParallelTracingPipeline<S> {
    pub fn new(source: Arc<S>, config: PipelineConfig) -> Self {
        Self {
            source,
            config,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub async fn run(
        &mut self,
        request: &RegionRequest,
        hierarchy: &mut dyn ObjectHierarchy,
        factory: &dyn ObjectFactory,
        options: &MaterializeOptions,
        cancel: &CancellationFlag,
    ) -> Result<RunSummary, PipelineError> {
        let requested = request.pixel_count();
        if requested > self.config.max_region_pixels {
            self.state = PipelineState::Idle;
            return Err(PipelineError::Capacity {
                requested,
                limit: self.config.max_region_pixels,
            });
        }

        let tiles = request.tile_grid();
        let accumulator = Arc::new(RegionAccumulator::new(self.config.snap_tolerance));
        let table = Arc::new(self.source.classification_labels());
        let pool = WorkerPool::new(
            self.source.clone(),
            self.config.clone(),
            table,
            accumulator.clone(),
            cancel.clone(),
        );

        self.state = PipelineState::ProcessingTiles;
        let mut receivers = Vec::with_capacity(tiles.len());
        for &region in &tiles {
            let (result_sender, receiver) = oneshot::channel();
            pool.submit(TileTask {
                region,
                result_sender,
            })?;
            receivers.push(receiver);
        }

        // Countdown over the tile grid: every tile answers before the run
        // may move on to finalization.
        let results = join_all(receivers).await;

        if cancel.is_cancelled() {
            accumulator.clear();
            self.state = PipelineState::Aborted;
            return Err(PipelineError::Cancelled);
        }

        let mut tiles_processed = 0usize;
        let mut tiles_skipped = 0usize;
        for (result, region) in results.into_iter().zip(&tiles) {
            match result {
                Ok(Ok(())) => tiles_processed += 1,
                Ok(Err(err)) => {
                    warn!(x = region.x, y = region.y, error = %err, "tile failed, skipping");
                    tiles_skipped += 1;
                }
                Err(_) => {
                    warn!(x = region.x, y = region.y, "worker dropped tile result");
                    tiles_skipped += 1;
                }
            }
        }

        if !tiles.is_empty()
            && tiles_skipped as f64 / tiles.len() as f64 > self.config.max_tile_failure_rate
        {
            self.state = PipelineState::Idle;
            return Err(PipelineError::TooManyTileFailures {
                failed: tiles_skipped,
                total: tiles.len(),
            });
        }

        // Finalization happens here, on the caller's context, and nowhere
        // else; workers never see the hierarchy.
        self.state = PipelineState::Finalizing;
        let summary = finalize(
            &accumulator,
            hierarchy,
            factory,
            options,
            tiles_processed,
            tiles_skipped,
        )?;
        self.state = PipelineState::Done;
        drop(pool);
        Ok(summary)
    }
}
