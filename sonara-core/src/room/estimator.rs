//! Background room estimation.
//!
//! A worker thread casts rays around the listener, keeps the most recent hits
//! in a bounded cache and fits an axis-aligned box to them. The audio side
//! never blocks on it: estimates arrive on a single-slot channel where the
//! newest one replaces any unread predecessor.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, unbounded};

use crate::config::DynamicRoomSettings;
use crate::error::{Result, SonaraError};
use crate::math::Vec3;
use crate::room::{MAX_SHOEBOX_REFLECTION, RoomEstimate, wall};
use crate::scene::ray_caster::{RayCaster, RayHit};

/// Interval between estimation passes.
const TICK: Duration = Duration::from_millis(50);

/// Dimension floor for a fitted box.
const MIN_WALL_DISTANCE: f32 = 0.05;

/// How many rays each pass casts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RayBudget {
    /// Dynamic room modeling: spread `rays_per_second` over the passes
    PerSecond(u32),
    /// Propagation: a fixed number per pass, split across `workers` threads
    PerEstimate { rays: usize, workers: usize },
}

impl RayBudget {
    fn rays_per_tick(&self) -> usize {
        match *self {
            Self::PerSecond(rps) => ((rps as f32 * TICK.as_secs_f32()).ceil() as usize).max(1),
            Self::PerEstimate { rays, .. } => rays.max(1),
        }
    }

    fn workers(&self) -> usize {
        match *self {
            Self::PerSecond(_) => 1,
            Self::PerEstimate { workers, .. } => workers.max(1),
        }
    }
}

pub enum EstimatorCommand {
    SetCaster(Option<Arc<dyn RayCaster>>),
    SetListener(Vec3),
    SetSettings(DynamicRoomSettings),
    SetBudget(RayBudget),
    /// Drops cached hits, e.g. after the scene changed
    ClearCache,
    Shutdown,
}

/// Handle to the estimator worker. Dropping it stops and joins the thread.
pub struct RoomEstimator {
    commands: Sender<EstimatorCommand>,
    estimates: Receiver<RoomEstimate>,
    recent_hits: Arc<Mutex<Vec<RayHit>>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl RoomEstimator {
    pub fn spawn(settings: DynamicRoomSettings, listener: Vec3, budget: RayBudget) -> Result<Self> {
        let (command_tx, command_rx) = unbounded();
        let (estimate_tx, estimate_rx) = bounded(1);
        let recent_hits = Arc::new(Mutex::new(Vec::new()));

        let worker = Worker {
            commands: command_rx,
            estimates: estimate_tx,
            stale: estimate_rx.clone(),
            recent_hits: Arc::clone(&recent_hits),
            caster: None,
            listener,
            settings,
            budget,
            cache: VecDeque::with_capacity(settings.ray_cache_size),
            ray_index: 0,
        };

        let handle = thread::Builder::new()
            .name("sonara-room-estimator".into())
            .spawn(move || worker.run())
            .map_err(|e| SonaraError::Unknown(format!("failed to spawn room estimator: {}", e)))?;

        log::info!("Room estimator started ({:?})", budget);
        Ok(Self {
            commands: command_tx,
            estimates: estimate_rx,
            recent_hits,
            thread_handle: Some(handle),
        })
    }

    /// Queues a command. Commands sent after the worker exited are dropped.
    pub fn send(&self, command: EstimatorCommand) {
        if self.commands.send(command).is_err() {
            log::error!("Room estimator is no longer running");
        }
    }

    /// Newest estimate published since the last call, if any.
    pub fn poll(&self) -> Option<RoomEstimate> {
        self.estimates.try_iter().last()
    }

    /// Up to `max` of the most recent hits, newest last.
    pub fn recent_hits(&self, max: usize) -> Result<Vec<RayHit>> {
        let hits = self
            .recent_hits
            .lock()
            .map_err(|_| SonaraError::Unknown("ray hit cache lock poisoned".into()))?;
        let start = hits.len().saturating_sub(max);
        Ok(hits[start..].to_vec())
    }

    pub fn stop(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        let _ = self.commands.send(EstimatorCommand::Shutdown);
        if handle.join().is_err() {
            log::error!("Room estimator thread panicked");
        } else {
            log::info!("Room estimator stopped");
        }
    }
}

impl Drop for RoomEstimator {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    commands: Receiver<EstimatorCommand>,
    estimates: Sender<RoomEstimate>,
    /// Receiving side of `estimates`, used to evict an unread estimate
    stale: Receiver<RoomEstimate>,
    recent_hits: Arc<Mutex<Vec<RayHit>>>,
    caster: Option<Arc<dyn RayCaster>>,
    listener: Vec3,
    settings: DynamicRoomSettings,
    budget: RayBudget,
    cache: VecDeque<RayHit>,
    ray_index: u64,
}

impl Worker {
    fn run(mut self) {
        let mut next_tick = Instant::now();
        loop {
            let timeout = next_tick.saturating_duration_since(Instant::now());
            match self.commands.recv_timeout(timeout) {
                Ok(EstimatorCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
                Ok(command) => {
                    self.apply(command);
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.tick();
            next_tick = Instant::now() + TICK;
        }
    }

    fn apply(&mut self, command: EstimatorCommand) {
        match command {
            EstimatorCommand::SetCaster(caster) => {
                self.caster = caster;
                self.cache.clear();
            }
            EstimatorCommand::SetListener(position) => self.listener = position,
            EstimatorCommand::SetSettings(settings) => {
                self.settings = settings;
                while self.cache.len() > settings.ray_cache_size {
                    self.cache.pop_front();
                }
            }
            EstimatorCommand::SetBudget(budget) => self.budget = budget,
            EstimatorCommand::ClearCache => self.cache.clear(),
            EstimatorCommand::Shutdown => {}
        }
    }

    fn tick(&mut self) {
        let Some(caster) = self.caster.clone() else {
            return;
        };
        let count = self.budget.rays_per_tick();
        let directions: Vec<Vec3> = (0..count)
            .map(|i| fibonacci_direction(self.ray_index + i as u64))
            .collect();
        self.ray_index = self.ray_index.wrapping_add(count as u64);

        let hits = cast_batch(caster.as_ref(), self.listener, &directions, self.budget.workers());
        for hit in hits {
            if self.cache.len() >= self.settings.ray_cache_size {
                self.cache.pop_front();
            }
            self.cache.push_back(hit);
        }

        if let Ok(mut recent) = self.recent_hits.lock() {
            recent.clear();
            recent.extend(self.cache.iter().copied());
        }

        if self.cache.is_empty() {
            return;
        }
        let estimate = fit_box(
            self.cache.iter(),
            self.listener,
            self.settings.max_wall_distance,
        );
        self.publish(estimate);
    }

    fn publish(&self, estimate: RoomEstimate) {
        match self.estimates.try_send(estimate) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(estimate)) => {
                let _ = self.stale.try_recv();
                let _ = self.estimates.try_send(estimate);
            }
        }
    }
}

fn cast_batch(caster: &dyn RayCaster, origin: Vec3, directions: &[Vec3], workers: usize) -> Vec<RayHit> {
    let cast = |part: &[Vec3]| -> Vec<RayHit> {
        part.iter()
            .filter_map(|d| caster.cast_ray(origin, *d))
            .filter(|hit| hit.point.is_finite())
            .collect()
    };
    if workers <= 1 || directions.len() < 2 {
        return cast(directions);
    }

    let chunk = directions.len().div_ceil(workers);
    thread::scope(|scope| {
        let handles: Vec<_> = directions
            .chunks(chunk)
            .map(|part| scope.spawn(move || cast(part)))
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_default())
            .collect()
    })
}

/// The `index`-th point of a golden-angle spiral over the unit sphere.
fn fibonacci_direction(index: u64) -> Vec3 {
    const SAMPLES: u64 = 1024;
    let golden_angle = std::f32::consts::PI * (3.0 - 5f32.sqrt());
    let i = (index % SAMPLES) as f32;
    let y = 1.0 - 2.0 * (i + 0.5) / SAMPLES as f32;
    let ring = (1.0 - y * y).max(0.0).sqrt();
    // Rotate each full sweep so successive sweeps sample new directions.
    let sweep = (index / SAMPLES) as f32 * 0.61803398;
    let theta = golden_angle * i + sweep;
    Vec3::new(ring * theta.cos(), y, ring * theta.sin())
}

/// Fits an axis-aligned box around `listener` from cached hits.
///
/// Each hit is assigned to the wall whose axis dominates its normal, on the
/// side of the listener where it lies. The wall sits at the median hit
/// distance, capped at `max_wall_distance`; walls with no hits are open.
pub(crate) fn fit_box<'a>(
    hits: impl Iterator<Item = &'a RayHit>,
    listener: Vec3,
    max_wall_distance: f32,
) -> RoomEstimate {
    let mut distances: [Vec<f32>; 6] = Default::default();
    let mut reflection_sums = [0.0f32; 6];
    let mut total = 0;

    for hit in hits {
        let offset = hit.point - listener;
        let normal = hit.normal.abs();
        let axis = if normal.x >= normal.y && normal.x >= normal.z {
            0
        } else if normal.y >= normal.z {
            1
        } else {
            2
        };
        let along = offset[axis];
        let index = match (axis, along >= 0.0) {
            (0, false) => wall::LEFT,
            (0, true) => wall::RIGHT,
            (1, true) => wall::UP,
            (1, false) => wall::DOWN,
            (2, true) => wall::BEHIND,
            _ => wall::FRONT,
        };
        distances[index].push(along.abs().clamp(MIN_WALL_DISTANCE, max_wall_distance));
        reflection_sums[index] += hit.mean_reflection();
        total += 1;
    }

    let mut extent = [max_wall_distance; 6];
    let mut reflections = [0.0f32; 6];
    for (i, d) in distances.iter_mut().enumerate() {
        if d.is_empty() {
            continue;
        }
        d.sort_by(f32::total_cmp);
        extent[i] = d[d.len() / 2];
        reflections[i] = (reflection_sums[i] / d.len() as f32).clamp(0.0, MAX_SHOEBOX_REFLECTION);
    }

    let min = listener - Vec3::new(extent[wall::LEFT], extent[wall::DOWN], extent[wall::FRONT]);
    let max = listener + Vec3::new(extent[wall::RIGHT], extent[wall::UP], extent[wall::BEHIND]);
    let size = max - min;
    RoomEstimate {
        dimensions: [size.x, size.y, size.z],
        reflections,
        position: (min + max) * 0.5,
        hits: total,
    }
}
