//! Runs a prioritizer on a dedicated thread.
//!
//! Requests are serialized through a channel, so callers on any thread can
//! share one prioritizer without it ever being entered twice.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use sectorview_render::Camera;

use crate::aggregator::{PrioritizedSector, QueryStats};
use crate::clipping::ClipPlane;
use crate::error::VisibilityError;
use crate::model::CadModel;
use crate::prioritizer::VisibilityPrioritizer;
use crate::proxy::SceneDiff;

type Reply<T> = Sender<Result<T, VisibilityError>>;

enum Request {
    SetModels {
        models: Vec<CadModel>,
        reply: Reply<SceneDiff>,
    },
    SetClipping {
        planes: Option<Vec<ClipPlane>>,
        intersection: bool,
        reply: Reply<()>,
    },
    Order {
        camera: Camera,
        reply: Reply<Vec<PrioritizedSector>>,
    },
    Stats {
        reply: Reply<QueryStats>,
    },
}

/// Handle to a prioritizer owned by a background thread.
///
/// Every call blocks until the worker has answered. Dropping the handle
/// disposes the prioritizer and joins the thread.
pub struct VisibilityWorker {
    requests: Option<Sender<Request>>,
    handle: Option<JoinHandle<()>>,
}

impl VisibilityWorker {
    /// Move `prioritizer` onto a new thread.
    pub fn spawn(prioritizer: VisibilityPrioritizer) -> Result<Self, VisibilityError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = std::thread::Builder::new()
            .name("sectorview-visibility".into())
            .spawn(move || run(prioritizer, rx))
            .map_err(VisibilityError::WorkerSpawn)?;
        Ok(Self {
            requests: Some(tx),
            handle: Some(handle),
        })
    }

    fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T, VisibilityError> {
        let sender = self
            .requests
            .as_ref()
            .ok_or(VisibilityError::WorkerDisconnected)?;
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        sender
            .send(request(reply_tx))
            .map_err(|_| VisibilityError::WorkerDisconnected)?;
        reply_rx
            .recv()
            .map_err(|_| VisibilityError::WorkerDisconnected)?
    }

    pub fn set_models(&self, models: Vec<CadModel>) -> Result<SceneDiff, VisibilityError> {
        self.call(|reply| Request::SetModels { models, reply })
    }

    pub fn set_clipping(
        &self,
        planes: Option<Vec<ClipPlane>>,
        intersection: bool,
    ) -> Result<(), VisibilityError> {
        self.call(|reply| Request::SetClipping {
            planes,
            intersection,
            reply,
        })
    }

    pub fn order_sectors_by_visibility(
        &self,
        camera: Camera,
    ) -> Result<Vec<PrioritizedSector>, VisibilityError> {
        self.call(|reply| Request::Order { camera, reply })
    }

    pub fn last_stats(&self) -> Result<QueryStats, VisibilityError> {
        self.call(|reply| Request::Stats { reply })
    }

    /// Stop the worker, disposing the prioritizer, and wait for it to exit.
    pub fn shutdown(&mut self) {
        // Closing the channel ends the request loop.
        self.requests.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("Visibility worker panicked");
        }
    }
}

impl Drop for VisibilityWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut prioritizer: VisibilityPrioritizer, requests: Receiver<Request>) {
    log::debug!("Visibility worker started");
    while let Ok(request) = requests.recv() {
        match request {
            Request::SetModels { models, reply } => {
                let _ = reply.send(prioritizer.set_models(&models));
            }
            Request::SetClipping {
                planes,
                intersection,
                reply,
            } => {
                let _ = reply.send(prioritizer.set_clipping(planes.as_deref(), intersection));
            }
            Request::Order { camera, reply } => {
                let _ = reply.send(prioritizer.order_sectors_by_visibility(&camera));
            }
            Request::Stats { reply } => {
                let _ = reply.send(Ok(prioritizer.last_stats()));
            }
        }
    }
    prioritizer.dispose();
    log::debug!("Visibility worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareCoverageBackend;
    use crate::model::SectorMetadata;
    use glam::{Mat4, Vec3};
    use sectorview_render::Aabb;

    fn worker() -> VisibilityWorker {
        let backend = SoftwareCoverageBackend::new(16, 16).unwrap();
        VisibilityWorker::spawn(VisibilityPrioritizer::new(Box::new(backend))).unwrap()
    }

    fn inside_camera() -> Camera {
        Camera::perspective(1.0, 1.0, 0.1, 100.0).look_at(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y)
    }

    fn big_box(name: &str) -> CadModel {
        CadModel::new(
            name,
            vec![SectorMetadata::solid(Aabb::new(Vec3::splat(-10.0), Vec3::splat(10.0)))],
            Mat4::IDENTITY,
        )
    }

    #[test]
    fn test_worker_round_trip() {
        let worker = worker();
        let diff = worker.set_models(vec![big_box("hall")]).unwrap();
        assert_eq!(diff.added.len(), 1);

        let ranked = worker.order_sectors_by_visibility(inside_camera()).unwrap();
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].priority - 1.0).abs() < 1e-6);
        assert_eq!(worker.last_stats().unwrap().pixels_hit, 256);
    }

    #[test]
    fn test_worker_propagates_errors() {
        let worker = worker();
        let planes = vec![ClipPlane::new(Vec3::X, 0.0); 9];
        assert!(matches!(
            worker.set_clipping(Some(planes), false),
            Err(VisibilityError::TooManyClipPlanes { .. })
        ));
    }

    #[test]
    fn test_worker_shared_between_threads() {
        let worker = std::sync::Arc::new(worker());
        worker.set_models(vec![big_box("hall")]).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let worker = std::sync::Arc::clone(&worker);
                std::thread::spawn(move || {
                    worker
                        .order_sectors_by_visibility(inside_camera())
                        .unwrap()
                        .len()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
    }

    #[test]
    fn test_calls_after_shutdown_fail() {
        let mut worker = worker();
        worker.shutdown();
        assert!(matches!(
            worker.order_sectors_by_visibility(inside_camera()),
            Err(VisibilityError::WorkerDisconnected)
        ));
        worker.shutdown();
    }
}
