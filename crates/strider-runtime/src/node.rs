//! Online wiring of a [`Frontend`] to the [`EventBus`].
//!
//! [`spawn`] starts one task per input topic. Messages of one type are
//! therefore handled in arrival order and never concurrently with each
//! other, while different types run side by side; the frontend's own locks
//! take care of the rest. Scans are registered on the blocking pool so ICP
//! never stalls a runtime worker. Every scan's outputs are published on the
//! output topics:
//!
//! | Topic | Payload |
//! |---|---|
//! | [`Topic::IncrementalPose`] | [`EventPayload::IncrementalPose`] |
//! | [`Topic::IntegratedPose`] | [`EventPayload::IntegratedPose`] |
//! | [`Topic::BaseFrameCloud`] | [`EventPayload::BaseFrameCloud`] |
//! | [`Topic::Diagnostics`] | [`EventPayload::Diagnostics`] |
//! | [`Topic::ComputationTime`] | [`EventPayload::ComputationTime`] (profiling only) |

use std::sync::Arc;

use strider_middleware::{EventBus, Topic, TopicReceiver};
use strider_perception::registration::PointSetRegistration;
use strider_types::{Event, EventPayload, Measurement, StriderError};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::frontend::{Frontend, ScanOutput};

const EVENT_SOURCE: &str = "strider-runtime::frontend";

/// Running input tasks. Dropping the handle leaves them running; call
/// [`shutdown`][Self::shutdown] to stop them.
pub struct NodeHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Abort every input task.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        info!(tasks = self.task_count(), "frontend node stopped");
    }
}

/// Subscribe `frontend` to every input topic of `bus`.
///
/// Subscriptions are made before this returns, so nothing published
/// afterwards is missed.
pub fn spawn<R>(frontend: Arc<Frontend<R>>, bus: &EventBus) -> NodeHandle
where
    R: PointSetRegistration + Send + 'static,
{
    let tasks = Topic::INPUTS
        .iter()
        .map(|&topic| {
            let rx = bus.subscribe_to(topic);
            tokio::spawn(run_input(Arc::clone(&frontend), bus.clone(), rx))
        })
        .collect::<Vec<_>>();
    info!(tasks = tasks.len(), "frontend node started");
    NodeHandle { tasks }
}

async fn run_input<R>(frontend: Arc<Frontend<R>>, bus: EventBus, mut rx: TopicReceiver)
where
    R: PointSetRegistration + Send + 'static,
{
    let topic = rx.topic();
    loop {
        match rx.recv().await {
            Ok(event) => match event.payload {
                EventPayload::Measurement(Measurement::PointCloud(cloud)) => {
                    let frontend = Arc::clone(&frontend);
                    match tokio::task::spawn_blocking(move || frontend.on_point_cloud(&cloud)).await {
                        Ok(output) => publish_outputs(&bus, &output),
                        Err(e) => warn!(?topic, error = %e, "scan processing task failed"),
                    }
                }
                EventPayload::Measurement(measurement) => {
                    if let Some(output) = frontend.handle(measurement) {
                        publish_outputs(&bus, &output);
                    }
                }
                EventPayload::FlatGroundAssumption(enabled) => frontend.on_flat_ground(enabled),
                other => debug!(?topic, payload = ?other, "ignoring non-input payload"),
            },
            Err(RecvError::Lagged(n)) => {
                warn!(?topic, lagged_by = n, "frontend input lagged, messages dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!(?topic, "input task finished");
}

/// Publish every output of one scan. Topics without subscribers are
/// skipped.
pub fn publish_outputs(bus: &EventBus, output: &ScanOutput) {
    let mut events = vec![
        (Topic::IncrementalPose, EventPayload::IncrementalPose(output.incremental.clone())),
        (Topic::IntegratedPose, EventPayload::IntegratedPose(output.integrated.clone())),
        (Topic::BaseFrameCloud, EventPayload::BaseFrameCloud(output.base_cloud.clone())),
        (Topic::Diagnostics, EventPayload::Diagnostics(output.diagnostics.clone())),
    ];
    if let Some(timings) = output.timings {
        events.push((Topic::ComputationTime, EventPayload::ComputationTime(timings)));
    }
    for (topic, payload) in events {
        match bus.publish_to(topic, Event::new(EVENT_SOURCE, payload)) {
            Ok(_) => {}
            Err(StriderError::Channel(_)) => debug!(?topic, "no subscribers"),
            Err(e) => warn!(?topic, error = %e, "publish failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use nalgebra::{Isometry3, Point3};
    use strider_perception::filter::PassThroughFilter;
    use strider_perception::registration::{Alignment, RegistrationError};
    use strider_types::{Header, ImuSample, PointCloud};
    use tokio::time::timeout;

    use crate::config::FrontendConfig;

    struct EchoGuess;

    impl PointSetRegistration for EchoGuess {
        fn align(
            &self,
            source: &[Point3<f64>],
            _target: &[Point3<f64>],
            guess: &Isometry3<f64>,
        ) -> Result<Alignment, RegistrationError> {
            Ok(Alignment {
                transform: *guess,
                fitness: 0.0,
                aligned: source.to_vec(),
            })
        }
    }

    fn frontend(config: FrontendConfig) -> Arc<Frontend<EchoGuess>> {
        Arc::new(Frontend::with_parts(config, EchoGuess, Box::new(PassThroughFilter)).unwrap())
    }

    fn scan(seq: u64, stamp: f64) -> Event {
        let cloud = PointCloud::new(
            Header::new(seq, stamp, "lidar"),
            vec![Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
        );
        Event::new("test", EventPayload::Measurement(Measurement::PointCloud(cloud)))
    }

    #[tokio::test]
    async fn scans_produce_pose_outputs() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut poses = bus.subscribe_to(Topic::IntegratedPose);
        let mut clouds = bus.subscribe_to(Topic::BaseFrameCloud);
        let node = spawn(frontend(FrontendConfig::default()), &bus);
        assert_eq!(node.task_count(), Topic::INPUTS.len());

        bus.publish_to(Topic::PointCloud, scan(0, 0.0))?;
        bus.publish_to(Topic::PointCloud, scan(1, 0.1))?;

        for expected in [0.0, 0.1] {
            let event = timeout(Duration::from_secs(5), poses.recv()).await??;
            match event.payload {
                EventPayload::IntegratedPose(pose) => {
                    assert!((pose.stamp - expected).abs() < 1e-12);
                    assert_eq!(pose.frame_id, "odom");
                }
                other => panic!("unexpected payload {other:?}"),
            }
        }
        let event = timeout(Duration::from_secs(5), clouds.recv()).await??;
        assert!(matches!(event.payload, EventPayload::BaseFrameCloud(c) if c.len() == 2));

        node.shutdown();
        Ok(())
    }

    #[tokio::test]
    async fn flat_ground_toggle_reaches_frontend() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let frontend = frontend(FrontendConfig::default());
        let mut diagnostics = bus.subscribe_to(Topic::Diagnostics);
        let node = spawn(Arc::clone(&frontend), &bus);

        bus.publish_to(
            Topic::FlatGround,
            Event::new("test", EventPayload::FlatGroundAssumption(true)),
        )?;
        timeout(Duration::from_secs(5), async {
            while !frontend.flat_ground() {
                tokio::task::yield_now().await;
            }
        })
        .await?;
        assert!(frontend.flat_ground());

        bus.publish_to(Topic::PointCloud, scan(0, 0.0))?;
        let event = timeout(Duration::from_secs(5), diagnostics.recv()).await??;
        assert!(matches!(event.payload, EventPayload::Diagnostics(d) if d.scans_processed == 1));

        node.shutdown();
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scans_and_imu_flow_on_multi_thread_runtime() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let frontend = frontend(FrontendConfig::default());
        let mut diagnostics = bus.subscribe_to(Topic::Diagnostics);
        let node = spawn(Arc::clone(&frontend), &bus);

        for seq in 0..5u64 {
            let stamp = seq as f64 * 0.1;
            let imu = ImuSample {
                header: Header::new(seq, stamp, "base_link"),
                orientation: nalgebra::Quaternion::identity(),
            };
            bus.publish_to(Topic::Imu, Event::new("test", EventPayload::Measurement(Measurement::Imu(imu))))?;
            bus.publish_to(Topic::PointCloud, scan(seq, stamp))?;
        }

        let mut last = 0;
        while last < 5 {
            let event = timeout(Duration::from_secs(5), diagnostics.recv()).await??;
            match event.payload {
                EventPayload::Diagnostics(d) => {
                    assert!(d.scans_processed > last);
                    last = d.scans_processed;
                }
                other => panic!("unexpected payload {other:?}"),
            }
        }
        let pose = frontend.integrated_estimate();
        assert!(pose.translation.vector.norm() < 1e-9);
        assert!(pose.rotation.angle() < 1e-9);

        node.shutdown();
        Ok(())
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = EventBus::default();
        let frontend = frontend(FrontendConfig::default());
        let output = frontend.on_point_cloud(&PointCloud::new(Header::new(0, 0.0, "lidar"), vec![]));
        publish_outputs(&bus, &output);
        assert_eq!(bus.receiver_count(Topic::IntegratedPose), 0);
    }
}
