//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  Arrival order is only guaranteed within one topic; consumers
//! must not assume any ordering across topics.
//!
//! # Topics
//!
//! | Topic | Direction | Traffic |
//! |---|---|---|
//! | [`Topic::PointCloud`] | in | Raw LiDAR scans |
//! | [`Topic::Imu`] | in | IMU attitude samples |
//! | [`Topic::Odometry`] | in | Wheel / visual odometry |
//! | [`Topic::PoseStamped`] | in | Externally supplied poses |
//! | [`Topic::FlatGround`] | in | Flat-ground assumption toggle |
//! | [`Topic::IncrementalPose`] | out | Scan-to-scan increment |
//! | [`Topic::IntegratedPose`] | out | Accumulated pose in the fixed frame |
//! | [`Topic::BaseFrameCloud`] | out | Filtered scan for the mapping back end |
//! | [`Topic::Diagnostics`] | out | Non-fatal condition counters |
//! | [`Topic::ComputationTime`] | out | Per-stage durations |

use strider_types::{Event, StriderError};
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    PointCloud,
    Imu,
    Odometry,
    PoseStamped,
    FlatGround,
    IncrementalPose,
    IntegratedPose,
    BaseFrameCloud,
    Diagnostics,
    ComputationTime,
}

impl Topic {
    /// Topics the front end consumes.
    pub const INPUTS: [Topic; 5] = [
        Topic::PointCloud,
        Topic::Imu,
        Topic::Odometry,
        Topic::PoseStamped,
        Topic::FlatGround,
    ];
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    point_cloud: broadcast::Sender<Event>,
    imu: broadcast::Sender<Event>,
    odometry: broadcast::Sender<Event>,
    pose_stamped: broadcast::Sender<Event>,
    flat_ground: broadcast::Sender<Event>,
    incremental_pose: broadcast::Sender<Event>,
    integrated_pose: broadcast::Sender<Event>,
    base_frame_cloud: broadcast::Sender<Event>,
    diagnostics: broadcast::Sender<Event>,
    computation_time: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        Self {
            point_cloud: broadcast::channel(capacity).0,
            imu: broadcast::channel(capacity).0,
            odometry: broadcast::channel(capacity).0,
            pose_stamped: broadcast::channel(capacity).0,
            flat_ground: broadcast::channel(capacity).0,
            incremental_pose: broadcast::channel(capacity).0,
            integrated_pose: broadcast::channel(capacity).0,
            base_frame_cloud: broadcast::channel(capacity).0,
            diagnostics: broadcast::channel(capacity).0,
            computation_time: broadcast::channel(capacity).0,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`StriderError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, StriderError> {
        match self.topic_sender(topic).send(event) {
            Ok(n) => {
                trace!(?topic, receivers = n, "event published");
                Ok(n)
            }
            Err(broadcast::error::SendError(_)) => Err(StriderError::Channel(format!(
                "No subscribers for topic {:?}",
                topic
            ))),
        }
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn receiver_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::PointCloud => &self.point_cloud,
            Topic::Imu => &self.imu,
            Topic::Odometry => &self.odometry,
            Topic::PoseStamped => &self.pose_stamped,
            Topic::FlatGround => &self.flat_ground,
            Topic::IncrementalPose => &self.incremental_pose,
            Topic::IntegratedPose => &self.integrated_pose,
            Topic::BaseFrameCloud => &self.base_frame_cloud,
            Topic::Diagnostics => &self.diagnostics,
            Topic::ComputationTime => &self.computation_time,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strider_types::EventPayload;

    fn make_event(flat: bool) -> Event {
        Event::new(
            "strider-middleware::test",
            EventPayload::FlatGroundAssumption(flat),
        )
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event()
    -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut subscriber1 = bus.subscribe_to(Topic::FlatGround);
        let mut subscriber2 = bus.subscribe_to(Topic::FlatGround);

        let event = make_event(true);
        bus.publish_to(Topic::FlatGround, event.clone())?;

        let recv1 = subscriber1.recv().await?;
        let recv2 = subscriber2.recv().await?;

        assert_eq!(recv1.id, event.id, "subscriber 1 got wrong event");
        assert_eq!(recv2.id, event.id, "subscriber 2 got wrong event");
        Ok(())
    }

    #[tokio::test]
    async fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut imu_rx = bus.subscribe_to(Topic::Imu);
        let _flat_rx = bus.subscribe_to(Topic::FlatGround);

        bus.publish_to(Topic::FlatGround, make_event(false))?;
        let imu_event = make_event(true);
        bus.publish_to(Topic::Imu, imu_event.clone())?;

        let received = imu_rx.recv().await?;
        assert_eq!(received.id, imu_event.id);
        assert_eq!(imu_rx.topic(), Topic::Imu);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_channel_error() {
        let bus = EventBus::new(4);
        let result = bus.publish_to(Topic::Diagnostics, make_event(true));
        assert!(matches!(result, Err(StriderError::Channel(_))));
        assert_eq!(bus.receiver_count(Topic::Diagnostics), 0);
    }
}
