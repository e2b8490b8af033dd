use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{EventSource, Notification, PropertyOperation, SimpleItem, SubscriptionManagerWeak, TopicDescription};

pub const MOTION_ALARM_TOPIC: &str = "tns1:VideoSource/MotionAlarm";

/// Toggles `tns1:VideoSource/MotionAlarm` for one video source.
pub struct MotionAlarmSource {
    interval: Duration,
    video_source: String,
}

impl MotionAlarmSource {
    pub fn new(interval: Duration, video_source: impl Into<String>) -> Self {
        MotionAlarmSource {
            interval,
            video_source: video_source.into(),
        }
    }

    fn notification(&self, state: bool, operation: PropertyOperation) -> Notification {
        Notification {
            topic: MOTION_ALARM_TOPIC.to_owned(),
            utc_time: Utc::now(),
            property_operation: Some(operation),
            source: vec![SimpleItem::new("Source", self.video_source.clone())],
            data: vec![SimpleItem::new("State", state.to_string())],
        }
    }
}

#[async_trait]
impl EventSource for MotionAlarmSource {
    fn topics(&self) -> Vec<TopicDescription> {
        vec![TopicDescription {
            topic: MOTION_ALARM_TOPIC.to_owned(),
            is_property: true,
            source: vec![("Source".to_owned(), "tt:ReferenceToken".to_owned())],
            data: vec![("State".to_owned(), "xs:boolean".to_owned())],
        }]
    }

    async fn run(&self, manager: SubscriptionManagerWeak) {
        match manager.upgrade() {
            Some(m) => m.publish(self.notification(false, PropertyOperation::Initialized)).await,
            None => return,
        }

        if self.interval.is_zero() {
            return;
        }

        let mut state = false;
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            state = !state;
            match manager.upgrade() {
                Some(m) => {
                    tracing::debug!("motion alarm {} -> {}", self.video_source, state);
                    m.publish(self.notification(state, PropertyOperation::Changed)).await;
                }
                None => break,
            }
        }
    }
}
