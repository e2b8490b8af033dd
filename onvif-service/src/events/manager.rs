use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::model::{Events, XsDuration};
use crate::soap::{self, escape, Fault};

use super::{Notification, PropertyOperation, TopicFilter};

pub const MAX_QUEUED_MESSAGES: usize = 1000;
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const NOTIFY_ACTION: &str = "http://docs.oasis-open.org/wsn/bw-2/NotificationConsumer/Notify";

pub enum Delivery {
    Pull {
        queue: VecDeque<Notification>,
        waker: Arc<Notify>,
    },
    Push {
        consumer: String,
    },
}

pub struct Subscription {
    pub reference: String,
    pub delivery: Delivery,
    pub termination: DateTime<Utc>,
    pub paused: bool,
    pub filter: Option<TopicFilter>,
}

impl Subscription {
    fn accepts(&self, notification: &Notification) -> bool {
        !self.paused && self.filter.as_ref().map_or(true, |f| f.matches(&notification.topic))
    }

    fn enqueue(&mut self, notification: Notification) {
        if let Delivery::Pull { queue, waker } = &mut self.delivery {
            if queue.len() >= MAX_QUEUED_MESSAGES {
                queue.pop_front();
            }
            queue.push_back(notification);
            waker.notify_one();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo {
    pub id: u64,
    pub current_time: DateTime<Utc>,
    pub termination_time: DateTime<Utc>,
}

pub struct SubscriptionManagerInner {
    pub(crate) subscriptions: Mutex<HashMap<u64, Subscription>>,
    properties: Mutex<HashMap<String, Notification>>,
    next_id: AtomicU64,
    http: reqwest::Client,
    pub(crate) max_pull_timeout: XsDuration,
    pub(crate) default_termination: XsDuration,
}

/// Owns every subscription created through the events service.
#[derive(Clone)]
pub struct SubscriptionManager(Arc<SubscriptionManagerInner>);

#[derive(Clone)]
pub struct SubscriptionManagerWeak(Weak<SubscriptionManagerInner>);

impl Deref for SubscriptionManager {
    type Target = SubscriptionManagerInner;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl SubscriptionManager {
    pub fn downgrade(&self) -> SubscriptionManagerWeak {
        SubscriptionManagerWeak(Arc::downgrade(&self.0))
    }
}

impl SubscriptionManagerWeak {
    pub fn upgrade(&self) -> Option<SubscriptionManager> {
        self.0.upgrade().map(SubscriptionManager)
    }
}

fn unknown(id: u64) -> Fault {
    Fault::resource_unknown(format!("subscription {} does not exist", id))
}

impl SubscriptionManager {
    pub fn new(config: &Events) -> SubscriptionManager {
        SubscriptionManager(Arc::new(SubscriptionManagerInner {
            subscriptions: Mutex::new(HashMap::new()),
            properties: Default::default(),
            next_id: AtomicU64::new(1),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .no_proxy()
                .build()
                .unwrap_or_default(),
            max_pull_timeout: config.max_pull_timeout,
            default_termination: config.default_termination_time,
        }))
    }

    pub fn default_termination(&self) -> XsDuration {
        self.default_termination
    }

    /// Spawns the expiry sweep; it stops once the manager is dropped.
    pub fn start_sweeper(&self) {
        let weak = self.downgrade();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(manager) => {
                        let removed = manager.sweep(Utc::now()).await;
                        if removed > 0 {
                            tracing::debug!("expired {} subscriptions", removed);
                        }
                    }
                    None => break,
                }
            }
        });
    }

    /// Removes subscriptions whose termination time has passed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut subscriptions = self.subscriptions.lock().await;
        let before = subscriptions.len();
        subscriptions.retain(|_, s| {
            let alive = s.termination > now;
            if !alive {
                if let Delivery::Pull { waker, .. } = &s.delivery {
                    waker.notify_one();
                }
            }
            alive
        });
        before - subscriptions.len()
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Creates a pull point; `reference` builds its address from the id.
    pub async fn create_pull_point(
        &self,
        termination: DateTime<Utc>,
        filter: Option<TopicFilter>,
        reference: impl FnOnce(u64) -> String,
    ) -> SubscriptionInfo {
        let id = self.allocate();
        let mut subscription = Subscription {
            reference: reference(id),
            delivery: Delivery::Pull {
                queue: VecDeque::new(),
                waker: Arc::new(Notify::new()),
            },
            termination,
            paused: false,
            filter,
        };

        for notification in self.initial_states().await {
            if subscription.accepts(&notification) {
                subscription.enqueue(notification);
            }
        }

        self.subscriptions.lock().await.insert(id, subscription);
        tracing::info!("created pull point subscription {}", id);

        SubscriptionInfo {
            id,
            current_time: Utc::now(),
            termination_time: termination,
        }
    }

    pub async fn subscribe(
        &self,
        consumer: String,
        termination: DateTime<Utc>,
        filter: Option<TopicFilter>,
        reference: impl FnOnce(u64) -> String,
    ) -> SubscriptionInfo {
        let id = self.allocate();
        let subscription = Subscription {
            reference: reference(id),
            delivery: Delivery::Push { consumer: consumer.clone() },
            termination,
            paused: false,
            filter,
        };
        let initial: Vec<Notification> = self
            .initial_states()
            .await
            .into_iter()
            .filter(|n| subscription.accepts(n))
            .collect();
        let target = (consumer.clone(), subscription.reference.clone());
        self.subscriptions.lock().await.insert(id, subscription);
        tracing::info!("created push subscription {} for {}", id, consumer);

        if !initial.is_empty() {
            self.deliver(vec![(target, initial)]);
        }

        SubscriptionInfo {
            id,
            current_time: Utc::now(),
            termination_time: termination,
        }
    }

    pub async fn exists(&self, id: u64) -> bool {
        let now = Utc::now();
        self.subscriptions
            .lock()
            .await
            .get(&id)
            .map_or(false, |s| s.termination > now)
    }

    pub async fn renew(&self, id: u64, termination: DateTime<Utc>) -> Result<SubscriptionInfo, Fault> {
        let mut subscriptions = self.subscriptions.lock().await;
        let now = Utc::now();
        let subscription = subscriptions
            .get_mut(&id)
            .filter(|s| s.termination > now)
            .ok_or_else(|| unknown(id))?;
        subscription.termination = termination;

        Ok(SubscriptionInfo {
            id,
            current_time: now,
            termination_time: termination,
        })
    }

    pub async fn unsubscribe(&self, id: u64) -> Result<(), Fault> {
        let removed = self.subscriptions.lock().await.remove(&id).ok_or_else(|| unknown(id))?;
        if let Delivery::Pull { waker, .. } = removed.delivery {
            waker.notify_one();
        }
        tracing::info!("subscription {} removed", id);
        Ok(())
    }

    pub async fn set_paused(&self, id: u64, paused: bool) -> Result<(), Fault> {
        let mut subscriptions = self.subscriptions.lock().await;
        let subscription = subscriptions.get_mut(&id).ok_or_else(|| unknown(id))?;
        if subscription.paused == paused {
            let fault = if paused { "wsnt:PauseFailedFault" } else { "wsnt:ResumeFailedFault" };
            return Err(Fault::receiver(fault, format!("subscription {} is already {}", id, if paused { "paused" } else { "active" })));
        }
        subscription.paused = paused;
        Ok(())
    }

    /// Long-polls a pull point for up to `timeout` (capped at the configured
    /// maximum) and returns at most `limit` messages.
    pub async fn pull(&self, id: u64, timeout: Duration, limit: usize) -> Result<(Vec<Notification>, SubscriptionInfo), Fault> {
        let timeout = timeout.min(*self.max_pull_timeout);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let waker = {
                let mut subscriptions = self.subscriptions.lock().await;
                let now = Utc::now();
                let subscription = subscriptions
                    .get_mut(&id)
                    .filter(|s| s.termination > now)
                    .ok_or_else(|| unknown(id))?;
                let termination = subscription.termination;

                match &mut subscription.delivery {
                    Delivery::Pull { queue, waker } => {
                        if !queue.is_empty() || tokio::time::Instant::now() >= deadline {
                            let n = limit.max(1).min(queue.len());
                            let messages: Vec<Notification> = queue.drain(..n).collect();
                            return Ok((
                                messages,
                                SubscriptionInfo {
                                    id,
                                    current_time: now,
                                    termination_time: termination,
                                },
                            ));
                        }
                        waker.clone()
                    }
                    Delivery::Push { .. } => {
                        return Err(Fault::sender("ter:InvalidArgVal", format!("subscription {} is not a pull point", id)))
                    }
                }
            };

            // A notify_one issued while the lock was released leaves a permit,
            // so no wakeup is lost between the check above and this wait.
            let _ = tokio::time::timeout_at(deadline, waker.notified()).await;
        }
    }

    /// Re-emits the current state of every property to `id` as `Initialized`.
    pub async fn set_synchronization_point(&self, id: u64) -> Result<(), Fault> {
        let states = self.initial_states().await;
        let target = {
            let mut subscriptions = self.subscriptions.lock().await;
            let subscription = subscriptions.get_mut(&id).ok_or_else(|| unknown(id))?;
            let accepted: Vec<Notification> = states.into_iter().filter(|n| subscription.accepts(n)).collect();
            match &subscription.delivery {
                Delivery::Pull { .. } => {
                    for n in accepted {
                        subscription.enqueue(n);
                    }
                    None
                }
                Delivery::Push { consumer } => Some(((consumer.clone(), subscription.reference.clone()), accepted)),
            }
        };

        if let Some(target) = target {
            self.deliver(vec![target]);
        }
        Ok(())
    }

    async fn initial_states(&self) -> Vec<Notification> {
        let now = Utc::now();
        self.properties
            .lock()
            .await
            .values()
            .cloned()
            .map(|mut n| {
                n.property_operation = Some(PropertyOperation::Initialized);
                n.utc_time = now;
                n
            })
            .collect()
    }

    /// Fans `notification` out to every active subscription.
    pub async fn publish(&self, notification: Notification) {
        if let Some(key) = notification.property_key() {
            let mut properties = self.properties.lock().await;
            if notification.property_operation == Some(PropertyOperation::Deleted) {
                properties.remove(&key);
            } else {
                properties.insert(key, notification.clone());
            }
        }

        let mut push = Vec::new();
        {
            let now = Utc::now();
            let mut subscriptions = self.subscriptions.lock().await;
            for subscription in subscriptions.values_mut() {
                if subscription.termination <= now || !subscription.accepts(&notification) {
                    continue;
                }
                match &subscription.delivery {
                    Delivery::Pull { .. } => subscription.enqueue(notification.clone()),
                    Delivery::Push { consumer } => {
                        push.push(((consumer.clone(), subscription.reference.clone()), vec![notification.clone()]))
                    }
                }
            }
        }

        if !push.is_empty() {
            self.deliver(push);
        }
    }

    fn deliver(&self, targets: Vec<((String, String), Vec<Notification>)>) {
        for ((consumer, reference), notifications) in targets {
            let body = notify_envelope(&consumer, &reference, &notifications);
            let http = self.http.clone();
            tokio::spawn(async move {
                let result = http
                    .post(&consumer)
                    .header(reqwest::header::CONTENT_TYPE, soap::CONTENT_TYPE)
                    .body(body)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status());
                if let Err(e) = result {
                    tracing::warn!("notification to {} failed: {}", consumer, e);
                }
            });
        }
    }
}

pub(crate) fn notify_envelope(consumer: &str, reference: &str, notifications: &[Notification]) -> String {
    let header = format!(
        "<wsa:Action>{}</wsa:Action><wsa:To>{}</wsa:To>",
        NOTIFY_ACTION,
        escape(consumer)
    );
    let messages: String = notifications.iter().map(|n| n.to_xml(reference)).collect();
    soap::envelope(&header, &format!("<wsnt:Notify>{}</wsnt:Notify>", messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SimpleItem;

    fn manager() -> SubscriptionManager {
        SubscriptionManager::new(&Events {
            motion_alarm_interval: 0,
            max_pull_timeout: XsDuration::from_secs(2),
            default_termination_time: XsDuration::from_secs(60),
        })
    }

    fn motion(state: bool, op: PropertyOperation) -> Notification {
        Notification {
            topic: "tns1:VideoSource/MotionAlarm".to_owned(),
            utc_time: Utc::now(),
            property_operation: Some(op),
            source: vec![SimpleItem::new("Source", "VideoSource_1")],
            data: vec![SimpleItem::new("State", state.to_string())],
        }
    }

    fn reference(id: u64) -> String {
        format!("http://localhost/onvif/Events/Subscription?subscription={}", id)
    }

    fn in_a_minute() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(60)
    }

    #[tokio::test]
    async fn pull_point_receives_published_messages() {
        let manager = manager();
        let info = manager.create_pull_point(in_a_minute(), None, reference).await;
        manager.publish(motion(true, PropertyOperation::Changed)).await;
        manager.publish(motion(false, PropertyOperation::Changed)).await;

        let (messages, _) = manager.pull(info.id, Duration::from_secs(1), 1).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data[0].value, "true");

        let (messages, _) = manager.pull(info.id, Duration::from_secs(1), 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data[0].value, "false");
    }

    #[tokio::test]
    async fn pull_waits_for_a_message() {
        let manager = manager();
        let info = manager.create_pull_point(in_a_minute(), None, reference).await;

        let publisher = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            publisher.publish(motion(true, PropertyOperation::Changed)).await;
        });

        let (messages, _) = manager.pull(info.id, Duration::from_secs(2), 10).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn pull_times_out_empty() {
        let manager = manager();
        let info = manager.create_pull_point(in_a_minute(), None, reference).await;
        let started = std::time::Instant::now();
        let (messages, _) = manager.pull(info.id, Duration::from_millis(100), 10).await.unwrap();
        assert!(messages.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn new_pull_points_start_with_property_state() {
        let manager = manager();
        manager.publish(motion(true, PropertyOperation::Changed)).await;

        let info = manager.create_pull_point(in_a_minute(), None, reference).await;
        let (messages, _) = manager.pull(info.id, Duration::from_millis(10), 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].property_operation, Some(PropertyOperation::Initialized));

        manager.set_synchronization_point(info.id).await.unwrap();
        let (messages, _) = manager.pull(info.id, Duration::from_millis(10), 10).await.unwrap();
        assert_eq!(messages.len(), 1);

        manager.publish(motion(true, PropertyOperation::Deleted)).await;
        manager.pull(info.id, Duration::from_millis(10), 10).await.unwrap();
        manager.set_synchronization_point(info.id).await.unwrap();
        let (messages, _) = manager.pull(info.id, Duration::from_millis(10), 10).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn filters_and_pause_suppress_messages() {
        let manager = manager();
        let filter = TopicFilter::parse("tns1:Device//.").unwrap();
        let info = manager.create_pull_point(in_a_minute(), Some(filter), reference).await;
        manager.publish(motion(true, PropertyOperation::Changed)).await;
        let (messages, _) = manager.pull(info.id, Duration::from_millis(10), 10).await.unwrap();
        assert!(messages.is_empty());

        let other = manager.create_pull_point(in_a_minute(), None, reference).await;
        let (initial, _) = manager.pull(other.id, Duration::from_millis(10), 10).await.unwrap();
        assert_eq!(initial.len(), 1);
        manager.set_paused(other.id, true).await.unwrap();
        assert!(manager.set_paused(other.id, true).await.is_err());
        manager.publish(motion(false, PropertyOperation::Changed)).await;
        manager.set_paused(other.id, false).await.unwrap();
        let (messages, _) = manager.pull(other.id, Duration::from_millis(10), 10).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn queue_is_bounded() {
        let manager = manager();
        let info = manager.create_pull_point(in_a_minute(), None, reference).await;
        for i in 0..(MAX_QUEUED_MESSAGES + 5) {
            let mut n = motion(true, PropertyOperation::Changed);
            n.data[0].value = i.to_string();
            manager.publish(n).await;
        }
        let (messages, _) = manager.pull(info.id, Duration::from_millis(10), usize::MAX).await.unwrap();
        assert_eq!(messages.len(), MAX_QUEUED_MESSAGES);
        assert_eq!(messages[0].data[0].value, "5");
    }

    #[tokio::test]
    async fn expiry_renew_and_unsubscribe() {
        let manager = manager();
        let info = manager.create_pull_point(in_a_minute(), None, reference).await;

        let renewed = manager.renew(info.id, Utc::now() + chrono::Duration::seconds(120)).await.unwrap();
        assert!(renewed.termination_time > info.termination_time);

        assert_eq!(manager.sweep(Utc::now()).await, 0);
        assert_eq!(manager.sweep(Utc::now() + chrono::Duration::seconds(121)).await, 1);
        assert!(!manager.exists(info.id).await);
        assert!(manager.renew(info.id, in_a_minute()).await.is_err());

        let info = manager.create_pull_point(in_a_minute(), None, reference).await;
        manager.unsubscribe(info.id).await.unwrap();
        assert!(manager.unsubscribe(info.id).await.is_err());
        assert!(manager.pull(info.id, Duration::from_millis(10), 1).await.is_err());
    }

    #[tokio::test]
    async fn unsubscribe_wakes_waiting_pull() {
        let manager = manager();
        let info = manager.create_pull_point(in_a_minute(), None, reference).await;
        let other = manager.clone();
        let id = info.id;
        let waiter = tokio::spawn(async move { other.pull(id, Duration::from_secs(2), 1).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.unsubscribe(info.id).await.unwrap();
        assert!(waiter.await.unwrap().is_err());
    }

    #[test]
    fn notify_envelope_addresses_consumer() {
        let xml = notify_envelope("http://client/events", &reference(3), &[motion(true, PropertyOperation::Changed)]);
        assert!(xml.contains("<wsa:To>http://client/events</wsa:To>"));
        assert!(xml.contains("<wsnt:Notify><wsnt:NotificationMessage>"));
        assert!(xml.contains("subscription=3"));
    }
}
