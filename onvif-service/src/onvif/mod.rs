//! ONVIF service implementations and the wiring that hosts them.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::host::ServiceBuilder;
use crate::auth::{Access, Authenticator, Principal};
use crate::events::{EventSource, MotionAlarmSource, SubscriptionManager};
use crate::model::Config;
use crate::repository::{UserRepository, UserRepositoryImpl};
use crate::soap::{Element, Envelope, Fault};
use crate::Result;

pub mod contracts;
mod device;
mod events;
mod media;
mod ptz;
mod subscription;

pub use device::DeviceImpl;
pub use events::EventsImpl;
pub use media::MediaImpl;
pub use ptz::PtzImpl;
pub use subscription::RouterSubscriptionManagerImpl;

pub const DEVICE_SERVICE: &str = "/onvif/device_service";
pub const MEDIA_SERVICE: &str = "/onvif/media_service";
pub const PTZ_SERVICE: &str = "/onvif/ptz_service";
pub const EVENTS_SERVICE: &str = "/onvif/events_service";
pub const EVENTS_SUBSCRIPTION: &str = "/onvif/Events/Subscription";

#[derive(Debug)]
pub struct Operation {
    pub name: &'static str,
    pub namespace: &'static str,
    pub access: Access,
}

/// One port type: a named set of operations.
#[derive(Debug)]
pub struct Contract {
    pub name: &'static str,
    pub prefix: &'static str,
    pub namespace: &'static str,
    pub action_base: &'static str,
    pub operations: &'static [Operation],
}

impl Contract {
    pub fn operation(&self, namespace: &str, name: &str) -> Option<&'static Operation> {
        self.operations
            .iter()
            .find(|o| o.name == name && o.namespace == namespace)
    }

    pub fn action(&self, operation: &str) -> String {
        format!("{}/{}", self.action_base, operation)
    }

    pub fn response_action(&self, operation: &str) -> String {
        format!("{}/{}Response", self.action_base, operation)
    }
}

/// A dispatched SOAP request.
pub struct Call<'a> {
    pub contract: &'static Contract,
    pub operation: &'static Operation,
    pub envelope: &'a Envelope,
    pub principal: Principal,
    /// `scheme://host[:port]` the client used to reach us.
    pub base_url: String,
    /// `subscription` query parameter of the request address.
    pub subscription: Option<String>,
}

impl Call<'_> {
    pub fn body(&self) -> &Element {
        &self.envelope.body
    }

    pub fn name(&self) -> &'static str {
        self.operation.name
    }

    pub fn xaddr(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn unsupported(&self) -> Fault {
        Fault::action_not_supported(self.operation.name)
    }
}

#[async_trait]
pub trait OnvifService: Send + Sync {
    /// Returns the response body element for `call`.
    async fn call(&self, call: &Call<'_>) -> std::result::Result<String, Fault>;
}

/// `<ReferenceToken>` style argument lookup shared by the services.
pub(crate) fn required_text<'a>(body: &'a Element, name: &str) -> std::result::Result<&'a str, Fault> {
    body.child_text(name)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Fault::missing_arg(name))
}

pub struct OnvifInner {
    pub(crate) config: Config,
    pub(crate) authenticator: Authenticator,
    pub(crate) subscriptions: SubscriptionManager,
    pub(crate) event_source: Arc<dyn EventSource>,

    pub(crate) device: Arc<DeviceImpl>,
    pub(crate) media: Arc<MediaImpl>,
    pub(crate) ptz: Arc<PtzImpl>,
    pub(crate) events: Arc<EventsImpl>,
    pub(crate) router: Arc<RouterSubscriptionManagerImpl>,
}

/// The composed device: every service singleton plus the shared state they
/// depend on.
#[derive(Clone)]
pub struct Onvif(Arc<OnvifInner>);

impl Deref for Onvif {
    type Target = OnvifInner;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Onvif {
    pub fn new(config: Config) -> Result<Onvif> {
        let users: Arc<dyn UserRepository> = Arc::new(UserRepositoryImpl::new(config.users.clone()));
        let video_source = config
            .media
            .profiles
            .first()
            .map(|p| media::video_source_token(p))
            .unwrap_or_else(|| "VideoSource_1".to_owned());
        let event_source: Arc<dyn EventSource> = Arc::new(MotionAlarmSource::new(
            Duration::from_secs(config.events.motion_alarm_interval),
            video_source,
        ));
        Onvif::with_parts(config, users, event_source)
    }

    /// Wires the services around a caller-supplied user repository and
    /// event source.
    pub fn with_parts(config: Config, users: Arc<dyn UserRepository>, event_source: Arc<dyn EventSource>) -> Result<Onvif> {
        let authenticator = Authenticator::new(users.clone())?;
        let subscriptions = SubscriptionManager::new(&config.events);

        let device = Arc::new(DeviceImpl::new(&config, users));
        let media = Arc::new(MediaImpl::new(&config.media));
        let ptz = Arc::new(PtzImpl::new(&config.media));
        let events = Arc::new(EventsImpl::new(subscriptions.clone(), event_source.clone()));
        let router = Arc::new(RouterSubscriptionManagerImpl::new(subscriptions.clone()));

        Ok(Onvif(Arc::new(OnvifInner {
            config,
            authenticator,
            subscriptions,
            event_source,
            device,
            media,
            ptz,
            events,
            router,
        })))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Maps every implementation to its contracts. A path serves exactly one
    /// implementation.
    pub fn service_builder(&self) -> Result<ServiceBuilder> {
        let mut builder = ServiceBuilder::default();

        builder.add_service_endpoint(self.device.clone(), &contracts::DEVICE, DEVICE_SERVICE)?;
        builder.add_service_endpoint(self.media.clone(), &contracts::MEDIA, MEDIA_SERVICE)?;
        builder.add_service_endpoint(self.ptz.clone(), &contracts::PTZ, PTZ_SERVICE)?;

        builder.add_service_endpoint(self.events.clone(), &contracts::NOTIFICATION_PRODUCER, EVENTS_SERVICE)?;
        builder.add_service_endpoint(self.events.clone(), &contracts::EVENT_PORT_TYPE, EVENTS_SERVICE)?;
        builder.add_service_endpoint(self.events.clone(), &contracts::PULL_POINT, EVENTS_SERVICE)?;

        builder.add_service_endpoint(self.router.clone(), &contracts::SUBSCRIPTION_MANAGER, EVENTS_SUBSCRIPTION)?;
        builder.add_service_endpoint(self.router.clone(), &contracts::PAUSABLE_SUBSCRIPTION_MANAGER, EVENTS_SUBSCRIPTION)?;
        builder.add_service_endpoint(self.router.clone(), &contracts::PULL_POINT_SUBSCRIPTION, EVENTS_SUBSCRIPTION)?;

        Ok(builder)
    }

    /// Starts the subscription expiry sweep and the event source.
    pub fn start_events(&self) {
        self.subscriptions.start_sweeper();

        let source = self.event_source.clone();
        let manager = self.subscriptions.downgrade();
        tokio::spawn(async move {
            source.run(manager).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_resolve_by_namespace() {
        let op = contracts::PULL_POINT_SUBSCRIPTION.operation(crate::soap::WSNT, "Unsubscribe").unwrap();
        assert_eq!(op.name, "Unsubscribe");
        assert!(contracts::PULL_POINT_SUBSCRIPTION.operation(crate::soap::TEV, "Unsubscribe").is_none());
        assert_eq!(
            contracts::EVENT_PORT_TYPE.response_action("GetEventProperties"),
            "http://www.onvif.org/ver10/events/wsdl/EventPortType/GetEventPropertiesResponse"
        );
    }

    #[test]
    fn every_path_gets_its_contracts() {
        let onvif = Onvif::new(Config::default()).unwrap();
        let endpoints = onvif.service_builder().unwrap().build();
        let paths: Vec<&str> = endpoints.iter().map(|e| e.path).collect();
        assert_eq!(paths, vec![DEVICE_SERVICE, MEDIA_SERVICE, PTZ_SERVICE, EVENTS_SERVICE, EVENTS_SUBSCRIPTION]);

        let events = endpoints.iter().find(|e| e.path == EVENTS_SERVICE).unwrap();
        let names: Vec<&str> = events.contracts.iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["NotificationProducer", "EventPortType", "PullPoint"]);

        let subscription = endpoints.iter().find(|e| e.path == EVENTS_SUBSCRIPTION).unwrap();
        assert_eq!(subscription.contracts.len(), 3);
    }

    #[test]
    fn a_path_cannot_host_two_implementations() {
        let onvif = Onvif::new(Config::default()).unwrap();
        let mut builder = onvif.service_builder().unwrap();
        assert!(builder
            .add_service_endpoint(onvif.media.clone(), &contracts::MEDIA, DEVICE_SERVICE)
            .is_err());
    }
}
