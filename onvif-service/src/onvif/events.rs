use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::events::{
    resolve_termination, topic_set_xml, EventSource, Notification, SubscriptionInfo, SubscriptionManager,
    TerminationError, TopicFilter, CONCRETE_DIALECT, CONCRETE_SET_DIALECT,
};
use crate::soap::{escape, Fault};

use super::{Call, OnvifService, EVENTS_SUBSCRIPTION};

pub(crate) fn service_capabilities() -> &'static str {
    "<tev:Capabilities WSSubscriptionPolicySupport=\"false\" WSPullPointSupport=\"true\" WSPausableSubscriptionManagerInterfaceSupport=\"true\" MaxNotificationProducers=\"10\" MaxPullPoints=\"10\" PersistentNotificationStorage=\"false\"/>"
}

pub(crate) fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn termination_fault(error: TerminationError, initial: bool) -> Fault {
    let code = if initial {
        "wsnt:UnacceptableInitialTerminationTimeFault"
    } else {
        "wsnt:UnacceptableTerminationTimeFault"
    };
    let reason = match error {
        TerminationError::Invalid => "termination time is neither a duration nor a date",
        TerminationError::InPast => "termination time is in the past",
    };
    Fault::sender(code, reason)
}

/// `CurrentTime`/`TerminationTime` pair shared by subscription responses.
pub(crate) fn lifetime_xml(info: &SubscriptionInfo) -> String {
    format!(
        "<wsnt:CurrentTime>{}</wsnt:CurrentTime><wsnt:TerminationTime>{}</wsnt:TerminationTime>",
        timestamp(info.current_time),
        timestamp(info.termination_time)
    )
}

pub struct EventsImpl {
    subscriptions: SubscriptionManager,
    source: Arc<dyn EventSource>,
}

impl EventsImpl {
    pub fn new(subscriptions: SubscriptionManager, source: Arc<dyn EventSource>) -> Self {
        EventsImpl { subscriptions, source }
    }

    fn termination(&self, call: &Call<'_>) -> Result<DateTime<Utc>, Fault> {
        resolve_termination(
            call.body().child_text("InitialTerminationTime"),
            Utc::now(),
            self.subscriptions.default_termination(),
        )
        .map_err(|e| termination_fault(e, true))
    }

    async fn create_pull_point(&self, call: &Call<'_>) -> Result<String, Fault> {
        let filter = TopicFilter::from_request(call.body())?;
        let termination = self.termination(call)?;
        let base = call.xaddr(EVENTS_SUBSCRIPTION);

        let info = self
            .subscriptions
            .create_pull_point(termination, filter, |id| format!("{}?subscription={}", base, id))
            .await;

        Ok(format!(
            "<tev:CreatePullPointSubscriptionResponse><tev:SubscriptionReference><wsa:Address>{}?subscription={}</wsa:Address></tev:SubscriptionReference>{}</tev:CreatePullPointSubscriptionResponse>",
            escape(&base),
            info.id,
            lifetime_xml(&info)
        ))
    }

    async fn subscribe(&self, call: &Call<'_>) -> Result<String, Fault> {
        let consumer = call
            .body()
            .path(&["ConsumerReference", "Address"])
            .map(|a| a.text.clone())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| Fault::missing_arg("ConsumerReference"))?;
        if !(consumer.starts_with("http://") || consumer.starts_with("https://")) {
            return Err(Fault::invalid_arg(format!("consumer {} is not an HTTP address", consumer)));
        }
        let filter = TopicFilter::from_request(call.body())?;
        let termination = self.termination(call)?;
        let base = call.xaddr(EVENTS_SUBSCRIPTION);

        let info = self
            .subscriptions
            .subscribe(consumer, termination, filter, |id| format!("{}?subscription={}", base, id))
            .await;

        Ok(format!(
            "<wsnt:SubscribeResponse><wsnt:SubscriptionReference><wsa:Address>{}?subscription={}</wsa:Address></wsnt:SubscriptionReference>{}</wsnt:SubscribeResponse>",
            escape(&base),
            info.id,
            lifetime_xml(&info)
        ))
    }

    fn event_properties(&self) -> String {
        format!(
            "<tev:GetEventPropertiesResponse><tev:TopicNamespaceLocation>http://www.onvif.org/onvif/ver10/topics/topicns.xml</tev:TopicNamespaceLocation><wsnt:FixedTopicSet>true</wsnt:FixedTopicSet>{}<wsnt:TopicExpressionDialect>{}</wsnt:TopicExpressionDialect><wsnt:TopicExpressionDialect>{}</wsnt:TopicExpressionDialect><tev:MessageContentFilterDialect>http://www.onvif.org/ver10/tev/messageContentFilter/ItemFilter</tev:MessageContentFilterDialect><tev:MessageContentSchemaLocation>http://www.onvif.org/onvif/ver10/schema/onvif.xsd</tev:MessageContentSchemaLocation></tev:GetEventPropertiesResponse>",
            topic_set_xml(&self.source.topics()),
            CONCRETE_SET_DIALECT,
            CONCRETE_DIALECT
        )
    }

    async fn notify(&self, call: &Call<'_>) -> Result<String, Fault> {
        let notifications = call
            .body()
            .children_named("NotificationMessage")
            .map(Notification::from_element)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!("received {} notifications", notifications.len());
        for notification in notifications {
            self.subscriptions.publish(notification).await;
        }
        Ok(String::new())
    }
}

#[async_trait]
impl OnvifService for EventsImpl {
    async fn call(&self, call: &Call<'_>) -> Result<String, Fault> {
        match call.name() {
            "GetServiceCapabilities" => Ok(format!(
                "<tev:GetServiceCapabilitiesResponse>{}</tev:GetServiceCapabilitiesResponse>",
                service_capabilities()
            )),
            "CreatePullPointSubscription" => self.create_pull_point(call).await,
            "GetEventProperties" => Ok(self.event_properties()),
            "Subscribe" => self.subscribe(call).await,
            "Notify" => self.notify(call).await,
            "GetMessages" | "DestroyPullPoint" => Err(Fault::resource_unknown(
                "pull points are served at their subscription reference",
            )),
            _ => Err(call.unsupported()),
        }
    }
}
