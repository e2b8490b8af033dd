use async_trait::async_trait;
use chrono::Utc;

use crate::events::{resolve_termination, SubscriptionManager};
use crate::model::XsDuration;
use crate::soap::Fault;

use super::events::{lifetime_xml, termination_fault, timestamp};
use super::{required_text, Call, OnvifService, EVENTS_SUBSCRIPTION};

/// Serves every subscription at one address, picking the target from the
/// `subscription` query parameter or the `SubscriptionId` reference header.
pub struct RouterSubscriptionManagerImpl {
    subscriptions: SubscriptionManager,
}

impl RouterSubscriptionManagerImpl {
    pub fn new(subscriptions: SubscriptionManager) -> Self {
        RouterSubscriptionManagerImpl { subscriptions }
    }

    fn subscription_id(call: &Call<'_>) -> Result<u64, Fault> {
        let id = call
            .subscription
            .as_deref()
            .or_else(|| call.envelope.subscription_id())
            .ok_or_else(|| Fault::resource_unknown("no subscription addressed"))?;
        id.trim()
            .parse()
            .map_err(|_| Fault::resource_unknown(format!("subscription {} does not exist", id)))
    }

    async fn renew(&self, call: &Call<'_>, id: u64) -> Result<String, Fault> {
        let termination = resolve_termination(
            call.body().child_text("TerminationTime"),
            Utc::now(),
            self.subscriptions.default_termination(),
        )
        .map_err(|e| termination_fault(e, false))?;
        let info = self.subscriptions.renew(id, termination).await?;
        Ok(format!("<wsnt:RenewResponse>{}</wsnt:RenewResponse>", lifetime_xml(&info)))
    }

    async fn pull_messages(&self, call: &Call<'_>, id: u64) -> Result<String, Fault> {
        let body = call.body();
        let timeout: XsDuration = required_text(body, "Timeout")?
            .parse()
            .map_err(|e| Fault::invalid_arg(format!("Timeout: {}", e)))?;
        let limit: usize = required_text(body, "MessageLimit")?
            .parse()
            .map_err(|_| Fault::invalid_arg("MessageLimit is not a count"))?;

        let (messages, info) = self
            .subscriptions
            .pull(id, timeout.as_duration(), limit)
            .await?;

        let reference = format!("{}?subscription={}", call.xaddr(EVENTS_SUBSCRIPTION), id);
        let messages: String = messages.iter().map(|m| m.to_xml(&reference)).collect();
        Ok(format!(
            "<tev:PullMessagesResponse><tev:CurrentTime>{}</tev:CurrentTime><tev:TerminationTime>{}</tev:TerminationTime>{}</tev:PullMessagesResponse>",
            timestamp(info.current_time),
            timestamp(info.termination_time),
            messages
        ))
    }
}

#[async_trait]
impl OnvifService for RouterSubscriptionManagerImpl {
    async fn call(&self, call: &Call<'_>) -> Result<String, Fault> {
        let id = Self::subscription_id(call)?;

        match call.name() {
            "Renew" => self.renew(call, id).await,
            "Unsubscribe" => {
                self.subscriptions.unsubscribe(id).await?;
                Ok("<wsnt:UnsubscribeResponse/>".to_owned())
            }
            "PauseSubscription" => {
                self.subscriptions.set_paused(id, true).await?;
                Ok("<wsnt:PauseSubscriptionResponse/>".to_owned())
            }
            "ResumeSubscription" => {
                self.subscriptions.set_paused(id, false).await?;
                Ok("<wsnt:ResumeSubscriptionResponse/>".to_owned())
            }
            "PullMessages" => self.pull_messages(call, id).await,
            "SetSynchronizationPoint" => {
                self.subscriptions.set_synchronization_point(id).await?;
                Ok("<tev:SetSynchronizationPointResponse/>".to_owned())
            }
            _ => Err(call.unsupported()),
        }
    }
}
