//! Event model shared by the events service, the subscription manager and
//! event sources.

use std::fmt::Write;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::model::XsDuration;
use crate::soap::{escape, Element, Fault};

mod manager;
mod source;

pub use manager::{Delivery, SubscriptionInfo, SubscriptionManager, SubscriptionManagerWeak, MAX_QUEUED_MESSAGES};
pub use source::MotionAlarmSource;

pub const CONCRETE_SET_DIALECT: &str = "http://www.onvif.org/ver10/tev/topicExpression/ConcreteSet";
pub const CONCRETE_DIALECT: &str = "http://docs.oasis-open.org/wsn/t-1/TopicExpression/Concrete";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyOperation {
    Initialized,
    Changed,
    Deleted,
}

impl PropertyOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyOperation::Initialized => "Initialized",
            PropertyOperation::Changed => "Changed",
            PropertyOperation::Deleted => "Deleted",
        }
    }

    fn parse(s: &str) -> Option<PropertyOperation> {
        match s {
            "Initialized" => Some(PropertyOperation::Initialized),
            "Changed" => Some(PropertyOperation::Changed),
            "Deleted" => Some(PropertyOperation::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimpleItem {
    pub name: String,
    pub value: String,
}

impl SimpleItem {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        SimpleItem {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub topic: String,
    pub utc_time: DateTime<Utc>,
    pub property_operation: Option<PropertyOperation>,
    pub source: Vec<SimpleItem>,
    pub data: Vec<SimpleItem>,
}

impl Notification {
    /// Identity of the property instance this notification describes.
    pub fn property_key(&self) -> Option<String> {
        self.property_operation?;
        let mut key = normalize_topic(&self.topic);
        for item in &self.source {
            let _ = write!(key, "|{}={}", item.name, item.value);
        }
        Some(key)
    }

    pub fn to_xml(&self, subscription_reference: &str) -> String {
        let mut message = format!(
            "<tt:Message UtcTime=\"{}\"",
            self.utc_time.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        if let Some(op) = self.property_operation {
            let _ = write!(message, " PropertyOperation=\"{}\"", op.as_str());
        }
        message.push('>');
        message.push_str("<tt:Source>");
        write_items(&mut message, &self.source);
        message.push_str("</tt:Source><tt:Data>");
        write_items(&mut message, &self.data);
        message.push_str("</tt:Data></tt:Message>");

        format!(
            "<wsnt:NotificationMessage><wsnt:SubscriptionReference><wsa:Address>{}</wsa:Address></wsnt:SubscriptionReference><wsnt:Topic Dialect=\"{}\">{}</wsnt:Topic><wsnt:Message>{}</wsnt:Message></wsnt:NotificationMessage>",
            escape(subscription_reference),
            CONCRETE_SET_DIALECT,
            escape(&self.topic),
            message
        )
    }

    /// Reads a `wsnt:NotificationMessage`.
    pub fn from_element(e: &Element) -> Result<Notification, Fault> {
        let topic = e.child("Topic").ok_or_else(|| Fault::missing_arg("Topic"))?;
        let message = e
            .path(&["Message", "Message"])
            .ok_or_else(|| Fault::missing_arg("Message"))?;

        let utc_time = match message.attr("UtcTime") {
            Some(t) => DateTime::parse_from_rfc3339(t)
                .map_err(|_| Fault::invalid_arg(format!("invalid UtcTime {}", t)))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        let items = |name: &str| -> Vec<SimpleItem> {
            message
                .child(name)
                .map(|c| {
                    c.children_named("SimpleItem")
                        .filter_map(|i| Some(SimpleItem::new(i.attr("Name")?, i.attr("Value")?)))
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(Notification {
            topic: topic.text.clone(),
            utc_time,
            property_operation: message.attr("PropertyOperation").and_then(PropertyOperation::parse),
            source: items("Source"),
            data: items("Data"),
        })
    }
}

fn write_items(out: &mut String, items: &[SimpleItem]) {
    for item in items {
        let _ = write!(
            out,
            "<tt:SimpleItem Name=\"{}\" Value=\"{}\"/>",
            escape(&item.name),
            escape(&item.value)
        );
    }
}

/// Topic path with namespace prefixes removed from every segment.
pub fn normalize_topic(topic: &str) -> String {
    topic
        .trim()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.rsplit(':').next().unwrap_or(s))
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone, PartialEq)]
struct TopicPattern {
    path: String,
    descendants: bool,
}

/// `wsnt:TopicExpression` in the ConcreteSet dialect: `|`-separated topic
/// paths, each optionally ending in `//.` to include descendants.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicFilter {
    patterns: Vec<TopicPattern>,
}

impl TopicFilter {
    pub fn parse(expression: &str) -> Result<TopicFilter, Fault> {
        let patterns: Vec<TopicPattern> = expression
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                let (path, descendants) = match s.strip_suffix("//.") {
                    Some(p) => (p, true),
                    None => (s, false),
                };
                TopicPattern {
                    path: normalize_topic(path),
                    descendants,
                }
            })
            .collect();

        if patterns.is_empty() {
            return Err(Fault::sender("wsnt:InvalidTopicExpressionFault", "empty topic expression"));
        }
        Ok(TopicFilter { patterns })
    }

    /// Reads the `Filter` element of a Subscribe or CreatePullPointSubscription
    /// request. Message content filters are not evaluated.
    pub fn from_request(body: &Element) -> Result<Option<TopicFilter>, Fault> {
        let expression = match body.path(&["Filter", "TopicExpression"]) {
            Some(e) => e,
            None => return Ok(None),
        };
        match expression.attr("Dialect") {
            None | Some(CONCRETE_SET_DIALECT) | Some(CONCRETE_DIALECT) => {}
            Some(other) => {
                return Err(Fault::sender(
                    "wsnt:TopicExpressionDialectUnknownFault",
                    format!("unsupported dialect {}", other),
                ))
            }
        }
        TopicFilter::parse(&expression.text).map(Some)
    }

    pub fn matches(&self, topic: &str) -> bool {
        let topic = normalize_topic(topic);
        self.patterns.iter().any(|p| {
            topic == p.path || (p.descendants && topic.starts_with(&p.path) && topic[p.path.len()..].starts_with('/'))
        })
    }
}

/// Description of one topic for `GetEventProperties`.
#[derive(Debug, Clone)]
pub struct TopicDescription {
    pub topic: String,
    pub is_property: bool,
    pub source: Vec<(String, String)>,
    pub data: Vec<(String, String)>,
}

/// Renders topic descriptions as a `wstop:TopicSet`.
pub fn topic_set_xml(topics: &[TopicDescription]) -> String {
    let mut out = String::from("<wstop:TopicSet>");
    for topic in topics {
        let segments: Vec<&str> = topic.topic.split('/').collect();
        for segment in &segments[..segments.len() - 1] {
            let _ = write!(out, "<{}>", segment);
        }
        let leaf = segments[segments.len() - 1];
        let _ = write!(
            out,
            "<{} wstop:topic=\"true\"><tt:MessageDescription IsProperty=\"{}\"><tt:Source>",
            leaf, topic.is_property
        );
        for (name, ty) in &topic.source {
            let _ = write!(out, "<tt:SimpleItemDescription Name=\"{}\" Type=\"{}\"/>", name, ty);
        }
        out.push_str("</tt:Source><tt:Data>");
        for (name, ty) in &topic.data {
            let _ = write!(out, "<tt:SimpleItemDescription Name=\"{}\" Type=\"{}\"/>", name, ty);
        }
        let _ = write!(out, "</tt:Data></tt:MessageDescription></{}>", leaf);
        for segment in segments[..segments.len() - 1].iter().rev() {
            let _ = write!(out, "</{}>", segment);
        }
    }
    out.push_str("</wstop:TopicSet>");
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationError {
    Invalid,
    InPast,
}

/// Resolves an `InitialTerminationTime`/`TerminationTime` that is either an
/// `xs:duration` relative to `now` or an absolute `xs:dateTime`.
pub fn resolve_termination(
    requested: Option<&str>,
    now: DateTime<Utc>,
    default: XsDuration,
) -> Result<DateTime<Utc>, TerminationError> {
    let after = |d: XsDuration| {
        d.as_chrono()
            .and_then(|d| now.checked_add_signed(d))
            .ok_or(TerminationError::Invalid)
    };

    let requested = match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(r) => r,
        None => return after(default),
    };

    if requested.starts_with('P') {
        let duration: XsDuration = requested.parse().map_err(|_| TerminationError::Invalid)?;
        return after(duration);
    }

    let at = DateTime::parse_from_rfc3339(requested)
        .map_err(|_| TerminationError::Invalid)?
        .with_timezone(&Utc);
    if at <= now {
        return Err(TerminationError::InPast);
    }
    Ok(at)
}

/// Producer of notifications, started once at bootstrap.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn topics(&self) -> Vec<TopicDescription>;

    /// Publishes into `manager` until it is dropped.
    async fn run(&self, manager: SubscriptionManagerWeak);
}
