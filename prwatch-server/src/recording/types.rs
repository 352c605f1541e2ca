use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordedEvent {
    pub timestamp: String,      // RFC 3339
    pub correlation_id: String, // groups a request with its response
    pub event_type: EventType,
    pub direction: Direction,
    pub operation: String, // e.g. "slack_event", "GET /repos/acme/widgets/pulls/42"
    pub data: serde_json::Value,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum EventType {
    SlackEventReceived,
    GitHubApiCall,
    SlackApiCall,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Direction {
    Request,
    Response,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub enum ServiceType {
    GitHub,
    Slack,
}

impl ServiceType {
    pub fn event_type(&self) -> EventType {
        match self {
            ServiceType::GitHub => EventType::GitHubApiCall,
            ServiceType::Slack => EventType::SlackApiCall,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";
