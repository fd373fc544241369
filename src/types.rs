//! Core types for dripq: catalog rows, pipeline messages and send data.
//!
//! This module defines the data structures flowing through the pipeline:
//! per-lead sequence cursors, outbox rows, the broker message payload and the
//! provider-facing email structure.
//!
//! ## What
//!
//! - [`PendingLead`] is the message payload: the eligibility row the
//!   scheduler stores in the outbox and the worker consumes.
//! - [`OutboxRow`] is the durable hand-off between scheduler and broker.
//! - [`LeadRecord`], [`StepRecord`] and [`TemplateRecord`] are the read-only
//!   catalog rows the worker loads before a send.
//!
//! All ids are opaque strings end to end.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Per-lead sequence status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SequenceStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl SequenceStatus {
    /// Terminal states are sinks: the scheduler never picks them up and the
    /// worker never advances them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequenceStatus::Completed | SequenceStatus::Failed | SequenceStatus::Paused
        )
    }
}

impl fmt::Display for SequenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceStatus::Pending => write!(f, "PENDING"),
            SequenceStatus::Running => write!(f, "RUNNING"),
            SequenceStatus::Completed => write!(f, "COMPLETED"),
            SequenceStatus::Failed => write!(f, "FAILED"),
            SequenceStatus::Paused => write!(f, "PAUSED"),
        }
    }
}

impl std::str::FromStr for SequenceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SequenceStatus::Pending),
            "RUNNING" => Ok(SequenceStatus::Running),
            "COMPLETED" => Ok(SequenceStatus::Completed),
            "FAILED" => Ok(SequenceStatus::Failed),
            "PAUSED" => Ok(SequenceStatus::Paused),
            other => Err(format!("invalid sequence status: {}", other)),
        }
    }
}

/// Verdict of the external email validation service on a lead address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EmailValidity {
    Valid,
    Invalid,
    Unknown,
}

impl std::str::FromStr for EmailValidity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "VALID" => Ok(EmailValidity::Valid),
            "INVALID" => Ok(EmailValidity::Invalid),
            "UNKNOWN" => Ok(EmailValidity::Unknown),
            other => Err(format!("invalid email validity: {}", other)),
        }
    }
}

/// The eligibility row produced by the scheduler and consumed by the worker.
///
/// This is stored verbatim as `Outbox.payload` and shipped as the broker
/// message body, so its serde shape is the wire format.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingLead {
    pub lead_state_id: String,
    pub lead_id: String,
    pub sequence_id: String,
    pub current_step: i32,
    pub step_id: String,
    pub step_number: i32,
    pub min_interval_min: i32,
}

impl PendingLead {
    /// Decode a broker message body.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let pending: PendingLead =
            serde_json::from_slice(data).map_err(|e| Error::InvalidMessage {
                message: format!("payload is not a pending-lead row: {}", e),
            })?;
        pending.validate()?;
        Ok(pending)
    }

    /// Structural validation of the pending-lead schema.
    pub fn validate(&self) -> Result<()> {
        if self.lead_state_id.trim().is_empty() {
            return Err(Error::InvalidMessage {
                message: "lead_state_id is empty".to_string(),
            });
        }
        if self.lead_id.trim().is_empty() {
            return Err(Error::InvalidMessage {
                message: "lead_id is empty".to_string(),
            });
        }
        if self.sequence_id.trim().is_empty() {
            return Err(Error::InvalidMessage {
                message: "sequence_id is empty".to_string(),
            });
        }
        if self.step_id.trim().is_empty() {
            return Err(Error::InvalidMessage {
                message: "step_id is empty".to_string(),
            });
        }
        if self.current_step < 0 {
            return Err(Error::InvalidMessage {
                message: format!("current_step {} is negative", self.current_step),
            });
        }
        if self.step_number < 1 {
            return Err(Error::InvalidMessage {
                message: format!("step_number {} is below 1", self.step_number),
            });
        }
        if self.min_interval_min < 0 {
            return Err(Error::InvalidMessage {
                message: format!("min_interval_min {} is negative", self.min_interval_min),
            });
        }
        Ok(())
    }
}

impl fmt::Display for PendingLead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PendingLead {{ state: {}, lead: {}, sequence: {}, step: {} }}",
            self.lead_state_id, self.lead_id, self.sequence_id, self.step_number
        )
    }
}

/// A lead with its enrichment, as loaded for rendering and eligibility.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeadRecord {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub industry: Option<String>,
    pub country: Option<String>,
    pub state: Option<String>,
    pub address: Option<String>,
    pub linkedin_url: Option<String>,
    pub source: Option<String>,
    pub is_subscribed_to_email: bool,
    pub is_email_valid: String,
    pub company_size: Option<String>,
}

impl LeadRecord {
    /// Parsed validity verdict; unparseable values count as UNKNOWN.
    pub fn email_validity(&self) -> EmailValidity {
        self.is_email_valid.parse().unwrap_or(EmailValidity::Unknown)
    }
}

/// A sequence step, as loaded for a single send.
///
/// `time_windows`, `require_no_reply` and `stop_on_bounce` are policy hooks
/// consumed by reply/bounce ingestion, which lives outside this pipeline;
/// they are surfaced for logging only.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StepRecord {
    pub id: String,
    pub sequence_id: String,
    pub step_number: i32,
    pub min_interval_min: i32,
    pub time_windows: Option<serde_json::Value>,
    pub require_no_reply: bool,
    pub stop_on_bounce: bool,
}

/// A renderable template attached to a step.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TemplateRecord {
    pub id: String,
    pub subject: String,
    pub html_body: String,
}

/// The row returned by a successful state advancement.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StateRow {
    pub id: String,
    pub status: String,
    pub current_step: i32,
}

/// A durable send intent, claimed by the pump and shipped to the broker.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxRow {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub idem_key: String,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub retries: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for OutboxRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OutboxRow {{ id: {}, topic: {}, idemKey: {}, retries: {}/{} }}",
            self.id, self.topic, self.idem_key, self.retries, self.max_retries
        )
    }
}

/// Input data for a new outbox row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutboxRow {
    pub topic: String,
    pub payload: serde_json::Value,
    pub idem_key: String,
}

/// Aggregate outbox counts for operational logging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboxStats {
    pub pending: i64,
    pub processed: i64,
    pub exhausted: i64,
}

/// What the worker hands to the email provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailData {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub lead_id: String,
    pub sequence_id: String,
    pub step_id: String,
    pub template_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
}

/// Provider verdict for a single send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn ok(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}
