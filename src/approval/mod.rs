//! Human approval workflow.
//!
//! Every AI-originated configuration starts as `AI_RECOMMENDED` and must be
//! submitted for review, approved by an engineer and then deployed. The only
//! shortcut is the emergency override, which is reachable directly from
//! `AI_RECOMMENDED` while an emergency is active.
//!
//! ```text
//! AI_RECOMMENDED ──submit──▶ AWAITING_HUMAN_APPROVAL ──approve──▶ ENGINEER_APPROVED ──▶ DEPLOYED
//!       │                              │
//!       │                              └──reject──▶ REJECTED
//!       └──override──▶ EMERGENCY_OVERRIDE
//! ```
//!
//! Terminal records are immutable: any further transition fails.

use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result, WorkflowError};
use crate::safety::SafeConfig;
use crate::types::{Action, Intent, RecordId};

/// Approval state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    AiRecommended,
    AwaitingHumanApproval,
    EngineerApproved,
    Deployed,
    Rejected,
    EmergencyOverride,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deployed | Self::Rejected | Self::EmergencyOverride)
    }

    /// Whether a single step from `self` to `to` is allowed.
    pub fn can_transition_to(self, to: Self) -> bool {
        use ApprovalStatus::*;
        matches!(
            (self, to),
            (AiRecommended, AwaitingHumanApproval)
                | (AiRecommended, EmergencyOverride)
                | (AwaitingHumanApproval, EngineerApproved)
                | (AwaitingHumanApproval, Rejected)
                | (EngineerApproved, Deployed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AiRecommended => "AI_RECOMMENDED",
            Self::AwaitingHumanApproval => "AWAITING_HUMAN_APPROVAL",
            Self::EngineerApproved => "ENGINEER_APPROVED",
            Self::Deployed => "DEPLOYED",
            Self::Rejected => "REJECTED",
            Self::EmergencyOverride => "EMERGENCY_OVERRIDE",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a record's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: ApprovalStatus,
    pub to: ApprovalStatus,
    pub actor: String,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// A proposal moving through the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: RecordId,
    pub intent: Intent,
    pub action: Action,
    pub config: SafeConfig,
    /// Safety clamps applied to the proposal.
    pub warnings: Vec<String>,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub engineer_note: Option<String>,
    pub history: Vec<Transition>,
}

impl ApprovalRecord {
    fn step(&mut self, to: ApprovalStatus, actor: &str, note: Option<&str>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(WorkflowError::TerminalRecord {
                id: self.id,
                status: self.status,
            }
            .into());
        }
        if !self.status.can_transition_to(to) {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                to,
            }
            .into());
        }

        let now = Utc::now();
        self.history.push(Transition {
            from: self.status,
            to,
            actor: actor.to_string(),
            at: now,
            note: note.map(str::to_string),
        });
        info!("Record {} {} -> {} by {}", self.id, self.status, to, actor);
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Whether this record passed through every human review state.
    pub fn passed_review(&self) -> bool {
        let visited = |s: ApprovalStatus| self.history.iter().any(|t| t.to == s);
        visited(ApprovalStatus::AwaitingHumanApproval) && visited(ApprovalStatus::EngineerApproved)
    }
}

/// In-memory record store enforcing the state machine.
#[derive(Debug, Default)]
pub struct ApprovalWorkflow {
    records: DashMap<RecordId, ApprovalRecord>,
}

impl ApprovalWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record in `AI_RECOMMENDED`.
    pub fn create(
        &self,
        intent: Intent,
        action: Action,
        config: SafeConfig,
        warnings: Vec<String>,
    ) -> ApprovalRecord {
        let now = Utc::now();
        let record = ApprovalRecord {
            id: RecordId::new(),
            intent,
            action,
            config,
            warnings,
            status: ApprovalStatus::AiRecommended,
            created_at: now,
            updated_at: now,
            engineer_note: None,
            history: Vec::new(),
        };
        info!("Record {} created for intent {}", record.id, intent);
        self.records.insert(record.id, record.clone());
        record
    }

    pub fn get(&self, id: RecordId) -> Option<ApprovalRecord> {
        self.records.get(&id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Non-terminal records, oldest first.
    pub fn list_pending(&self) -> Vec<ApprovalRecord> {
        let mut pending: Vec<ApprovalRecord> = self
            .records
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.clone())
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    fn update<F>(&self, id: RecordId, f: F) -> Result<ApprovalRecord>
    where
        F: FnOnce(&mut ApprovalRecord) -> Result<()>,
    {
        let mut entry = self.records.get_mut(&id).ok_or(Error::RecordNotFound(id))?;
        // Work on a copy so a failed multi-step update leaves the record intact.
        let mut record = entry.clone();
        f(&mut record).map_err(|e| {
            warn!("Record {}: {}", id, e);
            e
        })?;
        *entry = record.clone();
        Ok(record)
    }

    /// Move a record into human review.
    pub fn submit(&self, id: RecordId, actor: &str) -> Result<ApprovalRecord> {
        self.update(id, |r| r.step(ApprovalStatus::AwaitingHumanApproval, actor, None))
    }

    /// Approve a record under review and deploy it.
    pub fn approve(&self, id: RecordId, actor: &str, note: Option<&str>) -> Result<ApprovalRecord> {
        self.update(id, |r| {
            r.step(ApprovalStatus::EngineerApproved, actor, note)?;
            r.step(ApprovalStatus::Deployed, actor, None)?;
            r.engineer_note = note.map(str::to_string);
            Ok(())
        })
    }

    /// Reject a record under review.
    pub fn reject(&self, id: RecordId, actor: &str, note: Option<&str>) -> Result<ApprovalRecord> {
        self.update(id, |r| {
            r.step(ApprovalStatus::Rejected, actor, note)?;
            r.engineer_note = note.map(str::to_string);
            Ok(())
        })
    }

    /// Bypass review. Only allowed while an emergency is active.
    pub fn emergency_override(
        &self,
        id: RecordId,
        actor: &str,
        emergency_active: bool,
        note: Option<&str>,
    ) -> Result<ApprovalRecord> {
        self.update(id, |r| {
            if r.status.is_terminal() {
                return Err(WorkflowError::TerminalRecord {
                    id: r.id,
                    status: r.status,
                }
                .into());
            }
            if !emergency_active {
                return Err(WorkflowError::OverrideNotPermitted.into());
            }
            r.step(ApprovalStatus::EmergencyOverride, actor, note)?;
            r.engineer_note = note.map(str::to_string);
            Ok(())
        })
    }
}
