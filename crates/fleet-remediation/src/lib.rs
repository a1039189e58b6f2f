//! Remediation action state machine: approval, execution, and audit logging.
//!
//! Generalizes the predecessor's `PipelineState`/`ComponentInfo` free-form
//! status tracking into a strict fixed-transition-table machine, since the
//! actions here must reject invalid transitions outright rather than just
//! record the latest status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use fleet_common::{Action, ActionStatus, ActionType, ContainerId, EndpointId, Error, Result};
use fleet_events::{DomainEvent, EventBus, WebsocketHub};
use fleet_inventory::InventoryClient;

/// One row in the audit trail, written on every state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub action: String,
    pub target_type: &'static str,
    pub target_id: Uuid,
    pub request_id: Uuid,
    pub ip_address: Option<String>,
    pub details: serde_json::Value,
    pub created_at: chrono::DateTime<Utc>,
}

/// Request metadata carried through every state-changing call, used to
/// populate the audit log.
#[derive(Debug, Clone, Default)]
pub struct ActorContext {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub request_id: Uuid,
    pub ip_address: Option<String>,
}

fn validate_transition(from: ActionStatus, to: ActionStatus) -> Result<()> {
    use ActionStatus::*;
    let allowed = matches!(
        (from, to),
        (Pending, Approved) | (Pending, Rejected) | (Approved, Executing) | (Executing, Completed) | (Executing, Failed)
    );
    if allowed {
        Ok(())
    } else {
        Err(Error::Conflict {
            message: format!("cannot transition action from {from} to {to}"),
            current_status: from.to_string(),
        })
    }
}

/// Holds the in-memory action rows and drives their lifecycle, auditing
/// every change and broadcasting the updated row.
pub struct RemediationEngine {
    actions: RwLock<HashMap<Uuid, Action>>,
    audit_log: RwLock<Vec<AuditLogEntry>>,
    events: EventBus,
    hub: Arc<WebsocketHub>,
    inventory: Arc<InventoryClient>,
}

impl RemediationEngine {
    pub fn new(events: EventBus, hub: Arc<WebsocketHub>, inventory: Arc<InventoryClient>) -> Arc<Self> {
        Arc::new(Self {
            actions: RwLock::new(HashMap::new()),
            audit_log: RwLock::new(Vec::new()),
            events,
            hub,
            inventory,
        })
    }

    /// Creates a pending action, typically from `suggestAction` during a
    /// monitoring cycle or from an operator-initiated request.
    pub fn create(
        &self,
        insight_id: Option<Uuid>,
        endpoint_id: EndpointId,
        container_id: ContainerId,
        container_name: String,
        action_type: ActionType,
        rationale: String,
        ctx: &ActorContext,
    ) -> Action {
        let action = Action {
            id: Uuid::new_v4(),
            insight_id,
            endpoint_id,
            container_id,
            container_name,
            action_type,
            rationale,
            status: ActionStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            executed_at: None,
            completed_at: None,
            execution_result: None,
            execution_duration_ms: None,
        };

        self.actions.write().insert(action.id, action.clone());
        self.audit(&action, "created", ctx, serde_json::json!({}));
        self.events.emit(DomainEvent::RemediationRequested { action_id: action.id });
        self.hub.broadcast_action(&action);
        action
    }

    pub fn get(&self, action_id: Uuid) -> Result<Action> {
        self.actions
            .read()
            .get(&action_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("action {action_id}")))
    }

    pub fn approve(&self, action_id: Uuid, approved_by: String, ctx: &ActorContext) -> Result<Action> {
        let action = self.transition(action_id, ActionStatus::Approved, |action| {
            action.approved_by = Some(approved_by);
            action.approved_at = Some(Utc::now());
        })?;
        self.audit(&action, "approved", ctx, serde_json::json!({}));
        self.events.emit(DomainEvent::RemediationApproved { action_id });
        self.hub.broadcast_action(&action);
        Ok(action)
    }

    pub fn reject(&self, action_id: Uuid, rejected_by: String, reason: String, ctx: &ActorContext) -> Result<Action> {
        let action = self.transition(action_id, ActionStatus::Rejected, |action| {
            action.rejected_by = Some(rejected_by);
            action.rejected_at = Some(Utc::now());
            action.rejection_reason = Some(reason);
        })?;
        self.audit(&action, "rejected", ctx, serde_json::json!({}));
        self.events.emit(DomainEvent::RemediationRejected { action_id });
        self.hub.broadcast_action(&action);
        Ok(action)
    }

    /// Transitions an approved action to `executing`, calls the mapped
    /// inventory operation, and lands it in `completed` or `failed`.
    /// Execution is not retried automatically; a downstream failure
    /// surfaces as a `502` to the HTTP caller via `Error::DependencyUnavailable`.
    pub async fn execute(&self, action_id: Uuid, ctx: &ActorContext) -> Result<Action> {
        let action = self.transition(action_id, ActionStatus::Executing, |action| {
            action.executed_at = Some(Utc::now());
        })?;
        self.audit(&action, "executing", ctx, serde_json::json!({}));
        self.hub.broadcast_action(&action);

        let started = Instant::now();
        let outcome = self.run_inventory_operation(&action).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let (final_status, success) = match &outcome {
            Ok(()) => (ActionStatus::Completed, true),
            Err(_) => (ActionStatus::Failed, false),
        };

        let action = self.transition(action_id, final_status, |action| {
            action.completed_at = Some(Utc::now());
            action.execution_duration_ms = Some(duration_ms);
            action.execution_result = Some(match &outcome {
                Ok(()) => format!("Executed {} successfully", action.action_type),
                Err(e) => e.to_string(),
            });
        })?;

        self.audit(
            &action,
            if success { "completed" } else { "failed" },
            ctx,
            serde_json::json!({ "duration_ms": duration_ms }),
        );
        self.events.emit(DomainEvent::RemediationCompleted { action_id, success });
        self.hub.broadcast_action(&action);

        if let Err(e) = outcome {
            warn!(action_id = %action_id, error = %e, "remediation execution failed");
            return Err(Error::DependencyUnavailable(format!("remediation execution failed: {e}")));
        }

        Ok(action)
    }

    async fn run_inventory_operation(&self, action: &Action) -> Result<()> {
        match action.action_type {
            ActionType::RestartContainer => {
                self.inventory.restart_container(action.endpoint_id, &action.container_id).await
            }
            ActionType::StopContainer => self.inventory.stop_container(action.endpoint_id, &action.container_id).await,
            ActionType::StartContainer => {
                self.inventory.start_container(action.endpoint_id, &action.container_id).await
            }
        }
    }

    fn transition(&self, action_id: Uuid, to: ActionStatus, mutate: impl FnOnce(&mut Action)) -> Result<Action> {
        let mut actions = self.actions.write();
        let action = actions
            .get_mut(&action_id)
            .ok_or_else(|| Error::NotFound(format!("action {action_id}")))?;

        validate_transition(action.status, to)?;
        action.status = to;
        mutate(action);
        info!(action_id = %action_id, status = %to, "remediation action transitioned");
        Ok(action.clone())
    }

    fn audit(&self, action: &Action, verb: &str, ctx: &ActorContext, details: serde_json::Value) {
        self.audit_log.write().push(AuditLogEntry {
            user_id: ctx.user_id.clone(),
            username: ctx.username.clone(),
            action: verb.to_string(),
            target_type: "action",
            target_id: action.id,
            request_id: ctx.request_id,
            ip_address: ctx.ip_address.clone(),
            details,
            created_at: Utc::now(),
        });
    }

    pub fn audit_log(&self) -> Vec<AuditLogEntry> {
        self.audit_log.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_approved_is_allowed() {
        assert!(validate_transition(ActionStatus::Pending, ActionStatus::Approved).is_ok());
    }

    #[test]
    fn pending_to_executing_is_rejected() {
        let err = validate_transition(ActionStatus::Pending, ActionStatus::Executing).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn completed_is_terminal() {
        assert!(validate_transition(ActionStatus::Completed, ActionStatus::Executing).is_err());
        assert!(validate_transition(ActionStatus::Completed, ActionStatus::Failed).is_err());
    }

    #[test]
    fn executing_can_land_in_completed_or_failed_but_not_back_to_approved() {
        assert!(validate_transition(ActionStatus::Executing, ActionStatus::Completed).is_ok());
        assert!(validate_transition(ActionStatus::Executing, ActionStatus::Failed).is_ok());
        assert!(validate_transition(ActionStatus::Executing, ActionStatus::Approved).is_err());
    }
}
