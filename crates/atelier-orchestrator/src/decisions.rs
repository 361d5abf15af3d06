use atelier_agents::Escalation;
use atelier_core::{AgentRole, AtelierResult, Decision, DecisionLevel, DecisionOption};
use atelier_hub::Hub;
use atelier_store::Store;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// How long a Board escalation waits for the CIO before the default applies.
const ESCALATION_TIMEOUT_HOURS: i64 = 24;

/// Turn a Board `escalate_to_cio` into a pending Decision instead of
/// blocking the cycle. The default option lets work continue when nobody
/// answers in time.
pub fn escalation_decision(
    user_id: Uuid,
    project_id: Uuid,
    escalation: &Escalation,
    now: DateTime<Utc>,
) -> Decision {
    let options = vec![
        DecisionOption {
            id: "proceed".into(),
            label: "Proceed".into(),
            description: "Let the agents continue on the current plan".into(),
            impact: "Work continues autonomously next cycle".into(),
            is_default: true,
        },
        DecisionOption {
            id: "hold".into(),
            label: "Hold".into(),
            description: "Pause this line of work until reviewed".into(),
            impact: "No further tasks are generated for it".into(),
            is_default: false,
        },
    ];

    let mut decision = Decision::new(
        user_id,
        project_id,
        AgentRole::Board,
        escalation.title.clone(),
        options,
        now + Duration::hours(ESCALATION_TIMEOUT_HOURS),
    );
    decision.description = escalation.description.clone();
    decision.level = DecisionLevel::Normal;
    decision
}

/// Resolve every pending decision whose timeout has passed: status becomes
/// `timeout`, the default option is chosen, and subscribers are notified.
/// Returns how many were resolved.
pub async fn resolve_due_timeouts(
    store: &Arc<dyn Store>,
    hub: &Arc<Hub>,
    now: DateTime<Utc>,
) -> AtelierResult<usize> {
    let mut resolved = 0;
    for mut decision in store.pending_decisions().await? {
        if decision.resolve_by_timeout(now) {
            store.update_decision(decision.clone()).await?;
            hub.decision(&decision).await;
            info!(decision_id = %decision.id, chosen = ?decision.chosen_option, "decision timed out to default");
            resolved += 1;
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::DecisionStatus;
    use atelier_store::MemoryStore;

    #[test]
    fn escalation_builds_pending_decision_with_default() {
        let now = Utc::now();
        let escalation = Escalation {
            title: "Adopt new framework?".into(),
            description: "Gin is in maintenance mode".into(),
        };
        let decision = escalation_decision(Uuid::new_v4(), Uuid::new_v4(), &escalation, now);

        assert_eq!(decision.status, DecisionStatus::Pending);
        assert_eq!(decision.default_option, "proceed");
        assert_eq!(decision.options.len(), 2);
        assert_eq!(decision.options.iter().filter(|o| o.is_default).count(), 1);
        assert_eq!(decision.timeout_at, now + Duration::hours(24));
    }

    #[tokio::test]
    async fn due_timeouts_resolve_to_default() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let hub = Hub::new();
        let now = Utc::now();

        let escalation = Escalation {
            title: "Question".into(),
            description: String::new(),
        };
        let mut due = escalation_decision(Uuid::new_v4(), Uuid::new_v4(), &escalation, now);
        due.timeout_at = now - Duration::seconds(1);
        let not_due = escalation_decision(Uuid::new_v4(), Uuid::new_v4(), &escalation, now);

        store.create_decision(due.clone()).await.unwrap();
        store.create_decision(not_due.clone()).await.unwrap();

        let resolved = resolve_due_timeouts(&store, &hub, now).await.unwrap();
        assert_eq!(resolved, 1);

        let remaining = store.pending_decisions().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, not_due.id);
    }
}
