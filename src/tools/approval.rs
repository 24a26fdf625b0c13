//! One-shot rendezvous between a side-effecting tool call and a human decision.
//!
//! Each pending call owns a oneshot receiver keyed by its call id. A decision
//! removes the entry and resolves the waiter, so nothing stays registered
//! after it has been answered, cancelled, timed out or dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::types::ApprovalConfig;
use crate::error::{LiveboxError, Result};
use crate::events::{Channel, Event, EventBus};
use crate::tools::ToolOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

/// A UI-originated decision for one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallApproval {
    pub tool_call_id: String,
    pub decision: Decision,
}

impl ToolCallApproval {
    pub fn approved(id: impl Into<String>) -> Self {
        Self {
            tool_call_id: id.into(),
            decision: Decision::Approved,
        }
    }

    pub fn rejected(id: impl Into<String>) -> Self {
        Self {
            tool_call_id: id.into(),
            decision: Decision::Rejected,
        }
    }
}

#[derive(Debug)]
enum Resolution {
    Decided(Decision),
    Cancelled,
}

struct Waiter {
    token: u64,
    tx: oneshot::Sender<Resolution>,
}

type Waiters = Arc<Mutex<HashMap<String, Waiter>>>;

fn lock(waiters: &Waiters) -> MutexGuard<'_, HashMap<String, Waiter>> {
    waiters.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct ToolApprovalGate {
    waiters: Waiters,
    next_token: Arc<AtomicU64>,
    timeout: Option<Duration>,
}

impl ToolApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &ApprovalConfig) -> Self {
        Self::new().with_timeout(config.timeout_seconds.map(Duration::from_secs))
    }

    /// Register a pending call. Fails if `id` is already waiting.
    pub fn register(&self, id: &str) -> Result<PendingApproval> {
        let mut waiters = lock(&self.waiters);
        if waiters.contains_key(id) {
            return Err(LiveboxError::DuplicateToolCall { id: id.to_string() });
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        waiters.insert(id.to_string(), Waiter { token, tx });
        debug!(tool_call_id = %id, "Tool call awaiting approval");

        Ok(PendingApproval {
            id: id.to_string(),
            token,
            rx,
            waiters: Arc::clone(&self.waiters),
            timeout: self.timeout,
        })
    }

    /// Deliver a decision. Returns false when no call with that id is
    /// waiting, in which case nothing happens.
    pub fn decide(&self, approval: &ToolCallApproval) -> bool {
        let resolved = self.resolve(
            &approval.tool_call_id,
            Resolution::Decided(approval.decision),
        );
        if resolved {
            info!(
                tool_call_id = %approval.tool_call_id,
                decision = ?approval.decision,
                "Tool call decided"
            );
        } else {
            debug!(tool_call_id = %approval.tool_call_id, "Decision for unknown tool call ignored");
        }
        resolved
    }

    pub fn approve(&self, id: &str) -> bool {
        self.decide(&ToolCallApproval::approved(id))
    }

    pub fn reject(&self, id: &str) -> bool {
        self.decide(&ToolCallApproval::rejected(id))
    }

    /// Resolve a waiting call as cancelled.
    pub fn cancel(&self, id: &str) -> bool {
        self.resolve(id, Resolution::Cancelled)
    }

    fn resolve(&self, id: &str, resolution: Resolution) -> bool {
        let waiter = lock(&self.waiters).remove(id);
        match waiter {
            Some(waiter) => waiter.tx.send(resolution).is_ok(),
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.waiters).len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        lock(&self.waiters).contains_key(id)
    }

    /// Apply a bus event. Only `ToolCallApproval` events are acted on.
    pub fn handle_event(&self, event: &Event) -> bool {
        match event {
            Event::ToolCallApproval(approval) => self.decide(approval),
            _ => false,
        }
    }

    /// Feed decisions from the bus until every bus handle is gone.
    pub fn listen(&self, bus: &EventBus) -> JoinHandle<()> {
        let gate = self.clone();
        let mut subscription = bus.subscribe(&[Channel::ToolCallApproval]);
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                gate.handle_event(&event);
            }
        })
    }

    /// Wait for a decision on `id`, then run `effect` only if approved.
    pub async fn run<T, F, Fut>(&self, id: &str, effect: F) -> Result<ToolOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let pending = self.register(id)?;
        match pending.wait().await? {
            Decision::Approved => Ok(ToolOutcome::Completed(effect().await?)),
            Decision::Rejected => Ok(ToolOutcome::Rejected),
        }
    }
}

/// A registered call waiting for its decision. Dropping it deregisters the call.
pub struct PendingApproval {
    id: String,
    token: u64,
    rx: oneshot::Receiver<Resolution>,
    waiters: Waiters,
    timeout: Option<Duration>,
}

impl PendingApproval {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn wait(mut self) -> Result<Decision> {
        let resolution = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(resolution) => resolution,
                Err(_) => {
                    warn!(tool_call_id = %self.id, "Tool approval timed out");
                    return Err(LiveboxError::ApprovalTimeout {
                        seconds: limit.as_secs(),
                    });
                }
            },
            None => (&mut self.rx).await,
        };

        match resolution {
            Ok(Resolution::Decided(decision)) => Ok(decision),
            Ok(Resolution::Cancelled) | Err(_) => Err(LiveboxError::ApprovalCancelled {
                id: self.id.clone(),
            }),
        }
    }
}

impl Drop for PendingApproval {
    fn drop(&mut self) {
        let mut waiters = lock(&self.waiters);
        // A later registration may reuse the id; only remove our own entry.
        if waiters.get(&self.id).map(|w| w.token) == Some(self.token) {
            waiters.remove(&self.id);
            debug!(tool_call_id = %self.id, "Pending tool call deregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn approve_resolves_exactly_the_matching_call() {
        let gate = ToolApprovalGate::new();
        let first = gate.register("call-1").unwrap();
        let second = gate.register("call-2").unwrap();

        assert!(gate.approve("call-1"));

        assert_eq!(first.wait().await.unwrap(), Decision::Approved);
        assert!(gate.is_pending("call-2"));
        drop(second);
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn unknown_id_has_no_effect() {
        let gate = ToolApprovalGate::new();
        let _pending = gate.register("call-1").unwrap();

        assert!(!gate.reject("call-9"));
        assert!(gate.is_pending("call-1"));
    }

    #[tokio::test]
    async fn rejected_call_skips_the_side_effect() {
        let gate = ToolApprovalGate::new();
        let runner = gate.clone();
        let handle = tokio::spawn(async move {
            runner
                .run("call-1", || async { Ok::<_, LiveboxError>("written") })
                .await
        });

        while !gate.is_pending("call-1") {
            tokio::task::yield_now().await;
        }
        gate.reject("call-1");

        assert_eq!(handle.await.unwrap().unwrap(), ToolOutcome::Rejected);
    }

    #[tokio::test]
    async fn decisions_arrive_over_the_bus() {
        let bus = EventBus::new();
        let gate = ToolApprovalGate::new();
        let listener = gate.listen(&bus);
        let pending = gate.register("call-7").unwrap();

        bus.publish(Event::ToolCallApproval(ToolCallApproval::approved("call-7")));

        assert_eq!(pending.wait().await.unwrap(), Decision::Approved);
        assert_eq!(gate.pending_count(), 0);
        listener.abort();
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let gate = ToolApprovalGate::new();
        let _pending = gate.register("call-1").unwrap();
        assert!(matches!(
            gate.register("call-1"),
            Err(LiveboxError::DuplicateToolCall { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_resolves_the_wait() {
        let gate = ToolApprovalGate::new();
        let pending = gate.register("call-1").unwrap();
        assert!(gate.cancel("call-1"));
        assert!(matches!(
            pending.wait().await,
            Err(LiveboxError::ApprovalCancelled { .. })
        ));
    }

    #[tokio::test]
    async fn timeout_deregisters_the_call() {
        let gate = ToolApprovalGate::new().with_timeout(Some(Duration::from_millis(20)));
        let pending = gate.register("call-1").unwrap();

        assert!(matches!(
            pending.wait().await,
            Err(LiveboxError::ApprovalTimeout { .. })
        ));
        assert!(!gate.is_pending("call-1"));
        assert!(!gate.approve("call-1"));
    }

    #[test]
    fn approval_payload_uses_camel_case_ids() {
        let json = serde_json::to_string(&ToolCallApproval::rejected("abc")).unwrap();
        assert_eq!(json, r#"{"toolCallId":"abc","decision":"rejected"}"#);
    }
}
