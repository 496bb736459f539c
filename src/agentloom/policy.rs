//! Policy Engine (C5): per-turn tool filtering and cap evaluation.
//!
//! A batched, ordered filtering pipeline (§4.5): restrict-to-tool, then
//! allowed/denied tags, then cap exhaustion, then deadline expiry, with
//! denies always winning ties.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::caps::Caps;
use crate::error::RuntimeError;
use crate::ids::{AgentId, RunId, ToolCallId, TurnId};
use crate::registration::RunPolicy;

/// One candidate tool call the planner proposed for this turn.
#[derive(Debug, Clone)]
pub struct ToolCallCandidate {
    pub call_id: ToolCallId,
    pub tool_name: String,
    pub tags: Vec<String>,
    pub payload: serde_json::Value,
}

/// Caller-supplied overrides for a single run, layered on top of the agent's
/// registered [`RunPolicy`] (§6.1 `WithRestrictToTool`/`WithAllowedTags`/`WithDeniedTags`).
#[derive(Debug, Clone, Default)]
pub struct PolicyOverrides {
    pub restrict_to_tool: Option<String>,
    pub allowed_tags: Option<HashSet<String>>,
    pub denied_tags: HashSet<String>,
}

/// Input to one [`PolicyEngine::decide`] call.
pub struct PolicyInput<'a> {
    pub agent_id: &'a AgentId,
    pub run_id: &'a RunId,
    pub turn_id: &'a TurnId,
    pub available_tools: &'a [String],
    pub caps: &'a Caps,
    pub policy: &'a RunPolicy,
    pub overrides: Option<&'a PolicyOverrides>,
    pub candidates: &'a [ToolCallCandidate],
}

/// Why a candidate was denied.
#[derive(Debug, Clone)]
pub struct Denial {
    pub tool_name: String,
    pub call_id: ToolCallId,
    pub reason: String,
}

/// Result of evaluating a batch of candidates for one turn (§4.5).
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub allowed: Vec<ToolCallCandidate>,
    pub denied: Vec<Denial>,
    pub caps_exhausted: bool,
    pub reason: Option<String>,
}

/// Per-turn tool filtering and cap evaluation (§4.5).
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn decide(&self, input: PolicyInput<'_>) -> Result<Decision, RuntimeError>;
}

/// The reference pipeline implementation: restrict-to-tool, then tag
/// allow/deny lists, then cap exhaustion, then deadline expiry. Deny wins on
/// any tie.
pub struct DefaultPolicyEngine;

#[async_trait]
impl PolicyEngine for DefaultPolicyEngine {
    async fn decide(&self, input: PolicyInput<'_>) -> Result<Decision, RuntimeError> {
        let mut decision = Decision::default();

        let deadline_reached = input
            .caps
            .deadline
            .map(|d| chrono::Utc::now() >= d)
            .unwrap_or(false);

        let caps_would_exhaust = input.policy.max_tool_calls != 0
            && input.caps.tool_calls_used >= input.policy.max_tool_calls;

        for candidate in input.candidates {
            // Stage 1: restrict-to-tool.
            if let Some(restrict) = input.overrides.and_then(|o| o.restrict_to_tool.as_deref()) {
                if candidate.tool_name != restrict {
                    decision.denied.push(Denial {
                        tool_name: candidate.tool_name.clone(),
                        call_id: candidate.call_id.clone(),
                        reason: format!("restricted to tool {}", restrict),
                    });
                    continue;
                }
            }

            // Stage 2: allowed/denied tags. Deny wins over allow.
            if let Some(overrides) = input.overrides {
                if overrides.denied_tags.iter().any(|t| candidate.tags.contains(t)) {
                    decision.denied.push(Denial {
                        tool_name: candidate.tool_name.clone(),
                        call_id: candidate.call_id.clone(),
                        reason: "denied by tag".to_string(),
                    });
                    continue;
                }
                if let Some(allowed) = &overrides.allowed_tags {
                    if !candidate.tags.iter().any(|t| allowed.contains(t)) {
                        decision.denied.push(Denial {
                            tool_name: candidate.tool_name.clone(),
                            call_id: candidate.call_id.clone(),
                            reason: "not in allowed tags".to_string(),
                        });
                        continue;
                    }
                }
            }

            // Stage 3: cap exhaustion.
            if caps_would_exhaust {
                decision.caps_exhausted = true;
                decision.reason.get_or_insert_with(|| "max_tool_calls reached".to_string());
                decision.denied.push(Denial {
                    tool_name: candidate.tool_name.clone(),
                    call_id: candidate.call_id.clone(),
                    reason: "max_tool_calls reached".to_string(),
                });
                continue;
            }
            if input.policy.max_consecutive_failed_tool_calls != 0
                && input.caps.consecutive_failures >= input.policy.max_consecutive_failed_tool_calls
            {
                decision.caps_exhausted = true;
                decision
                    .reason
                    .get_or_insert_with(|| "max_consecutive_failed_tool_calls reached".to_string());
                decision.denied.push(Denial {
                    tool_name: candidate.tool_name.clone(),
                    call_id: candidate.call_id.clone(),
                    reason: "max_consecutive_failed_tool_calls reached".to_string(),
                });
                continue;
            }

            // Stage 4: deadline expiry.
            if deadline_reached {
                decision.denied.push(Denial {
                    tool_name: candidate.tool_name.clone(),
                    call_id: candidate.call_id.clone(),
                    reason: "run deadline reached".to_string(),
                });
                continue;
            }

            decision.allowed.push(candidate.clone());
        }

        Ok(decision)
    }
}

/// A [`PolicyEngine`] that allows every candidate unconditionally.
pub struct NoopPolicy;

#[async_trait]
impl PolicyEngine for NoopPolicy {
    async fn decide(&self, input: PolicyInput<'_>) -> Result<Decision, RuntimeError> {
        Ok(Decision {
            allowed: input.candidates.to_vec(),
            denied: Vec::new(),
            caps_exhausted: false,
            reason: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TurnId;

    fn candidate(name: &str, tags: &[&str]) -> ToolCallCandidate {
        ToolCallCandidate {
            call_id: ToolCallId::generate(),
            tool_name: name.to_string(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn denied_tag_wins_over_allowed_tag() {
        let engine = DefaultPolicyEngine;
        let caps = Caps::default();
        let policy = RunPolicy::default();
        let mut allowed = HashSet::new();
        allowed.insert("danger".to_string());
        let overrides = PolicyOverrides {
            restrict_to_tool: None,
            allowed_tags: Some(allowed),
            denied_tags: ["danger".to_string()].into_iter().collect(),
        };
        let candidates = vec![candidate("lookup", &["danger"])];
        let decision = engine
            .decide(PolicyInput {
                agent_id: &AgentId::from("a"),
                run_id: &RunId::new("r"),
                turn_id: &TurnId::new("t"),
                available_tools: &[],
                caps: &caps,
                policy: &policy,
                overrides: Some(&overrides),
                candidates: &candidates,
            })
            .await
            .unwrap();
        assert!(decision.allowed.is_empty());
        assert_eq!(decision.denied.len(), 1);
    }

    #[tokio::test]
    async fn cap_exhaustion_denies_remaining_candidates() {
        let engine = DefaultPolicyEngine;
        let mut caps = Caps::default();
        caps.tool_calls_used = 2;
        let policy = RunPolicy {
            max_tool_calls: 2,
            ..RunPolicy::default()
        };
        let candidates = vec![candidate("lookup", &[])];
        let decision = engine
            .decide(PolicyInput {
                agent_id: &AgentId::from("a"),
                run_id: &RunId::new("r"),
                turn_id: &TurnId::new("t"),
                available_tools: &[],
                caps: &caps,
                policy: &policy,
                overrides: None,
                candidates: &candidates,
            })
            .await
            .unwrap();
        assert!(decision.caps_exhausted);
        assert!(decision.allowed.is_empty());
    }
}
