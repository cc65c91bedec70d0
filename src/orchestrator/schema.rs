//! Core data model (spec.md §3): value records, immutable once emitted into
//! a [`Collation`]. Every type derives `Serialize`/`Deserialize` so a
//! `Collation` — and the final audit trail built from it — round-trips
//! through `serde_json` without a separate DTO layer, matching the teacher's
//! `tool_protocol.rs` convention of deriving `Serialize`/`Deserialize` on its
//! wire-facing structs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Which phase a [`DisruptionPayload`] / [`AgentResponse`] belongs to.
/// Arbitration is a third step, not a phase (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Initial,
    Revision,
}

/// Severity of a [`BindingConstraint`]. `Blocking` additionally terminates
/// the orchestration early. Ordered so `Blocking > High > Medium > Low`,
/// letting [`crate::orchestrator::constraint_registry::ConstraintRegistry::query`]
/// compare against a threshold directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Blocking,
}

impl Severity {
    /// Parse a raw agent-emitted constraint for a leading `"BLOCKING:"` token
    /// (case-insensitive, after trimming). Resolves the §9 open question by
    /// keeping source parity for the substring convention while still
    /// exposing a first-class [`Severity`] field everywhere else.
    pub fn sniff_from_text(text: &str) -> Severity {
        if text.trim_start().to_uppercase().starts_with("BLOCKING:") {
            Severity::Blocking
        } else {
            Severity::Medium
        }
    }
}

/// The payload built by the Orchestrator for each agent invocation (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisruptionPayload {
    pub user_prompt: String,
    pub phase: Phase,
    /// Required when `phase == Revision`, forbidden when `phase == Initial`.
    pub peer_recommendations: Option<HashMap<String, AgentResponse>>,
    /// The calendar date "today" resolves to for this run (§3). Agent
    /// Runtime anchors relative-date resolution ("today"/"yesterday"/weekday
    /// names) to this value rather than leaving the model to guess one.
    pub reference_date: NaiveDate,
}

impl DisruptionPayload {
    pub fn initial(user_prompt: impl Into<String>, reference_date: NaiveDate) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            phase: Phase::Initial,
            peer_recommendations: None,
            reference_date,
        }
    }

    pub fn revision(
        user_prompt: impl Into<String>,
        peer_recommendations: HashMap<String, AgentResponse>,
        reference_date: NaiveDate,
    ) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            phase: Phase::Revision,
            peer_recommendations: Some(peer_recommendations),
            reference_date,
        }
    }

    /// Invariant check from §3: `peer_recommendations` is required for
    /// `revision` and forbidden for `initial`.
    pub fn is_well_formed(&self) -> bool {
        match self.phase {
            Phase::Initial => self.peer_recommendations.is_none(),
            Phase::Revision => self.peer_recommendations.is_some(),
        }
    }
}

/// Canonical flight identifier extracted from free-form prompt text (§3).
/// Relative dates (today/yesterday/tomorrow/weekday names) MUST already be
/// resolved to a concrete date by the time this record is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightInfo {
    /// Matches `EY\d{3,4}` after trimming and uppercasing.
    pub flight_number: String,
    /// ISO-8601 calendar date, e.g. `2026-02-03`.
    pub date: String,
    /// Non-empty, trimmed description of the disruption.
    pub disruption_event: String,
}

impl FlightInfo {
    /// Normalize a raw, LLM-extracted flight number into the canonical form:
    /// trimmed, uppercased. Returns `None` if the result doesn't match
    /// `EY\d{3,4}`.
    pub fn normalize_flight_number(raw: &str) -> Option<String> {
        let candidate = raw.trim().to_uppercase();
        if is_valid_flight_number(&candidate) {
            Some(candidate)
        } else {
            None
        }
    }

    /// Validate that every field is present, non-empty, and well-formed.
    /// Idempotent: normalizing an already-normalized `FlightInfo` yields an
    /// equal record (§8 property 3).
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_flight_number(&self.flight_number) {
            return Err(format!(
                "flight_number '{}' does not match EY\\d{{3,4}}",
                self.flight_number
            ));
        }
        if chrono::NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").is_err() {
            return Err(format!("date '{}' is not ISO-8601", self.date));
        }
        if self.disruption_event.trim().is_empty() {
            return Err("disruption_event must not be empty".to_string());
        }
        Ok(())
    }

    /// Re-run normalization on an already-constructed record and return the
    /// (possibly identical) normalized copy. Used to verify idempotency.
    pub fn normalized(&self) -> FlightInfo {
        FlightInfo {
            flight_number: Self::normalize_flight_number(&self.flight_number)
                .unwrap_or_else(|| self.flight_number.trim().to_uppercase()),
            date: self.date.trim().to_string(),
            disruption_event: self.disruption_event.trim().to_string(),
        }
    }
}

fn is_valid_flight_number(candidate: &str) -> bool {
    let Some(digits) = candidate.strip_prefix("EY") else {
        return false;
    };
    (3..=4).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// Terminal outcome of one agent invocation in one phase (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Success,
    Timeout,
    Error,
}

/// The structured output of one agent, for one phase (§3). Immutable once
/// emitted into a [`Collation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_name: String,
    /// Prose recommendation. Meaningful iff `status == Success`.
    pub recommendation: String,
    /// Must lie in `[0, 1]`.
    pub confidence: f64,
    /// Non-empty only if `agent_name` is in the safety subset.
    pub binding_constraints: Vec<String>,
    pub reasoning: String,
    /// Identifiers of the Data Fetcher queries consulted while producing
    /// this response.
    pub data_sources: Vec<String>,
    pub extracted_flight_info: Option<FlightInfo>,
    pub status: AgentStatus,
    pub duration: Duration,
    /// Meaningful iff `status != Success`.
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentResponse {
    /// Check the confidence/safety-subset invariants from §3 and §8 property 2.
    pub fn invariants_hold(&self, safety_subset: &[&str]) -> bool {
        let confidence_ok = (0.0..=1.0).contains(&self.confidence);
        let constraints_ok =
            self.binding_constraints.is_empty() || safety_subset.contains(&self.agent_name.as_str());
        confidence_ok && constraints_ok
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }
}

/// The immutable record of all `AgentResponse`s for one phase (§3). The only
/// object passed forward between phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collation {
    pub phase: Phase,
    pub responses: HashMap<String, AgentResponse>,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
}

impl Collation {
    pub fn successful(&self) -> Vec<&AgentResponse> {
        self.responses.values().filter(|r| r.is_success()).collect()
    }

    pub fn failed(&self) -> Vec<&AgentResponse> {
        self.responses
            .values()
            .filter(|r| r.status == AgentStatus::Error)
            .collect()
    }

    pub fn timed_out(&self) -> Vec<&AgentResponse> {
        self.responses
            .values()
            .filter(|r| r.status == AgentStatus::Timeout)
            .collect()
    }

    /// Counts per status, for quick reporting in the audit trail.
    pub fn status_counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for response in self.responses.values() {
            let key = match response.status {
                AgentStatus::Success => "success",
                AgentStatus::Timeout => "timeout",
                AgentStatus::Error => "error",
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    /// Iterate responses in a declared canonical ordering (agent-id sorted),
    /// since the underlying map is order-independent (§4.4).
    pub fn canonical_order(&self) -> Vec<&AgentResponse> {
        let mut ids: Vec<&String> = self.responses.keys().collect();
        ids.sort();
        ids.into_iter().filter_map(|id| self.responses.get(id)).collect()
    }
}

/// A binding constraint derived from a safety agent's response (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConstraint {
    pub source_agent: String,
    pub text: String,
    pub severity: Severity,
}

/// An arbitrator-internal candidate action drawn from agent recommendations (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    pub description: String,
    /// The resource(s) this action affects, used to detect conflicts between
    /// two actions proposed in the same scenario (§4.6 step 3).
    pub affects: Vec<String>,
    pub source_agent: String,
    /// Declared execution risk in `[0, 1]`, used as a tie-break in ranking.
    pub execution_risk: f64,
}

/// A coherent, scored, ranked candidate recovery scenario (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredScenario {
    pub actions: Vec<ProposedAction>,
    pub constraint_violations: Vec<String>,
    pub predicted_metrics: HashMap<String, f64>,
    pub composite_score: f64,
    pub rank: usize,
    pub rationale: String,
    /// Set when this scenario is the synthesized conservative baseline
    /// emitted after every candidate was rejected (§4.6 step 7).
    pub is_fallback: bool,
}

/// Top-level orchestration outcome status (§6/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Complete,
    EarlyTerminationBlocked,
    IncompleteTimeout,
    Failed,
}

/// The final, returned audit trail (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditTrail {
    pub timestamp: DateTime<Utc>,
    pub total_duration: Duration,
    pub phase_one: Option<Collation>,
    pub phase_two: Option<Collation>,
    pub constraints_consulted: Vec<BindingConstraint>,
    pub ranked_scenarios: Vec<ScoredScenario>,
    pub selected_scenario: Option<ScoredScenario>,
    pub status: RunStatus,
    /// Populated only for `EarlyTerminationBlocked` / `Failed`.
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flight_number_normalization_is_idempotent() {
        let raw = FlightInfo {
            flight_number: " ey123 ".to_string(),
            date: "2026-02-03".to_string(),
            disruption_event: " mechanical failure ".to_string(),
        };
        let once = raw.normalized();
        let twice = once.normalized();
        assert_eq!(once, twice);
        assert_eq!(once.flight_number, "EY123");
    }

    #[test]
    fn flight_number_rejects_bad_shape() {
        assert!(FlightInfo::normalize_flight_number("ZZ999").is_none());
        assert!(FlightInfo::normalize_flight_number("EY12").is_some());
        assert!(FlightInfo::normalize_flight_number("EY123456").is_none());
    }

    #[test]
    fn severity_orders_blocking_highest() {
        assert!(Severity::Blocking > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn severity_sniffs_blocking_prefix() {
        assert_eq!(
            Severity::sniff_from_text("BLOCKING: aircraft not airworthy"),
            Severity::Blocking
        );
        assert_eq!(Severity::sniff_from_text("reduce turnaround buffer"), Severity::Medium);
    }

    #[test]
    fn disruption_payload_well_formed_invariant() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 3).unwrap();
        assert!(DisruptionPayload::initial("prompt", today).is_well_formed());
        assert!(DisruptionPayload::revision("prompt", HashMap::new(), today).is_well_formed());
    }

    #[test]
    fn collation_round_trips_through_json() {
        let mut responses = HashMap::new();
        responses.insert(
            "maintenance".to_string(),
            AgentResponse {
                agent_name: "maintenance".to_string(),
                recommendation: "ground the aircraft".to_string(),
                confidence: 0.9,
                binding_constraints: vec!["BLOCKING: aircraft not airworthy".to_string()],
                reasoning: "inspection pending".to_string(),
                data_sources: vec!["aircraft_status".to_string()],
                extracted_flight_info: Some(FlightInfo {
                    flight_number: "EY123".to_string(),
                    date: "2026-02-03".to_string(),
                    disruption_event: "mechanical failure".to_string(),
                }),
                status: AgentStatus::Success,
                duration: Duration::from_millis(450),
                error: None,
                timestamp: Utc::now(),
            },
        );
        let collation = Collation {
            phase: Phase::Initial,
            responses,
            timestamp: Utc::now(),
            duration: Duration::from_secs(1),
        };
        let encoded = serde_json::to_string(&collation).unwrap();
        let decoded: Collation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.responses.len(), collation.responses.len());
        assert_eq!(
            decoded.responses["maintenance"].agent_name,
            collation.responses["maintenance"].agent_name
        );
    }
}
