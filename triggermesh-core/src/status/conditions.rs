//! Condition algebra.
//!
//! Every kind declares a `ConditionSet`: a single top-level "happy" condition (`Ready`) plus an
//! ordered list of dependent conditions. The happy condition is always derived from the
//! dependents and is never written directly by reconcilers:
//!
//! - any dependent `False` makes the happy condition `False`, carrying the first failure's reason;
//! - otherwise any dependent `Unknown` makes it `Unknown`;
//! - otherwise it is `True`.
//!
//! Condition sets are values handed to whoever manages a status. There is no process wide registry.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The top-level condition of every kind.
pub const CONDITION_READY: &str = "Ready";

/// The tri-state value of a condition.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::True => "True",
                Self::False => "False",
                Self::Unknown => "Unknown",
            }
        )
    }
}

/// The severity of a condition which is not `True`.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum ConditionSeverity {
    Error,
    Warning,
    Info,
}

impl ConditionSeverity {
    fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl Default for ConditionSeverity {
    fn default() -> Self {
        Self::Error
    }
}

/// A named tri-state fact about a resource.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// The type of this condition, unique within a status.
    #[serde(rename = "type")]
    pub type_: String,
    /// The state of this condition.
    pub status: ConditionStatus,
    /// How to interpret a non-`True` state.
    #[serde(default, skip_serializing_if = "ConditionSeverity::is_error")]
    pub severity: ConditionSeverity,
    /// The last time the state of this condition changed, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    /// A machine readable reason code for the current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// A human readable message for the current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    fn new(type_: &str, status: ConditionStatus, reason: Option<&str>, message: Option<&str>) -> Self {
        Self {
            type_: type_.into(),
            status,
            severity: ConditionSeverity::Error,
            last_transition_time: None,
            reason: reason.map(String::from),
            message: message.map(String::from),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }

    pub fn is_unknown(&self) -> bool {
        self.status == ConditionStatus::Unknown
    }

    /// Compare two conditions ignoring their transition time.
    fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_ && self.status == other.status && self.severity == other.severity && self.reason == other.reason && self.message == other.message
    }
}

/// The status fields shared by every kind.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConditionedStatus {
    /// The generation of the spec last fully reconciled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// The latest observations of the object's state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ConditionedStatus {
    /// Get the condition of the given type, if present.
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|cond| cond.type_ == type_)
    }
}

/// The ordered set of conditions whose conjunction defines the happy condition.
#[derive(Clone, Debug, PartialEq)]
pub struct ConditionSet {
    happy: String,
    dependents: Vec<String>,
}

impl ConditionSet {
    /// Create a new set with the given happy condition.
    pub fn new(happy: &str, dependents: &[&str]) -> Self {
        Self {
            happy: happy.into(),
            dependents: dependents.iter().map(|dep| dep.to_string()).collect(),
        }
    }

    /// Create a new set whose happy condition is `Ready`.
    pub fn living(dependents: &[&str]) -> Self {
        Self::new(CONDITION_READY, dependents)
    }

    /// Build an alternate set carrying the given additional dependents.
    pub fn with_dependents(&self, extra: &[&str]) -> Self {
        let mut set = self.clone();
        for dep in extra {
            if !set.dependents.iter().any(|existing| existing == dep) {
                set.dependents.push(dep.to_string());
            }
        }
        set
    }

    pub fn happy(&self) -> &str {
        &self.happy
    }

    pub fn dependents(&self) -> &[String] {
        &self.dependents
    }

    /// Check if the given condition type is managed by this set.
    pub fn contains(&self, type_: &str) -> bool {
        self.happy == type_ || self.dependents.iter().any(|dep| dep == type_)
    }

    /// Build a manager of the given status according to this set.
    pub fn manage<'a>(&'a self, status: &'a mut ConditionedStatus) -> ConditionManager<'a> {
        ConditionManager { set: self, status }
    }
}

/// A handle used to mutate the conditions of a status according to a `ConditionSet`.
pub struct ConditionManager<'a> {
    set: &'a ConditionSet,
    status: &'a mut ConditionedStatus,
}

impl<'a> ConditionManager<'a> {
    /// Set every managed condition which is not yet present to `Unknown`.
    pub fn initialize_conditions(&mut self) {
        let set = self.set;
        for type_ in std::iter::once(&set.happy).chain(set.dependents.iter()) {
            if self.status.get_condition(type_).is_none() {
                self.set_condition(Condition::new(type_, ConditionStatus::Unknown, None, None));
            }
        }
    }

    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.status.get_condition(type_)
    }

    /// The happy condition of the managed status.
    pub fn get_top_level_condition(&self) -> Option<&Condition> {
        self.status.get_condition(&self.set.happy)
    }

    /// Check if the happy condition is `True`.
    pub fn is_happy(&self) -> bool {
        self.get_top_level_condition().map(Condition::is_true).unwrap_or(false)
    }

    /// Check if every dependent other than the given ones is `True`.
    pub fn dependents_true_except(&self, except: &[&str]) -> bool {
        self.set
            .dependents
            .iter()
            .filter(|dep| !except.contains(&dep.as_str()))
            .all(|dep| self.get_condition(dep).map(Condition::is_true).unwrap_or(false))
    }

    /// Mark the given condition `True`.
    pub fn mark_true(&mut self, type_: &str) {
        self.set_condition(Condition::new(type_, ConditionStatus::True, None, None));
        self.recompute_happy(type_);
    }

    /// Mark the given condition `True`, recording a reason for it.
    pub fn mark_true_with_reason(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_condition(Condition::new(type_, ConditionStatus::True, Some(reason), Some(message)));
        self.recompute_happy(type_);
    }

    /// Mark the given condition `Unknown`.
    pub fn mark_unknown(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_condition(Condition::new(type_, ConditionStatus::Unknown, Some(reason), Some(message)));
        self.recompute_happy(type_);
    }

    /// Mark the given condition `False`.
    pub fn mark_false(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_condition(Condition::new(type_, ConditionStatus::False, Some(reason), Some(message)));
        self.recompute_happy(type_);
    }

    /// Insert or replace a condition.
    ///
    /// The transition time is only moved forward when the state changes.
    fn set_condition(&mut self, mut cond: Condition) {
        match self.status.conditions.iter_mut().find(|existing| existing.type_ == cond.type_) {
            Some(existing) if existing.same_state(&cond) => (),
            Some(existing) => {
                cond.last_transition_time = if existing.status == cond.status {
                    existing.last_transition_time.take()
                } else {
                    Some(now())
                };
                *existing = cond;
            }
            None => {
                cond.last_transition_time = Some(now());
                self.status.conditions.push(cond);
                self.status.conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
            }
        }
    }

    /// Derive the happy condition from the dependents after a dependent changed.
    fn recompute_happy(&mut self, changed: &str) {
        if changed == self.set.happy || self.set.dependents.is_empty() {
            return;
        }
        let set = self.set;
        let deps: Vec<&Condition> = set.dependents.iter().filter_map(|dep| self.status.get_condition(dep)).collect();
        let happy = &set.happy;

        let first_false = deps.iter().find(|cond| cond.is_false()).map(|cond| (*cond).clone());
        let first_unknown = deps.iter().find(|cond| cond.is_unknown()).map(|cond| (*cond).clone());
        let all_present = deps.len() == set.dependents.len();

        let cond = if let Some(failed) = first_false {
            Condition::new(happy, ConditionStatus::False, failed.reason.as_deref(), failed.message.as_deref())
        } else if let Some(unknown) = first_unknown {
            Condition::new(happy, ConditionStatus::Unknown, unknown.reason.as_deref(), unknown.message.as_deref())
        } else if all_present {
            Condition::new(happy, ConditionStatus::True, None, None)
        } else {
            Condition::new(happy, ConditionStatus::Unknown, None, None)
        };
        self.set_condition(cond);
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
