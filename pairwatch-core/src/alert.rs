//! Edge-triggered alert rules over analytics snapshots.
//!
//! Rules are a closed tagged variant over {field, operator, threshold}
//! evaluated by a fixed interpreter: user input never becomes a dynamically
//! executed expression.

use crate::{
    analytics::AnalyticsSnapshot,
    error::AlertError,
    event::{PairId, PairSpec},
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Numeric snapshot fields a rule may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertField {
    HedgeRatio,
    Spread,
    Zscore,
    Correlation,
    AdfStatistic,
    AdfPvalue,
}

impl AlertField {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertField::HedgeRatio => "hedge_ratio",
            AlertField::Spread => "spread",
            AlertField::Zscore => "zscore",
            AlertField::Correlation => "correlation",
            AlertField::AdfStatistic => "adf_statistic",
            AlertField::AdfPvalue => "adf_pvalue",
        }
    }

    /// Extract this field from a snapshot; `None` when the window cannot yet
    /// support it.
    pub fn extract(&self, snapshot: &AnalyticsSnapshot) -> Option<f64> {
        match self {
            AlertField::HedgeRatio => snapshot.hedge_ratio,
            AlertField::Spread => snapshot.spread,
            AlertField::Zscore => snapshot.zscore,
            AlertField::Correlation => snapshot.correlation,
            AlertField::AdfStatistic => snapshot.adf_statistic,
            AlertField::AdfPvalue => snapshot.adf_pvalue,
        }
    }
}

impl std::fmt::Display for AlertField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whitelisted comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOp {
    Gt,
    Ge,
    Lt,
    Le,
}

impl AlertOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertOp::Gt => ">",
            AlertOp::Ge => ">=",
            AlertOp::Lt => "<",
            AlertOp::Le => "<=",
        }
    }

    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            AlertOp::Gt => value > threshold,
            AlertOp::Ge => value >= threshold,
            AlertOp::Lt => value < threshold,
            AlertOp::Le => value <= threshold,
        }
    }
}

impl std::fmt::Display for AlertOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A rule as supplied in configuration or registered at runtime.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AlertRuleSpec {
    pub pair: PairSpec,
    pub field: AlertField,
    pub op: AlertOp,
    pub threshold: f64,
}

/// Alert fired on a Disarmed -> Armed transition. Immutable, append-only.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AlertEvent {
    pub rule_id: u64,
    pub pair_id: PairId,
    pub time: DateTime<Utc>,
    pub observed: f64,
    pub message: String,
}

/// A registered rule plus its armed flag.
///
/// `armed` records whether the predicate held on the previous evaluation, so
/// each upward crossing fires exactly once.
#[derive(Debug, Clone)]
struct ArmedRule {
    id: u64,
    field: AlertField,
    op: AlertOp,
    threshold: f64,
    armed: bool,
}

/// Evaluates registered rules against each new analytics snapshot.
#[derive(Debug, Default)]
pub struct AlertEngine {
    rules: FnvHashMap<PairId, Vec<ArmedRule>>,
    next_id: u64,
}

impl AlertEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a rule, returning its id.
    pub fn register_rule(&mut self, spec: &AlertRuleSpec) -> Result<u64, AlertError> {
        if !spec.threshold.is_finite() {
            return Err(AlertError::InvalidRuleExpression(format!(
                "non-finite threshold for {} {}",
                spec.field, spec.op
            )));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.rules.entry(spec.pair.id()).or_default().push(ArmedRule {
            id,
            field: spec.field,
            op: spec.op,
            threshold: spec.threshold,
            armed: false,
        });
        Ok(id)
    }

    /// Evaluate every rule registered for the snapshot's pair.
    ///
    /// Fields the snapshot cannot provide leave the rule's armed state
    /// untouched and never fire.
    pub fn evaluate(&mut self, snapshot: &AnalyticsSnapshot) -> Vec<AlertEvent> {
        let Some(rules) = self.rules.get_mut(&snapshot.pair_id) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for rule in rules.iter_mut() {
            let Some(observed) = rule.field.extract(snapshot) else {
                continue;
            };

            let holds = rule.op.apply(observed, rule.threshold);
            if holds && !rule.armed {
                rule.armed = true;
                let event = AlertEvent {
                    rule_id: rule.id,
                    pair_id: snapshot.pair_id.clone(),
                    time: snapshot.time,
                    observed,
                    message: format!(
                        "{} {} {} crossed on {}: observed {:.6}",
                        rule.field, rule.op, rule.threshold, snapshot.pair_id, observed
                    ),
                };
                info!(rule_id = rule.id, pair = %snapshot.pair_id, observed, "alert fired");
                events.push(event);
            } else if !holds {
                rule.armed = false;
            }
        }
        events
    }
}
