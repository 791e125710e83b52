//! Staff-action rules.
//!
//! A fixed, ordered table of `(predicate, template)` pairs over the typed tag
//! categories. Every matching rule fires and contributes one action, in table
//! order. When nothing matches, a single "standard service" action is returned,
//! so the output is never empty.

use serde::Serialize;

use crate::model::{GuestPrediction, RiskLabel, TagCategory};

/// Visual emphasis hint for the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStyle {
    Danger,
    Celebration,
    Info,
    Success,
    Premium,
    Neutral,
}

/// One recommended staff action. Always recomputed, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecommendation {
    pub label: String,
    /// Icon name understood by the dashboard.
    pub icon: &'static str,
    pub style: ActionStyle,
}

impl ActionRecommendation {
    fn new(label: impl Into<String>, icon: &'static str, style: ActionStyle) -> Self {
        Self {
            label: label.into(),
            icon,
            style,
        }
    }
}

struct Rule {
    name: &'static str,
    applies: fn(&GuestPrediction) -> bool,
    build: fn(&GuestPrediction) -> ActionRecommendation,
}

const RULES: &[Rule] = &[
    Rule {
        name: "deposit",
        applies: |p| p.risk_label == RiskLabel::High,
        build: |_| {
            ActionRecommendation::new("Request deposit to secure booking", "credit-card", ActionStyle::Danger)
        },
    },
    Rule {
        name: "celebration",
        applies: |p| p.has_category(TagCategory::Occasion),
        build: |p| {
            if any_label_contains(p, "birthday") {
                ActionRecommendation::new("Alert pastry chef: birthday dessert", "cake", ActionStyle::Celebration)
            } else {
                ActionRecommendation::new("Prepare special occasion setup", "sparkles", ActionStyle::Celebration)
            }
        },
    },
    Rule {
        name: "seating",
        applies: |p| p.has_category(TagCategory::Seating),
        build: |p| {
            let label = p
                .first_in_category(TagCategory::Seating)
                .map(|t| t.label.as_str())
                .unwrap_or("preferred");
            ActionRecommendation::new(format!("Assign {label} seating"), "armchair", ActionStyle::Info)
        },
    },
    Rule {
        name: "dietary",
        applies: |p| p.has_category(TagCategory::Dietary),
        build: |p| {
            if any_label_contains(p, "allerg") {
                ActionRecommendation::new("Alert kitchen: allergy on file", "alert-triangle", ActionStyle::Danger)
            } else {
                ActionRecommendation::new("Print dietary card for kitchen", "leaf", ActionStyle::Success)
            }
        },
    },
    Rule {
        name: "vip",
        applies: |p| p.has_category(TagCategory::Status),
        build: |_| ActionRecommendation::new("Apply VIP protocol", "crown", ActionStyle::Premium),
    },
    Rule {
        name: "family",
        applies: |p| p.has_category(TagCategory::Family),
        build: |_| ActionRecommendation::new("Prepare high chair", "baby", ActionStyle::Info),
    },
];

fn fallback() -> ActionRecommendation {
    ActionRecommendation::new("Standard service", "check-circle", ActionStyle::Neutral)
}

fn any_label_contains(p: &GuestPrediction, needle: &str) -> bool {
    p.smart_tags
        .iter()
        .any(|t| t.label.to_lowercase().contains(needle))
}

/// Handle over the static rule table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn derive_actions(&self, prediction: &GuestPrediction) -> Vec<ActionRecommendation> {
        derive_actions(prediction)
    }

    /// Rule names in evaluation order.
    pub fn rule_names() -> Vec<&'static str> {
        RULES.iter().map(|r| r.name).collect()
    }
}

/// Accumulate every matching rule's action in priority order.
pub fn derive_actions(prediction: &GuestPrediction) -> Vec<ActionRecommendation> {
    let mut out: Vec<ActionRecommendation> = RULES
        .iter()
        .filter(|r| (r.applies)(prediction))
        .map(|r| (r.build)(prediction))
        .collect();
    if out.is_empty() {
        out.push(fallback());
    }
    out
}
