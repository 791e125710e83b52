//! # Model
//! Value types shared by the scheduler, the rule engine and the history store,
//! plus the wire shapes of the remote prediction service.
//!
//! Everything here is plain data: cloned into history records, never shared
//! mutably with in-flight form state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Upper bound accepted by the prediction service for `party_size`.
pub const MAX_PARTY_SIZE: u32 = 20;
/// Upper bound accepted by the prediction service for `children`.
pub const MAX_CHILDREN: u32 = 10;

/// How the reservation reached the restaurant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BookingChannel {
    #[default]
    Online,
    Phone,
    #[serde(rename = "Walk-in")]
    WalkIn,
    App,
    Corporate,
}

fn default_party_size() -> u32 {
    2
}
fn default_spend() -> f64 {
    80.0
}

/// Attributes of a prospective visit, as sent to `/predict-guest-behavior`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationInput {
    pub guest_name: String,
    #[serde(default = "default_party_size")]
    pub party_size: u32,
    #[serde(default)]
    pub children: u32,
    /// Lead time in days.
    #[serde(default)]
    pub booking_advance_days: u32,
    #[serde(default)]
    pub special_needs_count: u32,
    #[serde(default)]
    pub is_repeat_guest: bool,
    #[serde(default = "default_spend")]
    pub estimated_spend_per_cover: f64,
    #[serde(default)]
    pub previous_cancellations: u32,
    #[serde(default)]
    pub previous_completions: u32,
    #[serde(default)]
    pub booking_channel: BookingChannel,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_number: Option<u32>,
}

impl Default for ReservationInput {
    fn default() -> Self {
        Self {
            guest_name: String::new(),
            party_size: default_party_size(),
            children: 0,
            booking_advance_days: 0,
            special_needs_count: 0,
            is_repeat_guest: false,
            estimated_spend_per_cover: default_spend(),
            previous_cancellations: 0,
            previous_completions: 0,
            booking_channel: BookingChannel::Online,
            notes: String::new(),
            reservation_date: None,
            reservation_time: None,
            table_number: None,
        }
    }
}

impl ReservationInput {
    /// Convenience constructor for a named draft with service defaults.
    pub fn named(guest_name: impl Into<String>) -> Self {
        Self {
            guest_name: guest_name.into(),
            ..Self::default()
        }
    }

    /// Check the invariants the service enforces. Counts are unsigned, so
    /// only the bounds and the identifying field need checking here.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.guest_name.trim().is_empty() {
            return Err(ValidationError::MissingGuestName);
        }
        if self.party_size == 0 || self.party_size > MAX_PARTY_SIZE {
            return Err(ValidationError::PartySize(self.party_size));
        }
        if self.children > MAX_CHILDREN {
            return Err(ValidationError::Children(self.children));
        }
        if !self.estimated_spend_per_cover.is_finite() || self.estimated_spend_per_cover < 0.0 {
            return Err(ValidationError::Spend(self.estimated_spend_per_cover));
        }
        Ok(())
    }
}

/// Partial field update, e.g. from a voice transcript or a single slider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservationPatch {
    pub guest_name: Option<String>,
    pub party_size: Option<u32>,
    pub children: Option<u32>,
    pub booking_advance_days: Option<u32>,
    pub special_needs_count: Option<u32>,
    pub is_repeat_guest: Option<bool>,
    pub estimated_spend_per_cover: Option<f64>,
    pub previous_cancellations: Option<u32>,
    pub previous_completions: Option<u32>,
    pub booking_channel: Option<BookingChannel>,
    pub notes: Option<String>,
}

impl ReservationPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrite only the fields present in the patch.
    pub fn apply(&self, input: &mut ReservationInput) {
        if let Some(v) = &self.guest_name {
            input.guest_name = v.clone();
        }
        if let Some(v) = self.party_size {
            input.party_size = v;
        }
        if let Some(v) = self.children {
            input.children = v;
        }
        if let Some(v) = self.booking_advance_days {
            input.booking_advance_days = v;
        }
        if let Some(v) = self.special_needs_count {
            input.special_needs_count = v;
        }
        if let Some(v) = self.is_repeat_guest {
            input.is_repeat_guest = v;
        }
        if let Some(v) = self.estimated_spend_per_cover {
            input.estimated_spend_per_cover = v;
        }
        if let Some(v) = self.previous_cancellations {
            input.previous_cancellations = v;
        }
        if let Some(v) = self.previous_completions {
            input.previous_completions = v;
        }
        if let Some(v) = self.booking_channel {
            input.booking_channel = v;
        }
        if let Some(v) = &self.notes {
            input.notes = v.clone();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLabel {
    #[serde(rename = "Low Risk")]
    Low,
    #[serde(rename = "Medium Risk")]
    Medium,
    #[serde(rename = "High Risk")]
    High,
}

impl RiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::Low => "Low Risk",
            RiskLabel::Medium => "Medium Risk",
            RiskLabel::High => "High Risk",
        }
    }
}

/// No-show risk banding. Lower bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskBands {
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskBands {
    fn default() -> Self {
        Self {
            medium: 0.40,
            high: 0.70,
        }
    }
}

impl RiskBands {
    pub fn classify(&self, no_show_risk: f64) -> RiskLabel {
        if no_show_risk >= self.high {
            RiskLabel::High
        } else if no_show_risk >= self.medium {
            RiskLabel::Medium
        } else {
            RiskLabel::Low
        }
    }

    /// Clamp both bounds to [0,1] and keep `medium <= high`.
    pub fn sanitized(self) -> Self {
        let fallback = Self::default();
        let fix = |v: f64, d: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { d };
        let mut medium = fix(self.medium, fallback.medium);
        let mut high = fix(self.high, fallback.high);
        if medium > high {
            std::mem::swap(&mut medium, &mut high);
        }
        Self { medium, high }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AiTag {
    #[serde(rename = "Likely No-Show")]
    LikelyNoShow,
    #[serde(rename = "High Spend Potential")]
    HighSpendPotential,
    #[serde(rename = "Loyal Regular")]
    LoyalRegular,
    #[serde(rename = "Watch List")]
    WatchList,
    #[serde(rename = "Low Risk")]
    LowRisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpendTier {
    Budget,
    Standard,
    Premium,
    Luxury,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub score: f64,
    /// Display glyph chosen by the service.
    pub emoji: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagCategory {
    Dietary,
    Occasion,
    Seating,
    Status,
    Accessibility,
    Family,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartTag {
    pub label: String,
    pub category: TagCategory,
    pub color: String,
}

impl SmartTag {
    pub fn new(label: impl Into<String>, category: TagCategory, color: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            category,
            color: color.into(),
        }
    }
}

/// Result of one remote inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestPrediction {
    pub reliability_score: f64,
    pub no_show_risk: f64,
    pub risk_label: RiskLabel,
    pub ai_tag: AiTag,
    #[serde(rename = "spend_tag")]
    pub spend_tier: SpendTier,
    pub sentiment: Sentiment,
    pub confidence: f64,
    #[serde(default)]
    pub smart_tags: Vec<SmartTag>,
    #[serde(
        default,
        deserialize_with = "non_empty_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub explanation: Option<String>,
    pub tenant_id: String,
    #[serde(rename = "predicted_at", with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl GuestPrediction {
    /// Whether `risk_label` agrees with `bands` for this `no_show_risk`.
    pub fn risk_consistent(&self, bands: &RiskBands) -> bool {
        bands.classify(self.no_show_risk) == self.risk_label
    }

    pub fn has_category(&self, category: TagCategory) -> bool {
        self.smart_tags.iter().any(|t| t.category == category)
    }

    pub fn first_in_category(&self, category: TagCategory) -> Option<&SmartTag> {
        self.smart_tags.iter().find(|t| t.category == category)
    }
}

fn non_empty_string<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(de)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

/// The service stamps `predicted_at` with a naive UTC timestamp
/// (`2025-03-01T19:30:00.123456`); RFC 3339 is accepted as well.
/// Always written back as RFC 3339.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw}")))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|n| n.and_utc())
    }
}

// ---- Wire shapes for the auxiliary endpoints ----

/// Free text to mine for CRM tags. Missing fields read as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagAnalysisRequest {
    pub special_request_text: String,
    pub dietary_preferences: String,
    pub customer_name: String,
}

/// Tag returned by `/reservations/analyze-tags`. Its category vocabulary
/// differs from [`SmartTag`], so it stays a free string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagResult {
    pub tag: String,
    pub category: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagAnalysis {
    pub customer_name: String,
    pub tags: Vec<TagResult>,
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub engine: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoScenario {
    pub name: String,
    pub reservation: ReservationInput,
}

/// One row of `/simulate-reservations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedReservation {
    pub reservation_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub adults: u32,
    #[serde(flatten)]
    pub input: ReservationInput,
}

/// Projection used by the history view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RiskFilter {
    #[default]
    All,
    High,
    Medium,
    Low,
}

impl RiskFilter {
    pub fn matches(&self, label: RiskLabel) -> bool {
        match self {
            RiskFilter::All => true,
            RiskFilter::High => label == RiskLabel::High,
            RiskFilter::Medium => label == RiskLabel::Medium,
            RiskFilter::Low => label == RiskLabel::Low,
        }
    }
}

impl std::str::FromStr for RiskFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(RiskFilter::All),
            "high" => Ok(RiskFilter::High),
            "medium" => Ok(RiskFilter::Medium),
            "low" => Ok(RiskFilter::Low),
            other => Err(format!("unknown risk filter: {other}")),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_prediction(risk: RiskLabel, tags: Vec<SmartTag>) -> GuestPrediction {
    let no_show_risk = match risk {
        RiskLabel::Low => 0.2,
        RiskLabel::Medium => 0.5,
        RiskLabel::High => 0.8,
    };
    GuestPrediction {
        reliability_score: 1.0 - no_show_risk,
        no_show_risk,
        risk_label: risk,
        ai_tag: AiTag::LowRisk,
        spend_tier: SpendTier::Standard,
        sentiment: Sentiment {
            label: SentimentLabel::Neutral,
            score: 0.5,
            emoji: "\u{1F7E1}".into(),
        },
        confidence: 0.55,
        smart_tags: tags,
        explanation: None,
        tenant_id: "default".into(),
        created_at: Utc::now(),
    }
}
