//! Canonical lease-contract field schema and field value types.
//!
//! The schema is fixed at compile time: 22 fields in five groups, matching
//! the attributes a Japanese lease agreement is expected to yield. Extractor
//! backends report raw string keys; `FieldKey::parse` maps them into the
//! schema (tolerating camelCase, since backends are sloppy about casing).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Confidence thresholds shared by reconciliation and reporting
pub mod thresholds {
    /// At or above this: no review flag.
    pub const HIGH: u8 = 85;

    /// At or above this (but below HIGH): review recommended.
    pub const MEDIUM: u8 = 70;
}

/// A canonical contract field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    ContractNumber,
    ContractKind,
    StartDate,
    EndDate,
    RenewalCondition,
    CancellationNotice,
    PropertyName,
    PropertyAddress,
    FloorArea,
    Usage,
    LessorName,
    LessorAddress,
    LessorPhone,
    LesseeName,
    LesseeAddress,
    LesseePhone,
    MonthlyRent,
    CommonFee,
    Deposit,
    KeyMoney,
    RenewalFee,
    PaymentDue,
}

impl FieldKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContractNumber => "contract_number",
            Self::ContractKind => "contract_kind",
            Self::StartDate => "start_date",
            Self::EndDate => "end_date",
            Self::RenewalCondition => "renewal_condition",
            Self::CancellationNotice => "cancellation_notice",
            Self::PropertyName => "property_name",
            Self::PropertyAddress => "property_address",
            Self::FloorArea => "floor_area",
            Self::Usage => "usage",
            Self::LessorName => "lessor_name",
            Self::LessorAddress => "lessor_address",
            Self::LessorPhone => "lessor_phone",
            Self::LesseeName => "lessee_name",
            Self::LesseeAddress => "lessee_address",
            Self::LesseePhone => "lessee_phone",
            Self::MonthlyRent => "monthly_rent",
            Self::CommonFee => "common_fee",
            Self::Deposit => "deposit",
            Self::KeyMoney => "key_money",
            Self::RenewalFee => "renewal_fee",
            Self::PaymentDue => "payment_due",
        }
    }

    /// Parse a raw extractor key. Tolerates camelCase ("contractNumber")
    /// and surrounding whitespace; returns None for keys outside the schema.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = to_snake_case(raw.trim());
        Self::all().iter().copied().find(|k| k.as_str() == normalized)
    }

    /// Japanese display label, as shown on the review surface.
    pub fn label_ja(&self) -> &'static str {
        match self {
            Self::ContractNumber => "契約番号",
            Self::ContractKind => "契約書種別",
            Self::StartDate => "契約開始日",
            Self::EndDate => "契約終了日",
            Self::RenewalCondition => "更新条件",
            Self::CancellationNotice => "解約予告",
            Self::PropertyName => "物件名",
            Self::PropertyAddress => "物件所在地",
            Self::FloorArea => "専有面積",
            Self::Usage => "使用目的",
            Self::LessorName => "貸主氏名",
            Self::LessorAddress => "貸主住所",
            Self::LessorPhone => "貸主電話番号",
            Self::LesseeName => "借主氏名",
            Self::LesseeAddress => "借主住所",
            Self::LesseePhone => "借主電話番号",
            Self::MonthlyRent => "月額賃料",
            Self::CommonFee => "共益費",
            Self::Deposit => "敷金",
            Self::KeyMoney => "礼金",
            Self::RenewalFee => "更新料",
            Self::PaymentDue => "支払期日",
        }
    }

    pub fn group(&self) -> FieldGroup {
        match self {
            Self::ContractNumber
            | Self::ContractKind
            | Self::StartDate
            | Self::EndDate
            | Self::RenewalCondition
            | Self::CancellationNotice => FieldGroup::Contract,
            Self::PropertyName | Self::PropertyAddress | Self::FloorArea | Self::Usage => {
                FieldGroup::Property
            }
            Self::LessorName | Self::LessorAddress | Self::LessorPhone => FieldGroup::Lessor,
            Self::LesseeName | Self::LesseeAddress | Self::LesseePhone => FieldGroup::Lessee,
            Self::MonthlyRent
            | Self::CommonFee
            | Self::Deposit
            | Self::KeyMoney
            | Self::RenewalFee
            | Self::PaymentDue => FieldGroup::Financial,
        }
    }

    /// Every key in the canonical schema, in display order.
    pub fn all() -> &'static [FieldKey] {
        &[
            Self::ContractNumber,
            Self::ContractKind,
            Self::StartDate,
            Self::EndDate,
            Self::RenewalCondition,
            Self::CancellationNotice,
            Self::PropertyName,
            Self::PropertyAddress,
            Self::FloorArea,
            Self::Usage,
            Self::LessorName,
            Self::LessorAddress,
            Self::LessorPhone,
            Self::LesseeName,
            Self::LesseeAddress,
            Self::LesseePhone,
            Self::MonthlyRent,
            Self::CommonFee,
            Self::Deposit,
            Self::KeyMoney,
            Self::RenewalFee,
            Self::PaymentDue,
        ]
    }
}

impl std::fmt::Display for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Grouping used for UI-facing reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    Contract,
    Property,
    Lessor,
    Lessee,
    Financial,
}

impl FieldGroup {
    pub fn label_ja(&self) -> &'static str {
        match self {
            Self::Contract => "契約情報",
            Self::Property => "物件情報",
            Self::Lessor => "貸主情報",
            Self::Lessee => "借主情報",
            Self::Financial => "金銭情報",
        }
    }
}

/// Kind of contract document, as selected on the upload form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Lease,
    RenewalAgreement,
    Memorandum,
}

impl ContractKind {
    pub fn label_ja(&self) -> &'static str {
        match self {
            Self::Lease => "賃貸借契約書",
            Self::RenewalAgreement => "更新契約書",
            Self::Memorandum => "覚書",
        }
    }
}

/// High/medium/low banding derived from a numeric confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn from_score(score: u8) -> Self {
        if score >= thresholds::HIGH {
            Self::High
        } else if score >= thresholds::MEDIUM {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Location hint into the recognized page text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    /// 1-indexed page number
    pub page: u32,

    /// UTF-8 byte offset of the value within the page text
    pub start: usize,

    /// Exclusive end offset
    pub end: usize,
}

/// A single field candidate as produced by one extraction run.
///
/// Immutable once created; corrections become overrides on the reconciled
/// set, never edits here. The key stays a raw string because extractor
/// output is untrusted; canonical parsing happens at reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedField {
    /// Raw field key as reported by the extractor
    pub key: String,

    /// Raw string value
    pub value: String,

    /// Producer-assigned confidence, 0-100
    pub confidence: u8,

    /// Location of the value in the source document, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<SourceSpan>,

    /// When this candidate was extracted
    pub extracted_at: DateTime<Utc>,
}

/// The canonical value for one field key on one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledField {
    pub key: FieldKey,

    pub value: String,

    /// Reported confidence; always 100 for overridden fields
    pub confidence: u8,

    /// True if a human replaced the extractor value
    #[serde(default)]
    pub overridden: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_author: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub overridden_at: Option<DateTime<Utc>>,
}

impl ReconciledField {
    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::from_score(self.confidence)
    }
}

/// Convert a raw key to snake_case ("contractNumber" -> "contract_number").
fn to_snake_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    for (i, c) in raw.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '-' || c == ' ' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_round_trip() {
        for key in FieldKey::all() {
            assert_eq!(FieldKey::parse(key.as_str()), Some(*key));
        }
    }

    #[test]
    fn test_parse_camel_case_alias() {
        assert_eq!(FieldKey::parse("contractNumber"), Some(FieldKey::ContractNumber));
        assert_eq!(FieldKey::parse("lessorPhone"), Some(FieldKey::LessorPhone));
        assert_eq!(FieldKey::parse(" monthly_rent "), Some(FieldKey::MonthlyRent));
        assert_eq!(FieldKey::parse("fax_number"), None);
    }

    #[test]
    fn test_schema_size() {
        assert_eq!(FieldKey::all().len(), 22);
    }

    #[test]
    fn test_band_thresholds() {
        assert_eq!(ConfidenceBand::from_score(100), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_score(85), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_score(84), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_score(70), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_score(69), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_score(0), ConfidenceBand::Low);
    }

    #[test]
    fn test_field_key_serde() {
        let json = serde_json::to_string(&FieldKey::MonthlyRent).unwrap();
        assert_eq!(json, "\"monthly_rent\"");

        let parsed: FieldKey = serde_json::from_str("\"lessor_phone\"").unwrap();
        assert_eq!(parsed, FieldKey::LessorPhone);
    }

    #[test]
    fn test_reconciled_field_serde() {
        let field = ReconciledField {
            key: FieldKey::MonthlyRent,
            value: "¥500,000".to_string(),
            confidence: 99,
            overridden: false,
            override_author: None,
            overridden_at: None,
        };

        let json = serde_json::to_string(&field).unwrap();
        let parsed: ReconciledField = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, field);
        assert_eq!(parsed.band(), ConfidenceBand::High);
    }
}
