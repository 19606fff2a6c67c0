//! Typed records and their natural keys
//!
//! Every record the parsers produce is one of the [`TypedRecord`] variants.
//! The natural key is the only thing used to match a record against persisted
//! state; the canonical attributes decide whether a match is an update or a
//! no-op.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::RecordError;

/// Persisted entity families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    MarketSecurity,
    DailyValuation,
    Holding,
    Transaction,
    IndexHistory,
    Product,
    FundManager,
    Amc,
    Scheme,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::MarketSecurity => "MARKET_SECURITY",
            EntityKind::DailyValuation => "DAILY_VALUATION",
            EntityKind::Holding => "HOLDING",
            EntityKind::Transaction => "TRANSACTION",
            EntityKind::IndexHistory => "INDEX_HISTORY",
            EntityKind::Product => "PRODUCT",
            EntityKind::FundManager => "FUND_MANAGER",
            EntityKind::Amc => "AMC",
            EntityKind::Scheme => "SCHEME",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Buy,
    Sell,
    SwitchIn,
    SwitchOut,
    Dividend,
    Redemption,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
            TransactionType::SwitchIn => "SWITCH_IN",
            TransactionType::SwitchOut => "SWITCH_OUT",
            TransactionType::Dividend => "DIVIDEND",
            TransactionType::Redemption => "REDEMPTION",
        }
    }
}

impl FromStr for TransactionType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "BUY" | "PURCHASE" => Ok(TransactionType::Buy),
            "SELL" => Ok(TransactionType::Sell),
            "SWITCH_IN" => Ok(TransactionType::SwitchIn),
            "SWITCH_OUT" => Ok(TransactionType::SwitchOut),
            "DIVIDEND" => Ok(TransactionType::Dividend),
            "REDEMPTION" => Ok(TransactionType::Redemption),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSecurity {
    pub isin: String,
    pub name: String,
    pub security_type: Option<String>,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    pub face_value: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyValuation {
    pub investment_id: String,
    pub valuation_date: NaiveDate,
    pub market_value: Decimal,
    pub units: Option<Decimal>,
    pub nav: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub investment_id: String,
    pub security_code: String,
    pub valuation_date: NaiveDate,
    pub quantity: Decimal,
    pub market_value: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub investment_id: String,
    pub order_date: NaiveDate,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub units: Option<Decimal>,
    pub price: Option<Decimal>,
    pub security_code: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPoint {
    pub index_code: String,
    pub date: NaiveDate,
    pub close: Decimal,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub external_id: String,
    pub name: String,
    pub category: Option<String>,
    pub risk_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundManager {
    pub external_id: String,
    pub name: String,
    pub experience_years: Option<i64>,
    pub qualification: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amc {
    pub external_id: String,
    pub name: String,
    pub code: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheme {
    pub external_id: String,
    pub name: String,
    pub amc_id: Option<String>,
    pub category: Option<String>,
    pub isin: Option<String>,
}

/// A decoded record ready for reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedRecord {
    MarketSecurity(MarketSecurity),
    DailyValuation(DailyValuation),
    Holding(Holding),
    Transaction(Transaction),
    IndexPoint(IndexPoint),
    Product(Product),
    FundManager(FundManager),
    Amc(Amc),
    Scheme(Scheme),
}

/// A record's dependency on another entity that must already exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub field: &'static str,
    pub kind: EntityKind,
    pub key: String,
}

impl TypedRecord {
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            TypedRecord::MarketSecurity(_) => EntityKind::MarketSecurity,
            TypedRecord::DailyValuation(_) => EntityKind::DailyValuation,
            TypedRecord::Holding(_) => EntityKind::Holding,
            TypedRecord::Transaction(_) => EntityKind::Transaction,
            TypedRecord::IndexPoint(_) => EntityKind::IndexHistory,
            TypedRecord::Product(_) => EntityKind::Product,
            TypedRecord::FundManager(_) => EntityKind::FundManager,
            TypedRecord::Amc(_) => EntityKind::Amc,
            TypedRecord::Scheme(_) => EntityKind::Scheme,
        }
    }

    /// Canonical natural key; doubles as the record identifier in job logs
    pub fn natural_key(&self) -> String {
        match self {
            TypedRecord::MarketSecurity(r) => r.isin.clone(),
            TypedRecord::DailyValuation(r) => {
                format!("{}|{}", r.investment_id, r.valuation_date)
            },
            TypedRecord::Holding(r) => {
                format!("{}|{}|{}", r.investment_id, r.security_code, r.valuation_date)
            },
            TypedRecord::Transaction(r) => format!(
                "{}|{}|{}|{}",
                r.investment_id,
                r.order_date,
                r.transaction_type.as_str(),
                r.amount.normalize()
            ),
            TypedRecord::IndexPoint(r) => format!("{}|{}", r.index_code, r.date),
            TypedRecord::Product(r) => r.external_id.clone(),
            TypedRecord::FundManager(r) => r.external_id.clone(),
            TypedRecord::Amc(r) => r.external_id.clone(),
            TypedRecord::Scheme(r) => r.external_id.clone(),
        }
    }

    /// Attribute document persisted for the entity
    ///
    /// Object keys come out sorted, so equal records always produce equal bytes.
    pub fn attributes(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            TypedRecord::MarketSecurity(r) => serde_json::to_value(r),
            TypedRecord::DailyValuation(r) => serde_json::to_value(r),
            TypedRecord::Holding(r) => serde_json::to_value(r),
            TypedRecord::Transaction(r) => serde_json::to_value(r),
            TypedRecord::IndexPoint(r) => serde_json::to_value(r),
            TypedRecord::Product(r) => serde_json::to_value(r),
            TypedRecord::FundManager(r) => serde_json::to_value(r),
            TypedRecord::Amc(r) => serde_json::to_value(r),
            TypedRecord::Scheme(r) => serde_json::to_value(r),
        }
    }

    /// Domain rules that do not depend on persisted state
    pub fn validate(&self) -> Result<(), RecordError> {
        match self {
            TypedRecord::MarketSecurity(r) => {
                if !r.isin.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(RecordError::invalid("isin", &r.isin, "an alphanumeric code"));
                }
                non_negative("face_value", r.face_value)
            },
            TypedRecord::DailyValuation(r) => {
                non_negative("market_value", Some(r.market_value))?;
                non_negative("units", r.units)?;
                non_negative("nav", r.nav)
            },
            TypedRecord::Holding(r) => {
                non_negative("quantity", Some(r.quantity))?;
                non_negative("market_value", r.market_value)
            },
            TypedRecord::Transaction(r) => {
                non_negative("amount", Some(r.amount))?;
                non_negative("units", r.units)?;
                non_negative("price", r.price)
            },
            TypedRecord::IndexPoint(r) => {
                non_negative("close", Some(r.close))?;
                non_negative("open", r.open)?;
                non_negative("high", r.high)?;
                non_negative("low", r.low)?;
                match (r.high, r.low) {
                    (Some(high), Some(low)) if high < low => Err(RecordError::DomainRule(format!(
                        "high ({}) is below low ({})",
                        high, low
                    ))),
                    _ => Ok(()),
                }
            },
            TypedRecord::FundManager(r) => match r.experience_years {
                Some(years) if years < 0 => Err(RecordError::DomainRule(format!(
                    "experienceYears must not be negative, got {}",
                    years
                ))),
                _ => Ok(()),
            },
            TypedRecord::Product(_) | TypedRecord::Amc(_) | TypedRecord::Scheme(_) => Ok(()),
        }
    }

    /// Entities that must exist before this record can be applied
    pub fn references(&self) -> Vec<Reference> {
        match self {
            TypedRecord::Holding(r) => vec![Reference {
                field: "security_code",
                kind: EntityKind::MarketSecurity,
                key: r.security_code.clone(),
            }],
            TypedRecord::Scheme(Scheme {
                amc_id: Some(amc_id),
                ..
            }) => vec![Reference {
                field: "amcId",
                kind: EntityKind::Amc,
                key: amc_id.clone(),
            }],
            _ => Vec::new(),
        }
    }
}

fn non_negative(field: &'static str, value: Option<Decimal>) -> Result<(), RecordError> {
    match value {
        Some(v) if v.is_sign_negative() && !v.is_zero() => Err(RecordError::DomainRule(format!(
            "{} must not be negative, got {}",
            field, v
        ))),
        _ => Ok(()),
    }
}

/// Trimmed, upper-cased code (ISINs, investment ids, external ids)
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Trimmed free text, `None` when blank
pub fn normalize_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
