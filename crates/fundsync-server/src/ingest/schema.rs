//! Strict per-upload-type row schemas
//!
//! Each upload type has a fixed set of columns. Headers are matched
//! case-insensitively; unknown or missing required columns reject the whole
//! file, while a bad cell only rejects its row.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;

use super::error::RecordError;
use super::records::{
    normalize_code, normalize_text, DailyValuation, Holding, IndexPoint, MarketSecurity,
    Transaction, TransactionType, TypedRecord,
};
use super::types::{FileType, UploadType};

/// Date layouts accepted in uploads, tried in order
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub required: bool,
}

const fn required(name: &'static str) -> Column {
    Column {
        name,
        required: true,
    }
}

const fn optional(name: &'static str) -> Column {
    Column {
        name,
        required: false,
    }
}

const MARKET_LIST_COLUMNS: &[Column] = &[
    required("isin"),
    required("name"),
    optional("security_type"),
    optional("exchange"),
    optional("sector"),
    optional("face_value"),
];

const DAILY_VALUATION_COLUMNS: &[Column] = &[
    required("investment_id"),
    required("valuation_date"),
    required("market_value"),
    optional("units"),
    optional("nav"),
];

const HOLDINGS_COLUMNS: &[Column] = &[
    required("investment_id"),
    required("security_code"),
    required("valuation_date"),
    required("quantity"),
    optional("market_value"),
];

const TRANSACTION_COLUMNS: &[Column] = &[
    required("investment_id"),
    required("order_date"),
    required("transaction_type"),
    required("amount"),
    optional("units"),
    optional("price"),
    optional("security_code"),
    optional("remarks"),
];

const INDEX_HISTORY_COLUMNS: &[Column] = &[
    required("index_code"),
    required("date"),
    required("close"),
    optional("open"),
    optional("high"),
    optional("low"),
];

pub fn columns(upload_type: UploadType) -> &'static [Column] {
    match upload_type {
        UploadType::MarketList => MARKET_LIST_COLUMNS,
        UploadType::DailyValuation => DAILY_VALUATION_COLUMNS,
        UploadType::Holdings => HOLDINGS_COLUMNS,
        UploadType::Transaction => TRANSACTION_COLUMNS,
        UploadType::IndexHistory => INDEX_HISTORY_COLUMNS,
    }
}

/// Columns forming the natural key, in key order
fn key_columns(upload_type: UploadType) -> &'static [&'static str] {
    match upload_type {
        UploadType::MarketList => &["isin"],
        UploadType::DailyValuation => &["investment_id", "valuation_date"],
        UploadType::Holdings => &["investment_id", "security_code", "valuation_date"],
        UploadType::Transaction => &["investment_id", "order_date", "transaction_type", "amount"],
        UploadType::IndexHistory => &["index_code", "date"],
    }
}

/// Render the header-only template file for an upload type
pub fn template(upload_type: UploadType, file_type: FileType) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(file_type.delimiter())
        .from_writer(Vec::new());
    writer.write_record(columns(upload_type).iter().map(|c| c.name))?;
    writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Mapping from a file's header to the schema columns
#[derive(Debug, Clone)]
pub struct RowLayout {
    upload_type: UploadType,
    /// For each header position, the index of its schema column
    slots: Vec<usize>,
}

impl RowLayout {
    pub fn resolve<'a, I>(upload_type: UploadType, headers: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let schema = columns(upload_type);
        let mut slots = Vec::new();
        let mut seen = HashSet::new();

        for raw in headers {
            let name = normalize_header(raw);
            let index = schema
                .iter()
                .position(|c| c.name == name)
                .ok_or_else(|| format!("unknown column '{}'", raw.trim()))?;
            if !seen.insert(index) {
                return Err(format!("duplicate column '{}'", name));
            }
            slots.push(index);
        }

        let missing: Vec<&str> = schema
            .iter()
            .enumerate()
            .filter(|(i, c)| c.required && !seen.contains(i))
            .map(|(_, c)| c.name)
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required column(s): {}", missing.join(", ")));
        }

        Ok(Self { upload_type, slots })
    }

    pub fn width(&self) -> usize {
        self.slots.len()
    }

    /// Decode one data row; `line` is the 1-based line number in the file
    ///
    /// On failure returns the identifier to report alongside the error.
    pub fn decode(&self, row: &csv::StringRecord, line: u64) -> Result<TypedRecord, (String, RecordError)> {
        let cells = self.cells(row);

        if row.len() != self.width() {
            return Err((
                cells.identifier(line),
                RecordError::ColumnCount {
                    expected: self.width(),
                    found: row.len(),
                },
            ));
        }

        build_record(self.upload_type, &cells).map_err(|e| (cells.identifier(line), e))
    }

    fn cells<'r>(&self, row: &'r csv::StringRecord) -> Cells<'r> {
        let schema = columns(self.upload_type);
        let mut values = vec![None; schema.len()];
        for (position, value) in row.iter().enumerate() {
            if let Some(&index) = self.slots.get(position) {
                let value = value.trim();
                if !value.is_empty() {
                    values[index] = Some(value);
                }
            }
        }
        Cells {
            upload_type: self.upload_type,
            schema,
            values,
        }
    }
}

struct Cells<'r> {
    upload_type: UploadType,
    schema: &'static [Column],
    values: Vec<Option<&'r str>>,
}

impl<'r> Cells<'r> {
    fn get(&self, name: &str) -> Option<&'r str> {
        self.schema
            .iter()
            .position(|c| c.name == name)
            .and_then(|i| self.values[i])
    }

    fn require(&self, name: &str) -> Result<&'r str, RecordError> {
        self.get(name).ok_or_else(|| RecordError::missing(name))
    }

    /// Key cells in natural-key form joined by `|`, or `row N` when any key cell is blank
    fn identifier(&self, line: u64) -> String {
        let parts: Option<Vec<String>> = key_columns(self.upload_type)
            .iter()
            .map(|name| self.get(name).map(|raw| key_part(name, raw)))
            .collect();
        match parts {
            Some(parts) => parts.join("|"),
            None => format!("row {}", line),
        }
    }

    fn text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(normalize_text)
    }

    fn code(&self, name: &str) -> Option<String> {
        self.get(name).map(normalize_code)
    }

    fn required_text(&self, name: &str) -> Result<String, RecordError> {
        self.require(name).map(|v| v.to_string())
    }

    fn required_code(&self, name: &str) -> Result<String, RecordError> {
        self.require(name).map(normalize_code)
    }

    fn required_date(&self, name: &str) -> Result<NaiveDate, RecordError> {
        parse_date(name, self.require(name)?)
    }

    fn required_decimal(&self, name: &str) -> Result<Decimal, RecordError> {
        parse_decimal(name, self.require(name)?)
    }

    fn decimal(&self, name: &str) -> Result<Option<Decimal>, RecordError> {
        self.get(name).map(|v| parse_decimal(name, v)).transpose()
    }
}

/// Render one key cell the way [`TypedRecord::natural_key`] does, falling back to the raw code
fn key_part(column: &str, raw: &str) -> String {
    let canonical = match column {
        "valuation_date" | "order_date" | "date" => parse_date(column, raw).ok().map(|d| d.to_string()),
        "amount" => parse_decimal(column, raw).ok().map(|d| d.to_string()),
        "transaction_type" => TransactionType::from_str(raw).ok().map(|t| t.as_str().to_string()),
        _ => None,
    };
    canonical.unwrap_or_else(|| normalize_code(raw))
}

fn build_record(upload_type: UploadType, cells: &Cells<'_>) -> Result<TypedRecord, RecordError> {
    let record = match upload_type {
        UploadType::MarketList => TypedRecord::MarketSecurity(MarketSecurity {
            isin: cells.required_code("isin")?,
            name: cells.required_text("name")?,
            security_type: cells.text("security_type"),
            exchange: cells.code("exchange"),
            sector: cells.text("sector"),
            face_value: cells.decimal("face_value")?,
        }),
        UploadType::DailyValuation => TypedRecord::DailyValuation(DailyValuation {
            investment_id: cells.required_code("investment_id")?,
            valuation_date: cells.required_date("valuation_date")?,
            market_value: cells.required_decimal("market_value")?,
            units: cells.decimal("units")?,
            nav: cells.decimal("nav")?,
        }),
        UploadType::Holdings => TypedRecord::Holding(Holding {
            investment_id: cells.required_code("investment_id")?,
            security_code: cells.required_code("security_code")?,
            valuation_date: cells.required_date("valuation_date")?,
            quantity: cells.required_decimal("quantity")?,
            market_value: cells.decimal("market_value")?,
        }),
        UploadType::Transaction => {
            let raw_type = cells.require("transaction_type")?;
            let transaction_type = TransactionType::from_str(raw_type).map_err(|_| {
                RecordError::invalid(
                    "transaction_type",
                    raw_type,
                    "one of BUY, SELL, SWITCH_IN, SWITCH_OUT, DIVIDEND, REDEMPTION",
                )
            })?;
            TypedRecord::Transaction(Transaction {
                investment_id: cells.required_code("investment_id")?,
                order_date: cells.required_date("order_date")?,
                transaction_type,
                amount: cells.required_decimal("amount")?,
                units: cells.decimal("units")?,
                price: cells.decimal("price")?,
                security_code: cells.code("security_code"),
                remarks: cells.text("remarks"),
            })
        },
        UploadType::IndexHistory => TypedRecord::IndexPoint(IndexPoint {
            index_code: cells.required_code("index_code")?,
            date: cells.required_date("date")?,
            close: cells.required_decimal("close")?,
            open: cells.decimal("open")?,
            high: cells.decimal("high")?,
            low: cells.decimal("low")?,
        }),
    };
    Ok(record)
}

pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, RecordError> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .ok_or_else(|| RecordError::invalid(field, raw, "a date (YYYY-MM-DD)"))
}

/// Parse a decimal, dropping trailing zeros
///
/// Commas are accepted only as thousands separators in the integer part
/// (`1,500.50`); anything else with a comma (`1,5`) is rejected.
pub fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, RecordError> {
    let raw = raw.trim();
    let invalid = || RecordError::invalid(field, raw, "a decimal number");

    let cleaned = strip_thousands(raw).ok_or_else(invalid)?;
    Decimal::from_str(&cleaned)
        .map(|d| d.normalize())
        .map_err(|_| invalid())
}

fn strip_thousands(raw: &str) -> Option<String> {
    if !raw.contains(',') {
        return Some(raw.to_string());
    }

    let unsigned = raw.trim_start_matches(['-', '+']);
    let sign = &raw[..raw.len() - unsigned.len()];
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (unsigned, None),
    };
    if fraction.is_some_and(|f| f.contains(',')) {
        return None;
    }

    let mut groups = integer.split(',');
    let leading = groups.next()?;
    let leading_ok = (1..=3).contains(&leading.len()) && leading.bytes().all(|b| b.is_ascii_digit());
    if !leading_ok || !groups.all(|g| g.len() == 3 && g.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }

    let mut cleaned = format!("{}{}", sign, integer.replace(',', ""));
    if let Some(fraction) = fraction {
        cleaned.push('.');
        cleaned.push_str(fraction);
    }
    Some(cleaned)
}
