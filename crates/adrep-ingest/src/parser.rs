//! Row parser
//!
//! Converts one CSV row into an [`AdReportRecord`] using the resolved header.
//! Absent cells are skipped, present cells are converted according to their
//! column's [`ColumnKind`], and the finished record must carry all eleven
//! dimension fields.

use chrono::NaiveDate;
use csv::StringRecord;

use crate::error::RowError;
use crate::headers::ResolvedHeader;
use crate::models::{AdReportRecord, Column, ColumnKind, DimensionKey, Measures};

/// Accepted date layouts, tried in order
pub const DATE_FORMATS: [&str; 2] = ["%d-%m-%Y", "%Y-%m-%d"];

/// Whether a trimmed cell counts as "no value"
pub fn is_absent(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("null") || value.eq_ignore_ascii_case("n/a")
}

/// Parse a date cell, first matching format wins
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// Record under construction; every field starts absent
#[derive(Default)]
struct Draft {
    mobile_app_resolved_id: Option<String>,
    mobile_app_name: Option<String>,
    domain: Option<String>,
    ad_unit_name: Option<String>,
    ad_unit_id: Option<String>,
    inventory_format_name: Option<String>,
    operating_system_version_name: Option<String>,
    operating_system_name: Option<String>,
    country_name: Option<String>,
    country_criteria_id: Option<String>,
    date: Option<NaiveDate>,
    measures: Measures,
}

enum Value {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
}

fn convert(column: Column, raw: &str) -> Result<Value, RowError> {
    let mismatch = || RowError::TypeMismatch {
        column,
        value: raw.to_string(),
        expected: column.kind().expected(),
    };

    match column.kind() {
        ColumnKind::Text => Ok(Value::Text(raw.to_string())),
        ColumnKind::Integer => raw.parse::<i64>().map(Value::Integer).map_err(|_| mismatch()),
        ColumnKind::Decimal => match raw.parse::<f64>() {
            Ok(number) if number.is_finite() => Ok(Value::Decimal(number)),
            _ => Err(mismatch()),
        },
        ColumnKind::Date => parse_date(raw).map(Value::Date).ok_or_else(mismatch),
    }
}

impl Draft {
    fn set(&mut self, column: Column, value: Value) {
        match (column, value) {
            (Column::MobileAppResolvedId, Value::Text(v)) => self.mobile_app_resolved_id = Some(v),
            (Column::MobileAppName, Value::Text(v)) => self.mobile_app_name = Some(v),
            (Column::Domain, Value::Text(v)) => self.domain = Some(v),
            (Column::AdUnitName, Value::Text(v)) => self.ad_unit_name = Some(v),
            (Column::AdUnitId, Value::Text(v)) => self.ad_unit_id = Some(v),
            (Column::InventoryFormatName, Value::Text(v)) => self.inventory_format_name = Some(v),
            (Column::OperatingSystemVersionName, Value::Text(v)) => {
                self.operating_system_version_name = Some(v)
            },
            (Column::OperatingSystemName, Value::Text(v)) => self.operating_system_name = Some(v),
            (Column::CountryName, Value::Text(v)) => self.country_name = Some(v),
            (Column::CountryCriteriaId, Value::Text(v)) => self.country_criteria_id = Some(v),
            (Column::Date, Value::Date(v)) => self.date = Some(v),
            (Column::AdExchangeTotalRequests, Value::Integer(v)) => {
                self.measures.total_requests = Some(v)
            },
            (Column::AdExchangeResponsesServed, Value::Integer(v)) => {
                self.measures.responses_served = Some(v)
            },
            (Column::AdExchangeMatchRate, Value::Decimal(v)) => self.measures.match_rate = Some(v),
            (Column::AdExchangeLineItemLevelImpressions, Value::Integer(v)) => {
                self.measures.impressions = Some(v)
            },
            (Column::AdExchangeLineItemLevelClicks, Value::Integer(v)) => {
                self.measures.clicks = Some(v)
            },
            (Column::AdExchangeLineItemLevelCtr, Value::Decimal(v)) => self.measures.ctr = Some(v),
            (Column::AverageEcpm, Value::Decimal(v)) => self.measures.average_ecpm = Some(v),
            (Column::Payout, Value::Decimal(v)) => self.measures.payout = Some(v),
            (Column::AdExchangeCostPerClick, Value::Decimal(v)) => {
                self.measures.cost_per_click = Some(v)
            },
            // convert() derives the value variant from the column kind
            _ => {},
        }
    }

    fn missing_dimensions(&self) -> Vec<&'static str> {
        let present = [
            self.mobile_app_resolved_id.is_some(),
            self.mobile_app_name.is_some(),
            self.domain.is_some(),
            self.ad_unit_name.is_some(),
            self.ad_unit_id.is_some(),
            self.inventory_format_name.is_some(),
            self.operating_system_version_name.is_some(),
            self.operating_system_name.is_some(),
            self.country_name.is_some(),
            self.country_criteria_id.is_some(),
            self.date.is_some(),
        ];

        Column::DIMENSIONS
            .iter()
            .zip(present)
            .filter(|(_, present)| !present)
            .map(|(column, _)| column.name())
            .collect()
    }

    fn finish(self) -> Result<AdReportRecord, RowError> {
        let missing = self.missing_dimensions();
        if !missing.is_empty() {
            return Err(RowError::MissingRequiredFields(missing));
        }

        match self {
            Draft {
                mobile_app_resolved_id: Some(mobile_app_resolved_id),
                mobile_app_name: Some(mobile_app_name),
                domain: Some(domain),
                ad_unit_name: Some(ad_unit_name),
                ad_unit_id: Some(ad_unit_id),
                inventory_format_name: Some(inventory_format_name),
                operating_system_version_name: Some(operating_system_version_name),
                operating_system_name: Some(operating_system_name),
                country_name: Some(country_name),
                country_criteria_id: Some(country_criteria_id),
                date: Some(date),
                measures,
            } => Ok(AdReportRecord {
                key: DimensionKey {
                    mobile_app_resolved_id,
                    mobile_app_name,
                    domain,
                    ad_unit_name,
                    ad_unit_id,
                    inventory_format_name,
                    operating_system_version_name,
                    operating_system_name,
                    country_name,
                    country_criteria_id,
                    date,
                },
                measures,
            }),
            _ => Err(RowError::MissingRequiredFields(Vec::new())),
        }
    }
}

/// Parse one data row against the resolved header
///
/// Cells under unrecognized header columns and cells beyond the header width
/// are ignored. A row shorter than the header is rejected.
pub fn parse_row(header: &ResolvedHeader, row: &StringRecord) -> Result<AdReportRecord, RowError> {
    if row.len() < header.len() {
        return Err(RowError::ColumnCountMismatch {
            expected: header.len(),
            found: row.len(),
        });
    }

    let mut draft = Draft::default();
    for (index, cell) in row.iter().take(header.len()).enumerate() {
        let value = cell.trim();
        if is_absent(value) {
            continue;
        }
        let Some(column) = header.column_at(index) else {
            continue;
        };
        draft.set(column, convert(column, value)?);
    }

    draft.finish()
}
