//! Ad inventory report records
//!
//! A record is identified by an 11-field dimension tuple ([`DimensionKey`]) and
//! carries a set of optional numeric measures ([`Measures`]). The storage layer
//! enforces uniqueness on exactly the dimension tuple and overwrites measures on
//! conflict.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-unique import job identifier
pub type JobId = u64;

/// How a column's cells are converted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Decimal,
    Date,
}

impl ColumnKind {
    /// Human-readable shape used in type mismatch errors
    pub fn expected(self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Integer => "an integer",
            ColumnKind::Decimal => "a decimal number",
            ColumnKind::Date => "a date (dd-MM-yyyy or yyyy-MM-dd)",
        }
    }
}

/// Canonical report columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    MobileAppResolvedId,
    MobileAppName,
    Domain,
    AdUnitName,
    AdUnitId,
    InventoryFormatName,
    OperatingSystemVersionName,
    OperatingSystemName,
    CountryName,
    CountryCriteriaId,
    Date,
    AdExchangeTotalRequests,
    AdExchangeResponsesServed,
    AdExchangeMatchRate,
    AdExchangeLineItemLevelImpressions,
    AdExchangeLineItemLevelClicks,
    AdExchangeLineItemLevelCtr,
    AverageEcpm,
    Payout,
    AdExchangeCostPerClick,
}

impl Column {
    /// The 11 columns forming the uniqueness key, all mandatory
    pub const DIMENSIONS: [Column; 11] = [
        Column::MobileAppResolvedId,
        Column::MobileAppName,
        Column::Domain,
        Column::AdUnitName,
        Column::AdUnitId,
        Column::InventoryFormatName,
        Column::OperatingSystemVersionName,
        Column::OperatingSystemName,
        Column::CountryName,
        Column::CountryCriteriaId,
        Column::Date,
    ];

    pub const MEASURES: [Column; 9] = [
        Column::AdExchangeTotalRequests,
        Column::AdExchangeResponsesServed,
        Column::AdExchangeMatchRate,
        Column::AdExchangeLineItemLevelImpressions,
        Column::AdExchangeLineItemLevelClicks,
        Column::AdExchangeLineItemLevelCtr,
        Column::AverageEcpm,
        Column::Payout,
        Column::AdExchangeCostPerClick,
    ];

    /// Canonical (storage) column name
    pub fn name(self) -> &'static str {
        match self {
            Column::MobileAppResolvedId => "mobile_app_resolved_id",
            Column::MobileAppName => "mobile_app_name",
            Column::Domain => "domain",
            Column::AdUnitName => "ad_unit_name",
            Column::AdUnitId => "ad_unit_id",
            Column::InventoryFormatName => "inventory_format_name",
            Column::OperatingSystemVersionName => "operating_system_version_name",
            Column::OperatingSystemName => "operating_system_name",
            Column::CountryName => "country_name",
            Column::CountryCriteriaId => "country_criteria_id",
            Column::Date => "date",
            Column::AdExchangeTotalRequests => "ad_exchange_total_requests",
            Column::AdExchangeResponsesServed => "ad_exchange_responses_served",
            Column::AdExchangeMatchRate => "ad_exchange_match_rate",
            Column::AdExchangeLineItemLevelImpressions => {
                "ad_exchange_line_item_level_impressions"
            },
            Column::AdExchangeLineItemLevelClicks => "ad_exchange_line_item_level_clicks",
            Column::AdExchangeLineItemLevelCtr => "ad_exchange_line_item_level_ctr",
            Column::AverageEcpm => "average_ecpm",
            Column::Payout => "payout",
            Column::AdExchangeCostPerClick => "ad_exchange_cost_per_click",
        }
    }

    /// Look up a column by its canonical name
    pub fn from_name(name: &str) -> Option<Column> {
        Column::DIMENSIONS
            .iter()
            .chain(Column::MEASURES.iter())
            .copied()
            .find(|column| column.name() == name)
    }

    pub fn kind(self) -> ColumnKind {
        match self {
            Column::Date => ColumnKind::Date,
            Column::AdExchangeTotalRequests
            | Column::AdExchangeResponsesServed
            | Column::AdExchangeLineItemLevelImpressions
            | Column::AdExchangeLineItemLevelClicks => ColumnKind::Integer,
            Column::AdExchangeMatchRate
            | Column::AdExchangeLineItemLevelCtr
            | Column::AverageEcpm
            | Column::Payout
            | Column::AdExchangeCostPerClick => ColumnKind::Decimal,
            _ => ColumnKind::Text,
        }
    }

    pub fn is_dimension(self) -> bool {
        Column::DIMENSIONS.contains(&self)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The 11-field uniqueness key of a stored record
///
/// Every field is present and non-blank; values are trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimensionKey {
    pub mobile_app_resolved_id: String,
    pub mobile_app_name: String,
    pub domain: String,
    pub ad_unit_name: String,
    pub ad_unit_id: String,
    pub inventory_format_name: String,
    pub operating_system_version_name: String,
    pub operating_system_name: String,
    pub country_name: String,
    pub country_criteria_id: String,
    pub date: NaiveDate,
}

/// Performance measures; an absent cell stays `None`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measures {
    pub total_requests: Option<i64>,
    pub responses_served: Option<i64>,
    pub match_rate: Option<f64>,
    pub impressions: Option<i64>,
    pub clicks: Option<i64>,
    pub ctr: Option<f64>,
    pub average_ecpm: Option<f64>,
    pub payout: Option<f64>,
    pub cost_per_click: Option<f64>,
}

/// One validated, immutable report row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdReportRecord {
    pub key: DimensionKey,
    pub measures: Measures,
}
