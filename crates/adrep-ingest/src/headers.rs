//! Header alias resolution
//!
//! Exported reports label their columns with display names ("App ID",
//! "Ad Unit", ...). Each header cell is trimmed and looked up in [`ALIASES`];
//! canonical storage names are accepted verbatim. Cells that match neither pass
//! through unchanged and are reported as unexpected.

use csv::StringRecord;

use crate::error::HeaderError;
use crate::models::Column;

/// Known display names and the canonical column they map to
pub static ALIASES: &[(&str, Column)] = &[
    ("App ID", Column::MobileAppResolvedId),
    ("App Name", Column::MobileAppName),
    ("Domain", Column::Domain),
    ("Ad Unit", Column::AdUnitName),
    ("Ad Unit ID", Column::AdUnitId),
    ("Inventory Format", Column::InventoryFormatName),
    ("OS Version", Column::OperatingSystemVersionName),
    ("OS", Column::OperatingSystemName),
    ("Operating System", Column::OperatingSystemName),
    ("Country", Column::CountryName),
    ("Country ID", Column::CountryCriteriaId),
    ("Country Criteria ID", Column::CountryCriteriaId),
    ("Date", Column::Date),
    ("Total Requests", Column::AdExchangeTotalRequests),
    ("Responses Served", Column::AdExchangeResponsesServed),
    ("Match Rate", Column::AdExchangeMatchRate),
    ("Impressions", Column::AdExchangeLineItemLevelImpressions),
    ("Clicks", Column::AdExchangeLineItemLevelClicks),
    ("CTR", Column::AdExchangeLineItemLevelCtr),
    ("Average eCPM", Column::AverageEcpm),
    ("Payout", Column::Payout),
    ("Cost Per Click", Column::AdExchangeCostPerClick),
    ("CPC", Column::AdExchangeCostPerClick),
];

/// Map one raw header cell to its canonical column
pub fn lookup(cell: &str) -> Option<Column> {
    let cell = cell.trim();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == cell)
        .map(|(_, column)| *column)
        .or_else(|| Column::from_name(cell))
}

/// A header row with every cell resolved to a canonical column where possible
#[derive(Debug, Clone)]
pub struct ResolvedHeader {
    cells: Vec<HeaderCell>,
}

#[derive(Debug, Clone)]
struct HeaderCell {
    name: String,
    column: Option<Column>,
}

impl ResolvedHeader {
    pub fn resolve(raw: &StringRecord) -> Self {
        let cells = raw
            .iter()
            .map(|cell| {
                let column = lookup(cell);
                let name = match column {
                    Some(column) => column.name().to_string(),
                    None => cell.trim().to_string(),
                };
                HeaderCell { name, column }
            })
            .collect();

        Self { cells }
    }

    /// Number of cells in the header row
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Resolved names in input order
    pub fn names(&self) -> Vec<&str> {
        self.cells.iter().map(|cell| cell.name.as_str()).collect()
    }

    /// Canonical column at a given position, if the cell was recognized
    pub fn column_at(&self, index: usize) -> Option<Column> {
        self.cells.get(index).and_then(|cell| cell.column)
    }

    /// Non-blank header cells that map to no known column
    pub fn unexpected(&self) -> Vec<&str> {
        self.cells
            .iter()
            .filter(|cell| cell.column.is_none() && !cell.name.is_empty())
            .map(|cell| cell.name.as_str())
            .collect()
    }

    /// Every dimension column must appear somewhere in the header
    pub fn validate(&self) -> Result<(), HeaderError> {
        let missing: Vec<Column> = Column::DIMENSIONS
            .iter()
            .copied()
            .filter(|dimension| !self.cells.iter().any(|cell| cell.column == Some(*dimension)))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(HeaderError::MissingColumns(missing))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_header() -> StringRecord {
        StringRecord::from(vec![
            "App ID",
            "App Name",
            "Domain",
            "Ad Unit",
            "Ad Unit ID",
            "Inventory Format",
            "OS Version",
            "operating_system_name",
            "country_name",
            "Country ID",
            "Date",
            "Payout",
        ])
    }

    #[test]
    fn test_aliases_resolve_to_canonical_names() {
        let header = ResolvedHeader::resolve(&full_header());
        let names = header.names();
        assert_eq!(names[0], "mobile_app_resolved_id");
        assert_eq!(names[3], "ad_unit_name");
        assert_eq!(names[9], "country_criteria_id");
        assert_eq!(names[11], "payout");
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_cells_are_trimmed_before_lookup() {
        assert_eq!(lookup("  Ad Unit ID "), Some(Column::AdUnitId));
        assert_eq!(lookup("ad unit id"), None);
    }

    #[test]
    fn test_unknown_cells_pass_through() {
        let header = ResolvedHeader::resolve(&StringRecord::from(vec![" Publisher ", "Date", ""]));
        assert_eq!(header.names(), vec!["Publisher", "date", ""]);
        assert_eq!(header.unexpected(), vec!["Publisher"]);
        assert_eq!(header.column_at(0), None);
        assert_eq!(header.column_at(1), Some(Column::Date));
    }

    #[test]
    fn test_missing_dimensions_are_all_reported() {
        let header = ResolvedHeader::resolve(&StringRecord::from(vec![
            "App ID",
            "App Name",
            "Ad Unit",
            "Ad Unit ID",
            "Inventory Format",
            "OS Version",
            "OS",
            "Country",
            "Country ID",
            "Impressions",
        ]));

        match header.validate() {
            Err(HeaderError::MissingColumns(missing)) => {
                assert_eq!(missing, vec![Column::Domain, Column::Date]);
            },
            other => panic!("expected missing columns, got {:?}", other),
        }
    }

    #[test]
    fn test_measures_are_optional() {
        let header = ResolvedHeader::resolve(&StringRecord::from(
            Column::DIMENSIONS.iter().map(|c| c.name()).collect::<Vec<_>>(),
        ));
        assert!(header.validate().is_ok());
        assert_eq!(header.len(), 11);
    }
}
