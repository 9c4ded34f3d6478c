use serde::{Deserialize, Serialize};
use std::fmt;

/// A single city record as stored in the shared table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CityRecord {
    /// Caller-assigned unique identifier
    pub id: i64,
    /// City name
    pub name: String,
    /// Region the city belongs to
    pub region: String,
    /// District the city belongs to
    pub district: String,
    /// Number of inhabitants. Negative values are accepted as-is.
    pub population: i64,
    /// Year the city was founded. Negative values are accepted as-is.
    pub foundation: i64,
}

impl CityRecord {
    /// Render the record the way `GET /cities/{id}` returns it (no id)
    pub fn details(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.name, self.region, self.district, self.population, self.foundation
        )
    }

    /// Render the record as one backup file row
    pub fn to_backup_row(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.id, self.name, self.region, self.district, self.population, self.foundation
        )
    }

    /// Whether the text fields can be written to the backup file unescaped
    pub fn is_backup_safe(&self) -> bool {
        [&self.name, &self.region, &self.district]
            .iter()
            .all(|field| !field.contains(|c: char| c == ',' || c == '\n' || c == '\r'))
    }
}

/// List rows are all six fields joined by spaces
impl fmt::Display for CityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.details())
    }
}

/// Body of `PUT /cities/{id}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PopulationUpdate {
    pub value: i64,
}

/// Body of `POST /info/region` and `POST /info/district`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringQuery {
    pub request: String,
}

/// Wire shape of a range filter. Missing bounds decode as `0`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RangeRequest {
    #[serde(default)]
    pub min_value: i64,
    #[serde(default)]
    pub max_value: i64,
}

/// Column a range filter applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeField {
    Population,
    Foundation,
}

impl RangeField {
    /// Column name in the `citydata` table
    pub fn column(&self) -> &'static str {
        match self {
            RangeField::Population => "population",
            RangeField::Foundation => "foundation",
        }
    }
}

impl fmt::Display for RangeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Inclusive range filter with an optional upper bound.
///
/// On the wire `max_value == 0` means "no upper bound", so an upper bound of
/// exactly zero cannot be requested. The conversion from [`RangeRequest`]
/// keeps that behaviour; `max` is `None` whenever the wire value was zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeQuery {
    pub min: i64,
    pub max: Option<i64>,
}

impl RangeQuery {
    /// `false` when an upper bound is present and lies below `min`
    pub fn is_valid(&self) -> bool {
        match self.max {
            Some(max) => self.min <= max,
            None => true,
        }
    }

    /// Message returned when no record falls inside the range
    pub fn none_found_message(&self, field: RangeField) -> String {
        match self.max {
            Some(max) => format!(
                "No cities were found with {} range from {} to {}",
                field, self.min, max
            ),
            None => format!(
                "No cities were found with {} starting from {}",
                field, self.min
            ),
        }
    }
}

impl From<RangeRequest> for RangeQuery {
    fn from(req: RangeRequest) -> Self {
        Self {
            min: req.min_value,
            max: (req.max_value != 0).then_some(req.max_value),
        }
    }
}

/// Render list results, one record per line
pub fn render_rows(records: &[CityRecord]) -> String {
    records.iter().map(|r| format!("{}\n", r)).collect()
}
