//! Age-visibility filter for list and count queries

use serde::Deserialize;

use super::ValidationError;

/// Users are visible only when strictly older than this.
pub const VISIBILITY_THRESHOLD: i64 = 21;

/// Default number of users returned by a list query
pub const DEFAULT_LIMIT: u32 = 10;

/// Maximum number of users returned by a list query
pub const MAX_LIMIT: u32 = 100;

/// Validated list parameters: `age > min_age`, at most `limit` results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeFilter {
    pub min_age: i64,
    pub limit: u32,
}

impl AgeFilter {
    /// Create a filter, rejecting limits outside `1..=MAX_LIMIT`.
    pub fn new(min_age: i64, limit: u32) -> Result<Self, ValidationError> {
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(limit_out_of_range());
        }
        Ok(Self { min_age, limit })
    }
}

impl Default for AgeFilter {
    fn default() -> Self {
        Self {
            min_age: VISIBILITY_THRESHOLD,
            limit: DEFAULT_LIMIT,
        }
    }
}

fn limit_out_of_range() -> ValidationError {
    ValidationError::OutOfRange {
        field: "limit",
        min: 1,
        max: MAX_LIMIT as i64,
    }
}

/// Raw query parameters for `GET /users`.
///
/// Kept as strings so non-numeric input is reported as a validation error
/// rather than an extractor rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgeFilterParams {
    #[serde(rename = "minAge")]
    pub min_age: Option<String>,
    pub limit: Option<String>,
}

impl TryFrom<AgeFilterParams> for AgeFilter {
    type Error = ValidationError;

    fn try_from(params: AgeFilterParams) -> Result<Self, Self::Error> {
        let min_age = match params.min_age.as_deref().map(str::trim) {
            None => VISIBILITY_THRESHOLD,
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| ValidationError::NotNumeric { field: "minAge" })?,
        };

        let limit = match params.limit.as_deref().map(str::trim) {
            None => DEFAULT_LIMIT,
            Some(raw) => {
                let value = raw
                    .parse::<i64>()
                    .map_err(|_| ValidationError::NotNumeric { field: "limit" })?;
                u32::try_from(value).map_err(|_| limit_out_of_range())?
            }
        };

        Self::new(min_age, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min_age: Option<&str>, limit: Option<&str>) -> AgeFilterParams {
        AgeFilterParams {
            min_age: min_age.map(String::from),
            limit: limit.map(String::from),
        }
    }

    #[test]
    fn defaults_apply() {
        let filter = AgeFilter::try_from(params(None, None)).unwrap();
        assert_eq!(filter, AgeFilter::default());
        assert_eq!(filter.min_age, 21);
        assert_eq!(filter.limit, 10);
    }

    #[test]
    fn parses_numbers() {
        let filter = AgeFilter::try_from(params(Some("30"), Some("100"))).unwrap();
        assert_eq!(filter.min_age, 30);
        assert_eq!(filter.limit, 100);
    }

    #[test]
    fn rejects_non_numeric() {
        assert_eq!(
            AgeFilter::try_from(params(Some("abc"), None)).unwrap_err(),
            ValidationError::NotNumeric { field: "minAge" }
        );
        assert_eq!(
            AgeFilter::try_from(params(None, Some("ten"))).unwrap_err(),
            ValidationError::NotNumeric { field: "limit" }
        );
        assert!(AgeFilter::try_from(params(Some(""), None)).is_err());
    }

    #[test]
    fn rejects_limit_out_of_range() {
        for raw in ["0", "101", "-5"] {
            assert!(
                matches!(
                    AgeFilter::try_from(params(None, Some(raw))),
                    Err(ValidationError::OutOfRange { field: "limit", .. })
                ),
                "limit {raw} should be rejected"
            );
        }
        assert!(AgeFilter::new(0, 1).is_ok());
    }
}
