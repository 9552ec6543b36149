//! CF-encoded temporal coordinates.
//!
//! xarray stores datetimes as integer (or float) offsets from a reference instant, described by a `units` attribute such as `"minutes since 2023-01-01 00:00:00"`.
//! Partitions written separately may use different references, so offsets are decoded to nanoseconds since the Unix epoch before they are compared.

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::dataset::{Variable, VariableData};

/// The CF `units` attribute.
pub const UNITS_ATTRIBUTE: &str = "units";

/// The CF `calendar` attribute.
pub const CALENDAR_ATTRIBUTE: &str = "calendar";

/// The not-a-time sentinel, the smallest `i64`, as written by numpy and xarray for missing datetimes.
///
/// It decodes and encodes to itself in every encoding.
pub const NAT: i64 = i64::MIN;

/// A temporal coordinate decoding error.
#[derive(Debug, Error)]
pub enum TimeEncodingError {
    /// The `units` attribute is not of the form `<unit> since <reference>`.
    #[error("invalid time units {0:?}")]
    InvalidUnits(String),
    /// The calendar is not a Gregorian calendar.
    #[error("unsupported calendar {0:?}")]
    UnsupportedCalendar(String),
    /// The values are not numeric.
    #[error("temporal values of type {0} are not supported")]
    UnsupportedElementType(crate::dataset::ElementType),
    /// A raw (unitless) temporal value is not an integer.
    #[error("temporal value {0} is not an integer")]
    NonIntegral(f64),
    /// A value cannot be represented as nanoseconds since the Unix epoch.
    #[error("temporal value out of range")]
    OutOfRange,
}

/// A unit of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// Nanoseconds.
    Nanoseconds,
    /// Microseconds.
    Microseconds,
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
}

impl TimeUnit {
    fn parse(unit: &str) -> Option<Self> {
        match unit.to_ascii_lowercase().as_str() {
            "nanoseconds" | "nanosecond" | "ns" => Some(Self::Nanoseconds),
            "microseconds" | "microsecond" | "us" => Some(Self::Microseconds),
            "milliseconds" | "millisecond" | "ms" => Some(Self::Milliseconds),
            "seconds" | "second" | "secs" | "sec" | "s" => Some(Self::Seconds),
            "minutes" | "minute" | "mins" | "min" => Some(Self::Minutes),
            "hours" | "hour" | "hrs" | "hr" | "h" => Some(Self::Hours),
            "days" | "day" | "d" => Some(Self::Days),
            _ => None,
        }
    }

    /// The length of the unit in nanoseconds.
    #[must_use]
    pub const fn nanoseconds(self) -> i64 {
        match self {
            Self::Nanoseconds => 1,
            Self::Microseconds => 1_000,
            Self::Milliseconds => 1_000_000,
            Self::Seconds => 1_000_000_000,
            Self::Minutes => 60 * 1_000_000_000,
            Self::Hours => 3_600 * 1_000_000_000,
            Self::Days => 86_400 * 1_000_000_000,
        }
    }
}

/// A CF time encoding: a unit and a reference instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeEncoding {
    units: String,
    unit: TimeUnit,
    reference: i64,
}

impl TimeEncoding {
    /// Parse CF `units`, e.g. `"minutes since 2023-01-01 00:00:00"`.
    ///
    /// # Errors
    /// Returns [`TimeEncodingError::InvalidUnits`] if `units` cannot be parsed or the reference is out of range.
    pub fn parse(units: &str) -> Result<Self, TimeEncodingError> {
        let invalid = || TimeEncodingError::InvalidUnits(units.to_string());
        let (unit, reference) = units.trim().split_once(" since ").ok_or_else(invalid)?;
        let unit = TimeUnit::parse(unit.trim()).ok_or_else(invalid)?;
        let reference = parse_reference(reference.trim()).ok_or_else(invalid)?;
        let reference = reference
            .and_utc()
            .timestamp_nanos_opt()
            .ok_or_else(invalid)?;
        Ok(Self {
            units: units.to_string(),
            unit,
            reference,
        })
    }

    /// Nanoseconds since `1970-01-01T00:00:00`.
    #[must_use]
    pub fn unix_nanoseconds() -> Self {
        Self {
            units: "nanoseconds since 1970-01-01T00:00:00".to_string(),
            unit: TimeUnit::Nanoseconds,
            reference: 0,
        }
    }

    /// Read the encoding from variable attributes.
    ///
    /// Returns [`None`] if there is no `units` attribute, or it does not describe an offset from a reference time.
    ///
    /// # Errors
    /// Returns a [`TimeEncodingError`] if the calendar is not Gregorian or the reference time is invalid.
    pub fn from_attributes(
        attributes: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Option<Self>, TimeEncodingError> {
        if let Some(calendar) = attributes.get(CALENDAR_ATTRIBUTE).and_then(|c| c.as_str()) {
            if !matches!(
                calendar.to_ascii_lowercase().as_str(),
                "standard" | "gregorian" | "proleptic_gregorian"
            ) {
                return Err(TimeEncodingError::UnsupportedCalendar(calendar.to_string()));
            }
        }
        match attributes.get(UNITS_ATTRIBUTE).and_then(|u| u.as_str()) {
            Some(units) if units.contains(" since ") => Self::parse(units).map(Some),
            _ => Ok(None),
        }
    }

    /// The `units` attribute value.
    #[must_use]
    pub fn units(&self) -> &str {
        &self.units
    }

    /// The unit of the offsets.
    #[must_use]
    pub const fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Decode offsets to nanoseconds since the Unix epoch.
    ///
    /// [`NAT`] and floating point NaN decode to [`NAT`].
    ///
    /// # Errors
    /// Returns a [`TimeEncodingError`] if the values are not numeric or out of range.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn decode(&self, data: &VariableData) -> Result<Vec<i64>, TimeEncodingError> {
        let unit = self.unit.nanoseconds();
        if let Some(values) = data.to_i64_values() {
            values
                .into_iter()
                .map(|value| {
                    if value == NAT {
                        return Ok(NAT);
                    }
                    value
                        .checked_mul(unit)
                        .and_then(|offset| offset.checked_add(self.reference))
                        .ok_or(TimeEncodingError::OutOfRange)
                })
                .collect()
        } else if let Some(values) = data.to_f64_values() {
            values
                .into_iter()
                .map(|value| {
                    if value.is_nan() {
                        return Ok(NAT);
                    }
                    let offset = (value * unit as f64).round();
                    if offset.is_finite() && offset.abs() < i64::MAX as f64 {
                        (offset as i64)
                            .checked_add(self.reference)
                            .ok_or(TimeEncodingError::OutOfRange)
                    } else {
                        Err(TimeEncodingError::OutOfRange)
                    }
                })
                .collect()
        } else {
            Err(TimeEncodingError::UnsupportedElementType(data.element_type()))
        }
    }

    /// Encode nanoseconds since the Unix epoch as offsets in this encoding.
    ///
    /// Returns [`None`] if any instant is not an exact multiple of the unit from the reference.
    #[must_use]
    pub fn encode(&self, instants: &[i64]) -> Option<Vec<i64>> {
        let unit = self.unit.nanoseconds();
        instants
            .iter()
            .map(|&instant| {
                if instant == NAT {
                    return Some(NAT);
                }
                let offset = instant.checked_sub(self.reference)?;
                (offset % unit == 0).then_some(offset / unit)
            })
            .collect()
    }
}

fn parse_reference(reference: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    let reference = reference
        .strip_suffix("UTC")
        .or_else(|| reference.strip_suffix('Z'))
        .or_else(|| reference.strip_suffix("+00:00"))
        .unwrap_or(reference)
        .trim();
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(reference, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(reference, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// The merge keys of a temporal coordinate: nanoseconds since the Unix epoch if CF-encoded, otherwise the raw integer values.
///
/// # Errors
/// Returns a [`TimeEncodingError`] if the coordinate cannot be decoded.
#[allow(clippy::cast_possible_truncation)]
pub fn temporal_keys(variable: &Variable) -> Result<Vec<i64>, TimeEncodingError> {
    if let Some(encoding) = TimeEncoding::from_attributes(variable.attributes())? {
        return encoding.decode(variable.data());
    }
    let data = variable.data();
    if let Some(values) = data.to_i64_values() {
        Ok(values)
    } else if let Some(values) = data.to_f64_values() {
        values
            .into_iter()
            .map(|value| {
                if value.fract() == 0.0 && value.abs() < 9.0e18 {
                    Ok(value as i64)
                } else {
                    Err(TimeEncodingError::NonIntegral(value))
                }
            })
            .collect()
    } else {
        Err(TimeEncodingError::UnsupportedElementType(data.element_type()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const MINUTE: i64 = 60_000_000_000;
    // 2023-01-01T00:00:00Z
    const JAN_2023: i64 = 1_672_531_200_000_000_000;

    #[test]
    fn parse_units() {
        let encoding = TimeEncoding::parse("minutes since 2023-01-01 00:00:00").unwrap();
        assert_eq!(encoding.unit(), TimeUnit::Minutes);
        assert_eq!(encoding.reference, JAN_2023);
        for units in [
            "minutes since 2023-01-01",
            "minutes since 2023-01-01T00:00:00",
            "minutes since 2023-01-01T00:00:00Z",
            "minutes since 2023-01-01 00:00:00.000000",
            "minutes since 2023-01-01 00:00",
        ] {
            assert_eq!(TimeEncoding::parse(units).unwrap().reference, JAN_2023, "{units}");
        }
        assert!(TimeEncoding::parse("fortnights since 2023-01-01").is_err());
        assert!(TimeEncoding::parse("minutes after 2023-01-01").is_err());
        assert!(TimeEncoding::parse("minutes since yesterday").is_err());
    }

    #[test]
    fn decode_encode() {
        let encoding = TimeEncoding::parse("minutes since 2023-01-01").unwrap();
        let data = VariableData::from(array![0i64, 1, 1440].into_dyn());
        let instants = encoding.decode(&data).unwrap();
        assert_eq!(instants, vec![JAN_2023, JAN_2023 + MINUTE, JAN_2023 + 1440 * MINUTE]);
        assert_eq!(encoding.encode(&instants), Some(vec![0, 1, 1440]));
        assert_eq!(encoding.encode(&[JAN_2023 + 1]), None);

        let data = VariableData::from(array![0.5f64].into_dyn());
        assert_eq!(encoding.decode(&data).unwrap(), vec![JAN_2023 + MINUTE / 2]);

        let unix = TimeEncoding::unix_nanoseconds();
        assert_eq!(unix.encode(&[JAN_2023 + 1]), Some(vec![JAN_2023 + 1]));
    }

    #[test]
    fn not_a_time_passes_through() {
        let encoding = TimeEncoding::parse("days since 2023-01-01").unwrap();
        let data = VariableData::from(array![NAT, 1].into_dyn());
        let instants = encoding.decode(&data).unwrap();
        assert_eq!(instants, vec![NAT, JAN_2023 + 1440 * MINUTE]);
        assert_eq!(encoding.encode(&instants), Some(vec![NAT, 1]));

        let data = VariableData::from(array![f64::NAN, 0.0].into_dyn());
        assert_eq!(encoding.decode(&data).unwrap(), vec![NAT, JAN_2023]);

        let data = VariableData::from(array![NAT + 1].into_dyn());
        assert!(matches!(
            encoding.decode(&data),
            Err(TimeEncodingError::OutOfRange)
        ));
    }

    #[test]
    fn different_references_decode_to_same_instants() {
        let january = TimeEncoding::parse("minutes since 2023-01-01").unwrap();
        let february = TimeEncoding::parse("days since 2023-02-01").unwrap();
        let a = january
            .decode(&VariableData::from(array![31i64 * 1440].into_dyn()))
            .unwrap();
        let b = february
            .decode(&VariableData::from(array![0i64].into_dyn()))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn attributes() {
        let serde_json::Value::Object(attributes) = serde_json::json!({
            "units": "hours since 2000-01-01",
            "calendar": "proleptic_gregorian",
        }) else {
            unreachable!()
        };
        let encoding = TimeEncoding::from_attributes(&attributes).unwrap().unwrap();
        assert_eq!(encoding.unit(), TimeUnit::Hours);

        let serde_json::Value::Object(attributes) = serde_json::json!({
            "units": "hours since 2000-01-01",
            "calendar": "360_day",
        }) else {
            unreachable!()
        };
        assert!(matches!(
            TimeEncoding::from_attributes(&attributes),
            Err(TimeEncodingError::UnsupportedCalendar(_))
        ));

        let serde_json::Value::Object(attributes) = serde_json::json!({ "units": "MW" }) else {
            unreachable!()
        };
        assert!(TimeEncoding::from_attributes(&attributes).unwrap().is_none());
    }

    #[test]
    fn raw_keys() {
        let variable = Variable::new(["t"], array![3i32, 1, 2].into_dyn()).unwrap();
        assert_eq!(temporal_keys(&variable).unwrap(), vec![3, 1, 2]);
        let variable = Variable::new(["t"], array![1.5f64].into_dyn()).unwrap();
        assert!(matches!(
            temporal_keys(&variable),
            Err(TimeEncodingError::NonIntegral(_))
        ));
        let variable = Variable::new(["t"], array![true].into_dyn()).unwrap();
        assert!(matches!(
            temporal_keys(&variable),
            Err(TimeEncodingError::UnsupportedElementType(_))
        ));
    }
}
