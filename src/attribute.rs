//! Named per-line settings exposed to operators, and validation of raw values.
//!
//! Values arrive as text (a file write, a protocol field, a CLI argument), so
//! parsing happens here, before anything on the line is touched.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),
    #[error("value must be a non-negative integer, got '{0}'")]
    NotAnInteger(String),
    #[error("value must be non-negative, got {0}")]
    Negative(i64),
    #[error("value {0} is out of range")]
    OutOfRange(i64),
    #[error("enabled must be 0 or 1, got {0}")]
    NotBoolean(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Frequency,
    Enabled,
    OnCycles,
    OffCycles,
}

impl Attribute {
    pub const ALL: [Attribute; 4] = [
        Attribute::Enabled,
        Attribute::Frequency,
        Attribute::OnCycles,
        Attribute::OffCycles,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Attribute::Frequency => "frequency",
            Attribute::Enabled => "enabled",
            Attribute::OnCycles => "on_cycles",
            Attribute::OffCycles => "off_cycles",
        }
    }

    /// Parse a raw value for this attribute.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for non-integers, negative or oversized
    /// values, and `enabled` values other than 0 or 1.
    pub fn parse_value(self, raw: &str) -> Result<Setting, ValidationError> {
        let value = parse_unsigned(raw)?;
        let setting = match self {
            Attribute::Frequency => Setting::Frequency(value),
            Attribute::OnCycles => Setting::OnCycles(value),
            Attribute::OffCycles => Setting::OffCycles(value),
            Attribute::Enabled => match value {
                0 => Setting::Enabled(false),
                1 => Setting::Enabled(true),
                other => return Err(ValidationError::NotBoolean(other)),
            },
        };
        Ok(setting)
    }
}

impl core::str::FromStr for Attribute {
    type Err = ValidationError;

    /// Accepts the canonical names plus the short `freq` and `status` aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "frequency" | "freq" => Ok(Attribute::Frequency),
            "enabled" | "status" => Ok(Attribute::Enabled),
            "on_cycles" => Ok(Attribute::OnCycles),
            "off_cycles" => Ok(Attribute::OffCycles),
            other => Err(ValidationError::UnknownAttribute(other.to_string())),
        }
    }
}

impl core::fmt::Display for Attribute {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated configuration write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    Enabled(bool),
    Frequency(u32),
    OnCycles(u32),
    OffCycles(u32),
}

impl Setting {
    pub fn attribute(&self) -> Attribute {
        match self {
            Setting::Enabled(_) => Attribute::Enabled,
            Setting::Frequency(_) => Attribute::Frequency,
            Setting::OnCycles(_) => Attribute::OnCycles,
            Setting::OffCycles(_) => Attribute::OffCycles,
        }
    }
}

fn parse_unsigned(raw: &str) -> Result<u32, ValidationError> {
    let trimmed = raw.trim();
    let value: i64 = trimmed
        .parse()
        .map_err(|_| ValidationError::NotAnInteger(trimmed.to_string()))?;

    if value < 0 {
        return Err(ValidationError::Negative(value));
    }
    u32::try_from(value).map_err(|_| ValidationError::OutOfRange(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_names_and_aliases() {
        assert_eq!("frequency".parse::<Attribute>(), Ok(Attribute::Frequency));
        assert_eq!("freq".parse::<Attribute>(), Ok(Attribute::Frequency));
        assert_eq!("status".parse::<Attribute>(), Ok(Attribute::Enabled));
        assert_eq!("enabled".parse::<Attribute>(), Ok(Attribute::Enabled));
        assert_eq!("on_cycles".parse::<Attribute>(), Ok(Attribute::OnCycles));
        assert_eq!("off_cycles".parse::<Attribute>(), Ok(Attribute::OffCycles));
        assert_eq!(
            "duty".parse::<Attribute>(),
            Err(ValidationError::UnknownAttribute("duty".into()))
        );

        for attribute in Attribute::ALL {
            assert_eq!(attribute.name().parse::<Attribute>(), Ok(attribute));
        }
    }

    #[test]
    fn test_values_tolerate_trailing_newline() {
        assert_eq!(Attribute::Frequency.parse_value("100\n"), Ok(Setting::Frequency(100)));
        assert_eq!(Attribute::OnCycles.parse_value(" 3 "), Ok(Setting::OnCycles(3)));
        assert_eq!(Attribute::Enabled.parse_value("1\n"), Ok(Setting::Enabled(true)));
        assert_eq!(Attribute::Enabled.parse_value("0"), Ok(Setting::Enabled(false)));
    }

    #[test]
    fn test_rejects_negative_values() {
        assert_eq!(Attribute::Frequency.parse_value("-5"), Err(ValidationError::Negative(-5)));
        assert_eq!(Attribute::OffCycles.parse_value("-1"), Err(ValidationError::Negative(-1)));
    }

    #[test]
    fn test_rejects_malformed_values() {
        assert!(matches!(
            Attribute::Frequency.parse_value("fast"),
            Err(ValidationError::NotAnInteger(_))
        ));
        assert!(matches!(
            Attribute::OnCycles.parse_value("1.5"),
            Err(ValidationError::NotAnInteger(_))
        ));
        assert!(matches!(
            Attribute::OnCycles.parse_value(""),
            Err(ValidationError::NotAnInteger(_))
        ));
        assert_eq!(
            Attribute::Frequency.parse_value("4294967296"),
            Err(ValidationError::OutOfRange(4_294_967_296))
        );
    }

    #[test]
    fn test_enabled_must_be_boolean() {
        assert_eq!(Attribute::Enabled.parse_value("2"), Err(ValidationError::NotBoolean(2)));
    }

    #[test]
    fn test_setting_maps_back_to_attribute() {
        assert_eq!(Setting::OnCycles(4).attribute(), Attribute::OnCycles);
        assert_eq!(Setting::Enabled(true).attribute(), Attribute::Enabled);
    }
}
