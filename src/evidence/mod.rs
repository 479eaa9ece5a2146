/// Evidence documents: the fixed set of report fields covered by a fingerprint.
///
/// An [`EvidenceDocument`] is rebuilt from a report every time a fingerprint
/// is needed (at anchor time and at every verification) and is never stored.
/// Values are normalized to fixed types before encoding:
/// - coordinates become fixed six-decimal strings
/// - timestamps become RFC 3339 UTC strings (`2025-01-01T00:00:00Z`)
/// - booleans stay literal `true`/`false`
/// - absent optional fields become `null`
///
/// The media reference field (`ipfs_cid`) is always written as `null`,
/// even once the media content id is known. Documents anchored before the
/// upload finished used `null`, and verification must reproduce the same
/// bytes. As a consequence the media content id is NOT covered by the
/// fingerprint; changing it requires a new document format version.
pub mod canonical;
pub mod fingerprint;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{IntegrityError, Result};
use crate::state::models::Report;

pub use canonical::encode;
pub use fingerprint::{fingerprint, Fingerprint};

/// Field names of an evidence document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvidenceField {
    ReportId,
    ReferenceCode,
    Category,
    Description,
    Latitude,
    Longitude,
    LocationDescription,
    MediaCid,
    Timestamp,
    IsAnonymous,
}

impl EvidenceField {
    pub const ALL: [EvidenceField; 10] = [
        EvidenceField::ReportId,
        EvidenceField::ReferenceCode,
        EvidenceField::Category,
        EvidenceField::Description,
        EvidenceField::Latitude,
        EvidenceField::Longitude,
        EvidenceField::LocationDescription,
        EvidenceField::MediaCid,
        EvidenceField::Timestamp,
        EvidenceField::IsAnonymous,
    ];

    /// Fields that must carry a non-null value for a document to encode.
    pub const REQUIRED: [EvidenceField; 6] = [
        EvidenceField::ReportId,
        EvidenceField::ReferenceCode,
        EvidenceField::Category,
        EvidenceField::Description,
        EvidenceField::Timestamp,
        EvidenceField::IsAnonymous,
    ];

    /// Staff-editable fields reported when a fingerprint mismatch is found.
    pub const MONITORED: [EvidenceField; 7] = [
        EvidenceField::Category,
        EvidenceField::Description,
        EvidenceField::LocationDescription,
        EvidenceField::Latitude,
        EvidenceField::Longitude,
        EvidenceField::IsAnonymous,
        EvidenceField::MediaCid,
    ];

    /// Key used in the canonical encoding.
    pub const fn key(self) -> &'static str {
        match self {
            EvidenceField::ReportId => "report_id",
            EvidenceField::ReferenceCode => "reference_code",
            EvidenceField::Category => "category",
            EvidenceField::Description => "description",
            EvidenceField::Latitude => "latitude",
            EvidenceField::Longitude => "longitude",
            EvidenceField::LocationDescription => "location_description",
            EvidenceField::MediaCid => "ipfs_cid",
            EvidenceField::Timestamp => "timestamp",
            EvidenceField::IsAnonymous => "is_anonymous",
        }
    }

    pub fn is_required(self) -> bool {
        Self::REQUIRED.contains(&self)
    }
}

impl fmt::Display for EvidenceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl Serialize for EvidenceField {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.key())
    }
}

/// A latitude or longitude held exactly, in millionths of a degree.
///
/// Six decimal places is the precision reports are stored with, so the
/// canonical string form never depends on float formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coordinate(i64);

impl Coordinate {
    const SCALE: i64 = 1_000_000;
    const MAX_LATITUDE: i64 = 90 * Self::SCALE;
    const MAX_LONGITUDE: i64 = 180 * Self::SCALE;

    pub const fn from_micro_degrees(micro: i64) -> Self {
        Self(micro)
    }

    /// Round a float to the nearest micro-degree. Anything outside ±180 is
    /// rejected; use [`Coordinate::validate_latitude`] for the tighter
    /// latitude range.
    pub fn from_degrees(degrees: f64) -> Result<Self> {
        if !degrees.is_finite() || degrees.abs() > 180.0 {
            return Err(IntegrityError::InvalidCoordinate(degrees.to_string()));
        }
        Ok(Self((degrees * Self::SCALE as f64).round() as i64))
    }

    /// Reject values outside ±90 degrees.
    pub fn validate_latitude(self) -> Result<Self> {
        if self.0.abs() > Self::MAX_LATITUDE {
            return Err(IntegrityError::InvalidCoordinate(format!("latitude {self}")));
        }
        Ok(self)
    }

    /// Reject values outside ±180 degrees.
    pub fn validate_longitude(self) -> Result<Self> {
        if self.0.abs() > Self::MAX_LONGITUDE {
            return Err(IntegrityError::InvalidCoordinate(format!("longitude {self}")));
        }
        Ok(self)
    }

    pub const fn micro_degrees(self) -> i64 {
        self.0
    }

    pub fn degrees(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = Self::SCALE as u64;
        write!(f, "{sign}{}.{:06}", abs / scale, abs % scale)
    }
}

impl FromStr for Coordinate {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || IntegrityError::InvalidCoordinate(s.to_string());
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty()
            || frac.len() > 6
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        if whole > 180 {
            return Err(invalid());
        }
        let frac_value: i64 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<6}").parse().map_err(|_| invalid())?
        };
        let micro = whole * Self::SCALE + frac_value;
        if micro > Self::MAX_LONGITUDE {
            return Err(invalid());
        }
        Ok(Self(if negative { -micro } else { micro }))
    }
}

impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Coordinate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Coordinate::from_degrees(n).map_err(serde::de::Error::custom),
        }
    }
}

/// A normalized evidence value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Text(String),
    Bool(bool),
    Coordinate(Coordinate),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Canonical JSON form of this value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Coordinate(c) => serde_json::Value::String(c.to_string()),
            FieldValue::Timestamp(t) => {
                serde_json::Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl From<Option<Coordinate>> for FieldValue {
    fn from(value: Option<Coordinate>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::Coordinate)
    }
}

/// The evidentiary fields of one report, keyed by field name.
///
/// Insertion order is irrelevant: the canonical encoder sorts keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidenceDocument {
    fields: BTreeMap<EvidenceField, FieldValue>,
}

impl EvidenceDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from `(field, value)` pairs in any order.
    /// A later pair for the same field replaces an earlier one.
    pub fn from_fields<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (EvidenceField, FieldValue)>,
    {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Build the document for a report's current state.
    ///
    /// The media reference is written as the `null` placeholder regardless
    /// of `report.media_cid`; see the module documentation.
    pub fn from_report(report: &Report) -> Self {
        Self::from_fields([
            (EvidenceField::ReportId, FieldValue::text(report.id.to_string())),
            (
                EvidenceField::ReferenceCode,
                FieldValue::text(&report.reference_code),
            ),
            (
                EvidenceField::Category,
                FieldValue::text(report.category.as_str()),
            ),
            (
                EvidenceField::Description,
                FieldValue::text(&report.description),
            ),
            (EvidenceField::Latitude, report.latitude.into()),
            (EvidenceField::Longitude, report.longitude.into()),
            (
                EvidenceField::LocationDescription,
                FieldValue::text(&report.location_description),
            ),
            (EvidenceField::MediaCid, FieldValue::Null),
            (EvidenceField::Timestamp, FieldValue::Timestamp(report.created_at)),
            (EvidenceField::IsAnonymous, FieldValue::Bool(report.is_anonymous)),
        ])
    }

    pub fn set(&mut self, field: EvidenceField, value: FieldValue) {
        self.fields.insert(field, value);
    }

    pub fn get(&self, field: EvidenceField) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    /// Canonical value for `field`, with absent fields as `null`.
    pub fn value_of(&self, field: EvidenceField) -> serde_json::Value {
        self.fields
            .get(&field)
            .map_or(serde_json::Value::Null, FieldValue::to_json)
    }

    /// Encode and hash this document in one step.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        let bytes = encode(self)?;
        Ok(fingerprint(&bytes))
    }
}
