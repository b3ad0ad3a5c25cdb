// src/models.rs

use serde::{Deserialize, Serialize};

//------------------------------------------------------------------------------
// IDENTIFIER TYPES
//------------------------------------------------------------------------------
// Using newtype pattern for type safety to prevent mixing different ID types

/// Strongly typed identifier for input point records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointId(pub String);

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//------------------------------------------------------------------------------
// FACILITY CATEGORIES
//------------------------------------------------------------------------------

/// Facility category with its own search radius in the backend index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceType {
    HighSchool,
    University,
    Company,
}

impl PlaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceType::HighSchool => "high_school",
            PlaceType::University => "university",
            PlaceType::Company => "company",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high_school" => Some(PlaceType::HighSchool),
            "university" => Some(PlaceType::University),
            "company" => Some(PlaceType::Company),
            _ => None,
        }
    }

    /// Whether the backend documents for this category carry school facility
    /// codes (`fac_cd`) rather than company codes (`corp_cd`).
    pub fn is_school(&self) -> bool {
        matches!(self, PlaceType::HighSchool | PlaceType::University)
    }
}

impl std::fmt::Display for PlaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//------------------------------------------------------------------------------
// INPUT RECORDS
//------------------------------------------------------------------------------

/// Raw input record as it appears on an NDJSON line. Coordinates are optional
/// here so that incomplete rows can be rejected with a counter instead of a
/// parse failure.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPointRecord {
    #[serde(alias = "adid")]
    pub id: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub time_type: Option<String>,
}

/// A validated user location point. Immutable once produced by the reader;
/// rows with missing or non-finite coordinates never become one of these.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPoint {
    pub id: PointId,
    pub lat: f64,
    pub lon: f64,
}

//------------------------------------------------------------------------------
// QUERIES AND BATCHES
//------------------------------------------------------------------------------

/// A single nearest-facility query, derived 1:1 from a valid point for a
/// category. The backend returns at most one candidate, sorted by distance.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchQuery {
    pub point_id: PointId,
    pub lat: f64,
    pub lon: f64,
    pub place_type: PlaceType,
    pub radius_m: u32,
}

/// Ordered group of queries sent to the backend in one round trip. Owned by a
/// single worker until its completion arrives.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub queries: Vec<MatchQuery>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

//------------------------------------------------------------------------------
// MATCH RESULTS
//------------------------------------------------------------------------------

/// Administrative-region codes attached to a facility document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionCodes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctp_cd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_cd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emd_cd: Option<String>,
}

/// Industry-classification depth codes carried by company documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndustryCodes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corp_depth1_cd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corp_depth2_cd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corp_depth3_cd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corp_depth4_cd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corp_depth5_cd: Option<String>,
}

/// The single nearest candidate within a query's radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityHit {
    pub code: String,
    pub distance_m: f64,
    #[serde(default)]
    pub region: RegionCodes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<IndustryCodes>,
}

/// Why a query ended as a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Connection,
    BackendRejected,
    AuthRejected,
    InvalidResponse,
    QueryError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Connection => "connection",
            FailureKind::BackendRejected => "backend_rejected",
            FailureKind::AuthRejected => "auth_rejected",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::QueryError => "query_error",
        }
    }
}

/// Terminal outcome for one query. `Unmatched` (nothing within radius) and
/// `Failed` (query error after retries) are deliberately distinct: folding
/// them together would hide backend health inside the match rate.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(FacilityHit),
    Unmatched,
    Failed(FailureKind),
}

/// Exactly one of these is produced per valid point per requested category.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub point_id: PointId,
    pub lat: f64,
    pub lon: f64,
    pub place_type: PlaceType,
    pub outcome: MatchOutcome,
}

impl MatchResult {
    pub fn to_row(&self) -> OutputRow {
        let (status, hit, failure_reason) = match &self.outcome {
            MatchOutcome::Matched(hit) => ("matched", Some(hit), None),
            MatchOutcome::Unmatched => ("unmatched", None, None),
            MatchOutcome::Failed(kind) => ("failed", None, Some(kind.as_str())),
        };
        OutputRow {
            point_id: self.point_id.clone(),
            lat: self.lat,
            lon: self.lon,
            place_type: self.place_type,
            status: status.to_string(),
            distance_m: hit.map(|h| h.distance_m),
            facility_code: hit.map(|h| h.code.clone()),
            region: hit.map(|h| h.region.clone()).unwrap_or_default(),
            industry: hit.and_then(|h| h.industry.clone()),
            failure_reason: failure_reason.map(str::to_string),
        }
    }
}

//------------------------------------------------------------------------------
// OUTPUT RECORDS
//------------------------------------------------------------------------------

/// One NDJSON output line. Every valid input point produces exactly one row;
/// matched, unmatched and failed rows are told apart by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRow {
    pub point_id: PointId,
    pub lat: f64,
    pub lon: f64,
    pub place_type: PlaceType,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility_code: Option<String>,
    #[serde(flatten)]
    pub region: RegionCodes,
    #[serde(flatten)]
    pub industry: Option<IndustryCodes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn place_type_round_trips_through_str() {
        for pt in [PlaceType::HighSchool, PlaceType::University, PlaceType::Company] {
            assert_eq!(PlaceType::parse(pt.as_str()), Some(pt));
        }
        assert_eq!(PlaceType::parse("kindergarten"), None);
    }

    #[test]
    fn matched_row_carries_hit_fields() {
        let result = MatchResult {
            point_id: PointId("p1".into()),
            lat: 37.5665,
            lon: 126.978,
            place_type: PlaceType::HighSchool,
            outcome: MatchOutcome::Matched(FacilityHit {
                code: "F001".into(),
                distance_m: 85.0,
                region: RegionCodes {
                    ctp_cd: Some("11".into()),
                    sig_cd: Some("11140".into()),
                    emd_cd: None,
                },
                industry: None,
            }),
        };
        let row = result.to_row();
        assert_eq!(row.status, "matched");
        assert_eq!(row.distance_m, Some(85.0));
        assert_eq!(row.facility_code.as_deref(), Some("F001"));
        assert_eq!(row.region.ctp_cd.as_deref(), Some("11"));
        assert!(row.failure_reason.is_none());
    }

    #[test]
    fn failed_row_carries_reason_only() {
        let result = MatchResult {
            point_id: PointId("p2".into()),
            lat: 0.0,
            lon: 0.0,
            place_type: PlaceType::Company,
            outcome: MatchOutcome::Failed(FailureKind::Timeout),
        };
        let row = result.to_row();
        assert_eq!(row.status, "failed");
        assert!(row.distance_m.is_none());
        assert!(row.facility_code.is_none());
        assert_eq!(row.failure_reason.as_deref(), Some("timeout"));
    }

    #[test]
    fn output_row_serializes_without_empty_optionals() {
        let result = MatchResult {
            point_id: PointId("p3".into()),
            lat: 1.0,
            lon: 2.0,
            place_type: PlaceType::University,
            outcome: MatchOutcome::Unmatched,
        };
        let json = serde_json::to_value(result.to_row()).unwrap();
        assert_eq!(json["status"], "unmatched");
        assert!(json.get("distance_m").is_none());
        assert!(json.get("facility_code").is_none());
        assert!(json.get("failure_reason").is_none());
    }
}
