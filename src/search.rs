// src/search.rs

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::SearchBackendConfig;
use crate::error::SearchError;
use crate::models::{Batch, FacilityHit, IndustryCodes, MatchQuery, RegionCodes};

/// Per-query outcome inside a completed round trip. A query-level error never
/// prevents the other queries in the batch from carrying their own result.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Hit(FacilityHit),
    NoCandidate,
    Error(SearchError),
}

/// Abstraction over the external geo-indexed search backend. One call is one
/// network round trip for the whole batch; the returned outcomes are parallel
/// to `batch.queries`. `Err` means the batch failed as a unit.
#[async_trait]
pub trait GeoSearchClient: Send + Sync {
    async fn execute(&self, batch: &Batch) -> Result<Vec<QueryOutcome>, SearchError>;
}

/// Elasticsearch `_msearch` implementation. The connection is shared
/// read-only across workers; a per-call timeout bounds worst-case latency.
pub struct EsSearchClient {
    http_client: Client,
    msearch_url: String,
    index: String,
    auth: Option<(String, String)>,
}

impl EsSearchClient {
    pub fn new(config: &SearchBackendConfig) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client for the search backend")?;

        let auth = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };

        Ok(Self {
            http_client,
            msearch_url: format!("{}/_msearch", config.base_url.trim_end_matches('/')),
            index: config.index.clone(),
            auth,
        })
    }

    /// msearch is newline-delimited JSON: a header line naming the index,
    /// then the query body, per query.
    fn build_body(&self, batch: &Batch) -> String {
        let mut body = String::new();
        for query in &batch.queries {
            let header = json!({ "index": self.index });
            let search = json!({
                "query": {
                    "bool": {
                        "must": [
                            { "term": { "place_type": query.place_type.as_str() } },
                            {
                                "geo_distance": {
                                    "distance": format!("{}m", query.radius_m),
                                    "location": { "lat": query.lat, "lon": query.lon }
                                }
                            }
                        ]
                    }
                },
                "sort": [{
                    "_geo_distance": {
                        "location": { "lat": query.lat, "lon": query.lon },
                        "order": "asc",
                        "unit": "m"
                    }
                }],
                "size": 1,
                "_source": true
            });
            body.push_str(&header.to_string());
            body.push('\n');
            body.push_str(&search.to_string());
            body.push('\n');
        }
        body
    }
}

#[async_trait]
impl GeoSearchClient for EsSearchClient {
    async fn execute(&self, batch: &Batch) -> Result<Vec<QueryOutcome>, SearchError> {
        let body = self.build_body(batch);

        let mut request = self
            .http_client
            .post(&self.msearch_url)
            .header("Content-Type", "application/x-ndjson")
            .body(body);
        if let Some((user, pass)) = &self.auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await.map_err(SearchError::from)?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SearchError::Auth(status.as_u16()));
        }
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let parsed: MsearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))?;

        if parsed.responses.len() != batch.len() {
            return Err(SearchError::InvalidResponse(format!(
                "expected {} responses, got {}",
                batch.len(),
                parsed.responses.len()
            )));
        }

        debug!(
            "msearch round trip: {} queries, {} responses",
            batch.len(),
            parsed.responses.len()
        );

        Ok(batch
            .queries
            .iter()
            .zip(parsed.responses)
            .map(|(query, response)| query_outcome(query, response))
            .collect())
    }
}

fn query_outcome(query: &MatchQuery, response: QueryResponse) -> QueryOutcome {
    if let Some(error) = response.error {
        return QueryOutcome::Error(SearchError::Query(error.to_string()));
    }

    let hits = match response.hits {
        Some(hits) => hits,
        None => {
            return QueryOutcome::Error(SearchError::InvalidResponse(
                "response without hits or error".to_string(),
            ))
        }
    };

    let hit = match hits.hits.into_iter().next() {
        Some(hit) => hit,
        None => return QueryOutcome::NoCandidate,
    };

    let distance_m = match hit.sort.first() {
        Some(distance) => *distance,
        None => {
            return QueryOutcome::Error(SearchError::InvalidResponse(
                "hit without geo_distance sort value".to_string(),
            ))
        }
    };

    let source = hit.source;
    let code = if query.place_type.is_school() {
        source.fac_cd
    } else {
        source.corp_cd
    };
    let code = match code {
        Some(code) => code,
        None => {
            return QueryOutcome::Error(SearchError::InvalidResponse(format!(
                "hit without a facility code for {}",
                query.place_type
            )))
        }
    };

    let industry = if query.place_type.is_school() {
        None
    } else {
        Some(IndustryCodes {
            corp_depth1_cd: source.corp_depth1_cd,
            corp_depth2_cd: source.corp_depth2_cd,
            corp_depth3_cd: source.corp_depth3_cd,
            corp_depth4_cd: source.corp_depth4_cd,
            corp_depth5_cd: source.corp_depth5_cd,
        })
    };

    QueryOutcome::Hit(FacilityHit {
        code,
        distance_m,
        region: RegionCodes {
            ctp_cd: source.ctp_cd,
            sig_cd: source.sig_cd,
            emd_cd: source.emd_cd,
        },
        industry,
    })
}

//------------------------------------------------------------------------------
// WIRE TYPES
//------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MsearchResponse {
    responses: Vec<QueryResponse>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    hits: Option<HitsEnvelope>,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    hits: Vec<HitEntry>,
}

#[derive(Debug, Deserialize)]
struct HitEntry {
    #[serde(default)]
    sort: Vec<f64>,
    #[serde(rename = "_source", default)]
    source: SourceDoc,
}

#[derive(Debug, Default, Deserialize)]
struct SourceDoc {
    #[serde(default)]
    fac_cd: Option<String>,
    #[serde(default)]
    corp_cd: Option<String>,
    #[serde(default)]
    ctp_cd: Option<String>,
    #[serde(default)]
    sig_cd: Option<String>,
    #[serde(default)]
    emd_cd: Option<String>,
    #[serde(default)]
    corp_depth1_cd: Option<String>,
    #[serde(default)]
    corp_depth2_cd: Option<String>,
    #[serde(default)]
    corp_depth3_cd: Option<String>,
    #[serde(default)]
    corp_depth4_cd: Option<String>,
    #[serde(default)]
    corp_depth5_cd: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlaceType, PointId};

    fn query(place_type: PlaceType) -> MatchQuery {
        MatchQuery {
            point_id: PointId("p1".into()),
            lat: 37.5665,
            lon: 126.978,
            place_type,
            radius_m: 200,
        }
    }

    fn client() -> EsSearchClient {
        EsSearchClient::new(&SearchBackendConfig {
            base_url: "http://localhost:9200".into(),
            index: "places".into(),
            username: None,
            password: None,
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn msearch_body_is_ndjson_pairs() {
        let batch = Batch {
            queries: vec![query(PlaceType::HighSchool), query(PlaceType::HighSchool)],
        };
        let body = client().build_body(&batch);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);

        let header: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(header["index"], "places");

        let search: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(search["size"], 1);
        assert_eq!(
            search["query"]["bool"]["must"][0]["term"]["place_type"],
            "high_school"
        );
        assert_eq!(
            search["query"]["bool"]["must"][1]["geo_distance"]["distance"],
            "200m"
        );
        assert_eq!(search["sort"][0]["_geo_distance"]["order"], "asc");
        assert_eq!(search["sort"][0]["_geo_distance"]["unit"], "m");
        assert!(body.ends_with('\n'));
    }

    fn response_from(json: serde_json::Value) -> QueryResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn school_hit_parses_to_facility() {
        let response = response_from(serde_json::json!({
            "hits": {
                "total": { "value": 1 },
                "hits": [{
                    "sort": [85.0],
                    "_source": {
                        "fac_cd": "S123",
                        "ctp_cd": "11",
                        "sig_cd": "11140",
                        "emd_cd": "1114055"
                    }
                }]
            }
        }));
        match query_outcome(&query(PlaceType::HighSchool), response) {
            QueryOutcome::Hit(hit) => {
                assert_eq!(hit.code, "S123");
                assert_eq!(hit.distance_m, 85.0);
                assert_eq!(hit.region.emd_cd.as_deref(), Some("1114055"));
                assert!(hit.industry.is_none());
            }
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn company_hit_carries_industry_depths() {
        let response = response_from(serde_json::json!({
            "hits": {
                "total": { "value": 1 },
                "hits": [{
                    "sort": [42.5],
                    "_source": {
                        "corp_cd": "C900",
                        "corp_depth1_cd": "A",
                        "corp_depth2_cd": "A1",
                        "ctp_cd": "26"
                    }
                }]
            }
        }));
        match query_outcome(&query(PlaceType::Company), response) {
            QueryOutcome::Hit(hit) => {
                assert_eq!(hit.code, "C900");
                let industry = hit.industry.expect("company hit has industry codes");
                assert_eq!(industry.corp_depth1_cd.as_deref(), Some("A"));
                assert_eq!(industry.corp_depth2_cd.as_deref(), Some("A1"));
                assert!(industry.corp_depth3_cd.is_none());
            }
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn empty_hits_is_no_candidate() {
        let response = response_from(serde_json::json!({
            "hits": { "total": { "value": 0 }, "hits": [] }
        }));
        assert_eq!(
            query_outcome(&query(PlaceType::HighSchool), response),
            QueryOutcome::NoCandidate
        );
    }

    #[test]
    fn query_level_error_does_not_become_a_hit() {
        let response = response_from(serde_json::json!({
            "error": { "type": "search_phase_execution_exception" }
        }));
        match query_outcome(&query(PlaceType::HighSchool), response) {
            QueryOutcome::Error(SearchError::Query(_)) => {}
            other => panic!("expected query error, got {:?}", other),
        }
    }

    #[test]
    fn missing_code_is_an_invalid_response() {
        let response = response_from(serde_json::json!({
            "hits": {
                "total": { "value": 1 },
                "hits": [{ "sort": [10.0], "_source": { "ctp_cd": "11" } }]
            }
        }));
        match query_outcome(&query(PlaceType::HighSchool), response) {
            QueryOutcome::Error(SearchError::InvalidResponse(_)) => {}
            other => panic!("expected invalid response, got {:?}", other),
        }
    }
}
