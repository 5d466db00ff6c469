//! Optional route/ETA lookups for responders heading to an incident.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::CoordError;
use crate::models::Coordinates;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteEstimate {
    pub points: Vec<Coordinates>,
    pub distance_meters: f64,
    pub duration: Duration,
}

#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn route(&self, from: Coordinates, to: Coordinates) -> Result<RouteEstimate, CoordError>;
}

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    // GeoJSON order: [longitude, latitude]
    coordinates: Vec<[f64; 2]>,
}

fn into_estimate(resp: OsrmResponse) -> Result<RouteEstimate, CoordError> {
    match resp.code.as_str() {
        "Ok" => {}
        "NoRoute" | "NoSegment" => return Err(CoordError::NotFound("route".into())),
        other => {
            return Err(CoordError::UpstreamUnavailable(format!(
                "routing service answered {other}"
            )));
        }
    }
    let route = resp
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| CoordError::NotFound("route".into()))?;
    let duration = Duration::try_from_secs_f64(route.duration.max(0.0)).map_err(|e| {
        CoordError::UpstreamUnavailable(format!("route duration {}: {e}", route.duration))
    })?;
    Ok(RouteEstimate {
        points: route
            .geometry
            .coordinates
            .into_iter()
            .map(|[lon, lat]| Coordinates::new(lat, lon))
            .collect(),
        distance_meters: route.distance,
        duration,
    })
}

/// Client for an OSRM-compatible `route/v1` endpoint, walking profile.
pub struct OsrmClient {
    client: reqwest::Client,
    base_url: String,
}

impl OsrmClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CoordError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RoutingProvider for OsrmClient {
    async fn route(&self, from: Coordinates, to: Coordinates) -> Result<RouteEstimate, CoordError> {
        let url = format!(
            "{}/route/v1/foot/{},{};{},{}",
            self.base_url, from.longitude, from.latitude, to.longitude, to.latitude
        );
        let resp: OsrmResponse = self
            .client
            .get(url)
            .query(&[("overview", "full"), ("geometries", "geojson")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        into_estimate(resp)
    }
}
