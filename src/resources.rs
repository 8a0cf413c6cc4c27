// Typed wrappers for the BreweryDB endpoints. Each one only marshals its
// arguments into `Params` and makes a single `request` call.
use std::fmt;

use chrono::NaiveDate;

use crate::client::{ApiResponse, BreweryDbClient};
use crate::error::{BreweryDbError, Result};
use crate::params::{ParamValue, Params};
use crate::transport::HttpMethod;

pub const DEFAULT_GEO_RADIUS: f64 = 50.0;
pub const DEFAULT_GEO_UNITS: &str = "miles";

// Distance search around a point. Latitude and longitude are optional here
// so a half-filled filter is reported as a configuration error instead of
// being unrepresentable.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFilter {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius: f64,
    pub units: String,
}

impl Default for GeoFilter {
    fn default() -> Self {
        Self {
            lat: None,
            lng: None,
            radius: DEFAULT_GEO_RADIUS,
            units: DEFAULT_GEO_UNITS.to_string(),
        }
    }
}

impl GeoFilter {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat: Some(lat),
            lng: Some(lng),
            ..Default::default()
        }
    }

    pub fn radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreweriesQuery {
    pub page: u32,
    pub metadata: bool,
    // UTC date, only breweries added since then
    pub since: Option<NaiveDate>,
    pub geo: Option<GeoFilter>,
}

impl Default for BreweriesQuery {
    fn default() -> Self {
        Self {
            page: 1,
            metadata: true,
            since: None,
            geo: None,
        }
    }
}

impl BreweriesQuery {
    fn to_params(&self) -> Result<Params> {
        let mut params = Params::new();
        params
            .insert("page", self.page)
            .insert("metadata", self.metadata)
            .insert_opt("since", self.since);

        if let Some(geo) = &self.geo {
            let (lat, lng) = match (geo.lat, geo.lng) {
                (Some(lat), Some(lng)) => (lat, lng),
                _ => {
                    return Err(BreweryDbError::Configuration(
                        "If doing a geo search, lat and lng values are required".to_string(),
                    ))
                }
            };
            params
                .insert("geo", 1u32)
                .insert("lat", lat)
                .insert("lng", lng)
                .insert("radius", geo.radius)
                .insert("units", geo.units.as_str());
        }

        Ok(params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchKind {
    #[default]
    Any,
    Beer,
    Brewery,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Any => "",
            SearchKind::Beer => "beer",
            SearchKind::Brewery => "brewery",
        }
    }

    // Case-insensitive; only "", "beer" and "brewery" are accepted
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "" => Ok(SearchKind::Any),
            "beer" => Ok(SearchKind::Beer),
            "brewery" => Ok(SearchKind::Brewery),
            _ => Err(BreweryDbError::Configuration(
                "Type must be either \"beer\", \"brewery\", or empty".to_string(),
            )),
        }
    }
}

impl From<SearchKind> for String {
    fn from(kind: SearchKind) -> Self {
        kind.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub query: String,
    // Free-form so callers can pass through user input; validated on use
    pub kind: String,
    pub metadata: bool,
    pub page: u32,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            kind: String::new(),
            metadata: true,
            page: 1,
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn metadata(mut self, metadata: bool) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    fn to_params(&self) -> Result<Params> {
        let kind = SearchKind::parse(&self.kind)?;

        let mut params = Params::new();
        params
            .insert("q", self.query.as_str())
            .insert("page", self.page)
            .insert("metadata", self.metadata);
        if kind != SearchKind::Any {
            params.insert("type", kind.as_str());
        }
        Ok(params)
    }
}

fn paged(page: u32, metadata: bool, since: Option<NaiveDate>) -> Params {
    let mut params = Params::new();
    params
        .insert("page", page)
        .insert("metadata", metadata)
        .insert_opt("since", since);
    params
}

fn with_metadata(metadata: bool) -> Params {
    Params::new().with("metadata", metadata)
}

impl BreweryDbClient {
    // Breweries, 50 per page
    pub async fn breweries(&self, query: &BreweriesQuery) -> Result<ApiResponse> {
        let params = query.to_params()?;
        self.request("breweries", params, HttpMethod::Get).await
    }

    /// Breweries inside any of the given bounding boxes. Each box is sent as
    /// one element of the `b` array, so it can be a preformatted string or a
    /// list of coordinates.
    pub async fn breweries_by_bounding_boxes<B>(
        &self,
        boxes: Vec<B>,
        metadata: bool,
    ) -> Result<ApiResponse>
    where
        B: Into<ParamValue>,
    {
        if boxes.is_empty() {
            return Err(BreweryDbError::Configuration(
                "If doing a map route search, an array of lat and lng bounds are required"
                    .to_string(),
            ));
        }

        let params = Params::new()
            .with("b", ParamValue::from(boxes))
            .with("metadata", metadata);
        self.request("maproute", params, HttpMethod::Post).await
    }

    pub async fn brewery(&self, brewery_id: impl fmt::Display, metadata: bool) -> Result<ApiResponse> {
        self.request(
            &format!("breweries/{}", brewery_id),
            with_metadata(metadata),
            HttpMethod::Get,
        )
        .await
    }

    pub async fn beers_for_brewery(
        &self,
        brewery_id: impl fmt::Display,
        page: u32,
        metadata: bool,
        since: Option<NaiveDate>,
    ) -> Result<ApiResponse> {
        let mut params = Params::new();
        params
            .insert("brewery_id", brewery_id.to_string())
            .insert("page", page)
            .insert("metadata", metadata)
            .insert_opt("since", since);
        self.request("beers", params, HttpMethod::Get).await
    }

    pub async fn beers(
        &self,
        page: u32,
        metadata: bool,
        since: Option<NaiveDate>,
    ) -> Result<ApiResponse> {
        self.request("beers", paged(page, metadata, since), HttpMethod::Get)
            .await
    }

    pub async fn beer(&self, beer_id: impl fmt::Display, metadata: bool) -> Result<ApiResponse> {
        self.request(
            &format!("beers/{}", beer_id),
            with_metadata(metadata),
            HttpMethod::Get,
        )
        .await
    }

    pub async fn styles(&self) -> Result<ApiResponse> {
        self.request("styles", Params::new(), HttpMethod::Get).await
    }

    pub async fn style(&self, style_id: impl fmt::Display) -> Result<ApiResponse> {
        self.request(&format!("styles/{}", style_id), Params::new(), HttpMethod::Get)
            .await
    }

    pub async fn categories(&self) -> Result<ApiResponse> {
        self.request("categories", Params::new(), HttpMethod::Get).await
    }

    pub async fn category(&self, category_id: impl fmt::Display) -> Result<ApiResponse> {
        self.request(
            &format!("categories/{}", category_id),
            Params::new(),
            HttpMethod::Get,
        )
        .await
    }

    pub async fn glassware(&self) -> Result<ApiResponse> {
        self.request("glassware", Params::new(), HttpMethod::Get).await
    }

    pub async fn glassware_item(&self, glassware_id: impl fmt::Display) -> Result<ApiResponse> {
        self.request(
            &format!("glassware/{}", glassware_id),
            Params::new(),
            HttpMethod::Get,
        )
        .await
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<ApiResponse> {
        let params = query.to_params()?;
        self.request("search", params, HttpMethod::Get).await
    }

    // Featured beer and brewery ids
    pub async fn featured(&self) -> Result<ApiResponse> {
        self.request("featured", Params::new(), HttpMethod::Get).await
    }
}
