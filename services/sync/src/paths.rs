//! Store paths owned by the service.

/// Root of the service's data subtree.
pub const SERVICE_PATH: &str = "/bookmarks/weather";

/// Registered weather grid cells, keyed by geohash.
pub const WEATHER_PATH: &str = "/bookmarks/weather/acis/geohash-index";

/// Registered solar grid cells, keyed by geohash.
pub const SOLAR_PATH: &str = "/bookmarks/weather/nsrdb-psmv3/geohash-index";

/// Locations refreshed by the incremental poller, keyed by geohash.
pub const LOCATION_PATH: &str = "/bookmarks/weather/location-index";

/// Persisted watch resume tokens, one child per watch name.
pub const WATCHES_PATH: &str = "/bookmarks/services/weather-sync/watches";
