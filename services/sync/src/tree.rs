//! Declared shape of the service's store subtree.

use serde_json::json;
use tree_store::Tree;

/// Tree declaration covering every path the service writes, so the store
/// auto-vivifies intermediate collections with the right content types.
pub fn service_tree() -> Tree {
    Tree::new(json!({
        "bookmarks": {
            "_type": "application/vnd.oada.bookmarks.1+json",
            "services": {
                "_type": "application/vnd.oada.services.1+json",
                "weather-sync": {
                    "_type": "application/vnd.oada.service.1+json",
                    "watches": {
                        "_type": "application/json",
                        "*": { "_type": "application/json" }
                    }
                }
            },
            "weather": {
                "_type": "application/json",
                "acis": {
                    "_type": "application/json",
                    "geohash-index": {
                        "_type": "application/json",
                        "*": {
                            "_type": "application/json",
                            "year-index": {
                                "*": {}
                            }
                        }
                    }
                },
                "nsrdb-psmv3": {
                    "_type": "application/json",
                    "geohash-index": {
                        "_type": "application/json",
                        "*": {
                            "_type": "application/json",
                            "year-index": {
                                "*": {}
                            }
                        }
                    }
                },
                "location-index": {
                    "_type": "application/json",
                    "*": { "_type": "application/json" }
                }
            }
        }
    }))
}
