//! Area-map domain model and polygon hit-testing.
//!
//! Persisted area maps are flat rows with nullable action columns
//! ([`crate::db::AreaMap`]); this module gives them a typed action variant
//! and enforces the kind/field pairing on the construction path, where the
//! schema deliberately does not.

use crate::db::AreaMap;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Minimum number of polygon vertices.
pub const MIN_POLYGON_POINTS: usize = 3;

/// One polygon vertex in page-image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

/// What clicking an area does. Exactly one variant per area kind; the field
/// the kind needs is mandatory here even though the row keeps all three
/// columns nullable.
#[derive(Debug, Clone, PartialEq)]
pub enum AreaAction {
    /// Open an external URL.
    Link {
        /// Target URL.
        url: String,
    },
    /// Jump to another page of the same edition.
    PageNav {
        /// 1-based target page number.
        page_number: i64,
    },
    /// Show a linked advertisement.
    Ad {
        /// Advertisement ID (owned by the ads collaborator).
        ad_id: String,
    },
}

impl AreaAction {
    /// Build the action from flat row fields, enforcing that the field
    /// matching the kind is present.
    pub fn from_parts(
        area_type: &str,
        link_url: Option<&str>,
        link_page_number: Option<i64>,
        ad_id: Option<&str>,
    ) -> Result<Self> {
        match area_type {
            "link" => link_url
                .filter(|u| !u.is_empty())
                .map(|u| AreaAction::Link { url: u.to_string() })
                .ok_or_else(|| {
                    AppError::Validation("link areas require link_url".to_string())
                }),
            "page_nav" => link_page_number
                .filter(|n| *n >= 1)
                .map(|n| AreaAction::PageNav { page_number: n })
                .ok_or_else(|| {
                    AppError::Validation(
                        "page_nav areas require a positive link_page_number".to_string(),
                    )
                }),
            "ad" => ad_id
                .filter(|a| !a.is_empty())
                .map(|a| AreaAction::Ad {
                    ad_id: a.to_string(),
                })
                .ok_or_else(|| AppError::Validation("ad areas require ad_id".to_string())),
            other => Err(AppError::Validation(format!(
                "Unknown area type: {}",
                other
            ))),
        }
    }

    /// The kind string persisted for this action.
    pub fn kind(&self) -> &'static str {
        match self {
            AreaAction::Link { .. } => "link",
            AreaAction::PageNav { .. } => "page_nav",
            AreaAction::Ad { .. } => "ad",
        }
    }
}

/// Parse and validate a coordinates JSON array (at least three vertices).
pub fn parse_coordinates(json: &str) -> Result<Vec<Point>> {
    let points: Vec<Point> = serde_json::from_str(json)
        .map_err(|e| AppError::Validation(format!("Invalid coordinates: {}", e)))?;

    if points.len() < MIN_POLYGON_POINTS {
        return Err(AppError::Validation(format!(
            "Coordinates must have at least {} points",
            MIN_POLYGON_POINTS
        )));
    }

    Ok(points)
}

/// Ray-casting (even-odd) point-in-polygon test.
///
/// A point exactly on a polygon edge has undefined inclusion; the outcome is
/// deterministic for this implementation but either answer is acceptable.
pub fn point_in_polygon(x: f64, y: f64, polygon: &[Point]) -> bool {
    if polygon.is_empty() {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;

    for i in 0..polygon.len() {
        let (xi, yi) = (polygon[i].x, polygon[i].y);
        let (xj, yj) = (polygon[j].x, polygon[j].y);

        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// Return every active area of the page whose polygon contains the point.
/// Rows with malformed coordinates are skipped.
pub fn hit_test(x: f64, y: f64, areas: &[AreaMap]) -> Vec<AreaMap> {
    areas
        .iter()
        .filter(|area| {
            serde_json::from_str::<Vec<Point>>(&area.coordinates)
                .map(|polygon| point_in_polygon(x, y, &polygon))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point { x: 0.0, y: 0.0 },
            Point { x: 10.0, y: 0.0 },
            Point { x: 10.0, y: 10.0 },
            Point { x: 0.0, y: 10.0 },
        ]
    }

    #[test]
    fn point_inside_square() {
        assert!(point_in_polygon(5.0, 5.0, &square()));
    }

    #[test]
    fn point_outside_square() {
        assert!(!point_in_polygon(15.0, 15.0, &square()));
        assert!(!point_in_polygon(-1.0, 5.0, &square()));
    }

    #[test]
    fn edge_point_is_deterministic() {
        // Inclusion on the boundary is undefined but must not vary between
        // calls of the same build.
        let first = point_in_polygon(10.0, 5.0, &square());
        for _ in 0..10 {
            assert_eq!(point_in_polygon(10.0, 5.0, &square()), first);
        }
    }

    #[test]
    fn concave_polygon() {
        // L-shape; the notch is outside
        let polygon = vec![
            Point { x: 0.0, y: 0.0 },
            Point { x: 10.0, y: 0.0 },
            Point { x: 10.0, y: 4.0 },
            Point { x: 4.0, y: 4.0 },
            Point { x: 4.0, y: 10.0 },
            Point { x: 0.0, y: 10.0 },
        ];

        assert!(point_in_polygon(2.0, 8.0, &polygon));
        assert!(point_in_polygon(8.0, 2.0, &polygon));
        assert!(!point_in_polygon(8.0, 8.0, &polygon));
    }

    #[test]
    fn coordinates_require_three_points() {
        assert!(parse_coordinates(r#"[{"x":0,"y":0},{"x":1,"y":0}]"#).is_err());
        assert!(parse_coordinates(r#"[{"x":0,"y":0},{"x":1,"y":0},{"x":1,"y":1}]"#).is_ok());
        assert!(parse_coordinates("not json").is_err());
    }

    #[test]
    fn action_requires_matching_field() {
        assert!(AreaAction::from_parts("link", Some("https://example.com"), None, None).is_ok());
        assert!(AreaAction::from_parts("link", None, Some(4), None).is_err());

        assert!(AreaAction::from_parts("page_nav", None, Some(4), None).is_ok());
        assert!(AreaAction::from_parts("page_nav", None, Some(0), None).is_err());
        assert!(AreaAction::from_parts("page_nav", Some("url"), None, None).is_err());

        assert!(AreaAction::from_parts("ad", None, None, Some("ad-1")).is_ok());
        assert!(AreaAction::from_parts("ad", None, None, None).is_err());

        assert!(AreaAction::from_parts("banner", None, None, None).is_err());
    }

    #[test]
    fn action_kind_round_trip() {
        let action = AreaAction::from_parts("page_nav", None, Some(7), None).unwrap();
        assert_eq!(action.kind(), "page_nav");
        assert_eq!(action, AreaAction::PageNav { page_number: 7 });
    }
}
