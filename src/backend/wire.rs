//! JSON shapes exchanged with the learning backend.

use serde::{Deserialize, Serialize};

use crate::session::{
    BinaryLabel, DataPoint, FilterConstraint, FilterPredicate, GatewayError, GridPrediction, Label,
    LabeledPoint, PointId, grouped,
};

#[derive(Serialize)]
struct PointDataWire<'a> {
    array: &'a [f64],
}

#[derive(Serialize)]
#[serde(untagged)]
enum LabeledPointWire<'a> {
    Scalar {
        id: PointId,
        label: i64,
        data: PointDataWire<'a>,
    },
    Grouped {
        id: PointId,
        labels: Vec<i8>,
        data: PointDataWire<'a>,
    },
}

impl<'a> From<&'a LabeledPoint> for LabeledPointWire<'a> {
    fn from(point: &'a LabeledPoint) -> Self {
        let data = PointDataWire {
            array: &point.point.features,
        };
        match &point.label {
            Label::Scalar(label) => Self::Scalar {
                id: point.id(),
                label: label.as_int(),
                data,
            },
            Label::Grouped(label) => Self::Grouped {
                id: point.id(),
                labels: grouped::to_wire(label.per_group_negative()),
                data,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FilterWire<'a> {
    column_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter_values: Option<&'a [String]>,
}

impl<'a> From<&'a FilterPredicate> for FilterWire<'a> {
    fn from(predicate: &'a FilterPredicate) -> Self {
        let (min, max, filter_values) = match &predicate.constraint {
            FilterConstraint::Range { min, max } => (*min, *max, None),
            FilterConstraint::Values(values) => (None, None, Some(values.as_slice())),
        };
        Self {
            column_name: &predicate.column_name,
            min,
            max,
            filter_values,
        }
    }
}

/// Value of the `labeledPoints` form field.
pub(crate) fn encode_labeled_points(points: &[LabeledPoint]) -> Result<String, GatewayError> {
    let wire: Vec<LabeledPointWire<'_>> = points.iter().map(LabeledPointWire::from).collect();
    serde_json::to_string(&wire).map_err(|err| GatewayError::Json(err.to_string()))
}

/// Value of the `filters` form field.
pub(crate) fn encode_filters(predicates: &[FilterPredicate]) -> Result<String, GatewayError> {
    let wire: Vec<FilterWire<'_>> = predicates.iter().map(FilterWire::from).collect();
    serde_json::to_string(&wire).map_err(|err| GatewayError::Json(err.to_string()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdWire {
    Number(u64),
    Text(String),
}

impl IdWire {
    fn into_point_id(self) -> Result<PointId, GatewayError> {
        match self {
            Self::Number(id) => Ok(PointId(id)),
            Self::Text(text) => text
                .trim()
                .parse::<u64>()
                .map(PointId)
                .map_err(|_| GatewayError::Json(format!("Invalid point id {text:?}"))),
        }
    }
}

#[derive(Deserialize)]
struct ArrayWire {
    #[serde(default)]
    array: Vec<f64>,
}

#[derive(Deserialize)]
struct PointObjectWire {
    id: IdWire,
    #[serde(default)]
    data: Option<ArrayWire>,
    #[serde(default)]
    features: Option<Vec<f64>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PointWire {
    Id(IdWire),
    Object(PointObjectWire),
}

impl PointWire {
    fn into_point(self) -> Result<DataPoint, GatewayError> {
        match self {
            Self::Id(id) => Ok(DataPoint {
                id: id.into_point_id()?,
                features: Vec::new(),
            }),
            Self::Object(object) => {
                let features = object
                    .data
                    .map(|data| data.array)
                    .or(object.features)
                    .unwrap_or_default();
                Ok(DataPoint {
                    id: object.id.into_point_id()?,
                    features,
                })
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PredictionWire {
    Bare(i64),
    Object {
        #[serde(rename = "pointId", alias = "id")]
        point_id: IdWire,
        label: i64,
    },
}

/// Candidate list returned by label and filter submissions.
pub(crate) fn parse_points(body: &str) -> Result<Vec<DataPoint>, GatewayError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let wire: Vec<PointWire> = from_json(trimmed)?;
    wire.into_iter().map(PointWire::into_point).collect()
}

/// Reply of the specific-point lookup: one point, or a list holding it.
pub(crate) fn parse_single_point(body: &str) -> Result<DataPoint, GatewayError> {
    let trimmed = body.trim();
    match from_json::<OneOrMany<PointWire>>(trimmed)? {
        OneOrMany::One(point) => point.into_point(),
        OneOrMany::Many(points) => points
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound("Backend returned no point".to_string()))?
            .into_point(),
    }
}

/// Prediction grid; a bare label array is indexed by grid point id.
pub(crate) fn parse_predictions(body: &str) -> Result<Vec<GridPrediction>, GatewayError> {
    let wire: Vec<PredictionWire> = from_json(body.trim())?;
    wire.into_iter()
        .enumerate()
        .map(|(index, prediction)| {
            let (point_id, label) = match prediction {
                PredictionWire::Bare(label) => (PointId(index as u64), label),
                PredictionWire::Object { point_id, label } => (point_id.into_point_id()?, label),
            };
            Ok(GridPrediction {
                point_id,
                label: wire_label(label)?,
            })
        })
        .collect()
}

fn wire_label(value: i64) -> Result<BinaryLabel, GatewayError> {
    match value {
        1 => Ok(BinaryLabel::Positive),
        0 | -1 => Ok(BinaryLabel::Negative),
        other => Err(GatewayError::Json(format!("Invalid label {other}"))),
    }
}

fn from_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, GatewayError> {
    if body.is_empty() {
        return Err(GatewayError::Json("Empty response body".to_string()));
    }
    serde_json::from_str(body).map_err(|err| GatewayError::Json(format!("{err}: {body}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{GroupDefinition, GroupedAnswer};
    use std::collections::BTreeSet;

    #[test]
    fn scalar_points_use_label_and_data_array() {
        let points = vec![LabeledPoint {
            point: DataPoint::new(4, vec![1.5, 2.0]),
            label: Label::Scalar(BinaryLabel::Negative),
        }];
        assert_eq!(
            encode_labeled_points(&points).unwrap(),
            r#"[{"id":4,"label":0,"data":{"array":[1.5,2.0]}}]"#
        );
    }

    #[test]
    fn grouped_points_send_one_flag_per_group() {
        let groups =
            GroupDefinition::new(vec![BTreeSet::from([0]), BTreeSet::from([1])], 2).unwrap();
        let label = grouped::label(
            PointId(9),
            &GroupedAnswer::Reject {
                per_group_negative: vec![true, false],
            },
            &groups,
        )
        .unwrap();
        let points = vec![LabeledPoint {
            point: DataPoint::bare(9),
            label: Label::Grouped(label),
        }];
        assert_eq!(
            encode_labeled_points(&points).unwrap(),
            r#"[{"id":9,"labels":[0,1],"data":{"array":[]}}]"#
        );
    }

    #[test]
    fn filters_use_camel_case_and_skip_missing_bounds() {
        let predicates = vec![
            FilterPredicate::range("price", None, Some(10.0)),
            FilterPredicate::values("brand", vec!["bmw".into(), "audi".into()]),
        ];
        assert_eq!(
            encode_filters(&predicates).unwrap(),
            r#"[{"columnName":"price","max":10.0},{"columnName":"brand","filterValues":["bmw","audi"]}]"#
        );
    }

    #[test]
    fn points_parse_from_ids_and_objects() {
        let points =
            parse_points(r#"[3, "7", {"id": 5, "data": {"array": [0.5]}}, {"id": 6, "features": [1.0]}]"#)
                .unwrap();
        assert_eq!(
            points,
            vec![
                DataPoint::bare(3),
                DataPoint::bare(7),
                DataPoint::new(5, vec![0.5]),
                DataPoint::new(6, vec![1.0]),
            ]
        );
        assert!(parse_points("  ").unwrap().is_empty());
        assert!(matches!(parse_points("{oops"), Err(GatewayError::Json(_))));
    }

    #[test]
    fn single_point_accepts_object_or_list() {
        assert_eq!(parse_single_point(r#"{"id": 11}"#).unwrap(), DataPoint::bare(11));
        assert_eq!(parse_single_point("[12]").unwrap(), DataPoint::bare(12));
        assert!(matches!(parse_single_point("[]"), Err(GatewayError::NotFound(_))));
    }

    #[test]
    fn predictions_parse_objects_and_bare_labels() {
        let parsed = parse_predictions(r#"[{"pointId": 2, "label": 1}, {"id": 3, "label": -1}]"#)
            .unwrap();
        assert_eq!(parsed[0].point_id, PointId(2));
        assert_eq!(parsed[0].label, BinaryLabel::Positive);
        assert_eq!(parsed[1].label, BinaryLabel::Negative);

        let bare = parse_predictions("[0, 1]").unwrap();
        assert_eq!(bare[1].point_id, PointId(1));
        assert_eq!(bare[1].label, BinaryLabel::Positive);

        assert!(matches!(parse_predictions("[2]"), Err(GatewayError::Json(_))));
    }
}
