use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Errors raised when a declared data shape cannot be honored.
///
/// These are configuration errors: they are detected when an axis or
/// descriptor is constructed, or when a flat buffer is checked against a
/// descriptor, never silently corrected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    /// An axis was declared with no coordinate points.
    #[error("axis '{0}' has no points")]
    EmptyAxis(String),
    /// The number of names does not match the number of units.
    #[error("axis '{name}' declares {names} name(s) but {units} unit(s)")]
    NameUnitMismatch {
        name: String,
        names: usize,
        units: usize,
    },
    /// A joint axis has tuples whose width differs from its sub-axis count.
    #[error("joint axis '{name}' has a {got}-wide tuple but {expected} sub-axes")]
    RaggedTuple {
        name: String,
        expected: usize,
        got: usize,
    },
    /// Per-point labels must cover every point exactly.
    #[error("axis '{name}' has {labels} label(s) for {points} point(s)")]
    LabelLength {
        name: String,
        labels: usize,
        points: usize,
    },
    /// A flat buffer cannot be reshaped to the declared dimensions.
    #[error("buffer of {got} point(s) does not match declared shape of {expected}")]
    PointCountMismatch { expected: usize, got: usize },
}

/// The ordered coordinate values of one axis.
///
/// `Scalar` points belong to a structured axis with a single name and unit.
/// `Tuple` points belong to an unstructured (joint) axis whose coordinates
/// are drawn jointly from several logical sub-axes, e.g. a joint (x, y)
/// sweep: every tuple has one entry per sub-axis name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AxisPoints {
    Scalar(Vec<f64>),
    Tuple(Vec<Vec<f64>>),
}

impl AxisPoints {
    pub fn len(&self) -> usize {
        match self {
            AxisPoints::Scalar(p) => p.len(),
            AxisPoints::Tuple(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One named dimension of a dataset.
///
/// The coordinate sequence is fixed once the axis is created. Structured
/// axes carry one name and unit; joint axes carry one of each per sub-axis.
/// Optional per-point labels can mark individual points, e.g. calibration
/// entries interleaved with a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AxisRepr")]
pub struct Axis {
    names: Vec<String>,
    units: Vec<String>,
    points: AxisPoints,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    labels: Option<Vec<String>>,
}

/// Wire form of [`Axis`]. Decoding funnels through the validating
/// constructors, so a deserialized axis upholds the same invariants as a
/// constructed one.
#[derive(Deserialize)]
struct AxisRepr {
    names: Vec<String>,
    units: Vec<String>,
    points: AxisPoints,
    #[serde(default)]
    labels: Option<Vec<String>>,
}

impl TryFrom<AxisRepr> for Axis {
    type Error = ShapeError;

    fn try_from(repr: AxisRepr) -> Result<Self, Self::Error> {
        let axis = match repr.points {
            AxisPoints::Scalar(points) => match (&repr.names[..], &repr.units[..]) {
                ([name], [unit]) => Axis::scalar(name.clone(), unit.clone(), points)?,
                _ => {
                    return Err(ShapeError::NameUnitMismatch {
                        name: repr.names.join(","),
                        names: repr.names.len(),
                        units: repr.units.len(),
                    })
                }
            },
            AxisPoints::Tuple(points) => Axis::joint(repr.names, repr.units, points)?,
        };
        match repr.labels {
            Some(labels) => axis.with_labels(labels),
            None => Ok(axis),
        }
    }
}

impl Axis {
    /// Create a structured axis with a single coordinate per point.
    pub fn scalar(
        name: impl Into<String>,
        unit: impl Into<String>,
        points: Vec<f64>,
    ) -> Result<Self, ShapeError> {
        let name = name.into();
        if points.is_empty() {
            return Err(ShapeError::EmptyAxis(name));
        }
        Ok(Self {
            names: vec![name],
            units: vec![unit.into()],
            points: AxisPoints::Scalar(points),
            labels: None,
        })
    }

    /// Create an unstructured (joint) axis whose points are tuples drawn
    /// jointly from the named sub-axes.
    pub fn joint(
        names: Vec<String>,
        units: Vec<String>,
        points: Vec<Vec<f64>>,
    ) -> Result<Self, ShapeError> {
        let label = names.join(",");
        if names.len() != units.len() {
            return Err(ShapeError::NameUnitMismatch {
                name: label,
                names: names.len(),
                units: units.len(),
            });
        }
        if points.is_empty() {
            return Err(ShapeError::EmptyAxis(label));
        }
        for tuple in &points {
            if tuple.len() != names.len() {
                return Err(ShapeError::RaggedTuple {
                    name: label,
                    expected: names.len(),
                    got: tuple.len(),
                });
            }
        }
        Ok(Self {
            names,
            units,
            points: AxisPoints::Tuple(points),
            labels: None,
        })
    }

    /// Attach one metadata label per point.
    pub fn with_labels(mut self, labels: Vec<String>) -> Result<Self, ShapeError> {
        if labels.len() != self.num_points() {
            return Err(ShapeError::LabelLength {
                name: self.display_name(),
                labels: labels.len(),
                points: self.num_points(),
            });
        }
        self.labels = Some(labels);
        Ok(self)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    pub fn points(&self) -> &AxisPoints {
        &self.points
    }

    pub fn labels(&self) -> Option<&[String]> {
        self.labels.as_deref()
    }

    /// True for a joint axis swept over several sub-axes at once.
    pub fn is_unstructured(&self) -> bool {
        matches!(self.points, AxisPoints::Tuple(_))
    }

    /// Cardinality of this axis.
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Single display name; sub-axis names joined for joint axes.
    pub fn display_name(&self) -> String {
        self.names.join(",")
    }
}

/// Shape and metadata of the data flowing through one stream.
///
/// Axes are ordered outermost to innermost. A descriptor is frozen once
/// propagated to downstream nodes; everyone then shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Descriptor {
    axes: Vec<Axis>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Descriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an axis; axes are added innermost-last.
    pub fn add_axis(&mut self, axis: Axis) {
        self.axes.push(axis);
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn num_dims(&self) -> usize {
        self.axes.len()
    }

    /// Per-axis lengths in declaration order, used to reshape a flat buffer
    /// into the declared multi-dimensional form.
    pub fn dims(&self) -> Vec<usize> {
        self.axes.iter().map(Axis::num_points).collect()
    }

    /// Total points in one complete pass: the product of the axis lengths.
    pub fn num_points(&self) -> usize {
        self.axes.iter().map(Axis::num_points).product()
    }

    pub fn axis_names(&self) -> Vec<String> {
        self.axes.iter().map(Axis::display_name).collect()
    }

    /// Check that a flat buffer of `len` points can be reshaped to `dims()`.
    pub fn expect_points(&self, len: usize) -> Result<(), ShapeError> {
        if len != self.num_points() {
            return Err(ShapeError::PointCountMismatch {
                expected: self.num_points(),
                got: len,
            });
        }
        Ok(())
    }
}

/// A flat chunk of numeric samples in flight between two nodes.
///
/// Chunks carry no shape of their own: the stream's descriptor declares the
/// shape, and chunk boundaries are free to disagree with trace boundaries.
/// Streams pass chunks as `Arc<DataChunk>` so fan-out never deep-copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChunk {
    pub samples: Vec<f64>,
}

impl DataChunk {
    pub fn new(samples: Vec<f64>) -> Arc<Self> {
        Arc::new(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<f64>> for DataChunk {
    fn from(samples: Vec<f64>) -> Self {
        Self { samples }
    }
}
