//! Persisted channel groups
//!
//! One group per logical channel: an ordered list of axis-dataset
//! references, the axis datasets themselves, named numeric data columns,
//! and free-form descriptor metadata. The reference list is stored
//! innermost-first, so re-reading it *in reverse* reconstructs the declared
//! outer-to-inner axis order. Joint (unstructured) axes store a reference
//! per constituent sub-axis instead of their own points; the sub-axis
//! datasets live alongside in the same group.
//!
//! The container is a serde_json file holding a map of group name to group.

use meas_types::{Axis, AxisPoints, Descriptor, ShapeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};

/// One stored axis dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisDataset {
    pub name: Vec<String>,
    pub unit: Vec<String>,
    pub unstructured: bool,
    /// Coordinate points; empty for an unstructured axis, whose points live
    /// in the referenced sub-axis datasets.
    #[serde(default)]
    pub points: Vec<f64>,
    /// References to constituent sub-axis datasets (unstructured only).
    #[serde(default)]
    pub refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
}

/// One logical channel's stored data and shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelGroup {
    /// Axis dataset references, innermost first. Read in reverse.
    pub descriptor: Vec<String>,
    pub axes: BTreeMap<String, AxisDataset>,
    pub data: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ChannelGroup {
    /// Build a group from a descriptor and named columns.
    ///
    /// Every column must hold a whole number of passes of the declared
    /// shape; anything else is a configuration error, not truncated.
    pub fn from_descriptor(
        descriptor: &Descriptor,
        data: BTreeMap<String, Vec<f64>>,
    ) -> Result<Self, ShapeError> {
        for column in data.values() {
            check_whole_passes(descriptor, column.len())?;
        }

        let mut axes = BTreeMap::new();
        let mut refs = Vec::new();
        // Outermost axis last in the reference list: stored innermost-first.
        for (index, axis) in descriptor.axes().iter().enumerate().rev() {
            let key = format!("axis{}_{}", index, axis.display_name());
            match axis.points() {
                AxisPoints::Scalar(points) => {
                    axes.insert(
                        key.clone(),
                        AxisDataset {
                            name: axis.names().to_vec(),
                            unit: axis.units().to_vec(),
                            unstructured: false,
                            points: points.clone(),
                            refs: Vec::new(),
                            labels: axis.labels().map(<[String]>::to_vec),
                        },
                    );
                }
                AxisPoints::Tuple(points) => {
                    let mut sub_refs = Vec::new();
                    for (column, name) in axis.names().iter().enumerate() {
                        let sub_key = format!("axis{index}_{name}");
                        axes.insert(
                            sub_key.clone(),
                            AxisDataset {
                                name: vec![name.clone()],
                                unit: vec![axis.units()[column].clone()],
                                unstructured: false,
                                points: points.iter().map(|tuple| tuple[column]).collect(),
                                refs: Vec::new(),
                                labels: None,
                            },
                        );
                        sub_refs.push(sub_key);
                    }
                    axes.insert(
                        key.clone(),
                        AxisDataset {
                            name: axis.names().to_vec(),
                            unit: axis.units().to_vec(),
                            unstructured: true,
                            points: Vec::new(),
                            refs: sub_refs,
                            labels: axis.labels().map(<[String]>::to_vec),
                        },
                    );
                }
            }
            refs.push(key);
        }

        Ok(Self {
            descriptor: refs,
            axes,
            data,
            metadata: descriptor.metadata.clone(),
        })
    }

    /// Reconstruct the stored descriptor: references read in reverse give
    /// the original outer-to-inner declaration order.
    pub fn to_descriptor(&self) -> PipelineResult<Descriptor> {
        let mut descriptor = Descriptor::new();
        for reference in self.descriptor.iter().rev() {
            let dataset = self.axes.get(reference).ok_or_else(|| {
                PipelineError::InvalidConfiguration {
                    message: format!("group references missing axis dataset '{reference}'"),
                }
            })?;
            let mut axis = if dataset.unstructured {
                let mut columns = Vec::new();
                for sub_ref in &dataset.refs {
                    let sub = self.axes.get(sub_ref).ok_or_else(|| {
                        PipelineError::InvalidConfiguration {
                            message: format!(
                                "joint axis references missing sub-axis dataset '{sub_ref}'"
                            ),
                        }
                    })?;
                    columns.push(&sub.points);
                }
                let length = columns.first().map_or(0, |c| c.len());
                if columns.iter().any(|c| c.len() != length) {
                    return Err(PipelineError::InvalidConfiguration {
                        message: format!(
                            "joint axis '{reference}' has sub-axes of unequal length"
                        ),
                    });
                }
                let tuples: Vec<Vec<f64>> = (0..length)
                    .map(|row| columns.iter().map(|column| column[row]).collect())
                    .collect();
                Axis::joint(dataset.name.clone(), dataset.unit.clone(), tuples)?
            } else {
                let (name, unit) = dataset
                    .name
                    .first()
                    .zip(dataset.unit.first())
                    .ok_or_else(|| PipelineError::InvalidConfiguration {
                        message: format!("axis dataset '{reference}' is missing name or unit"),
                    })?;
                Axis::scalar(name.clone(), unit.clone(), dataset.points.clone())?
            };
            if let Some(labels) = &dataset.labels {
                axis = axis.with_labels(labels.clone())?;
            }
            descriptor.add_axis(axis);
        }
        descriptor.metadata = self.metadata.clone();

        for column in self.data.values() {
            check_whole_passes(&descriptor, column.len())?;
        }
        Ok(descriptor)
    }
}

fn check_whole_passes(descriptor: &Descriptor, len: usize) -> Result<(), ShapeError> {
    let pass = descriptor.num_points();
    if len == 0 || len % pass != 0 {
        return Err(ShapeError::PointCountMismatch {
            expected: pass,
            got: len,
        });
    }
    Ok(())
}

/// Write a file of named channel groups.
pub fn write_groups(path: &Path, groups: &BTreeMap<String, ChannelGroup>) -> PipelineResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), groups)?;
    info!(path = %path.display(), groups = groups.len(), "channel groups written");
    Ok(())
}

/// Read a file of channel groups back, reconstructing each group's
/// descriptor alongside its columns.
pub fn read_groups(
    path: &Path,
) -> PipelineResult<BTreeMap<String, (BTreeMap<String, Vec<f64>>, Descriptor)>> {
    let file = File::open(path)?;
    let groups: BTreeMap<String, ChannelGroup> = serde_json::from_reader(BufReader::new(file))?;
    let mut out = BTreeMap::new();
    for (name, group) in groups {
        let descriptor = group.to_descriptor()?;
        out.insert(name, (group.data, descriptor));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_with_joint_axis() -> Descriptor {
        let mut d = Descriptor::new();
        d.add_axis(
            Axis::joint(
                vec!["x".into(), "y".into()],
                vec!["um".into(), "um".into()],
                vec![vec![0.0, 0.0], vec![1.0, 2.0]],
            )
            .unwrap(),
        );
        d.add_axis(
            Axis::scalar("delay", "ns", vec![0.0, 5.0, 10.0])
                .unwrap()
                .with_labels(vec!["cal".into(), "data".into(), "data".into()])
                .unwrap(),
        );
        d.metadata
            .insert("experiment".into(), serde_json::json!("sweep-7"));
        d
    }

    #[test]
    fn round_trip_reconstructs_axis_order_and_attributes() {
        let descriptor = descriptor_with_joint_axis();
        let mut data = BTreeMap::new();
        data.insert("amplitude".into(), (0..6).map(|v| v as f64).collect());
        let group = ChannelGroup::from_descriptor(&descriptor, data.clone()).unwrap();

        // Innermost-first on disk.
        assert!(group.descriptor[0].contains("delay"));
        assert_eq!(group.descriptor.len(), 2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.chgrp");
        let mut groups = BTreeMap::new();
        groups.insert("demod".to_string(), group);
        write_groups(&path, &groups).unwrap();

        let loaded = read_groups(&path).unwrap();
        let (columns, rebuilt) = &loaded["demod"];
        assert_eq!(rebuilt, &descriptor);
        assert_eq!(columns, &data);
        assert!(rebuilt.axes()[0].is_unstructured());
        assert_eq!(rebuilt.dims(), vec![2, 3]);
        assert_eq!(
            rebuilt.axes()[1].labels().unwrap()[0],
            "cal".to_string()
        );
    }

    #[test]
    fn partial_pass_columns_are_rejected() {
        let descriptor = descriptor_with_joint_axis();
        let mut data = BTreeMap::new();
        data.insert("amplitude".into(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!(matches!(
            ChannelGroup::from_descriptor(&descriptor, data),
            Err(ShapeError::PointCountMismatch { .. })
        ));
    }

    #[test]
    fn multiple_whole_passes_are_accepted() {
        let descriptor = descriptor_with_joint_axis();
        let mut data = BTreeMap::new();
        data.insert("amplitude".into(), (0..12).map(|v| v as f64).collect());
        let group = ChannelGroup::from_descriptor(&descriptor, data).unwrap();
        assert!(group.to_descriptor().is_ok());
    }
}
