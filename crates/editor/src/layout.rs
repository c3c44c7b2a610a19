//! Deterministic positions for drawing a workflow graph.
//!
//! Columns follow the longest path from START, rows follow the order of
//! each node's highest-placed parent. Branches cut off from START are drawn
//! in their own band below the rest, one empty row apart.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dag;
use crate::graph::Graph;
use crate::models::NodeId;

/// Top-left corner of a node, in canvas units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Which way the graph grows from START.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    LeftToRight,
    TopToBottom,
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left_to_right" | "horizontal" => Ok(Self::LeftToRight),
            "top_to_bottom" | "vertical" => Ok(Self::TopToBottom),
            other => Err(format!("unknown orientation '{other}'")),
        }
    }
}

/// Layout knobs.
///
/// `column_width` separates depths and `row_height` separates siblings,
/// whichever way the graph is oriented.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Where START is drawn.
    pub origin: Position,
    pub column_width: f64,
    pub row_height: f64,
    pub orientation: Orientation,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            origin: Position::default(),
            column_width: 260.0,
            row_height: 100.0,
            orientation: Orientation::LeftToRight,
        }
    }
}

impl LayoutConfig {
    fn position(&self, column: usize, row: usize) -> Position {
        let along = column as f64 * self.column_width;
        let across = row as f64 * self.row_height;
        match self.orientation {
            Orientation::LeftToRight => Position {
                x: self.origin.x + along,
                y: self.origin.y + across,
            },
            Orientation::TopToBottom => Position {
                x: self.origin.x + across,
                y: self.origin.y + along,
            },
        }
    }
}

/// Position of every live node. Never fails, even on a cyclic graph.
pub fn layout(graph: &Graph, config: &LayoutConfig) -> BTreeMap<NodeId, Position> {
    let depth = dag::depths(graph);
    let reachable = graph.reachable_from_root();
    let (connected, orphaned): (Vec<NodeId>, Vec<NodeId>) =
        depth.keys().copied().partition(|id| reachable.contains(id));

    let mut rows: HashMap<NodeId, usize> = HashMap::new();
    let used = assign_rows(graph, &depth, &connected, 0, &mut rows);
    assign_rows(graph, &depth, &orphaned, used + 1, &mut rows);

    rows.into_iter()
        .map(|(id, row)| {
            let column = depth.get(&id).copied().unwrap_or_default();
            (id, config.position(column, row))
        })
        .collect()
}

/// Fill in rows for one band starting at `first_row`; returns its height.
fn assign_rows(
    graph: &Graph,
    depth: &BTreeMap<NodeId, usize>,
    band: &[NodeId],
    first_row: usize,
    rows: &mut HashMap<NodeId, usize>,
) -> usize {
    let mut columns: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
    for &id in band {
        columns
            .entry(depth.get(&id).copied().unwrap_or_default())
            .or_default()
            .push(id);
    }

    let mut height = 0;
    for ids in columns.into_values() {
        let mut ordered: Vec<(usize, NodeId)> = ids
            .into_iter()
            .map(|id| (lowest_parent_row(graph, rows, id), id))
            .collect();
        ordered.sort_unstable();

        for (offset, (_, id)) in ordered.iter().enumerate() {
            rows.insert(*id, first_row + offset);
        }
        height = height.max(ordered.len());
    }
    height
}

/// Rows of parents placed so far; parentless nodes sort last.
fn lowest_parent_row(graph: &Graph, rows: &HashMap<NodeId, usize>, id: NodeId) -> usize {
    graph
        .inbound_links(id)
        .filter_map(|l| rows.get(&l.source).copied())
        .min()
        .unwrap_or(usize::MAX)
}
