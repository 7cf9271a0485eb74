#![forbid(unsafe_code)]

//! Expandable tree model for nested inspection data.
//!
//! A [`TreeModel`] is built from a JSON *tree source* and owns a forest of
//! [`TreeNode`]s. Expansion is local UI state: [`TreeModel::toggle`] flips
//! one node and never recurses. When the source is replaced, every node is
//! built fresh. Expansion carries over in two ways:
//!
//! 1. An `expanded` (or `opened`) flag embedded in the new source always
//!    wins.
//! 2. Under [`ReplacePolicy::PreservePaths`], a node without an embedded
//!    flag inherits the state its label path had before. A label path is
//!    the sequence of labels from the root, with repeated sibling labels
//!    told apart by their order.
//!
//! # Source shape
//!
//! ```json
//! [
//!   {"label": "Pixels", "expanded": true, "children": [
//!     {"name": "NDVI: Image (1 band)", "nodes": ["NDVI: 0.42"]}
//!   ]}
//! ]
//! ```
//!
//! A node is an object with `label` or `name`, optional `children` or
//! `nodes`, and optional `expanded` or `opened`. A bare scalar is a leaf.
//! The top level may be a single node or an array of roots.
//!
//! # Invariants
//!
//! 1. `NodeRole::Leaf` implies no children.
//! 2. `NodeRole::Root` appears only at depth 0.
//! 3. [`TreeModel::visible_rows`] never descends into a collapsed node.

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use nbsync_core::{ReplacePolicy, TreeConfig};
use nbsync_runtime::{ViewState, WatchGuard};
use serde_json::Value;
use tracing::{debug, trace};

/// Labels from a root down to a node, each paired with its occurrence
/// among same-label siblings so repeated labels stay distinct.
type LabelPath = Vec<(String, usize)>;

/// Record the expansion state of every node with children.
fn collect_states(
    nodes: &[TreeNode],
    path: &mut LabelPath,
    out: &mut HashMap<LabelPath, bool>,
) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        let nth = seen.entry(node.label.as_str()).or_default();
        path.push((node.label.clone(), *nth));
        *nth += 1;
        collect_states(&node.children, path, out);
        if node.has_children() {
            out.insert(path.clone(), node.expanded);
        }
        path.pop();
    }
}

/// Re-apply recorded states to nodes without an explicit source flag.
fn apply_states(
    nodes: &mut [TreeNode],
    path: &mut LabelPath,
    states: &HashMap<LabelPath, bool>,
) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for node in nodes {
        let nth = seen.entry(node.label.clone()).or_default();
        path.push((node.label.clone(), *nth));
        *nth += 1;
        if !node.pinned
            && let Some(expanded) = states.get(&*path)
        {
            node.expanded = *expanded;
        }
        apply_states(&mut node.children, path, states);
        path.pop();
    }
}

/// Structural role of a node, derived from its position and children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Root,
    Branch,
    Leaf,
}

/// Presentation hint for one visible row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affordance {
    Root { expanded: bool },
    Branch { expanded: bool },
    Leaf,
}

/// One row of the flattened, currently visible tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleRow {
    /// Index path from the root list.
    pub path: Vec<usize>,
    pub depth: usize,
    pub label: String,
    pub affordance: Affordance,
}

/// A node in the tree hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    label: String,
    children: Vec<TreeNode>,
    expanded: bool,
    role: NodeRole,
    /// Whether the source carried an explicit expansion flag.
    pinned: bool,
}

impl TreeNode {
    /// Create a leaf.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            children: Vec::new(),
            expanded: false,
            role: NodeRole::Leaf,
            pinned: false,
        }
    }

    /// Add a child node.
    #[must_use]
    pub fn child(mut self, node: TreeNode) -> Self {
        self.children.push(node);
        self.role = NodeRole::Branch;
        self
    }

    #[must_use]
    pub fn with_expanded(mut self, expanded: bool) -> Self {
        self.expanded = expanded;
        self.pinned = true;
        self
    }

    /// Build a node from a source value. Returns `None` for null and for
    /// arrays, which are not nodes.
    #[must_use]
    pub fn from_source(source: &Value) -> Option<Self> {
        match source {
            Value::Null | Value::Array(_) => None,
            Value::String(label) => Some(Self::new(label.as_str())),
            Value::Bool(_) | Value::Number(_) => Some(Self::new(source.to_string())),
            Value::Object(map) => {
                let label = map
                    .get("label")
                    .or_else(|| map.get("name"))
                    .map(scalar_label)
                    .unwrap_or_default();
                let children: Vec<TreeNode> = map
                    .get("children")
                    .or_else(|| map.get("nodes"))
                    .and_then(Value::as_array)
                    .map(|nodes| nodes.iter().filter_map(Self::from_source).collect())
                    .unwrap_or_default();
                let flag = map
                    .get("expanded")
                    .or_else(|| map.get("opened"))
                    .and_then(Value::as_bool);
                let role = if children.is_empty() {
                    NodeRole::Leaf
                } else {
                    NodeRole::Branch
                };
                Some(Self {
                    label,
                    children,
                    expanded: flag.unwrap_or(false),
                    role,
                    pinned: flag.is_some(),
                })
            }
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn children(&self) -> &[TreeNode] {
        &self.children
    }

    #[must_use]
    pub fn role(&self) -> NodeRole {
        self.role
    }

    #[must_use]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    #[must_use]
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    /// Flip this node only.
    pub fn toggle_expanded(&mut self) {
        self.expanded = !self.expanded;
    }

    /// Count all visible nodes, including this one.
    #[must_use]
    pub fn visible_count(&self) -> usize {
        let mut count = 1;
        if self.expanded {
            for child in &self.children {
                count += child.visible_count();
            }
        }
        count
    }

    fn affordance(&self) -> Affordance {
        match self.role {
            NodeRole::Root => Affordance::Root {
                expanded: self.expanded,
            },
            NodeRole::Branch => Affordance::Branch {
                expanded: self.expanded,
            },
            NodeRole::Leaf => Affordance::Leaf,
        }
    }

    fn rows(&self, path: &mut Vec<usize>, depth: usize, out: &mut Vec<VisibleRow>) {
        out.push(VisibleRow {
            path: path.clone(),
            depth,
            label: self.label.clone(),
            affordance: self.affordance(),
        });
        if !self.expanded {
            return;
        }
        for (i, child) in self.children.iter().enumerate() {
            path.push(i);
            child.rows(path, depth + 1, out);
            path.pop();
        }
    }
}

fn scalar_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A forest of [`TreeNode`]s with its expansion state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeModel {
    roots: Vec<TreeNode>,
    config: TreeConfig,
}

impl TreeModel {
    #[must_use]
    pub fn new(config: TreeConfig) -> Self {
        Self {
            roots: Vec::new(),
            config,
        }
    }

    /// Build a model from a tree source.
    #[must_use]
    pub fn from_source(source: &Value, config: &TreeConfig) -> Self {
        let mut model = Self::new(config.clone());
        model.roots = model.build_roots(source);
        model
    }

    fn build_roots(&self, source: &Value) -> Vec<TreeNode> {
        let nodes: Vec<TreeNode> = match source {
            Value::Array(items) => items.iter().filter_map(TreeNode::from_source).collect(),
            other => TreeNode::from_source(other).into_iter().collect(),
        };
        nodes
            .into_iter()
            .map(|mut root| {
                root.role = NodeRole::Root;
                if !root.pinned {
                    root.expanded = self.config.expand_roots;
                }
                root
            })
            .collect()
    }

    /// Replace the whole structure with fresh nodes built from `source`.
    pub fn replace(&mut self, source: &Value) {
        let mut roots = self.build_roots(source);
        if self.config.replace_policy == ReplacePolicy::PreservePaths {
            let mut states = HashMap::new();
            collect_states(&self.roots, &mut Vec::new(), &mut states);
            apply_states(&mut roots, &mut Vec::new(), &states);
        }
        debug!(
            roots = roots.len(),
            policy = ?self.config.replace_policy,
            "tree replaced"
        );
        self.roots = roots;
    }

    #[must_use]
    pub fn roots(&self) -> &[TreeNode] {
        &self.roots
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    #[must_use]
    pub fn node(&self, path: &[usize]) -> Option<&TreeNode> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.roots.get(*first)?, |node, i| node.children.get(*i))
    }

    fn node_mut(&mut self, path: &[usize]) -> Option<&mut TreeNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots.get_mut(*first)?;
        for i in rest {
            node = node.children.get_mut(*i)?;
        }
        Some(node)
    }

    /// Flip the node at `path`. Returns its new state, or `None` for a path
    /// that does not exist.
    pub fn toggle(&mut self, path: &[usize]) -> Option<bool> {
        let node = self.node_mut(path)?;
        node.toggle_expanded();
        trace!(?path, expanded = node.expanded, "node toggled");
        Some(node.expanded)
    }

    /// Set the node at `path`. Returns `false` for a path that does not
    /// exist.
    pub fn set_expanded(&mut self, path: &[usize], expanded: bool) -> bool {
        match self.node_mut(path) {
            Some(node) => {
                node.expanded = expanded;
                true
            }
            None => false,
        }
    }

    /// Label paths of every expanded node with children, sorted.
    #[must_use]
    pub fn expanded_paths(&self) -> Vec<Vec<String>> {
        let mut states = HashMap::new();
        collect_states(&self.roots, &mut Vec::new(), &mut states);
        let mut paths: Vec<Vec<String>> = states
            .into_iter()
            .filter(|(_, expanded)| *expanded)
            .map(|(path, _)| path.into_iter().map(|(label, _)| label).collect())
            .collect();
        paths.sort();
        paths
    }

    /// Flatten the visible part of the tree in display order.
    #[must_use]
    pub fn visible_rows(&self) -> Vec<VisibleRow> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        for (i, root) in self.roots.iter().enumerate() {
            path.push(i);
            root.rows(&mut path, 0, &mut out);
            path.pop();
        }
        out
    }

    #[must_use]
    pub fn visible_count(&self) -> usize {
        self.roots.iter().map(TreeNode::visible_count).sum()
    }
}

/// A [`TreeModel`] kept in step with one view property.
///
/// Every change of the property rebuilds the model through
/// [`TreeModel::replace`]. Dropping the view stops the updates.
pub struct TreeView {
    model: Rc<RefCell<TreeModel>>,
    _guard: WatchGuard,
}

impl TreeView {
    pub fn bind(view: &ViewState, prop: &str, config: TreeConfig) -> Self {
        let initial = view.get(prop).unwrap_or(Value::Null);
        let model = Rc::new(RefCell::new(TreeModel::from_source(&initial, &config)));

        let target = Rc::clone(&model);
        let guard = view.watch(prop, move |source| {
            target.borrow_mut().replace(source);
        });
        Self {
            model,
            _guard: guard,
        }
    }

    #[must_use]
    pub fn model(&self) -> Ref<'_, TreeModel> {
        self.model.borrow()
    }

    pub fn toggle(&self, path: &[usize]) -> Option<bool> {
        self.model.borrow_mut().toggle(path)
    }

    #[must_use]
    pub fn visible_rows(&self) -> Vec<VisibleRow> {
        self.model.borrow().visible_rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> Value {
        json!([
            {"label": "Point (2.35, 48.86) at 76m/px", "children": ["Longitude: 2.35", "Latitude: 48.86"]},
            {"label": "Pixels", "children": [
                {"label": "SRTM: Image (1 band)", "children": ["elevation: 35"]},
                {"label": "NDVI: Image (1 band)", "expanded": true, "children": ["NDVI: 0.42"]}
            ]}
        ])
    }

    #[test]
    fn roles_follow_structure() {
        let model = TreeModel::from_source(&source(), &TreeConfig::default());
        assert_eq!(model.node(&[0]).unwrap().role(), NodeRole::Root);
        assert_eq!(model.node(&[1, 0]).unwrap().role(), NodeRole::Branch);
        assert_eq!(model.node(&[1, 0, 0]).unwrap().role(), NodeRole::Leaf);
    }

    #[test]
    fn non_root_nodes_start_collapsed() {
        let model = TreeModel::from_source(&source(), &TreeConfig::default());
        assert!(model.node(&[1]).unwrap().is_expanded());
        assert!(!model.node(&[1, 0]).unwrap().is_expanded());
        assert!(model.node(&[1, 1]).unwrap().is_expanded());
    }

    #[test]
    fn root_expansion_follows_config() {
        let config = TreeConfig {
            expand_roots: false,
            ..TreeConfig::default()
        };
        let model = TreeModel::from_source(&source(), &config);
        assert!(!model.node(&[0]).unwrap().is_expanded());
        assert_eq!(model.visible_rows().len(), 2);
    }

    #[test]
    fn alternate_keys_and_bare_values() {
        let node = TreeNode::from_source(&json!({
            "name": "Objects",
            "opened": true,
            "nodes": ["a", 3, null, [1, 2]]
        }))
        .unwrap();
        assert_eq!(node.label(), "Objects");
        assert!(node.is_expanded());
        let labels: Vec<&str> = node.children().iter().map(TreeNode::label).collect();
        assert_eq!(labels, vec!["a", "3"]);
    }

    #[test]
    fn single_object_is_one_root() {
        let model = TreeModel::from_source(&json!({"label": "only"}), &TreeConfig::default());
        assert_eq!(model.roots().len(), 1);
        assert_eq!(model.roots()[0].role(), NodeRole::Root);
    }

    #[test]
    fn toggle_twice_restores_state() {
        let mut model = TreeModel::from_source(&source(), &TreeConfig::default());
        let before = model.clone();
        assert_eq!(model.toggle(&[1, 0]), Some(true));
        assert_eq!(model.toggle(&[1, 0]), Some(false));
        assert_eq!(model, before);
    }

    #[test]
    fn toggle_does_not_recurse() {
        let mut model = TreeModel::from_source(&source(), &TreeConfig::default());
        model.toggle(&[1]);
        assert!(!model.node(&[1]).unwrap().is_expanded());
        assert!(model.node(&[1, 1]).unwrap().is_expanded());
    }

    #[test]
    fn toggle_unknown_path() {
        let mut model = TreeModel::from_source(&source(), &TreeConfig::default());
        assert_eq!(model.toggle(&[5]), None);
        assert_eq!(model.toggle(&[]), None);
        assert!(!model.set_expanded(&[1, 9], true));
    }

    #[test]
    fn visible_rows_skip_collapsed_subtrees() {
        let model = TreeModel::from_source(&source(), &TreeConfig::default());
        let rows = model.visible_rows();
        let labels: Vec<&str> = rows.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "Point (2.35, 48.86) at 76m/px",
                "Longitude: 2.35",
                "Latitude: 48.86",
                "Pixels",
                "SRTM: Image (1 band)",
                "NDVI: Image (1 band)",
                "NDVI: 0.42",
            ]
        );
        assert_eq!(rows[0].affordance, Affordance::Root { expanded: true });
        assert_eq!(rows[4].affordance, Affordance::Branch { expanded: false });
        assert_eq!(rows[6].affordance, Affordance::Leaf);
        assert_eq!(rows[6].path, vec![1, 1, 0]);
        assert_eq!(rows[6].depth, 2);
        assert_eq!(model.visible_count(), rows.len());
    }

    #[test]
    fn replace_honours_embedded_flags() {
        let config = TreeConfig {
            replace_policy: ReplacePolicy::SourceFlags,
            ..TreeConfig::default()
        };
        let mut model = TreeModel::from_source(&source(), &config);
        model.toggle(&[1, 0]);

        model.replace(&json!([
            {"label": "Pixels", "children": [
                {"label": "SRTM: Image (1 band)", "children": ["elevation: 40"]},
                {"label": "Landsat: Image (3 bands)", "expanded": true, "children": ["B4: 0.1"]}
            ]}
        ]));

        assert!(!model.node(&[0, 0]).unwrap().is_expanded());
        assert!(model.node(&[0, 1]).unwrap().is_expanded());
    }

    #[test]
    fn replace_preserves_open_paths() {
        let mut model = TreeModel::from_source(&source(), &TreeConfig::default());
        model.toggle(&[1, 0]);
        model.toggle(&[1, 1]);

        model.replace(&json!([
            {"label": "Pixels", "children": [
                {"label": "SRTM: Image (1 band)", "children": ["elevation: 40"]},
                {"label": "NDVI: Image (1 band)", "children": ["NDVI: 0.5"]},
                {"label": "New: Image (1 band)", "children": ["x: 1"]}
            ]}
        ]));

        assert!(model.node(&[0, 0]).unwrap().is_expanded());
        assert!(!model.node(&[0, 1]).unwrap().is_expanded());
        assert!(!model.node(&[0, 2]).unwrap().is_expanded());
        assert_eq!(
            model.node(&[0, 0, 0]).unwrap().label(),
            "elevation: 40"
        );
    }

    #[test]
    fn embedded_flag_beats_preserved_state() {
        let mut model = TreeModel::from_source(&source(), &TreeConfig::default());
        model.replace(&json!([
            {"label": "Pixels", "expanded": false, "children": ["x"]}
        ]));
        assert!(!model.node(&[0]).unwrap().is_expanded());
    }

    #[test]
    fn expanded_paths_are_label_paths() {
        let model = TreeModel::from_source(&source(), &TreeConfig::default());
        assert_eq!(
            model.expanded_paths(),
            vec![
                vec!["Pixels".to_string()],
                vec!["Pixels".to_string(), "NDVI: Image (1 band)".to_string()],
                vec!["Point (2.35, 48.86) at 76m/px".to_string()],
            ]
        );
    }

    #[test]
    fn slash_in_label_does_not_alias_a_deeper_path() {
        let config = TreeConfig {
            expand_roots: false,
            ..TreeConfig::default()
        };
        let mut model = TreeModel::from_source(
            &json!([
                {"label": "a", "children": [{"label": "b", "children": ["x"]}]},
                {"label": "a/b", "children": ["y"]}
            ]),
            &config,
        );
        model.set_expanded(&[0, 0], true);

        model.replace(&json!([
            {"label": "a", "children": [{"label": "b", "children": ["x"]}]},
            {"label": "a/b", "children": ["y"]}
        ]));

        assert!(model.node(&[0, 0]).unwrap().is_expanded());
        assert!(!model.node(&[1]).unwrap().is_expanded());
    }

    #[test]
    fn repeated_sibling_labels_keep_their_own_state() {
        let mut model = TreeModel::from_source(
            &json!([{"label": "Objects", "children": [
                {"label": "roads", "children": ["id: 1"]},
                {"label": "roads", "children": ["id: 2"]}
            ]}]),
            &TreeConfig::default(),
        );
        model.set_expanded(&[0, 1], true);

        model.replace(&json!([{"label": "Objects", "children": [
            {"label": "roads", "children": ["id: 1"]},
            {"label": "roads", "children": ["id: 3"]}
        ]}]));

        assert!(!model.node(&[0, 0]).unwrap().is_expanded());
        assert!(model.node(&[0, 1]).unwrap().is_expanded());
    }

    #[test]
    fn tree_view_rebuilds_on_property_change() {
        let view = ViewState::new();
        let tree = TreeView::bind(&view, "inspection", TreeConfig::default());
        assert!(tree.model().is_empty());

        view.set("inspection", source());
        assert_eq!(tree.model().roots().len(), 2);

        tree.toggle(&[1, 0]);
        view.set(
            "inspection",
            json!([{"label": "Pixels", "children": [
                {"label": "SRTM: Image (1 band)", "children": ["elevation: 12"]}
            ]}]),
        );
        assert!(tree.model().node(&[0, 0]).unwrap().is_expanded());
        assert_eq!(tree.visible_rows().len(), 3);
    }
}
