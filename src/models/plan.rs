use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingSchema {
    pub document_type: String,
    pub pattern: String,
    pub example: Option<String>,
    pub description: Option<String>,
    pub placeholders: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagNode {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Tag hierarchy stored as an arena. Tag names are unique; `index` maps a
/// name to its slot in `nodes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagTaxonomy {
    nodes: Vec<TagNode>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl TagTaxonomy {
    /// Builds the arena from the planner's nested `{name: {description,
    /// color, children: {...}}}` object. Non-object entries are skipped. A
    /// name seen twice keeps its first parent; children from both places are
    /// merged under it.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut taxonomy = Self::default();
        if let Some(map) = value.as_object() {
            taxonomy.insert_level(map, None);
        }
        taxonomy
    }

    fn insert_level(
        &mut self,
        level: &serde_json::Map<String, serde_json::Value>,
        parent: Option<usize>,
    ) {
        for (name, data) in level {
            let Some(data) = data.as_object() else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let description = data
                .get("description")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let color = data.get("color").and_then(|v| v.as_str()).map(str::to_string);

            let idx = match self.index.get(name).copied() {
                Some(existing) => {
                    let node = &mut self.nodes[existing];
                    if node.description.is_none() {
                        node.description = description;
                    }
                    if node.color.is_none() {
                        node.color = color;
                    }
                    existing
                }
                None => self.push(name, description, color, parent),
            };

            if let Some(children) = data.get("children").and_then(|v| v.as_object()) {
                self.insert_level(children, Some(idx));
            }
        }
    }

    pub fn push(
        &mut self,
        name: &str,
        description: Option<String>,
        color: Option<String>,
        parent: Option<usize>,
    ) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(TagNode {
            name: name.to_string(),
            description,
            color,
            parent,
            children: Vec::new(),
        });
        if let Some(parent_idx) = parent {
            if let Some(parent_node) = self.nodes.get_mut(parent_idx) {
                parent_node.children.push(idx);
            }
        }
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Rebuilds the name index, e.g. after deserializing.
    pub fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.name.clone(), idx))
            .collect();
    }

    pub fn get(&self, name: &str) -> Option<&TagNode> {
        self.index.get(name).map(|&idx| &self.nodes[idx])
    }

    pub fn nodes(&self) -> &[TagNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent_name(&self, node: &TagNode) -> Option<&str> {
        node.parent.map(|idx| self.nodes[idx].name.as_str())
    }

    /// Root-to-node names, e.g. `["finance", "budgets"]`.
    pub fn lineage(&self, name: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut cursor = self.index.get(name).copied();
        while let Some(idx) = cursor {
            let node = &self.nodes[idx];
            out.push(node.name.as_str());
            cursor = node.parent;
        }
        out.reverse();
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySpec {
    pub path: String,
    pub purpose: Option<String>,
    pub expected_types: Vec<String>,
    pub expected_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAssignment {
    pub file_id: i64,
    #[serde(default)]
    pub proposed_name: Option<String>,
    /// Destination directory; `None` keeps the current one.
    #[serde(default)]
    pub proposed_path: Option<String>,
    #[serde(default)]
    pub proposed_tags: Vec<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl FileAssignment {
    pub fn has_changes(&self) -> bool {
        self.proposed_name.is_some() || self.proposed_path.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationPlan {
    pub naming_schemas: Vec<NamingSchema>,
    pub tag_taxonomy: TagTaxonomy,
    pub directory_structure: Vec<DirectorySpec>,
    pub file_assignments: Vec<FileAssignment>,
}

/// A planned working-tree directory as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedDirectory {
    pub path: String,
    pub folder_name: String,
    pub parent_path: Option<String>,
    pub depth: usize,
    pub purpose: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn taxonomy_arena_links_parents_and_children() {
        let taxonomy = TagTaxonomy::from_json(&json!({
            "finance": {
                "description": "Money",
                "color": "#00ff00",
                "children": {
                    "budgets": {"description": "Annual budgets"},
                    "invoices": {"children": {"paid": {}}}
                }
            },
            "bogus": "not an object"
        }));

        assert_eq!(taxonomy.len(), 4);
        assert!(taxonomy.get("bogus").is_none());
        let paid = taxonomy.get("paid").unwrap();
        assert_eq!(taxonomy.parent_name(paid), Some("invoices"));
        assert_eq!(taxonomy.lineage("paid"), vec!["finance", "invoices", "paid"]);
        assert_eq!(taxonomy.get("finance").unwrap().children.len(), 2);
    }

    #[test]
    fn repeated_tag_names_collapse_into_one_node() {
        let taxonomy = TagTaxonomy::from_json(&json!({
            "personal": {"children": {"reports": {}}},
            "work": {"children": {"reports": {"description": "late"}}}
        }));
        assert_eq!(taxonomy.len(), 3);
        let reports = taxonomy.get("reports").unwrap();
        assert_eq!(reports.description.as_deref(), Some("late"));
        assert_eq!(taxonomy.parent_name(reports), Some("personal"));
    }

    #[test]
    fn reindex_restores_lookup_after_deserialize() {
        let taxonomy = TagTaxonomy::from_json(&json!({"a": {"children": {"b": {}}}}));
        let raw = serde_json::to_string(&taxonomy).unwrap();
        let mut restored: TagTaxonomy = serde_json::from_str(&raw).unwrap();
        assert!(restored.get("b").is_none());
        restored.reindex();
        assert_eq!(restored.lineage("b"), vec!["a", "b"]);
    }
}
