use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Parent id used for components at the root of an analysis tree.
pub const ROOT_PARENT_ID: &str = "root";

/// Compute a stable 16-hex-char component id from its position in the tree.
///
/// The id only depends on `(parent_id, name, sibling_index)`, so re-running an
/// analysis on the same repository produces the same ids. `sibling_index`
/// disambiguates two siblings that share a name.
pub fn hash_component_id(parent_id: &str, name: &str, sibling_index: Option<usize>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(name.as_bytes());
    if let Some(index) = sibling_index {
        hasher.update([0x1f]);
        hasher.update(index.to_string().as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Normalize a repo-relative path: forward slashes, no leading `./`.
pub fn normalize_path(path: &str) -> String {
    let forward = path.replace('\\', "/");
    forward
        .strip_prefix("./")
        .map(str::to_string)
        .unwrap_or(forward)
}

/// Types rendered into prompts for the external collaborators implement this.
pub trait LlmText {
    fn llm_text(&self) -> String;
}

/// Kind of code entity in the static-analysis index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Class,
    Method,
    Function,
    Property,
    Field,
    Variable,
    Constant,
}

impl NodeKind {
    /// Callable entities participate in call-graph edges.
    pub fn is_callable(&self) -> bool {
        matches!(self, NodeKind::Method | NodeKind::Function)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeKind::Class => "Class",
            NodeKind::Method => "Method",
            NodeKind::Function => "Function",
            NodeKind::Property => "Property",
            NodeKind::Field => "Field",
            NodeKind::Variable => "Variable",
            NodeKind::Constant => "Constant",
        };
        write!(f, "{label}")
    }
}

/// A reference to a code entity picked by the details collaborator.
///
/// Lines are 1-based once resolution has succeeded; both are present or both
/// absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCodeReference {
    pub qualified_name: String,
    #[serde(default)]
    pub reference_file: Option<String>,
    #[serde(default)]
    pub reference_start_line: Option<u32>,
    #[serde(default)]
    pub reference_end_line: Option<u32>,
}

impl SourceCodeReference {
    pub fn new(qualified_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            reference_file: None,
            reference_start_line: None,
            reference_end_line: None,
        }
    }

    /// True when both line bounds are set and form a non-empty, positive range.
    pub fn has_line_range(&self) -> bool {
        match (self.reference_start_line, self.reference_end_line) {
            (Some(start), Some(end)) => start > 0 && start < end,
            _ => false,
        }
    }
}

impl LlmText for SourceCodeReference {
    fn llm_text(&self) -> String {
        let file = self.reference_file.as_deref().unwrap_or("?");
        if self.has_line_range() {
            format!(
                "QName:`{}` FileRef: `{}`, Lines:({}:{})",
                self.qualified_name,
                file,
                self.reference_start_line.unwrap_or(0),
                self.reference_end_line.unwrap_or(0),
            )
        } else {
            format!("QName:`{}` FileRef: `{}`", self.qualified_name, file)
        }
    }
}

impl fmt::Display for SourceCodeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_line_range() {
            write!(
                f,
                "`{}`:{}-{}",
                self.qualified_name,
                self.reference_start_line.unwrap_or(0),
                self.reference_end_line.unwrap_or(0),
            )
        } else {
            write!(f, "`{}`", self.qualified_name)
        }
    }
}

/// One callable or class node the static analyzer places in a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodEntry {
    pub qualified_name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub node_type: NodeKind,
}

/// All recorded nodes for one file of a component, ordered by start line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMethodGroup {
    pub file_path: String,
    #[serde(default)]
    pub methods: Vec<MethodEntry>,
}

impl FileMethodGroup {
    pub fn new(file_path: impl Into<String>, mut methods: Vec<MethodEntry>) -> Self {
        methods.sort_by_key(|m| m.start_line);
        Self {
            file_path: file_path.into(),
            methods,
        }
    }
}

/// A component of the architectural diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    #[serde(default)]
    pub component_id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub key_entities: Vec<SourceCodeReference>,
    #[serde(default)]
    pub assigned_files: Vec<String>,
    #[serde(default)]
    pub file_methods: Vec<FileMethodGroup>,
    #[serde(default)]
    pub source_cluster_ids: Vec<usize>,
}

impl Component {
    /// Create a component with an id derived from its position under `parent_id`.
    pub fn new(
        parent_id: &str,
        name: impl Into<String>,
        description: impl Into<String>,
        sibling_index: Option<usize>,
    ) -> Self {
        let name = name.into();
        Self {
            component_id: hash_component_id(parent_id, &name, sibling_index),
            name,
            description: description.into(),
            key_entities: Vec::new(),
            assigned_files: Vec::new(),
            file_methods: Vec::new(),
            source_cluster_ids: Vec::new(),
        }
    }
}

impl LlmText for Component {
    fn llm_text(&self) -> String {
        let mut lines = vec![
            format!("**Component:** `{}`", self.name),
            format!("   - *Description*: {}", self.description),
        ];
        if !self.key_entities.is_empty() {
            let entities = self
                .key_entities
                .iter()
                .map(|e| format!("`{}`", e.llm_text()))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("   - *Key Entities*: {entities}"));
        }
        lines.join("\n")
    }
}

/// A named directed relation between two sibling components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub relation: String,
    pub src_name: String,
    pub dst_name: String,
}

impl LlmText for Relation {
    fn llm_text(&self) -> String {
        format!("({}, {}, {})", self.src_name, self.relation, self.dst_name)
    }
}

/// One level of the analysis tree: a description, components, and relations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInsights {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub components_relations: Vec<Relation>,
}

impl AnalysisInsights {
    pub fn component_by_id(&self, component_id: &str) -> Option<&Component> {
        self.components
            .iter()
            .find(|c| c.component_id == component_id)
    }

    pub fn component_by_id_mut(&mut self, component_id: &str) -> Option<&mut Component> {
        self.components
            .iter_mut()
            .find(|c| c.component_id == component_id)
    }

    pub fn component_by_name(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn component_names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name.as_str()).collect()
    }

    /// Look up by id, falling back to name for data written before ids existed.
    pub fn find_component(&self, key: &str) -> Option<&Component> {
        self.component_by_id(key).or_else(|| self.component_by_name(key))
    }

    pub fn find_component_mut(&mut self, key: &str) -> Option<&mut Component> {
        if self.component_by_id(key).is_some() {
            self.component_by_id_mut(key)
        } else {
            self.components.iter_mut().find(|c| c.name == key)
        }
    }
}

impl LlmText for AnalysisInsights {
    fn llm_text(&self) -> String {
        if self.components.is_empty() {
            return "No abstract components found.".to_string();
        }
        let body = self
            .components
            .iter()
            .map(LlmText::llm_text)
            .collect::<Vec<_>>()
            .join("\n");
        let relations = self
            .components_relations
            .iter()
            .map(LlmText::llm_text)
            .collect::<Vec<_>>()
            .join("\n");
        format!("# Abstract Components Overview\n{body}\n{relations}")
    }
}
