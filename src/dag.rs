//! Workflow graph model and dot-format rendering.

use serde::{Deserialize, Serialize};

/// Rendering class of a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexKind {
    Node,
    Origin,
    Operator,
    Process,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    pub name: String,
    pub label: Option<String>,
    pub kind: VertexKind,
}

impl Vertex {
    pub fn new(name: impl Into<String>, kind: VertexKind) -> Self {
        Self {
            name: name.into(),
            label: None,
            kind,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Dot attribute list for this vertex, empty when the vertex renders
    /// without a declaration line.
    fn attrs(&self) -> Vec<String> {
        let mut attrs = Vec::new();
        match self.kind {
            VertexKind::Node => {
                attrs.push("shape=point".to_string());
                if let Some(label) = &self.label {
                    attrs.push("label=\"\"".to_string());
                    attrs.push(format!("xlabel=\"{}\"", label));
                }
            }
            VertexKind::Origin => {
                attrs.push("shape=point,label=\"\",fixedsize=true,width=0.1".to_string());
                if let Some(label) = &self.label {
                    attrs.push(format!("xlabel=\"{}\"", label));
                }
            }
            VertexKind::Operator => {
                attrs.push("shape=circle,label=\"\",fixedsize=true,width=0.1".to_string());
                if let Some(label) = &self.label {
                    attrs.push(format!("xlabel=\"{}\"", label));
                }
            }
            VertexKind::Process => {
                if let Some(label) = &self.label {
                    attrs.push(format!("label=\"{}\"", label));
                }
            }
            VertexKind::Other => {
                attrs.push("shape=none".to_string());
                if let Some(label) = &self.label {
                    attrs.push(format!("label=\"{}\"", label));
                }
            }
        }
        attrs
    }
}

/// A directed edge. Both endpoints are always present.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: Vertex,
    pub to: Vertex,
    pub label: Option<String>,
}

/// The workflow graph: an insertion-ordered set of directed edges.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    edges: Vec<Edge>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, from: Vertex, to: Vertex, label: Option<String>) {
        self.edges.push(Edge { from, to, label });
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Render the graph in dot format. Each edge contributes one block:
    /// endpoint declarations (when the vertex yields attributes) followed by
    /// the edge line. Output is deterministic in edge insertion order.
    pub fn render(&self) -> String {
        let mut lines = vec!["digraph graphname {".to_string()];
        for edge in &self.edges {
            for vertex in [&edge.from, &edge.to] {
                let attrs = vertex.attrs();
                if !attrs.is_empty() {
                    lines.push(format!("{} [{}];", vertex.name, attrs.join(",")));
                }
            }
            match &edge.label {
                Some(label) => {
                    lines.push(format!("{} -> {} [label=\"{}\"];", edge.from.name, edge.to.name, label))
                }
                None => lines.push(format!("{} -> {};", edge.from.name, edge.to.name)),
            }
        }
        lines.push("}".to_string());
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlabelled_process_yields_no_declaration() {
        let mut dag = Dag::new();
        dag.add_edge(
            Vertex::new("p1", VertexKind::Process),
            Vertex::new("p2", VertexKind::Process).with_label("p2"),
            None,
        );

        let out = dag.render();
        assert!(!out.contains("p1 ["));
        assert!(out.contains("p2 [label=\"p2\"];"));
        assert!(out.contains("p1 -> p2;"));
    }

    #[test]
    fn test_labelled_node_gets_xlabel() {
        let mut dag = Dag::new();
        dag.add_edge(
            Vertex::new("n", VertexKind::Node).with_label("ch"),
            Vertex::new("x", VertexKind::Other),
            None,
        );

        let out = dag.render();
        assert!(out.contains("n [shape=point,label=\"\",xlabel=\"ch\"];"));
        assert!(out.contains("x [shape=none];"));
    }
}
