use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::NodeId;
use crate::engine::Pipe;
use crate::error::BuildError;

/// Static view of every node reachable from a root.
///
/// Edges point in the direction data flows, from an upstream to the node
/// that consumes it. The view is only used for validation and rendering, the
/// pipeline itself is never driven through it.
pub struct Topology {
    graph: Graph<Pipe, ()>,
    root: NodeIndex,
}

impl Topology {
    pub fn of(root: &Pipe) -> Self {
        let mut graph = Graph::new();
        let mut seen: HashMap<NodeId, NodeIndex> = HashMap::new();

        let root_index = graph.add_node(root.clone());
        seen.insert(root.id(), root_index);

        let mut stack = vec![(root.clone(), root_index)];
        while let Some((pipe, index)) = stack.pop() {
            for input in pipe.inputs() {
                let input_index = match seen.get(&input.id()) {
                    Some(&known) => known,
                    None => {
                        let added = graph.add_node(input.clone());
                        seen.insert(input.id(), added);
                        stack.push((input, added));
                        added
                    }
                };
                graph.update_edge(input_index, index, ());
            }
        }

        Self {
            graph,
            root: root_index,
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Checks the graph is acyclic and returns the nodes upstream first.
    pub fn validate(&self) -> Result<Vec<Pipe>, BuildError> {
        petgraph::algo::toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|i| self.graph[i].clone()).collect())
            .map_err(|cycle| BuildError::Cycle(self.graph[cycle.node_id()].name()))
    }

    /// Origins, the nodes without any upstream.
    pub fn origins(&self) -> Vec<Pipe> {
        self.graph
            .externals(petgraph::Direction::Incoming)
            .map(|i| self.graph[i].clone())
            .collect()
    }

    pub fn render_mermaid(&self) -> String {
        self.to_string()
    }
}

impl Display for Topology {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index]
                .name()
                .replace('"', "#quot;")
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;
        }

        writeln!(f, "    {:?} --> Output", self.root.index())?;
        writeln!(f, "    Output[Output]")?;

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::collect::CollectList;
    use crate::source::IterableSource;

    #[test]
    fn test_topology_dedups_diamonds() {
        let source = Pipe::new(IterableSource::new(vec![json!({"a": 1, "b": 2})]));
        let list = CollectList::new();
        source.take("a").then(list.put());
        source.take("b").then(list.put());

        let topology = Topology::of(&list.pipe());
        // source, two takes, two puts, the collector
        assert_eq!(topology.len(), 6);
        assert_eq!(topology.origins().len(), 1);

        let order = topology.validate().unwrap();
        assert!(order[0].ptr_eq(&source));
        assert!(order.last().unwrap().ptr_eq(&list.pipe()));
    }

    #[test]
    fn test_topology_renders_mermaid() {
        let source = Pipe::new(IterableSource::new(vec![json!({"a": 1})]));
        let take = source.take("a");

        let out = Topology::of(&take).render_mermaid();
        assert!(out.starts_with("graph LR\n"));
        assert!(out.contains("[\"IterableSource\"]"));
        assert!(out.contains("[\"Take(#quot;a#quot;)\"]"));
        assert!(out.contains("1 --> 0"));
    }
}
