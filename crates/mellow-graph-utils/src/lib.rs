//! Utilities shared by the task engine for working with `petgraph` DAGs:
//! acyclicity validation and a dependency-ordered concurrent walk.

mod walker;

use std::{fmt::Display, hash::Hash};

use itertools::Itertools as _;
use petgraph::{prelude::*, visit::EdgeRef};
use thiserror::Error;
pub use walker::{WalkMessage, Walker};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cyclic dependency detected: {0}")]
    CyclicDependencies(String),
    #[error("{0} depends on itself")]
    SelfDependency(String),
}

/// Checks that `graph` is a DAG, naming the members of one strongly
/// connected component when it is not.
pub fn validate_graph<N: Display + Hash + Eq, E>(graph: &Graph<N, E>) -> Result<(), Error> {
    for scc in petgraph::algo::tarjan_scc(graph) {
        if scc.len() > 1 {
            let members = scc
                .into_iter()
                .filter_map(|ix| graph.node_weight(ix))
                .map(|n| n.to_string())
                .sorted()
                .join(", ");
            return Err(Error::CyclicDependencies(members));
        }
    }
    for edge in graph.edge_references() {
        if edge.source() == edge.target() {
            let node = graph
                .node_weight(edge.source())
                .expect("edge endpoints exist in the graph");
            return Err(Error::SelfDependency(node.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dag() {
        let mut g = Graph::new();
        let a = g.add_node("a");
        let b = g.add_node("b");
        g.add_edge(a, b, ());
        assert!(validate_graph(&g).is_ok());
    }

    #[test]
    fn reports_cycle_members() {
        let mut g = Graph::new();
        let a = g.add_node("a");
        let b = g.add_node("b");
        let c = g.add_node("c");
        g.add_edge(a, b, ());
        g.add_edge(b, c, ());
        g.add_edge(c, a, ());
        let err = validate_graph(&g).unwrap_err();
        assert_eq!(err.to_string(), "cyclic dependency detected: a, b, c");
    }

    #[test]
    fn reports_self_edge() {
        let mut g = Graph::new();
        let a = g.add_node("a");
        g.add_edge(a, a, ());
        let err = validate_graph(&g).unwrap_err();
        assert!(matches!(err, Error::SelfDependency(_)));
    }
}
