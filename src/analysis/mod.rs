//! Static analysis: the import graph, PageRank scoring, and query-time
//! context selection.

pub mod context;
pub mod dep_graph;
