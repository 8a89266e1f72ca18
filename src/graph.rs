//! The constrained alignment graph between an above and a below sequence.
//!
//! A node (a,b) says that the first `a` above symbols have been aligned to the first `b` below
//! symbols. Every edge consumes exactly one above symbol and between `min_below` and `max_below`
//! below symbols, so the lexicographic order of (a,b) is a topological order and a single pass
//! suffices for any dynamic programming over the graph.
//! Only the nodes lying on some path from (0,0) to (La,Lb) are kept.
use crate::alphabet::SymbolEncoder;
use crate::error::{AlignError, Result};
use std::io::{BufRead, Write};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from_above: usize,
    pub from_below: usize,
    /// Encoded id of the consumed (above symbol, below chunk).
    pub symbol: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub above: usize,
    pub below: usize,
    pub incoming: Vec<Edge>,
}

impl Node {
    pub fn is_root(&self) -> bool {
        self.above == 0 && self.below == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentGraph {
    above_len: usize,
    below_len: usize,
    // Sorted by (above, below). The first one is the root.
    nodes: Vec<Node>,
    // (above * (below_len + 1) + below) -> position in `nodes`.
    index: Vec<Option<usize>>,
}

impl AlignmentGraph {
    /// Build the graph of all the alignments of `above_len` symbols against `below_len` symbols
    /// where each above symbol consumes `min_below..=max_below` below symbols.
    /// `encode(i, range)` should return the id of the i-th above symbol
    /// paired with the `range` of the below sequence.
    /// It is only called for edges of the final graph.
    pub fn new<F>(
        above_len: usize,
        below_len: usize,
        min_below: usize,
        max_below: usize,
        mut encode: F,
    ) -> Result<Self>
    where
        F: FnMut(usize, Range<usize>) -> usize,
    {
        let width = below_len + 1;
        let steps = || (min_below..=max_below);
        // forward[a * width + b] : (a,b) is reachable from (0,0).
        let mut forward = vec![false; (above_len + 1) * width];
        forward[0] = true;
        for a in 1..=above_len {
            for b in 0..width {
                forward[a * width + b] = steps()
                    .take_while(|&k| k <= b)
                    .any(|k| forward[(a - 1) * width + b - k]);
            }
        }
        if !forward[above_len * width + below_len] {
            return Err(AlignError::NotAlignable {
                above: above_len,
                below: below_len,
                min_below,
                max_below,
            });
        }
        // backward[a * width + b] : (La,Lb) is reachable from (a,b).
        let mut backward = vec![false; (above_len + 1) * width];
        backward[above_len * width + below_len] = true;
        for a in (0..above_len).rev() {
            for b in 0..width {
                backward[a * width + b] = steps()
                    .take_while(|&k| b + k < width)
                    .any(|k| backward[(a + 1) * width + b + k]);
            }
        }
        let mut nodes = vec![];
        let mut index = vec![None; (above_len + 1) * width];
        for a in 0..=above_len {
            for b in 0..width {
                if !(forward[a * width + b] && backward[a * width + b]) {
                    continue;
                }
                let incoming: Vec<_> = match a {
                    0 => vec![],
                    _ => steps()
                        .take_while(|&k| k <= b)
                        .filter(|&k| index[(a - 1) * width + b - k].is_some())
                        .map(|k| Edge {
                            from_above: a - 1,
                            from_below: b - k,
                            symbol: encode(a - 1, b - k..b),
                        })
                        .collect(),
                };
                index[a * width + b] = Some(nodes.len());
                nodes.push(Node {
                    above: a,
                    below: b,
                    incoming,
                });
            }
        }
        Ok(Self {
            above_len,
            below_len,
            nodes,
            index,
        })
    }
    /// Graph of a sequence pair, bounded and labeled by `encoder`.
    pub fn from_pair<E: SymbolEncoder + ?Sized>(
        above: &[u8],
        below: &[u8],
        encoder: &E,
    ) -> Result<Self> {
        Self::new(
            above.len(),
            below.len(),
            encoder.min_below(),
            encoder.max_below(),
            |a, range| encoder.encode(above[a], &below[range]),
        )
    }
    // Assemble a graph from nodes sorted by (above, below). Edges are not checked.
    pub(crate) fn from_nodes(
        above_len: usize,
        below_len: usize,
        nodes: Vec<Node>,
    ) -> Result<Self> {
        let last = nodes.last().map(|n| (n.above, n.below));
        if last != Some((above_len, below_len)) || nodes.len() <= above_len {
            return Err(AlignError::Invariant(format!(
                "{} nodes can not span ({},{})",
                nodes.len(),
                above_len,
                below_len
            )));
        }
        let width = below_len.checked_add(1);
        let size = width.and_then(|w| above_len.checked_add(1)?.checked_mul(w));
        let (width, size) = match (width, size) {
            (Some(width), Some(size)) => (width, size),
            _ => {
                return Err(AlignError::Invariant(format!(
                    "({},{}) is too large",
                    above_len, below_len
                )))
            }
        };
        let mut index = vec![None; size];
        for (i, node) in nodes.iter().enumerate() {
            if above_len < node.above || below_len < node.below {
                return Err(AlignError::Invariant(format!(
                    "node ({},{}) is out of ({},{})",
                    node.above, node.below, above_len, below_len
                )));
            }
            index[node.above * width + node.below] = Some(i);
        }
        let sorted = nodes
            .windows(2)
            .all(|w| (w[0].above, w[0].below) < (w[1].above, w[1].below));
        if !sorted || nodes.first().map(|n| n.is_root()) != Some(true) {
            return Err(AlignError::Invariant(
                "nodes should be sorted and start from the root".to_string(),
            ));
        }
        Ok(Self {
            above_len,
            below_len,
            nodes,
            index,
        })
    }
    pub fn above_len(&self) -> usize {
        self.above_len
    }
    pub fn below_len(&self) -> usize {
        self.below_len
    }
    /// Nodes in topological order. The root comes first.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    pub fn edges(&self) -> usize {
        self.nodes.iter().map(|n| n.incoming.len()).sum()
    }
    /// Position of (above, below) in [AlignmentGraph::nodes].
    pub fn index_of(&self, above: usize, below: usize) -> Option<usize> {
        if self.above_len < above || self.below_len < below {
            return None;
        }
        self.index[above * (self.below_len + 1) + below]
    }
    pub fn node(&self, above: usize, below: usize) -> Option<&Node> {
        self.index_of(above, below).map(|i| &self.nodes[i])
    }
    pub fn write_to<W: Write>(&self, wtr: &mut W) -> std::io::Result<()> {
        writeln!(wtr, "{} {} {}", self.above_len, self.below_len, self.nodes.len())?;
        for node in self.nodes.iter() {
            writeln!(wtr, "{} {} {}", node.above, node.below, node.incoming.len())?;
            for edge in node.incoming.iter() {
                writeln!(wtr, "{} {} {}", edge.from_above, edge.from_below, edge.symbol)?;
            }
        }
        Ok(())
    }
}

/// Lazily reads graphs written one after another by [AlignmentGraph::write_to].
pub struct GraphReader<R: BufRead> {
    lines: std::io::Lines<R>,
    number: usize,
}

impl<R: BufRead> GraphReader<R> {
    pub fn new(rdr: R) -> Self {
        Self {
            lines: rdr.lines(),
            number: 0,
        }
    }
    fn triple(&mut self, line: Option<std::io::Result<String>>) -> Result<(usize, usize, usize)> {
        self.number += 1;
        let number = self.number;
        let line = line.ok_or_else(|| AlignError::format(number, "unexpected end of graph"))??;
        let fields: Vec<usize> = line
            .split_whitespace()
            .map(|x| x.parse())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| AlignError::format(self.number, format!("bad line {:?}", line)))?;
        match fields.as_slice() {
            &[x, y, z] => Ok((x, y, z)),
            _ => Err(AlignError::format(self.number, "expected three fields")),
        }
    }
    fn graph(&mut self, header: std::io::Result<String>) -> Result<AlignmentGraph> {
        let (above_len, below_len, node_num) = self.triple(Some(header))?;
        let start = self.number;
        // Counts in the header are not trusted.
        let mut nodes = vec![];
        for _ in 0..node_num {
            let line = self.lines.next();
            let (above, below, edge_num) = self.triple(line)?;
            let mut incoming = vec![];
            for _ in 0..edge_num {
                let line = self.lines.next();
                let (from_above, from_below, symbol) = self.triple(line)?;
                incoming.push(Edge {
                    from_above,
                    from_below,
                    symbol,
                });
            }
            nodes.push(Node {
                above,
                below,
                incoming,
            });
        }
        let graph = AlignmentGraph::from_nodes(above_len, below_len, nodes)
            .map_err(|e| AlignError::format(start, e.to_string()))?;
        let dangling = graph.nodes().iter().flat_map(|n| n.incoming.iter()).any(|e| {
            graph.index_of(e.from_above, e.from_below).is_none()
        });
        if dangling {
            return Err(AlignError::format(start, "edge from a missing node"));
        }
        Ok(graph)
    }
}

impl<R: BufRead> Iterator for GraphReader<R> {
    type Item = Result<AlignmentGraph>;
    fn next(&mut self) -> Option<Self::Item> {
        let header = self.lines.next()?;
        Some(self.graph(header))
    }
}
