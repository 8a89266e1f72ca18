//! Viterbi decoding over an alignment graph.
//!
//! The decoder jointly chooses the hidden state of each step and the segmentation of the
//! below sequence, i.e., how many below symbols each above symbol consumes.
use crate::alphabet::SymbolEncoder;
use crate::dptable::DPTable;
use crate::error::{AlignError, Result};
use crate::graph::AlignmentGraph;
use crate::logspace::{elnproduct, LOGZERO};
use crate::model::MarkovModel;
use serde::{Deserialize, Serialize};

/// One decoded step: the cumulative positions reached in both sequences after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentElement {
    pub above: usize,
    pub below: usize,
}

impl AlignmentElement {
    pub fn new(above: usize, below: usize) -> Self {
        Self { above, below }
    }
}

/// Result of a Viterbi decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Log probability of the best path. [LOGZERO] if the pair was not alignable.
    pub log_probability: f64,
    pub elements: Vec<AlignmentElement>,
    /// Hidden state of each element. Empty if the pair was not alignable.
    pub states: Vec<usize>,
}

impl Decoded {
    fn full_span(above: usize, below: usize) -> Self {
        Self {
            log_probability: LOGZERO,
            elements: vec![AlignmentElement::new(above, below)],
            states: vec![],
        }
    }
}

/// Split `below` into the chunks consumed by each above symbol.
pub fn segments<'a>(below: &'a [u8], elements: &[AlignmentElement]) -> Vec<&'a [u8]> {
    let mut start = 0;
    elements
        .iter()
        .map(|e| {
            let chunk = &below[start..e.below];
            start = e.below;
            chunk
        })
        .collect()
}

/// Read-only consumer of a trained model.
#[derive(Debug, Clone)]
pub struct ViterbiAligner<'a, E: SymbolEncoder> {
    model: &'a MarkovModel,
    encoder: &'a E,
}

impl<'a, E: SymbolEncoder> ViterbiAligner<'a, E> {
    pub fn new(model: &'a MarkovModel, encoder: &'a E) -> Result<Self> {
        if model.symbols() < encoder.symbols() {
            return Err(AlignError::Invariant(format!(
                "the encoder has {} symbols but the model only {}",
                encoder.symbols(),
                model.symbols()
            )));
        }
        Ok(Self { model, encoder })
    }
    /// Best alignment of `above` and `below`.
    /// If the pair can not be aligned under the bounds of the encoder, the whole pair is
    /// returned as a single element.
    pub fn align(&self, above: &[u8], below: &[u8]) -> Result<Vec<AlignmentElement>> {
        self.decode(above, below).map(|decoded| decoded.elements)
    }
    /// Same as [ViterbiAligner::align], also returning the probability and the hidden states.
    pub fn decode(&self, above: &[u8], below: &[u8]) -> Result<Decoded> {
        match AlignmentGraph::from_pair(above, below, self.encoder) {
            Ok(graph) => self.decode_graph(&graph),
            Err(AlignError::NotAlignable { .. }) => {
                trace!("FALLBACK\t{}\t{}", above.len(), below.len());
                Ok(Decoded::full_span(above.len(), below.len()))
            }
            Err(why) => Err(why),
        }
    }
    pub fn decode_graph(&self, graph: &AlignmentGraph) -> Result<Decoded> {
        let model = self.model;
        let states = model.states();
        let (above_len, below_len) = (graph.above_len(), graph.below_len());
        if graph.len() <= 1 {
            return Ok(Decoded {
                log_probability: 0f64,
                elements: vec![],
                states: vec![],
            });
        }
        let mut dp = DPTable::new(above_len + 1, below_len + 1, states, LOGZERO);
        let mut trace: DPTable<Option<(usize, usize, usize)>> =
            DPTable::new(above_len + 1, below_len + 1, states, None);
        for node in graph.nodes().iter().skip(1) {
            for edge in node.incoming.iter() {
                if edge.from_above + 1 != node.above {
                    return Err(AlignError::Invariant(format!(
                        "edge ({},{})->({},{}) does not consume one above symbol",
                        edge.from_above, edge.from_below, node.above, node.below
                    )));
                }
                if model.symbols() <= edge.symbol {
                    return Err(AlignError::Invariant(format!(
                        "symbol {} is out of the model",
                        edge.symbol
                    )));
                }
            }
            for to in 0..states {
                let mut best: Option<(f64, (usize, usize, usize))> = None;
                for edge in node.incoming.iter() {
                    let emit = model.emission(to, edge.symbol);
                    let (x, y) = (edge.from_above, edge.from_below);
                    if x == 0 && y == 0 {
                        let lk = elnproduct(model.initial(to), emit);
                        if best.map_or(true, |(max, _)| max < lk) {
                            best = Some((lk, (0, 0, to)));
                        }
                    } else {
                        for from in 0..states {
                            let lk = elnproduct(
                                elnproduct(dp[(x, y, from)], model.transition(from, to)),
                                emit,
                            );
                            if best.map_or(true, |(max, _)| max < lk) {
                                best = Some((lk, (x, y, from)));
                            }
                        }
                    }
                }
                if let Some((lk, from)) = best {
                    dp[(node.above, node.below, to)] = lk;
                    trace[(node.above, node.below, to)] = Some(from);
                }
            }
        }
        // Termination.
        let (mut state, log_probability) = dp
            .get_cells(above_len, below_len)
            .iter()
            .enumerate()
            .fold((0, LOGZERO), |(argmax, max), (s, &lk)| {
                if max < lk {
                    (s, lk)
                } else {
                    (argmax, max)
                }
            });
        // Traceback.
        let (mut a, mut b) = (above_len, below_len);
        let mut elements = vec![];
        let mut path = vec![];
        while (a, b) != (0, 0) {
            elements.push(AlignmentElement::new(a, b));
            path.push(state);
            let (x, y, from) = trace[(a, b, state)].ok_or_else(|| {
                AlignError::Invariant(format!("no back pointer at ({},{},{})", a, b, state))
            })?;
            if x + 1 != a {
                return Err(AlignError::Invariant(format!(
                    "back pointer ({},{}) -> ({},{}) skips above symbols",
                    x, y, a, b
                )));
            }
            a = x;
            b = y;
            state = from;
        }
        elements.reverse();
        path.reverse();
        Ok(Decoded {
            log_probability,
            elements,
            states: path,
        })
    }
}
