//! Forward/backward over alignment graphs and the Baum-Welch update.
//!
//! Every quantity is kept in the log domain. The expected counts of a graph are accumulated
//! into [Statistics], statistics of different graphs are merged, and
//! [Statistics::maximize] turns them into the next model.
use crate::error::{AlignError, Result};
use crate::graph::AlignmentGraph;
use crate::logspace::{elndivision, elnproduct, elnsum, elnsum2, is_logzero, LOGZERO};
use crate::model::MarkovModel;
use rayon::prelude::*;

/// Expected counts of initial states, transitions, and emissions.
#[derive(Debug, Clone)]
pub struct Statistics {
    states: usize,
    symbols: usize,
    initial: Vec<f64>,
    transition: Vec<f64>,
    emission: Vec<f64>,
    /// Sum of the log likelihoods of the graphs that contributed.
    pub log_likelihood: f64,
    /// Number of graphs that contributed.
    pub graphs: usize,
    /// Number of graphs with zero probability under the model.
    pub skipped: usize,
}

impl Statistics {
    pub fn new(states: usize, symbols: usize) -> Self {
        Self {
            states,
            symbols,
            initial: vec![LOGZERO; states],
            transition: vec![LOGZERO; states * states],
            emission: vec![LOGZERO; states * symbols],
            log_likelihood: 0f64,
            graphs: 0,
            skipped: 0,
        }
    }
    /// Statistics of `graphs` under `model`, computed in parallel.
    pub fn from_graphs(model: &MarkovModel, graphs: &[AlignmentGraph]) -> Result<Self> {
        let (states, symbols) = (model.states(), model.symbols());
        graphs
            .par_iter()
            .map(|graph| {
                let mut stats = Self::new(states, symbols);
                stats.add(model, graph).map(|_| stats)
            })
            .reduce(
                || Ok(Self::new(states, symbols)),
                |x, y| Ok(x?.merge(y?)),
            )
    }
    /// Accumulate the expected counts of `graph`.
    pub fn add(&mut self, model: &MarkovModel, graph: &AlignmentGraph) -> Result<()> {
        let states = model.states();
        let sources = sources(model, graph)?;
        let forward = forward_inner(model, graph, &sources);
        let backward = backward_inner(model, graph, &sources);
        let total = total(model, graph, &forward);
        if is_logzero(total) {
            self.skipped += 1;
            return Ok(());
        }
        for (i, node) in graph.nodes().iter().enumerate().skip(1) {
            for (edge, &src) in node.incoming.iter().zip(sources[i].iter()) {
                for to in 0..states {
                    let emit = model.emission(to, edge.symbol);
                    let after = elndivision(elnproduct(emit, backward[i * states + to]), total);
                    if is_logzero(after) {
                        continue;
                    }
                    let slot = to * self.symbols + edge.symbol;
                    if src == 0 {
                        let count = elnproduct(model.initial(to), after);
                        self.initial[to] = elnsum2(self.initial[to], count);
                        self.emission[slot] = elnsum2(self.emission[slot], count);
                    } else {
                        let mut emitted = LOGZERO;
                        for from in 0..states {
                            let transit = model.transition(from, to);
                            let arrive = elnproduct(forward[src * states + from], transit);
                            let count = elnproduct(arrive, after);
                            let cell = from * states + to;
                            self.transition[cell] = elnsum2(self.transition[cell], count);
                            emitted = elnsum2(emitted, count);
                        }
                        self.emission[slot] = elnsum2(self.emission[slot], emitted);
                    }
                }
            }
        }
        self.log_likelihood += total;
        self.graphs += 1;
        Ok(())
    }
    pub fn merge(mut self, other: Self) -> Self {
        let sum = |xs: &mut [f64], ys: &[f64]| {
            xs.iter_mut()
                .zip(ys.iter())
                .for_each(|(x, &y)| *x = elnsum2(*x, y))
        };
        sum(&mut self.initial, &other.initial);
        sum(&mut self.transition, &other.transition);
        sum(&mut self.emission, &other.emission);
        self.log_likelihood += other.log_likelihood;
        self.graphs += other.graphs;
        self.skipped += other.skipped;
        self
    }
    /// log of the expected number of times `state` starts a path.
    pub fn initial(&self, state: usize) -> f64 {
        self.initial[state]
    }
    pub fn transition(&self, from: usize, to: usize) -> f64 {
        self.transition[from * self.states + to]
    }
    pub fn emission(&self, state: usize, symbol: usize) -> f64 {
        self.emission[state * self.symbols + symbol]
    }
    /// The next model. Rows without expected counts keep the values of `model`.
    pub fn maximize(&self, model: &MarkovModel) -> MarkovModel {
        model.renormalized(
            self.initial.clone(),
            self.transition.clone(),
            self.emission.clone(),
        )
    }
}

/// Total log probability of all the paths of `graph`.
pub fn log_likelihood(model: &MarkovModel, graph: &AlignmentGraph) -> Result<f64> {
    let sources = sources(model, graph)?;
    let forward = forward_inner(model, graph, &sources);
    Ok(total(model, graph, &forward))
}

/// Forward table, indexed by [node * states + state]
/// where node is the position in [AlignmentGraph::nodes].
pub fn forward(model: &MarkovModel, graph: &AlignmentGraph) -> Result<Vec<f64>> {
    let sources = sources(model, graph)?;
    Ok(forward_inner(model, graph, &sources))
}

/// Backward table, laid out as [forward].
pub fn backward(model: &MarkovModel, graph: &AlignmentGraph) -> Result<Vec<f64>> {
    let sources = sources(model, graph)?;
    Ok(backward_inner(model, graph, &sources))
}

// Node index of the source of each edge, after checking the edges against the model.
fn sources(model: &MarkovModel, graph: &AlignmentGraph) -> Result<Vec<Vec<usize>>> {
    graph
        .nodes()
        .iter()
        .map(|node| {
            node.incoming
                .iter()
                .map(|edge| {
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
                    graph
                        .index_of(edge.from_above, edge.from_below)
                        .ok_or_else(|| {
                            AlignError::Invariant(format!(
                                "edge from a missing node ({},{})",
                                edge.from_above, edge.from_below
                            ))
                        })
                })
                .collect()
        })
        .collect()
}

fn forward_inner(model: &MarkovModel, graph: &AlignmentGraph, sources: &[Vec<usize>]) -> Vec<f64> {
    let states = model.states();
    let mut dp = vec![LOGZERO; graph.len() * states];
    for (i, node) in graph.nodes().iter().enumerate().skip(1) {
        for (edge, &src) in node.incoming.iter().zip(sources[i].iter()) {
            for to in 0..states {
                let arrive = match src {
                    0 => model.initial(to),
                    _ => {
                        let lks: Vec<_> = (0..states)
                            .map(|from| {
                                elnproduct(dp[src * states + from], model.transition(from, to))
                            })
                            .collect();
                        elnsum(&lks)
                    }
                };
                let lk = elnproduct(arrive, model.emission(to, edge.symbol));
                dp[i * states + to] = elnsum2(dp[i * states + to], lk);
            }
        }
    }
    dp
}

fn backward_inner(model: &MarkovModel, graph: &AlignmentGraph, sources: &[Vec<usize>]) -> Vec<f64> {
    let states = model.states();
    let mut dp = vec![LOGZERO; graph.len() * states];
    let last = graph.len() - 1;
    dp[last * states..].iter_mut().for_each(|x| *x = 0f64);
    for (i, node) in graph.nodes().iter().enumerate().skip(1).rev() {
        for (edge, &src) in node.incoming.iter().zip(sources[i].iter()) {
            if src == 0 {
                continue;
            }
            for from in 0..states {
                let lks: Vec<_> = (0..states)
                    .map(|to| {
                        let emit = elnproduct(
                            model.transition(from, to),
                            model.emission(to, edge.symbol),
                        );
                        elnproduct(emit, dp[i * states + to])
                    })
                    .collect();
                dp[src * states + from] = elnsum2(dp[src * states + from], elnsum(&lks));
            }
        }
    }
    dp
}

fn total(model: &MarkovModel, graph: &AlignmentGraph, forward: &[f64]) -> f64 {
    let states = model.states();
    if graph.len() <= 1 {
        // Nothing to emit.
        return 0f64;
    }
    let last = graph.len() - 1;
    elnsum(&forward[last * states..(last + 1) * states])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::{PairAlphabet, SymbolEncoder};
    use crate::logspace::eexp;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;
    // Sum over every path and every state sequence by brute force.
    fn brute_force(model: &MarkovModel, graph: &AlignmentGraph) -> f64 {
        fn paths(graph: &AlignmentGraph, a: usize, b: usize) -> Vec<Vec<usize>> {
            if (a, b) == (0, 0) {
                return vec![vec![]];
            }
            let node = graph.node(a, b).unwrap();
            node.incoming
                .iter()
                .flat_map(|e| {
                    paths(graph, e.from_above, e.from_below)
                        .into_iter()
                        .map(move |mut p| {
                            p.push(e.symbol);
                            p
                        })
                })
                .collect()
        }
        let n = model.states();
        let mut total = 0f64;
        for symbols in paths(graph, graph.above_len(), graph.below_len()) {
            let len = symbols.len();
            for code in 0..n.pow(len as u32) {
                let states: Vec<_> = (0..len).map(|i| code / n.pow(i as u32) % n).collect();
                let mut lk = model.initial(states[0]) + model.emission(states[0], symbols[0]);
                for i in 1..len {
                    lk += model.transition(states[i - 1], states[i]);
                    lk += model.emission(states[i], symbols[i]);
                }
                total += lk.exp();
            }
        }
        total.ln()
    }
    fn taks() -> (PairAlphabet, AlignmentGraph) {
        let mut alphabet = PairAlphabet::new(0, 2);
        alphabet.learn(b"TAXI", b"taksi").unwrap();
        let graph = AlignmentGraph::from_pair(b"TAXI", b"taksi", &alphabet).unwrap();
        (alphabet, graph)
    }
    #[test]
    fn forward_matches_brute_force() {
        let (alphabet, graph) = taks();
        for seed in 0..5 {
            let model = MarkovModel::random(3, alphabet.symbols(), seed);
            let lk = log_likelihood(&model, &graph).unwrap();
            let answer = brute_force(&model, &graph);
            assert!((lk - answer).abs() < 1e-9, "{},{}", lk, answer);
        }
    }
    #[test]
    fn forward_and_backward_agree() {
        let (alphabet, graph) = taks();
        let model = MarkovModel::random(2, alphabet.symbols(), 31);
        let states = model.states();
        let fwd = forward(&model, &graph).unwrap();
        let bwd = backward(&model, &graph).unwrap();
        let (fwd, bwd) = (fwd.as_slice(), bwd.as_slice());
        let lk = log_likelihood(&model, &graph).unwrap();
        // Sum over the edges leaving the root.
        let mut lks = vec![];
        for (i, node) in graph.nodes().iter().enumerate() {
            for edge in node.incoming.iter().filter(|e| (e.from_above, e.from_below) == (0, 0)) {
                for s in 0..states {
                    let emit = model.initial(s) + model.emission(s, edge.symbol);
                    lks.push(emit + bwd[i * states + s]);
                }
            }
        }
        assert!((elnsum(&lks) - lk).abs() < 1e-9);
        // At every above position the posterior mass sums to one.
        for a in 1..=graph.above_len() {
            let lks: Vec<_> = graph
                .nodes()
                .iter()
                .enumerate()
                .filter(|(_, n)| n.above == a)
                .flat_map(|(i, _)| {
                    (0..states).map(move |s| fwd[i * states + s] + bwd[i * states + s])
                })
                .collect();
            assert!((eexp(elnsum(&lks) - lk) - 1f64).abs() < 1e-9);
        }
    }
    #[test]
    fn expected_counts() {
        let (alphabet, graph) = taks();
        let model = MarkovModel::random(3, alphabet.symbols(), 4);
        let mut stats = Statistics::new(model.states(), model.symbols());
        stats.add(&model, &graph).unwrap();
        let sum = |xs: &[f64]| xs.iter().map(|&x| eexp(x)).sum::<f64>();
        assert!((sum(&stats.initial) - 1f64).abs() < 1e-9);
        assert!((sum(&stats.transition) - 3f64).abs() < 1e-9);
        assert!((sum(&stats.emission) - 4f64).abs() < 1e-9);
        assert_eq!(stats.graphs, 1);
        let next = stats.maximize(&model);
        assert!(next.is_normalized(1e-9));
    }
    #[test]
    fn em_does_not_decrease_likelihood() {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(2394);
        let pairs: Vec<_> = (0..20)
            .map(|_| crate::gen_seq::generate_pair(&mut rng, 12, &crate::gen_seq::EXPANSION))
            .collect();
        let mut alphabet = PairAlphabet::new(0, 2);
        for (above, below) in pairs.iter() {
            alphabet.learn(above, below).unwrap();
        }
        let graphs: Vec<_> = pairs
            .iter()
            .map(|(above, below)| AlignmentGraph::from_pair(above, below, &alphabet).unwrap())
            .collect();
        let mut model = MarkovModel::random(2, alphabet.symbols(), 10);
        let mut prev = std::f64::NEG_INFINITY;
        for _ in 0..8 {
            let stats = Statistics::from_graphs(&model, &graphs).unwrap();
            assert_eq!(stats.graphs, graphs.len());
            assert!(prev <= stats.log_likelihood + 1e-6, "{}\t{}", prev, stats.log_likelihood);
            prev = stats.log_likelihood;
            model = stats.maximize(&model);
            assert!(model.is_normalized(1e-9));
        }
    }
    #[test]
    fn merge_is_sum() {
        let (alphabet, graph) = taks();
        let model = MarkovModel::random(2, alphabet.symbols(), 5);
        let mut x = Statistics::new(2, alphabet.symbols());
        x.add(&model, &graph).unwrap();
        let y = x.clone().merge(x.clone());
        assert!((eexp(y.initial(0)) - 2f64 * eexp(x.initial(0))).abs() < 1e-9);
        assert!((eexp(y.transition(0, 1)) - 2f64 * eexp(x.transition(0, 1))).abs() < 1e-9);
        assert!((y.log_likelihood - 2f64 * x.log_likelihood).abs() < 1e-9);
        assert_eq!(y.graphs, 2);
    }
}
