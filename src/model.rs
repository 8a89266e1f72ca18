//! The hidden Markov model trained by the pipeline and consumed by the aligner.
//!
//! All three tables are kept as natural logarithms. The checkpoint format is line oriented:
//!
//! ```text
//! <N> <M>
//! <N lines of initial[i]>
//! ---2---
//! <N*N lines of transition[s][d]>
//! ---1---
//! <N*M lines of emission[s][e]>
//! ---0---
//! ```
//!
//! Every value is written with the shortest representation that parses back to the same double,
//! so a decoded model is bit-identical to the encoded one.
use crate::error::{AlignError, Result};
use crate::logspace::{eexp, eln, normalize};
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

const TRANSITION_MARK: &str = "---2---";
const EMISSION_MARK: &str = "---1---";
const END_MARK: &str = "---0---";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkovModel {
    states: usize,
    symbols: usize,
    // log Pr{state at the first step}.
    initial: Vec<f64>,
    // [from * states + to] = log Pr{from -> to}.
    transition: Vec<f64>,
    // [state * symbols + symbol] = log Pr{symbol | state}.
    emission: Vec<f64>,
}

impl MarkovModel {
    /// Random model. The same `seed` always gives the same model.
    /// Each table is drawn from its own generator so that changing the
    /// number of symbols does not perturb the initial or transition tables.
    pub fn random(states: usize, symbols: usize, seed: u64) -> Self {
        let mut master: Xoshiro256StarStar = SeedableRng::seed_from_u64(seed);
        let (init_seed, trans_seed, emit_seed): (u64, u64, u64) =
            (master.gen(), master.gen(), master.gen());
        let initial = random_rows(init_seed, 1, states);
        let transition = random_rows(trans_seed, states, states);
        let emission = random_rows(emit_seed, states, symbols);
        Self {
            states,
            symbols,
            initial,
            transition,
            emission,
        }
    }
    /// Build a model from log tables. Only the dimensions are checked here;
    /// see [MarkovModel::is_normalized] for the distribution invariant.
    pub fn from_log_tables(
        states: usize,
        symbols: usize,
        initial: Vec<f64>,
        transition: Vec<f64>,
        emission: Vec<f64>,
    ) -> Result<Self> {
        if states == 0 || symbols == 0 {
            return Err(AlignError::Invariant(format!(
                "a model needs at least one state and one symbol, got {} and {}",
                states, symbols
            )));
        }
        let expected = [
            ("initial", initial.len(), states),
            ("transition", transition.len(), states * states),
            ("emission", emission.len(), states * symbols),
        ];
        for &(name, len, should) in expected.iter() {
            if len != should {
                return Err(AlignError::Invariant(format!(
                    "{} table has {} entries, expected {}",
                    name, len, should
                )));
            }
        }
        Ok(Self {
            states,
            symbols,
            initial,
            transition,
            emission,
        })
    }
    /// Same as [MarkovModel::from_log_tables], with linear probabilities.
    pub fn from_probabilities(
        states: usize,
        symbols: usize,
        initial: &[f64],
        transition: &[f64],
        emission: &[f64],
    ) -> Result<Self> {
        let to_log = |xs: &[f64]| -> Vec<f64> { xs.iter().map(|&x| eln(x)).collect() };
        Self::from_log_tables(
            states,
            symbols,
            to_log(initial),
            to_log(transition),
            to_log(emission),
        )
    }
    pub fn states(&self) -> usize {
        self.states
    }
    pub fn symbols(&self) -> usize {
        self.symbols
    }
    pub fn initial(&self, state: usize) -> f64 {
        self.initial[state]
    }
    pub fn initials(&self) -> &[f64] {
        &self.initial
    }
    /// log Pr{from -> to}.
    pub fn transition(&self, from: usize, to: usize) -> f64 {
        self.transition[from * self.states + to]
    }
    /// log transition probabilities out of `from`.
    pub fn transitions(&self, from: usize) -> &[f64] {
        &self.transition[from * self.states..(from + 1) * self.states]
    }
    /// log Pr{symbol | state}.
    pub fn emission(&self, state: usize, symbol: usize) -> f64 {
        self.emission[state * self.symbols + symbol]
    }
    pub fn emissions(&self, state: usize) -> &[f64] {
        &self.emission[state * self.symbols..(state + 1) * self.symbols]
    }
    /// True if every row exponentiates to a distribution within `tolerance`.
    pub fn is_normalized(&self, tolerance: f64) -> bool {
        let sums_to_one =
            |row: &[f64]| (row.iter().map(|&x| eexp(x)).sum::<f64>() - 1f64).abs() <= tolerance;
        sums_to_one(&self.initial)
            && self.transition.chunks(self.states).all(sums_to_one)
            && self.emission.chunks(self.symbols).all(sums_to_one)
    }
    /// Squared difference of all parameters in the linear domain.
    /// Return None if the two models have different shapes.
    pub fn dist(&self, other: &Self) -> Option<f64> {
        (self.states == other.states && self.symbols == other.symbols).then(|| {
            let sq = |xs: &[f64], ys: &[f64]| -> f64 {
                xs.iter()
                    .zip(ys.iter())
                    .map(|(&x, &y)| (eexp(x) - eexp(y)).powi(2))
                    .sum()
            };
            sq(&self.initial, &other.initial)
                + sq(&self.transition, &other.transition)
                + sq(&self.emission, &other.emission)
        })
    }
    /// Write the checkpoint representation.
    pub fn write_to<W: Write>(&self, wtr: &mut W) -> std::io::Result<()> {
        writeln!(wtr, "{} {}", self.states, self.symbols)?;
        for x in self.initial.iter() {
            writeln!(wtr, "{}", x)?;
        }
        writeln!(wtr, "{}", TRANSITION_MARK)?;
        for x in self.transition.iter() {
            writeln!(wtr, "{}", x)?;
        }
        writeln!(wtr, "{}", EMISSION_MARK)?;
        for x in self.emission.iter() {
            writeln!(wtr, "{}", x)?;
        }
        writeln!(wtr, "{}", END_MARK)
    }
    /// Read a checkpoint written by [MarkovModel::write_to].
    pub fn read_from<R: BufRead>(rdr: R) -> Result<Self> {
        let mut lines = NumberedLines::new(rdr);
        let (number, header) = lines.next_line("header")?;
        let mut fields = header.split_whitespace();
        let mut dimension = |name: &str| -> Result<usize> {
            let token = fields
                .next()
                .ok_or_else(|| AlignError::format(number, format!("missing {}", name)))?;
            token
                .parse()
                .map_err(|_| AlignError::format(number, format!("bad {}: {:?}", name, token)))
        };
        let states = dimension("number of states")?;
        let symbols = dimension("number of symbols")?;
        if fields.next().is_some() {
            return Err(AlignError::format(number, "trailing token in header"));
        }
        let initial = lines.numbers(states)?;
        lines.marker(TRANSITION_MARK)?;
        let transition = lines.numbers(states * states)?;
        lines.marker(EMISSION_MARK)?;
        let emission = lines.numbers(states * symbols)?;
        lines.marker(END_MARK)?;
        Self::from_log_tables(states, symbols, initial, transition, emission)
            .map_err(|e| AlignError::format(number, e.to_string()))
    }
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let mut wtr = std::io::BufWriter::new(std::fs::File::create(path)?);
        self.write_to(&mut wtr)?;
        wtr.flush()?;
        wtr.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        Ok(())
    }
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let rdr = std::io::BufReader::new(std::fs::File::open(path)?);
        Self::read_from(rdr)
    }
    /// Replace the tables by renormalized expected counts.
    /// A row without any mass keeps the current values.
    pub(crate) fn renormalized(
        &self,
        mut initial: Vec<f64>,
        mut transition: Vec<f64>,
        mut emission: Vec<f64>,
    ) -> Self {
        let keep_or_normalize = |row: &mut [f64], old: &[f64]| {
            if normalize(row) == crate::logspace::LOGZERO {
                row.copy_from_slice(old);
            }
        };
        keep_or_normalize(&mut initial, &self.initial);
        transition
            .chunks_mut(self.states)
            .zip(self.transition.chunks(self.states))
            .for_each(|(row, old)| keep_or_normalize(row, old));
        emission
            .chunks_mut(self.symbols)
            .zip(self.emission.chunks(self.symbols))
            .for_each(|(row, old)| keep_or_normalize(row, old));
        Self {
            states: self.states,
            symbols: self.symbols,
            initial,
            transition,
            emission,
        }
    }
}

fn random_rows(seed: u64, rows: usize, columns: usize) -> Vec<f64> {
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(seed);
    let mut table: Vec<f64> = (0..rows * columns)
        .map(|_| rng.gen_range(0.05f64..1f64).ln())
        .collect();
    table.chunks_mut(columns).for_each(|row| {
        normalize(row);
    });
    table
}

// Line reader keeping track of the 1-based line number for error messages.
struct NumberedLines<R: BufRead> {
    lines: std::io::Lines<R>,
    number: usize,
}

impl<R: BufRead> NumberedLines<R> {
    fn new(rdr: R) -> Self {
        Self {
            lines: rdr.lines(),
            number: 0,
        }
    }
    fn next_line(&mut self, expect: &str) -> Result<(usize, String)> {
        self.number += 1;
        match self.lines.next() {
            Some(line) => Ok((self.number, line?)),
            None => Err(AlignError::format(
                self.number,
                format!("unexpected end of input, expected {}", expect),
            )),
        }
    }
    fn numbers(&mut self, count: usize) -> Result<Vec<f64>> {
        (0..count)
            .map(|_| {
                let (number, line) = self.next_line("a number")?;
                line.trim().parse::<f64>().map_err(|_| {
                    AlignError::format(number, format!("expected a number, found {:?}", line))
                })
            })
            .collect()
    }
    fn marker(&mut self, mark: &str) -> Result<()> {
        let (number, line) = self.next_line(mark)?;
        if line.trim() == mark {
            Ok(())
        } else {
            Err(AlignError::format(
                number,
                format!("expected {}, found {:?}", mark, line),
            ))
        }
    }
}

impl std::fmt::Display for MarkovModel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "States:{}\tSymbols:{}", self.states, self.symbols)?;
        let probs: Vec<_> = self
            .initial
            .iter()
            .map(|&x| format!("{:.3}", eexp(x)))
            .collect();
        writeln!(f, "Initial:{}", probs.join("\t"))?;
        writeln!(f, "Transition:")?;
        for from in 0..self.states {
            let probs: Vec<_> = self
                .transitions(from)
                .iter()
                .map(|&x| format!("{:.3}", eexp(x)))
                .collect();
            writeln!(f, "{}", probs.join("\t"))?;
        }
        writeln!(f, "Emission(top 5):")?;
        for state in 0..self.states {
            let mut probs: Vec<_> = self.emissions(state).iter().copied().enumerate().collect();
            probs.sort_by(|x, y| y.1.partial_cmp(&x.1).unwrap_or(std::cmp::Ordering::Equal));
            let probs: Vec<_> = probs
                .iter()
                .take(5)
                .map(|(sym, x)| format!("{}:{:.3}", sym, eexp(*x)))
                .collect();
            writeln!(f, "{}\t{}", state, probs.join("\t"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    fn encode(model: &MarkovModel) -> String {
        let mut buf = vec![];
        model.write_to(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }
    #[test]
    fn random_rows_are_distributions() {
        for seed in 0..20 {
            let model = MarkovModel::random(4, 17, seed);
            assert!(model.is_normalized(1e-9), "{}", model);
        }
    }
    #[test]
    fn random_is_reproducible() {
        assert_eq!(MarkovModel::random(3, 5, 10), MarkovModel::random(3, 5, 10));
        assert_ne!(MarkovModel::random(3, 5, 10), MarkovModel::random(3, 5, 11));
        // Sub-seeds are independent of the table shapes.
        let (x, y) = (MarkovModel::random(3, 5, 10), MarkovModel::random(3, 9, 10));
        assert_eq!(x.initials(), y.initials());
        assert_eq!(x.transitions(1), y.transitions(1));
    }
    #[test]
    fn round_trip_is_exact() {
        for seed in 0..10 {
            let model = MarkovModel::random(5, 11, seed);
            let text = encode(&model);
            let decoded = MarkovModel::read_from(text.as_bytes()).unwrap();
            assert_eq!(model, decoded);
            for (x, y) in model.emission.iter().zip(decoded.emission.iter()) {
                assert_eq!(x.to_bits(), y.to_bits());
            }
        }
        let with_zero =
            MarkovModel::from_probabilities(1, 2, &[1f64], &[1f64], &[1f64, 0f64]).unwrap();
        let decoded = MarkovModel::read_from(encode(&with_zero).as_bytes()).unwrap();
        assert_eq!(with_zero, decoded);
    }
    #[test]
    fn layout() {
        let model = MarkovModel::random(2, 3, 1);
        let text = encode(&model);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 1 + 2 + 1 + 4 + 1 + 6 + 1);
        assert_eq!(lines[0], "2 3");
        assert_eq!(lines[3], "---2---");
        assert_eq!(lines[8], "---1---");
        assert_eq!(lines[15], "---0---");
    }
    #[test]
    fn strict_decoding() {
        let model = MarkovModel::random(2, 3, 1);
        let text = encode(&model);
        let bad_marker = text.replace("---1---", "---2---");
        match MarkovModel::read_from(bad_marker.as_bytes()) {
            Err(AlignError::Format { line, .. }) => assert_eq!(line, 9),
            x => panic!("{:?}", x),
        }
        let mut lines: Vec<_> = text.lines().map(|x| x.to_string()).collect();
        lines[1] = "abc".to_string();
        let bad_number = lines.join("\n");
        match MarkovModel::read_from(bad_number.as_bytes()) {
            Err(AlignError::Format { line, .. }) => assert_eq!(line, 2),
            x => panic!("{:?}", x),
        }
        let truncated: String = text.lines().take(5).collect::<Vec<_>>().join("\n");
        assert!(MarkovModel::read_from(truncated.as_bytes()).is_err());
        assert!(MarkovModel::read_from("2 x\n".as_bytes()).is_err());
    }
    #[test]
    fn renormalize_keeps_empty_rows() {
        use crate::logspace::LOGZERO;
        let model = MarkovModel::random(2, 2, 3);
        let next = model.renormalized(
            vec![0f64, LOGZERO],
            vec![eln(1f64), eln(3f64), LOGZERO, LOGZERO],
            vec![eln(2f64), eln(2f64), eln(1f64), LOGZERO],
        );
        assert!(next.is_normalized(1e-9));
        assert_eq!(next.transitions(1), model.transitions(1));
        assert!((eexp(next.transition(0, 1)) - 0.75).abs() < 1e-12);
        assert_eq!(eexp(next.emission(1, 0)), 1f64);
    }
}
