//! Likelihood of a corpus under a frozen model, used to monitor training.
use crate::alphabet::SymbolEncoder;
use crate::corpus::Corpus;
use crate::error::{AlignError, Result};
use crate::expectation::log_likelihood;
use crate::graph::AlignmentGraph;
use crate::logspace::{eexp, eln, elndivision, elnsum, elnsum2, is_logzero, LOGZERO};
use crate::model::MarkovModel;
use crate::progress::Progress;

// Number of log probabilities summed at once.
const BATCH: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusKind {
    Training,
    HeldOut,
}

impl CorpusKind {
    fn slot(self) -> usize {
        match self {
            CorpusKind::Training => 0,
            CorpusKind::HeldOut => 1,
        }
    }
    pub fn name(self) -> &'static str {
        match self {
            CorpusKind::Training => "training",
            CorpusKind::HeldOut => "held-out",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub kind: CorpusKind,
    pub alignable: usize,
    pub not_alignable: usize,
    /// log of the sum of the probabilities of the alignable pairs.
    pub log_sum: f64,
    /// log of the average probability of an alignable pair.
    pub log_average: f64,
    /// Average probability of an alignable pair.
    pub average: f64,
    /// `average` divided by the average of the previous check on the same kind of corpus.
    pub ratio: Option<f64>,
    /// False if the average decreased since the previous check.
    pub improving: bool,
}

impl QualityReport {
    pub fn pairs(&self) -> usize {
        self.alignable + self.not_alignable
    }
    pub fn not_alignable_percent(&self) -> f64 {
        match self.pairs() {
            0 => 0f64,
            total => 100f64 * self.not_alignable as f64 / total as f64,
        }
    }
}

impl std::fmt::Display for QualityReport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}\tnot alignable:{}({:.2}%)\taverage:{:e}\tlog average:{:.4}",
            self.kind.name(),
            self.not_alignable,
            self.not_alignable_percent(),
            self.average,
            self.log_average
        )?;
        if let Some(ratio) = self.ratio {
            write!(f, "\tratio:{:.6}", ratio)?;
        }
        Ok(())
    }
}

/// Keeps the previous average of each kind of corpus.
#[derive(Debug, Clone, Default)]
pub struct QualityChecker {
    previous: [Option<f64>; 2],
}

impl QualityChecker {
    pub fn new() -> Self {
        Self::default()
    }
    /// Previous log average of `kind`, if any.
    pub fn previous(&self, kind: CorpusKind) -> Option<f64> {
        self.previous[kind.slot()]
    }
    pub fn check<E: SymbolEncoder + ?Sized>(
        &mut self,
        kind: CorpusKind,
        corpus: &dyn Corpus,
        model: &MarkovModel,
        encoder: &E,
        progress: &mut dyn Progress,
    ) -> Result<QualityReport> {
        progress.start(kind.name(), corpus.len_hint());
        let (mut alignable, mut not_alignable) = (0, 0);
        let mut log_sum = LOGZERO;
        let mut buffer = Vec::with_capacity(BATCH);
        for pair in corpus.pairs()? {
            let (above, below) = pair?;
            progress.step(1);
            let lk = match AlignmentGraph::from_pair(&above, &below, encoder) {
                Ok(graph) => log_likelihood(model, &graph)?,
                Err(AlignError::NotAlignable { .. }) => LOGZERO,
                Err(why) => return Err(why),
            };
            if lk.is_finite() && lk <= 0f64 {
                alignable += 1;
                buffer.push(lk);
                if buffer.len() == BATCH {
                    log_sum = elnsum2(log_sum, elnsum(&buffer));
                    buffer.clear();
                }
            } else {
                not_alignable += 1;
            }
        }
        log_sum = elnsum2(log_sum, elnsum(&buffer));
        progress.finish();
        let log_average = match alignable {
            0 => LOGZERO,
            _ => log_sum - eln(alignable as f64),
        };
        let ratio = self.previous[kind.slot()]
            .filter(|&prev| !is_logzero(prev))
            .map(|prev| eexp(elndivision(log_average, prev)));
        self.previous[kind.slot()] = Some(log_average);
        let report = QualityReport {
            kind,
            alignable,
            not_alignable,
            log_sum,
            log_average,
            average: eexp(log_average),
            ratio,
            improving: ratio.map_or(true, |r| 1f64 <= r),
        };
        info!("QUALITY\t{}", report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::PairAlphabet;
    use crate::corpus::MemoryCorpus;
    use crate::progress::NoProgress;
    fn corpus() -> MemoryCorpus {
        vec![
            (&b"TAX"[..], &b"taks"[..]),
            (&b"TAX"[..], &b"tax"[..]),
            (&b"AX"[..], &b"akshh"[..]),
        ]
        .into_iter()
        .collect()
    }
    #[test]
    fn counts_and_average() {
        let mut alphabet = PairAlphabet::new(0, 2);
        alphabet.learn(b"TAX", b"taks").unwrap();
        alphabet.learn(b"TAX", b"tax").unwrap();
        let model = MarkovModel::random(2, alphabet.symbols(), 3);
        let mut checker = QualityChecker::new();
        let corpus = corpus();
        let report = checker
            .check(CorpusKind::Training, &corpus, &model, &alphabet, &mut NoProgress)
            .unwrap();
        assert_eq!(report.alignable, 2);
        assert_eq!(report.not_alignable, 1);
        assert!((report.not_alignable_percent() - 100f64 / 3f64).abs() < 1e-9);
        assert!(report.ratio.is_none());
        assert!(report.improving);
        let lks: Vec<_> = [(&b"TAX"[..], &b"taks"[..]), (&b"TAX"[..], &b"tax"[..])]
            .iter()
            .map(|(a, b)| {
                let graph = AlignmentGraph::from_pair(a, b, &alphabet).unwrap();
                log_likelihood(&model, &graph).unwrap()
            })
            .collect();
        let average = (lks[0].exp() + lks[1].exp()) / 2f64;
        assert!((report.average - average).abs() < 1e-12);
        // The same model again: the ratio is one.
        let report = checker
            .check(CorpusKind::Training, &corpus, &model, &alphabet, &mut NoProgress)
            .unwrap();
        assert!((report.ratio.unwrap() - 1f64).abs() < 1e-12);
    }
    #[test]
    fn kinds_are_independent() {
        let mut alphabet = PairAlphabet::new(0, 2);
        alphabet.learn(b"TAX", b"taks").unwrap();
        let model = MarkovModel::random(2, alphabet.symbols(), 3);
        let worse = MarkovModel::random(2, alphabet.symbols(), 4);
        let mut checker = QualityChecker::new();
        let corpus = corpus();
        checker
            .check(CorpusKind::Training, &corpus, &model, &alphabet, &mut NoProgress)
            .unwrap();
        let held_out = checker
            .check(CorpusKind::HeldOut, &corpus, &worse, &alphabet, &mut NoProgress)
            .unwrap();
        assert!(held_out.ratio.is_none());
        assert!(checker.previous(CorpusKind::Training).is_some());
        let lk_model = checker.previous(CorpusKind::Training).unwrap();
        let lk_worse = checker.previous(CorpusKind::HeldOut).unwrap();
        let again = checker
            .check(CorpusKind::Training, &corpus, &worse, &alphabet, &mut NoProgress)
            .unwrap();
        assert_eq!(again.improving, lk_model <= lk_worse);
    }
    #[test]
    fn empty_corpus() {
        let alphabet = PairAlphabet::new(0, 2);
        let model = MarkovModel::random(2, 1, 3);
        let mut checker = QualityChecker::new();
        let empty = MemoryCorpus::default();
        let report = checker
            .check(CorpusKind::HeldOut, &empty, &model, &alphabet, &mut NoProgress)
            .unwrap();
        assert_eq!(report.pairs(), 0);
        assert_eq!(report.average, 0f64);
    }
}
