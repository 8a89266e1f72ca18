//! Staged, resumable Baum-Welch training.
//!
//! Training runs three stages against one checkpoint directory, in this order:
//! 1. `alphabet`: the [PairAlphabet] of the training corpus.
//! 2. `graphs`: the [AlignmentGraph] of every training pair, written one after another.
//! 3. `core`: the [MarkovModel], refined by EM epochs over the graphs.
//!
//! A stage with a stable file is loaded and never recomputed. Otherwise it is computed into its
//! working file, which is promoted to stable only after the stage completes. Leftover working and
//! log files come from an interrupted run and are removed before the stage starts again.
//! A checkpoint directory should have a single writer at a time.
use crate::alphabet::{PairAlphabet, SymbolEncoder};
use crate::checkpoint::{CheckpointDir, Role, Stage, TrainingLog};
use crate::corpus::Corpus;
use crate::error::{AlignError, Result};
use crate::expectation::Statistics;
use crate::graph::{AlignmentGraph, GraphReader};
use crate::logspace::{is_logzero, LOGZERO};
use crate::model::MarkovModel;
use crate::progress::Progress;
use crate::quality::{CorpusKind, QualityChecker};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Immutable training configuration. Build it with [TrainingConfig::new] and the `with_*` methods;
/// it is validated when a [TrainingPipeline] is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub states: usize,
    pub seed: u64,
    pub min_below: usize,
    pub max_below: usize,
    pub max_epochs: usize,
    /// Number of consecutive epochs without improvement before stopping.
    pub grace_period: usize,
    /// Relative gain of the log likelihood counted as an improvement.
    pub min_improvement: f64,
    /// Run the quality checker every this many epochs. 0 disables it.
    pub quality_interval: usize,
    /// Stop when the quality checker reports a decrease.
    pub stop_on_quality_decline: bool,
    /// Number of graphs processed in parallel at once.
    pub batch_size: usize,
    /// Model to start from instead of a random one.
    pub initial_model: Option<PathBuf>,
}

impl TrainingConfig {
    pub fn new(states: usize, seed: u64) -> Self {
        Self {
            states,
            seed,
            min_below: 0,
            max_below: 2,
            max_epochs: 50,
            grace_period: 3,
            min_improvement: 0.0001,
            quality_interval: 1,
            stop_on_quality_decline: false,
            batch_size: 256,
            initial_model: None,
        }
    }
    pub fn with_below_bounds(mut self, min_below: usize, max_below: usize) -> Self {
        self.min_below = min_below;
        self.max_below = max_below;
        self
    }
    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }
    pub fn with_grace_period(mut self, grace_period: usize) -> Self {
        self.grace_period = grace_period;
        self
    }
    pub fn with_min_improvement(mut self, min_improvement: f64) -> Self {
        self.min_improvement = min_improvement;
        self
    }
    pub fn with_quality_interval(mut self, quality_interval: usize) -> Self {
        self.quality_interval = quality_interval;
        self
    }
    pub fn with_stop_on_quality_decline(mut self, stop: bool) -> Self {
        self.stop_on_quality_decline = stop;
        self
    }
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
    pub fn with_initial_model<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.initial_model = Some(path.as_ref().to_path_buf());
        self
    }
    pub fn validate(&self) -> Result<()> {
        let reject = |message: &str| Err(AlignError::Config(message.to_string()));
        if self.states == 0 {
            return reject("the number of states should be positive");
        }
        if self.max_below < self.min_below {
            return reject("max_below should not be less than min_below");
        }
        if self.max_below == 0 {
            return reject("max_below should be positive");
        }
        if self.max_epochs == 0 {
            return reject("max_epochs should be positive");
        }
        if self.grace_period == 0 {
            return reject("grace_period should be positive");
        }
        if !(self.min_improvement.is_finite() && 0f64 <= self.min_improvement) {
            return reject("min_improvement should be a non-negative number");
        }
        if self.batch_size == 0 {
            return reject("batch_size should be positive");
        }
        if let Some(path) = self.initial_model.as_ref() {
            if !path.is_file() {
                return Err(AlignError::Config(format!(
                    "initial model {} does not exist",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Why the core stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A stable model was already there. Nothing was trained.
    AlreadyTrained,
    /// The epoch budget was used up.
    EpochBudget,
    /// The grace period passed without improvement.
    Converged,
    /// The quality checker reported a decrease.
    QualityDeclined,
}

#[derive(Debug, Clone)]
pub struct Trained {
    pub alphabet: PairAlphabet,
    pub model: MarkovModel,
    /// Number of epochs run by this invocation.
    pub epochs: usize,
    pub stop: StopReason,
}

/// Tracks the best log likelihood and the epochs since it last improved.
#[derive(Debug, Clone)]
struct GracePeriod {
    best: f64,
    stall: usize,
    grace: usize,
    min_improvement: f64,
}

impl GracePeriod {
    fn new(grace: usize, min_improvement: f64) -> Self {
        Self {
            best: LOGZERO,
            stall: 0,
            grace,
            min_improvement,
        }
    }
    // Return true if training should stop.
    fn update(&mut self, lk: f64) -> bool {
        let threshold = self.best + self.min_improvement * self.best.abs();
        let improved = is_logzero(self.best) || threshold < lk;
        if self.best < lk {
            self.best = lk;
        }
        if improved {
            self.stall = 0;
        } else {
            self.stall += 1;
        }
        self.grace <= self.stall
    }
}

#[derive(Debug, Clone)]
pub struct TrainingPipeline {
    config: TrainingConfig,
    checkpoint: CheckpointDir,
}

impl TrainingPipeline {
    /// Validate `config` and open the checkpoint directory `root`.
    pub fn new<P: AsRef<Path>>(config: TrainingConfig, root: P) -> Result<Self> {
        config.validate()?;
        let checkpoint = CheckpointDir::new(root)?;
        Ok(Self { config, checkpoint })
    }
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }
    pub fn checkpoint(&self) -> &CheckpointDir {
        &self.checkpoint
    }
    /// Load the alphabet and the model of a completed training.
    pub fn load<P: AsRef<Path>>(root: P) -> Result<(PairAlphabet, MarkovModel)> {
        let checkpoint = CheckpointDir::new(root)?;
        for &stage in [Stage::Alphabet, Stage::Core].iter() {
            if !checkpoint.has_stable(stage) {
                return Err(AlignError::Config(format!(
                    "{} has no stable {}",
                    checkpoint.root().display(),
                    stage
                )));
            }
        }
        let alphabet = PairAlphabet::load(checkpoint.path(Stage::Alphabet, Role::Stable))?;
        let model = MarkovModel::load(checkpoint.path(Stage::Core, Role::Stable))?;
        Ok((alphabet, model))
    }
    /// Run every stage that has no stable result yet.
    /// `quality`, if given, is run on `corpus` and on `held_out` every `quality_interval` epochs.
    pub fn train(
        &self,
        corpus: &dyn Corpus,
        held_out: Option<&dyn Corpus>,
        quality: Option<&mut QualityChecker>,
        progress: &mut dyn Progress,
    ) -> Result<Trained> {
        for &stage in Stage::ALL.iter() {
            if !self.checkpoint.has_stable(stage) {
                self.checkpoint.clear(stage)?;
            }
        }
        let alphabet = self.alphabet_stage(corpus, progress)?;
        self.graphs_stage(corpus, &alphabet, progress)?;
        let (model, epochs, stop) =
            self.core_stage(&alphabet, corpus, held_out, quality, progress)?;
        Ok(Trained {
            alphabet,
            model,
            epochs,
            stop,
        })
    }
    /// Build, or load, the alphabet.
    pub fn alphabet_stage(
        &self,
        corpus: &dyn Corpus,
        progress: &mut dyn Progress,
    ) -> Result<PairAlphabet> {
        let stage = Stage::Alphabet;
        if self.checkpoint.has_stable(stage) {
            info!("{}\tLOAD STABLE", stage);
            return PairAlphabet::load(self.checkpoint.path(stage, Role::Stable));
        }
        self.checkpoint.clear(stage)?;
        let mut log = self.checkpoint.log(stage)?;
        let mut alphabet = PairAlphabet::new(self.config.min_below, self.config.max_below);
        progress.start(stage.name(), corpus.len_hint());
        let mut pairs = 0;
        for pair in corpus.pairs()? {
            let (above, below) = pair?;
            if let Err(why) = alphabet.learn(&above, &below) {
                log.line(&format!("FAILED\t{}\t{}", pairs, why))?;
                return Err(why);
            }
            pairs += 1;
            progress.step(1);
        }
        progress.finish();
        log.line(&format!("PAIRS\t{}\tSYMBOLS\t{}", pairs, alphabet.symbols()))?;
        let mut wtr = self.checkpoint.working(stage)?;
        alphabet.write_to(&mut wtr)?;
        wtr.finish()?;
        log.finish()?;
        self.checkpoint.promote(stage)?;
        Ok(alphabet)
    }
    /// Build the graph of every training pair, unless they are already stable.
    pub fn graphs_stage<E: SymbolEncoder + ?Sized>(
        &self,
        corpus: &dyn Corpus,
        encoder: &E,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        let stage = Stage::Graphs;
        if self.checkpoint.has_stable(stage) {
            info!("{}\tLOAD STABLE", stage);
            return Ok(());
        }
        self.checkpoint.clear(stage)?;
        let mut wtr = self.checkpoint.working(stage)?;
        progress.start(stage.name(), corpus.len_hint());
        let mut graphs = 0;
        for pair in corpus.pairs()? {
            let (above, below) = pair?;
            let graph = AlignmentGraph::from_pair(&above, &below, encoder)?;
            graph.write_to(&mut wtr)?;
            graphs += 1;
            progress.step(1);
        }
        progress.finish();
        wtr.finish()?;
        debug!("{}\tGRAPHS\t{}", stage, graphs);
        self.checkpoint.promote(stage)
    }
    /// Lazily read the stable graphs.
    pub fn graphs(&self) -> Result<GraphReader<std::io::BufReader<std::fs::File>>> {
        let path = self.checkpoint.path(Stage::Graphs, Role::Stable);
        let rdr = std::io::BufReader::new(std::fs::File::open(path)?);
        Ok(GraphReader::new(rdr))
    }
    fn initial_model<E: SymbolEncoder + ?Sized>(&self, encoder: &E) -> Result<MarkovModel> {
        let (states, symbols) = (self.config.states, encoder.symbols());
        match self.config.initial_model.as_ref() {
            Some(path) => {
                let model = MarkovModel::load(path)?;
                if model.states() != states || model.symbols() != symbols {
                    return Err(AlignError::Config(format!(
                        "initial model has {} states and {} symbols, expected {} and {}",
                        model.states(),
                        model.symbols(),
                        states,
                        symbols
                    )));
                }
                info!("{}\tSTART FROM {}", Stage::Core, path.display());
                Ok(model)
            }
            None => Ok(MarkovModel::random(states, symbols, self.config.seed)),
        }
    }
    /// One expectation step over all the stable graphs.
    pub fn expectation(
        &self,
        model: &MarkovModel,
        progress: &mut dyn Progress,
    ) -> Result<Statistics> {
        let mut stats = Statistics::new(model.states(), model.symbols());
        let mut batch = Vec::with_capacity(self.config.batch_size);
        for graph in self.graphs()? {
            batch.push(graph?);
            if batch.len() == self.config.batch_size {
                stats = stats.merge(Statistics::from_graphs(model, &batch)?);
                progress.step(batch.len());
                batch.clear();
            }
        }
        stats = stats.merge(Statistics::from_graphs(model, &batch)?);
        progress.step(batch.len());
        Ok(stats)
    }
    /// Train, or load, the model.
    pub fn core_stage<E: SymbolEncoder + ?Sized>(
        &self,
        encoder: &E,
        corpus: &dyn Corpus,
        held_out: Option<&dyn Corpus>,
        mut quality: Option<&mut QualityChecker>,
        progress: &mut dyn Progress,
    ) -> Result<(MarkovModel, usize, StopReason)> {
        let stage = Stage::Core;
        if self.checkpoint.has_stable(stage) {
            info!("{}\tNO TRAINING NEEDED", stage);
            let model = MarkovModel::load(self.checkpoint.path(stage, Role::Stable))?;
            return Ok((model, 0, StopReason::AlreadyTrained));
        }
        self.checkpoint.clear(stage)?;
        let mut log = self.checkpoint.log(stage)?;
        log.line(&format!("CONFIG\t{:?}", self.config))?;
        let mut model = self.initial_model(encoder)?;
        let mut grace = GracePeriod::new(self.config.grace_period, self.config.min_improvement);
        let mut stop = StopReason::EpochBudget;
        let mut epochs = 0;
        for epoch in 1..=self.config.max_epochs {
            progress.start(&format!("epoch {}", epoch), corpus.len_hint());
            let stats = self.expectation(&model, progress)?;
            progress.finish();
            model = stats.maximize(&model);
            let mut wtr = self.checkpoint.working(stage)?;
            model.write_to(&mut wtr)?;
            wtr.finish()?;
            epochs = epoch;
            log.line(&format!(
                "EPOCH\t{}\t{}\t{}\t{}",
                epoch, stats.log_likelihood, stats.graphs, stats.skipped
            ))?;
            let converged = grace.update(stats.log_likelihood);
            if self.config.quality_interval > 0 && epoch % self.config.quality_interval == 0 {
                if let Some(checker) = quality.as_deref_mut() {
                    let declined = self.check_quality(
                        checker, &model, encoder, corpus, held_out, &mut log, progress,
                    )?;
                    if declined && self.config.stop_on_quality_decline {
                        log.line(&format!("STOP\tQUALITY\t{}", epoch))?;
                        stop = StopReason::QualityDeclined;
                        break;
                    }
                }
            }
            if converged {
                log.line(&format!("STOP\tCONVERGED\t{}\t{}", epoch, grace.best))?;
                stop = StopReason::Converged;
                break;
            }
        }
        progress.status(&format!("{:?} after {} epochs", stop, epochs));
        log.finish()?;
        self.checkpoint.promote(stage)?;
        Ok((model, epochs, stop))
    }
    // Return true if the quality of the gating corpus declined.
    // The held-out corpus gates if there is one, the training corpus otherwise.
    #[allow(clippy::too_many_arguments)]
    fn check_quality<E: SymbolEncoder + ?Sized>(
        &self,
        checker: &mut QualityChecker,
        model: &MarkovModel,
        encoder: &E,
        corpus: &dyn Corpus,
        held_out: Option<&dyn Corpus>,
        log: &mut TrainingLog,
        progress: &mut dyn Progress,
    ) -> Result<bool> {
        let report = checker.check(CorpusKind::Training, corpus, model, encoder, progress)?;
        log.line(&format!("QUALITY\t{}", report))?;
        let gate = match held_out {
            Some(held_out) => {
                let report =
                    checker.check(CorpusKind::HeldOut, held_out, model, encoder, progress)?;
                log.line(&format!("QUALITY\t{}", report))?;
                report
            }
            None => report,
        };
        Ok(!gate.improving)
    }
}
