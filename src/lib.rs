//! Pair alignment with a hidden Markov model over symbol pairs.
//!
//! A pair `(above, below)` is aligned by mapping each byte of `above` to a short, possibly empty,
//! substring of `below`. Every such (byte, substring) pair is a symbol emitted by a
//! [MarkovModel]. [ViterbiAligner] finds the most likely alignment, and [TrainingPipeline] fits a
//! model to a corpus by Baum-Welch, keeping every finished stage on disk so an interrupted run can
//! resume.
#[macro_use]
extern crate log;
pub mod alphabet;
pub mod checkpoint;
pub mod corpus;
pub mod dptable;
pub mod error;
pub mod expectation;
pub mod gen_seq;
pub mod graph;
pub mod logspace;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod quality;
pub mod viterbi;

pub use alphabet::{PairAlphabet, SymbolEncoder};
pub use corpus::{Corpus, MemoryCorpus, TsvCorpus};
pub use error::{AlignError, Result};
pub use graph::AlignmentGraph;
pub use model::MarkovModel;
pub use pipeline::{StopReason, Trained, TrainingConfig, TrainingPipeline};
pub use quality::{CorpusKind, QualityChecker, QualityReport};
pub use viterbi::{AlignmentElement, Decoded, ViterbiAligner};
