#![feature(test)]
extern crate test;
use alignhmm::expectation::Statistics;
use alignhmm::gen_seq::{generate_pair, EXPANSION};
use alignhmm::{AlignmentGraph, MarkovModel, PairAlphabet, SymbolEncoder, ViterbiAligner};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
const SEED: u64 = 1293890;
const SHORT_LEN: usize = 50;
const PAIRS: usize = 100;

fn corpus(rng: &mut Xoshiro256StarStar) -> (PairAlphabet, Vec<(Vec<u8>, Vec<u8>)>) {
    let pairs: Vec<_> = (0..PAIRS)
        .map(|_| generate_pair(rng, SHORT_LEN, &EXPANSION))
        .collect();
    let mut alphabet = PairAlphabet::new(0, 2);
    for (above, below) in pairs.iter() {
        alphabet.learn(above, below).unwrap();
    }
    (alphabet, pairs)
}

#[bench]
fn viterbi_decode(b: &mut test::Bencher) {
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(SEED);
    let (alphabet, pairs) = corpus(&mut rng);
    let model = MarkovModel::random(4, alphabet.symbols(), SEED);
    let aligner = ViterbiAligner::new(&model, &alphabet).unwrap();
    b.iter(|| {
        pairs
            .iter()
            .map(|(above, below)| aligner.decode(above, below).unwrap().log_probability)
            .sum::<f64>()
    });
}

#[bench]
fn em_epoch(b: &mut test::Bencher) {
    let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(SEED);
    let (alphabet, pairs) = corpus(&mut rng);
    let graphs: Vec<_> = pairs
        .iter()
        .map(|(above, below)| AlignmentGraph::from_pair(above, below, &alphabet).unwrap())
        .collect();
    let model = MarkovModel::random(4, alphabet.symbols(), SEED);
    b.iter(|| {
        let stats = Statistics::from_graphs(&model, &graphs).unwrap();
        stats.maximize(&model)
    });
}
