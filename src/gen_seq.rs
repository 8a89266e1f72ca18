//! This module is to generate some random sequence pairs to assess the performance.
//! Usually, it would not be used in the real-applications.
use rand::seq::SliceRandom;

/// How an above symbol is rendered in the below sequence.
#[derive(Debug, Clone, Copy)]
pub struct Expansion {
    /// Weight of dropping the symbol.
    pub drop: f64,
    /// Weight of copying it in lower case.
    pub copy: f64,
    /// Weight of rendering it by two symbols.
    pub double: f64,
    /// Weight of replacing it by a random symbol.
    pub replace: f64,
}

pub const EXPANSION: Expansion = Expansion {
    drop: 0.05,
    copy: 0.75,
    double: 0.15,
    replace: 0.05,
};

#[derive(Debug, Clone, Copy)]
enum Op {
    Drop,
    Copy,
    Double,
    Replace,
}

impl Op {
    fn weight(self, p: &Expansion) -> f64 {
        match self {
            Op::Drop => p.drop,
            Op::Copy => p.copy,
            Op::Double => p.double,
            Op::Replace => p.replace,
        }
    }
}

const OPERATIONS: [Op; 4] = [Op::Drop, Op::Copy, Op::Double, Op::Replace];
const ABOVE: &[u8] = b"ACGKSTX";

/// Random above sequence on a small upper case alphabet.
pub fn generate_seq<T: rand::Rng>(rng: &mut T, len: usize) -> Vec<u8> {
    (0..len).filter_map(|_| ABOVE.choose(rng)).copied().collect()
}

/// Render `above` into a below sequence.
/// Each above symbol turns into zero, one, or two below symbols.
pub fn render<T: rand::Rng>(above: &[u8], rng: &mut T, p: &Expansion) -> Vec<u8> {
    let mut below = vec![];
    for &x in above {
        let lower = x.to_ascii_lowercase();
        match *OPERATIONS.choose_weighted(rng, |e| e.weight(p)).unwrap() {
            Op::Drop => {}
            Op::Copy => below.push(lower),
            Op::Double => below.extend_from_slice(&[lower, b'h']),
            Op::Replace => below.push(ABOVE.choose(rng).unwrap().to_ascii_lowercase()),
        }
    }
    below
}

/// A random (above, below) pair.
pub fn generate_pair<T: rand::Rng>(rng: &mut T, len: usize, p: &Expansion) -> (Vec<u8>, Vec<u8>) {
    let above = generate_seq(rng, len);
    let below = render(&above, rng, p);
    (above, below)
}
