//! Symbol pairs emitted by the hidden states.
//!
//! Each step of an alignment consumes one symbol of the above sequence and a (possibly empty)
//! chunk of the below sequence. An encoder maps such a pair into a dense id, which is the
//! emission index of [crate::model::MarkovModel].
use crate::error::{AlignError, Result};
use crate::graph::AlignmentGraph;
use std::collections::HashMap;
use std::io::{BufRead, Write};

/// Collaborator turning (above symbol, below chunk) into an emission id.
pub trait SymbolEncoder: Sync {
    /// Minimum length of a below chunk consumed by one above symbol.
    fn min_below(&self) -> usize;
    /// Maximum length of a below chunk consumed by one above symbol.
    fn max_below(&self) -> usize;
    /// Number of distinct ids, i.e., every id is less than this.
    fn symbols(&self) -> usize;
    fn encode(&self, above: u8, below: &[u8]) -> usize;
}

/// Id of every pair the alphabet has never seen.
pub const UNKNOWN: usize = 0;

/// Default alphabet. It interns every pair occurring on an edge of a training graph.
#[derive(Debug, Clone, PartialEq)]
pub struct PairAlphabet {
    min_below: usize,
    max_below: usize,
    // pairs[id - 1] is the pair with `id`.
    pairs: Vec<(u8, Vec<u8>)>,
    index: HashMap<(u8, Vec<u8>), usize>,
}

impl PairAlphabet {
    pub fn new(min_below: usize, max_below: usize) -> Self {
        Self {
            min_below,
            max_below,
            pairs: vec![],
            index: HashMap::new(),
        }
    }
    /// Return the id of the pair, registering it if needed.
    pub fn intern(&mut self, above: u8, below: &[u8]) -> usize {
        if let Some(&id) = self.index.get(&(above, below.to_vec())) {
            return id;
        }
        self.pairs.push((above, below.to_vec()));
        let id = self.pairs.len();
        self.index.insert((above, below.to_vec()), id);
        id
    }
    /// Register every pair on the alignment graph of `above` and `below`.
    pub fn learn(&mut self, above: &[u8], below: &[u8]) -> Result<()> {
        let (min, max) = (self.min_below, self.max_below);
        AlignmentGraph::new(above.len(), below.len(), min, max, |a, range| {
            self.intern(above[a], &below[range])
        })
        .map(|_| ())
    }
    pub fn pair(&self, id: usize) -> Option<(u8, &[u8])> {
        match id {
            UNKNOWN => None,
            _ => self.pairs.get(id - 1).map(|(a, b)| (*a, b.as_slice())),
        }
    }
    /// Number of registered pairs, excluding [UNKNOWN].
    pub fn len(&self) -> usize {
        self.pairs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
    pub fn write_to<W: Write>(&self, wtr: &mut W) -> std::io::Result<()> {
        writeln!(wtr, "{} {} {}", self.min_below, self.max_below, self.pairs.len())?;
        for (above, below) in self.pairs.iter() {
            writeln!(wtr, "{} {}", to_hex(&[*above]), to_hex(below))?;
        }
        Ok(())
    }
    pub fn read_from<R: BufRead>(rdr: R) -> Result<Self> {
        let mut lines = rdr.lines();
        let header = lines
            .next()
            .ok_or_else(|| AlignError::format(1, "empty alphabet"))??;
        let header: Vec<usize> = header
            .split_whitespace()
            .map(|x| x.parse())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| AlignError::format(1, format!("bad header {:?}", header)))?;
        let (min_below, max_below, count) = match header.as_slice() {
            &[min, max, count] => (min, max, count),
            _ => return Err(AlignError::format(1, "header should have three fields")),
        };
        let mut alphabet = Self::new(min_below, max_below);
        let mut number = 1;
        for _ in 0..count {
            number += 1;
            let line = lines
                .next()
                .ok_or_else(|| AlignError::format(number, "unexpected end of alphabet"))??;
            let mut fields = line.split_whitespace();
            let (above, below) = match (fields.next(), fields.next(), fields.next()) {
                (Some(above), Some(below), None) => (from_hex(above), from_hex(below)),
                _ => return Err(AlignError::format(number, format!("bad pair {:?}", line))),
            };
            let (above, below) = match (above, below) {
                (Ok(above), Ok(below)) => (above, below),
                (Err(why), _) | (_, Err(why)) => {
                    return Err(AlignError::format(number, format!("{:?}: {}", line, why)))
                }
            };
            let above = match above.as_slice() {
                &[above] => above,
                _ => {
                    let message = format!("above should be one byte, found {:?}", line);
                    return Err(AlignError::format(number, message));
                }
            };
            let known = alphabet.pairs.len();
            let id = alphabet.intern(above, &below);
            if id <= known {
                let message = format!("{:?} is a duplicate of symbol {}", line, id);
                return Err(AlignError::format(number, message));
            }
        }
        Ok(alphabet)
    }
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let mut wtr = std::io::BufWriter::new(std::fs::File::create(path)?);
        self.write_to(&mut wtr)?;
        wtr.flush()?;
        Ok(())
    }
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::read_from(std::io::BufReader::new(std::fs::File::open(path)?))
    }
}

impl SymbolEncoder for PairAlphabet {
    fn min_below(&self) -> usize {
        self.min_below
    }
    fn max_below(&self) -> usize {
        self.max_below
    }
    fn symbols(&self) -> usize {
        self.pairs.len() + 1
    }
    fn encode(&self, above: u8, below: &[u8]) -> usize {
        self.index
            .get(&(above, below.to_vec()))
            .copied()
            .unwrap_or(UNKNOWN)
    }
}

// "-" stands for an empty chunk.
fn to_hex(xs: &[u8]) -> String {
    if xs.is_empty() {
        "-".to_string()
    } else {
        hex::encode(xs)
    }
}

fn from_hex(xs: &str) -> std::result::Result<Vec<u8>, hex::FromHexError> {
    match xs {
        "-" => Ok(vec![]),
        _ => hex::decode(xs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn intern_and_encode() {
        let mut alphabet = PairAlphabet::new(0, 2);
        let x = alphabet.intern(b'T', b"t");
        let y = alphabet.intern(b'X', b"ks");
        let z = alphabet.intern(b'A', b"");
        assert_eq!((x, y, z), (1, 2, 3));
        assert_eq!(alphabet.intern(b'T', b"t"), 1);
        assert_eq!(alphabet.encode(b'X', b"ks"), 2);
        assert_eq!(alphabet.encode(b'X', b"k"), UNKNOWN);
        assert_eq!(alphabet.symbols(), 4);
        assert_eq!(alphabet.pair(2), Some((b'X', &b"ks"[..])));
        assert_eq!(alphabet.pair(UNKNOWN), None);
    }
    #[test]
    fn learn_from_pair() {
        let mut alphabet = PairAlphabet::new(0, 2);
        alphabet.learn(b"TAX", b"taks").unwrap();
        assert_ne!(alphabet.encode(b'T', b"t"), UNKNOWN);
        assert_ne!(alphabet.encode(b'X', b"ks"), UNKNOWN);
        assert_ne!(alphabet.encode(b'A', b"ak"), UNKNOWN);
        let mut alphabet = PairAlphabet::new(0, 1);
        assert!(alphabet.learn(b"TAX", b"taks").unwrap_err().is_not_alignable());
    }
    #[test]
    fn codec() {
        let mut alphabet = PairAlphabet::new(1, 3);
        alphabet.learn(b"a b", b"xy\tzw").unwrap();
        let mut buf = vec![];
        alphabet.write_to(&mut buf).unwrap();
        let decoded = PairAlphabet::read_from(buf.as_slice()).unwrap();
        assert_eq!(alphabet, decoded);
        assert!(PairAlphabet::read_from("0 1 1\nzz 61\n".as_bytes()).is_err());
        assert!(PairAlphabet::read_from("0 1 2\n61 62\n".as_bytes()).is_err());
        assert!(PairAlphabet::read_from("0 1\n".as_bytes()).is_err());
        assert!(PairAlphabet::read_from("0 1 1\n6162 61\n".as_bytes()).is_err());
        assert!(PairAlphabet::read_from("0 1 1\n- 61\n".as_bytes()).is_err());
    }
    #[test]
    fn malformed_headers_are_format_errors() {
        let header_only = "0 1 18446744073709551615\n";
        match PairAlphabet::read_from(header_only.as_bytes()) {
            Err(AlignError::Format { line, .. }) => assert_eq!(line, 2),
            x => panic!("{:?}", x),
        }
        let odd = "0 1 2\n61 6\n62 -\n";
        match PairAlphabet::read_from(odd.as_bytes()) {
            Err(AlignError::Format { line, .. }) => assert_eq!(line, 2),
            x => panic!("{:?}", x),
        }
    }
    #[test]
    fn duplicated_pair_is_rejected() {
        let duplicated = "0 2 3\n54 74\n58 6b73\n54 74\n";
        match PairAlphabet::read_from(duplicated.as_bytes()) {
            Err(AlignError::Format { line, .. }) => assert_eq!(line, 4),
            x => panic!("{:?}", x),
        }
        let repeated = "0 2 2\n58 6b73\n58 6b73\n";
        match PairAlphabet::read_from(repeated.as_bytes()) {
            Err(AlignError::Format { line, .. }) => assert_eq!(line, 3),
            x => panic!("{:?}", x),
        }
        let alphabet = PairAlphabet::read_from("0 2 2\n54 74\n58 6b73\n".as_bytes()).unwrap();
        assert_eq!(alphabet.encode(b'X', b"ks"), 2);
    }
}
