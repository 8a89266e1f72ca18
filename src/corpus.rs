//! Training data providers.
//! A corpus is re-read from its source on every pass, so it never has to fit in memory.
use crate::error::{AlignError, Result};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

pub type Pair = (Vec<u8>, Vec<u8>);

pub trait Corpus: Sync {
    /// Start a new pass over the pairs.
    fn pairs(&self) -> Result<Box<dyn Iterator<Item = Result<Pair>> + '_>>;
    /// Number of pairs, if it is cheap to know.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// Pairs in a text file, one `above<TAB>below` per line. Empty lines are ignored.
#[derive(Debug, Clone)]
pub struct TsvCorpus {
    path: PathBuf,
}

impl TsvCorpus {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_line(number: usize, line: &[u8]) -> Result<Pair> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let mut fields = line.splitn(2, |&x| x == b'\t');
    match (fields.next(), fields.next()) {
        (Some(above), Some(below)) if !below.contains(&b'\t') => {
            Ok((above.to_vec(), below.to_vec()))
        }
        _ => Err(AlignError::format(
            number,
            format!(
                "expected two tab-separated fields, found {:?}",
                String::from_utf8_lossy(line)
            ),
        )),
    }
}

impl Corpus for TsvCorpus {
    fn pairs(&self) -> Result<Box<dyn Iterator<Item = Result<Pair>> + '_>> {
        let rdr = BufReader::new(std::fs::File::open(&self.path)?);
        let pairs = rdr
            .split(b'\n')
            .enumerate()
            .filter(|(_, line)| !matches!(line, Ok(line) if line.is_empty() || line == b"\r"))
            .map(|(i, line)| parse_line(i + 1, &line?));
        Ok(Box::new(pairs))
    }
    fn len_hint(&self) -> Option<usize> {
        let mut rdr = std::fs::File::open(&self.path).ok()?;
        let mut buf = vec![0u8; 1 << 16];
        let (mut lines, mut last) = (0, b'\n');
        loop {
            let len = rdr.read(&mut buf).ok()?;
            if len == 0 {
                break;
            }
            lines += bytecount::count(&buf[..len], b'\n');
            last = buf[len - 1];
        }
        Some(lines + (last != b'\n') as usize)
    }
}

/// Pairs held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCorpus {
    pairs: Vec<Pair>,
}

impl MemoryCorpus {
    pub fn new(pairs: Vec<Pair>) -> Self {
        Self { pairs }
    }
}

impl<'a> std::iter::FromIterator<(&'a [u8], &'a [u8])> for MemoryCorpus {
    fn from_iter<I: IntoIterator<Item = (&'a [u8], &'a [u8])>>(iter: I) -> Self {
        let pairs = iter.into_iter().map(|(a, b)| (a.to_vec(), b.to_vec())).collect();
        Self { pairs }
    }
}

impl Corpus for MemoryCorpus {
    fn pairs(&self) -> Result<Box<dyn Iterator<Item = Result<Pair>> + '_>> {
        Ok(Box::new(self.pairs.iter().cloned().map(Ok)))
    }
    fn len_hint(&self) -> Option<usize> {
        Some(self.pairs.len())
    }
}
