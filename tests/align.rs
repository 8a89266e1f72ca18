use alignhmm::progress::NoProgress;
use alignhmm::viterbi::segments;
use alignhmm::*;
use std::io::Write;

fn training_corpus() -> MemoryCorpus {
    let mut pairs: Vec<(&[u8], &[u8])> =
        vec![(&b"TAX"[..], &b"taks"[..]), (&b"AX"[..], &b"aks"[..])];
    for _ in 0..10 {
        pairs.push((&b"T"[..], &b"t"[..]));
        pairs.push((&b"A"[..], &b"a"[..]));
        pairs.push((&b"X"[..], &b"ks"[..]));
    }
    pairs.into_iter().collect()
}

#[test]
fn learns_to_segment() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainingConfig::new(1, 24).with_max_epochs(5);
    let pipeline = TrainingPipeline::new(config, dir.path()).unwrap();
    let mut checker = QualityChecker::new();
    pipeline
        .train(&training_corpus(), None, Some(&mut checker), &mut NoProgress)
        .unwrap();
    let (alphabet, model) = TrainingPipeline::load(dir.path()).unwrap();
    let aligner = ViterbiAligner::new(&model, &alphabet).unwrap();
    let elements = aligner.align(b"TAX", b"taks").unwrap();
    let expected: Vec<_> = [(1, 1), (2, 2), (3, 4)]
        .iter()
        .map(|&(a, b)| AlignmentElement::new(a, b))
        .collect();
    assert_eq!(elements, expected);
    let chunks = segments(b"taks", &elements);
    assert_eq!(chunks, vec![&b"t"[..], &b"a"[..], &b"ks"[..]]);
    let decoded = aligner.decode(b"TAX", b"taks").unwrap();
    assert!(decoded.log_probability < 0f64);
    assert_eq!(decoded.states, vec![0, 0, 0]);
    // Out of the bounds of the alphabet.
    let decoded = aligner.decode(b"A", b"aaaa").unwrap();
    assert_eq!(decoded.elements, vec![AlignmentElement::new(1, 4)]);
    assert!(decoded.states.is_empty());
}

#[test]
fn tsv_corpus_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pairs.tsv");
    let mut file = std::fs::File::create(&path).unwrap();
    for (above, below) in training_corpus().pairs().unwrap().map(|x| x.unwrap()) {
        file.write_all(&above).unwrap();
        file.write_all(b"\t").unwrap();
        file.write_all(&below).unwrap();
        file.write_all(b"\n").unwrap();
    }
    file.flush().unwrap();
    let corpus = TsvCorpus::new(&path);
    assert_eq!(corpus.len_hint(), Some(32));
    let config = TrainingConfig::new(1, 24).with_max_epochs(2);
    let pipeline = TrainingPipeline::new(config, dir.path().join("checkpoint")).unwrap();
    let from_file = pipeline.train(&corpus, None, None, &mut NoProgress).unwrap();
    let config = TrainingConfig::new(1, 24).with_max_epochs(2);
    let pipeline = TrainingPipeline::new(config, dir.path().join("memory")).unwrap();
    let from_memory = pipeline
        .train(&training_corpus(), None, None, &mut NoProgress)
        .unwrap();
    assert_eq!(from_file.alphabet, from_memory.alphabet);
    assert!(from_file.model.dist(&from_memory.model).unwrap() < 1e-20);
}
