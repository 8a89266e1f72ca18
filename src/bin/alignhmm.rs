use alignhmm::corpus::{Corpus, TsvCorpus};
use alignhmm::progress::LogProgress;
use alignhmm::{AlignmentElement, QualityChecker, TrainingConfig, TrainingPipeline, ViterbiAligner};
use clap::{App, Arg, SubCommand};
use std::io::Write;
#[macro_use]
extern crate log;

fn verbose_and_threads<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    app.arg(
        Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .help("Debug mode"),
    )
    .arg(
        Arg::with_name("threads")
            .long("threads")
            .short("t")
            .takes_value(true)
            .default_value("1")
            .help("Number of threads"),
    )
}

fn subcommand_train() -> App<'static, 'static> {
    let app = SubCommand::with_name("train")
        .version("0.1")
        .about("Fit a model to pairs by Baum-Welch. Resumes from the checkpoint directory.")
        .arg(
            Arg::with_name("corpus")
                .long("corpus")
                .short("c")
                .value_name("TSV")
                .takes_value(true)
                .required(true)
                .help("Training pairs. One `above<TAB>below` per line."),
        )
        .arg(
            Arg::with_name("held_out")
                .long("held_out")
                .value_name("TSV")
                .takes_value(true)
                .help("Held-out pairs to monitor the quality of the model."),
        )
        .arg(
            Arg::with_name("checkpoint")
                .long("checkpoint")
                .short("d")
                .value_name("DIR")
                .takes_value(true)
                .required(true)
                .help("Checkpoint directory."),
        )
        .arg(
            Arg::with_name("states")
                .long("states")
                .short("s")
                .takes_value(true)
                .default_value("2")
                .help("Number of hidden states."),
        )
        .arg(
            Arg::with_name("min_below")
                .long("min_below")
                .takes_value(true)
                .default_value("0")
                .help("Minimum number of below symbols per above symbol."),
        )
        .arg(
            Arg::with_name("max_below")
                .long("max_below")
                .takes_value(true)
                .default_value("2")
                .help("Maximum number of below symbols per above symbol."),
        )
        .arg(
            Arg::with_name("max_epochs")
                .long("max_epochs")
                .takes_value(true)
                .default_value("50")
                .help("Maximum number of EM epochs."),
        )
        .arg(
            Arg::with_name("grace_period")
                .long("grace_period")
                .takes_value(true)
                .default_value("3")
                .help("Stop after this many epochs without improvement."),
        )
        .arg(
            Arg::with_name("min_improvement")
                .long("min_improvement")
                .takes_value(true)
                .default_value("0.0001")
                .help("Relative gain of the log likelihood counted as an improvement."),
        )
        .arg(
            Arg::with_name("quality_interval")
                .long("quality_interval")
                .takes_value(true)
                .default_value("1")
                .help("Check the quality every this many epochs. 0 to disable."),
        )
        .arg(
            Arg::with_name("stop_on_quality_decline")
                .long("stop_on_quality_decline")
                .help("Stop when the quality decreases."),
        )
        .arg(
            Arg::with_name("batch_size")
                .long("batch_size")
                .takes_value(true)
                .default_value("256")
                .help("Number of graphs processed in parallel at once."),
        )
        .arg(
            Arg::with_name("initial_model")
                .long("initial_model")
                .value_name("MODEL")
                .takes_value(true)
                .help("Start from this model instead of a random one."),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .takes_value(true)
                .default_value("32389")
                .help("Seed"),
        );
    verbose_and_threads(app)
}

fn subcommand_align() -> App<'static, 'static> {
    let app = SubCommand::with_name("align")
        .version("0.1")
        .about("Align pairs with a trained model.")
        .arg(
            Arg::with_name("checkpoint")
                .long("checkpoint")
                .short("d")
                .value_name("DIR")
                .takes_value(true)
                .required(true)
                .help("Checkpoint directory of a completed training."),
        )
        .arg(
            Arg::with_name("pairs")
                .long("pairs")
                .short("p")
                .value_name("TSV")
                .takes_value(true)
                .required(true)
                .help("Pairs to align. One `above<TAB>below` per line."),
        );
    verbose_and_threads(app)
}

fn parse<T: std::str::FromStr>(matches: &clap::ArgMatches, name: &str) -> alignhmm::Result<T> {
    matches
        .value_of(name)
        .and_then(|e| e.parse().ok())
        .ok_or_else(|| alignhmm::AlignError::Config(format!("invalid value for --{}", name)))
}

fn train(matches: &clap::ArgMatches) -> alignhmm::Result<()> {
    let states: usize = parse(matches, "states")?;
    let seed: u64 = parse(matches, "seed")?;
    let mut config = TrainingConfig::new(states, seed)
        .with_below_bounds(parse(matches, "min_below")?, parse(matches, "max_below")?)
        .with_max_epochs(parse(matches, "max_epochs")?)
        .with_grace_period(parse(matches, "grace_period")?)
        .with_min_improvement(parse(matches, "min_improvement")?)
        .with_quality_interval(parse(matches, "quality_interval")?)
        .with_stop_on_quality_decline(matches.is_present("stop_on_quality_decline"))
        .with_batch_size(parse(matches, "batch_size")?);
    if let Some(path) = matches.value_of("initial_model") {
        config = config.with_initial_model(path);
    }
    let root = matches.value_of("checkpoint").unwrap();
    let pipeline = TrainingPipeline::new(config, root)?;
    let corpus = TsvCorpus::new(matches.value_of("corpus").unwrap());
    let held_out = matches.value_of("held_out").map(TsvCorpus::new);
    let held_out = held_out.as_ref().map(|c| c as &dyn Corpus);
    let mut checker = QualityChecker::new();
    let mut progress = LogProgress::default();
    let trained = pipeline.train(&corpus, held_out, Some(&mut checker), &mut progress)?;
    info!(
        "TRAINED\t{}\t{:?}\t{}",
        trained.epochs,
        trained.stop,
        pipeline.checkpoint().root().display()
    );
    Ok(())
}

fn render(above: &[u8], below: &[u8], elements: &[AlignmentElement]) -> String {
    let (mut a, mut b) = (0, 0);
    let segments: Vec<_> = elements
        .iter()
        .map(|e| {
            let segment = format!(
                "{}|{}",
                String::from_utf8_lossy(&above[a..e.above]),
                String::from_utf8_lossy(&below[b..e.below])
            );
            a = e.above;
            b = e.below;
            segment
        })
        .collect();
    segments.join(" ")
}

fn align(matches: &clap::ArgMatches) -> alignhmm::Result<()> {
    let (alphabet, model) = TrainingPipeline::load(matches.value_of("checkpoint").unwrap())?;
    let aligner = ViterbiAligner::new(&model, &alphabet)?;
    let pairs = TsvCorpus::new(matches.value_of("pairs").unwrap());
    let stdout = std::io::stdout();
    let mut wtr = std::io::BufWriter::new(stdout.lock());
    for pair in pairs.pairs()? {
        let (above, below) = pair?;
        let decoded = aligner.decode(&above, &below)?;
        let line = render(&above, &below, &decoded.elements);
        writeln!(wtr, "{}\t{}", line, decoded.log_probability)?;
    }
    wtr.flush()?;
    Ok(())
}

fn main() -> alignhmm::Result<()> {
    let matches = App::new("alignhmm")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Train:[TSV]->[MODEL] or Align:[MODEL]x[TSV]->[ALIGNMENTS]")
        .setting(clap::AppSettings::ArgRequiredElseHelp)
        .subcommand(subcommand_train())
        .subcommand(subcommand_align())
        .get_matches();
    if let Some(sub_m) = matches.subcommand().1 {
        let level = match sub_m.occurrences_of("verbose") {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
        let threads: usize = parse(sub_m, "threads")?;
        if let Err(why) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
        {
            debug!("{:?}", why);
        }
    }
    debug!("Start");
    match matches.subcommand() {
        ("train", Some(sub_m)) => train(sub_m),
        ("align", Some(sub_m)) => align(sub_m),
        _ => unreachable!(),
    }
}
