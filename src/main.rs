use std::error::Error;

use clap::Parser;
use markov_melody::{midi, Config};
use rand::{rngs::StdRng, SeedableRng};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
/// Continue a melody from a MIDI file with a scale-constrained markov chain.
struct Args {
    /// Path to input MIDI file.
    #[arg(short, long = "in")]
    in_path: String,
    /// Path to output MIDI file. The output holds the original notes followed by the continuation.
    #[arg(short, long = "out", default_value = "generated.mid")]
    out_path: String,
    /// JSON config file. Flags given on the command line override its values.
    #[arg(short, long)]
    config: Option<String>,
    /// Markov chain order. Higher values follow the input more closely but need longer inputs.
    #[arg(short = 'O', long)]
    order: Option<usize>,
    /// Number of notes to generate.
    #[arg(short, long)]
    length: Option<usize>,
    /// Largest melodic interval, in semitones, between two generated notes.
    #[arg(long)]
    max_leap: Option<u8>,
    /// Quarter notes of silence between the input and the continuation.
    #[arg(long)]
    gap: Option<f64>,
    /// Seed for the random source. Omit for a different continuation on every run.
    #[arg(short, long)]
    seed: Option<u64>,
    /// Also write the generated notes as JSON to this path.
    #[arg(long)]
    dump_json: Option<String>,
    /// Log the input file's events and exit.
    #[arg(long)]
    describe: bool,
}

impl Args {
    fn config(&self) -> Result<Config, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(order) = self.order {
            config.generator.order = order;
        }
        if let Some(length) = self.length {
            config.generator.length = length;
        }
        if let Some(max_leap) = self.max_leap {
            config.generator.max_leap = max_leap;
        }
        if let Some(gap) = self.gap {
            config.writer.gap = gap;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.describe {
        let raw = std::fs::read(&args.in_path)?;
        midi::describe_midi(&raw)?;
        return Ok(());
    }

    let config = args.config()?;
    info!(
        order = config.generator.order,
        length = config.generator.length,
        max_leap = config.generator.max_leap,
        "continuing {}",
        args.in_path
    );

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let continuation = midi::continue_midi_file(&args.in_path, &args.out_path, &config, &mut rng)?;

    if let Some(path) = &args.dump_json {
        let json = serde_json::to_string_pretty(&continuation.generated)?;
        std::fs::write(path, json)?;
    }

    info!(
        "Generated {} notes in {} ({})",
        continuation.generated.len(),
        args.out_path,
        continuation.key
    );
    Ok(())
}
