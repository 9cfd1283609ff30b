//! fixcnn CLI
//!
//! Quantizes float CNN graphs, runs graphs through the bit-exact
//! interpreter and inspects fixed-point codewords.
//!
//! # Usage
//!
//! ```bash
//! # Rewrite a float graph (writes tiny_quantized.json next to it)
//! fixcnn quantize --model tiny.json
//!
//! # Interpret the quantized graph and compare with a float reference
//! fixcnn run --model tiny_quantized.json --input x.json --expected y.json --tolerance 0.5
//!
//! # Show the codeword of a value
//! fixcnn encode --value -0.125 --int-bits 2 --frac-bits 6
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use fixcnn_fixed_point::{
    encode, format_bits, random_fixed_vector, random_format, to_signed, FixedPointFormat,
};
use fixcnn_harness::{compare_outputs, Interpreter};
use fixcnn_model::{ComputationGraph, QuantConfig, Tensor};
use fixcnn_quantize::GraphRewriter;

#[derive(Parser)]
#[command(name = "fixcnn")]
#[command(version)]
#[command(about = "Power-of-two fixed-point quantization for CNN graphs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite every float convolution of a graph into fixed point
    Quantize {
        /// Float graph (JSON)
        #[arg(short, long)]
        model: PathBuf,

        /// Output path, defaults to `<graph name>_quantized.json` beside the model
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Quantization config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Total width of weight formats, overrides the config
        #[arg(long)]
        weight_bits: Option<u8>,
    },

    /// Interpret a graph on an input tensor
    Run {
        /// Graph (JSON)
        #[arg(short, long)]
        model: PathBuf,

        /// Input tensor (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the output tensor
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Quantization config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Reference output tensor (JSON) to compare against
        #[arg(short, long)]
        expected: Option<PathBuf>,

        /// Largest accepted absolute error per element
        #[arg(short, long, default_value = "0.0")]
        tolerance: f64,
    },

    /// Print the fixed-point codeword of a value
    Encode {
        #[arg(long, allow_hyphen_values = true)]
        value: f64,

        #[arg(long)]
        int_bits: u8,

        #[arg(long)]
        frac_bits: u8,

        /// Use an unsigned format
        #[arg(long, default_value = "false")]
        unsigned: bool,
    },

    /// Print random codewords of a random format
    Sample {
        /// Number of codewords
        #[arg(short, long, default_value = "8")]
        count: usize,

        /// Widest format to draw
        #[arg(long, default_value = "16")]
        max_bits: u8,

        #[arg(short, long, default_value = "0")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fixcnn=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Quantize {
            model,
            output,
            config,
            weight_bits,
        } => run_quantize(&model, output, config.as_deref(), weight_bits),
        Commands::Run {
            model,
            input,
            output,
            config,
            expected,
            tolerance,
        } => run_interpret(
            &model,
            &input,
            output.as_deref(),
            config.as_deref(),
            expected.as_deref(),
            tolerance,
        ),
        Commands::Encode {
            value,
            int_bits,
            frac_bits,
            unsigned,
        } => run_encode(value, int_bits, frac_bits, unsigned),
        Commands::Sample {
            count,
            max_bits,
            seed,
        } => run_sample(count, max_bits, seed),
    }
}

/// Defaults, then the config file, then `FIXCNN_*` variables
fn load_config(path: Option<&Path>) -> Result<QuantConfig> {
    let mut config = match path {
        Some(path) => QuantConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => QuantConfig::default(),
    };
    config.apply_env();
    Ok(config)
}

fn load_graph(path: &Path) -> Result<ComputationGraph> {
    let graph = ComputationGraph::from_json_file(path)
        .with_context(|| format!("failed to load graph {}", path.display()))?;
    graph
        .validate()
        .with_context(|| format!("graph {} is malformed", path.display()))?;
    Ok(graph)
}

fn read_tensor(path: &Path) -> Result<Tensor> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid tensor in {}", path.display()))
}

fn run_quantize(
    model: &Path,
    output: Option<PathBuf>,
    config: Option<&Path>,
    weight_bits: Option<u8>,
) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(bits) = weight_bits {
        config.weight_bits = bits;
    }
    let graph = load_graph(model)?;

    let rewriter = GraphRewriter::new(config).context("invalid quantization config")?;
    let report = rewriter
        .rewrite(&graph)
        .with_context(|| format!("failed to quantize {}", graph.name))?;

    for layer in &report.layers {
        info!(
            node = %layer.node,
            format = %layer.weight_format,
            input_scale = %layer.input,
            output_scale = %layer.output,
            zero = layer.stats.zero_fraction(),
            pow2 = layer.stats.pow2_fraction(),
            mean_abs_error = layer.stats.mean_abs_error,
            "layer"
        );
    }

    let output =
        output.unwrap_or_else(|| model.with_file_name(format!("{}_quantized.json", graph.name)));
    report
        .graph
        .to_json_file(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "Quantized {} convolution(s) of '{}' -> {}",
        report.layers.len(),
        graph.name,
        output.display()
    );
    Ok(())
}

fn run_interpret(
    model: &Path,
    input: &Path,
    output: Option<&Path>,
    config: Option<&Path>,
    expected: Option<&Path>,
    tolerance: f64,
) -> Result<()> {
    let config = load_config(config)?;
    let graph = load_graph(model)?;
    let input = read_tensor(input)?;

    let interpreter = Interpreter::new(&graph, config)?;
    let result = interpreter
        .run(input)
        .with_context(|| format!("failed to run {}", graph.name))?;
    info!(shape = ?result.shape(), dtype = %result.dtype(), "graph output");

    match output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&result)?;
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        None => println!("{}", serde_json::to_string(&result)?),
    }

    if let Some(path) = expected {
        let reference = read_tensor(path)?;
        let comparison = compare_outputs(&reference, &result, tolerance)?;
        println!(
            "{}/{} elements within {} (max error {:.6}, mean error {:.6})",
            comparison.total - comparison.mismatches,
            comparison.total,
            tolerance,
            comparison.max_abs_error,
            comparison.mean_abs_error
        );
        if !comparison.passed() {
            bail!("output differs from {}", path.display());
        }
    }
    Ok(())
}

fn run_encode(value: f64, int_bits: u8, frac_bits: u8, unsigned: bool) -> Result<()> {
    let format = if unsigned {
        FixedPointFormat::unsigned(int_bits, frac_bits)?
    } else {
        FixedPointFormat::new(int_bits, frac_bits)?
    };
    let bits = encode(value, format)?;
    let decoded = to_signed(bits, format) as f64 * format.lsb();
    println!("format:  {}", format);
    println!("code:    {}", bits);
    println!("binary:  {}", format_bits(bits, format));
    println!("decoded: {}", decoded);
    Ok(())
}

fn run_sample(count: usize, max_bits: u8, seed: u64) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let format = random_format(max_bits, &mut rng)?;
    let vector = random_fixed_vector(count, format, &mut rng);
    println!("format: {}", format);
    for (bits, value) in vector.data.iter().zip(vector.to_f64_vec()) {
        println!("{}  {}", format_bits(*bits, format), value);
    }
    Ok(())
}
