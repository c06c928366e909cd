use clap::{Parser, Subcommand};
use glob::glob;
use ndarray::ArrayD;
use pose_da_eval::config::{EvalConfig, LossConfig};
use pose_da_eval::dataset::{EvalDataset, InMemoryDataset, SyntheticConfig};
use pose_da_eval::io::{KeypointFile, format_curve, object_from_json, write_report};
use pose_da_eval::losses::Criterion;
use pose_da_eval::metrics::PckAccumulator;
use pose_da_eval::network::FnNetwork;
use pose_da_eval::visualization::{ArtifactSink, MemorySink, RerunSink};
use pose_da_eval::{Result, discrepancy, evaluate};
use std::time::Instant;

#[derive(Parser)]
#[command(version, about, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a two-head ensemble on seeded synthetic heatmaps
    Synthetic {
        /// Evaluation config JSON
        #[arg(short, long)]
        config: Option<String>,

        /// Synthetic dataset config JSON
        #[arg(short, long)]
        dataset: Option<String>,

        /// Record images and the PCK curve to this .rrd file
        #[arg(long)]
        rrd: Option<String>,

        /// Write the JSON report here
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Compute the PCK curve of stored keypoints, one batch per file
    Pck {
        /// Glob pattern of keypoint JSON files
        pattern: String,

        /// Evaluation config JSON, only the sweep and headline alphas are used
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Smooth-L1 distance between two JSON arrays of numbers
    Discrepancy {
        input: String,
        target: String,

        #[arg(long, default_value = "1.0")]
        beta: f32,

        /// Sum instead of mean
        #[arg(long)]
        sum: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Synthetic {
            config,
            dataset,
            rrd,
            output,
        } => run_synthetic(config, dataset, rrd, output),
        Commands::Pck { pattern, config } => run_pck(&pattern, config),
        Commands::Discrepancy {
            input,
            target,
            beta,
            sum,
        } => run_discrepancy(&input, &target, beta, sum),
    }
}

fn load_or_default<T: serde::de::DeserializeOwned + Default>(path: Option<String>) -> Result<T> {
    match path {
        Some(p) => object_from_json(&p),
        None => Ok(T::default()),
    }
}

fn run_synthetic(
    config: Option<String>,
    dataset: Option<String>,
    rrd: Option<String>,
    output: Option<String>,
) -> Result<()> {
    let mut config: EvalConfig = load_or_default(config)?;
    let syn_cfg: SyntheticConfig = load_or_default(dataset)?;
    config.img_size = syn_cfg.img_size;
    let source = InMemoryDataset::synthetic(&syn_cfg)?;
    let target = InMemoryDataset::synthetic(&SyntheticConfig {
        seed: syn_cfg.seed + 1,
        jitter: syn_cfg.jitter * 2.0,
        ..syn_cfg.clone()
    })?;

    let mut base = FnNetwork::new(|x: &ArrayD<f32>| Ok(x.clone()));
    let mut h1 = FnNetwork::new(|x: &ArrayD<f32>| Ok(x.clone()));
    let mut h2 = FnNetwork::new(|x: &ArrayD<f32>| Ok(x.mapv(|v| v * v)));

    let mut sink: Box<dyn ArtifactSink> = match &rrd {
        Some(path) => Box::new(RerunSink::save("pose-da-eval", path)?),
        None => Box::new(MemorySink::new()),
    };

    let now = Instant::now();
    let report = evaluate(
        Some(&mut base),
        Some(&mut h1),
        Some(&mut h2),
        &target,
        &config,
        sink.as_mut(),
    )?;
    log::info!("evaluation took {:.3} sec", now.elapsed().as_secs_f64());
    print!("{}", format_curve(&report));

    let criterion = LossConfig::default().build()?;
    if let (Some(src), Some(tgt)) = (source.batches().next(), target.batches().next()) {
        let d = discrepancy(&src?.inputs, &tgt?.inputs, &base, &h1, &h2, &criterion)?;
        println!(
            "discrepancy: {:.6} (src {:.6}, tgt {:.6})",
            d.loss, d.source, d.target
        );
    }

    if let Some(path) = output {
        write_report(&path, config.domain_prefix(), &config.status, &report)?;
        println!("report written to {}", path);
    }
    Ok(())
}

fn run_pck(pattern: &str, config: Option<String>) -> Result<()> {
    let config: EvalConfig = load_or_default(config)?;
    let mut acc = PckAccumulator::new(config.sweep.build()?);
    let mut paths: Vec<_> = glob(pattern)
        .map_err(|e| pose_da_eval::Error::config(e.to_string()))?
        .filter_map(|p| p.ok())
        .collect();
    paths.sort();
    for path in &paths {
        log::trace!("loading {}", path.display());
        let file: KeypointFile = object_from_json(&path.to_string_lossy())?;
        let pred = file.predicted_array()?;
        let gt = file.ground_truth_array()?;
        acc.update(&pred.view(), &gt.view(), file.img_side_len)?;
    }
    let total = acc.total();
    let curve = acc.finalize();
    println!("{} files, {} keypoints", paths.len(), total);
    for (alpha, value) in curve.points() {
        println!("    alpha {:.3}: {:.5}", alpha, value);
    }
    let [low, high] = config.headline_alphas;
    println!(
        "PCK@{:.2}={:.4}  PCK@{:.2}={:.4}",
        low,
        curve.at(low),
        high,
        curve.at(high)
    );
    Ok(())
}

fn run_discrepancy(input: &str, target: &str, beta: f32, sum: bool) -> Result<()> {
    let a: Vec<f32> = object_from_json(input)?;
    let b: Vec<f32> = object_from_json(target)?;
    let loss = LossConfig {
        beta,
        reduction: if sum {
            pose_da_eval::losses::Reduction::Sum
        } else {
            pose_da_eval::losses::Reduction::Mean
        },
    }
    .build()?;
    let a = ArrayD::from_shape_vec(ndarray::IxDyn(&[a.len()]), a)?;
    let b = ArrayD::from_shape_vec(ndarray::IxDyn(&[b.len()]), b)?;
    println!("{:.6}", loss.loss(&a, &b)?);
    Ok(())
}
