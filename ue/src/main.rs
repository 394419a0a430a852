//! Albor Space LTE UE Cell Search Application
//!
//! Searches an I/Q capture for LTE cells: one synchronizer per N_id_2 runs
//! over consecutive frame windows, every detection is reported and the most
//! frequently decoded cell identity wins.

mod config;

use anyhow::{bail, Result};
use clap::Parser;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::types::{CyclicPrefix, Pci};
use config::UeConfig;
use interfaces::iq_file::read_fc32;
use layers::phy::{CellSynchronizer, StepOutcome};
use num_complex::Complex32;

/// Albor Space LTE UE cell search
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ue.yml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// I/Q capture, overrides capture.file
    #[arg(short, long)]
    input: Option<String>,

    /// Only search this N_id_2 (0-2)
    #[arg(long)]
    nid2: Option<u8>,

    /// Print detections as JSON lines
    #[arg(long)]
    json: bool,
}

/// One detection in one frame window
#[derive(Debug, Serialize)]
struct Detection {
    n_id_2: u8,
    frame: usize,
    /// Absolute sample index just past the PSS
    position: usize,
    peak_value: f32,
    cell_id: Option<u16>,
    sf_idx: Option<u32>,
    cfo: f32,
    cp: CyclicPrefix,
    sss: StepOutcome,
}

/// Vote over all decoded identities
#[derive(Debug, Serialize)]
struct Summary {
    cell_id: Option<u16>,
    votes: usize,
    detections: usize,
}

/// Run one synchronizer over the capture
fn search_n_id_2(
    config: &UeConfig,
    samples: &[Complex32],
    n_id_2: u8,
    json: bool,
    votes: &mut HashMap<Pci, usize>,
) -> Result<usize> {
    let mut sync = CellSynchronizer::from_config(&config.sync)?;
    sync.set_n_id_2(n_id_2)?;

    let frame_size = sync.frame_size();
    let max_frames = config.search.max_frames.unwrap_or(usize::MAX);
    let mut offset = config.capture.offset;
    let mut frame = 0;
    let mut detections = 0;

    while offset + frame_size <= samples.len() && frame < max_frames {
        let result = sync.find(samples, offset)?;

        if result.detected {
            detections += 1;
            let cell_id = (result.sss == StepOutcome::Completed)
                .then(|| sync.cell_id())
                .flatten();
            if let Some(pci) = cell_id {
                *votes.entry(pci).or_insert(0) += 1;
            }

            let detection = Detection {
                n_id_2,
                frame,
                position: offset + result.peak_position,
                peak_value: result.peak_value,
                cell_id: cell_id.map(|pci| pci.0),
                sf_idx: cell_id.map(|_| sync.sf_idx()),
                cfo: sync.cfo(),
                cp: sync.cp(),
                sss: result.sss,
            };

            if json {
                println!("{}", serde_json::to_string(&detection)?);
            } else {
                info!(
                    "N_id_2={} frame={} pos={} peak={:.2} PCI={:?} sf_idx={:?} CFO={:.3} kHz CP={:?}",
                    n_id_2,
                    frame,
                    detection.position,
                    detection.peak_value,
                    detection.cell_id,
                    detection.sf_idx,
                    15.0 * detection.cfo,
                    detection.cp
                );
            }
        } else {
            debug!(
                "N_id_2={} frame={} peak {:.2} below threshold",
                n_id_2, frame, result.peak_value
            );
        }

        offset += frame_size;
        frame += 1;
    }

    Ok(detections)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = UeConfig::from_yaml_file(&args.config)?;

    // Initialize logging
    let level = args.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Albor Space LTE UE cell search");
    info!("Configuration file: {}", args.config);

    let input = args.input.clone().unwrap_or_else(|| config.capture.file.clone());
    let samples = read_fc32(&input)?;
    info!("Loaded {} samples from {}", samples.len(), input);

    let n_id_2_list: Vec<u8> = match args.nid2 {
        Some(n) if n > 2 => bail!("Invalid N_id_2: {}", n),
        Some(n) => vec![n],
        None if !config.search.n_id_2.is_empty() => config.search.n_id_2.clone(),
        None => vec![0, 1, 2],
    };

    info!("Search configuration:");
    info!("  FFT size: {}", config.sync.fft_size);
    info!("  Frame size: {}", config.sync.frame_size);
    info!("  Threshold: {}", config.sync.threshold);
    info!("  SSS algorithm: {:?}", config.sync.sss_algorithm);
    info!("  N_id_2: {:?}", n_id_2_list);

    let mut votes: HashMap<Pci, usize> = HashMap::new();
    let mut detections = 0;
    for n_id_2 in n_id_2_list {
        detections += search_n_id_2(&config, &samples, n_id_2, args.json, &mut votes)?;
    }

    let best = votes
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0 .0.cmp(&a.0 .0)))
        .map(|(pci, count)| (*pci, *count));

    let summary = Summary {
        cell_id: best.map(|(pci, _)| pci.0),
        votes: best.map(|(_, count)| count).unwrap_or(0),
        detections,
    };

    if args.json {
        println!("{}", serde_json::to_string(&summary)?);
    }

    match best {
        Some((pci, count)) => info!(
            "Cell found: PCI {} (N_id_1={}, N_id_2={}) with {} of {} detections",
            pci.0,
            pci.n_id_1(),
            pci.n_id_2(),
            count,
            detections
        ),
        None => warn!("No cell identity decoded in {} detections", detections),
    }

    Ok(())
}
