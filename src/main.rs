use anyhow::{Context, Result, bail};
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

use face_harvest::cli;
use face_harvest::config;
use face_harvest::controller::{Collaborators, PipelineController};
use face_harvest::detector::SeetaLoader;
use face_harvest::logging;
use face_harvest::media::DefaultOpener;
use face_harvest::media::resolve::YtDlpResolver;
use face_harvest::progress::PlaybackProgress;
use face_harvest::recycle::{HoldingFolder, RecycleBin, SystemRecycleBin};
use face_harvest::{DatasetMode, LoopState};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args: cli::Args = argh::from_env();

    let settings = config::build_settings(&args);
    let modes = config::build_mode_flags(&args);

    let progress = Arc::new(PlaybackProgress::new(args.fps, &settings.video_path));
    let recycle_bin: Arc<dyn RecycleBin> = match &args.holding_folder {
        Some(dir) => Arc::new(HoldingFolder::new(dir)),
        None => Arc::new(SystemRecycleBin),
    };
    let deps = Collaborators {
        opener: Arc::new(DefaultOpener { sequence_fps: args.fps }),
        resolver: Arc::new(YtDlpResolver::default()),
        cascade_loader: Arc::new(SeetaLoader::default()),
        recycle_bin,
        on_reset: {
            let progress = Arc::clone(&progress);
            Arc::new(move || progress.run_reset())
        },
        display: progress.display_sink(),
    };

    let controller = PipelineController::new(settings, modes, deps);
    if modes.detection_enabled() && !controller.is_detector_ready() {
        warn!("no usable cascade at {:?}", args.cascade);
    }

    if modes.dataset_mode() == Some(DatasetMode::Learning) {
        for label in &args.label {
            let label = controller
                .append_label(label)
                .with_context(|| format!("Failed to create label {:?}", label))?;
            info!("label ready: {}", label);
        }
    }

    if args.resume {
        return review_saved(&controller);
    }

    let state = controller.start().await.context("Failed to start playback")?;
    if state != LoopState::Running {
        bail!("playback did not start");
    }
    println!("Run {} started, press ctrl-c to stop", controller.run_timestamp());

    tokio::select! {
        _ = controller.wait_stopped() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            println!("Stopping playback...");
            controller.stop();
        }
    }
    controller.wait_detections_idle().await;

    progress.finish(controller.len());

    if args.save_all && modes.dataset_mode() == Some(DatasetMode::Learning) {
        let written = controller.save_all().context("Failed to save faces")?;
        println!("Saved {} face(s) to {}", written, args.output);
    } else if controller.has_unclassified() {
        println!(
            "{} unlabelled face(s) were discarded; pass --save-all to keep them under Others",
            controller.faces().iter().filter(|face| !face.is_classified()).count()
        );
    }

    Ok(())
}

/// Loads the faces already saved in the active dataset and prints a per-label count
fn review_saved(controller: &PipelineController) -> Result<()> {
    let loaded = controller
        .resume_from_disk()
        .context("Failed to load saved faces")?;
    println!("Loaded {} saved face(s)", loaded);

    let mut per_label: BTreeMap<String, usize> = BTreeMap::new();
    for face in controller.faces() {
        *per_label.entry(face.folder_name).or_default() += 1;
    }
    for (label, count) in per_label {
        let label = if label.is_empty() { "(unlabelled)".to_string() } else { label };
        println!("  {:<24} {}", label, count);
    }
    Ok(())
}
