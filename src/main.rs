mod capture;
mod device;
mod frames;
mod output;
mod processor;
mod render;
mod segmentation;

use anyhow::{Context, Result};
use capture::SeedPicker;
use clap::{Parser, Subcommand};
use device::{DevicePreference, DeviceSelector, SystemProbe};
use output::{PngDirectory, Surface, WindowSurface};
use processor::Sam2Processor;
use segmentation::{BoundingBox, ClickPoint, ObjectId, PointLabel};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Click seed points on an image and print their coordinates
    Pick {
        /// Image to click on
        image: PathBuf,
    },

    /// Seed an object with clicks and propagate its mask through a frame directory
    Segment(SegmentArgs),
}

#[derive(clap::Args, Debug)]
struct SegmentArgs {
    /// Directory of numerically named .jpg/.jpeg frames
    #[arg(long)]
    frames: PathBuf,

    /// SAM2 image encoder (ONNX file)
    #[arg(long)]
    encoder: String,

    /// SAM2 mask decoder (ONNX file)
    #[arg(long)]
    decoder: String,

    /// Seed click as X,Y,LABEL (LABEL 1 = foreground, 0 = background); repeatable
    #[arg(long = "point", required = true)]
    points: Vec<ClickPoint>,

    /// Box to draw on the clicked frame as X0,Y0,X1,Y1; repeatable
    #[arg(long = "box")]
    boxes: Vec<BoundingBox>,

    /// Frame the clicks were made on
    #[arg(long, default_value_t = 0)]
    frame_index: usize,

    /// Id of the object being seeded
    #[arg(long, default_value_t = 1)]
    object_id: ObjectId,

    /// Show every Nth frame of the propagated result
    #[arg(long, default_value_t = 1)]
    stride: usize,

    /// Write figures as PNG files into this directory instead of opening windows
    #[arg(long)]
    output: Option<PathBuf>,

    /// Run the session without presenting any figure
    #[arg(long)]
    no_show: bool,

    /// Execution device: auto, cuda, coreml or cpu
    #[arg(long, default_value = "auto")]
    device: DevicePreference,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match args.command {
        Command::Pick { image } => run_picker(image),
        Command::Segment(segment) => run_segmentation(segment),
    }
}

fn run_picker(image: PathBuf) -> Result<()> {
    let picker = SeedPicker::open(&image).context("Failed to load image for point selection")?;
    let points = picker.run()?;

    tracing::info!("Selected seed points: {:?}", points);
    Ok(())
}

fn run_segmentation(args: SegmentArgs) -> Result<()> {
    tracing::info!("sam2-click starting");

    let device = DeviceSelector::with_preference(&SystemProbe, args.device).device();

    let predictor = segmentation::create_default_predictor(&args.encoder, &args.decoder, device)
        .context("Failed to load SAM2 model")?;
    tracing::info!("SAM2 model loaded successfully");

    let mut processor = Sam2Processor::new(predictor, &args.frames)
        .context("Failed to initialize segmentation session")?;
    for bbox in &args.boxes {
        processor.add_box(args.frame_index, bbox.0)?;
    }

    let points: Vec<[f32; 2]> = args.points.iter().map(|p| [p.x, p.y]).collect();
    let labels: Vec<PointLabel> = args.points.iter().map(|p| p.label).collect();

    let seeded = processor
        .apply_clicks_to_predictor(args.frame_index, args.object_id, &points, &labels)
        .context("Failed to apply clicks")?;

    let mut surface: Box<dyn Surface> = match &args.output {
        Some(directory) => Box::new(PngDirectory::new(directory)?),
        None => Box::new(WindowSurface::new()),
    };
    let show = !args.no_show;

    let slot = seeded
        .object_ids
        .iter()
        .position(|id| *id == args.object_id)
        .context("predictor returned no mask for the seeded object")?;
    let seed_mask =
        segmentation::logits_to_mask(seeded.mask_logits.index_axis(ndarray::Axis(0), slot));
    processor.display_mask_on_frame(
        surface.as_mut(),
        args.frame_index,
        &points,
        &labels,
        &seed_mask,
        args.object_id,
        show,
    )?;

    let segments = processor
        .propagate_and_segment_video()
        .context("Failed to propagate masks")?;

    processor.visualize_segments(surface.as_mut(), &segments, args.stride, show)?;
    surface.close_all()?;

    tracing::info!(
        "Done: {} of {} frames segmented",
        segments.len(),
        processor.frames().len()
    );
    Ok(())
}
