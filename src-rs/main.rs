use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use garment_segment::{
    apply_mask, encode_mask_request, render_overlay, resize_factor, standardize_item, AnnotationPayload,
    AnnotationStore, CapturedImage, DisplayPoint, DisplayRect, HttpMaskClient, MaskImage, Orientation,
    OverlayStyle, Polarity, PoseKeypoints, SegmentationSession, SegmenterConfig,
};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde_json::{json, Value};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_VIEWPORT_WIDTH: f64 = 390.0;
const DEFAULT_THUMBNAIL_MAX: u32 = 1024;

#[derive(Parser, Debug)]
#[command(
    name = "garment-segment",
    version,
    about = "Point/box prompted garment segmentation against a mask inference server"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct GlobalArgs {
    /// JSON config file (env and flags override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Inference server base URL
    #[arg(long, global = true)]
    server: Option<String>,
    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    /// JPEG quality of the uploaded working image
    #[arg(long, global = true)]
    jpeg_quality: Option<u8>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the inference server is reachable
    Ping,
    /// Print the effective configuration, optionally saving it
    Config(ConfigArgs),
    /// Map display-space gestures to the mask request JSON (offline)
    Payload(PayloadArgs),
    /// Annotate a photo, fetch its mask and save the cut-out garment
    Segment(SegmentArgs),
    /// Apply a local mask to a local photo (offline)
    Crop(CropArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Write the effective configuration to this path
    #[arg(long)]
    save: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PhotoArgs {
    /// Full-resolution photo
    input: PathBuf,
    /// Thumbnail shown to the user (default: downscaled from the input)
    #[arg(long)]
    thumbnail: Option<PathBuf>,
    /// Longest side of a generated thumbnail
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_MAX)]
    thumbnail_max: u32,
    /// EXIF orientation tag of the photo (1-8)
    #[arg(long, default_value_t = 1)]
    orientation: u32,
}

#[derive(Args, Debug)]
struct GestureArgs {
    /// Positive tap in display points
    #[arg(long = "pos", value_name = "X,Y", value_parser = parse_display_point)]
    positive: Vec<DisplayPoint>,
    /// Negative tap in display points
    #[arg(long = "neg", value_name = "X,Y", value_parser = parse_display_point)]
    negative: Vec<DisplayPoint>,
    /// Box drag from (X1,Y1) to (X2,Y2) in display points
    #[arg(long = "box", value_name = "X1,Y1,X2,Y2", value_parser = parse_display_rect)]
    bbox: Option<DisplayRect>,
    /// Rendered width of the photo on screen
    #[arg(long, default_value_t = DEFAULT_VIEWPORT_WIDTH)]
    viewport_width: f64,
}

#[derive(Args, Debug)]
struct PayloadArgs {
    #[command(flatten)]
    photo: PhotoArgs,
    #[command(flatten)]
    gestures: GestureArgs,
    /// Also write the complete multipart request body here
    #[arg(long)]
    multipart_out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SegmentArgs {
    #[command(flatten)]
    photo: PhotoArgs,
    #[command(flatten)]
    gestures: GestureArgs,
    /// Output PNG path for the cut-out garment
    #[arg(long)]
    out: PathBuf,
    /// Save the raw server mask as PNG
    #[arg(long)]
    mask_out: Option<PathBuf>,
    /// Save the annotated working image with the mask tinted over it
    #[arg(long)]
    preview_out: Option<PathBuf>,
    /// Custom metadata sidecar path (default: <out>.json)
    #[arg(long)]
    sidecar: Option<PathBuf>,
    /// Disable metadata sidecar generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_sidecar: bool,
    /// Print the metadata JSON to stdout
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct CropArgs {
    /// Photo to cut the garment from
    input: PathBuf,
    /// Mask image (white marks the garment)
    mask: PathBuf,
    /// Output PNG path
    #[arg(long)]
    out: PathBuf,
    /// EXIF orientation tag of the photo (1-8)
    #[arg(long, default_value_t = 1)]
    orientation: u32,
    /// Pose keypoints JSON used to rescale the result to the calibrated px/cm
    #[arg(long)]
    standardize: Option<PathBuf>,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli.global)?;

    match cli.command {
        Commands::Ping => command_ping(&config),
        Commands::Config(args) => command_config(&config, args),
        Commands::Payload(args) => command_payload(&config, args),
        Commands::Segment(args) => command_segment(&config, args),
        Commands::Crop(args) => command_crop(&config, args),
    }
}

fn resolve_config(global: &GlobalArgs) -> Result<SegmenterConfig> {
    let base = match &global.config {
        Some(path) => SegmenterConfig::load(path)
            .with_context(|| format!("failed to load config: {}", path.display()))?,
        None => SegmenterConfig::default(),
    };
    let mut config = base
        .with_env_overrides()
        .context("invalid environment override")?;
    if let Some(server) = &global.server {
        config.server_url = server.clone();
    }
    if let Some(secs) = global.timeout_secs {
        config.request_timeout_secs = secs;
    }
    if let Some(quality) = global.jpeg_quality {
        config.jpeg_quality = quality;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn command_ping(config: &SegmenterConfig) -> Result<()> {
    let client = HttpMaskClient::new(config)?;
    let body = runtime()?
        .block_on(client.ping())
        .with_context(|| format!("ping failed: {}", client.ping_url()))?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn command_config(config: &SegmenterConfig, args: ConfigArgs) -> Result<()> {
    if let Some(path) = &args.save {
        config
            .save(path)
            .with_context(|| format!("failed to save config: {}", path.display()))?;
        tracing::info!(path = %path.display(), "saved configuration");
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn command_payload(config: &SegmenterConfig, args: PayloadArgs) -> Result<()> {
    let captured = load_capture(&args.photo)?;
    let mut store = AnnotationStore::new(captured.display_dims());
    let g = &args.gestures;
    for p in &g.positive {
        store.add_point(*p, g.viewport_width, Polarity::Positive)?;
    }
    for p in &g.negative {
        store.add_point(*p, g.viewport_width, Polarity::Negative)?;
    }
    if let Some(rect) = g.bbox {
        store.set_box(rect.start, rect.end, g.viewport_width)?;
    }

    let payload = store.payload();
    payload.validate()?;

    if let Some(path) = &args.multipart_out {
        let jpeg = captured.working_jpeg(config.jpeg_quality)?;
        let body = encode_mask_request(&payload, &jpeg)?;
        ensure_parent_dir(path)?;
        fs::write(path, body.bytes())
            .with_context(|| format!("failed to write multipart body: {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            content_type = %body.content_type(),
            bytes = body.len(),
            "wrote multipart body"
        );
    }

    println!("{}", payload.to_json()?);
    Ok(())
}

fn command_segment(config: &SegmenterConfig, args: SegmentArgs) -> Result<()> {
    let captured = load_capture(&args.photo)?;
    let full_dims = captured.full_dims();
    let orientation = captured.orientation();
    let client = HttpMaskClient::new(config)?;
    let upload_url = client.upload_url().to_string();
    let session = SegmentationSession::new(Arc::new(client), config.jpeg_quality);
    session.capture(captured)?;

    let g = &args.gestures;
    for p in &g.positive {
        session.add_point(*p, g.viewport_width, Polarity::Positive)?;
    }
    for p in &g.negative {
        session.add_point(*p, g.viewport_width, Polarity::Negative)?;
    }
    if let Some(rect) = g.bbox {
        session.set_box(rect.start, rect.end, g.viewport_width)?;
    }

    let rt = runtime()?;
    let mask = rt
        .block_on(session.get_mask())
        .with_context(|| format!("mask request failed: {upload_url}"))?;
    let cropped = rt.block_on(session.crop()).context("crop failed")?;

    ensure_parent_dir(&args.out)?;
    fs::write(&args.out, cropped.to_png()?)
        .with_context(|| format!("failed to write cut-out: {}", args.out.display()))?;

    if let Some(path) = &args.mask_out {
        write_png(path, mask.image())?;
    }

    let snapshot = session.snapshot();
    if let Some(path) = &args.preview_out {
        let working = session
            .captured_image()
            .context("session lost its photo")?
            .working_image()?;
        let preview = render_overlay(
            &working,
            &snapshot.points,
            snapshot.bbox,
            Some(mask.as_ref()),
            &OverlayStyle::default(),
        )?;
        write_png(path, &DynamicImage::ImageRgba8(preview))?;
    }

    let (mask_w, mask_h) = mask.dimensions();
    let (out_w, out_h) = cropped.dimensions();
    let payload = AnnotationPayload::new(snapshot.points.clone(), snapshot.bbox);
    let meta = json!({
        "generated_at": timestamp_iso(),
        "input": args.photo.input.display().to_string(),
        "output": args.out.display().to_string(),
        "server": upload_url,
        "orientation": orientation.exif_tag(),
        "full_size": full_dims,
        "display_size": snapshot.display_dims,
        "viewport_width": g.viewport_width,
        "request": payload,
        "mask_size": { "width": mask_w, "height": mask_h },
        "output_size": { "width": out_w, "height": out_h },
        "mask_out": args.mask_out.as_ref().map(|p| p.display().to_string()),
        "preview_out": args.preview_out.as_ref().map(|p| p.display().to_string()),
        "state": snapshot.state,
    });

    if !args.no_sidecar {
        let sidecar = args
            .sidecar
            .clone()
            .unwrap_or_else(|| default_sidecar_for(&args.out));
        write_json_pretty(&sidecar, &meta)?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&meta)?);
    } else {
        println!("{}", args.out.display());
    }
    Ok(())
}

fn command_crop(config: &SegmenterConfig, args: CropArgs) -> Result<()> {
    let orientation = Orientation::from_exif(args.orientation)?;
    let photo = image::open(&args.input)
        .with_context(|| format!("failed to open photo: {}", args.input.display()))?;
    let mask = image::open(&args.mask)
        .with_context(|| format!("failed to open mask: {}", args.mask.display()))?;

    let upright = orientation.apply(photo);
    let mut cropped = apply_mask(&upright, &MaskImage::new(mask))?;

    if let Some(path) = &args.standardize {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read keypoints: {}", path.display()))?;
        let keypoints: PoseKeypoints = serde_json::from_str(&raw)
            .with_context(|| format!("invalid keypoints JSON: {}", path.display()))?;
        let factor = resize_factor(&keypoints, &config.calibration);
        tracing::info!(factor, "standardizing garment scale");
        cropped = standardize_item(&cropped, factor)?;
    }

    ensure_parent_dir(&args.out)?;
    fs::write(&args.out, cropped.to_png()?)
        .with_context(|| format!("failed to write cut-out: {}", args.out.display()))?;
    println!("{}", args.out.display());
    Ok(())
}

fn load_capture(args: &PhotoArgs) -> Result<CapturedImage> {
    let orientation = Orientation::from_exif(args.orientation)?;
    let full = fs::read(&args.input)
        .with_context(|| format!("failed to read photo: {}", args.input.display()))?;
    let thumbnail = match &args.thumbnail {
        Some(path) => {
            fs::read(path).with_context(|| format!("failed to read thumbnail: {}", path.display()))?
        }
        None => make_thumbnail(&full, args.thumbnail_max)?,
    };
    Ok(CapturedImage::from_encoded(full, thumbnail, orientation)?)
}

fn make_thumbnail(full: &[u8], max_side: u32) -> Result<Vec<u8>> {
    if max_side == 0 {
        bail!("--thumbnail-max must be positive");
    }
    let image = image::load_from_memory(full).context("failed to decode photo")?;
    if image.width().max(image.height()) <= max_side {
        return Ok(full.to_vec());
    }
    let thumb = image.resize(max_side, max_side, FilterType::Lanczos3);
    let mut out = Cursor::new(Vec::new());
    thumb
        .write_to(&mut out, ImageFormat::Png)
        .context("failed to encode thumbnail")?;
    Ok(out.into_inner())
}

fn parse_numbers<const N: usize>(raw: &str) -> Result<[f64; N], String> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(format!("expected {N} comma-separated numbers, got {raw:?}"));
    }
    let mut out = [0.0; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        let v: f64 = part
            .parse()
            .map_err(|_| format!("not a number: {part:?}"))?;
        if !v.is_finite() {
            return Err(format!("not a finite number: {part:?}"));
        }
        *slot = v;
    }
    Ok(out)
}

fn parse_display_point(raw: &str) -> Result<DisplayPoint, String> {
    let [x, y] = parse_numbers::<2>(raw)?;
    Ok(DisplayPoint::new(x, y))
}

fn parse_display_rect(raw: &str) -> Result<DisplayRect, String> {
    let [x1, y1, x2, y2] = parse_numbers::<4>(raw)?;
    Ok(DisplayRect {
        start: DisplayPoint::new(x1, y1),
        end: DisplayPoint::new(x2, y2),
    })
}

fn write_png(path: &Path, image: &DynamicImage) -> Result<()> {
    ensure_parent_dir(path)?;
    image
        .save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("failed to write PNG: {}", path.display()))
}

fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn default_sidecar_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("garment")
        .to_string();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{stem}.json"))
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use tempfile::tempdir;

    #[test]
    fn gesture_values_parse() {
        assert_eq!(parse_display_point("10, 20.5").unwrap(), DisplayPoint::new(10.0, 20.5));
        let rect = parse_display_rect("1,2,3,4").unwrap();
        assert_eq!(rect.start, DisplayPoint::new(1.0, 2.0));
        assert_eq!(rect.end, DisplayPoint::new(3.0, 4.0));

        assert!(parse_display_point("10").is_err());
        assert!(parse_display_point("a,b").is_err());
        assert!(parse_display_rect("1,2,3").is_err());
        assert!(parse_display_point("NaN,1").is_err());
    }

    #[test]
    fn cli_collects_repeated_gestures() {
        let cli = Cli::try_parse_from([
            "garment-segment",
            "--server",
            "http://10.0.0.5:8000",
            "payload",
            "photo.jpg",
            "--pos",
            "10,10",
            "--pos",
            "20,20",
            "--neg",
            "5,5",
            "--box",
            "0,0,50,60",
            "--viewport-width",
            "300",
        ])
        .unwrap();
        assert_eq!(cli.global.server.as_deref(), Some("http://10.0.0.5:8000"));
        match cli.command {
            Commands::Payload(args) => {
                assert_eq!(args.gestures.positive.len(), 2);
                assert_eq!(args.gestures.negative, vec![DisplayPoint::new(5.0, 5.0)]);
                assert!(args.gestures.bbox.is_some());
                assert_eq!(args.gestures.viewport_width, 300.0);
                assert_eq!(args.photo.orientation, 1);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("segmenter.json");
        fs::write(&path, r#"{"server_url": "http://10.0.0.2:9000", "request_timeout_secs": 12}"#).unwrap();

        let global = GlobalArgs {
            config: Some(path),
            timeout_secs: Some(3),
            ..GlobalArgs::default()
        };
        let config = resolve_config(&global).unwrap();
        assert_eq!(config.request_timeout_secs, 3);
        assert_eq!(config.jpeg_quality, 100);

        let bad = GlobalArgs {
            jpeg_quality: Some(0),
            ..GlobalArgs::default()
        };
        assert!(resolve_config(&bad).is_err());
    }

    #[test]
    fn sidecar_sits_next_to_output() {
        assert_eq!(
            default_sidecar_for(Path::new("out/shirt.png")),
            PathBuf::from("out/shirt.json")
        );
    }

    #[test]
    fn generated_thumbnail_fits_max_side() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("photo.png");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(400, 200, Rgb([1, 2, 3])))
            .save(&input)
            .unwrap();

        let captured = load_capture(&PhotoArgs {
            input,
            thumbnail: None,
            thumbnail_max: 100,
            orientation: 6,
        })
        .unwrap();
        assert_eq!(captured.full_dims().width, 400);
        assert_eq!(captured.thumbnail_dims().width, 100);
        assert_eq!(captured.thumbnail_dims().height, 50);
        // orientation 6 is displayed rotated
        assert_eq!(captured.display_dims().width, 50);
    }

    #[test]
    fn offline_crop_writes_png() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("photo.png");
        let mask = dir.path().join("mask.png");
        let out = dir.path().join("nested").join("garment.png");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 60, Rgb([200, 10, 10])))
            .save(&input)
            .unwrap();
        DynamicImage::ImageLuma8(GrayImage::from_fn(20, 30, |x, _| {
            if x < 10 {
                Luma([255])
            } else {
                Luma([0])
            }
        }))
        .save(&mask)
        .unwrap();

        command_crop(
            &SegmenterConfig::default(),
            CropArgs {
                input,
                mask,
                out: out.clone(),
                orientation: 1,
                standardize: None,
            },
        )
        .unwrap();

        let written = image::open(&out).unwrap().to_rgba8();
        assert_eq!(written.dimensions(), (40, 60));
        assert_eq!(written.get_pixel(2, 30)[3], 255);
        assert_eq!(written.get_pixel(38, 30)[3], 0);
    }
}
