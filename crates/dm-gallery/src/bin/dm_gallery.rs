use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use densemat::{
    BitOp, Border, BorderType, Depth, Mat, NormKind, NormType, Padding, Rect, Scalar,
    bitwise_not, bitwise_scalar, copy_make_border, flip, merge, min_max_idx, norm, norm_diff,
    norm_hamming, normalize, split_to_vec,
};
use image::{GrayImage, RgbImage};
use log::info;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "dm_gallery")]
#[command(about = "Run densemat algorithms on image fixtures")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(name = "flip")]
    Flip(FlipArgs),
    #[command(name = "border")]
    Border(BorderArgs),
    #[command(name = "normalize")]
    Normalize(NormalizeArgs),
    #[command(name = "minmax")]
    MinMax(MinMaxArgs),
    #[command(name = "bitwise")]
    Bitwise(BitwiseArgs),
    #[command(name = "channels")]
    Channels(ChannelsArgs),
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    #[arg(long, required = true)]
    input: PathBuf,
    #[arg(long, default_value = "docs/fig/raw")]
    out: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct FlipArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// 0 vertical, positive horizontal, negative both.
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    mode: i32,
}

#[derive(Args, Debug, Clone)]
struct BorderArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, default_value_t = 16)]
    width: usize,
    /// 0 constant, 1 replicate, 2 reflect, 3 wrap, 4 reflect-101.
    #[arg(long, default_value_t = 4)]
    border: i32,
    #[arg(long, default_value_t = 0.0)]
    value: f64,
    /// Pad a centered ROI inset by this many pixels instead of the whole image.
    #[arg(long, default_value_t = 0)]
    roi_inset: usize,
    #[arg(long, default_value_t = false)]
    isolated: bool,
}

#[derive(Args, Debug, Clone)]
struct NormalizeArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, default_value_t = 0.0)]
    low: f64,
    #[arg(long, default_value_t = 255.0)]
    high: f64,
}

#[derive(Args, Debug, Clone)]
struct MinMaxArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug, Clone)]
struct BitwiseArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, default_value_t = 0xf0)]
    xor_value: u8,
}

#[derive(Args, Debug, Clone)]
struct ChannelsArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Serialize)]
struct MetaFlip {
    mode: i32,
    size: [usize; 2],
}

#[derive(Debug, Clone, Serialize)]
struct MetaBorder {
    border: String,
    width: usize,
    source_size: [usize; 2],
    output_size: [usize; 2],
    roi: Option<[usize; 4]>,
    isolated: bool,
}

#[derive(Debug, Clone, Serialize)]
struct MetaNormalize {
    input_range: [f64; 2],
    output_range: [f64; 2],
    intermediate_depth: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct MetaMinMax {
    min_val: f64,
    max_val: f64,
    min_idx: Option<Vec<usize>>,
    max_idx: Option<Vec<usize>>,
    norm_inf: f64,
    norm_l1: f64,
    norm_l2: f64,
}

#[derive(Debug, Clone, Serialize)]
struct MetaBitwise {
    xor_value: u8,
    hamming_input_vs_not: u64,
    hamming_input_vs_xor: u64,
}

#[derive(Debug, Clone, Serialize)]
struct MetaChannels {
    channels: usize,
    merge_roundtrip_l1: f64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.cmd {
        Command::Flip(args) => run_flip(args),
        Command::Border(args) => run_border(args),
        Command::Normalize(args) => run_normalize(args),
        Command::MinMax(args) => run_minmax(args),
        Command::Bitwise(args) => run_bitwise(args),
        Command::Channels(args) => run_channels(args),
    }
}

fn run_flip(args: FlipArgs) -> Result<()> {
    let case_dir = prepare_case(&args.common, "flip")?;
    let img = load_input(&args.common.input, false)?;

    let mut out = Mat::new();
    flip(&img, &mut out, args.mode).context("flipping image")?;
    save_mat_u8(case_dir.join("flipped.png"), &out)?;

    write_json(
        case_dir.join("meta.json"),
        &MetaFlip {
            mode: args.mode,
            size: [img.cols(), img.rows()],
        },
    )
}

fn run_border(args: BorderArgs) -> Result<()> {
    let case_dir = prepare_case(&args.common, "border")?;
    let img = load_input(&args.common.input, false)?;
    let kind = BorderType::try_from(args.border)
        .with_context(|| format!("border code {}", args.border))?;

    let (src, roi) = if args.roi_inset > 0 {
        let inset = args.roi_inset;
        if 2 * inset >= img.cols() || 2 * inset >= img.rows() {
            bail!(
                "roi inset {} leaves nothing of a {}x{} image.",
                inset,
                img.cols(),
                img.rows()
            );
        }
        let rect = Rect::new(inset, inset, img.cols() - 2 * inset, img.rows() - 2 * inset);
        (img.roi(rect).context("cutting roi")?, Some([rect.x, rect.y, rect.width, rect.height]))
    } else {
        (img.clone(), None)
    };

    let mut border = Border::new(kind);
    border.value = Scalar::all(args.value);
    if args.isolated {
        border = border.isolated();
    }
    let mut out = Mat::new();
    copy_make_border(&src, &mut out, Padding::uniform(args.width), &border)
        .context("padding image")?;
    save_mat_u8(case_dir.join("bordered.png"), &out)?;
    info!("border {kind:?}: {:?} -> {:?}", src.size(), out.size());

    write_json(
        case_dir.join("meta.json"),
        &MetaBorder {
            border: format!("{kind:?}"),
            width: args.width,
            source_size: [src.cols(), src.rows()],
            output_size: [out.cols(), out.rows()],
            roi,
            isolated: args.isolated,
        },
    )
}

fn run_normalize(args: NormalizeArgs) -> Result<()> {
    let case_dir = prepare_case(&args.common, "normalize")?;
    let img = load_input(&args.common.input, false)?;
    let before = min_max_idx(&img, None).context("scanning input")?;

    let mut unit = Mat::new();
    normalize(&img, &mut unit, 0.0, 1.0, NormKind::MinMax, Some(Depth::F32), None)
        .context("normalizing to [0, 1]")?;
    let mut out = Mat::new();
    unit.convert_to(&mut out, Some(Depth::U8), args.high - args.low, args.low)
        .context("rescaling to 8-bit")?;
    save_mat_u8(case_dir.join("normalized.png"), &out)?;
    let after = min_max_idx(&out, None).context("scanning output")?;

    write_json(
        case_dir.join("meta.json"),
        &MetaNormalize {
            input_range: [before.min_val, before.max_val],
            output_range: [after.min_val, after.max_val],
            intermediate_depth: "f32",
        },
    )
}

fn run_minmax(args: MinMaxArgs) -> Result<()> {
    let case_dir = prepare_case(&args.common, "minmax")?;
    let img = load_input(&args.common.input, false)?;
    let r = min_max_idx(&img, None).context("scanning input")?;
    info!("min {} at {:?}, max {} at {:?}", r.min_val, r.min_idx, r.max_val, r.max_idx);

    write_json(
        case_dir.join("meta.json"),
        &MetaMinMax {
            min_val: r.min_val,
            max_val: r.max_val,
            min_idx: r.min_idx,
            max_idx: r.max_idx,
            norm_inf: norm(&img, NormType::Inf, None)?,
            norm_l1: norm(&img, NormType::L1, None)?,
            norm_l2: norm(&img, NormType::L2, None)?,
        },
    )
}

fn run_bitwise(args: BitwiseArgs) -> Result<()> {
    let case_dir = prepare_case(&args.common, "bitwise")?;
    let img = load_input(&args.common.input, false)?;

    let mut inverted = Mat::new();
    bitwise_not(&img, &mut inverted, None).context("inverting")?;
    let mut xored = Mat::new();
    bitwise_scalar(BitOp::Xor, &img, Scalar::all(args.xor_value as f64), &mut xored, None)
        .context("xor with scalar")?;
    save_mat_u8(case_dir.join("not.png"), &inverted)?;
    save_mat_u8(case_dir.join("xor.png"), &xored)?;

    write_json(
        case_dir.join("meta.json"),
        &MetaBitwise {
            xor_value: args.xor_value,
            hamming_input_vs_not: norm_hamming(&img, Some(&inverted), 1)?,
            hamming_input_vs_xor: norm_hamming(&img, Some(&xored), 1)?,
        },
    )
}

fn run_channels(args: ChannelsArgs) -> Result<()> {
    let case_dir = prepare_case(&args.common, "channels")?;
    let img = load_input(&args.common.input, true)?;

    let planes = split_to_vec(&img).context("splitting channels")?;
    for (i, plane) in planes.iter().enumerate() {
        save_mat_u8(case_dir.join(format!("channel_{i}.png")), plane)?;
    }
    let mut merged = Mat::new();
    merge(&planes, &mut merged).context("merging channels")?;

    write_json(
        case_dir.join("meta.json"),
        &MetaChannels {
            channels: planes.len(),
            merge_roundtrip_l1: norm_diff(&img, &merged, NormType::L1, None)?,
        },
    )
}

fn prepare_case(common: &CommonArgs, case_name: &str) -> Result<PathBuf> {
    ensure_file_exists(&common.input, "input")?;

    let case_dir = common.out.join(case_name);
    fs::create_dir_all(&case_dir)
        .with_context(|| format!("creating output directory {}", case_dir.display()))?;

    fs::copy(&common.input, case_dir.join("input.png")).with_context(|| {
        format!(
            "copying input {} -> {}",
            common.input.display(),
            case_dir.join("input.png").display()
        )
    })?;

    Ok(case_dir)
}

fn load_input(path: &Path, color: bool) -> Result<Mat> {
    let dyn_img =
        image::open(path).with_context(|| format!("opening input image {}", path.display()))?;
    let (w, h, cn, data) = if color {
        let rgb = dyn_img.to_rgb8();
        let (w, h) = rgb.dimensions();
        (w, h, 3, rgb.into_raw())
    } else {
        let luma = dyn_img.to_luma8();
        let (w, h) = luma.dimensions();
        (w, h, 1, luma.into_raw())
    };

    Mat::from_slice(&[h as usize, w as usize], cn, &data)
        .with_context(|| format!("constructing array from {}", path.display()))
}

fn save_mat_u8(path: PathBuf, m: &Mat) -> Result<()> {
    if m.depth() != Depth::U8 || m.dims() != 2 {
        bail!("only 2-D 8-bit arrays can be saved, got {:?}", m);
    }
    let (w, h) = (m.cols() as u32, m.rows() as u32);
    let data = m.to_vec::<u8>().context("reading pixels")?;
    match m.channels() {
        1 => GrayImage::from_raw(w, h, data)
            .context("constructing GrayImage from raw bytes")?
            .save(&path),
        3 => RgbImage::from_raw(w, h, data)
            .context("constructing RgbImage from raw bytes")?
            .save(&path),
        cn => bail!("cannot save a {cn}-channel image"),
    }
    .with_context(|| format!("saving image {}", path.display()))
}

fn write_json(path: PathBuf, value: &impl Serialize) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("serializing json")?;
    fs::write(&path, bytes).with_context(|| format!("writing json {}", path.display()))
}

fn ensure_file_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        bail!("{} file does not exist: {}", what, path.display());
    }
    if !path.is_file() {
        bail!("{} path is not a file: {}", what, path.display());
    }
    Ok(())
}
