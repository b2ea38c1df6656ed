/// Rendering of prediction triplets and loss curves
///
/// Images are written as PNG files; nothing here feeds back into training.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use candle_core::{DType, Tensor};
use image::{imageops, Rgb, RgbImage};
use plotters::prelude::*;
use plotters::style::FontStyle;

/// Smallest edge, in pixels, of one rendered panel; small inputs are upscaled
const MIN_PANEL_SIZE: usize = 128;
const PANEL_GAP: u32 = 4;

const PANEL_BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

const CHART_WIDTH: u32 = 640;
const CHART_HEIGHT: u32 = 400;
const CHART_MARGIN: u32 = 16;

const TRAIN_COLOR: RGBColor = RGBColor(31, 119, 180);
const VAL_COLOR: RGBColor = RGBColor(255, 127, 14);

const FONT_CANDIDATES: [&str; 6] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Colour per class ID, repeated for IDs past the end
const PALETTE: [[u8; 3]; 10] = [
    [0, 0, 0],       // background
    [255, 0, 0],     // building flooded
    [180, 120, 120], // building non-flooded
    [160, 150, 20],  // road flooded
    [140, 140, 140], // road non-flooded
    [61, 230, 250],  // water
    [0, 82, 255],    // tree
    [255, 0, 245],   // vehicle
    [255, 235, 0],   // pool
    [4, 250, 7],     // grass
];

/// First item of a batch, pulled to the host for rendering
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionSample {
    /// [channels, H, W] in [0, 1]
    pub image: Vec<f32>,
    pub channels: usize,
    /// Predicted class per pixel [H, W]
    pub prediction: Vec<u32>,
    /// Ground-truth class per pixel [H, W]
    pub truth: Vec<u32>,
    pub height: usize,
    pub width: usize,
}

impl PredictionSample {
    /// Take item 0 of `images` [N, C, H, W], `predictions` [N, H, W] and
    /// `targets` [N, H, W]
    pub fn from_batch(images: &Tensor, predictions: &Tensor, targets: &Tensor) -> crate::Result<Self> {
        let (_, channels, height, width) = images.dims4()?;

        let image = images.get(0)?.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let prediction = predictions.get(0)?.to_dtype(DType::U32)?.flatten_all()?.to_vec1::<u32>()?;
        let truth = targets.get(0)?.to_dtype(DType::U32)?.flatten_all()?.to_vec1::<u32>()?;

        if prediction.len() != height * width || truth.len() != height * width {
            return Err(crate::FloodNetError::Data(format!(
                "prediction/target maps do not match image size {}x{}",
                height, width
            )));
        }

        Ok(Self {
            image,
            channels,
            prediction,
            truth,
            height,
            width,
        })
    }
}

/// Destination for rendered training artefacts
pub trait Visualizer {
    /// Input image, ground truth and prediction side by side
    fn show_prediction(&mut self, tag: &str, sample: &PredictionSample) -> crate::Result<()>;

    /// Train and validation loss per epoch
    fn show_losses(&mut self, train_losses: &[f32], val_losses: &[f32]) -> crate::Result<()>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullVisualizer;

impl Visualizer for NullVisualizer {
    fn show_prediction(&mut self, _tag: &str, _sample: &PredictionSample) -> crate::Result<()> {
        Ok(())
    }

    fn show_losses(&mut self, _train_losses: &[f32], _val_losses: &[f32]) -> crate::Result<()> {
        Ok(())
    }
}

/// Writes PNG files into a directory
pub struct PngVisualizer {
    output_dir: PathBuf,
    written: Vec<PathBuf>,
}

impl PngVisualizer {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> crate::Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            written: Vec::new(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Files written so far, oldest first
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn save(&mut self, name: &str, image: &RgbImage) -> crate::Result<()> {
        let path = self.output_dir.join(name);
        image.save(&path)?;
        log::info!("Saved {}", path.display());
        self.written.push(path);
        Ok(())
    }
}

impl Visualizer for PngVisualizer {
    fn show_prediction(&mut self, tag: &str, sample: &PredictionSample) -> crate::Result<()> {
        let image = render_prediction(sample);
        self.save(&format!("{}.png", tag), &image)
    }

    fn show_losses(&mut self, train_losses: &[f32], val_losses: &[f32]) -> crate::Result<()> {
        let chart = render_loss_chart(train_losses, val_losses)?;
        self.save("loss.png", &chart)
    }
}

/// Argmax a single score map [num_classes, H, W] and show it next to its
/// image [C, H, W] and ground truth [H, W]
pub fn visualize_logits(
    visualizer: &mut dyn Visualizer,
    tag: &str,
    image: &Tensor,
    logits: &Tensor,
    truth: &Tensor,
) -> crate::Result<()> {
    let prediction = logits.argmax(0)?;
    let sample = PredictionSample::from_batch(
        &image.unsqueeze(0)?,
        &prediction.unsqueeze(0)?,
        &truth.unsqueeze(0)?,
    )?;
    visualizer.show_prediction(tag, &sample)
}

/// Colour for a class ID
pub fn class_color(class: u32) -> Rgb<u8> {
    Rgb(PALETTE[class as usize % PALETTE.len()])
}

/// Three panels: input image, ground truth, prediction
pub fn render_prediction(sample: &PredictionSample) -> RgbImage {
    let (h, w) = (sample.height as u32, sample.width as u32);
    let plane = sample.height * sample.width;

    let input = RgbImage::from_fn(w, h, |x, y| {
        let i = (y * w + x) as usize;
        let channel = |c: usize| {
            let c = c.min(sample.channels.saturating_sub(1));
            let v = sample.image.get(c * plane + i).copied().unwrap_or(0.0);
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        };
        Rgb([channel(0), channel(1), channel(2)])
    });

    let class_map = |labels: &[u32]| {
        RgbImage::from_fn(w, h, |x, y| {
            class_color(labels.get((y * w + x) as usize).copied().unwrap_or(0))
        })
    };
    let truth = class_map(&sample.truth);
    let prediction = class_map(&sample.prediction);

    let longest = sample.height.max(sample.width).max(1);
    let scale = ((MIN_PANEL_SIZE + longest - 1) / longest).max(1) as u32;
    let (pw, ph) = (w * scale, h * scale);

    let mut canvas = RgbImage::from_pixel(pw * 3 + PANEL_GAP * 2, ph, PANEL_BACKGROUND);
    for (i, panel) in [input, truth, prediction].iter().enumerate() {
        let panel = imageops::resize(panel, pw, ph, imageops::FilterType::Nearest);
        let x = i as u32 * (pw + PANEL_GAP);
        imageops::replace(&mut canvas, &panel, x as i64, 0);
    }

    canvas
}

/// Line chart of the two loss series against epoch
///
/// Axis descriptions and the legend need a TrueType font (see
/// [`chart_font_available`]); without one only the axes area and the series
/// are drawn.
pub fn render_loss_chart(train_losses: &[f32], val_losses: &[f32]) -> crate::Result<RgbImage> {
    let labelled = chart_font_available();
    let mut buffer = vec![0u8; (CHART_WIDTH * CHART_HEIGHT * 3) as usize];

    {
        let root = BitMapBackend::with_buffer(&mut buffer, (CHART_WIDTH, CHART_HEIGHT))
            .into_drawing_area();
        root.fill(&WHITE).map_err(plot_error)?;

        let last_epoch = train_losses.len().max(val_losses.len()).max(2) as f32;
        let (y_min, y_max) = loss_range(train_losses, val_losses);

        let mut builder = ChartBuilder::on(&root);
        builder.margin(CHART_MARGIN);
        if labelled {
            builder
                .caption("Training and Validation Loss", ("sans-serif", 20))
                .x_label_area_size(40)
                .y_label_area_size(50);
        }
        let mut chart = builder
            .build_cartesian_2d(1f32..last_epoch, y_min..y_max)
            .map_err(plot_error)?;

        if labelled {
            chart
                .configure_mesh()
                .x_desc("Epoch")
                .y_desc("Loss")
                .draw()
                .map_err(plot_error)?;
        } else {
            chart
                .configure_mesh()
                .x_labels(0)
                .y_labels(0)
                .draw()
                .map_err(plot_error)?;
        }

        for (series, color, label) in [
            (train_losses, TRAIN_COLOR, "Train Loss"),
            (val_losses, VAL_COLOR, "Validation Loss"),
        ] {
            let points: Vec<(f32, f32)> = series
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_finite())
                .map(|(i, &v)| ((i + 1) as f32, v))
                .collect();
            if points.is_empty() {
                continue;
            }

            chart
                .draw_series(LineSeries::new(points.clone(), &color))
                .map_err(plot_error)?
                .label(label)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
            chart
                .draw_series(points.into_iter().map(|p| Circle::new(p, 3, color.filled())))
                .map_err(plot_error)?;
        }

        if labelled {
            chart
                .configure_series_labels()
                .position(SeriesLabelPosition::UpperRight)
                .background_style(&WHITE.mix(0.8))
                .border_style(&BLACK)
                .draw()
                .map_err(plot_error)?;
        }

        root.present().map_err(plot_error)?;
    }

    RgbImage::from_raw(CHART_WIDTH, CHART_HEIGHT, buffer)
        .ok_or_else(|| crate::FloodNetError::Plot("chart buffer has the wrong size".to_string()))
}

/// Y range covering every finite loss, padded so flat series stay visible
fn loss_range(train_losses: &[f32], val_losses: &[f32]) -> (f32, f32) {
    let (min, max) = train_losses
        .iter()
        .chain(val_losses)
        .copied()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

    if !min.is_finite() {
        return (0.0, 1.0);
    }
    let pad = ((max - min) * 0.1).max(1e-3);
    (min - pad, max + pad)
}

fn plot_error<E: std::fmt::Display>(err: E) -> crate::FloodNetError {
    crate::FloodNetError::Plot(err.to_string())
}

/// Register a TrueType font for chart text, once per process
///
/// `FLOODNET_CHART_FONT` is tried first, then common system locations.
pub fn chart_font_available() -> bool {
    static REGISTERED: OnceLock<bool> = OnceLock::new();

    *REGISTERED.get_or_init(|| {
        let candidates = std::env::var_os("FLOODNET_CHART_FONT")
            .map(PathBuf::from)
            .into_iter()
            .chain(FONT_CANDIDATES.iter().map(PathBuf::from));

        for path in candidates {
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            // plotters keeps registered fonts for the life of the process
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            if plotters::style::register_font("sans-serif", FontStyle::Normal, bytes).is_ok() {
                log::debug!("Chart font: {}", path.display());
                return true;
            }
        }

        log::warn!("No TrueType font found; loss charts are drawn without labels");
        false
    })
}
