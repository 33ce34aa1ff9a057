//! Vision specialist: local image properties, colors and quality checks

use anyhow::Context;
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, GrayImage};
use prism_core::{
    ArtifactRequirement, ArtifactStore, CapabilityDescriptor, FailureMode, Modality, Specialist,
    SpecialistFault, SpecialistOutput, SpecialistRequest,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

/// Registry id
pub const VISION_ID: &str = "vision";

const TOP_COLORS: usize = 5;
/// Channel values per bucket (256 / 32 levels)
const BUCKET_WIDTH: u8 = 8;
const MONOCHROME_PCT: f64 = 90.0;
const MIN_MEGAPIXELS: f64 = 1.0;
const MIN_CONTRAST: f64 = 30.0;
const MIN_BRIGHTNESS: f64 = 50.0;
const MAX_BRIGHTNESS: f64 = 200.0;
const MIN_SHARPNESS: f64 = 100.0;

/// Basic image properties
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageProperties {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Container format, if recognized
    pub format: Option<String>,
    /// Pixel layout
    pub color_type: String,
    /// Width × height in millions
    pub megapixels: f64,
    /// Width / height
    pub aspect_ratio: f64,
}

/// One dominant color bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DominantColor {
    /// Coarse color name
    pub name: &'static str,
    /// Mean color of the bucket as `#rrggbb`
    pub hex: String,
    /// Share of pixels in the bucket
    pub percentage: f64,
}

/// Detected quality problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    /// Below one megapixel
    LowResolution,
    /// Flat gray histogram
    LowContrast,
    /// Too dark
    Underexposed,
    /// Too bright
    Overexposed,
    /// Little edge energy
    Blurry,
}

impl QualityIssue {
    /// Issue code
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowResolution => "low_resolution",
            Self::LowContrast => "low_contrast",
            Self::Underexposed => "underexposed",
            Self::Overexposed => "overexposed",
            Self::Blurry => "blurry",
        }
    }

    /// What to do about it
    #[must_use]
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::LowResolution => "Use a higher resolution camera (at least 1 MP)",
            Self::LowContrast => "Improve lighting conditions",
            Self::Underexposed => "Increase lighting or camera exposure",
            Self::Overexposed => "Reduce lighting or camera exposure",
            Self::Blurry => "Hold the camera steady and ensure proper focus",
        }
    }
}

/// Gray-level statistics behind the quality checks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    /// Detected issues, empty for a clean image
    pub issues: Vec<QualityIssue>,
    /// Mean gray level (0-255)
    pub brightness: f64,
    /// Gray standard deviation
    pub contrast: f64,
    /// Variance of the gray Laplacian
    pub sharpness: f64,
}

/// Full analysis of one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReport {
    /// Dimensions and format
    pub properties: ImageProperties,
    /// Most common color buckets, largest first
    pub colors: Vec<DominantColor>,
    /// Whether the top color covers more than 90% of pixels
    pub monochrome: bool,
    /// Quality checks
    pub quality: QualityReport,
}

/// Decode and analyze an encoded image
///
/// # Errors
///
/// Fails if the bytes are not a supported image format.
pub fn analyze(bytes: &[u8]) -> Result<ImageReport, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let format = image::guess_format(bytes)
        .ok()
        .map(|f| format!("{:?}", f).to_lowercase());

    let properties = properties_of(&img, format);
    let colors = dominant_colors(&img);
    let monochrome = colors.first().is_some_and(|c| c.percentage > MONOCHROME_PCT);
    let quality = quality_of(&img.to_luma8(), properties.megapixels);

    Ok(ImageReport {
        properties,
        colors,
        monochrome,
        quality,
    })
}

fn properties_of(img: &DynamicImage, format: Option<String>) -> ImageProperties {
    let (width, height) = img.dimensions();
    ImageProperties {
        width,
        height,
        format,
        color_type: format!("{:?}", img.color()),
        megapixels: f64::from(width) * f64::from(height) / 1_000_000.0,
        aspect_ratio: if height == 0 {
            0.0
        } else {
            f64::from(width) / f64::from(height)
        },
    }
}

fn dominant_colors(img: &DynamicImage) -> Vec<DominantColor> {
    let rgb = img.to_rgb8();
    let total = u64::from(rgb.width()) * u64::from(rgb.height());
    if total == 0 {
        return Vec::new();
    }

    // bucket -> (count, channel sums)
    let mut buckets: HashMap<[u8; 3], (u64, [u64; 3])> = HashMap::new();
    for pixel in rgb.pixels() {
        let [r, g, b] = pixel.0;
        let key = [r / BUCKET_WIDTH, g / BUCKET_WIDTH, b / BUCKET_WIDTH];
        let entry = buckets.entry(key).or_insert((0, [0; 3]));
        entry.0 += 1;
        entry.1[0] += u64::from(r);
        entry.1[1] += u64::from(g);
        entry.1[2] += u64::from(b);
    }

    let mut ranked: Vec<_> = buckets.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.0.cmp(&b.0)));

    ranked
        .into_iter()
        .take(TOP_COLORS)
        .map(|(_, (count, sums))| {
            let mean = sums.map(|s| (s / count) as u8);
            DominantColor {
                name: color_name(mean),
                hex: format!("#{:02x}{:02x}{:02x}", mean[0], mean[1], mean[2]),
                percentage: (count as f64 / total as f64 * 1000.0).round() / 10.0,
            }
        })
        .collect()
}

fn quality_of(gray: &GrayImage, megapixels: f64) -> QualityReport {
    let values: Vec<f64> = gray.pixels().map(|p| f64::from(p.0[0])).collect();
    let (brightness, contrast) = mean_and_std(&values);
    let sharpness = laplacian_variance(gray);

    let mut issues = Vec::new();
    if megapixels < MIN_MEGAPIXELS {
        issues.push(QualityIssue::LowResolution);
    }
    if contrast < MIN_CONTRAST {
        issues.push(QualityIssue::LowContrast);
    }
    if brightness < MIN_BRIGHTNESS {
        issues.push(QualityIssue::Underexposed);
    } else if brightness > MAX_BRIGHTNESS {
        issues.push(QualityIssue::Overexposed);
    }
    if sharpness < MIN_SHARPNESS {
        issues.push(QualityIssue::Blurry);
    }

    QualityReport {
        issues,
        brightness,
        contrast,
        sharpness,
    }
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// 4-neighbour Laplacian over interior pixels
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let at = |x: u32, y: u32| f64::from(gray.get_pixel(x, y).0[0]);
    let mut responses = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            responses.push(
                at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y),
            );
        }
    }
    let (_, std) = mean_and_std(&responses);
    std * std
}

fn color_name([r, g, b]: [u8; 3]) -> &'static str {
    match (r, g, b) {
        (r, g, b) if r < 50 && g < 50 && b < 50 => "black",
        (r, g, b) if r > 200 && g > 200 && b > 200 => "white",
        (r, g, b) if r > 150 && g < 100 && b < 100 => "red",
        (r, g, b) if r < 100 && g > 150 && b < 100 => "green",
        (r, g, b) if r < 100 && g < 100 && b > 150 => "blue",
        (r, g, b) if r > 150 && g > 150 && b < 100 => "yellow",
        (r, g, b) if r > 150 && g < 100 && b > 150 => "magenta",
        (r, g, b) if r < 100 && g > 150 && b > 150 => "cyan",
        (r, g, b) if r > 150 && g > 100 && b < 100 => "orange",
        (r, g, b) if r > 100 && g < 100 && b > 100 => "purple",
        (r, g, b) if r.abs_diff(g) < 20 && g.abs_diff(b) < 20 => "gray",
        _ => "mixed",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sections {
    properties: bool,
    colors: bool,
    quality: bool,
}

impl Sections {
    fn from_instruction(instruction: &str) -> Self {
        let lower = instruction.to_lowercase();
        let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));
        let selected = Self {
            properties: any(&["propert", "dimension", "resolution", "size", "format"]),
            colors: any(&["color", "colour"]),
            quality: any(&["quality", "blur", "sharp", "exposure", "contrast", "bright"]),
        };
        if selected.properties || selected.colors || selected.quality {
            selected
        } else {
            Self {
                properties: true,
                colors: true,
                quality: true,
            }
        }
    }
}

fn render(report: &ImageReport, sections: Sections) -> String {
    let mut out = String::new();
    if sections.properties {
        let p = &report.properties;
        let _ = writeln!(
            out,
            "Image: {}x{} {} ({}), {:.2} MP, aspect ratio {:.2}",
            p.width,
            p.height,
            p.format.as_deref().unwrap_or("unknown format"),
            p.color_type,
            p.megapixels,
            p.aspect_ratio
        );
    }
    if sections.colors {
        let _ = writeln!(out, "Dominant colors:");
        for color in &report.colors {
            let _ = writeln!(out, "- {} {} {:.1}%", color.name, color.hex, color.percentage);
        }
        if report.monochrome {
            let _ = writeln!(out, "The image is essentially monochrome.");
        }
    }
    if sections.quality {
        let q = &report.quality;
        if q.issues.is_empty() {
            let _ = writeln!(out, "No quality issues detected.");
        } else {
            let _ = writeln!(out, "Quality issues:");
            for issue in &q.issues {
                let _ = writeln!(out, "- {}: {}", issue.as_str(), issue.recommendation());
            }
        }
        let _ = writeln!(
            out,
            "brightness {:.1}, contrast {:.1}, sharpness {:.1}",
            q.brightness, q.contrast, q.sharpness
        );
    }
    out.trim_end().to_string()
}

/// Analyzes still images locally
pub struct VisionSpecialist {
    descriptor: CapabilityDescriptor,
    store: Arc<dyn ArtifactStore>,
}

impl VisionSpecialist {
    /// Create a vision specialist reading artifacts from `store`
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            descriptor: Self::default_descriptor(),
            store,
        }
    }

    /// Default capability descriptor
    #[must_use]
    pub fn default_descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(VISION_ID, "Describe image properties, colors and quality")
            .with_modalities([Modality::Image])
            .with_artifact(ArtifactRequirement::Required)
            .with_failure_modes([FailureMode::Timeout, FailureMode::UnsupportedInput])
            .with_keywords([
                "image",
                "photo",
                "picture",
                "color",
                "colour",
                "quality",
                "blur",
                "resolution",
                "dimensions",
            ])
    }

    /// Override the descriptor timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.descriptor = self.descriptor.with_timeout(timeout);
        self
    }
}

#[async_trait]
impl Specialist for VisionSpecialist {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, request: SpecialistRequest) -> Result<SpecialistOutput, SpecialistFault> {
        let reference = request
            .artifact
            .as_ref()
            .ok_or_else(|| SpecialistFault::UnsupportedInput("an image is required".to_string()))?;
        let artifact = self.store.fetch(reference).await.context("fetching image")?;

        let bytes = artifact.bytes;
        let report = tokio::task::spawn_blocking(move || analyze(&bytes))
            .await
            .context("image analysis task failed")?
            .map_err(|e| SpecialistFault::UnsupportedInput(format!("cannot decode image: {}", e)))?;

        info!(
            handle = %reference.handle,
            width = report.properties.width,
            height = report.properties.height,
            issues = report.quality.issues.len(),
            "Image analyzed"
        );

        let (instruction, _) = request.split_context();
        let text = render(&report, Sections::from_instruction(instruction));
        let metadata = serde_json::to_value(&report).context("serializing image report")?;
        Ok(SpecialistOutput::text(text).with_metadata(metadata))
    }
}
