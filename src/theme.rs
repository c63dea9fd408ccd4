//! Two-colour themes derived from album artwork.


use std::fmt;

use anyhow::{ensure, Context as _, Result};
use futures::{future::LocalBoxFuture, FutureExt as _};
use image::{DynamicImage, GenericImageView as _};
use reqwest::Client;
use serde::{Serialize, Serializer};

use crate::sync_engine::ThemeSource;

/// Artwork larger than this is scaled down before sampling
const SAMPLE_SIZE: u32 = 64;
/// Pixels more transparent than this are ignored
const MIN_ALPHA: u8 = 16;
/// Bits kept per channel when bucketing colours
const BUCKET_BITS: u32 = 4;
/// Larger artwork downloads are abandoned
const MAX_ARTWORK_BYTES: usize = 8 * 1024 * 1024;
/// Below this saturation a colour can't serve as an accent
const MIN_ACCENT_SATURATION: f32 = 0.15;

/// An opaque RGB colour, displayed as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Hue in degrees, saturation and lightness in `0.0..=1.0`
    fn to_hsl(self) -> (f32, f32, f32) {
        let r = f32::from(self.r) / 255.0;
        let g = f32::from(self.g) / 255.0;
        let b = f32::from(self.b) / 255.0;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = (max + min) / 2.0;
        let delta = max - min;
        if delta == 0.0 {
            return (0.0, 0.0, l);
        }
        let s = delta / (1.0 - (2.0f32.mul_add(l, -1.0)).abs());
        let h = if max == r {
            60.0 * ((g - b) / delta).rem_euclid(6.0)
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        (h, s.min(1.0), l)
    }

    fn from_hsl(h: f32, s: f32, l: f32) -> Self {
        let c = (1.0 - (2.0f32.mul_add(l, -1.0)).abs()) * s;
        let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
        let m = l - c / 2.0;
        let (r, g, b) = match h {
            h if h < 60.0 => (c, x, 0.0),
            h if h < 120.0 => (x, c, 0.0),
            h if h < 180.0 => (0.0, c, x),
            h if h < 240.0 => (0.0, x, c),
            h if h < 300.0 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let channel = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Self::rgb(channel(r), channel(g), channel(b))
    }

    fn saturation(self) -> f32 {
        self.to_hsl().1
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A background colour and an accent colour for one piece of artwork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColorTheme {
    pub dominant: Color,
    pub accent: Color,
}

impl ColorTheme {
    /// Neutral palette used before any artwork is known, or when it's unusable
    pub const NEUTRAL: Self = Self {
        dominant: Color::rgb(0x1a, 0x1a, 0x1a),
        accent: Color::rgb(0x22, 0xc5, 0x5e),
    };
}

impl Default for ColorTheme {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// A theme tagged with the generation it was requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeResult {
    pub generation: u64,
    pub theme: ColorTheme,
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    count: u64,
    sum: [u64; 3],
}

impl Bucket {
    fn mean(&self) -> Color {
        let channel = |sum: u64| (sum / self.count.max(1)) as u8;
        Color::rgb(channel(self.sum[0]), channel(self.sum[1]), channel(self.sum[2]))
    }
}

/// Derive a theme from an image.
///
/// Opaque pixels are grouped into a coarse colour histogram. The mean of the
/// most populous bucket becomes the dominant colour. The accent is the bucket
/// with the best balance of saturation and population, pushed to a vivid
/// saturation and mid lightness. Ties go to the lower bucket index, so the
/// result only depends on the pixels.
///
/// Returns `None` if the image has no opaque pixels.
#[must_use]
pub fn palette_from_image(image: &DynamicImage) -> Option<ColorTheme> {
    let (width, height) = image.dimensions();
    let image = if width > SAMPLE_SIZE || height > SAMPLE_SIZE {
        image.thumbnail(SAMPLE_SIZE, SAMPLE_SIZE)
    } else {
        image.clone()
    };

    let levels = 1usize << BUCKET_BITS;
    let shift = 8 - BUCKET_BITS;
    let mut buckets = vec![Bucket::default(); levels * levels * levels];
    for pixel in image.to_rgba8().pixels() {
        let [r, g, b, a] = pixel.0;
        if a < MIN_ALPHA {
            continue;
        }
        let index = (usize::from(r >> shift) * levels + usize::from(g >> shift)) * levels
            + usize::from(b >> shift);
        let bucket = &mut buckets[index];
        bucket.count += 1;
        bucket.sum[0] += u64::from(r);
        bucket.sum[1] += u64::from(g);
        bucket.sum[2] += u64::from(b);
    }

    let mut dominant: Option<&Bucket> = None;
    for bucket in buckets.iter().filter(|b| b.count > 0) {
        if dominant.map_or(true, |d| bucket.count > d.count) {
            dominant = Some(bucket);
        }
    }
    let dominant = dominant?.mean();

    let mut accent: Option<(f32, Color)> = None;
    for bucket in buckets.iter().filter(|b| b.count > 0) {
        let color = bucket.mean();
        let saturation = color.saturation();
        if saturation < MIN_ACCENT_SATURATION {
            continue;
        }
        let score = saturation * (bucket.count as f32).sqrt();
        if accent.map_or(true, |(best, _)| score > best) {
            accent = Some((score, color));
        }
    }
    let accent = accent.map_or(ColorTheme::NEUTRAL.accent, |(_, color)| vivid(color));

    Some(ColorTheme { dominant, accent })
}

/// Push a colour towards something readable on a dark background
fn vivid(color: Color) -> Color {
    let (h, s, l) = color.to_hsl();
    Color::from_hsl(h, s.max(0.6), l.clamp(0.45, 0.65))
}

/// Decode an encoded image and derive its theme.
///
/// # Errors
///
/// Returns an error if the bytes can't be decoded or contain no opaque pixels.
pub fn theme_from_image_bytes(bytes: &[u8]) -> Result<ColorTheme> {
    let image = image::load_from_memory(bytes).context("Failed to decode artwork")?;
    palette_from_image(&image).context("Artwork has no opaque pixels")
}

/// Downloads artwork and derives its theme.
#[derive(Debug, Clone)]
pub struct ColorExtractor {
    client: Client,
}

impl ColorExtractor {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Never fails: unusable artwork resolves to [`ColorTheme::NEUTRAL`].
    pub async fn extract(&self, image_url: &str, generation: u64) -> ThemeResult {
        let theme = match self.fetch_theme(image_url).await {
            Ok(theme) => {
                tracing::debug!(%image_url, generation, %theme.dominant, %theme.accent, "Derived theme from artwork");
                theme
            }
            Err(e) => {
                tracing::warn!(?e, %image_url, generation, "Falling back to neutral theme");
                ColorTheme::NEUTRAL
            }
        };
        ThemeResult { generation, theme }
    }

    async fn fetch_theme(&self, image_url: &str) -> Result<ColorTheme> {
        let mut response = self
            .client
            .get(image_url)
            .send()
            .await
            .context("Failed to request artwork")?
            .error_for_status()
            .context("Artwork request failed")?;
        if let Some(len) = response.content_length() {
            ensure!(
                len <= MAX_ARTWORK_BYTES as u64,
                "Artwork of {len} bytes exceeds {MAX_ARTWORK_BYTES} bytes"
            );
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.context("Failed to download artwork")? {
            ensure!(
                bytes.len() + chunk.len() <= MAX_ARTWORK_BYTES,
                "Artwork exceeds {MAX_ARTWORK_BYTES} bytes"
            );
            bytes.extend_from_slice(&chunk);
        }
        // Decoding is CPU bound and must not stall the engine loop
        tokio::task::spawn_blocking(move || theme_from_image_bytes(&bytes))
            .await
            .context("Artwork decoding task panicked")?
    }
}

impl ThemeSource for ColorExtractor {
    fn extract_theme(
        &self,
        image_url: String,
        generation: u64,
    ) -> LocalBoxFuture<'static, ThemeResult> {
        let extractor = self.clone();
        async move { extractor.extract(&image_url, generation).await }.boxed_local()
    }
}
