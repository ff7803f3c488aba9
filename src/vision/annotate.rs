// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Annotated image rendering
//!
//! Draws the final detections onto a copy of the source image: a green box
//! per detection, its label on a black plate, and a `Final Count: N` overlay
//! in the top-left corner. Output is written next to the other artifacts as
//! `processed_<source name>` in the source's own image format.

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::detection::Detection;
use super::image_utils::{load_image, ImageError};

/// Prefix added to the source file name for the annotated artifact
pub const OUTPUT_PREFIX: &str = "processed_";

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const PLATE_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 2;

/// Gap between a box edge and its label baseline
const LABEL_MARGIN: i32 = 10;
const LABEL_SCALE: f32 = 20.0;
const COUNT_SCALE: f32 = 30.0;
const COUNT_ORIGIN: (i32, i32) = (10, 30);
const COUNT_OUTLINE: i32 = 1;

const SYSTEM_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("Failed to load font {path}: {message}")]
    Font { path: String, message: String },

    #[error("Failed to write annotated image {path}: {source}")]
    Save {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Path of the annotated artifact for `source` inside `output_dir`
pub fn annotated_output_path(source: &Path, output_dir: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    output_dir.join(format!("{}{}", OUTPUT_PREFIX, name))
}

/// Baseline y for a label attached to a box whose top edge is `box_top`
///
/// The label sits above the box unless that would clip the image top, in
/// which case it moves inside the box.
pub fn label_baseline(box_top: i32, text_height: i32) -> i32 {
    let above = box_top.saturating_sub(LABEL_MARGIN);
    if above < text_height {
        box_top
            .saturating_add(text_height)
            .saturating_add(LABEL_MARGIN)
    } else {
        above
    }
}

/// Measured extent of a line of text
#[derive(Debug, Clone, Copy, PartialEq)]
struct TextMetrics {
    width: i32,
    /// Height above the baseline
    ascent: i32,
    /// Depth below the baseline
    descent: i32,
}

pub struct AnnotationRenderer {
    font: Option<FontVec>,
}

impl AnnotationRenderer {
    /// Renderer using `font` for labels; `None` draws boxes only
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    pub fn with_font_path(path: &Path) -> Result<Self, RenderError> {
        let data = std::fs::read(path).map_err(|e| RenderError::Font {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let font = FontVec::try_from_vec(data).map_err(|e| RenderError::Font {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        info!("Loaded annotation font: {}", path.display());
        Ok(Self::new(Some(font)))
    }

    /// Renderer using the first system font found
    pub fn with_system_font() -> Self {
        for path in SYSTEM_FONT_PATHS {
            if let Ok(data) = std::fs::read(path) {
                if let Ok(font) = FontVec::try_from_vec(data) {
                    info!("Loaded system font: {}", path);
                    return Self::new(Some(font));
                }
            }
        }
        warn!("⚠️ No system font found, annotation labels will not be drawn");
        Self::new(None)
    }

    /// Renderer for the configured font, falling back to system fonts
    pub fn from_font_path(font_path: Option<&Path>) -> Self {
        match font_path {
            Some(path) => match Self::with_font_path(path) {
                Ok(renderer) => renderer,
                Err(e) => {
                    warn!("⚠️ {}, falling back to system fonts", e);
                    Self::with_system_font()
                }
            },
            None => Self::with_system_font(),
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw `source` with `detections` and write it to `output`
    pub fn render(
        &self,
        source: &Path,
        detections: &[Detection],
        output: &Path,
    ) -> Result<PathBuf, RenderError> {
        let (image, info) = load_image(source)?;
        let mut canvas = image.to_rgb8();

        debug!(
            "Drawing {} annotations on {}",
            detections.len(),
            source.display()
        );
        self.draw(&mut canvas, detections);

        canvas
            .save_with_format(output, info.format)
            .map_err(|source| RenderError::Save {
                path: output.display().to_string(),
                source,
            })?;

        Ok(output.to_path_buf())
    }

    /// Draw boxes, labels and the count overlay onto `canvas`
    pub fn draw(&self, canvas: &mut RgbImage, detections: &[Detection]) {
        for detection in detections.iter().map(Detection::normalized) {
            draw_box(canvas, &detection);
            if let Some(font) = &self.font {
                draw_label(canvas, font, &detection);
            }
        }

        if let Some(font) = &self.font {
            draw_count(canvas, font, detections.len());
        }
    }
}

fn draw_box(canvas: &mut RgbImage, detection: &Detection) {
    for inset in 0..BOX_THICKNESS {
        let width = (detection.width() - 2 * inset).max(0) as u32 + 1;
        let height = (detection.height() - 2 * inset).max(0) as u32 + 1;
        let rect = Rect::at(detection.x1 + inset, detection.y1 + inset).of_size(width, height);
        draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
    }
}

fn measure(font: &FontVec, scale: PxScale, text: &str) -> TextMetrics {
    let scaled = font.as_scaled(scale);
    let width: f32 = text
        .chars()
        .map(|ch| scaled.h_advance(scaled.glyph_id(ch)))
        .sum();
    TextMetrics {
        width: width.ceil() as i32,
        ascent: scaled.ascent().ceil() as i32,
        descent: (-scaled.descent()).ceil() as i32,
    }
}

/// Draw `text` with its baseline at `baseline_y`
fn draw_text_at_baseline(
    canvas: &mut RgbImage,
    font: &FontVec,
    scale: PxScale,
    color: Rgb<u8>,
    x: i32,
    baseline_y: i32,
    text: &str,
) {
    let ascent = font.as_scaled(scale).ascent().ceil() as i32;
    draw_text_mut(canvas, color, x, baseline_y - ascent, scale, font, text);
}

fn draw_label(canvas: &mut RgbImage, font: &FontVec, detection: &Detection) {
    if detection.label.is_empty() {
        return;
    }

    let scale = PxScale::from(LABEL_SCALE);
    let metrics = measure(font, scale, &detection.label);
    let baseline = label_baseline(detection.y1, metrics.ascent);

    let plate_top = baseline - metrics.ascent - metrics.descent;
    let plate_height = (metrics.ascent + 2 * metrics.descent).max(1) as u32;
    let plate_width = metrics.width.max(1) as u32;
    draw_filled_rect_mut(
        canvas,
        Rect::at(detection.x1, plate_top).of_size(plate_width, plate_height),
        PLATE_COLOR,
    );

    draw_text_at_baseline(
        canvas,
        font,
        scale,
        TEXT_COLOR,
        detection.x1,
        baseline,
        &detection.label,
    );
}

fn draw_count(canvas: &mut RgbImage, font: &FontVec, count: usize) {
    let scale = PxScale::from(COUNT_SCALE);
    let text = format!("Final Count: {}", count);
    let (x, y) = COUNT_ORIGIN;

    for dx in -COUNT_OUTLINE..=COUNT_OUTLINE {
        for dy in -COUNT_OUTLINE..=COUNT_OUTLINE {
            if dx != 0 || dy != 0 {
                draw_text_at_baseline(canvas, font, scale, PLATE_COLOR, x + dx, y + dy, &text);
            }
        }
    }
    draw_text_at_baseline(canvas, font, scale, TEXT_COLOR, x, y, &text);
}
