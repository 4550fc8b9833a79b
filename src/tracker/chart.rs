//! Monthly category pie chart.

use std::f64::consts::PI;
use std::fmt;
use std::io::Cursor;

use ab_glyph::{Font, FontRef, PxScale, ScaleFont, point};
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb, RgbImage};

use crate::tracker::expense::{Category, MonthlyAggregate};

/// 10x8 inches at 150 dpi.
pub const WIDTH: u32 = 1500;
pub const HEIGHT: u32 = 1200;

/// Wedges start at 12 o'clock.
const START_ANGLE_DEG: f64 = 90.0;

const CENTER_X: f64 = WIDTH as f64 / 2.0;
// Shifted down to leave room for the title.
const CENTER_Y: f64 = HEIGHT as f64 / 2.0 + 40.0;
const RADIUS: f64 = 440.0;

/// Label and percentage positions, as a fraction of the radius.
const LABEL_DISTANCE: f64 = 1.1;
const PERCENT_DISTANCE: f64 = 0.6;

const TITLE_Y: f32 = 50.0;
const TITLE_SIZE: f32 = 44.0;
const LABEL_SIZE: f32 = 30.0;
const PERCENT_SIZE: f32 = 28.0;
const LINE_SPACING: f32 = 1.2;

const PALETTE: [[u8; 3]; 7] = [
    [0xFF, 0x6B, 0x6B],
    [0x4E, 0xCD, 0xC4],
    [0x45, 0xB7, 0xD1],
    [0x96, 0xCE, 0xB4],
    [0xFF, 0xEA, 0xA7],
    [0xDD, 0xA0, 0xDD],
    [0x98, 0xD8, 0xC8],
];

const BACKGROUND: Rgb<u8> = Rgb([0xFF, 0xFF, 0xFF]);
const EDGE: Rgb<u8> = Rgb([0xFF, 0xFF, 0xFF]);
const INK: [u8; 3] = [0x00, 0x00, 0x00];

static FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

#[derive(Debug)]
pub enum ChartError {
    Font(ab_glyph::InvalidFont),
    Encode(image::ImageError),
}

impl fmt::Display for ChartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Font(e) => write!(f, "failed to load chart font: {e}"),
            Self::Encode(e) => write!(f, "failed to encode chart: {e}"),
        }
    }
}

impl std::error::Error for ChartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Font(e) => Some(e),
            Self::Encode(e) => Some(e),
        }
    }
}

/// One slice of the pie.
#[derive(Debug, Clone, PartialEq)]
pub struct Wedge {
    pub category: Category,
    pub amount: f64,
    /// Share of the pie in percent.
    pub percent: f64,
    /// Degrees, counter-clockwise from 3 o'clock.
    pub start_deg: f64,
    pub sweep_deg: f64,
    pub color: [u8; 3],
}

impl Wedge {
    /// "Food\n$15.00"
    pub fn label(&self) -> String {
        format!("{}\n${:.2}", self.category.title(), self.amount)
    }

    /// "15.0%"
    pub fn percent_label(&self) -> String {
        format!("{:.1}%", self.percent)
    }

    fn mid_angle(&self) -> f64 {
        (self.start_deg + self.sweep_deg / 2.0).to_radians()
    }
}

/// Wedge layout for a month, empty when there is nothing to draw.
pub fn layout(summary: &MonthlyAggregate) -> Vec<Wedge> {
    if summary.total == 0.0 {
        return Vec::new();
    }

    let positive: Vec<(Category, f64)> = summary
        .categories()
        .filter(|(_, amount)| *amount > 0.0)
        .collect();
    let magnitude: f64 = positive.iter().map(|(_, a)| a).sum();
    if magnitude <= 0.0 {
        return Vec::new();
    }

    let mut start = START_ANGLE_DEG;
    positive
        .into_iter()
        .zip(PALETTE)
        .map(|((category, amount), color)| {
            let fraction = amount / magnitude;
            let wedge = Wedge {
                category,
                amount,
                percent: fraction * 100.0,
                start_deg: start,
                sweep_deg: fraction * 360.0,
                color,
            };
            start += wedge.sweep_deg;
            wedge
        })
        .collect()
}

/// Render the month as a PNG pie chart. `Ok(None)` when there is no data.
pub fn render(summary: &MonthlyAggregate) -> Result<Option<Vec<u8>>, ChartError> {
    let wedges = layout(summary);
    if wedges.is_empty() {
        return Ok(None);
    }

    let font = FontRef::try_from_slice(FONT).map_err(ChartError::Font)?;
    let mut img = rasterize(&wedges);
    annotate(&mut img, &font, &summary.month, &wedges);

    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
        .map_err(ChartError::Encode)?;
    Ok(Some(out))
}

fn rasterize(wedges: &[Wedge]) -> RgbImage {
    let edge_width = 2.0;

    ImageBuffer::from_fn(WIDTH, HEIGHT, |x, y| {
        let dx = x as f64 + 0.5 - CENTER_X;
        // Image rows grow downwards.
        let dy = CENTER_Y - (y as f64 + 0.5);
        let dist = (dx * dx + dy * dy).sqrt();
        if dist > RADIUS {
            return BACKGROUND;
        }

        let angle = dy.atan2(dx).to_degrees();
        for wedge in wedges {
            let offset = (angle - wedge.start_deg).rem_euclid(360.0);
            if offset < wedge.sweep_deg || wedge.sweep_deg >= 360.0 {
                if wedges.len() > 1 && on_boundary(offset, wedge.sweep_deg, dist, edge_width) {
                    return EDGE;
                }
                return Rgb(wedge.color);
            }
        }
        // Float rounding can leave a sliver just before the start angle.
        wedges.last().map(|w| Rgb(w.color)).unwrap_or(BACKGROUND)
    })
}

/// True within `width` pixels of either straight edge of a wedge.
fn on_boundary(offset_deg: f64, sweep_deg: f64, dist: f64, width: f64) -> bool {
    let arc = |deg: f64| deg * PI / 180.0 * dist;
    arc(offset_deg) < width || arc(sweep_deg - offset_deg) < width
}

/// Title, a name-and-amount label outside each wedge, and its percentage
/// inside.
fn annotate(img: &mut RgbImage, font: &FontRef<'_>, month: &str, wedges: &[Wedge]) {
    let title = format!("Expenses Breakdown - {month}");
    draw_text(img, font, TITLE_SIZE, &title, (CENTER_X as f32, TITLE_Y), Align::Center);

    for wedge in wedges {
        let (sin, cos) = wedge.mid_angle().sin_cos();
        let at = |distance: f64| {
            (
                (CENTER_X + RADIUS * distance * cos) as f32,
                (CENTER_Y - RADIUS * distance * sin) as f32,
            )
        };
        // Labels grow away from the pie.
        let align = if cos >= 0.0 { Align::Left } else { Align::Right };
        draw_text(img, font, LABEL_SIZE, &wedge.label(), at(LABEL_DISTANCE), align);
        draw_text(
            img,
            font,
            PERCENT_SIZE,
            &wedge.percent_label(),
            at(PERCENT_DISTANCE),
            Align::Center,
        );
    }
}

#[derive(Debug, Clone, Copy)]
enum Align {
    Left,
    Center,
    Right,
}

/// Draw possibly multi-line `text` vertically centred on `anchor.1`.
/// `align` says where `anchor.0` sits on each line.
fn draw_text(img: &mut RgbImage, font: &FontRef<'_>, size: f32, text: &str, anchor: (f32, f32), align: Align) {
    let scale = PxScale::from(size);
    let scaled = font.as_scaled(scale);
    let line_height = scaled.height() * LINE_SPACING;
    let lines: Vec<&str> = text.lines().collect();
    let top = anchor.1 - line_height * lines.len() as f32 / 2.0;

    for (i, line) in lines.iter().enumerate() {
        let width: f32 = line.chars().map(|c| scaled.h_advance(scaled.glyph_id(c))).sum();
        let x = match align {
            Align::Left => anchor.0,
            Align::Center => anchor.0 - width / 2.0,
            Align::Right => anchor.0 - width,
        };
        let mut caret = point(x, top + line_height * i as f32 + scaled.ascent());

        for c in line.chars() {
            let id = scaled.glyph_id(c);
            let glyph = id.with_scale_and_position(scale, caret);
            caret.x += scaled.h_advance(id);
            let Some(outline) = font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outline.px_bounds();
            outline.draw(|gx, gy, coverage| {
                let px = bounds.min.x as i32 + gx as i32;
                let py = bounds.min.y as i32 + gy as i32;
                if px < 0 || py < 0 || px >= WIDTH as i32 || py >= HEIGHT as i32 {
                    return;
                }
                blend(img.get_pixel_mut(px as u32, py as u32), coverage);
            });
        }
    }
}

fn blend(pixel: &mut Rgb<u8>, coverage: f32) {
    let alpha = coverage.clamp(0.0, 1.0);
    for (channel, ink) in pixel.0.iter_mut().zip(INK) {
        *channel = (*channel as f32 * (1.0 - alpha) + ink as f32 * alpha).round() as u8;
    }
}
