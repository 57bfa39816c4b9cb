//! Turns an unordered bag of glyph detections into plate text.
//!
//! Glyphs are grouped into visual rows by a single greedy top-to-bottom pass,
//! each row is read left to right, and the rows are joined according to the
//! layout rules of the vehicle type. The joined text is only accepted when it
//! passes the plate grammar for that vehicle type.

use std::cmp::Ordering;

use tracing::debug;

use super::validator::{self, plate_len};
use super::{CharacterDetection, PlateResult, UnreadableReason, VehicleType};

pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.5;
pub const DEFAULT_LINE_HEIGHT_RATIO: f32 = 0.7;

/// Glyphs sharing one visual row, ordered left to right.
pub type PlateLine = Vec<CharacterDetection>;

/// Strategy grouping glyphs into rows.
pub trait LineClustering {
    fn cluster(&self, characters: Vec<CharacterDetection>) -> Vec<PlateLine>;
}

/// Streams glyphs in (y, x) order; a glyph joins the current row when its
/// vertical offset from the row's last glyph is below `height_ratio` times
/// the row's mean glyph height. No backtracking.
#[derive(Debug, Clone, Copy)]
pub struct GreedyLineClustering {
    pub height_ratio: f32,
}

impl Default for GreedyLineClustering {
    fn default() -> Self {
        Self {
            height_ratio: DEFAULT_LINE_HEIGHT_RATIO,
        }
    }
}

// Total order over glyphs so that results never depend on input order.
fn reading_order(a: &CharacterDetection, b: &CharacterDetection) -> Ordering {
    a.center_y
        .total_cmp(&b.center_y)
        .then_with(|| a.center_x.total_cmp(&b.center_x))
        .then_with(|| a.label.cmp(&b.label))
        .then_with(|| a.confidence.total_cmp(&b.confidence))
}

fn left_to_right(a: &CharacterDetection, b: &CharacterDetection) -> Ordering {
    a.center_x
        .total_cmp(&b.center_x)
        .then_with(|| reading_order(a, b))
}

impl LineClustering for GreedyLineClustering {
    fn cluster(&self, mut characters: Vec<CharacterDetection>) -> Vec<PlateLine> {
        characters.sort_by(reading_order);

        let mut lines: Vec<PlateLine> = Vec::new();
        let mut current: PlateLine = Vec::new();
        let mut height_sum = 0.0f32;

        for ch in characters {
            let joins = match current.last() {
                Some(last) => {
                    let avg_height = height_sum / current.len() as f32;
                    (ch.center_y - last.center_y).abs() < avg_height * self.height_ratio
                }
                None => true,
            };

            if !joins {
                lines.push(std::mem::take(&mut current));
                height_sum = 0.0;
            }
            height_sum += ch.glyph_height;
            current.push(ch);
        }
        if !current.is_empty() {
            lines.push(current);
        }

        for line in lines.iter_mut() {
            line.sort_by(left_to_right);
        }
        lines
    }
}

fn line_text(line: &PlateLine) -> String {
    line.iter().map(|c| c.label).collect()
}

/// Joins rows into raw plate text following the layout of the vehicle type.
///
/// Four-wheelers with two rows are hyphenated; any other row count keeps only
/// the first row. Motorcycles with two rows are hyphenated when the combined
/// length is within [6, 10] and concatenated otherwise. Everything else is a
/// plain concatenation in reading order.
pub fn format_lines(lines: &[PlateLine], vehicle_type: VehicleType) -> String {
    let all = || lines.iter().map(line_text).collect::<String>();

    if vehicle_type.is_four_wheeler() {
        return match lines {
            [first, second] => format!("{}-{}", line_text(first), line_text(second)),
            [first, ..] => line_text(first),
            [] => String::new(),
        };
    }

    if vehicle_type == VehicleType::Motorcycle {
        if let [first, second] = lines {
            let (top, bottom) = (line_text(first), line_text(second));
            let combined = top.chars().count() + bottom.chars().count();
            if (6..=10).contains(&combined) {
                return format!("{}-{}", top, bottom);
            }
            return top + &bottom;
        }
    }

    all()
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

pub struct CharacterAssembler<C: LineClustering = GreedyLineClustering> {
    clustering: C,
    confidence_floor: f32,
}

impl Default for CharacterAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_FLOOR, DEFAULT_LINE_HEIGHT_RATIO)
    }
}

impl CharacterAssembler {
    pub fn new(confidence_floor: f32, line_height_ratio: f32) -> Self {
        Self::with_clustering(
            GreedyLineClustering {
                height_ratio: line_height_ratio,
            },
            confidence_floor,
        )
    }
}

impl<C: LineClustering> CharacterAssembler<C> {
    pub fn with_clustering(clustering: C, confidence_floor: f32) -> Self {
        Self {
            clustering,
            confidence_floor,
        }
    }

    pub fn assemble(&self, characters: &[CharacterDetection], vehicle_type: VehicleType) -> PlateResult {
        let kept: Vec<CharacterDetection> = characters
            .iter()
            .copied()
            .filter(|c| c.confidence >= self.confidence_floor)
            .collect();

        if kept.is_empty() {
            return PlateResult::Unrecognized(UnreadableReason::NoCharacters);
        }

        let count = kept.len();
        let lines = self.clustering.cluster(kept);
        // Summed in clustered order so the mean is bit-identical for any input order.
        let confidence = lines.iter().flatten().map(|c| c.confidence).sum::<f32>() / count as f32;
        let text = normalize(&format_lines(&lines, vehicle_type));

        let accepted = !text.is_empty()
            && validator::validate(&text, vehicle_type)
            && (7..=10).contains(&plate_len(&text));

        if !accepted {
            debug!(
                "Rejected assembled text {:?} for {} ({} lines)",
                text,
                vehicle_type,
                lines.len()
            );
            return PlateResult::Unrecognized(UnreadableReason::AssemblyRejected);
        }

        PlateResult::Recognized { text, confidence }
    }
}
