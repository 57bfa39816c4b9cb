pub mod alignment;
pub mod assembler;
pub mod imaging;
pub mod localizer;
pub mod validator;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Text stored and rendered when no plate could be read.
pub const UNRECOGNIZED: &str = "unrecognized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Car,
    Motorcycle,
    Truck,
    Bus,
    Person,
    Unknown,
}

impl VehicleType {
    /// Maps a detector class name onto a vehicle type. Anything outside the
    /// known set becomes `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "car" => VehicleType::Car,
            "motorcycle" | "motorbike" => VehicleType::Motorcycle,
            "truck" => VehicleType::Truck,
            "bus" => VehicleType::Bus,
            "person" => VehicleType::Person,
            _ => VehicleType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Car => "car",
            VehicleType::Motorcycle => "motorcycle",
            VehicleType::Truck => "truck",
            VehicleType::Bus => "bus",
            VehicleType::Person => "person",
            VehicleType::Unknown => "unknown",
        }
    }

    /// Car, bus and truck share plate layout rules.
    pub fn is_four_wheeler(&self) -> bool {
        matches!(self, VehicleType::Car | VehicleType::Bus | VehicleType::Truck)
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent identifier handed out by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u32);

impl TrackId {
    /// Trackers report `-1` (or any negative id) for boxes they have not
    /// assigned yet.
    pub fn from_raw(raw: i64) -> Option<TrackId> {
        u32::try_from(raw).ok().map(TrackId)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis aligned box in left-top-right-bottom pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[inline]
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    #[inline]
    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection(&self, other: &BBox) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        w * h
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// Grows the box by a fraction of its own width and height on every side.
    pub fn padded(&self, pad_w: f32, pad_h: f32) -> BBox {
        let dw = (self.width() * pad_w).trunc();
        let dh = (self.height() * pad_h).trunc();
        BBox::new(self.x1 - dw, self.y1 - dh, self.x2 + dw, self.y2 + dh)
    }

    /// Integer pixel rectangle `(x, y, w, h)` clamped to an image of the given
    /// size. `None` when nothing of the box is left inside the image.
    pub fn pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = (self.x1.floor().max(0.0) as u32).min(width);
        let y1 = (self.y1.floor().max(0.0) as u32).min(height);
        let x2 = (self.x2.floor().max(0.0) as u32).min(width);
        let y2 = (self.y2.floor().max(0.0) as u32).min(height);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// One box reported by the detector/tracker for the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedDetection {
    pub track_id: Option<TrackId>,
    pub vehicle_type: VehicleType,
    pub bbox: BBox,
    pub confidence: f32,
}

impl TrackedDetection {
    pub fn new(
        track_id: Option<TrackId>,
        vehicle_type: VehicleType,
        bbox: BBox,
        confidence: f32,
    ) -> Self {
        Self {
            track_id,
            vehicle_type,
            bbox,
            confidence,
        }
    }
}

/// A single glyph reported by the character model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CharacterDetection {
    pub center_x: f32,
    pub center_y: f32,
    pub glyph_height: f32,
    pub label: char,
    pub confidence: f32,
}

impl CharacterDetection {
    pub fn new(center_x: f32, center_y: f32, glyph_height: f32, label: char, confidence: f32) -> Self {
        Self {
            center_x,
            center_y,
            glyph_height,
            label,
            confidence,
        }
    }
}

/// Why a plate read produced no usable text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadableReason {
    /// The plate-region model found nothing on the vehicle.
    DetectionEmpty,
    /// A plate was located but no glyph cleared the confidence floor.
    NoCharacters,
    /// Glyphs were assembled but the text failed validation.
    AssemblyRejected,
}

impl fmt::Display for UnreadableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnreadableReason::DetectionEmpty => f.write_str("no plate region located"),
            UnreadableReason::NoCharacters => f.write_str("plate located but no characters"),
            UnreadableReason::AssemblyRejected => f.write_str("plate located but unreadable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlateResult {
    Recognized { text: String, confidence: f32 },
    Unrecognized(UnreadableReason),
}

impl PlateResult {
    pub fn text(&self) -> Option<&str> {
        match self {
            PlateResult::Recognized { text, .. } => Some(text),
            PlateResult::Unrecognized(_) => None,
        }
    }

    /// Mean glyph confidence of an accepted read, zero otherwise.
    pub fn confidence(&self) -> f32 {
        match self {
            PlateResult::Recognized { confidence, .. } => *confidence,
            PlateResult::Unrecognized(_) => 0.0,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, PlateResult::Recognized { .. })
    }

    /// Text suitable for storage and overlays.
    pub fn display_text(&self) -> &str {
        self.text().unwrap_or(UNRECOGNIZED)
    }
}

/// What the renderer draws for one admitted box.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleLabel {
    pub track_id: TrackId,
    pub vehicle_type: VehicleType,
    pub bbox: BBox,
    pub plate: Option<String>,
    pub confidence: f32,
}

impl VehicleLabel {
    pub fn new(
        track_id: TrackId,
        vehicle_type: VehicleType,
        bbox: BBox,
        plate: Option<String>,
        confidence: f32,
    ) -> Self {
        Self {
            track_id,
            vehicle_type,
            bbox,
            plate,
            confidence,
        }
    }

    pub fn caption(&self) -> String {
        format!(
            "#{} {} | {} | conf: {:.2}",
            self.track_id,
            self.vehicle_type,
            self.plate.as_deref().unwrap_or(UNRECOGNIZED),
            self.confidence
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BBox::new(10.0, 10.0, 20.0, 30.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn pixel_rect_clamps_to_image() {
        let b = BBox::new(-5.0, -5.0, 50.0, 12.0);
        assert_eq!(b.pixel_rect(40, 10), Some((0, 0, 40, 10)));
        assert_eq!(BBox::new(45.0, 0.0, 60.0, 5.0).pixel_rect(40, 10), None);
    }

    #[test]
    fn unassigned_track_ids_are_rejected() {
        assert_eq!(TrackId::from_raw(-1), None);
        assert_eq!(TrackId::from_raw(5), Some(TrackId(5)));
    }

    #[test]
    fn vehicle_type_from_label() {
        assert_eq!(VehicleType::from_label("Motorcycle"), VehicleType::Motorcycle);
        assert_eq!(VehicleType::from_label("bicycle"), VehicleType::Unknown);
    }

    #[test]
    fn caption_uses_placeholder_when_plate_missing() {
        let label = VehicleLabel::new(
            TrackId(3),
            VehicleType::Car,
            BBox::new(0.0, 0.0, 1.0, 1.0),
            None,
            0.876,
        );
        assert_eq!(label.caption(), "#3 car | unrecognized | conf: 0.88");
    }
}
