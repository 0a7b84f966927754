//! The axis-aligned rectangle blob handed to the spatial index when a
//! tile is registered.
//!
//! The layout is the companion spatial library's serialized geometry:
//! a little-endian SRID-tagged MBR followed by a single-ring polygon
//! with the five corner points. The core only constructs it; the
//! spatial index interprets it.

use byteorder::{ByteOrder, LittleEndian};

const BLOB_START: u8 = 0x00;
const BLOB_MBR_END: u8 = 0x7c;
const BLOB_END: u8 = 0xfe;
const GEOMETRY_POLYGON: u32 = 3;

/// An axis-aligned rectangle in SRID units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    /// Western edge.
    pub min_x: f64,
    /// Southern edge.
    pub min_y: f64,
    /// Eastern edge.
    pub max_x: f64,
    /// Northern edge.
    pub max_y: f64,
}

impl Envelope {
    /// Build an envelope, normalizing swapped corners.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    /// Whether two envelopes share any area or boundary.
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Serialize to the rectangle-polygon geometry blob.
    pub fn to_blob(&self, srid: i32) -> Vec<u8> {
        let mut blob = Vec::with_capacity(132);
        blob.push(BLOB_START);
        blob.push(0x01); // little endian
        push_i32(&mut blob, srid);
        push_f64(&mut blob, self.min_x);
        push_f64(&mut blob, self.min_y);
        push_f64(&mut blob, self.max_x);
        push_f64(&mut blob, self.max_y);
        blob.push(BLOB_MBR_END);
        push_u32(&mut blob, GEOMETRY_POLYGON);
        push_u32(&mut blob, 1); // one ring
        push_u32(&mut blob, 5); // closed rectangle
        for (x, y) in [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
            (self.min_x, self.min_y),
        ] {
            push_f64(&mut blob, x);
            push_f64(&mut blob, y);
        }
        blob.push(BLOB_END);
        blob
    }
}

fn push_i32(blob: &mut Vec<u8>, value: i32) {
    let mut word = [0u8; 4];
    LittleEndian::write_i32(&mut word, value);
    blob.extend_from_slice(&word);
}

fn push_u32(blob: &mut Vec<u8>, value: u32) {
    let mut word = [0u8; 4];
    LittleEndian::write_u32(&mut word, value);
    blob.extend_from_slice(&word);
}

fn push_f64(blob: &mut Vec<u8>, value: f64) {
    let mut word = [0u8; 8];
    LittleEndian::write_f64(&mut word, value);
    blob.extend_from_slice(&word);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_normalized() {
        let envelope = Envelope::new(10.0, 20.0, -10.0, -20.0);
        assert_eq!(envelope.min_x, -10.0);
        assert_eq!(envelope.max_y, 20.0);
    }

    #[test]
    fn intersection() {
        let a = Envelope::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&Envelope::new(5.0, 5.0, 15.0, 15.0)));
        assert!(a.intersects(&Envelope::new(10.0, 10.0, 20.0, 20.0)));
        assert!(!a.intersects(&Envelope::new(11.0, 0.0, 20.0, 10.0)));
    }

    #[test]
    fn blob_layout() {
        let envelope = Envelope::new(1.0, 2.0, 3.0, 4.0);
        let blob = envelope.to_blob(4326);
        assert_eq!(blob.len(), 132);
        assert_eq!(blob[0], 0x00);
        assert_eq!(blob[1], 0x01);
        assert_eq!(LittleEndian::read_i32(&blob[2..6]), 4326);
        assert_eq!(LittleEndian::read_f64(&blob[6..14]), 1.0);
        assert_eq!(LittleEndian::read_f64(&blob[30..38]), 4.0);
        assert_eq!(blob[38], 0x7c);
        assert_eq!(LittleEndian::read_u32(&blob[39..43]), 3);
        assert_eq!(blob[131], 0xfe);
        // The ring closes on its first point.
        assert_eq!(
            LittleEndian::read_f64(&blob[51..59]),
            LittleEndian::read_f64(&blob[115..123])
        );
    }
}
