//! The fragment/unit data model: a typed tree of units, ownership of raw
//! bytes and decoded content, and the insert/delete operations.

use crate::codecs::{mpeg2, vp9};
use crate::error::{CbsError, Result};

/// One contiguous bitstream payload being parsed or produced (an
/// "extradata" parameter-set blob, a packet, or a free-standing buffer).
#[derive(Default)]
pub struct Fragment {
    /// Raw bytes, present only while the fragment owns them: between
    /// construction and `split_fragment` on read, or after
    /// `assemble_fragment` on write. Units are the single source of
    /// truth in between.
    pub data: Option<Vec<u8>>,
    pub data_bit_padding: u8,
    pub units: Vec<Unit>,
}

/// One parsable syntactic object within a fragment: a parameter set, a
/// header, or a slice.
pub struct Unit {
    pub unit_type: u32,
    pub data: Option<Vec<u8>>,
    pub data_bit_padding: u8,
    pub content: Option<ContentOrigin>,
}

/// Every codec's decoded unit content, gathered behind one crate-wide
/// tagged union keyed by `unit_type` rather than an opaque pointer plus
/// type-dependent casting.
pub enum UnitContent {
    Mpeg2(mpeg2::Mpeg2Unit),
    Vp9(vp9::Vp9Frame),
}

/// Distinguishes content produced by `read_unit` from content a caller
/// fabricated and handed in via `insert_unit_content`. Both variants own
/// their payload outright — Rust's ownership model means there is no
/// "borrowed, must not free" case to express.
pub enum ContentOrigin {
    Decoded(UnitContent),
    External(UnitContent),
}

impl ContentOrigin {
    pub fn content(&self) -> &UnitContent {
        match self {
            ContentOrigin::Decoded(c) | ContentOrigin::External(c) => c,
        }
    }

    pub fn content_mut(&mut self) -> &mut UnitContent {
        match self {
            ContentOrigin::Decoded(c) | ContentOrigin::External(c) => c,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, ContentOrigin::External(_))
    }
}

/// Where to insert a unit: at a specific index, or appended at the end.
#[derive(Clone, Copy, Debug)]
pub enum Position {
    At(usize),
    End,
}

impl Fragment {
    pub fn new() -> Fragment {
        Fragment::default()
    }

    fn resolve(&self, pos: Position) -> Result<usize> {
        match pos {
            Position::End => Ok(self.units.len()),
            Position::At(i) if i <= self.units.len() => Ok(i),
            Position::At(i) => Err(CbsError::InvalidArgument(format!(
                "position {} out of range (0..={})",
                i,
                self.units.len()
            ))),
        }
    }

    /// Grows the unit sequence by one, initializing a fresh unit whose
    /// content is caller-owned.
    pub fn insert_unit_content(&mut self, pos: Position, unit_type: u32, content: UnitContent) -> Result<()> {
        let i = self.resolve(pos)?;
        self.units.insert(
            i,
            Unit {
                unit_type,
                data: None,
                data_bit_padding: 0,
                content: Some(ContentOrigin::External(content)),
            },
        );
        Ok(())
    }

    pub fn insert_unit_data(&mut self, pos: Position, unit_type: u32, data: Vec<u8>) -> Result<()> {
        let i = self.resolve(pos)?;
        self.units.insert(
            i,
            Unit {
                unit_type,
                data: Some(data),
                data_bit_padding: 0,
                content: None,
            },
        );
        Ok(())
    }

    /// Removes the unit at `pos`. Freeing of its content and data is
    /// automatic via `Drop`.
    pub fn delete_unit(&mut self, pos: usize) -> Result<()> {
        if pos >= self.units.len() {
            return Err(CbsError::InvalidArgument(format!(
                "position {} out of range (0..{})",
                pos,
                self.units.len()
            )));
        }
        self.units.remove(pos);
        Ok(())
    }

    /// Drops every unit and the fragment's own raw data. Safe and
    /// idempotent on an already-empty fragment.
    pub fn uninit(&mut self) {
        self.units.clear();
        self.data = None;
        self.data_bit_padding = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_and_delete_round_trips() {
        let mut frag = Fragment::new();
        frag.insert_unit_data(Position::End, 0xb3, vec![1, 2, 3]).unwrap();
        frag.insert_unit_data(Position::End, 0x00, vec![4, 5]).unwrap();
        assert_eq!(frag.units.len(), 2);

        frag.insert_unit_data(Position::At(1), 0xff, vec![9]).unwrap();
        assert_eq!(frag.units[1].unit_type, 0xff);

        frag.delete_unit(1).unwrap();
        assert_eq!(frag.units.len(), 2);
        assert_eq!(frag.units[0].unit_type, 0xb3);
        assert_eq!(frag.units[1].unit_type, 0x00);
    }

    #[test]
    fn delete_out_of_range_is_invalid_argument() {
        let mut frag = Fragment::new();
        assert!(matches!(
            frag.delete_unit(0),
            Err(CbsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn uninit_is_idempotent() {
        let mut frag = Fragment::new();
        frag.uninit();
        frag.insert_unit_data(Position::End, 1, vec![0]).unwrap();
        frag.uninit();
        assert!(frag.units.is_empty());
        assert!(frag.data.is_none());
        frag.uninit();
    }
}
