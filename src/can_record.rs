//! CAN 2.0A record type shared by both bridge directions, and its 13-byte
//! little-endian wire encoding.

use byteorder::{ByteOrder, LittleEndian};
use embedded_can::{Frame, Id, StandardId};

/// Size of one record on the wire: `id(4) ++ dlc(1) ++ data(8)`.
pub const WIRE_LEN: usize = 13;

/// One CAN classic (2.0A) frame: an 11-bit identifier, a length in `[0, 8]`,
/// and a fixed 8-byte data buffer of which only the first `dlc` bytes are
/// meaningful.
#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub struct CanRecord {
    id: u32,
    dlc: u8,
    data: [u8; 8],
}

impl CanRecord {
    pub const EMPTY: CanRecord = CanRecord { id: 0, dlc: 0, data: [0; 8] };

    /// Build a record from a standard 11-bit identifier. `data.len()` must be
    /// at most 8.
    pub fn new_std(id: u16, data: &[u8]) -> Option<Self> {
        Self::new(StandardId::new(id)?, data)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// Serialize into `buf[..WIRE_LEN]`. Panics if `buf` is shorter than
    /// `WIRE_LEN`; callers size their payload buffers against the wire
    /// budget before calling this.
    pub fn write_to(&self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u32(&mut buf[0..4], self.id);
        buf[4] = self.dlc;
        buf[5..13].copy_from_slice(&self.data);
        WIRE_LEN
    }

    /// Parse a record from the front of `buf`. Returns the record and the
    /// number of bytes consumed (always `WIRE_LEN`), or `None` if fewer than
    /// `WIRE_LEN` bytes remain.
    pub fn read_from(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < WIRE_LEN {
            return None;
        }
        let id = LittleEndian::read_u32(&buf[0..4]);
        // Clamp rather than reject: a bit error turning a valid dlc into an
        // out-of-range value shouldn't poison the rest of the payload parse.
        let dlc = buf[4].min(8);
        let mut data = [0u8; 8];
        data.copy_from_slice(&buf[5..13]);
        Some((Self { id, dlc, data }, WIRE_LEN))
    }
}

impl Default for CanRecord {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Frame for CanRecord {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let id = match id.into() {
            Id::Standard(sid) => sid.as_raw() as u32,
            // This record type only carries CAN 2.0A standard frames.
            Id::Extended(_) => return None,
        };
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Some(Self { id, dlc: data.len() as u8, data: buf })
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        false
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        Id::Standard(StandardId::new(self.id as u16).unwrap_or_else(|| StandardId::new(0).unwrap()))
    }

    fn dlc(&self) -> usize {
        self.dlc as usize
    }

    fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_format() {
        let rec = CanRecord::new_std(0x123, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0xAAu8; WIRE_LEN];
        let written = rec.write_to(&mut buf);
        assert_eq!(written, WIRE_LEN);

        let (parsed, consumed) = CanRecord::read_from(&buf).unwrap();
        assert_eq!(consumed, WIRE_LEN);
        assert_eq!(parsed.id(), 0x123);
        assert_eq!(parsed.dlc(), 4);
        assert_eq!(parsed.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn rejects_extended_ids() {
        use embedded_can::ExtendedId;
        assert!(CanRecord::new(ExtendedId::new(0x1ABCDEF).unwrap(), &[]).is_none());
    }

    #[test]
    fn read_from_rejects_short_buffers() {
        assert!(CanRecord::read_from(&[0u8; WIRE_LEN - 1]).is_none());
    }
}
