use bytes::{Bytes, BytesMut};

/// Default scratch capacity for the encode worker's packet buffer.
pub const DEFAULT_PACKET_CAPACITY: usize = 1 << 20;

/// One unit of compressed output.
///
/// The encode worker owns a single `Packet` and reuses it for every call into
/// the engine; write callbacks only ever see it by reference.
#[derive(Debug, Default)]
pub struct Packet {
    data: BytesMut,
    pts: Option<i64>,
    dts: Option<i64>,
    is_key: bool,
}

impl Packet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            ..Default::default()
        }
    }

    /// Reset for the next engine call, keeping the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
        self.pts = None;
        self.dts = None;
        self.is_key = false;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }

    pub fn dts(&self) -> Option<i64> {
        self.dts
    }

    pub fn set_dts(&mut self, dts: Option<i64>) {
        self.dts = dts;
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    pub fn set_key(&mut self, is_key: bool) {
        self.is_key = is_key;
    }

    /// Copy the payload out of the scratch buffer.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }

    /// Replace the contents with an FFmpeg packet.
    pub(crate) fn fill_from(&mut self, packet: &ffmpeg_next::codec::packet::Packet) {
        self.clear();
        if let Some(data) = packet.data() {
            self.data.extend_from_slice(data);
        }
        self.pts = packet.pts();
        self.dts = packet.dts();
        self.is_key = packet.is_key();
    }
}

/// An owned copy of a packet, for consumers that outlive the write callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub is_key: bool,
}

impl From<&Packet> for EncodedPacket {
    fn from(packet: &Packet) -> Self {
        Self {
            data: packet.to_bytes(),
            pts: packet.pts(),
            dts: packet.dts(),
            is_key: packet.is_key(),
        }
    }
}
