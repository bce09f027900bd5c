use bytes::BytesMut;

/// An owned frame plus the receive-side metadata the NIC attaches to it.
/// Stands in for the driver's buffer type: the dataplane moves Packets
/// from RX to TX without copying the payload, and dropping one releases
/// the buffer.
#[derive(Debug, Clone)]
pub struct Packet {
    data: BytesMut,
    /// RSS hash computed by the NIC on receive. Zero for locally built
    /// frames.
    pub rss_hash: u32,
}

impl Packet {
    pub fn new(data: BytesMut) -> Self {
        Self { data, rss_hash: 0 }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(BytesMut::from(data))
    }

    pub fn with_rss_hash(mut self, rss_hash: u32) -> Self {
        self.rss_hash = rss_hash;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Swap the frame contents, returning the old buffer. Used by
    /// encapsulation, which rebuilds the frame around the original payload.
    pub fn replace(&mut self, data: BytesMut) -> BytesMut {
        std::mem::replace(&mut self.data, data)
    }
}
