use async_trait::async_trait;

/// Metadata for one packet copied into the caller's buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketInfo {
    pub seqnum: u64,
    /// Declared payload format tag (`b'2'`, `b'3'`, ...)
    pub format: u8,
    pub payload_len: usize,
    /// `NET_STA` when known
    pub station: Option<String>,
}

/// Outcome of one receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collect {
    /// `buf[..info.payload_len]` holds the payload
    Packet(PacketInfo),
    /// Nothing available right now
    NoPacket,
    /// Next payload does not fit the caller's buffer
    TooLarge { needed: usize, capacity: usize },
    /// Clean stop requested
    Terminate,
}

/// Streaming packet source driven by `StreamReceiver`
#[async_trait]
pub trait PacketSource: Send {
    async fn collect(&mut self, buf: &mut [u8]) -> Collect;

    /// Ask the source to wind down; the next `collect` returns `Terminate`
    fn terminate(&mut self);

    /// Disconnect and persist resume state
    async fn close(&mut self);
}
