use crate::error::Result;

/// Outcome of one bounded-time receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv<T> {
    /// Data arrived before the timeout.
    Data(T),
    /// The link's receive timeout elapsed with nothing to deliver.
    Timeout,
}

impl<T> Recv<T> {
    /// The received value, if any.
    pub fn data(self) -> Option<T> {
        match self {
            Self::Data(value) => Some(value),
            Self::Timeout => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// A source of whole datagrams, one per receive.
///
/// Implementations block for at most their configured receive timeout.
pub trait DatagramSource: Send {
    /// Receive one datagram into `buf`, returning its length.
    ///
    /// Datagrams longer than `buf` are truncated.
    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<Recv<usize>>;
}

/// A source of stream bytes with no inherent message boundaries.
///
/// Implementations block for at most their configured read timeout.
pub trait ByteSource: Send {
    /// Read whatever bytes are available into `buf`, returning the count.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<Recv<usize>>;

    /// Discard any bytes buffered by the driver but not yet read.
    fn discard_pending(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: DatagramSource + ?Sized> DatagramSource for Box<T> {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<Recv<usize>> {
        (**self).recv_datagram(buf)
    }
}

impl<T: ByteSource + ?Sized> ByteSource for Box<T> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<Recv<usize>> {
        (**self).read_bytes(buf)
    }

    fn discard_pending(&mut self) -> Result<()> {
        (**self).discard_pending()
    }
}
