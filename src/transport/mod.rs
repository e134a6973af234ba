//! Byte-stream transport abstraction
//!
//! The link engine is transport-agnostic: anything that can move ordered
//! bytes works. Reads are non-blocking-ish (a short internal timeout maps to
//! `Ok(0)`); a hard error from `read` or `write` means the transport has
//! closed, which the owning session surfaces upward. No reconnection is
//! attempted at this layer.

use crate::error::Result;

mod mock;
mod serial;
mod udp;

pub use mock::MockTransport;
pub use serial::SerialTransport;
pub use udp::UdpTransport;

/// Transport trait for link communication
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read (0 = nothing yet)
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Check if data is available to read
    fn available(&mut self) -> Result<usize> {
        Ok(0) // Default implementation
    }
}
