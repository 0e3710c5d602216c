//! Transport abstraction over any byte-oriented channel.
//!
//! The byte layer below the frame codec is an external collaborator:
//! a UART, a USB bridge, a WebSocket or a simulator.  Outgoing frames go
//! through [`Transport::send`]; incoming bytes are handed to
//! [`BusEngine::receive`](crate::app::service::BusEngine::receive) by
//! whatever owns the receive callback.

/// Byte-oriented transport channel.
pub trait Transport {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Send one complete encoded frame.
    fn send(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool {
        true
    }
}

/// A null transport that discards all frames.
/// Useful when the engine only hosts local virtual devices.
pub struct NullTransport;

impl Transport for NullTransport {
    type Error = ();

    fn send(&mut self, _frame: &[u8]) -> Result<(), ()> {
        Ok(())
    }
}

/// Records every frame sent, for simulation and tests.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub frames: Vec<Vec<u8>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the recorded frames.
    pub fn take(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.frames)
    }
}

impl Transport for RecordingTransport {
    type Error = ();

    fn send(&mut self, frame: &[u8]) -> Result<(), ()> {
        self.frames.push(frame.to_vec());
        Ok(())
    }
}
