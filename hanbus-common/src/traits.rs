//! Common traits

/// An async byte-oriented sender, e.g. a serial port or a simulated line
pub trait AsyncByteSender: Send {
    /// Error type returned by sender
    type Error: core::fmt::Debug + Send;

    /// Write all of `bytes` to the line
    fn send(&mut self, bytes: &[u8])
        -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}

/// An async byte-oriented receiver
pub trait AsyncByteReceiver: Send {
    /// The error type returned by recv
    type Error: core::fmt::Debug + Send;

    /// Receive a byte immediately if one is available
    fn try_recv(&mut self) -> Option<u8>;

    /// Wait for the next byte
    fn recv(&mut self) -> impl core::future::Future<Output = Result<u8, Self::Error>> + Send;

    /// Remove any pending bytes from the receiver
    fn flush(&mut self) {
        while self.try_recv().is_some() {}
    }
}
