use crate::error::Result;
use crate::io::buffer::{Buffer, Transfer};

/// Capability set driving a [`Buffer`] through [`Buffer::process`].
///
/// The buffer decides when to flip and compact; the processor decides where
/// bytes come from and where they go.
pub trait BufferProcessor {
    /// Runs once before the loop. Returns bytes already drained.
    fn pre_process(&mut self, _buffer: &mut Buffer, _max_drained: usize) -> Result<usize> {
        Ok(0)
    }

    /// Indicates if the processing loop may run another round.
    fn can_loop(&self, buffer: &Buffer) -> bool;

    /// Indicates if the source could supply more bytes.
    fn could_fill(&self, buffer: &Buffer) -> bool;

    /// Fills the buffer from the source.
    fn on_fill(&mut self, buffer: &mut Buffer) -> Result<Transfer>;

    /// Called when the source reported its end of stream.
    fn on_fill_eof(&mut self) {}

    /// Drains ready bytes to the target, at most `max_drained` unless zero.
    fn on_drain(&mut self, buffer: &mut Buffer, max_drained: usize) -> Result<usize>;

    /// Called with the outcome once the loop ended.
    fn post_process(&mut self, _outcome: Transfer) {}
}
