//! Bounded reads of a single form field.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt as _};

/// Outcome of a bounded read which did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRead {
    /// The source ended before the ceiling; this is all of it.
    Complete(Vec<u8>),

    /// The source supplied at least the ceiling's worth of bytes.
    TooLong,
}

/// Read a field, refusing it once `max` bytes have arrived.
///
/// Never reads more than `max` bytes from `reader`, so an over-long field
/// costs at most `max` bytes of memory. A field of exactly `max` bytes is
/// refused. I/O errors are returned as they are.
pub async fn read_bounded<R>(reader: R, max: usize) -> io::Result<FieldRead>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let read = reader.take(max as u64).read_to_end(&mut buffer).await?;

    if read >= max {
        tracing::trace!(max, "Field reached its ceiling");
        return Ok(FieldRead::TooLong);
    }

    Ok(FieldRead::Complete(buffer))
}
