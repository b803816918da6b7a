//! Echo handler.
//!
//! Serves one readiness burst: read a chunk, write exactly that chunk back,
//! and keep going while reads come back full. A short read (including EOF)
//! ends the burst. A client that sends an exact multiple of the chunk size
//! and then waits will hold the handler in its next read until more data or
//! EOF arrives.

use std::io::{self, Read, Write};

/// Drain one burst from `stream`, echoing it back chunk by chunk.
///
/// `buf` bounds how much is held at once and must not be empty. Returns
/// the number of bytes echoed. A read error ends the burst without writing
/// anything for that read.
pub fn echo_burst<S: Read + Write + ?Sized>(stream: &mut S, buf: &mut [u8]) -> io::Result<usize> {
    // A zero-length read can never come back short.
    if buf.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "echo buffer is empty",
        ));
    }

    let mut total = 0;

    loop {
        let n = match stream.read(buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        if n > 0 {
            stream.write_all(&buf[..n])?;
            total += n;
        }

        if n < buf.len() {
            return Ok(total);
        }
    }
}
