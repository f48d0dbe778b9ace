//! Connection transports
//!
//! A connection either talks to a connected stream socket or to a pair of
//! in-memory ciphertext queues that the caller relays by hand. Both are
//! exposed to the engine through `Read`/`Write`; the memory side reports
//! `WouldBlock` when the inbound queue is empty so the engine surfaces a
//! want-read instead of waiting.

use bytes::{Buf, Bytes, BytesMut};
use socket2::Socket;
use std::io::{self, Read, Write};

/// Inbound and outbound ciphertext queues for a buffer-backed connection
#[derive(Debug, Default)]
pub struct MemoryBio {
    /// Ciphertext from the peer, waiting for the engine
    inbound: BytesMut,
    /// Ciphertext from the engine, waiting for the caller
    outbound: BytesMut,
    inbound_eof: bool,
}

impl MemoryBio {
    pub fn new() -> Self {
        MemoryBio::default()
    }

    /// Append ciphertext received from the peer. Returns the byte count.
    pub fn push_inbound(&mut self, data: &[u8]) -> usize {
        self.inbound.extend_from_slice(data);
        log::trace!("queued {} inbound bytes ({} pending)", data.len(), self.inbound.len());
        data.len()
    }

    /// Take up to `max` bytes of ciphertext destined for the peer.
    ///
    /// Returns `None` when nothing is queued; a zero `max` with data queued
    /// yields an empty chunk.
    pub fn pop_outbound(&mut self, max: usize) -> Option<Bytes> {
        if self.outbound.is_empty() {
            return None;
        }
        let n = max.min(self.outbound.len());
        log::trace!("drained {} outbound bytes", n);
        Some(self.outbound.split_to(n).freeze())
    }

    /// Mark the end of inbound data; once drained, reads see EOF.
    pub fn set_inbound_eof(&mut self) {
        self.inbound_eof = true;
    }

    pub fn is_inbound_eof(&self) -> bool {
        self.inbound_eof
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }
}

impl Read for MemoryBio {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() {
            if self.inbound_eof {
                return Ok(0);
            }
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no inbound ciphertext queued",
            ));
        }
        let n = buf.len().min(self.inbound.len());
        buf[..n].copy_from_slice(&self.inbound[..n]);
        self.inbound.advance(n);
        Ok(n)
    }
}

impl Write for MemoryBio {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What a connection reads ciphertext from and writes it to
#[derive(Debug)]
pub enum Transport {
    Socket(Socket),
    Memory(MemoryBio),
}

impl Transport {
    pub fn is_memory(&self) -> bool {
        matches!(self, Transport::Memory(_))
    }

    pub fn memory_mut(&mut self) -> Option<&mut MemoryBio> {
        match self {
            Transport::Memory(bio) => Some(bio),
            Transport::Socket(_) => None,
        }
    }

    pub fn socket(&self) -> Option<&Socket> {
        match self {
            Transport::Socket(socket) => Some(socket),
            Transport::Memory(_) => None,
        }
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Socket(socket) => socket.read(buf),
            Transport::Memory(bio) => bio.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Socket(socket) => socket.write(buf),
            Transport::Memory(bio) => bio.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Socket(socket) => socket.flush(),
            Transport::Memory(bio) => bio.flush(),
        }
    }
}
