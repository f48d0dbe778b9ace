//! Caller-side handshake driving
//!
//! Connections never wait on their own, so something has to keep stepping
//! them and, for buffer-backed pairs, carry ciphertext from one side's
//! outbound queue to the other side's inbound queue. These helpers do that
//! for two connections living in the same thread.

use super::session::Connection;
use super::{Error, Result};
use bytes::Bytes;

/// Upper bound on relay rounds before a pair is declared stuck
pub const MAX_RELAY_ROUNDS: usize = 1024;

/// Largest chunk moved or read in one go
const RELAY_CHUNK: usize = 1 << 16;

/// Which end of a pair produced something
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// Move all queued outbound ciphertext of `from` into `to`.
///
/// Returns whether anything moved.
pub fn transfer(from: &mut Connection<'_>, to: &mut Connection<'_>) -> Result<bool> {
    let mut moved = false;
    loop {
        match from.buffer_read(RELAY_CHUNK) {
            Ok(chunk) => {
                to.buffer_write(&chunk)?;
                moved = true;
            }
            Err(Error::WantRead) => return Ok(moved),
            Err(err) => return Err(err),
        }
    }
}

/// Try to read plaintext from `reader`, then flush its ciphertext to `writer`.
fn relay_step(reader: &mut Connection<'_>, writer: &mut Connection<'_>) -> Result<(Option<Bytes>, bool)> {
    match reader.read(RELAY_CHUNK) {
        Ok(data) => return Ok((Some(data), false)),
        Err(Error::WantRead) => {}
        Err(err) => return Err(err),
    }
    let moved = transfer(reader, writer)?;
    Ok((None, moved))
}

/// Relay between two buffer-backed connections until one side yields
/// plaintext or nothing is left to move.
///
/// Returns the side that produced plaintext and the data, or `None` once
/// both queues are empty and neither side has anything to read.
pub fn relay(client: &mut Connection<'_>, server: &mut Connection<'_>) -> Result<Option<(Side, Bytes)>> {
    for _ in 0..MAX_RELAY_ROUNDS {
        let (data, client_moved) = relay_step(client, server)?;
        if let Some(data) = data {
            return Ok(Some((Side::Client, data)));
        }

        let (data, server_moved) = relay_step(server, client)?;
        if let Some(data) = data {
            return Ok(Some((Side::Server, data)));
        }

        if !client_moved && !server_moved {
            return Ok(None);
        }
    }

    Err(Error::InvalidState(format!(
        "relay did not settle within {} rounds",
        MAX_RELAY_ROUNDS
    )))
}

fn handshake_step(conn: &mut Connection<'_>) -> Result<bool> {
    match conn.do_handshake() {
        Ok(()) => Ok(true),
        Err(err) if err.is_would_block() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Step both connections until their handshakes complete.
///
/// Both roles must already be set. Buffer-backed pairs get their
/// ciphertext relayed between steps; socket-backed pairs rely on the
/// sockets being connected to each other.
///
/// This is a caller-side driver for tests, benches and tools that own both
/// ends of a pair. For socket pairs it yields the thread between rounds
/// until both sides finish or the round limit is hit. The connections
/// themselves never wait.
pub fn drive_handshake(a: &mut Connection<'_>, b: &mut Connection<'_>) -> Result<()> {
    let relay_buffers = a.is_buffer_backed() && b.is_buffer_backed();

    for round in 0..MAX_RELAY_ROUNDS {
        let a_done = handshake_step(a)?;
        let b_done = handshake_step(b)?;
        if a_done && b_done {
            log::debug!("{} and {} established after {} rounds", a.id(), b.id(), round + 1);
            return Ok(());
        }

        if relay_buffers {
            transfer(a, b)?;
            transfer(b, a)?;
        } else {
            std::thread::yield_now();
        }
    }

    Err(Error::InvalidState(format!(
        "handshake did not complete within {} rounds",
        MAX_RELAY_ROUNDS
    )))
}
