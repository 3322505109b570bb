//! Minimal stats channel between a worker and the master (spec.md §5 "the
//! stats channel is a unidirectional fd to the master... written with
//! discrete, self-delimited packets"). REDESIGN FLAGS: the original shared-
//! memory packet format is out of scope; this is a `UnixStream` carrying a
//! `[u32 len][payload]` frame per tick, which is all the master needs to
//! decide a worker is alive ("absence of refreshes, not error codes",
//! spec.md §7).

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;

pub struct StatsPacket {
    pub pid: u32,
    pub conns_handled: u64,
    pub conns_active: u32,
}

impl StatsPacket {
    fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(16);
        body.extend_from_slice(&self.pid.to_be_bytes());
        body.extend_from_slice(&self.conns_handled.to_be_bytes());
        body.extend_from_slice(&self.conns_active.to_be_bytes());
        let mut framed = Vec::with_capacity(4 + body.len());
        framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
        framed.extend_from_slice(&body);
        framed
    }

    fn decode(body: &[u8]) -> Option<StatsPacket> {
        if body.len() < 16 {
            return None;
        }
        let pid = u32::from_be_bytes(body[0..4].try_into().ok()?);
        let conns_handled = u64::from_be_bytes(body[4..12].try_into().ok()?);
        let conns_active = u32::from_be_bytes(body[12..16].try_into().ok()?);
        Some(StatsPacket {
            pid,
            conns_handled,
            conns_active,
        })
    }
}

/// Worker-side half: writes one length-prefixed packet per `cron` tick where
/// the stats-refresh timer has elapsed.
pub struct StatsChannel {
    stream: UnixStream,
}

impl StatsChannel {
    pub fn new(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(StatsChannel { stream })
    }

    pub fn send(&mut self, packet: &StatsPacket) -> io::Result<()> {
        self.stream.write_all(&packet.encode())
    }
}

/// Master-side half: a passive reader. The master never inspects packet
/// contents to decide health -- only whether packets keep arriving at all
/// (spec.md §7) -- but decoding is provided for completeness/testing.
pub struct StatsReader {
    stream: UnixStream,
    buf: Vec<u8>,
}

impl StatsReader {
    pub fn new(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(StatsReader {
            stream,
            buf: Vec::new(),
        })
    }

    /// Drains whatever is currently available and returns fully-framed
    /// packets; partial frames stay buffered for the next call.
    pub fn poll(&mut self) -> io::Result<Vec<StatsPacket>> {
        let mut chunk = [0u8; 512];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        let mut out = Vec::new();
        loop {
            if self.buf.len() < 4 {
                break;
            }
            let len = u32::from_be_bytes(self.buf[0..4].try_into().unwrap()) as usize;
            if self.buf.len() < 4 + len {
                break;
            }
            if let Some(packet) = StatsPacket::decode(&self.buf[4..4 + len]) {
                out.push(packet);
            }
            self.buf.drain(..4 + len);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_packet_over_a_socketpair() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut tx = StatsChannel::new(a).unwrap();
        let mut rx = StatsReader::new(b).unwrap();
        tx.send(&StatsPacket {
            pid: 42,
            conns_handled: 7,
            conns_active: 3,
        })
        .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let packets = rx.poll().unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].pid, 42);
        assert_eq!(packets[0].conns_handled, 7);
        assert_eq!(packets[0].conns_active, 3);
    }
}
