//! Multi-queue TAP devices as forwarding ports.
//!
//! Each port is a TAP interface opened once per queue with
//! `IFF_MULTI_QUEUE`, which gives every queue its own file descriptor. All
//! descriptors are non-blocking: an empty receive queue ends a burst, a full
//! transmit queue is reported as backpressure.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use nix::libc::{self, IFF_NO_PI, IFF_TAP, IFNAMSIZ, c_char, c_short};
use tracing::{debug, info, trace};

use super::buffer::{BufferPool, PacketBuf};
use super::queue::{PortId, PortQueues, QueueId};

const TUNSETIFF: nix::libc::Ioctl = 0x400454ca as nix::libc::Ioctl;
const IFF_MULTI_QUEUE: c_short = 0x0100;

#[repr(C)]
struct IfReq {
    ifr_name: [c_char; IFNAMSIZ],
    ifr_flags: c_short,
    _padding: [u8; 22],
}

impl IfReq {
    fn new(name: &str, flags: c_short) -> io::Result<Self> {
        if name.is_empty() || name.len() >= IFNAMSIZ {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid interface name: {name:?}"),
            ));
        }

        let mut ifr = IfReq {
            ifr_name: [0; IFNAMSIZ],
            ifr_flags: flags,
            _padding: [0; 22],
        };
        for (i, byte) in name.bytes().enumerate() {
            ifr.ifr_name[i] = byte as c_char;
        }
        Ok(ifr)
    }
}

/// One TAP interface with a descriptor per queue.
pub struct TapPort {
    pub name: String,
    queues: Vec<File>,
}

impl TapPort {
    /// Attach `queue_count` queues to the TAP interface `name`, creating it if needed.
    pub fn open(name: &str, queue_count: usize) -> io::Result<Self> {
        let ifr = IfReq::new(name, (IFF_TAP | IFF_NO_PI) as c_short | IFF_MULTI_QUEUE)?;

        let mut queues = Vec::with_capacity(queue_count);
        for queue in 0..queue_count {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open("/dev/net/tun")?;

            let result = unsafe { nix::libc::ioctl(file.as_raw_fd(), TUNSETIFF, &ifr) };
            if result < 0 {
                return Err(io::Error::last_os_error());
            }

            debug!(name, queue, "TAP queue attached");
            queues.push(file);
        }

        info!(name, queues = queue_count, "TAP port opened");

        Ok(TapPort {
            name: name.to_string(),
            queues,
        })
    }
}

/// Ports backed by TAP devices, sharing one buffer pool.
pub struct TapPorts {
    ports: Vec<TapPort>,
    pool: Arc<BufferPool>,
}

impl TapPorts {
    /// Open every named interface with `queue_count` queues.
    ///
    /// Returns the name of the failing interface along with the error.
    pub fn open(
        names: &[String],
        queue_count: usize,
        pool: Arc<BufferPool>,
    ) -> Result<Self, (String, io::Error)> {
        let ports = names
            .iter()
            .map(|name| TapPort::open(name, queue_count).map_err(|e| (name.clone(), e)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { ports, pool })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ports.iter().map(|p| p.name.as_str())
    }

    fn queue(&self, port: PortId, queue: QueueId) -> Option<&File> {
        self.ports.get(port.index())?.queues.get(queue.index())
    }
}

/// Read up to `max` frames, one per `read` call, into pool buffers.
///
/// Frames already read are always returned. An error is only reported when
/// it happens before the first frame.
fn read_burst<R: Read>(
    mut reader: R,
    pool: &Arc<BufferPool>,
    out: &mut Vec<PacketBuf>,
    max: usize,
) -> io::Result<usize> {
    let start = out.len();
    while out.len() - start < max {
        // Pool exhaustion ends the burst, frames stay queued in the kernel.
        let Some(mut buf) = pool.alloc() else {
            break;
        };
        match reader.read(buf.spare_mut()) {
            Ok(0) => break,
            Ok(n) => {
                buf.set_len(n);
                out.push(buf);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if out.len() > start => {
                // These frames have left the kernel queue and must be counted
                trace!(error = %e, read = out.len() - start, "Read failed mid-burst");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out.len() - start)
}

/// Write frames one per `write` call until the writer would block.
///
/// Written frames are removed from `pkts`. A frame the writer rejects with
/// any other error is skipped and stays in `pkts` with the blocked tail.
fn write_burst<W: Write>(mut writer: W, pkts: &mut Vec<PacketBuf>) -> usize {
    let mut sent = 0;
    let mut blocked = false;
    pkts.retain(|pkt| {
        if blocked {
            return true;
        }
        let result = loop {
            match writer.write(pkt) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        match result {
            Ok(_) => {
                sent += 1;
                false
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                blocked = true;
                true
            }
            Err(e) => {
                trace!(len = pkt.len(), error = %e, "Frame not written");
                true
            }
        }
    });
    sent
}

impl PortQueues for TapPorts {
    fn port_count(&self) -> usize {
        self.ports.len()
    }

    fn rx_burst(
        &self,
        port: PortId,
        queue: QueueId,
        out: &mut Vec<PacketBuf>,
        max: usize,
    ) -> io::Result<usize> {
        let file = self.queue(port, queue).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("No queue {queue} on port {port}"))
        })?;
        read_burst(file, &self.pool, out, max)
    }

    fn tx_burst(&self, port: PortId, queue: QueueId, pkts: &mut Vec<PacketBuf>) -> usize {
        let Some(file) = self.queue(port, queue) else {
            debug!(port = %port, queue = %queue, "Transmit on unknown queue");
            return 0;
        };
        write_burst(file, pkts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixDatagram;

    /// Replays a fixed sequence of reads, then would block.
    struct ScriptedReader(VecDeque<io::Result<Vec<u8>>>);

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(frame)) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    /// Answers writes from a fixed sequence of results, then would block.
    struct ScriptedWriter {
        results: VecDeque<io::Result<()>>,
        written: Vec<u8>,
    }

    impl ScriptedWriter {
        fn new(results: Vec<io::Result<()>>) -> Self {
            Self {
                results: results.into(),
                written: Vec::new(),
            }
        }
    }

    impl Write for ScriptedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.results.pop_front() {
                Some(Ok(())) => {
                    // First byte identifies the frame
                    self.written.push(buf[0]);
                    Ok(buf.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn frames(pool: &Arc<BufferPool>, count: u8) -> Vec<PacketBuf> {
        (0..count).map(|i| pool.alloc_from(&[i; 60]).unwrap()).collect()
    }

    fn markers(pkts: &[PacketBuf]) -> Vec<u8> {
        pkts.iter().map(|p| p[0]).collect()
    }

    /// One port with one queue whose descriptor is a datagram socket.
    fn socket_ports(pool: Arc<BufferPool>) -> (TapPorts, UnixDatagram) {
        let (local, peer) = UnixDatagram::pair().unwrap();
        local.set_nonblocking(true).unwrap();
        peer.set_nonblocking(true).unwrap();

        let port = TapPort {
            name: "sock0".to_string(),
            queues: vec![File::from(OwnedFd::from(local))],
        };
        (
            TapPorts {
                ports: vec![port],
                pool,
            },
            peer,
        )
    }

    #[test]
    fn test_ifreq_name() {
        let ifr = IfReq::new("tap0", IFF_TAP as c_short).unwrap();
        assert_eq!(ifr.ifr_name[0], b't' as c_char);
        assert_eq!(ifr.ifr_name[3], b'0' as c_char);
        assert_eq!(ifr.ifr_name[4], 0);
        assert_eq!(ifr.ifr_flags, IFF_TAP as c_short);
    }

    #[test]
    fn test_ifreq_invalid_name() {
        assert!(IfReq::new("", 0).is_err());
        assert!(IfReq::new(&"x".repeat(IFNAMSIZ), 0).is_err());
        assert!(IfReq::new(&"x".repeat(IFNAMSIZ - 1), 0).is_ok());
    }

    #[test]
    fn test_rx_stops_at_max() {
        let pool = BufferPool::new(16).unwrap();
        let (ports, peer) = socket_ports(pool);
        for i in 0..5u8 {
            peer.send(&[i; 64]).unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(ports.rx_burst(PortId(0), QueueId(0), &mut out, 3).unwrap(), 3);
        assert_eq!(markers(&out), vec![0, 1, 2]);
        assert_eq!(out[0].len(), 64);

        assert_eq!(ports.rx_burst(PortId(0), QueueId(0), &mut out, 3).unwrap(), 2);
        assert_eq!(markers(&out), vec![0, 1, 2, 3, 4]);

        // Empty queue
        assert_eq!(ports.rx_burst(PortId(0), QueueId(0), &mut out, 3).unwrap(), 0);
    }

    #[test]
    fn test_rx_stops_on_pool_exhaustion() {
        let pool = BufferPool::new(2).unwrap();
        let (ports, peer) = socket_ports(pool.clone());
        for i in 0..5u8 {
            peer.send(&[i; 64]).unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(ports.rx_burst(PortId(0), QueueId(0), &mut out, 32).unwrap(), 2);
        assert_eq!(pool.available(), 0);

        // The rest is still queued on the descriptor
        out.clear();
        assert_eq!(ports.rx_burst(PortId(0), QueueId(0), &mut out, 32).unwrap(), 2);
        assert_eq!(markers(&out), vec![2, 3]);
    }

    #[test]
    fn test_rx_error_after_frames_keeps_them() {
        let pool = BufferPool::new(8).unwrap();
        let mut reader = ScriptedReader(
            vec![
                Ok(vec![7; 60]),
                Ok(vec![8; 60]),
                Err(io::Error::from_raw_os_error(libc::EIO)),
                Err(io::Error::from_raw_os_error(libc::EIO)),
            ]
            .into(),
        );

        let mut out = Vec::new();
        assert_eq!(read_burst(&mut reader, &pool, &mut out, 32).unwrap(), 2);
        assert_eq!(markers(&out), vec![7, 8]);
        assert_eq!(pool.available(), 6);

        // An error before any frame is reported and appends nothing
        assert!(read_burst(&mut reader, &pool, &mut out, 32).is_err());
        assert_eq!(out.len(), 2);
        assert_eq!(pool.available(), 6);
    }

    #[test]
    fn test_rx_interrupted_retried() {
        let pool = BufferPool::new(4).unwrap();
        let mut reader = ScriptedReader(
            vec![Err(io::ErrorKind::Interrupted.into()), Ok(vec![3; 60])].into(),
        );

        let mut out = Vec::new();
        assert_eq!(read_burst(&mut reader, &pool, &mut out, 32).unwrap(), 1);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_tx_backpressure_keeps_tail_in_order() {
        let pool = BufferPool::new(512).unwrap();
        let (ports, peer) = socket_ports(pool.clone());

        let mut pkts: Vec<PacketBuf> = (0..512u16)
            .map(|i| {
                let mut frame = vec![0u8; 1500];
                frame[..2].copy_from_slice(&i.to_be_bytes());
                pool.alloc_from(&frame).unwrap()
            })
            .collect();
        let index = |p: &PacketBuf| u16::from_be_bytes([p[0], p[1]]);

        // The peer never reads, so the socket buffer fills up
        let sent = ports.tx_burst(PortId(0), QueueId(0), &mut pkts);
        assert!(sent > 0 && sent < 512, "sent {sent}");
        assert_eq!(pkts.len(), 512 - sent);
        assert!(
            pkts.iter()
                .enumerate()
                .all(|(i, p)| index(p) as usize == sent + i)
        );
        assert_eq!(pool.available(), sent);

        let mut buf = [0u8; 2048];
        let mut received = 0;
        while let Ok(n) = peer.recv(&mut buf) {
            assert_eq!(n, 1500);
            assert_eq!(u16::from_be_bytes([buf[0], buf[1]]) as usize, received);
            received += 1;
        }
        assert_eq!(received, sent);
    }

    #[test]
    fn test_tx_would_block_keeps_tail() {
        let pool = BufferPool::new(8).unwrap();
        let mut pkts = frames(&pool, 4);
        let mut writer = ScriptedWriter::new(vec![Ok(())]);

        assert_eq!(write_burst(&mut writer, &mut pkts), 1);
        assert_eq!(writer.written, vec![0]);
        assert_eq!(markers(&pkts), vec![1, 2, 3]);
    }

    #[test]
    fn test_tx_failed_frame_skipped() {
        let pool = BufferPool::new(8).unwrap();
        let mut pkts = frames(&pool, 4);
        let mut writer = ScriptedWriter::new(vec![
            Ok(()),
            Err(io::Error::from_raw_os_error(libc::EINVAL)),
            Ok(()),
            Ok(()),
        ]);

        // Later frames still go out, the failed one stays with the caller
        assert_eq!(write_burst(&mut writer, &mut pkts), 3);
        assert_eq!(writer.written, vec![0, 2, 3]);
        assert_eq!(markers(&pkts), vec![1]);
    }

    #[test]
    fn test_tx_failed_frame_then_would_block() {
        let pool = BufferPool::new(8).unwrap();
        let mut pkts = frames(&pool, 4);
        let mut writer = ScriptedWriter::new(vec![
            Err(io::Error::from_raw_os_error(libc::EINVAL)),
            Ok(()),
            Err(io::ErrorKind::WouldBlock.into()),
        ]);

        assert_eq!(write_burst(&mut writer, &mut pkts), 1);
        assert_eq!(markers(&pkts), vec![0, 2, 3]);
    }
}
