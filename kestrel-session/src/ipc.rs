//! The ClientAgent IPC endpoint (§6): UNIX-domain socket framing, the
//! `CommitAck`/focus/layout notifications kestrel's commit paths send back
//! over the wire, and the accept loop that turns a listening socket into one
//! `ClientConnection` per connecting process.
//!
//! §1 explicitly places "the IPC wire format and client-agent protocol
//! parsing" outside the core (collaborator: *ClientAgent*) — this module
//! *is* that collaborator's implementation, grounded in the framing spec.md
//! §6 gives verbatim: an 8-byte length prefix, a `flag_bits` sub-command
//! bitset, and a TLV body; SCM_RIGHTS carries fds for buffer-create
//! messages. Sockets are non-blocking throughout (§5: "every I/O is
//! non-blocking; read/write use MSG_DONTWAIT and loop on EAGAIN").

use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};

use bitflags::bitflags;
use kestrel::client_agent::{ClientAgent, CommitAck};
use kestrel::{Buffer, View};

bitflags! {
    /// §6 `flag_bits`: which sub-commands this message carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u32 {
        const CREATE_SURFACE        = 1 << 0;
        const CREATE_VIEW           = 1 << 1;
        const CREATE_BO             = 1 << 2;
        const COMMIT                = 1 << 3;
        const BO_COMPLETE           = 1 << 4;
        const BO_FLIPPED            = 1 << 5;
        const HOTPLUG               = 1 << 6;
        const MOUSE_CURSOR_COMMIT   = 1 << 7;
        const SHELL                 = 1 << 8;
    }
}

/// A single `cb_tlv { u32 tag; u32 length; u8 payload[] }` entry.
#[derive(Debug, Clone)]
pub struct Tlv {
    pub tag: u32,
    pub payload: Vec<u8>,
}

impl Tlv {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
    }

    pub fn decode(buf: &[u8]) -> Option<(Tlv, usize)> {
        if buf.len() < 8 {
            return None;
        }
        let tag = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        let length = u32::from_le_bytes(buf[4..8].try_into().ok()?) as usize;
        let total = 8 + length;
        if buf.len() < total {
            return None;
        }
        Some((
            Tlv {
                tag,
                payload: buf[8..total].to_vec(),
            },
            total,
        ))
    }
}

/// `CB_TAG_WIN` envelope tag and the offset-map TLV that immediately follows
/// the envelope header, locating each present sub-command by byte offset
/// (§6: "Each sub-command is itself a TLV within a CB_TAG_WIN envelope,
/// reached via a fixed offset-map TLV placed immediately after the envelope
/// header").
pub const TAG_WIN: u32 = 0x57_49_4e_00; // "WIN\0"
pub const TAG_OFFSET_MAP: u32 = 0x4f_46_46_00; // "OFF\0"

/// A decoded message: the sub-command flags present plus the raw TLVs found
/// after the offset map, in wire order.
#[derive(Debug)]
pub struct Message {
    pub flags: CommandFlags,
    pub tlvs: Vec<Tlv>,
    /// File descriptors carried alongside this message via `SCM_RIGHTS`
    /// (DMA-BUF/SHM create sub-commands attach their buffer fds here).
    pub fds: Vec<OwnedFd>,
}

/// Per-client IPC endpoint, owning one non-blocking `UnixStream`. Implements
/// [`ClientAgent`] so `kestrel`'s commit paths can notify this client
/// without knowing anything about the wire format.
pub struct ClientConnection {
    stream: UnixStream,
    read_buf: Vec<u8>,
    write_queue: VecDeque<Vec<u8>>,
}

impl ClientConnection {
    pub fn new(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(ClientConnection {
            stream,
            read_buf: Vec::new(),
            write_queue: VecDeque::new(),
        })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Pumps non-blocking reads into the internal buffer and decodes as many
    /// complete framed messages as are available, looping on `EAGAIN` per §5.
    pub fn poll_messages(&mut self) -> io::Result<Vec<Message>> {
        let mut messages = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match recv_with_fds(&self.stream, &mut chunk) {
                // Peer closed; caller treats this as fatal (§7) and drops
                // the connection rather than spinning on a 0-byte read.
                Ok((0, _)) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok((n, fds)) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    self.drain_frames(&mut messages, fds);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(messages)
    }

    fn drain_frames(&mut self, out: &mut Vec<Message>, mut fds: Vec<OwnedFd>) {
        loop {
            if self.read_buf.len() < 12 {
                return;
            }
            let total_length = u64::from_le_bytes(self.read_buf[0..8].try_into().unwrap()) as usize;
            if self.read_buf.len() < total_length {
                return;
            }
            let flags = CommandFlags::from_bits_truncate(u32::from_le_bytes(self.read_buf[8..12].try_into().unwrap()));
            let mut tlvs = Vec::new();
            let mut offset = 12;
            while offset < total_length {
                match Tlv::decode(&self.read_buf[offset..total_length]) {
                    Some((tlv, consumed)) => {
                        offset += consumed;
                        tlvs.push(tlv);
                    }
                    None => break,
                }
            }
            out.push(Message {
                flags,
                tlvs,
                fds: std::mem::take(&mut fds),
            });
            self.read_buf.drain(0..total_length);
        }
    }

    /// Queues a framed message for write and flushes what it can
    /// immediately; anything left is drained on the next writable
    /// readiness (§5 back-pressure: clients see commit acks promptly, but
    /// the socket write itself never blocks the event loop).
    fn send_frame(&mut self, flags: CommandFlags, tlvs: &[Tlv]) {
        let mut body = Vec::new();
        for tlv in tlvs {
            tlv.encode(&mut body);
        }
        let mut frame = Vec::with_capacity(12 + body.len());
        frame.extend_from_slice(&((12 + body.len()) as u64).to_le_bytes());
        frame.extend_from_slice(&flags.bits().to_le_bytes());
        frame.extend_from_slice(&body);
        self.write_queue.push_back(frame);
        self.flush();
    }

    pub fn flush(&mut self) {
        use std::io::Write;
        while let Some(front) = self.write_queue.front_mut() {
            match self.stream.write(front) {
                Ok(n) if n == front.len() => {
                    self.write_queue.pop_front();
                }
                Ok(n) => {
                    front.drain(0..n);
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.write_queue.clear();
                    break;
                }
            }
        }
    }
}

impl AsFd for ClientConnection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl ClientAgent for ClientConnection {
    fn send_bo_flipped(&mut self, buffer: &Buffer) {
        let tlv = Tlv {
            tag: TAG_WIN,
            payload: (buffer.ref_cnt() as u64).to_le_bytes().to_vec(),
        };
        self.send_frame(CommandFlags::BO_FLIPPED, &[tlv]);
    }

    fn send_bo_complete(&mut self, buffer: &Buffer) {
        let tlv = Tlv {
            tag: TAG_WIN,
            payload: (buffer.ref_cnt() as u64).to_le_bytes().to_vec(),
        };
        self.send_frame(CommandFlags::BO_COMPLETE, &[tlv]);
    }

    fn send_commit_ack(&mut self, ack: CommitAck) {
        let (flags, value) = match ack {
            CommitAck::Ok(id) => (CommandFlags::COMMIT, id),
            CommitAck::Failed => (CommandFlags::COMMIT, CommitAck::FAILED_SENTINEL),
            CommitAck::Replace => (CommandFlags::COMMIT, 0),
        };
        let tlv = Tlv {
            tag: TAG_WIN,
            payload: value.to_le_bytes().to_vec(),
        };
        self.send_frame(flags, &[tlv]);
    }

    fn send_view_focus_changed(&mut self, _view: &View, gained: bool) {
        let tlv = Tlv {
            tag: TAG_WIN,
            payload: vec![gained as u8],
        };
        self.send_frame(CommandFlags::SHELL, &[tlv]);
    }

    fn send_layout_changed(&mut self) {
        self.send_frame(CommandFlags::SHELL, &[]);
    }
}

/// Accepts new connections on the well-known seat socket (§6 socket path
/// convention), handing each a non-blocking `UnixConnection`.
pub struct Listener {
    listener: UnixListener,
}

impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.listener.as_fd()
    }
}

impl Listener {
    pub fn bind(path: &std::path::Path) -> io::Result<Self> {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        Ok(Listener { listener })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    /// Accepts every pending connection, looping on `EAGAIN` (§5).
    pub fn accept_all(&self) -> io::Result<Vec<ClientConnection>> {
        let mut accepted = Vec::new();
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => accepted.push(ClientConnection::new(stream)?),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(accepted)
    }
}

/// `recvmsg` with `MSG_DONTWAIT` plus `SCM_RIGHTS` ancillary data collection,
/// since DMA-BUF/SHM create sub-commands attach buffer fds this way (§6).
fn recv_with_fds(stream: &UnixStream, buf: &mut [u8]) -> io::Result<(usize, Vec<OwnedFd>)> {
    use rustix::net::{RecvAncillaryBuffer, RecvAncillaryMessage, RecvFlags};

    let mut space = [std::mem::MaybeUninit::uninit(); 256];
    let mut cmsg = RecvAncillaryBuffer::new(&mut space);
    let iov = [std::io::IoSliceMut::new(buf)];
    let mut iov = iov;
    let result = rustix::net::recvmsg(stream, &mut iov, &mut cmsg, RecvFlags::DONTWAIT)
        .map_err(|errno| io::Error::from_raw_os_error(errno.raw_os_error()))?;

    let mut fds = Vec::new();
    for msg in cmsg.drain() {
        if let RecvAncillaryMessage::ScmRights(received) = msg {
            fds.extend(received);
        }
    }
    Ok((result.bytes, fds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlv_round_trips_through_encode_decode() {
        let tlv = Tlv {
            tag: TAG_WIN,
            payload: vec![1, 2, 3, 4],
        };
        let mut buf = Vec::new();
        tlv.encode(&mut buf);
        let (decoded, consumed) = Tlv::decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded.tag, tlv.tag);
        assert_eq!(decoded.payload, tlv.payload);
    }

    #[test]
    fn partial_tlv_does_not_decode() {
        let tlv = Tlv {
            tag: TAG_OFFSET_MAP,
            payload: vec![9; 16],
        };
        let mut buf = Vec::new();
        tlv.encode(&mut buf);
        buf.truncate(buf.len() - 4);
        assert!(Tlv::decode(&buf).is_none());
    }

    #[test]
    fn commit_failed_ack_carries_the_sentinel_value() {
        assert_eq!(CommitAck::FAILED_SENTINEL, u64::MAX);
    }
}
