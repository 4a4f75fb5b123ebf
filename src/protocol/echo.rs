//! A toy echo protocol: bounces whatever it reads straight back to the
//! peer. Used by the demo binary and the integration tests to exercise
//! the full accept -> read -> write -> close -> reclaim lifecycle over
//! real loopback TCP sockets. Not part of the DCB core's specification —
//! see SPEC_FULL.md §10.5.

use std::net::{Ipv4Addr, Ipv6Addr, TcpStream, ToSocketAddrs};
use std::os::fd::IntoRawFd;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::buffer::BufferChain;
use crate::dcb::{Dcb, DcbRole};
use crate::error::{DcbError, DcbResult, Progress};
use crate::poller::Poller;
use crate::protocol::{Protocol, ServerRef};
use crate::session::Session;

#[derive(Debug, Default)]
pub struct EchoProtocol;

impl EchoProtocol {
    pub fn new() -> Self {
        Self
    }

    fn set_nonblocking(fd: i32) -> DcbResult<()> {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
        if flags < 0 {
            return Err(DcbError::Io { fd, source: std::io::Error::last_os_error() });
        }
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(DcbError::Io { fd, source: std::io::Error::last_os_error() });
        }
        Ok(())
    }
}

impl Protocol for EchoProtocol {
    fn connect(&self, dcb: &Dcb, server: &ServerRef, session: &Arc<dyn Session>, poller: &dyn Poller) -> Option<i32> {
        let addr = (server.host.as_str(), server.port).to_socket_addrs().ok()?.next()?;
        let stream = TcpStream::connect(addr).ok()?;
        let fd = stream.into_raw_fd();
        if let Err(e) = Self::set_nonblocking(fd) {
            warn!(error = %e, "failed to set connect socket non-blocking");
            unsafe { libc::close(fd) };
            return None;
        }
        dcb.set_fd(fd);
        dcb.set_remote(format!("{addr}"));
        if session.link_dcb(fd) == crate::session::LinkOutcome::SessionRemoved {
            unsafe { libc::close(fd) };
            return None;
        }
        if let Err(e) = poller.add(dcb) {
            warn!(fd, error = %e, "failed to register outbound connection with poller");
            return None;
        }
        debug!(fd, remote = %addr, "echo protocol connected outbound");
        Some(fd)
    }

    fn accept(&self, listener: &Dcb, poller: &dyn Poller, self_handle: Arc<dyn Protocol>) -> Option<Arc<Dcb>> {
        let listen_fd = listener.fd();
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let fd = unsafe {
            libc::accept4(
                listen_fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
                libc::SOCK_NONBLOCK,
            )
        };
        if fd < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK => {
                    trace!(listen_fd, "no pending connection to accept");
                }
                _ => warn!(listen_fd, error = %err, "accept4 failed"),
            }
            return None;
        }

        let remote = sockaddr_to_string(&storage);

        let new_dcb = Dcb::new(DcbRole::RequestHandler, self_handle);
        new_dcb.set_fd(fd);
        new_dcb.set_remote(remote.clone());
        if let Err(e) = poller.add(&new_dcb) {
            warn!(fd, error = %e, "failed to register accepted connection with poller");
            unsafe { libc::close(fd) };
            return None;
        }
        let (ok, _) = new_dcb.set_state(crate::state::DcbState::Polling);
        if !ok {
            warn!(fd, "accepted dcb failed to enter polling state");
        }
        new_dcb.stats().inc_accepts();
        debug!(fd, remote, "echo protocol accepted inbound connection");
        Some(new_dcb)
    }

    fn read(&self, dcb: &Dcb) -> DcbResult<()> {
        let mut head = BufferChain::new();
        match dcb.read(&mut head)? {
            Progress::Made(n) if n > 0 => {
                trace!(fd = dcb.fd(), n, "echo read, bouncing back");
                self.write(dcb, head)
            }
            Progress::Made(_) | Progress::WouldBlock => Ok(()),
            Progress::PeerClosed => Err(DcbError::Io {
                fd: dcb.fd(),
                source: std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
            }),
        }
    }

    fn write(&self, dcb: &Dcb, data: BufferChain) -> DcbResult<()> {
        dcb.write(data)
    }

    fn close(&self, dcb: &Dcb) {
        debug!(fd = dcb.fd(), "echo protocol close callback");
    }

    fn hangup(&self, dcb: &Dcb) {
        debug!(fd = dcb.fd(), "echo protocol hangup callback");
    }

    fn error(&self, dcb: &Dcb) {
        warn!(fd = dcb.fd(), "echo protocol error callback");
    }
}

/// Format the peer address `accept4` wrote into `storage`. Only
/// `AF_INET`/`AF_INET6` are understood; anything else yields `"unknown"`.
fn sockaddr_to_string(storage: &libc::sockaddr_storage) -> String {
    match storage.ss_family as i32 {
        libc::AF_INET => {
            let addr: &libc::sockaddr_in = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);
            format!("{ip}:{port}")
        }
        libc::AF_INET6 => {
            let addr: &libc::sockaddr_in6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);
            format!("[{ip}]:{port}")
        }
        _ => "unknown".to_string(),
    }
}
