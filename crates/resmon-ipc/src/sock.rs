//! Unix datagram sockets of the control plane.
//!
//! The daemon listens on `${sockdir}/resmon.ctl`; each client binds its own
//! `${sockdir}/resmon.cli.<pid>` so replies can be addressed back to it.
//! Paths are unlinked on drop, and a stale path is unlinked before bind so a
//! crashed predecessor does not wedge the next start.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tokio::net::UnixDatagram;

/// Largest request/reply datagram we are willing to handle.
pub const MAX_DGRAM_LEN: usize = 65536;

pub fn ctl_path(sockdir: &Path) -> PathBuf {
    sockdir.join("resmon.ctl")
}

pub fn cli_path(sockdir: &Path) -> PathBuf {
    sockdir.join(format!("resmon.cli.{}", std::process::id()))
}

fn bind_at(path: &Path) -> io::Result<UnixDatagram> {
    let _ = fs::remove_file(path);
    UnixDatagram::bind(path)
}

/// The daemon side of the control socket.
#[derive(Debug)]
pub struct CtlSocket {
    sock: UnixDatagram,
    path: PathBuf,
}

impl CtlSocket {
    pub fn bind(sockdir: &Path) -> io::Result<Self> {
        let path = ctl_path(sockdir);
        let sock = bind_at(&path)?;
        Ok(CtlSocket { sock, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Receive one request; the peer path is `None` for unbound senders,
    /// which cannot be replied to.
    pub async fn recv(&self) -> io::Result<(Vec<u8>, Option<PathBuf>)> {
        let mut buf = vec![0u8; MAX_DGRAM_LEN];
        let (len, addr) = self.sock.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, addr.as_pathname().map(Path::to_path_buf)))
    }

    pub async fn send_to(&self, bytes: &[u8], peer: &Path) -> io::Result<()> {
        self.sock.send_to(bytes, peer).await.map(|_| ())
    }
}

impl Drop for CtlSocket {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// The client side: bound to a per-process path and connected to the ctl
/// socket, so `send`/`recv` talk to the daemon only.
#[derive(Debug)]
pub struct CliSocket {
    sock: UnixDatagram,
    path: PathBuf,
}

impl CliSocket {
    pub fn open(sockdir: &Path) -> io::Result<Self> {
        let path = cli_path(sockdir);
        let sock = bind_at(&path)?;
        sock.connect(ctl_path(sockdir))?;
        Ok(CliSocket { sock, path })
    }

    pub async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.sock.send(bytes).await.map(|_| ())
    }

    pub async fn recv(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DGRAM_LEN];
        let len = self.sock.recv(&mut buf).await?;
        buf.truncate(len);
        Ok(buf)
    }
}

impl Drop for CliSocket {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
