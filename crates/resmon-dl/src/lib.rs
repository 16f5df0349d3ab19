//! Devlink capacity probe.
//!
//! One-shot query against the kernel's generic-netlink `devlink` family:
//! resolve the family id, scan the device info dump for the Spectrum driver,
//! then dump that device's resource tree and pull out the size of the `kvd`
//! descriptor pool. Messages are built and parsed by hand over a raw
//! `AF_NETLINK` socket; every length is bounds-checked.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;

use thiserror::Error;

const NLMSG_HDRLEN: usize = 16;
const GENL_HDRLEN: usize = 4;
const NLA_HDRLEN: usize = 4;
const NLA_TYPE_MASK: u16 = 0x3fff;

const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;

const NLM_F_REQUEST: u16 = 0x01;
const NLM_F_DUMP: u16 = 0x300;

const GENL_ID_CTRL: u16 = 0x10;
const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_ATTR_FAMILY_ID: u16 = 1;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;

const DEVLINK_FAMILY: &str = "devlink";
const DEVLINK_CMD_RESOURCE_DUMP: u8 = 36;
const DEVLINK_CMD_INFO_GET: u8 = 51;

const DEVLINK_ATTR_BUS_NAME: u16 = 1;
const DEVLINK_ATTR_DEV_NAME: u16 = 2;
const DEVLINK_ATTR_RESOURCE_LIST: u16 = 63;
const DEVLINK_ATTR_RESOURCE: u16 = 64;
const DEVLINK_ATTR_RESOURCE_NAME: u16 = 65;
const DEVLINK_ATTR_RESOURCE_SIZE: u16 = 67;
const DEVLINK_ATTR_INFO_DRIVER_NAME: u16 = 98;

const SPECTRUM_DRIVER: &str = "mlxsw_spectrum";
const KVD_RESOURCE: &str = "kvd";

#[derive(Debug, Error)]
pub enum DlError {
    #[error("failed to open netlink socket: {0}")]
    Socket(#[source] io::Error),
    #[error("failed to send netlink request: {0}")]
    Send(#[source] io::Error),
    #[error("failed to receive netlink response: {0}")]
    Recv(#[source] io::Error),
    #[error("netlink reported error {0}")]
    Kernel(i32),
    #[error("malformed netlink response")]
    Malformed,
    #[error("failed to resolve the devlink netlink family")]
    NoFamily,
    #[error("no {SPECTRUM_DRIVER} devlink device found")]
    NoDevice,
    #[error("device reports no \"{KVD_RESOURCE}\" resource")]
    NoKvdResource,
}

struct NlSocket {
    fd: RawFd,
}

impl NlSocket {
    fn open() -> Result<Self, DlError> {
        // SAFETY: plain socket/bind syscalls on an address struct we own.
        unsafe {
            let fd = libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_GENERIC,
            );
            if fd < 0 {
                return Err(DlError::Socket(io::Error::last_os_error()));
            }

            let mut sa: libc::sockaddr_nl = mem::zeroed();
            sa.nl_family = libc::AF_NETLINK as libc::sa_family_t;
            let rc = libc::bind(
                fd,
                &sa as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            );
            if rc < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(DlError::Socket(err));
            }

            Ok(NlSocket { fd })
        }
    }

    fn send(&self, msg: &[u8]) -> Result<(), DlError> {
        // SAFETY: the kernel address is zero-initialized (pid 0 = kernel).
        unsafe {
            let mut sa: libc::sockaddr_nl = mem::zeroed();
            sa.nl_family = libc::AF_NETLINK as libc::sa_family_t;
            let rc = libc::sendto(
                self.fd,
                msg.as_ptr().cast(),
                msg.len(),
                0,
                &sa as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            );
            if rc < 0 {
                return Err(DlError::Send(io::Error::last_os_error()));
            }
        }
        Ok(())
    }

    fn recv(&self) -> Result<Vec<u8>, DlError> {
        let mut buf = vec![0u8; 65536];
        // SAFETY: the buffer outlives the call and its length is passed.
        let len = unsafe { libc::recv(self.fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
        if len < 0 {
            return Err(DlError::Recv(io::Error::last_os_error()));
        }
        buf.truncate(len as usize);
        Ok(buf)
    }
}

impl Drop for NlSocket {
    fn drop(&mut self) {
        // SAFETY: fd is owned by this struct and closed exactly once.
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// A generic-netlink request under construction. The netlink length field
/// is patched in by `finish`.
struct GenlRequest {
    buf: Vec<u8>,
}

impl GenlRequest {
    fn new(family: u16, cmd: u8, flags: u16, seq: u32) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&0u32.to_ne_bytes()); // nlmsg_len, patched later
        buf.extend_from_slice(&family.to_ne_bytes());
        buf.extend_from_slice(&flags.to_ne_bytes());
        buf.extend_from_slice(&seq.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes()); // nlmsg_pid
        buf.push(cmd);
        buf.push(1); // genl version
        buf.extend_from_slice(&0u16.to_ne_bytes());
        GenlRequest { buf }
    }

    fn put_str(&mut self, ty: u16, value: &str) {
        let payload_len = value.len() + 1; // NUL-terminated
        let nla_len = (NLA_HDRLEN + payload_len) as u16;
        self.buf.extend_from_slice(&nla_len.to_ne_bytes());
        self.buf.extend_from_slice(&ty.to_ne_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
        let padded = align4(self.buf.len());
        self.buf.resize(padded, 0);
    }

    fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[..4].copy_from_slice(&len.to_ne_bytes());
        self.buf
    }
}

struct NlMsg<'a> {
    ty: u16,
    payload: &'a [u8],
}

/// Split a receive buffer into netlink messages.
fn parse_msgs(buf: &[u8]) -> Result<Vec<NlMsg<'_>>, DlError> {
    let mut msgs = Vec::new();
    let mut rest = buf;
    while !rest.is_empty() {
        if rest.len() < NLMSG_HDRLEN {
            return Err(DlError::Malformed);
        }
        let len = u32::from_ne_bytes(rest[0..4].try_into().unwrap()) as usize;
        let ty = u16::from_ne_bytes(rest[4..6].try_into().unwrap());
        if len < NLMSG_HDRLEN || len > rest.len() {
            return Err(DlError::Malformed);
        }
        msgs.push(NlMsg {
            ty,
            payload: &rest[NLMSG_HDRLEN..len],
        });
        rest = &rest[align4(len).min(rest.len())..];
    }
    Ok(msgs)
}

/// Split an attribute stream into `(type, value)` pairs.
fn parse_attrs(buf: &[u8]) -> Result<Vec<(u16, &[u8])>, DlError> {
    let mut attrs = Vec::new();
    let mut rest = buf;
    while !rest.is_empty() {
        if rest.len() < NLA_HDRLEN {
            return Err(DlError::Malformed);
        }
        let len = u16::from_ne_bytes(rest[0..2].try_into().unwrap()) as usize;
        let ty = u16::from_ne_bytes(rest[2..4].try_into().unwrap()) & NLA_TYPE_MASK;
        if len < NLA_HDRLEN || len > rest.len() {
            return Err(DlError::Malformed);
        }
        attrs.push((ty, &rest[NLA_HDRLEN..len]));
        rest = &rest[align4(len).min(rest.len())..];
    }
    Ok(attrs)
}

fn attr_str(value: &[u8]) -> Option<&str> {
    let bytes = value.strip_suffix(&[0]).unwrap_or(value);
    std::str::from_utf8(bytes).ok()
}

fn attr_u16(value: &[u8]) -> Option<u16> {
    Some(u16::from_ne_bytes(value.get(..2)?.try_into().ok()?))
}

fn attr_u64(value: &[u8]) -> Option<u64> {
    Some(u64::from_ne_bytes(value.get(..8)?.try_into().ok()?))
}

fn check_error(msg: &NlMsg<'_>) -> Result<(), DlError> {
    if msg.ty != NLMSG_ERROR {
        return Ok(());
    }
    let errno = msg
        .payload
        .get(..4)
        .map(|b| i32::from_ne_bytes(b.try_into().unwrap()))
        .ok_or(DlError::Malformed)?;
    if errno == 0 {
        Ok(())
    } else {
        Err(DlError::Kernel(errno))
    }
}

fn resolve_devlink_family(sock: &NlSocket) -> Result<u16, DlError> {
    let mut req = GenlRequest::new(GENL_ID_CTRL, CTRL_CMD_GETFAMILY, NLM_F_REQUEST, 1);
    req.put_str(CTRL_ATTR_FAMILY_NAME, DEVLINK_FAMILY);
    sock.send(&req.finish())?;

    let buf = sock.recv()?;
    for msg in parse_msgs(&buf)? {
        check_error(&msg)?;
        if msg.ty != GENL_ID_CTRL {
            continue;
        }
        let payload = msg.payload.get(GENL_HDRLEN..).ok_or(DlError::Malformed)?;
        for (ty, value) in parse_attrs(payload)? {
            if ty == CTRL_ATTR_FAMILY_ID {
                return attr_u16(value).ok_or(DlError::Malformed);
            }
        }
    }
    Err(DlError::NoFamily)
}

/// Scan the devlink info dump for the first device bound to the Spectrum
/// driver; returns its bus and device names.
fn find_spectrum_device(sock: &NlSocket, family: u16) -> Result<(String, String), DlError> {
    let req = GenlRequest::new(
        family,
        DEVLINK_CMD_INFO_GET,
        NLM_F_REQUEST | NLM_F_DUMP,
        2,
    );
    sock.send(&req.finish())?;

    let mut found = None;
    'outer: loop {
        let buf = sock.recv()?;
        for msg in parse_msgs(&buf)? {
            check_error(&msg)?;
            if msg.ty == NLMSG_DONE {
                break 'outer;
            }
            if msg.ty != family || found.is_some() {
                continue;
            }
            let payload = msg.payload.get(GENL_HDRLEN..).ok_or(DlError::Malformed)?;
            let mut bus = None;
            let mut dev = None;
            let mut driver = None;
            for (ty, value) in parse_attrs(payload)? {
                match ty {
                    DEVLINK_ATTR_BUS_NAME => bus = attr_str(value),
                    DEVLINK_ATTR_DEV_NAME => dev = attr_str(value),
                    DEVLINK_ATTR_INFO_DRIVER_NAME => driver = attr_str(value),
                    _ => {}
                }
            }
            if let (Some(bus), Some(dev), Some(driver)) = (bus, dev, driver) {
                if driver.contains(SPECTRUM_DRIVER) {
                    tracing::debug!(bus, dev, driver, "matched devlink device");
                    found = Some((bus.to_owned(), dev.to_owned()));
                }
            }
        }
    }

    found.ok_or(DlError::NoDevice)
}

/// Recursive walk of the nested resource tree looking for `kvd`.
fn search_kvd_size(nested: &[u8]) -> Result<Option<u64>, DlError> {
    let attrs = parse_attrs(nested)?;

    let name = attrs
        .iter()
        .find(|(ty, _)| *ty == DEVLINK_ATTR_RESOURCE_NAME)
        .and_then(|(_, value)| attr_str(value));
    if name == Some(KVD_RESOURCE) {
        let size = attrs
            .iter()
            .find(|(ty, _)| *ty == DEVLINK_ATTR_RESOURCE_SIZE)
            .and_then(|(_, value)| attr_u64(value))
            .ok_or(DlError::Malformed)?;
        return Ok(Some(size));
    }

    for (ty, value) in attrs {
        if ty == DEVLINK_ATTR_RESOURCE || ty == DEVLINK_ATTR_RESOURCE_LIST {
            if let Some(size) = search_kvd_size(value)? {
                return Ok(Some(size));
            }
        }
    }
    Ok(None)
}

fn fetch_kvd_size(sock: &NlSocket, family: u16, bus: &str, dev: &str) -> Result<u64, DlError> {
    let mut req = GenlRequest::new(family, DEVLINK_CMD_RESOURCE_DUMP, NLM_F_REQUEST, 3);
    req.put_str(DEVLINK_ATTR_BUS_NAME, bus);
    req.put_str(DEVLINK_ATTR_DEV_NAME, dev);
    sock.send(&req.finish())?;

    let buf = sock.recv()?;
    for msg in parse_msgs(&buf)? {
        check_error(&msg)?;
        if msg.ty != family {
            continue;
        }
        let payload = msg.payload.get(GENL_HDRLEN..).ok_or(DlError::Malformed)?;
        for (ty, value) in parse_attrs(payload)? {
            if ty == DEVLINK_ATTR_RESOURCE_LIST {
                if let Some(size) = search_kvd_size(value)? {
                    return Ok(size);
                }
            }
        }
    }
    Err(DlError::NoKvdResource)
}

/// Size of the device's KVD descriptor pool, in slots.
pub fn kvd_capacity() -> Result<u64, DlError> {
    let sock = NlSocket::open()?;
    let family = resolve_devlink_family(&sock)?;
    let (bus, dev) = find_spectrum_device(&sock, family)?;
    fetch_kvd_size(&sock, family, &bus, &dev)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_attr(out: &mut Vec<u8>, ty: u16, payload: &[u8]) {
        let len = (NLA_HDRLEN + payload.len()) as u16;
        out.extend_from_slice(&len.to_ne_bytes());
        out.extend_from_slice(&ty.to_ne_bytes());
        out.extend_from_slice(payload);
        out.resize(align4(out.len()), 0);
    }

    fn str_attr_payload(s: &str) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.push(0);
        v
    }

    fn resource(name: &str, size: Option<u64>, children: &[u8]) -> Vec<u8> {
        let mut inner = Vec::new();
        push_attr(&mut inner, DEVLINK_ATTR_RESOURCE_NAME, &str_attr_payload(name));
        if let Some(size) = size {
            push_attr(&mut inner, DEVLINK_ATTR_RESOURCE_SIZE, &size.to_ne_bytes());
        }
        if !children.is_empty() {
            push_attr(&mut inner, DEVLINK_ATTR_RESOURCE_LIST, children);
        }
        let mut out = Vec::new();
        push_attr(&mut out, DEVLINK_ATTR_RESOURCE, &inner);
        out
    }

    #[test]
    fn attrs_roundtrip_with_padding() {
        let mut buf = Vec::new();
        push_attr(&mut buf, 7, b"abc");
        push_attr(&mut buf, 9, &42u64.to_ne_bytes());

        let attrs = parse_attrs(&buf).unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0], (7, &b"abc"[..]));
        assert_eq!(attr_u64(attrs[1].1), Some(42));
    }

    #[test]
    fn truncated_attr_is_malformed() {
        let mut buf = Vec::new();
        push_attr(&mut buf, 7, b"abcdef");
        assert!(parse_attrs(&buf[..buf.len() - 4]).is_err());
        assert!(parse_attrs(&[1]).is_err());
    }

    #[test]
    fn kvd_found_at_top_level() {
        let list = resource(KVD_RESOURCE, Some(524288), &[]);
        assert_eq!(search_kvd_size(&list).unwrap(), Some(524288));
    }

    #[test]
    fn kvd_found_in_nested_list() {
        let leaf = resource(KVD_RESOURCE, Some(1000), &[]);
        let mid = resource("linear", None, &leaf);
        let top = resource("unrelated", Some(7), &mid);
        assert_eq!(search_kvd_size(&top).unwrap(), Some(1000));
    }

    #[test]
    fn missing_kvd_yields_none() {
        let list = resource("span_agents", Some(3), &[]);
        assert_eq!(search_kvd_size(&list).unwrap(), None);
    }

    #[test]
    fn netlink_error_message_is_surfaced() {
        let mut buf = Vec::new();
        let errno = (-95i32).to_ne_bytes();
        let len = (NLMSG_HDRLEN + 4) as u32;
        buf.extend_from_slice(&len.to_ne_bytes());
        buf.extend_from_slice(&NLMSG_ERROR.to_ne_bytes());
        buf.extend_from_slice(&0u16.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&0u32.to_ne_bytes());
        buf.extend_from_slice(&errno);

        let msgs = parse_msgs(&buf).unwrap();
        assert!(matches!(check_error(&msgs[0]), Err(DlError::Kernel(-95))));
    }
}
