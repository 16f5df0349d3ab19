//! Minimal sd_notify: report readiness to the service manager when
//! `$NOTIFY_SOCKET` is set. Failures are logged and otherwise ignored; the
//! daemon works the same without a supervisor.

use std::env;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixDatagram};

pub fn ready() {
    let Ok(path) = env::var("NOTIFY_SOCKET") else {
        return;
    };

    let result = (|| {
        let sock = UnixDatagram::unbound()?;
        if let Some(abstract_name) = path.strip_prefix('@') {
            let addr = SocketAddr::from_abstract_name(abstract_name.as_bytes())?;
            sock.send_to_addr(b"READY=1", &addr)?;
        } else {
            sock.send_to(b"READY=1", &path)?;
        }
        Ok::<_, std::io::Error>(())
    })();

    if let Err(err) = result {
        tracing::debug!(error = %err, "failed to notify readiness");
    }
}
