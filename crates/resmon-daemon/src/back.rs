//! Source adapters: where EMAD buffers come from.
//!
//! The `hw` adapter drains raw EMAD records from a datagram socket fed by
//! the kernel-side collector; the `mock` adapter takes hex payloads over the
//! `emad` RPC method instead. Both feed the same decoder and differ only in
//! the capability set the event loop sees.

use std::io;
use std::path::Path;

use resmon_ipc::jrpc;
use resmon_stat::Stat;
use serde_json::Value;
use tokio::net::UnixDatagram;

/// Largest EMAD record the hw socket will accept. Generously above the
/// device's maximum EMAD frame.
const EMAD_MAX_LEN: usize = 4096;

/// Capacity reported in mock mode, where there is no device to ask.
const MOCK_CAPACITY: u64 = 10000;

const EMAD_SOCK_NAME: &str = "resmon.emad";

/// Which adapter backs the daemon.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Hw,
    Mock,
}

pub enum Backend {
    Hw(HwBackend),
    Mock(MockBackend),
}

impl Backend {
    pub fn new(mode: Mode, sockdir: &Path) -> io::Result<Self> {
        match mode {
            Mode::Hw => Ok(Backend::Hw(HwBackend::bind(sockdir)?)),
            Mode::Mock => Ok(Backend::Mock(MockBackend)),
        }
    }

    /// Resolves once the adapter's fd is readable; pends forever for
    /// adapters that have no fd to poll.
    pub async fn readable(&self) -> io::Result<()> {
        match self {
            Backend::Hw(hw) => hw.sock.readable().await,
            Backend::Mock(_) => std::future::pending().await,
        }
    }

    /// Drain everything the source has pending into the decoder.
    pub fn activity(&mut self, stat: &mut Stat) -> io::Result<()> {
        match self {
            Backend::Hw(hw) => hw.drain(stat),
            Backend::Mock(_) => Ok(()),
        }
    }

    pub fn capacity(&self) -> Result<u64, resmon_dl::DlError> {
        match self {
            Backend::Hw(_) => resmon_dl::kvd_capacity(),
            Backend::Mock(_) => Ok(MOCK_CAPACITY),
        }
    }

    /// Adapter-specific RPC methods. `None` means the method is not ours
    /// and the caller should report it unknown.
    pub fn handle_method(
        &self,
        stat: &mut Stat,
        method: &str,
        params: Option<&Value>,
        id: &Value,
    ) -> Option<Value> {
        match (self, method) {
            (Backend::Mock(mock), "emad") => Some(mock.handle_emad(stat, params, id)),
            _ => None,
        }
    }
}

pub struct HwBackend {
    sock: UnixDatagram,
    buf: Vec<u8>,
    decode_errors: u64,
}

impl HwBackend {
    fn bind(sockdir: &Path) -> io::Result<Self> {
        let path = sockdir.join(EMAD_SOCK_NAME);
        let _ = std::fs::remove_file(&path);
        let sock = UnixDatagram::bind(&path)?;
        Ok(HwBackend {
            sock,
            buf: vec![0u8; EMAD_MAX_LEN],
            decode_errors: 0,
        })
    }

    fn drain(&mut self, stat: &mut Stat) -> io::Result<()> {
        loop {
            match self.sock.try_recv(&mut self.buf) {
                Ok(len) => {
                    if let Err(err) = resmon_reg::process_emad(stat, &self.buf[..len]) {
                        self.decode_errors += 1;
                        tracing::warn!(
                            error = %err,
                            total = self.decode_errors,
                            "failed to process EMAD"
                        );
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }
}

pub struct MockBackend;

impl MockBackend {
    fn handle_emad(&self, stat: &mut Stat, params: Option<&Value>, id: &Value) -> Value {
        let payload = match jrpc::dissect_params_emad(params) {
            Ok(payload) => payload,
            Err(err) => {
                return jrpc::error_response(
                    id,
                    jrpc::INVALID_PARAMS,
                    "Invalid parameters",
                    Some(&err.0),
                );
            }
        };

        let bytes = match hex::decode(&payload) {
            Ok(bytes) => bytes,
            Err(_) => {
                return jrpc::error_response(
                    id,
                    jrpc::INVALID_PARAMS,
                    "Invalid parameters",
                    Some("Payload expected in hexdump format"),
                );
            }
        };

        match resmon_reg::process_emad(stat, &bytes) {
            Ok(()) => jrpc::result_response(id, Value::Null),
            Err(err) => jrpc::error_response(
                id,
                jrpc::EMAD_FAILURE,
                "EMAD processing error",
                Some(&err.to_string()),
            ),
        }
    }
}
