//! Shared harness: a daemon running in a temp socket directory plus a
//! one-shot JSON-RPC client against it.

#![allow(dead_code)]

use resmon_daemon::{Daemon, DaemonError, Mode};
use resmon_ipc::sock::CliSocket;
use serde_json::Value;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub struct TestDaemon {
    pub dir: TempDir,
    pub handle: JoinHandle<Result<(), DaemonError>>,
}

impl TestDaemon {
    pub fn start(mode: Mode) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::new(dir.path(), mode).unwrap();
        let handle = tokio::spawn(daemon.run());
        TestDaemon { dir, handle }
    }

    /// Send one request datagram and wait for the reply.
    pub async fn call(&self, request: &Value) -> Value {
        let cli = CliSocket::open(self.dir.path()).unwrap();
        cli.send(&serde_json::to_vec(request).unwrap()).await.unwrap();
        serde_json::from_slice(&cli.recv().await.unwrap()).unwrap()
    }

    /// Same, for requests that are not valid JSON.
    pub async fn call_raw(&self, request: &[u8]) -> Value {
        let cli = CliSocket::open(self.dir.path()).unwrap();
        cli.send(request).await.unwrap();
        serde_json::from_slice(&cli.recv().await.unwrap()).unwrap()
    }
}

/// Error member of a response, as (code, message, data).
pub fn error_parts(response: &Value) -> (i64, String, Option<Value>) {
    let error = response
        .get("error")
        .unwrap_or_else(|| panic!("not an error response: {response}"));
    (
        error["code"].as_i64().unwrap(),
        error["message"].as_str().unwrap().to_owned(),
        error.get("data").cloned(),
    )
}

/// A minimal RALUE write EMAD: IPv4 `10.0.0.0/24` in the given VRF.
pub fn ralue_v4_emad(virtual_router: u16) -> Vec<u8> {
    let mut reg = vec![0u8; 28];
    reg[4..6].copy_from_slice(&virtual_router.to_be_bytes());
    reg[11] = 24;
    reg[24..28].copy_from_slice(&[10, 0, 0, 0]);
    emad(0x8013, &reg)
}

pub fn emad(reg_id: u16, reg_payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    // Operation TLV: type 1, 4 words.
    out.extend_from_slice(&(1u16 << 11 | 4).to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&reg_id.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&0u64.to_be_bytes());
    // Register TLV.
    let units = ((4 + reg_payload.len()) / 4) as u16;
    out.extend_from_slice(&(3u16 << 11 | units).to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(reg_payload);
    out
}
