//! The control server: a single-threaded event loop over the RPC socket and
//! the adapter fd, dispatching JSON-RPC methods against the stat store.

use std::io;
use std::path::{Path, PathBuf};

use resmon_ipc::jrpc;
use resmon_ipc::sock::CtlSocket;
use resmon_stat::{Counter, Stat};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};

use crate::back::{Backend, Mode};
use crate::notify;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to bind control socket: {0}")]
    BindCtl(#[source] io::Error),
    #[error("failed to bind EMAD socket: {0}")]
    BindEmad(#[source] io::Error),
    #[error("failed to set up signal handling: {0}")]
    Signals(#[source] io::Error),
    #[error("control socket failure: {0}")]
    CtlIo(#[source] io::Error),
    #[error("EMAD source failure: {0}")]
    SourceIo(#[source] io::Error),
}

/// A bound daemon, ready to run. Binding is split from running so callers
/// know the control socket exists before they start talking to it.
pub struct Daemon {
    stat: Stat,
    back: Backend,
    ctl: CtlSocket,
    should_quit: bool,
}

impl Daemon {
    pub fn new(sockdir: &Path, mode: Mode) -> Result<Self, DaemonError> {
        let back = Backend::new(mode, sockdir).map_err(DaemonError::BindEmad)?;
        let ctl = CtlSocket::bind(sockdir).map_err(DaemonError::BindCtl)?;
        Ok(Daemon {
            stat: Stat::new(),
            back,
            ctl,
            should_quit: false,
        })
    }

    pub fn ctl_path(&self) -> PathBuf {
        self.ctl.path().to_path_buf()
    }

    /// Serve until a termination signal or the `stop` method arrives.
    pub async fn run(mut self) -> Result<(), DaemonError> {
        let mut sigint = signal(SignalKind::interrupt()).map_err(DaemonError::Signals)?;
        let mut sigquit = signal(SignalKind::quit()).map_err(DaemonError::Signals)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(DaemonError::Signals)?;

        notify::ready();
        tracing::info!(path = %self.ctl.path().display(), "listening");

        while !self.should_quit {
            tokio::select! {
                recv = self.ctl.recv() => {
                    let (request, peer) = recv.map_err(DaemonError::CtlIo)?;
                    self.handle_request(&request, peer.as_deref()).await;
                }
                ready = self.back.readable() => {
                    ready.map_err(DaemonError::SourceIo)?;
                    self.back
                        .activity(&mut self.stat)
                        .map_err(DaemonError::SourceIo)?;
                }
                _ = sigint.recv() => self.quit(),
                _ = sigquit.recv() => self.quit(),
                _ = sigterm.recv() => self.quit(),
            }
        }

        Ok(())
    }

    fn quit(&mut self) {
        tracing::debug!("quitting");
        self.should_quit = true;
    }

    async fn handle_request(&mut self, request: &[u8], peer: Option<&Path>) {
        let Some(peer) = peer else {
            tracing::warn!("request from an unbound client, cannot reply");
            return;
        };

        let response = self.response_for(request);
        match serde_json::to_vec(&response) {
            Ok(bytes) => {
                if let Err(err) = self.ctl.send_to(&bytes, peer).await {
                    tracing::warn!(peer = %peer.display(), error = %err, "failed to reply");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to serialize reply"),
        }
    }

    fn response_for(&mut self, request: &[u8]) -> Value {
        let Ok(value) = serde_json::from_slice::<Value>(request) else {
            return jrpc::error_response(&Value::Null, jrpc::INVALID_REQUEST, "Invalid request", None);
        };

        let req = match jrpc::dissect_request(&value) {
            Ok(req) => req,
            Err(err) => {
                return jrpc::error_response(
                    &Value::Null,
                    jrpc::INVALID_REQUEST,
                    "Invalid request",
                    Some(&err.0),
                );
            }
        };

        match req.method.as_str() {
            "ping" => jrpc::result_response(&req.id, req.params.unwrap_or(Value::Null)),
            "stop" => self.handle_stop(&req),
            "stats" => self.handle_stats(&req),
            method => {
                let Daemon { stat, back, .. } = self;
                match back.handle_method(stat, method, req.params.as_ref(), &req.id) {
                    Some(response) => response,
                    None => jrpc::error_response(
                        &req.id,
                        jrpc::METHOD_NOT_FOUND,
                        "Method not found",
                        Some(method),
                    ),
                }
            }
        }
    }

    fn handle_stop(&mut self, req: &jrpc::Request) -> Value {
        if let Err(err) = jrpc::dissect_params_empty(req.params.as_ref()) {
            return jrpc::error_response(
                &req.id,
                jrpc::INVALID_PARAMS,
                "Invalid parameters",
                Some(&err.0),
            );
        }

        // Quit is flagged before the reply goes out; the loop finishes this
        // request and then exits.
        self.quit();
        jrpc::result_response(&req.id, json!(true))
    }

    fn handle_stats(&mut self, req: &jrpc::Request) -> Value {
        if let Err(err) = jrpc::dissect_params_empty(req.params.as_ref()) {
            return jrpc::error_response(
                &req.id,
                jrpc::INVALID_PARAMS,
                "Invalid parameters",
                Some(&err.0),
            );
        }

        let capacity = match self.back.capacity() {
            Ok(capacity) => capacity,
            Err(err) => {
                return jrpc::error_response(
                    &req.id,
                    jrpc::CAPACITY_FAILURE,
                    "Issue while retrieving capacity",
                    Some(&err.to_string()),
                );
            }
        };

        let counters = self.stat.counters();
        let mut rows = Vec::with_capacity(Counter::COUNT + 1);
        for kind in Counter::ALL {
            rows.push(json!({
                "name": kind.name(),
                "descr": kind.description(),
                "value": counters.get(kind),
                "capacity": capacity,
            }));
        }
        rows.push(json!({
            "name": "TOTAL",
            "descr": "Total",
            "value": counters.total,
            "capacity": capacity,
        }));

        jrpc::result_response(&req.id, json!({ "counters": rows }))
    }
}
