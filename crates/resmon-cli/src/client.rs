//! One-shot JSON-RPC client used by the control subcommands.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use resmon_ipc::jrpc;
use resmon_ipc::sock::CliSocket;
use serde_json::{json, Value};

const REQUEST_ID: i64 = 1;

pub struct Client {
    sock: CliSocket,
}

impl Client {
    pub fn connect(sockdir: &Path) -> Result<Self> {
        let sock = CliSocket::open(sockdir).with_context(|| {
            format!("failed to open a client socket in {}", sockdir.display())
        })?;
        Ok(Client { sock })
    }

    /// Send one request and validate the reply envelope. Error replies are
    /// rendered as `Error <code>: <message> (<data>)`.
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let request = jrpc::request(REQUEST_ID, method, params);
        self.sock
            .send(&serde_json::to_vec(&request)?)
            .await
            .context("failed to send the RPC message")?;

        let raw = self
            .sock
            .recv()
            .await
            .context("failed to receive an RPC response")?;
        let value: Value =
            serde_json::from_slice(&raw).context("failed to parse the RPC response as JSON")?;
        let response = jrpc::dissect_response(&value)
            .map_err(|err| anyhow!("invalid response object: {err}"))?;

        if response.id != json!(REQUEST_ID) {
            bail!("unknown response ID: {}", response.id);
        }

        if response.is_error {
            let error = jrpc::dissect_error(&response.payload)
                .map_err(|err| anyhow!("invalid error object: {err}"))?;
            match error.data {
                Some(data) => bail!("Error {}: {} ({data})", error.code, error.message),
                None => bail!("Error {}: {}", error.code, error.message),
            }
        }

        Ok(response.payload)
    }

    /// Round-trip a random token and insist on getting it back.
    pub async fn ping(&self) -> Result<()> {
        let token = rand::random::<u32>();
        let result = self.call("ping", Some(json!(token))).await?;
        if result != json!(token) {
            bail!("unexpected ping response: sent {token}, got {result}");
        }
        tracing::info!("resmond is alive");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let result = self.call("stop", None).await?;
        match result.as_bool() {
            Some(true) => {
                tracing::info!("resmond will stop");
                Ok(())
            }
            Some(false) => bail!("resmond refuses to stop"),
            None => bail!("unexpected result type: boolean expected, got {result}"),
        }
    }

    pub async fn emad(&self, payload_hex: &str) -> Result<()> {
        let result = self
            .call("emad", Some(json!({ "payload": payload_hex })))
            .await?;
        if !result.is_null() {
            bail!("unexpected result type: null expected, got {result}");
        }
        tracing::info!("resmond took the EMAD");
        Ok(())
    }

    pub async fn stats(&self) -> Result<()> {
        let result = self.call("stats", None).await?;
        let counters = jrpc::dissect_stats(&result)
            .map_err(|err| anyhow!("invalid counters object: {err}"))?;

        println!("{:<30}{}", "Resource", "Usage");
        for counter in counters {
            println!("{:<30}{}", counter.descr, counter.value);
        }
        Ok(())
    }
}
