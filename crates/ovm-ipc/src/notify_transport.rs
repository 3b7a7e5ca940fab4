//! Event delivery over the front-end's named pipe.
//!
//! One short-lived HTTP/1.1 connection per event: dial the pipe,
//! handshake, `GET /notify`, done. The notifier above this serialises
//! sends and applies the per-request timeout.

use async_trait::async_trait;
use ovm_core::event::{EventTransport, Stage, query_escape};
use ovm_core::{CoreError, Result};

/// [`EventTransport`] dialing `\\.\pipe\<name>`.
pub struct PipeEventTransport {
    pipe_path: String,
}

impl PipeEventTransport {
    /// Creates a transport for the given full pipe path.
    #[must_use]
    pub fn new(pipe_path: impl Into<String>) -> Self {
        Self {
            pipe_path: pipe_path.into(),
        }
    }
}

#[async_trait]
impl EventTransport for PipeEventTransport {
    #[cfg(windows)]
    async fn send(&self, stage: Stage, name: &str, value: &str) -> Result<()> {
        use http_body_util::Empty;
        use hyper::Request;
        use hyper_util::rt::TokioIo;

        let client = ovm_win32::npipe::connect_client(&self.pipe_path)
            .await
            .map_err(|e| CoreError::notify(format!("failed to dial event pipe: {e}")))?;

        let (mut sender, connection) =
            hyper::client::conn::http1::handshake(TokioIo::new(client))
                .await
                .map_err(|e| CoreError::notify(format!("event pipe handshake failed: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("Event pipe connection error: {e}");
            }
        });

        let uri = format!(
            "/notify?stage={}&name={}&value={}",
            stage.as_str(),
            query_escape(name),
            query_escape(value),
        );

        let request = Request::get(&uri)
            .header(hyper::header::HOST, "ovm")
            .body(Empty::<bytes::Bytes>::new())
            .map_err(|e| CoreError::notify(format!("failed to build notify request: {e}")))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| CoreError::notify(format!("notify request failed: {e}")))?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), uri, "Notify returned non-2xx");
        }

        Ok(())
    }

    #[cfg(not(windows))]
    async fn send(&self, _stage: Stage, _name: &str, _value: &str) -> Result<()> {
        let _ = &self.pipe_path;
        Err(CoreError::notify("named pipes are Windows-only"))
    }
}
