//! HTTP long-polling transport.
//!
//! A background task keeps one `GET /poll/{sid}` in flight at a time and
//! feeds every returned event into a channel, so `recv` never loses a
//! response when the caller drops it mid-poll.
//!
//! The server only learns that a polling client left from `DELETE`, so a
//! transport dropped without [`Transport::close`] still sends one in the
//! background.

use async_trait::async_trait;
use massclick_common::ClientEvent;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TransportKind;
use crate::error::TransportError;

use super::{Inbound, Transport};

#[derive(Debug, Deserialize)]
struct OpenResponse {
    sid: String,
}

pub struct PollingTransport {
    http: reqwest::Client,
    session_url: String,
    incoming: mpsc::UnboundedReceiver<Result<Inbound, TransportError>>,
    poller: JoinHandle<()>,
    closed: bool,
}

impl PollingTransport {
    /// Open a polling session at `poll_url` (`…/poll`).
    pub async fn connect(http: reqwest::Client, poll_url: &str) -> Result<Self, TransportError> {
        let response = http
            .post(poll_url)
            .send()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::ConnectFailed(format!(
                "unexpected status {}",
                response.status()
            )));
        }
        let open: OpenResponse = response
            .json()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let session_url = format!("{}/{}", poll_url.trim_end_matches('/'), open.sid);
        let (tx, incoming) = mpsc::unbounded_channel();
        let poller = tokio::spawn(poll_loop(http.clone(), session_url.clone(), tx));

        Ok(Self {
            http,
            session_url,
            incoming,
            poller,
            closed: false,
        })
    }
}

async fn poll_loop(
    http: reqwest::Client,
    url: String,
    tx: mpsc::UnboundedSender<Result<Inbound, TransportError>>,
) {
    loop {
        let response = match http.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                let _ = tx.send(Err(e.into()));
                return;
            }
        };

        if response.status() == StatusCode::NOT_FOUND {
            let _ = tx.send(Err(TransportError::ClosedByServer));
            return;
        }
        if !response.status().is_success() {
            let _ = tx.send(Err(TransportError::ConnectionLost(format!(
                "poll returned {}",
                response.status()
            ))));
            return;
        }

        let events: Vec<serde_json::Value> = match response.json().await {
            Ok(events) => events,
            Err(e) => {
                let _ = tx.send(Err(e.into()));
                return;
            }
        };
        if events.is_empty() && tx.send(Ok(Inbound::Heartbeat)).is_err() {
            return;
        }
        for event in events {
            if tx.send(Ok(Inbound::Message(event.to_string()))).is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        let response = self.http.post(&self.session_url).json(&event).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(TransportError::ClosedByServer),
            StatusCode::BAD_REQUEST => {
                tracing::warn!(?event, "server rejected client event");
                Ok(())
            }
            status if status.is_success() => Ok(()),
            status => Err(TransportError::ConnectionLost(format!("send returned {status}"))),
        }
    }

    async fn recv(&mut self) -> Result<Inbound, TransportError> {
        match self.incoming.recv().await {
            Some(result) => result,
            None => Err(TransportError::ConnectionLost("poller stopped".to_string())),
        }
    }

    async fn close(&mut self) {
        self.poller.abort();
        self.closed = true;
        if let Err(e) = self.http.delete(&self.session_url).send().await {
            tracing::debug!(error = %e, "failed to end polling session");
        }
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        self.poller.abort();
        if self.closed {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(url = %self.session_url, "no runtime to end polling session");
            return;
        };
        let request = self.http.delete(&self.session_url);
        let url = self.session_url.clone();
        runtime.spawn(async move {
            if let Err(e) = request.send().await {
                tracing::debug!(%url, error = %e, "failed to end dropped polling session");
            }
        });
    }
}
