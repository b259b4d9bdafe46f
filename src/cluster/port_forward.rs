//! Reaching pod ports from wherever the harness runs.
//!
//! [`PortForward`] binds a local listener and tunnels each accepted connection
//! to a pod port over the Kubernetes API. Dropping it stops the listener.
//! [`KubeTimingService`] uses a short-lived forward for the one-time timing
//! service initialization call, so the call works from a laptop as well as
//! from inside the cluster.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::cluster::{PodInfo, TimingService};
use crate::environment::error::{Error, Result};

/// Port the timing service listens on inside the bootstrap pod.
pub const TIMING_SERVICE_PORT: u16 = 80;
/// Path of the timing service start endpoint.
pub const TIMING_START_PATH: &str = "v1/start";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Local listener forwarding to one pod port; stops when dropped.
pub struct PortForward {
    local_port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    _handle: JoinHandle<()>,
}

impl PortForward {
    /// Forward an ephemeral local port to `remote_port` of `pod`.
    pub async fn start(client: Client, namespace: &str, pod: &str, remote_port: u16) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
        let local_port = listener.local_addr()?.port();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let pods: Api<Pod> = Api::namespaced(client, namespace);
        let pod_name = pod.to_string();
        let handle = tokio::spawn(async move {
            accept_loop(listener, pods, pod_name, remote_port, shutdown_rx).await;
        });

        debug!(
            namespace = namespace,
            pod = pod,
            local_port = local_port,
            remote_port = remote_port,
            "Port-forward established"
        );

        Ok(Self {
            local_port,
            shutdown_tx: Some(shutdown_tx),
            _handle: handle,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Base URL of the forwarded port.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.local_port)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            debug!(local_port = self.local_port, "Stopping port-forward");
            let _ = tx.send(());
        }
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    pods: Api<Pod>,
    pod_name: String,
    remote_port: u16,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    trace!(client_addr = %addr, "New forwarded connection");
                    let pods = pods.clone();
                    let pod_name = pod_name.clone();
                    tokio::spawn(async move {
                        if let Err(e) = tunnel(pods, &pod_name, remote_port, stream).await {
                            warn!(pod = %pod_name, error = %e, "Forwarded connection failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Port-forward accept failed"),
            }
        }
    }
}

/// Copy bytes both ways between a local connection and the pod port.
#[allow(clippy::indexing_slicing)] // n <= buf.len() after read()
async fn tunnel(
    pods: Api<Pod>,
    pod_name: &str,
    remote_port: u16,
    mut local: TcpStream,
) -> Result<()> {
    let mut forwarder = pods.portforward(pod_name, &[remote_port]).await?;
    let upstream = forwarder
        .take_stream(remote_port)
        .ok_or_else(|| Error::cloud(format!("no stream for port {remote_port} of {pod_name}")))?;

    let (mut local_read, mut local_write) = local.split();
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let outbound = async {
        let mut buf = [0u8; 8192];
        loop {
            let n = local_read.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            upstream_write.write_all(&buf[..n]).await?;
        }
        upstream_write.shutdown().await
    };
    let inbound = async {
        let mut buf = [0u8; 8192];
        loop {
            let n = upstream_read.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            local_write.write_all(&buf[..n]).await?;
        }
        local_write.shutdown().await
    };
    let _ = tokio::try_join!(outbound, inbound);

    forwarder
        .join()
        .await
        .map_err(|e| Error::cloud(format!("port-forward to {pod_name} ended badly: {e}")))
}

/// Timing service reached through a port-forward to the bootstrap pod
#[derive(Clone)]
pub struct KubeTimingService {
    client: Client,
    http: reqwest::Client,
}

impl KubeTimingService {
    pub fn new(client: Client) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, http })
    }
}

impl TimingService for KubeTimingService {
    #[instrument(skip(self, body), fields(pod = %pod.name))]
    async fn initialize(&self, namespace: &str, pod: &PodInfo, body: &str) -> Result<String> {
        let forward =
            PortForward::start(self.client.clone(), namespace, &pod.name, TIMING_SERVICE_PORT)
                .await?;
        post_start(&self.http, &forward.url(), body).await
    }
}

/// POST `body` to the start endpoint under `base_url` and return the response
/// body whatever the status, so the caller judges the answer.
async fn post_start(http: &reqwest::Client, base_url: &str, body: &str) -> Result<String> {
    let url = format!("{base_url}/{TIMING_START_PATH}");
    let response = http
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .send()
        .await?;
    let status = response.status();
    let text = response.text().await?;

    if status.is_success() {
        info!(response = %text.trim(), "Timing service answered");
    } else {
        warn!(status = %status, response = %text.trim(), "Timing service rejected start");
    }
    Ok(text)
}
