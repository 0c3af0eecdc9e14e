use crate::{
    backend::{InferenceBackend, SharedBackend, share},
    codec::build_decoder,
    config::ServerConfig,
    metrics::Metrics,
    worker::ConnectionWorker,
};
use std::collections::HashMap;
use std::future::Future;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// Clones of every live client socket, so shutdown can unblock workers
/// parked in a blocking read.
#[derive(Clone, Default)]
struct OpenConnections {
    streams: Arc<Mutex<HashMap<u64, TcpStream>>>,
}

impl OpenConnections {
    fn register(&self, id: u64, stream: &TcpStream) {
        match stream.try_clone() {
            Ok(clone) => {
                self.lock().insert(id, clone);
            }
            Err(e) => tracing::warn!(error = %e, "Could not track connection for shutdown"),
        }
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn close_all(&self) {
        for stream in self.lock().values() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, TcpStream>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Accepts clients and runs one blocking [`ConnectionWorker`] per connection,
/// at most `max_connections` at a time.
pub struct DetectionServer<B> {
    backend: SharedBackend<B>,
    config: Arc<ServerConfig>,
    metrics: Metrics,
}

impl<B: InferenceBackend + 'static> DetectionServer<B> {
    pub fn new(backend: B, config: ServerConfig) -> Self {
        Self::from_shared(share(backend), config)
    }

    pub fn from_shared(backend: SharedBackend<B>, config: ServerConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
            metrics: Metrics::new("inference"),
        }
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.config.listen_address()).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves, then
    /// close every open connection and wait for the workers to finish.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        // A codec that cannot be built would fail every connection.
        build_decoder(self.config.frame_codec, self.config.max_image_pixels)?;

        tracing::info!(
            address = %listener.local_addr()?,
            max_connections = self.config.max_connections,
            response_format = %self.config.response_format,
            frame_codec = %self.config.frame_codec,
            "Detection server listening"
        );

        let permits = Arc::new(Semaphore::new(self.config.max_connections));
        let open = OpenConnections::default();
        let mut workers = JoinSet::new();
        let mut next_id: u64 = 0;

        tokio::pin!(shutdown);

        loop {
            while let Some(result) = workers.try_join_next() {
                log_join_result(result);
            }

            // Hold a permit before accepting so excess clients wait in the
            // listen backlog.
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = permits.clone().acquire_owned() => permit?,
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            let stream = match into_blocking(stream, self.config.read_timeout) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "Failed to configure client socket");
                    continue;
                }
            };

            self.metrics.connections.add(1, &[]);
            let id = next_id;
            next_id += 1;
            open.register(id, &stream);

            let backend = Arc::clone(&self.backend);
            let config = Arc::clone(&self.config);
            let metrics = self.metrics.clone();
            let open = open.clone();

            workers.spawn_blocking(move || {
                let _permit = permit;
                handle_connection(backend, &config, metrics, stream, peer);
                open.remove(id);
            });
        }

        tracing::info!(
            active_connections = workers.len(),
            "Shutdown signal received, closing connections"
        );
        open.close_all();

        while let Some(result) = workers.join_next().await {
            log_join_result(result);
        }

        tracing::info!("Detection server stopped");
        Ok(())
    }
}

/// Hand the socket to a blocking worker thread.
fn into_blocking(
    stream: tokio::net::TcpStream,
    read_timeout: Option<Duration>,
) -> std::io::Result<TcpStream> {
    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(read_timeout)?;
    Ok(stream)
}

fn handle_connection<B: InferenceBackend>(
    backend: SharedBackend<B>,
    config: &ServerConfig,
    metrics: Metrics,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let span = tracing::info_span!("connection", %peer);
    let _enter = span.enter();

    let decoder = match build_decoder(config.frame_codec, config.max_image_pixels) {
        Ok(decoder) => decoder,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build frame decoder");
            return;
        }
    };

    tracing::info!("Client connected");

    let mut worker = ConnectionWorker::new(backend, decoder, config).with_metrics(metrics);
    match worker.serve(&stream, &stream) {
        Ok(stats) => tracing::info!(
            frames = stats.frames,
            skipped = stats.skipped,
            detections = stats.detections,
            "Client disconnected"
        ),
        Err(e) => tracing::warn!(error = %e, "Connection closed on error"),
    }
}

fn log_join_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Connection worker panicked");
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
