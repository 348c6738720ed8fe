//! WebSocket listener: accepts clients and runs one session per connection

use crate::cache::registry::WatcherRegistry;
use crate::config::{ServerConfig, TlsFiles};
use crate::error::{Error, Result};
use crate::session::run_session;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Server {
    registry: Arc<WatcherRegistry>,
    queue_capacity: usize,
    tls: Option<TlsAcceptor>,
}

impl Server {
    /// # Errors
    ///
    /// Returns an error if the configured TLS certificate or key cannot be loaded
    pub fn new(config: &ServerConfig, registry: Arc<WatcherRegistry>) -> Result<Self> {
        let tls = config.tls.as_ref().map(tls_acceptor).transpose()?;
        Ok(Self {
            registry,
            queue_capacity: config.subscriber_queue_capacity,
            tls,
        })
    }

    /// Accept connections on `listener` until `shutdown` fires
    ///
    /// # Errors
    ///
    /// Returns an error if the listener itself fails
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let scheme = if self.tls.is_some() { "wss" } else { "ws" };
        info!("🚀 Listening on {}://{}", scheme, listener.local_addr()?);

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };
            debug!("Accepted connection from {}", peer);

            let registry = self.registry.clone();
            let tls = self.tls.clone();
            let capacity = self.queue_capacity;
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, tls, registry, capacity, shutdown).await {
                    warn!("Connection from {} ended with error: {}", peer, e);
                }
            });
        }

        info!("🛑 No longer accepting connections");
        Ok(())
    }

    /// Bind `config`'s address and serve until `shutdown` fires
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound
    pub async fn run(self, config: &ServerConfig, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(config.listen_address()).await.map_err(|e| {
            error!("❌ Cannot listen on {}: {}", config.listen_address(), e);
            e
        })?;
        self.serve(listener, shutdown).await
    }
}

async fn handle_connection(
    stream: TcpStream,
    tls: Option<TlsAcceptor>,
    registry: Arc<WatcherRegistry>,
    capacity: usize,
    shutdown: CancellationToken,
) -> Result<()> {
    match tls {
        Some(acceptor) => {
            let stream = acceptor.accept(stream).await?;
            upgrade(stream, registry, capacity, shutdown).await
        }
        None => upgrade(stream, registry, capacity, shutdown).await,
    }
}

async fn upgrade<S>(
    stream: S,
    registry: Arc<WatcherRegistry>,
    capacity: usize,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let websocket = tokio_tungstenite::accept_async(stream).await?;
    run_session(websocket, registry, capacity, shutdown).await
}

fn tls_acceptor(files: &TlsFiles) -> Result<TlsAcceptor> {
    let certificates = CertificateDer::pem_file_iter(&files.certificate_file)?
        .collect::<core::result::Result<Vec<_>, _>>()?;
    if certificates.is_empty() {
        return Err(Error::Custom(format!(
            "no certificate found in {}",
            files.certificate_file.display()
        )));
    }
    let key = PrivateKeyDer::from_pem_file(&files.private_key_file)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certificates, key)?;
    info!("🔐 TLS enabled with {}", files.certificate_file.display());
    Ok(TlsAcceptor::from(Arc::new(config)))
}
