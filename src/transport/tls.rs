//! # TLS Transport Layer
//!
//! TLS adapter for connections: loads PEM material, builds `rustls` configurations,
//! and runs the client or server handshake on top of a TCP stream.
//!
//! The framing protocol is unchanged on top of TLS; the handshake just has to
//! complete before the first frame is exchanged.
//!
//! ## Responsibilities
//! - Load a server certificate chain and PKCS#8 private key
//! - Verify servers against an explicit trust anchor file
//! - Establish client TLS streams with a bounded handshake

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::ServerName;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, instrument};

use crate::config::{ClientTlsConfig, ServerTlsConfig};
use crate::error::{ProtocolError, Result};
use crate::transport::tcp;

/// TLS server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsServerConfig {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl TlsServerConfig {
    /// Create a new TLS server configuration
    pub fn new<P: AsRef<Path>>(cert_path: P, key_path: P) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_path_buf(),
            key_path: key_path.as_ref().to_path_buf(),
        }
    }

    /// Load the TLS configuration from files
    pub fn load_server_config(&self) -> Result<ServerConfig> {
        let cert_chain = load_certificates(&self.cert_path, "certificate")?;
        let private_key = load_private_key(&self.key_path)?;

        ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| ProtocolError::TlsError(format!("TLS error: {e}")))
    }

    /// Build an acceptor for the server side of the handshake
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        let config = self.load_server_config()?;
        debug!(cert = %self.cert_path.display(), "Loaded server TLS configuration");
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

impl From<&ServerTlsConfig> for TlsServerConfig {
    fn from(config: &ServerTlsConfig) -> Self {
        Self::new(&config.cert_path, &config.key_path)
    }
}

/// TLS Client Configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsClientConfig {
    server_name: String,
    ca_path: PathBuf,
}

impl TlsClientConfig {
    /// Create a new TLS client configuration
    ///
    /// `ca_path` names a PEM file holding the certificate(s) the server chain must
    /// lead to. `server_name` is checked against the presented certificate.
    pub fn new<S: Into<String>, P: AsRef<Path>>(server_name: S, ca_path: P) -> Self {
        Self {
            server_name: server_name.into(),
            ca_path: ca_path.as_ref().to_path_buf(),
        }
    }

    /// Load the TLS client configuration
    pub fn load_client_config(&self) -> Result<ClientConfig> {
        let mut root_store = RootCertStore::empty();
        for cert in load_certificates(&self.ca_path, "trust anchor")? {
            root_store.add(&cert).map_err(|e| {
                ProtocolError::TlsError(format!("Failed to add trust anchor: {e}"))
            })?;
        }

        Ok(ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth())
    }

    /// Get the server name as a rustls::ServerName
    pub fn server_name(&self) -> Result<ServerName> {
        ServerName::try_from(self.server_name.as_str()).map_err(|_| {
            ProtocolError::TlsError(format!("Invalid server name '{}'", self.server_name))
        })
    }

    /// Build a connector for the client side of the handshake
    pub fn connector(&self) -> Result<TlsConnector> {
        Ok(TlsConnector::from(Arc::new(self.load_client_config()?)))
    }
}

impl From<&ClientTlsConfig> for TlsClientConfig {
    fn from(config: &ClientTlsConfig) -> Self {
        Self::new(config.server_name.clone(), &config.ca_path)
    }
}

/// Connect to a TLS server
///
/// A failed certificate verification surfaces as [`ProtocolError::TlsError`].
#[instrument(skip(config), fields(address = %addr))]
pub async fn connect(addr: &str, config: &TlsClientConfig) -> Result<ClientTlsStream<TcpStream>> {
    let connector = config.connector()?;
    let domain = config.server_name()?;

    let stream = tcp::connect(addr).await?;
    let tls_stream = connector
        .connect(domain, stream)
        .await
        .map_err(|e| ProtocolError::TlsError(format!("TLS connection failed: {e}")))?;

    debug!("Client TLS handshake complete");
    Ok(tls_stream)
}

fn load_certificates(path: &Path, what: &str) -> Result<Vec<Certificate>> {
    let file = File::open(path).map_err(|e| {
        ProtocolError::TlsError(format!("Failed to open {what} file {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    let chain = certs(&mut reader)
        .map_err(|_| ProtocolError::TlsError(format!("Failed to parse {what}")))?;

    if chain.is_empty() {
        return Err(ProtocolError::TlsError(format!(
            "No certificates found in {}",
            path.display()
        )));
    }

    Ok(chain.into_iter().map(Certificate).collect())
}

fn load_private_key(path: &Path) -> Result<PrivateKey> {
    let file = File::open(path).map_err(|e| {
        ProtocolError::TlsError(format!("Failed to open key file {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    let mut keys = pkcs8_private_keys(&mut reader)
        .map_err(|_| ProtocolError::TlsError("Failed to parse PKCS8 private key".into()))?;

    if keys.is_empty() {
        return Err(ProtocolError::TlsError("No private keys found".into()));
    }

    Ok(PrivateKey(keys.swap_remove(0)))
}
