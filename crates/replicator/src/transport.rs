// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Outbound HTTP/1.1 client of a group.
//!
//! Requests are addressed by [`Uri`], so the path and query go on the wire
//! exactly as they arrived, dot segments and escapes included. TLS is
//! negotiated without validating the downstream certificate chain.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use http::{Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioTimer},
};
use rustls::{
    ClientConfig, DigitallySignedStruct, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{CryptoProvider, ring, verify_tls12_signature, verify_tls13_signature},
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use snafu::{ResultExt, Snafu};
use tracing::debug;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    #[snafu(display("failed to configure TLS"))]
    Tls { source: rustls::Error },

    #[snafu(display("request to {uri} failed"))]
    Send {
        uri:    Uri,
        source: hyper_util::client::legacy::Error,
    },

    #[snafu(display("request to {uri} timed out after {timeout:?}"))]
    Timeout { uri: Uri, timeout: Duration },
}

impl TransportError {
    /// Whether no connection to the host could be established.
    #[must_use]
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Send { source, .. } if source.is_connect())
    }
}

/// Accepts every server certificate. Handshake signatures are still checked
/// so the session keys belong to the presented certificate.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// A pooled `http`/`https` client with one timeout for the whole exchange.
#[derive(Clone)]
pub struct HttpTransport {
    client:  Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let provider = Arc::new(ring::default_provider());
        let tls = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .context(TlsSnafu)?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth();

        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .build(connector);

        Ok(Self { client, timeout })
    }

    /// Send one request and read the response to its end.
    ///
    /// Any response counts, whatever its status. A response body that breaks
    /// off after the status line is logged and still counts.
    pub async fn send(
        &self,
        method: Method,
        uri: Uri,
        body: Bytes,
    ) -> Result<StatusCode, TransportError> {
        let mut request = Request::new(Full::new(body));
        *request.method_mut() = method;
        *request.uri_mut() = uri.clone();

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .with_context(|_| SendSnafu { uri: uri.clone() })?;
            let status = response.status();
            if let Err(e) = response.into_body().collect().await {
                debug!(%uri, error = %e, "Failed to drain response body");
            }
            Ok::<_, TransportError>(status)
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => TimeoutSnafu {
                uri,
                timeout: self.timeout,
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::{Router, http::Uri as AxumUri};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_path_is_sent_without_normalization() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let app = Router::new().fallback(move |uri: AxumUri| {
            let recorded = recorded.clone();
            async move { recorded.lock().unwrap().push(uri.to_string()) }
        });
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let paths = ["/a/../b", "/a/./b", "/a%2Fb?x=%20"];
        for path in paths {
            let uri: Uri = format!("http://{addr}{path}").parse().unwrap();
            let status = transport
                .send(Method::GET, uri, Bytes::new())
                .await
                .unwrap();
            assert_eq!(status, StatusCode::OK, "{path}");
        }
        assert_eq!(*seen.lock().unwrap(), paths);
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_connect_error() {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let uri: Uri = format!("http://{addr}/x").parse().unwrap();
        let err = transport
            .send(Method::POST, uri, Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert!(err.is_connect(), "{err}");
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        });
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let transport = HttpTransport::new(Duration::from_millis(100)).unwrap();
        let uri: Uri = format!("http://{addr}/slow").parse().unwrap();
        let err = transport
            .send(Method::GET, uri, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }
}
