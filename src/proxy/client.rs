use std::{fmt::Display, time::Duration};

use fake::{faker::internet::en::UserAgent, Fake};
use http_body_util::{BodyExt, Empty};
use hyper::{
    body::Bytes,
    client::conn::http1::handshake,
    header::{ACCEPT, HOST, USER_AGENT},
    Request, StatusCode, Uri,
};
use hyper_util::rt::TokioIo;
use native_tls::TlsConnector;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::{self, timeout},
};

use crate::{
    config::{CheckSite, Headers, Transport},
    error::ProbeError,
    negotiators::{HttpConnectNegotiator, NegotiatorTrait},
    proxy::models::{Candidate, TargetAddr},
    resolver,
};

/// A check-site with its URL parsed and its expectations resolved.
#[derive(Debug, Clone)]
pub struct Site {
    pub uri: Uri,
    pub expected_status: u16,
    pub response_contains: Vec<String>,
}

impl Site {
    /// Validates a configured check-site.
    ///
    /// # Returns
    ///
    /// The site, or a configuration error when the URL is not an absolute
    /// `http`/`https` URL.
    pub fn from_config(site: &CheckSite) -> Result<Self, ProbeError> {
        let uri: Uri = site
            .url
            .parse()
            .map_err(|e| ProbeError::config(format!("invalid check site {:?}: {}", site.url, e)))?;

        if !matches!(uri.scheme_str(), Some("http") | Some("https")) || uri.host().is_none() {
            return Err(ProbeError::config(format!(
                "check site {:?} must be an absolute http or https URL",
                site.url
            )));
        }

        Ok(Self {
            uri,
            expected_status: site.status_code.filter(|code| *code != 0).unwrap_or(200),
            response_contains: site.response_contains.clone(),
        })
    }

    fn is_https(&self) -> bool {
        self.uri.scheme_str() == Some("https")
    }

    /// Host without IPv6 brackets.
    fn host(&self) -> &str {
        self.uri
            .host()
            .unwrap_or_default()
            .trim_start_matches('[')
            .trim_end_matches(']')
    }

    fn port(&self) -> u16 {
        self.uri
            .port_u16()
            .unwrap_or(if self.is_https() { 443 } else { 80 })
    }

    fn authority(&self) -> &str {
        self.uri.authority().map(|a| a.as_str()).unwrap_or_default()
    }

    fn origin_form(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/")
    }
}

/// Headers attached to every check-site request.
#[derive(Debug, Clone)]
pub struct RequestHeaders {
    pub user_agent: String,
    pub accept: String,
}

impl RequestHeaders {
    /// Resolves the configured headers, picking a random browser agent when
    /// none is configured.
    pub fn from_config(headers: &Headers) -> Self {
        let user_agent = if headers.user_agent.trim().is_empty() {
            UserAgent().fake::<String>()
        } else {
            headers.user_agent.clone()
        };
        Self {
            user_agent,
            accept: headers.accept.clone(),
        }
    }
}

/// A client that fetches check-sites through a candidate HTTP proxy.
pub struct ProxyClient<'a> {
    candidate: &'a Candidate,
    headers: &'a RequestHeaders,
    timeout: Duration,
}

impl<'a> ProxyClient<'a> {
    /// Creates a new instance of `ProxyClient`.
    ///
    /// # Arguments
    ///
    /// * `candidate`: The proxy every request is routed through.
    /// * `headers`: Headers attached to every request.
    /// * `timeout`: Budget for one complete request, from dial to body.
    pub fn new(candidate: &'a Candidate, headers: &'a RequestHeaders, timeout: Duration) -> Self {
        Self {
            candidate,
            headers,
            timeout,
        }
    }

    /// Establishes a TCP connection to the proxy server.
    async fn connect(&self) -> Result<TcpStream, ProbeError> {
        let time_start = time::Instant::now();
        self.log_trace("Starting TCP connection");
        let stream =
            resolver::dial(&self.candidate.host, self.candidate.port, Transport::Tcp).await?;
        self.log_trace(format!("Connected in {:?}", time_start.elapsed()));
        Ok(stream)
    }

    fn build_request(&self, site: &Site, target: &str) -> Result<Request<Empty<Bytes>>, ProbeError> {
        let mut builder = Request::get(target)
            .header(HOST, site.authority())
            .header(USER_AGENT, self.headers.user_agent.as_str());
        if !self.headers.accept.is_empty() {
            builder = builder.header(ACCEPT, self.headers.accept.as_str());
        }
        builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProbeError::config(format!("invalid request for {}: {}", site.uri, e)))
    }

    /// Runs one HTTP/1 exchange over `io` and collects the whole body.
    async fn exchange<T>(
        &self,
        io: T,
        req: Request<Empty<Bytes>>,
    ) -> Result<(StatusCode, Bytes), ProbeError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sender, conn) = handshake::<_, Empty<Bytes>>(TokioIo::new(io)).await?;

        let addr = self.candidate.as_text();
        let handler = tokio::task::spawn(async move {
            if let Err(err) = conn.await {
                #[cfg(feature = "log")]
                if log::max_level().eq(&log::LevelFilter::Trace) {
                    log::error!("{}: Connection error: {}", addr, err);
                }
                #[cfg(not(feature = "log"))]
                let _ = (addr, err);
            }
        });

        self.log_trace(format!("Sending a {:?}", req));
        let result = async {
            let response = sender.send_request(req).await?;
            let status = response.status();
            let body = response.collect().await?.to_bytes();
            Ok::<_, ProbeError>((status, body))
        }
        .await;
        handler.abort();
        result
    }

    /// Sends a request over TLS through an already established tunnel.
    pub async fn send_with_tls(
        &self,
        req: Request<Empty<Bytes>>,
        stream: TcpStream,
        domain: &str,
    ) -> Result<(StatusCode, Bytes), ProbeError> {
        self.log_trace("Starting TLS connection");
        let config = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        let connector = tokio_native_tls::TlsConnector::from(config);
        let tls_stream = connector.connect(domain, stream).await?;
        self.log_trace("TLS connection established successfully");

        self.exchange(tls_stream, req).await
    }

    /// Sends an absolute-form request to the proxy in plain text.
    pub async fn send_without_tls(
        &self,
        req: Request<Empty<Bytes>>,
        stream: TcpStream,
    ) -> Result<(StatusCode, Bytes), ProbeError> {
        self.exchange(stream, req).await
    }

    /// Fetches `site` through the proxy.
    ///
    /// `http` sites are requested from the proxy directly; `https` sites go
    /// through a CONNECT tunnel followed by TLS. Each call opens its own
    /// connection and the whole exchange is bounded by the client timeout.
    ///
    /// # Returns
    ///
    /// The response status and body.
    pub async fn fetch(&self, site: &Site) -> Result<(StatusCode, Bytes), ProbeError> {
        timeout(self.timeout, async {
            let mut stream = self.connect().await?;
            if site.is_https() {
                let target = TargetAddr::new(site.host(), site.port())?;
                HttpConnectNegotiator.negotiate(&mut stream, &target).await?;
                let req = self.build_request(site, site.origin_form())?;
                self.send_with_tls(req, stream, site.host()).await
            } else {
                let req = self.build_request(site, &site.uri.to_string())?;
                self.send_without_tls(req, stream).await
            }
        })
        .await?
    }

    /// Logs a trace message.
    ///
    /// # Arguments
    ///
    /// * `msg`: The message to log.
    #[allow(unused_variables)]
    pub fn log_trace<S>(&self, msg: S)
    where
        S: Display,
    {
        #[cfg(feature = "log")]
        log::trace!("{}: {}", self.candidate, msg);
    }
}
