//! Transport layer.
//!
//! [`Transport`] is the boundary the service hands rendered messages to.
//! [`SmtpTransport`] implements it with one SMTP session per call: connect,
//! EHLO, optional TLS and authentication, one mail transaction, QUIT.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::auth::{AuthMethod, Credentials};
use crate::config::{ServiceConfig, TlsMode};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::observability::ServiceMetrics;
use crate::protocol::{codes, dot_stuff, Command, Extensions, Reply, ReplyLine};
use crate::types::Envelope;

mod tls;

/// Delivers a rendered message.
///
/// Implementations receive address-only envelope strings and the raw
/// message bytes (header block, blank line, body) and report only success
/// or failure.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers `message` from `envelope.sender` to every envelope recipient.
    async fn send(&self, envelope: &Envelope, message: &[u8]) -> SmtpResult<()>;
}

/// Transport that runs one SMTP session per send.
#[derive(Clone)]
pub struct SmtpTransport {
    config: Arc<ServiceConfig>,
    metrics: Arc<ServiceMetrics>,
}

impl fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("address", &self.config.address())
            .field("tls_mode", &self.config.tls_mode)
            .field("skip_verify", &self.config.smtp_skip_verify)
            .finish()
    }
}

impl SmtpTransport {
    /// Creates a transport for the configured endpoint.
    pub fn new(config: Arc<ServiceConfig>, metrics: Arc<ServiceMetrics>) -> Self {
        Self { config, metrics }
    }

    /// Runs the greeting, TLS, AUTH and mail transaction on an open session.
    async fn transact(&self, session: &mut Session, envelope: &Envelope, message: &[u8]) -> SmtpResult<()> {
        if self.config.tls_mode == TlsMode::Implicit {
            session.upgrade_tls(&self.config.smtp_host, self.config.smtp_skip_verify).await?;
            self.metrics.record_tls_upgrade();
        }

        let greeting = session.read_response().await?;
        if greeting.code != codes::READY {
            return Err(greeting.to_error());
        }

        session.hello(self.config.client_id()).await?;
        self.negotiate_tls(session).await?;

        if let Some(credentials) = self.config.credentials() {
            self.authenticate(session, &credentials).await?;
        }

        // SIZE 0 means the server declared no limit.
        if let Some(limit) = session.extensions.max_size.filter(|&limit| limit > 0) {
            if message.len() > limit {
                return Err(SmtpError::new(
                    SmtpErrorKind::MessageRejected,
                    format!("Message is {} bytes, server accepts at most {}", message.len(), limit),
                ));
            }
        }

        let eight_bit = session.extensions.eight_bit_mime && !message.is_ascii();
        let response = session
            .send_command(&Command::Mail {
                sender: envelope.sender.clone(),
                eight_bit,
            })
            .await?;
        if !response.is_positive() {
            return Err(rejection(SmtpErrorKind::SenderRejected, &envelope.sender, &response));
        }

        for recipient in &envelope.recipients {
            let response = session.send_command(&Command::Rcpt(recipient.clone())).await?;
            if !response.is_positive() {
                return Err(rejection(SmtpErrorKind::RecipientRejected, recipient, &response));
            }
        }

        let response = session.send_command(&Command::Data).await?;
        if response.code != codes::SEND_DATA {
            return Err(rejection(SmtpErrorKind::MessageRejected, "DATA", &response));
        }

        let response = session.send_data(&dot_stuff(message)).await?;
        if !response.is_positive() {
            return Err(rejection(SmtpErrorKind::MessageRejected, "message", &response));
        }

        Ok(())
    }

    /// Upgrades with STARTTLS when the mode and the server allow it.
    async fn negotiate_tls(&self, session: &mut Session) -> SmtpResult<()> {
        let required = match self.config.tls_mode {
            TlsMode::None | TlsMode::Implicit => return Ok(()),
            TlsMode::StartTls => false,
            TlsMode::StartTlsRequired => true,
        };

        if !session.extensions.starttls {
            if required {
                return Err(SmtpError::new(
                    SmtpErrorKind::StarttlsNotSupported,
                    "Server does not support STARTTLS",
                ));
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(host = %self.config.smtp_host, "STARTTLS not offered, continuing in plaintext");
            return Ok(());
        }

        let response = session.send_command(&Command::StartTls).await?;
        if !response.is_positive() {
            if required {
                return Err(SmtpError::new(
                    SmtpErrorKind::StarttlsNotSupported,
                    format!("STARTTLS refused: {}", response),
                )
                .with_smtp_code(response.code));
            }
            return Ok(());
        }

        session.upgrade_tls(&self.config.smtp_host, self.config.smtp_skip_verify).await?;
        self.metrics.record_tls_upgrade();

        // Capabilities from before the handshake are discarded (RFC 3207).
        session.hello(self.config.client_id()).await
    }

    async fn authenticate(&self, session: &mut Session, credentials: &Credentials) -> SmtpResult<()> {
        if !session.tls_active && !self.config.is_local_host() {
            return Err(SmtpError::new(
                SmtpErrorKind::AuthNotSupported,
                "Refusing to send credentials over an unencrypted connection",
            ));
        }

        let offered = session.extensions.auth.as_ref().ok_or_else(|| {
            SmtpError::new(SmtpErrorKind::AuthNotSupported, "Server does not advertise AUTH")
        })?;
        let method = AuthMethod::preferred(offered)?;
        let result = match method {
            AuthMethod::Plain => auth_plain(session, credentials).await,
            AuthMethod::Login => auth_login(session, credentials).await,
        };
        self.metrics.record_auth(result.is_ok());

        if result.is_ok() {
            #[cfg(feature = "tracing")]
            tracing::debug!(method = %method, "Authenticated");
        }

        result
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, envelope: &Envelope, message: &[u8]) -> SmtpResult<()> {
        if envelope.recipients.is_empty() {
            return Err(SmtpError::no_recipients());
        }

        let mut session = Session::connect(&self.config.address()).await?;
        let result = self.transact(&mut session, envelope, message).await;
        session.quit().await;
        result
    }
}

async fn auth_plain(session: &mut Session, credentials: &Credentials) -> SmtpResult<()> {
    let response = session
        .send_command(&Command::Auth(
            AuthMethod::Plain,
            Some(credentials.plain_response()),
        ))
        .await?;
    expect_auth_success(&response)
}

async fn auth_login(session: &mut Session, credentials: &Credentials) -> SmtpResult<()> {
    let response = session.send_command(&Command::Auth(AuthMethod::Login, None)).await?;
    if response.code != codes::AUTH_CHALLENGE {
        return Err(auth_error(&response));
    }

    let response = session.send_secret_line(&credentials.login_username()).await?;
    if response.code != codes::AUTH_CHALLENGE {
        return Err(auth_error(&response));
    }

    let response = session.send_secret_line(&credentials.login_password()).await?;
    expect_auth_success(&response)
}

fn expect_auth_success(response: &Reply) -> SmtpResult<()> {
    if response.code == codes::AUTH_OK {
        Ok(())
    } else {
        Err(auth_error(response))
    }
}

fn auth_error(response: &Reply) -> SmtpError {
    let err = SmtpError::new(
        SmtpErrorKind::AuthenticationFailed,
        format!("Authentication failed: {}", response.joined()),
    )
    .with_smtp_code(response.code);
    match &response.enhanced {
        Some(code) => err.with_enhanced_code(code.clone()),
        None => err,
    }
}

/// Builds the error for a refused envelope or message step.
///
/// 421 keeps its shutdown meaning; anything else takes `kind`.
fn rejection(kind: SmtpErrorKind, subject: &str, response: &Reply) -> SmtpError {
    if response.code == codes::CLOSING {
        return response.to_error();
    }
    let err = SmtpError::new(kind, format!("{}: {}", subject, response.joined()))
        .with_smtp_code(response.code);
    match &response.enhanced {
        Some(code) => err.with_enhanced_code(code.clone()),
        None => err,
    }
}

/// Maps socket errors to transport error kinds.
fn map_io_error(error: io::Error, context: &str) -> SmtpError {
    let kind = match error.kind() {
        io::ErrorKind::ConnectionRefused => SmtpErrorKind::ConnectionRefused,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => SmtpErrorKind::ConnectionReset,
        _ => SmtpErrorKind::Io,
    };
    SmtpError::new(kind, format!("{}: {}", context, error)).with_cause(error)
}

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(BufReader<TcpStream>),
    #[cfg(any(feature = "rustls-tls", feature = "native-tls"))]
    Tls(BufReader<tls::TlsStream>),
    /// Placeholder while the stream is being upgraded.
    Closed,
}

impl TransportStream {
    async fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        match self {
            TransportStream::Plain(reader) => reader.read_line(buf).await,
            #[cfg(any(feature = "rustls-tls", feature = "native-tls"))]
            TransportStream::Tls(reader) => reader.read_line(buf).await,
            TransportStream::Closed => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            TransportStream::Plain(reader) => {
                let stream = reader.get_mut();
                stream.write_all(data).await?;
                stream.flush().await
            }
            #[cfg(any(feature = "rustls-tls", feature = "native-tls"))]
            TransportStream::Tls(reader) => {
                let stream = reader.get_mut();
                stream.write_all(data).await?;
                stream.flush().await
            }
            TransportStream::Closed => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}

/// One SMTP connection.
struct Session {
    stream: TransportStream,
    tls_active: bool,
    extensions: Extensions,
}

impl Session {
    async fn connect(address: &str) -> SmtpResult<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| map_io_error(e, &format!("Cannot connect to {}", address)))?;
        stream.set_nodelay(true).ok();

        #[cfg(feature = "tracing")]
        tracing::debug!(address = %address, "Connected to SMTP server");

        Ok(Self {
            stream: TransportStream::Plain(BufReader::new(stream)),
            tls_active: false,
            extensions: Extensions::default(),
        })
    }

    /// Reads lines until a complete (possibly multiline) reply.
    async fn read_response(&mut self) -> SmtpResult<Reply> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();
            let read = self
                .stream
                .read_line(&mut line)
                .await
                .map_err(|e| map_io_error(e, "Read failed"))?;

            if read == 0 {
                return Err(SmtpError::new(
                    SmtpErrorKind::ConnectionReset,
                    "Server closed connection",
                ));
            }

            let line = ReplyLine::parse(line.trim_end_matches(['\r', '\n']))?;
            let done = line.last;
            lines.push(line);

            if done {
                break;
            }
        }

        let response = Reply::from_lines(lines)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(code = response.code, message = %response.text(), "Received SMTP response");

        Ok(response)
    }

    async fn send_command(&mut self, command: &Command) -> SmtpResult<Reply> {
        #[cfg(feature = "tracing")]
        tracing::debug!(command = %command, "Sending SMTP command");

        let line = format!("{}\r\n", command.wire());
        self.write(line.as_bytes()).await?;
        self.read_response().await
    }

    /// Sends an AUTH continuation line without logging it.
    async fn send_secret_line(&mut self, line: &str) -> SmtpResult<Reply> {
        self.write(format!("{}\r\n", line).as_bytes()).await?;
        self.read_response().await
    }

    /// Sends the prepared DATA payload and reads the final reply.
    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<Reply> {
        self.write(data).await?;
        self.read_response().await
    }

    async fn write(&mut self, data: &[u8]) -> SmtpResult<()> {
        self.stream
            .write_all(data)
            .await
            .map_err(|e| map_io_error(e, "Write failed"))
    }

    /// Sends EHLO, falling back to HELO, and records the advertised extensions.
    async fn hello(&mut self, client_id: &str) -> SmtpResult<()> {
        let response = self.send_command(&Command::Ehlo(client_id.to_string())).await?;
        if response.is_positive() {
            self.extensions = Extensions::from_ehlo(&response);
            return Ok(());
        }

        let response = self.send_command(&Command::Helo(client_id.to_string())).await?;
        if !response.is_positive() {
            return Err(response.to_error());
        }
        self.extensions = Extensions::default();
        Ok(())
    }

    async fn upgrade_tls(&mut self, host: &str, skip_verify: bool) -> SmtpResult<()> {
        #[cfg(any(feature = "rustls-tls", feature = "native-tls"))]
        {
            let reader = match std::mem::replace(&mut self.stream, TransportStream::Closed) {
                TransportStream::Plain(reader) => reader,
                other => {
                    self.stream = other;
                    return Err(SmtpError::tls("Connection is already encrypted"));
                }
            };

            if !reader.buffer().is_empty() {
                return Err(SmtpError::protocol("Server sent data ahead of the TLS handshake"));
            }

            let host = host.trim_start_matches('[').trim_end_matches(']');
            let stream = tls::handshake(reader.into_inner(), host, skip_verify).await?;
            self.stream = TransportStream::Tls(BufReader::new(stream));
            self.tls_active = true;

            #[cfg(feature = "tracing")]
            tracing::debug!(host = %host, skip_verify, "TLS established");

            Ok(())
        }

        #[cfg(not(any(feature = "rustls-tls", feature = "native-tls")))]
        {
            let _ = (host, skip_verify);
            Err(SmtpError::configuration("No TLS implementation available"))
        }
    }

    /// Sends QUIT; the reply and any error are ignored.
    async fn quit(&mut self) {
        if matches!(self.stream, TransportStream::Closed) {
            return;
        }
        let _ = self.send_command(&Command::Quit).await;
        self.stream = TransportStream::Closed;
    }
}
