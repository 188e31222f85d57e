//! SMTP session driver.
//!
//! [`SmtpSession`] runs one strictly sequential mail transaction over a
//! connected [`SmtpTransport`]:
//!
//! ```text
//! EHLO (HELO) -> [STARTTLS -> EHLO] -> AUTH -> MAIL -> RCPT x N -> DATA -> QUIT
//! ```
//!
//! The first failing step ends the session. Before the error is returned a
//! QUIT is attempted and the connection is shut down.

use crate::address::Envelope;
use crate::auth::{decode_challenge, encode_payload, ServerInfo, SmtpAuthenticator};
use crate::config::{TlsConfig, TlsMode};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::mime::MimeEncoder;
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse, TransactionState};
use crate::transport::SmtpTransport;

/// Maps a rejection to the kind of the command that was rejected.
///
/// Codes with a more specific meaning (421, 530, 552, ...) keep their kind.
fn refine(err: SmtpError, kind: SmtpErrorKind) -> SmtpError {
    match err.kind() {
        SmtpErrorKind::UnexpectedResponse | SmtpErrorKind::InvalidResponse => err.with_kind(kind),
        _ => err,
    }
}

/// One SMTP session over one connection.
#[derive(Debug)]
pub struct SmtpSession<T: SmtpTransport> {
    transport: T,
    client_id: String,
    server_name: String,
    esmtp: bool,
}

impl<T: SmtpTransport> SmtpSession<T> {
    /// Wraps a transport that has already read the server greeting.
    ///
    /// `server_name` is the bare host name used for TLS verification and
    /// reported to authenticators.
    pub fn new(transport: T, client_id: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            transport,
            client_id: client_id.into(),
            server_name: server_name.into(),
            esmtp: false,
        }
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Consumes the session, returning the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Returns the current transaction state.
    pub fn state(&self) -> TransactionState {
        self.transport.state()
    }

    fn ensure(&self, allowed: bool, command: &str) -> SmtpResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(SmtpError::protocol(format!(
                "{} not allowed in state {:?}",
                command,
                self.transport.state()
            )))
        }
    }

    /// Greets the server with EHLO, falling back to HELO.
    pub async fn hello(&mut self) -> SmtpResult<()> {
        let response = self
            .transport
            .send_command(&SmtpCommand::Ehlo(self.client_id.clone()))
            .await?;

        if response.is_success() {
            self.transport
                .set_capabilities(EsmtpCapabilities::from_ehlo_response(&response));
            self.esmtp = true;
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(code = response.code, "EHLO rejected, falling back to HELO");

            let response = self
                .transport
                .send_command(&SmtpCommand::Helo(self.client_id.clone()))
                .await?;
            if !response.is_success() {
                return Err(response.to_error());
            }
            self.transport.set_capabilities(EsmtpCapabilities::default());
            self.esmtp = false;
        }

        self.transport.set_state(TransactionState::Greeted);
        Ok(())
    }

    /// Upgrades the connection with STARTTLS and greets again.
    pub async fn starttls(&mut self, tls: &TlsConfig) -> SmtpResult<()> {
        self.ensure(self.state().can_start_tls(), "STARTTLS")?;

        let advertised = self.esmtp
            && self
                .transport
                .capabilities()
                .map(|c| c.starttls)
                .unwrap_or(false);
        if !advertised {
            return Err(SmtpError::new(
                SmtpErrorKind::StarttlsNotSupported,
                "server does not advertise STARTTLS",
            ));
        }

        let response = self.transport.send_command(&SmtpCommand::StartTls).await?;
        if response.code != codes::SERVICE_READY {
            return Err(response.to_error());
        }

        let server_name = self.server_name.clone();
        self.transport.upgrade_tls(tls, &server_name).await?;

        #[cfg(feature = "tracing")]
        tracing::info!(server_name = %server_name, "TLS established via STARTTLS");

        self.hello().await
    }

    /// Runs the SASL exchange with the given mechanism.
    pub async fn authenticate(&mut self, authenticator: &dyn SmtpAuthenticator) -> SmtpResult<()> {
        self.ensure(self.state().can_authenticate(), "AUTH")?;

        // Without EHLO there is nothing to check, the server decides.
        let mechanisms = match self.transport.capabilities() {
            Some(caps) if self.esmtp => {
                if !caps.has_auth() {
                    return Err(SmtpError::new(
                        SmtpErrorKind::AuthMethodNotSupported,
                        "server doesn't support AUTH",
                    ));
                }
                caps.auth_mechanisms.clone()
            }
            _ => Vec::new(),
        };

        let server = ServerInfo {
            name: self.server_name.clone(),
            tls: self.transport.is_tls(),
            mechanisms,
        };

        let (mechanism, initial) = authenticator.begin(&server)?;
        let mut response = self
            .transport
            .send_command(&SmtpCommand::Auth {
                mechanism: mechanism.to_string(),
                initial_response: (!initial.is_empty()).then(|| encode_payload(&initial)),
            })
            .await?;

        loop {
            let answer = match response.code {
                codes::AUTH_CONTINUE => decode_challenge(response.first_message())
                    .and_then(|challenge| authenticator.respond(&challenge, true)),
                codes::AUTH_SUCCESS => {
                    authenticator.respond(response.full_message().as_bytes(), false)
                }
                _ => return Err(response.to_error()),
            };

            let answer = match answer {
                Ok(answer) => answer,
                Err(err) => {
                    // Cancel the exchange; the reply carries no information.
                    let _ = self
                        .transport
                        .send_command(&SmtpCommand::AuthResponse("*".to_string()))
                        .await;
                    return Err(err);
                }
            };

            match answer {
                Some(bytes) => {
                    response = self
                        .transport
                        .send_command(&SmtpCommand::AuthResponse(encode_payload(&bytes)))
                        .await?;
                }
                None if response.code == codes::AUTH_SUCCESS => break,
                None => {
                    // The mechanism is done but the server still challenges.
                    response = self
                        .transport
                        .send_command(&SmtpCommand::AuthResponse(String::new()))
                        .await?;
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!(mechanism = mechanism, "Authenticated");

        self.transport.set_state(TransactionState::Authenticated);
        Ok(())
    }

    /// Opens the mail transaction with `MAIL FROM`.
    pub async fn mail(&mut self, sender: &str) -> SmtpResult<()> {
        self.ensure(self.state().can_start_mail(), "MAIL FROM")?;

        let response = self
            .transport
            .send_command(&SmtpCommand::MailFrom {
                address: sender.to_string(),
            })
            .await?;
        if !response.is_success() {
            return Err(refine(response.to_error(), SmtpErrorKind::SenderRejected));
        }

        self.transport.set_state(TransactionState::InTransaction);
        Ok(())
    }

    /// Adds one recipient with `RCPT TO`.
    pub async fn rcpt(&mut self, recipient: &str) -> SmtpResult<()> {
        self.ensure(self.state().can_add_recipient(), "RCPT TO")?;

        let response = self
            .transport
            .send_command(&SmtpCommand::RcptTo {
                address: recipient.to_string(),
            })
            .await?;
        if !response.is_success() {
            return Err(refine(
                response.to_error(),
                SmtpErrorKind::RecipientRejected,
            ));
        }

        self.transport.set_state(TransactionState::RecipientsAdded);
        Ok(())
    }

    /// Transmits the message and returns the server's acceptance reply.
    pub async fn data(&mut self, message: &[u8]) -> SmtpResult<SmtpResponse> {
        self.ensure(self.state().can_send_data(), "DATA")?;

        let response = self.transport.send_command(&SmtpCommand::Data).await?;
        if response.code != codes::START_MAIL_INPUT {
            return Err(refine(response.to_error(), SmtpErrorKind::DataRejected));
        }

        let content = MimeEncoder::prepare_data_content(message);
        self.transport.send_data(&content).await?;

        let response = self.transport.read_response().await?;
        if !response.is_success() {
            return Err(refine(response.to_error(), SmtpErrorKind::DataRejected));
        }

        #[cfg(feature = "tracing")]
        tracing::info!(response = %response, "Message accepted");

        self.transport.set_state(TransactionState::Complete);
        Ok(response)
    }

    /// Ends the session with `QUIT` and shuts the connection down.
    pub async fn quit(&mut self) -> SmtpResult<()> {
        let result = match self.transport.send_command(&SmtpCommand::Quit).await {
            Ok(response) if response.code == codes::SERVICE_CLOSING => Ok(()),
            Ok(response) => Err(response.to_error()),
            Err(err) => Err(err),
        };
        let _ = self.transport.close().await;
        result
    }

    /// Best-effort QUIT and shutdown after a failure.
    pub async fn abort(&mut self) {
        if self.transport.state() == TransactionState::Closed {
            return;
        }
        let _ = self.transport.send_command(&SmtpCommand::Quit).await;
        let _ = self.transport.close().await;
    }

    async fn transaction(
        &mut self,
        mode: TlsMode,
        tls: &TlsConfig,
        authenticator: &dyn SmtpAuthenticator,
        envelope: &Envelope,
        message: &[u8],
    ) -> SmtpResult<SmtpResponse> {
        self.hello().await?;
        if mode == TlsMode::StartTls {
            self.starttls(tls).await?;
        }
        self.authenticate(authenticator).await?;
        self.mail(&envelope.sender).await?;
        for recipient in &envelope.recipients {
            self.rcpt(recipient).await?;
        }
        self.data(message).await
    }

    /// Runs the whole session: greeting through QUIT.
    ///
    /// Any failure before QUIT triggers [`abort`](Self::abort). A failing
    /// QUIT is reported even though the message was already accepted.
    pub async fn deliver(
        &mut self,
        mode: TlsMode,
        tls: &TlsConfig,
        authenticator: &dyn SmtpAuthenticator,
        envelope: &Envelope,
        message: &[u8],
    ) -> SmtpResult<SmtpResponse> {
        match self
            .transaction(mode, tls, authenticator, envelope, message)
            .await
        {
            Ok(response) => {
                self.quit().await?;
                Ok(response)
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %err, state = ?self.state(), "Session failed, closing");

                self.abort().await;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, LoginAuthenticator, PlainAuthenticator};
    use crate::mocks::{self, MockTransport};

    fn session(transport: MockTransport) -> SmtpSession<MockTransport> {
        SmtpSession::new(transport, "localhost", "localhost")
    }

    fn envelope(recipients: &[&str]) -> Envelope {
        Envelope {
            sender: "from@localhost".to_string(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn plain() -> PlainAuthenticator {
        PlainAuthenticator::new(Credentials::plain("login@localhost", "password"))
    }

    fn commands(transport: &MockTransport) -> Vec<String> {
        transport
            .recorded_commands()
            .iter()
            .map(|c| c.to_smtp_string())
            .collect()
    }

    #[tokio::test]
    async fn test_plaintext_delivery() {
        let transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_response())
            .queue_response(mocks::auth_success_response())
            .queue_ok()
            .queue_ok()
            .queue_ok()
            .queue_response(mocks::data_ready_response())
            .queue_response(SmtpResponse::new(250, "queued as 42"))
            .queue_response(mocks::quit_response());

        let mut session = session(transport.clone());
        let response = session
            .deliver(
                TlsMode::None,
                &TlsConfig::default(),
                &plain(),
                &envelope(&["a@localhost", "b@localhost"]),
                b"Subject: hi\r\n\r\n.leading dot\r\n",
            )
            .await
            .unwrap();

        assert_eq!(response.first_message(), "queued as 42");
        assert_eq!(
            commands(&transport),
            vec![
                "EHLO localhost",
                "AUTH PLAIN AGxvZ2luQGxvY2FsaG9zdABwYXNzd29yZA==",
                "MAIL FROM:<from@localhost>",
                "RCPT TO:<a@localhost>",
                "RCPT TO:<b@localhost>",
                "DATA",
                "QUIT",
            ]
        );
        assert_eq!(
            transport.received_data(),
            vec![b"Subject: hi\r\n\r\n..leading dot\r\n.\r\n".to_vec()]
        );
        assert_eq!(session.state(), TransactionState::Closed);
    }

    #[tokio::test]
    async fn test_ehlo_falls_back_to_helo() {
        let transport = MockTransport::new();
        transport.queue_error(502, "Command not implemented").queue_ok();

        let mut session = session(transport.clone());
        session.hello().await.unwrap();

        assert_eq!(commands(&transport), vec!["EHLO localhost", "HELO localhost"]);
        assert_eq!(session.state(), TransactionState::Greeted);
    }

    #[tokio::test]
    async fn test_login_over_starttls_upgrades_before_auth() {
        let transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_response())
            .queue_response(SmtpResponse::new(220, "Ready to start TLS"))
            .queue_response(mocks::ehlo_response())
            .queue_response(mocks::auth_continue_response("VXNlcm5hbWU6"))
            .queue_response(mocks::auth_continue_response("UGFzc3dvcmQ6"))
            .queue_response(mocks::auth_success_response());

        let mut session = SmtpSession::new(transport.clone(), "localhost", "smtp.example.com");
        session.hello().await.unwrap();
        session.starttls(&TlsConfig::default()).await.unwrap();
        assert!(session.transport().is_tls());

        let login = LoginAuthenticator::new(Credentials::plain("login@localhost", "password"));
        session.authenticate(&login).await.unwrap();

        assert_eq!(
            commands(&transport),
            vec![
                "EHLO localhost",
                "STARTTLS",
                "EHLO localhost",
                "AUTH LOGIN",
                "bG9naW5AbG9jYWxob3N0",
                "cGFzc3dvcmQ=",
            ]
        );
        assert_eq!(transport.tls_upgrades(), vec!["smtp.example.com".to_string()]);
        assert_eq!(session.state(), TransactionState::Authenticated);
    }

    #[tokio::test]
    async fn test_starttls_requires_capability() {
        let transport = MockTransport::new();
        transport.queue_response(SmtpResponse {
            code: 250,
            enhanced_code: None,
            message: vec!["localhost".to_string(), "AUTH PLAIN".to_string()],
            is_multiline: true,
        });

        let mut session = session(transport.clone());
        session.hello().await.unwrap();
        let err = session.starttls(&TlsConfig::default()).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::StarttlsNotSupported);
    }

    #[tokio::test]
    async fn test_auth_requires_capability() {
        let transport = MockTransport::new();
        transport.queue_response(SmtpResponse {
            code: 250,
            enhanced_code: None,
            message: vec!["localhost".to_string(), "STARTTLS".to_string()],
            is_multiline: true,
        });

        let mut session = session(transport.clone());
        session.hello().await.unwrap();
        let err = session.authenticate(&plain()).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AuthMethodNotSupported);
    }

    #[tokio::test]
    async fn test_unknown_login_prompt_cancels_exchange() {
        let transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_response())
            .queue_response(mocks::auth_continue_response("UGFzc2NvZGU6"));

        let mut session = session(transport.clone());
        session.hello().await.unwrap();
        let login = LoginAuthenticator::new(Credentials::plain("user", "pass"));
        let err = session.authenticate(&login).await.unwrap_err();

        assert_eq!(err.kind(), SmtpErrorKind::AuthProtocol);
        assert_eq!(commands(&transport).last().map(String::as_str), Some("*"));
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_response())
            .queue_error(535, "5.7.8 Authentication credentials invalid");

        let mut session = session(transport.clone());
        session.hello().await.unwrap();
        let err = session.authenticate(&plain()).await.unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::CredentialsInvalid);
    }

    #[tokio::test]
    async fn test_rcpt_rejection_aborts_before_data() {
        let transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_response())
            .queue_response(mocks::auth_success_response())
            .queue_ok()
            .queue_ok()
            .queue_error(550, "5.1.1 No such user")
            .queue_response(mocks::quit_response());

        let mut session = session(transport.clone());
        let err = session
            .deliver(
                TlsMode::None,
                &TlsConfig::default(),
                &plain(),
                &envelope(&["a@localhost", "nobody@localhost", "c@localhost"]),
                b"Subject: hi\r\n\r\nbody\r\n",
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), SmtpErrorKind::RecipientRejected);
        assert_eq!(err.smtp_code(), Some(550));
        let sent = commands(&transport);
        assert!(!sent.contains(&"DATA".to_string()));
        assert!(!sent.contains(&"RCPT TO:<c@localhost>".to_string()));
        assert_eq!(sent.last().map(String::as_str), Some("QUIT"));
        assert!(transport.received_data().is_empty());
        assert_eq!(session.state(), TransactionState::Closed);
    }

    #[tokio::test]
    async fn test_sender_rejection() {
        let transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_response())
            .queue_response(mocks::auth_success_response())
            .queue_error(553, "sender not allowed");

        let mut session = session(transport.clone());
        let err = session
            .deliver(
                TlsMode::None,
                &TlsConfig::default(),
                &plain(),
                &envelope(&["a@localhost"]),
                b"x",
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::SenderRejected);
    }

    #[tokio::test]
    async fn test_data_rejection() {
        let transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_response())
            .queue_response(mocks::auth_success_response())
            .queue_ok()
            .queue_ok()
            .queue_response(mocks::data_ready_response())
            .queue_error(554, "5.6.0 Message rejected as spam");

        let mut session = session(transport.clone());
        let err = session
            .deliver(
                TlsMode::None,
                &TlsConfig::default(),
                &plain(),
                &envelope(&["a@localhost"]),
                b"spam",
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::DataRejected);
    }

    #[tokio::test]
    async fn test_quit_failure_is_surfaced() {
        let transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_response())
            .queue_response(mocks::auth_success_response())
            .queue_ok()
            .queue_ok()
            .queue_response(mocks::data_ready_response())
            .queue_ok()
            .queue_error(500, "what?");

        let mut session = session(transport.clone());
        let err = session
            .deliver(
                TlsMode::None,
                &TlsConfig::default(),
                &plain(),
                &envelope(&["a@localhost"]),
                b"body",
            )
            .await
            .unwrap_err();

        assert_eq!(err.smtp_code(), Some(500));
        // Exactly one QUIT: the failed QUIT is not retried by the abort path.
        let quits = commands(&transport).iter().filter(|c| *c == "QUIT").count();
        assert_eq!(quits, 1);
        assert_eq!(transport.received_data().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_commands_rejected() {
        let mut session = session(MockTransport::new());
        assert!(session.rcpt("a@localhost").await.is_err());
        assert!(session.data(b"x").await.is_err());
        assert!(session.transport().recorded_commands().is_empty());
    }

    #[tokio::test]
    async fn test_connection_lost_during_data_closes_session() {
        let transport = MockTransport::new();
        transport
            .queue_response(mocks::ehlo_response())
            .queue_response(mocks::auth_success_response())
            .queue_ok()
            .queue_ok()
            .queue_response(mocks::data_ready_response())
            .queue_response(mocks::quit_response());
        transport.fail_data_with(SmtpError::new(
            SmtpErrorKind::ConnectionReset,
            "Connection reset by peer",
        ));

        let mut session = session(transport.clone());
        let err = session
            .deliver(
                TlsMode::None,
                &TlsConfig::default(),
                &plain(),
                &envelope(&["a@localhost"]),
                b"body",
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), SmtpErrorKind::ConnectionReset);
        assert_eq!(session.state(), TransactionState::Closed);
        assert!(transport.received_data().is_empty());
        let sent = commands(&transport);
        assert_eq!(&sent[sent.len() - 2..], &["DATA", "QUIT"]);
    }

    #[tokio::test]
    async fn test_transport_error_on_hello_closes_session() {
        let transport = MockTransport::new();
        transport.fail_next_with(SmtpError::new(
            SmtpErrorKind::ConnectionReset,
            "Connection reset by peer",
        ));

        let mut session = session(transport.clone());
        let err = session
            .deliver(
                TlsMode::StartTls,
                &TlsConfig::default(),
                &plain(),
                &envelope(&["a@localhost"]),
                b"body",
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), SmtpErrorKind::ConnectionReset);
        assert_eq!(session.state(), TransactionState::Closed);
        assert!(transport.tls_upgrades().is_empty());
        assert_eq!(commands(&transport), vec!["QUIT"]);
    }
}
