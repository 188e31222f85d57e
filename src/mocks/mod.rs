//! Mock implementations for testing.
//!
//! [`MockTransport`] replays queued server replies and records what the
//! session sent. Clones share their recordings, so a test can hand one
//! clone to a session and inspect the other.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::TlsConfig;
use crate::errors::{SmtpError, SmtpResult};
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse, TransactionState};
use crate::transport::SmtpTransport;

/// Mock SMTP transport for testing.
#[derive(Debug, Clone)]
pub struct MockTransport {
    /// Recorded commands.
    commands: Arc<Mutex<Vec<SmtpCommand>>>,
    /// Queued responses.
    responses: Arc<Mutex<VecDeque<SmtpResponse>>>,
    /// Default response.
    default_response: SmtpResponse,
    /// Current state.
    state: TransactionState,
    /// Server capabilities.
    capabilities: Option<EsmtpCapabilities>,
    /// TLS enabled.
    tls_enabled: bool,
    /// Server names passed to TLS upgrades.
    tls_upgrades: Arc<Mutex<Vec<String>>>,
    /// Data received.
    data_received: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Simulate failure.
    fail_next: Arc<Mutex<Option<SmtpError>>>,
    /// Failure for the next message body write only.
    fail_data: Arc<Mutex<Option<SmtpError>>>,
}

impl MockTransport {
    /// Creates a new mock transport answering `250 OK` by default.
    pub fn new() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            default_response: SmtpResponse::new(codes::OK, "OK"),
            state: TransactionState::Connected,
            capabilities: None,
            tls_enabled: false,
            tls_upgrades: Arc::new(Mutex::new(Vec::new())),
            data_received: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(Mutex::new(None)),
            fail_data: Arc::new(Mutex::new(None)),
        }
    }

    /// Queues a response.
    pub fn queue_response(&self, response: SmtpResponse) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// Queues an OK response.
    pub fn queue_ok(&self) -> &Self {
        self.queue_response(SmtpResponse::new(codes::OK, "OK"))
    }

    /// Queues an error response.
    pub fn queue_error(&self, code: u16, message: &str) -> &Self {
        self.queue_response(SmtpResponse::new(code, message))
    }

    /// Sets the next call to fail.
    pub fn fail_next_with(&self, error: SmtpError) -> &Self {
        *self.fail_next.lock().unwrap() = Some(error);
        self
    }

    /// Sets the next message body write to fail, leaving commands alone.
    ///
    /// Simulates a connection dropping in the middle of a transaction.
    pub fn fail_data_with(&self, error: SmtpError) -> &Self {
        *self.fail_data.lock().unwrap() = Some(error);
        self
    }

    /// Returns recorded commands.
    pub fn recorded_commands(&self) -> Vec<SmtpCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Returns received data.
    pub fn received_data(&self) -> Vec<Vec<u8>> {
        self.data_received.lock().unwrap().clone()
    }

    /// Returns the server names of every TLS upgrade, in order.
    pub fn tls_upgrades(&self) -> Vec<String> {
        self.tls_upgrades.lock().unwrap().clone()
    }

    /// Clears recorded data.
    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
        self.responses.lock().unwrap().clear();
        self.data_received.lock().unwrap().clear();
        self.tls_upgrades.lock().unwrap().clear();
        *self.fail_next.lock().unwrap() = None;
        *self.fail_data.lock().unwrap() = None;
    }

    fn take_failure(&self) -> SmtpResult<()> {
        match self.fail_next.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn get_next_response(&self) -> SmtpResponse {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        self.take_failure()?;
        self.commands.lock().unwrap().push(command.clone());
        Ok(self.get_next_response())
    }

    async fn send_data(&mut self, data: &[u8]) -> SmtpResult<()> {
        self.take_failure()?;
        if let Some(error) = self.fail_data.lock().unwrap().take() {
            return Err(error);
        }
        self.data_received.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        self.take_failure()?;
        Ok(self.get_next_response())
    }

    async fn upgrade_tls(&mut self, _config: &TlsConfig, server_name: &str) -> SmtpResult<()> {
        self.take_failure()?;
        self.tls_upgrades
            .lock()
            .unwrap()
            .push(server_name.to_string());
        self.tls_enabled = true;
        self.state = TransactionState::TlsEstablished;
        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    async fn close(&mut self) -> SmtpResult<()> {
        self.state = TransactionState::Closed;
        Ok(())
    }

    fn state(&self) -> TransactionState {
        self.state
    }

    fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    fn capabilities(&self) -> Option<&EsmtpCapabilities> {
        self.capabilities.as_ref()
    }

    fn set_capabilities(&mut self, caps: EsmtpCapabilities) {
        self.capabilities = Some(caps);
    }
}

/// Creates an EHLO response advertising AUTH and STARTTLS.
pub fn ehlo_response() -> SmtpResponse {
    SmtpResponse {
        code: codes::OK,
        enhanced_code: None,
        message: vec![
            "smtp.example.com Hello".to_string(),
            "SIZE 10485760".to_string(),
            "AUTH PLAIN LOGIN".to_string(),
            "STARTTLS".to_string(),
            "8BITMIME".to_string(),
        ],
        is_multiline: true,
    }
}

/// Creates an authentication success response.
pub fn auth_success_response() -> SmtpResponse {
    SmtpResponse::new(codes::AUTH_SUCCESS, "Authentication successful")
}

/// Creates a DATA ready response.
pub fn data_ready_response() -> SmtpResponse {
    SmtpResponse::new(codes::START_MAIL_INPUT, "Start mail input")
}

/// Creates an AUTH continue response.
pub fn auth_continue_response(challenge: &str) -> SmtpResponse {
    SmtpResponse::new(codes::AUTH_CONTINUE, challenge)
}

/// Creates a QUIT response.
pub fn quit_response() -> SmtpResponse {
    SmtpResponse::new(codes::SERVICE_CLOSING, "Bye")
}
