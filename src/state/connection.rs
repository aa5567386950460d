//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, ParameterStatus, ReadyForQuery,
    is_async_type, msg_type,
};
use crate::protocol::frontend::auth::{ScramClient, md5_password};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_ssl_request,
    write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::{Action, StateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingSslResponse,
    WaitingAuth,
    SaslContinue,
    SaslFinal,
    WaitingAuthResult,
    WaitingReady,
    Finished,
}

/// Drives a fresh socket to the authenticated, ready state.
pub struct StartupStateMachine {
    state: State,
    options: Opts,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    scram: Option<ScramClient>,
    /// SSL response byte, stored by the driver after WriteAndReadByte
    ssl_response: u8,
}

impl StartupStateMachine {
    /// Create a startup machine for the given options.
    pub fn new(options: Opts) -> Self {
        Self {
            state: State::Initial,
            options,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            scram: None,
            ssl_response: 0,
        }
    }

    /// Backend key data, available once finished.
    pub fn backend_key(&self) -> Option<BackendKeyData> {
        self.backend_key
    }

    /// Take the collected server parameters.
    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    /// Store the SSL response byte (driver side of WriteAndReadByte).
    pub fn set_ssl_response(&mut self, response: u8) {
        self.ssl_response = response;
    }

    fn write_startup_message(&self, buf: &mut Vec<u8>) {
        let mut params: Vec<(&str, &str)> =
            vec![("user", &self.options.user), ("client_encoding", "UTF8")];

        if let Some(db) = &self.options.database {
            params.push(("database", db));
        }
        if let Some(app) = &self.options.application_name {
            params.push(("application_name", app));
        }
        for (name, value) in &self.options.params {
            params.push((name, value));
        }

        write_startup(buf, &params);
    }

    fn handle_initial(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();

        match self.options.ssl_mode {
            SslMode::Disable => {
                self.write_startup_message(&mut buffer_set.write_buffer);
                self.state = State::WaitingAuth;
                Ok(Action::WriteAndReadMessage)
            }
            SslMode::Prefer | SslMode::Require => {
                write_ssl_request(&mut buffer_set.write_buffer);
                self.state = State::WaitingSslResponse;
                Ok(Action::WriteAndReadByte)
            }
        }
    }

    fn handle_ssl_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.ssl_response {
            b'S' => Err(Error::Unsupported(
                "server granted SSL but TLS transport is not compiled in".into(),
            )),
            b'N' => {
                if self.options.ssl_mode == SslMode::Require {
                    return Err(Error::ConnectFailed(
                        "SSL required but refused by server".into(),
                    ));
                }
                buffer_set.write_buffer.clear();
                self.write_startup_message(&mut buffer_set.write_buffer);
                self.state = State::WaitingAuth;
                Ok(Action::WriteAndReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "unexpected SSL response byte: {}",
                other
            ))),
        }
    }

    fn password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("password required but not provided".into()))
    }

    fn handle_auth_message(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "expected Authentication message, got '{}'",
                buffer_set.type_byte as char
            )));
        }

        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;

        match auth {
            AuthenticationMessage::Ok => {
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            AuthenticationMessage::CleartextPassword => {
                let password = self.password()?.to_string();
                buffer_set.write_buffer.clear();
                write_password(&mut buffer_set.write_buffer, &password);
                self.state = State::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.options.user, self.password()?, &salt);
                buffer_set.write_buffer.clear();
                write_password(&mut buffer_set.write_buffer, &hashed);
                self.state = State::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&"SCRAM-SHA-256") {
                    return Err(Error::Auth(format!(
                        "no supported SASL mechanism, server offers: {:?}",
                        mechanisms
                    )));
                }

                let scram = ScramClient::new(self.password()?);
                let client_first = scram.client_first_message();

                buffer_set.write_buffer.clear();
                write_sasl_initial_response(
                    &mut buffer_set.write_buffer,
                    "SCRAM-SHA-256",
                    client_first.as_bytes(),
                );

                self.scram = Some(scram);
                self.state = State::SaslContinue;
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::Unsupported(method) => Err(Error::Unsupported(format!(
                "authentication method {} is not supported",
                method
            ))),
            other => Err(Error::Protocol(format!(
                "unexpected authentication message: {:?}",
                other
            ))),
        }
    }

    fn scram(&mut self) -> Result<&mut ScramClient> {
        self.scram
            .as_mut()
            .ok_or_else(|| Error::Protocol("SCRAM exchange not initialized".into()))
    }

    fn handle_sasl_continue(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;
        match auth {
            AuthenticationMessage::SaslContinue { data } => {
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("invalid server-first-message: {}", e)))?
                    .to_string();

                let client_final = self
                    .scram()?
                    .process_server_first(&server_first)
                    .map_err(Error::Auth)?;

                buffer_set.write_buffer.clear();
                write_sasl_response(&mut buffer_set.write_buffer, client_final.as_bytes());
                self.state = State::SaslFinal;
                Ok(Action::WriteAndReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "expected SASL continue, got: {:?}",
                other
            ))),
        }
    }

    fn handle_sasl_final(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;
        match auth {
            AuthenticationMessage::SaslFinal { data } => {
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("invalid server-final-message: {}", e)))?
                    .to_string();

                self.scram()?
                    .verify_server_final(&server_final)
                    .map_err(Error::Auth)?;

                self.state = State::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "expected SASL final, got: {:?}",
                other
            ))),
        }
    }

    fn handle_auth_result(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        if buffer_set.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "expected AuthenticationOk, got '{}'",
                buffer_set.type_byte as char
            )));
        }

        match AuthenticationMessage::parse(&buffer_set.read_buffer)? {
            AuthenticationMessage::Ok => {
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Auth(format!("unexpected auth result: {:?}", other))),
        }
    }

    fn handle_ready_message(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                self.backend_key = Some(*BackendKeyData::parse(&buffer_set.read_buffer)?);
                Ok(Action::ReadMessage)
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(&buffer_set.read_buffer)?;
                self.server_params
                    .push((param.name.to_string(), param.value.to_string()));
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(&buffer_set.read_buffer)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            other => Err(Error::Protocol(format!(
                "unexpected message during startup: '{}'",
                other as char
            ))),
        }
    }
}

impl StateMachine for StartupStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => return self.handle_initial(buffer_set),
            State::WaitingSslResponse => return self.handle_ssl_response(buffer_set),
            _ => {}
        }

        let type_byte = buffer_set.type_byte;

        // ParameterStatus during WaitingReady is part of normal startup
        if is_async_type(type_byte)
            && !(self.state == State::WaitingReady && type_byte == msg_type::PARAMETER_STATUS)
        {
            return Ok(Action::ReadMessage);
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            return Err(error.into_error());
        }

        match self.state {
            State::WaitingAuth => self.handle_auth_message(buffer_set),
            State::SaslContinue => self.handle_sasl_continue(buffer_set),
            State::SaslFinal => self.handle_sasl_final(buffer_set),
            State::WaitingAuthResult => self.handle_auth_result(buffer_set),
            State::WaitingReady => self.handle_ready_message(buffer_set),
            state => Err(Error::Protocol(format!("unexpected state {:?}", state))),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> Opts {
        Opts {
            host: "localhost".into(),
            user: "app".into(),
            database: Some("appdb".into()),
            ..Opts::default()
        }
    }

    fn feed(buffer_set: &mut BufferSet, type_byte: u8, payload: &[u8]) {
        buffer_set.type_byte = type_byte;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.extend_from_slice(payload);
    }

    #[test]
    fn trust_auth_reaches_ready() {
        let mut machine = StartupStateMachine::new(opts());
        let mut buffers = BufferSet::new();

        assert_eq!(
            machine.step(&mut buffers).unwrap(),
            Action::WriteAndReadMessage
        );
        assert!(!buffers.write_buffer.is_empty());

        // AuthenticationOk
        feed(&mut buffers, b'R', &0_i32.to_be_bytes());
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::ReadMessage);

        // BackendKeyData
        let mut key = Vec::new();
        key.extend_from_slice(&42_u32.to_be_bytes());
        key.extend_from_slice(&7_u32.to_be_bytes());
        feed(&mut buffers, b'K', &key);
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::ReadMessage);

        // ReadyForQuery, idle
        feed(&mut buffers, b'Z', b"I");
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::Finished);

        assert_eq!(machine.backend_key().unwrap().process_id(), 42);
        assert_eq!(machine.transaction_status(), TransactionStatus::Idle);
    }

    #[test]
    fn cleartext_password_is_sent() {
        let mut options = opts();
        options.password = Some("secret".into());
        let mut machine = StartupStateMachine::new(options);
        let mut buffers = BufferSet::new();

        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'R', &3_i32.to_be_bytes());
        assert_eq!(
            machine.step(&mut buffers).unwrap(),
            Action::WriteAndReadMessage
        );
        assert_eq!(buffers.write_buffer[0], b'p');
        assert!(
            buffers
                .write_buffer
                .windows(6)
                .any(|w| w == b"secret")
        );
    }

    #[test]
    fn missing_password_fails_cleanly() {
        let mut machine = StartupStateMachine::new(opts());
        let mut buffers = BufferSet::new();

        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'R', &3_i32.to_be_bytes());
        assert!(matches!(
            machine.step(&mut buffers),
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn server_error_during_startup_surfaces() {
        let mut machine = StartupStateMachine::new(opts());
        let mut buffers = BufferSet::new();

        machine.step(&mut buffers).unwrap();

        let mut payload = Vec::new();
        payload.extend_from_slice(b"SFATAL\0");
        payload.extend_from_slice(b"C28P01\0");
        payload.extend_from_slice(b"Mpassword authentication failed\0");
        payload.push(0);
        feed(&mut buffers, b'E', &payload);

        match machine.step(&mut buffers) {
            Err(Error::Server(fields)) => assert_eq!(fields.code.as_deref(), Some("28P01")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
