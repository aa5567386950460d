//! Extended query protocol state machine.
//!
//! One machine drives one parameterized statement through
//! Parse + Bind + Describe + Execute + Sync and the resulting message
//! stream. On a server error mid-stream the machine keeps consuming until
//! ReadyForQuery so the connection stays usable, then reports the first
//! error observed.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::RowHandler;
use crate::oid_map::OidMap;
use crate::protocol::backend::query::{CommandComplete, DataRow, RowDescription};
use crate::protocol::backend::{ErrorResponse, is_async_type, msg_type};
use crate::protocol::frontend::{
    write_bind, write_describe_portal, write_execute, write_parse, write_sync,
};
use crate::protocol::types::TransactionStatus;
use crate::query::BinaryQuery;

use super::{Action, StateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingParse,
    WaitingBind,
    Streaming,
    WaitingReady,
    /// Consuming the remainder of a failed conversation
    Draining,
    Finished,
}

/// Extended query protocol state machine.
pub struct QueryStateMachine<'a, H> {
    state: State,
    handler: &'a mut H,
    oid_map: &'a OidMap,
    transaction_status: TransactionStatus,
    pending_error: Option<Error>,
}

impl<'a, H: RowHandler> QueryStateMachine<'a, H> {
    /// Stage a frozen query into the write buffer and build the machine.
    pub fn new(
        handler: &'a mut H,
        oid_map: &'a OidMap,
        buffer_set: &mut BufferSet,
        query: &BinaryQuery,
    ) -> Self {
        buffer_set.write_buffer.clear();
        write_parse(&mut buffer_set.write_buffer, query.text(), query.param_oids());
        write_bind(
            &mut buffer_set.write_buffer,
            query.param_count(),
            query.param_frames(),
        );
        write_describe_portal(&mut buffer_set.write_buffer);
        write_execute(&mut buffer_set.write_buffer, 0);
        write_sync(&mut buffer_set.write_buffer);

        Self {
            state: State::Initial,
            handler,
            oid_map,
            transaction_status: TransactionStatus::Idle,
            pending_error: None,
        }
    }

    fn fail(&mut self, error: Error) -> Result<Action> {
        if self.pending_error.is_none() {
            self.pending_error = Some(error);
        }
        self.state = State::Draining;
        Ok(Action::ReadMessage)
    }

    fn handle_streaming(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            msg_type::ROW_DESCRIPTION => {
                buffer_set.column_buffer.clear();
                buffer_set
                    .column_buffer
                    .extend_from_slice(&buffer_set.read_buffer);
                let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                if let Err(e) = self.handler.result_start(&cols) {
                    return self.fail(e);
                }
                Ok(Action::ReadMessage)
            }
            msg_type::NO_DATA => Ok(Action::ReadMessage),
            msg_type::DATA_ROW => {
                let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                let row = DataRow::parse(&buffer_set.read_buffer)?;
                if let Err(e) = self.handler.row(cols.fields(), row, self.oid_map) {
                    // a conversion failure does not poison the wire;
                    // keep consuming the remaining frames
                    return self.fail(e);
                }
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(&buffer_set.read_buffer)?;
                if let Err(e) = self.handler.result_end(complete) {
                    return self.fail(e);
                }
                self.state = State::WaitingReady;
                Ok(Action::ReadMessage)
            }
            msg_type::EMPTY_QUERY_RESPONSE => self.fail(Error::EmptyQuery),
            msg_type::PORTAL_SUSPENDED => self.fail(Error::Protocol(
                "portal suspended without a row limit".into(),
            )),
            // COPY would deadlock the drain loop; hard-fail instead
            msg_type::COPY_IN_RESPONSE | msg_type::COPY_OUT_RESPONSE => {
                Err(Error::UnexpectedMessage(buffer_set.type_byte as char))
            }
            other => Err(Error::UnexpectedMessage(other as char)),
        }
    }

    fn finish(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let ready = crate::protocol::backend::ReadyForQuery::parse(&buffer_set.read_buffer)?;
        self.transaction_status = ready.transaction_status().unwrap_or_default();
        self.state = State::Finished;
        match self.pending_error.take() {
            Some(error) => Err(error),
            None => Ok(Action::Finished),
        }
    }
}

impl<H: RowHandler> StateMachine for QueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            self.state = State::WaitingParse;
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;

        if is_async_type(type_byte) {
            return Ok(Action::ReadMessage);
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(&buffer_set.read_buffer)?;
            return self.fail(error.into_error());
        }

        match self.state {
            State::WaitingParse => {
                if type_byte != msg_type::PARSE_COMPLETE {
                    return Err(Error::UnexpectedMessage(type_byte as char));
                }
                self.state = State::WaitingBind;
                Ok(Action::ReadMessage)
            }
            State::WaitingBind => {
                if type_byte != msg_type::BIND_COMPLETE {
                    return Err(Error::UnexpectedMessage(type_byte as char));
                }
                self.state = State::Streaming;
                Ok(Action::ReadMessage)
            }
            State::Streaming => self.handle_streaming(buffer_set),
            State::WaitingReady | State::Draining => {
                if type_byte == msg_type::READY_FOR_QUERY {
                    self.finish(buffer_set)
                } else {
                    Ok(Action::ReadMessage)
                }
            }
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
    use crate::handler::{Collect, DropRows};
    use crate::protocol::types::oid;
    use crate::query::Query;

    fn feed(buffer_set: &mut BufferSet, type_byte: u8, payload: &[u8]) {
        buffer_set.type_byte = type_byte;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.extend_from_slice(payload);
    }

    fn row_description(cols: &[(&str, u32)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(cols.len() as u16).to_be_bytes());
        for (name, type_oid) in cols {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&0i16.to_be_bytes());
            out.extend_from_slice(&type_oid.to_be_bytes());
            out.extend_from_slice(&(-1i16).to_be_bytes());
            out.extend_from_slice(&(-1i32).to_be_bytes());
            out.extend_from_slice(&1u16.to_be_bytes());
        }
        out
    }

    fn data_row(cells: &[Option<&[u8]>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(cells.len() as u16).to_be_bytes());
        for cell in cells {
            match cell {
                None => out.extend_from_slice(&(-1i32).to_be_bytes()),
                Some(bytes) => {
                    out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    out.extend_from_slice(bytes);
                }
            }
        }
        out
    }

    fn error_response(code: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"SERROR\0");
        out.push(b'C');
        out.extend_from_slice(code.as_bytes());
        out.push(0);
        out.extend_from_slice(b"Mboom\0");
        out.push(0);
        out
    }

    fn frozen(sql: &str) -> BinaryQuery {
        let map = OidMap::new();
        Query::new(sql, (7_i32,)).freeze(&map).unwrap()
    }

    #[test]
    fn select_streams_rows_into_the_sink() {
        let map = OidMap::new();
        let query = frozen("SELECT $1::int4");
        let mut sink = Collect::<(i32,)>::new();
        let mut buffers = BufferSet::new();
        let mut machine = QueryStateMachine::new(&mut sink, &map, &mut buffers, &query);

        assert_eq!(
            machine.step(&mut buffers).unwrap(),
            Action::WriteAndReadMessage
        );

        feed(&mut buffers, b'1', &[]);
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::ReadMessage);
        feed(&mut buffers, b'2', &[]);
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::ReadMessage);
        feed(&mut buffers, b'T', &row_description(&[("x", oid::INT4)]));
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::ReadMessage);
        feed(&mut buffers, b'D', &data_row(&[Some(&7i32.to_be_bytes())]));
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::ReadMessage);
        feed(&mut buffers, b'C', b"SELECT 1\0");
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::ReadMessage);
        feed(&mut buffers, b'Z', b"I");
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::Finished);

        assert_eq!(sink.into_rows(), vec![(7,)]);
    }

    #[test]
    fn server_error_is_reported_after_drain() {
        let map = OidMap::new();
        let query = frozen("SELECT $1::int4");
        let mut sink = DropRows::new();
        let mut buffers = BufferSet::new();
        let mut machine = QueryStateMachine::new(&mut sink, &map, &mut buffers, &query);

        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'E', &error_response("42601"));
        // error recorded, machine keeps reading to ReadyForQuery
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::ReadMessage);
        feed(&mut buffers, b'Z', b"I");
        match machine.step(&mut buffers) {
            Err(Error::Server(fields)) => assert_eq!(fields.code.as_deref(), Some("42601")),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(machine.transaction_status(), TransactionStatus::Idle);
    }

    #[test]
    fn decode_error_still_drains_remaining_rows() {
        let map = OidMap::new();
        let query = frozen("SELECT $1::int4");
        // text sink for an int column: every row fails to decode
        let mut sink = Collect::<(String,)>::new();
        let mut buffers = BufferSet::new();
        let mut machine = QueryStateMachine::new(&mut sink, &map, &mut buffers, &query);

        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'1', &[]);
        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'2', &[]);
        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'T', &row_description(&[("x", oid::INT4)]));
        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'D', &data_row(&[Some(&7i32.to_be_bytes())]));
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::ReadMessage);
        // the machine is draining now; remaining frames are consumed
        feed(&mut buffers, b'D', &data_row(&[Some(&8i32.to_be_bytes())]));
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::ReadMessage);
        feed(&mut buffers, b'C', b"SELECT 2\0");
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::ReadMessage);
        feed(&mut buffers, b'Z', b"I");
        assert!(matches!(
            machine.step(&mut buffers),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn empty_query_is_its_own_error() {
        let map = OidMap::new();
        let query = frozen("");
        let mut sink = DropRows::new();
        let mut buffers = BufferSet::new();
        let mut machine = QueryStateMachine::new(&mut sink, &map, &mut buffers, &query);

        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'1', &[]);
        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'2', &[]);
        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'I', &[]);
        assert_eq!(machine.step(&mut buffers).unwrap(), Action::ReadMessage);
        feed(&mut buffers, b'Z', b"I");
        assert!(matches!(machine.step(&mut buffers), Err(Error::EmptyQuery)));
    }

    #[test]
    fn copy_fails_hard() {
        let map = OidMap::new();
        let query = frozen("COPY x FROM stdin");
        let mut sink = DropRows::new();
        let mut buffers = BufferSet::new();
        let mut machine = QueryStateMachine::new(&mut sink, &map, &mut buffers, &query);

        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'1', &[]);
        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'2', &[]);
        machine.step(&mut buffers).unwrap();
        feed(&mut buffers, b'G', &[0, 0, 0]);
        assert!(matches!(
            machine.step(&mut buffers),
            Err(Error::UnexpectedMessage('G'))
        ));
    }
}
