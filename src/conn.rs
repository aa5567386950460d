//! Asynchronous PostgreSQL connection.
//!
//! A [`Conn`] owns the socket, the buffer set and the per-connection OID
//! map, and drives the sans-I/O state machines. It runs exactly one
//! operation at a time; a connection that errors mid-conversation is
//! marked broken and never reused.

use tokio::net::TcpStream;

use crate::buffer_pool::{GLOBAL_BUFFER_POOL, PooledBufferSet};
use crate::conversion::{PgOid, ToParams};
use crate::error::{Error, Result};
use crate::handler::{Collect, DropRows, RowHandler};
use crate::oid_map::OidMap;
use crate::opts::Opts;
use crate::protocol::backend::BackendKeyData;
use crate::protocol::frontend::write_terminate;
use crate::protocol::types::TransactionStatus;
use crate::query::{BinaryQuery, Query};
use crate::state::connection::StartupStateMachine;
use crate::state::query::QueryStateMachine;
use crate::state::{Action, StateMachine};
use crate::stream::Stream;

/// Asynchronous PostgreSQL connection.
pub struct Conn {
    stream: Stream,
    buffer_set: PooledBufferSet,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    is_broken: bool,
    oid_map: OidMap,
    /// Message of the last server error seen on this connection
    error_context: Option<String>,
}

impl Conn {
    /// Connect, authenticate and resolve user-type OIDs.
    ///
    /// `oid_map` is the source's prototype; the connection takes its own
    /// copy and fills the pending entries from `pg_type`.
    pub async fn establish(opts: &Opts, oid_map: OidMap) -> Result<Self> {
        if opts.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }

        let addr = format!("{}:{}", opts.host, opts.port);
        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::ConnectFailed(format!("{}: {}", addr, e)))?;
        tcp.set_nodelay(true)?;

        let mut conn = Self {
            stream: Stream::new(tcp),
            buffer_set: GLOBAL_BUFFER_POOL.get(),
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            is_broken: false,
            oid_map,
            error_context: None,
        };

        conn.startup(opts).await?;
        conn.discover_oids().await?;

        tracing::debug!(host = %opts.host, port = opts.port, "connection established");
        Ok(conn)
    }

    async fn startup(&mut self, opts: &Opts) -> Result<()> {
        let mut machine = StartupStateMachine::new(opts.clone());

        loop {
            match machine.step(&mut self.buffer_set)? {
                Action::WriteAndReadByte => {
                    self.stream.write_all(&self.buffer_set.write_buffer).await?;
                    self.stream.flush().await?;
                    let byte = self.stream.read_u8().await?;
                    machine.set_ssl_response(byte);
                }
                Action::ReadMessage => {
                    self.stream.read_message(&mut self.buffer_set).await?;
                }
                Action::Write => {
                    self.stream.write_all(&self.buffer_set.write_buffer).await?;
                    self.stream.flush().await?;
                }
                Action::WriteAndReadMessage => {
                    self.stream.write_all(&self.buffer_set.write_buffer).await?;
                    self.stream.flush().await?;
                    self.stream.read_message(&mut self.buffer_set).await?;
                }
                Action::Finished => break,
            }
        }

        self.backend_key = machine.backend_key();
        self.server_params = machine.take_server_params();
        self.transaction_status = machine.transaction_status();
        Ok(())
    }

    /// Resolve every pending OID map entry with one `pg_type` query.
    async fn discover_oids(&mut self) -> Result<()> {
        let names = self.oid_map.pending();
        if names.is_empty() {
            return Ok(());
        }

        let mut sink = Collect::<(String, PgOid)>::new();
        let result = self
            .exec(
                Query::new(
                    "SELECT typname, oid FROM pg_type WHERE typname = ANY($1)",
                    (names.clone(),),
                ),
                &mut sink,
            )
            .await;

        if let Err(e) = result {
            return Err(Error::OidDiscovery(format!("catalog query failed: {}", e)));
        }

        let rows = sink.into_rows();
        if rows.len() != names.len() {
            let mut missing = names;
            missing.retain(|n| !rows.iter().any(|(found, _)| found == n));
            return Err(Error::OidDiscovery(format!(
                "{} of {} registered types missing from pg_type: {:?}",
                missing.len(),
                missing.len() + rows.len(),
                missing
            )));
        }

        for (name, PgOid(oid)) in rows {
            self.oid_map.resolve(&name, oid);
        }

        debug_assert!(self.oid_map.is_resolved());
        Ok(())
    }

    /// Backend key data for out-of-band cancellation.
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// Server parameters announced at startup.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    /// The connection's OID map.
    pub fn oid_map(&self) -> &OidMap {
        &self.oid_map
    }

    /// Current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Whether the connection is unusable.
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    /// Mark the connection unusable. Its pool will destroy it on release.
    pub fn mark_broken(&mut self) {
        self.is_broken = true;
    }

    /// Message of the last server error seen on this connection.
    pub fn error_context(&self) -> Option<&str> {
        self.error_context.as_deref()
    }

    /// Execute a query, streaming results into `sink`.
    pub async fn exec<P: ToParams, H: RowHandler>(
        &mut self,
        query: Query<'_, P>,
        sink: &mut H,
    ) -> Result<()> {
        let frozen = query.freeze(&self.oid_map)?;
        self.exec_frozen(&frozen, sink).await
    }

    /// Execute a query and discard rows, returning the affected count.
    pub async fn exec_drop<P: ToParams>(&mut self, query: Query<'_, P>) -> Result<Option<u64>> {
        let mut sink = DropRows::new();
        self.exec(query, &mut sink).await?;
        Ok(sink.rows_affected())
    }

    /// Execute an already-frozen query.
    pub async fn exec_frozen<H: RowHandler>(
        &mut self,
        query: &BinaryQuery,
        sink: &mut H,
    ) -> Result<()> {
        if self.is_broken {
            return Err(Error::ConnectionBroken);
        }

        // pessimistically broken while the conversation is in flight, so
        // an abandoned future leaves the connection unreusable
        self.is_broken = true;
        let result = self.exec_inner(query, sink).await;
        match &result {
            Ok(()) => self.is_broken = false,
            Err(e) => {
                if let Error::Server(fields) = e {
                    self.error_context = Some(fields.to_string());
                }
                // errors reported after a full drain leave the wire clean
                self.is_broken = e.is_connection_broken();
            }
        }
        result
    }

    async fn exec_inner<H: RowHandler>(&mut self, query: &BinaryQuery, sink: &mut H) -> Result<()> {
        let mut machine =
            QueryStateMachine::new(sink, &self.oid_map, &mut self.buffer_set, query);

        loop {
            match machine.step(&mut self.buffer_set)? {
                Action::ReadMessage => {
                    self.stream.read_message(&mut self.buffer_set).await?;
                }
                Action::Write => {
                    self.stream.write_all(&self.buffer_set.write_buffer).await?;
                    self.stream.flush().await?;
                }
                Action::WriteAndReadMessage => {
                    self.stream.write_all(&self.buffer_set.write_buffer).await?;
                    self.stream.flush().await?;
                    self.stream.read_message(&mut self.buffer_set).await?;
                }
                Action::Finished => {
                    self.transaction_status = machine.transaction_status();
                    return Ok(());
                }
                Action::WriteAndReadByte => {
                    return Err(Error::Protocol(
                        "unexpected WriteAndReadByte in query conversation".into(),
                    ));
                }
            }
        }
    }

    /// Close the connection gracefully.
    pub async fn close(mut self) -> Result<()> {
        self.buffer_set.write_buffer.clear();
        write_terminate(&mut self.buffer_set.write_buffer);
        self.stream.write_all(&self.buffer_set.write_buffer).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
