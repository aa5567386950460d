#![allow(dead_code)]
//! A scripted PostgreSQL stand-in for integration tests.
//!
//! Accepts real TCP connections, performs trust-auth startup and answers
//! each extended-query cycle with whatever the test's responder returns.
//! Returning `None` leaves the client hanging, for deadline tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One Parse+Bind+Execute+Sync cycle as seen by the server.
pub struct QueryExchange {
    /// 0-based index of the TCP connection this arrived on
    pub conn_id: usize,
    /// 0-based index of the query within its connection
    pub query_index: usize,
    /// SQL text from the Parse message
    pub sql: String,
    /// Bound parameters; `None` is a NULL frame
    pub params: Vec<Option<Vec<u8>>>,
}

/// Messages to send back, or `None` to go silent.
pub type Responder = Arc<dyn Fn(&QueryExchange) -> Option<Vec<u8>> + Send + Sync>;

pub struct ScriptedServer {
    pub port: u16,
    accepted: Arc<AtomicUsize>,
    queries: Arc<AtomicUsize>,
}

impl ScriptedServer {
    pub fn url(&self, params: &str) -> String {
        format!("postgres://tester@127.0.0.1:{}/testdb{}", self.port, params)
    }

    pub fn connections_accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn queries_seen(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

pub async fn spawn_server(responder: Responder) -> ScriptedServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let queries = Arc::new(AtomicUsize::new(0));

    let server = ScriptedServer {
        port,
        accepted: Arc::clone(&accepted),
        queries: Arc::clone(&queries),
    };

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let conn_id = accepted.fetch_add(1, Ordering::SeqCst);
            let responder = Arc::clone(&responder);
            let queries = Arc::clone(&queries);
            tokio::spawn(async move {
                let _ = run_session(stream, conn_id, responder, queries).await;
            });
        }
    });

    server
}

async fn read_message(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let type_byte = stream.read_u8().await?;
    let len = stream.read_u32().await? as usize;
    let mut payload = vec![0u8; len.saturating_sub(4)];
    stream.read_exact(&mut payload).await?;
    Ok((type_byte, payload))
}

fn read_cstr(data: &[u8]) -> (String, &[u8]) {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let s = String::from_utf8_lossy(&data[..end]).into_owned();
    (s, &data[(end + 1).min(data.len())..])
}

fn parse_bind_params(payload: &[u8]) -> Vec<Option<Vec<u8>>> {
    let (_portal, rest) = read_cstr(payload);
    let (_statement, mut rest) = read_cstr(rest);

    let nfmt = u16::from_be_bytes([rest[0], rest[1]]) as usize;
    rest = &rest[2 + 2 * nfmt..];

    let nparams = u16::from_be_bytes([rest[0], rest[1]]) as usize;
    rest = &rest[2..];

    let mut params = Vec::with_capacity(nparams);
    for _ in 0..nparams {
        let len = i32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        rest = &rest[4..];
        if len < 0 {
            params.push(None);
        } else {
            params.push(Some(rest[..len as usize].to_vec()));
            rest = &rest[len as usize..];
        }
    }
    params
}

async fn run_session(
    mut stream: TcpStream,
    conn_id: usize,
    responder: Responder,
    queries: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    // startup message: length includes itself, no type byte
    let len = stream.read_u32().await? as usize;
    let mut startup = vec![0u8; len - 4];
    stream.read_exact(&mut startup).await?;

    let mut hello = Vec::new();
    hello.extend(msg(b'R', &0_i32.to_be_bytes()));
    let mut key = Vec::new();
    key.extend_from_slice(&(conn_id as u32 + 100).to_be_bytes());
    key.extend_from_slice(&0xfeed_u32.to_be_bytes());
    hello.extend(msg(b'K', &key));
    hello.extend(msg(b'Z', b"I"));
    stream.write_all(&hello).await?;

    let mut query_index = 0usize;
    let mut sql = String::new();
    let mut params: Vec<Option<Vec<u8>>> = Vec::new();

    loop {
        let (type_byte, payload) = read_message(&mut stream).await?;
        match type_byte {
            b'P' => {
                let (_stmt, rest) = read_cstr(&payload);
                let (text, _) = read_cstr(rest);
                sql = text;
            }
            b'B' => params = parse_bind_params(&payload),
            b'D' | b'E' | b'H' => {}
            b'S' => {
                queries.fetch_add(1, Ordering::SeqCst);
                let exchange = QueryExchange {
                    conn_id,
                    query_index,
                    sql: std::mem::take(&mut sql),
                    params: std::mem::take(&mut params),
                };
                query_index += 1;

                match responder(&exchange) {
                    Some(mut body) => {
                        body.extend(msg(b'Z', b"I"));
                        stream.write_all(&body).await?;
                    }
                    // go silent: the client's deadline has to save it
                    None => {
                        futures_park().await;
                    }
                }
            }
            b'X' => return Ok(()),
            _ => {}
        }
    }
}

async fn futures_park() {
    std::future::pending::<()>().await
}

// === backend message builders ===

pub fn msg(type_byte: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    out.push(type_byte);
    out.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn parse_complete() -> Vec<u8> {
    msg(b'1', &[])
}

pub fn bind_complete() -> Vec<u8> {
    msg(b'2', &[])
}

pub fn row_description(cols: &[(&str, u32)]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(cols.len() as u16).to_be_bytes());
    for (name, oid) in cols {
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&0u32.to_be_bytes());
        payload.extend_from_slice(&0i16.to_be_bytes());
        payload.extend_from_slice(&oid.to_be_bytes());
        payload.extend_from_slice(&(-1i16).to_be_bytes());
        payload.extend_from_slice(&(-1i32).to_be_bytes());
        payload.extend_from_slice(&1u16.to_be_bytes());
    }
    msg(b'T', &payload)
}

pub fn data_row(cells: &[Option<&[u8]>]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(cells.len() as u16).to_be_bytes());
    for cell in cells {
        match cell {
            None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
            Some(bytes) => {
                payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                payload.extend_from_slice(bytes);
            }
        }
    }
    msg(b'D', &payload)
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    let mut payload = tag.as_bytes().to_vec();
    payload.push(0);
    msg(b'C', &payload)
}

pub fn error_response(severity: &str, code: &str, message: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
        payload.push(field);
        payload.extend_from_slice(value.as_bytes());
        payload.push(0);
    }
    payload.push(0);
    msg(b'E', &payload)
}

/// A complete one-row SELECT response.
pub fn select_response(cols: &[(&str, u32)], rows: &[&[Option<&[u8]>]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(parse_complete());
    out.extend(bind_complete());
    out.extend(row_description(cols));
    for row in rows {
        out.extend(data_row(row));
    }
    out.extend(command_complete(&format!("SELECT {}", rows.len())));
    out
}

/// A rows-less command response.
pub fn command_response(tag: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(parse_complete());
    out.extend(bind_complete());
    out.extend(msg(b'n', &[])); // NoData
    out.extend(command_complete(tag));
    out
}
