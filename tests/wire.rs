//! End-to-end tests against a scripted wire server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{QueryExchange, command_response, error_response, msg, select_response, spawn_server};
use surge_postgres::handler::{Collect, FirstRow, RawResult};
use surge_postgres::{
    Error, Opts, Pool, TimeConstraint, execute, query, request,
};

const OID_INT4: u32 = 23;
const OID_TEXT: u32 = 25;
const OID_TEXT_ARRAY: u32 = 1009;

fn pool_for(url: &str) -> Pool {
    Pool::new(Opts::try_from(url).unwrap())
}

#[tokio::test]
async fn int4_scalar_round_trips() {
    let server = spawn_server(Arc::new(|exchange: &QueryExchange| {
        assert_eq!(exchange.sql, "SELECT $1::int4");
        // the parameter must arrive big-endian
        assert_eq!(exchange.params, vec![Some(vec![0, 0, 0, 7])]);
        Some(select_response(
            &[("x", OID_INT4)],
            &[&[Some(&7i32.to_be_bytes())]],
        ))
    }))
    .await;

    let pool = pool_for(&server.url(""));
    let mut sink = Collect::<(i32,)>::new();
    request(
        &pool,
        &query("SELECT $1::int4", (7_i32,)),
        TimeConstraint::None,
        &mut sink,
    )
    .await
    .unwrap();

    assert_eq!(sink.into_rows(), vec![(7,)]);
    assert_eq!(server.queries_seen(), 1);
}

#[tokio::test]
async fn text_array_round_trips() {
    let server = spawn_server(Arc::new(|exchange: &QueryExchange| {
        // echo the array parameter back as the only cell
        let cell = exchange.params[0].clone().unwrap();
        let cell_ref: &[u8] = &cell;
        Some(select_response(&[("a", OID_TEXT_ARRAY)], &[&[Some(cell_ref)]]))
    }))
    .await;

    let pool = pool_for(&server.url(""));
    let items = vec!["foo".to_string(), "buzz".to_string(), "bar".to_string()];

    let mut sink = FirstRow::<(Vec<String>,)>::new();
    request(
        &pool,
        &query("SELECT $1", (items.clone(),)),
        TimeConstraint::None,
        &mut sink,
    )
    .await
    .unwrap();

    assert_eq!(sink.into_row().unwrap().0, items);
}

#[tokio::test]
async fn null_discipline() {
    let server = spawn_server(Arc::new(|_: &QueryExchange| {
        Some(select_response(&[("x", OID_INT4)], &[&[None]]))
    }))
    .await;

    let pool = pool_for(&server.url(""));

    let mut strict = Collect::<(i32,)>::new();
    let err = request(
        &pool,
        &query("SELECT NULL::int4", ()),
        TimeConstraint::None,
        &mut strict,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::UnexpectedNull));

    let mut nullable = Collect::<(Option<i32>,)>::new();
    request(
        &pool,
        &query("SELECT NULL::int4", ()),
        TimeConstraint::None,
        &mut nullable,
    )
    .await
    .unwrap();
    assert_eq!(nullable.into_rows(), vec![(None,)]);
}

#[tokio::test]
async fn deserialization_error_leaves_connection_pooled() {
    let server = spawn_server(Arc::new(|_: &QueryExchange| {
        Some(select_response(&[("x", OID_INT4)], &[&[None]]))
    }))
    .await;

    let pool = pool_for(&server.url(""));

    let mut strict = Collect::<(i32,)>::new();
    let _ = request(
        &pool,
        &query("SELECT NULL::int4", ()),
        TimeConstraint::None,
        &mut strict,
    )
    .await
    .unwrap_err();

    // the error came after a full drain: the same connection serves the
    // next request
    let mut nullable = Collect::<(Option<i32>,)>::new();
    request(
        &pool,
        &query("SELECT NULL::int4", ()),
        TimeConstraint::None,
        &mut nullable,
    )
    .await
    .unwrap();

    assert_eq!(server.connections_accepted(), 1);
}

#[tokio::test]
async fn server_error_carries_sqlstate_and_keeps_wire_clean() {
    let server = spawn_server(Arc::new(|exchange: &QueryExchange| {
        if exchange.query_index == 0 {
            let mut body = common::parse_complete();
            body.extend(common::bind_complete());
            body.extend(error_response("ERROR", "42P01", "relation does not exist"));
            Some(body)
        } else {
            Some(command_response("SELECT 0"))
        }
    }))
    .await;

    let pool = pool_for(&server.url(""));

    let err = execute(&pool, &query("SELECT * FROM missing", ()), TimeConstraint::None)
        .await
        .unwrap_err();
    match &err {
        Error::Server(fields) => assert_eq!(fields.code.as_deref(), Some("42P01")),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(err.sqlstate().unwrap().code(), "42P01");

    // an ERROR-severity response does not poison the connection
    execute(&pool, &query("SELECT 1", ()), TimeConstraint::None)
        .await
        .unwrap();
    assert_eq!(server.connections_accepted(), 1);
}

#[tokio::test]
async fn fatal_error_destroys_the_connection() {
    let server = spawn_server(Arc::new(|exchange: &QueryExchange| {
        if exchange.conn_id == 0 {
            let mut body = common::parse_complete();
            body.extend(common::bind_complete());
            body.extend(error_response("FATAL", "57P01", "shutting down"));
            Some(body)
        } else {
            Some(command_response("SELECT 0"))
        }
    }))
    .await;

    let pool = pool_for(&server.url(""));

    let err = execute(&pool, &query("SELECT 1", ()), TimeConstraint::None)
        .await
        .unwrap_err();
    assert!(err.is_connection_broken());

    execute(&pool, &query("SELECT 1", ()), TimeConstraint::None)
        .await
        .unwrap();
    assert_eq!(server.connections_accepted(), 2);
}

#[tokio::test]
async fn zero_deadline_times_out_and_is_not_reused() {
    let server = spawn_server(Arc::new(|exchange: &QueryExchange| {
        if exchange.conn_id == 0 {
            None // stall forever
        } else {
            Some(command_response("SELECT 0"))
        }
    }))
    .await;

    let pool = pool_for(&server.url(""));

    let err = execute(
        &pool,
        &query("SELECT 1", ()),
        TimeConstraint::Duration(Duration::from_millis(80)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::TimedOut));

    // the abandoned connection must not come back from the pool
    execute(&pool, &query("SELECT 1", ()), TimeConstraint::None)
        .await
        .unwrap();
    assert_eq!(server.connections_accepted(), 2);
}

#[tokio::test]
async fn raw_sink_keeps_untyped_frames() {
    let server = spawn_server(Arc::new(|_: &QueryExchange| {
        Some(select_response(
            &[("n", OID_INT4), ("s", OID_TEXT)],
            &[&[Some(&1i32.to_be_bytes()), Some(b"one")]],
        ))
    }))
    .await;

    let pool = pool_for(&server.url(""));
    let mut sink = RawResult::new();
    request(&pool, &query("SELECT 1, 'one'", ()), TimeConstraint::None, &mut sink)
        .await
        .unwrap();

    assert_eq!(
        sink.columns,
        vec![("n".to_string(), OID_INT4), ("s".to_string(), OID_TEXT)]
    );
    assert_eq!(sink.rows.len(), 1);
    assert_eq!(sink.rows[0][0], (OID_INT4, Some(vec![0, 0, 0, 1])));
    assert_eq!(sink.rows[0][1], (OID_TEXT, Some(b"one".to_vec())));
}

#[tokio::test]
async fn empty_query_reports_its_own_error() {
    let server = spawn_server(Arc::new(|_: &QueryExchange| {
        let mut body = common::parse_complete();
        body.extend(common::bind_complete());
        body.extend(msg(b'I', &[]));
        Some(body)
    }))
    .await;

    let pool = pool_for(&server.url(""));
    let err = execute(&pool, &query("", ()), TimeConstraint::None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyQuery));
}

#[tokio::test]
async fn multiple_rows_stream_in_order() {
    let server = spawn_server(Arc::new(|_: &QueryExchange| {
        Some(select_response(
            &[("x", OID_INT4)],
            &[
                &[Some(&1i32.to_be_bytes())],
                &[Some(&2i32.to_be_bytes())],
                &[Some(&3i32.to_be_bytes())],
            ],
        ))
    }))
    .await;

    let pool = pool_for(&server.url(""));
    let mut sink = Collect::<(i32,)>::new();
    request(&pool, &query("SELECT x FROM xs", ()), TimeConstraint::None, &mut sink)
        .await
        .unwrap();

    assert_eq!(sink.into_rows(), vec![(1,), (2,), (3,)]);
}

#[tokio::test]
async fn row_structs_map_by_name() {
    surge_postgres::row_struct! {
        #[derive(Debug, PartialEq)]
        struct Pair {
            total: i32,
            label: String,
        }
    }

    let server = spawn_server(Arc::new(|_: &QueryExchange| {
        // columns reversed relative to the struct declaration
        Some(select_response(
            &[("label", OID_TEXT), ("total", OID_INT4)],
            &[&[Some(b"sum"), Some(&5i32.to_be_bytes())]],
        ))
    }))
    .await;

    let pool = pool_for(&server.url(""));
    let mut sink = FirstRow::<Pair>::new();
    request(&pool, &query("SELECT label, total FROM t", ()), TimeConstraint::None, &mut sink)
        .await
        .unwrap();

    assert_eq!(
        sink.into_row().unwrap(),
        Pair {
            total: 5,
            label: "sum".to_string()
        }
    );
}
