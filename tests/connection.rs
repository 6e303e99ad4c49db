use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

use cqlmux::cql::codec::CqlFrameCodec;
use cqlmux::cql::consistency::Consistency;
use cqlmux::cql::frame::Frame;
use cqlmux::cql::header::{Header, HeaderFlags, MessageDirection, ProtocolVersion};
use cqlmux::cql::operation::Opcode;
use cqlmux::cql::request::{Batch, BatchType, EventType, Query, Register, Request};
use cqlmux::cql::response::ErrorCode;
use cqlmux::error::{CallError, MuxError, RequestError, SendError};
use cqlmux::serde::writer::FrameWriter;
use cqlmux::{Connection, ConnectionConfig};

type Server = Framed<DuplexStream, CqlFrameCodec>;

fn connect(config: ConnectionConfig) -> (Connection, Server) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (
        Connection::new(client, config),
        Framed::new(server, CqlFrameCodec::new()),
    )
}

async fn next_request(server: &mut Server) -> (i16, Request) {
    let frame = server.next().await.unwrap().unwrap();
    assert_eq!(frame.header.direction, MessageDirection::Request);

    let request = Request::decode(frame.header.opcode, frame.body).unwrap();
    (frame.header.stream_id, request)
}

fn response(stream_id: i16, opcode: Opcode, body: Bytes) -> Frame {
    Frame {
        header: Header::new(
            ProtocolVersion::V4,
            MessageDirection::Response,
            HeaderFlags::empty(),
            stream_id,
            opcode,
            body.len() as u32,
        ),
        body,
    }
}

/// A RESULT body that echoes `text` back, enough to tell responses apart.
fn echo(text: &str) -> Bytes {
    let mut writer = FrameWriter::new();
    writer.write_i32(0x0003);
    writer.write_string(text).unwrap();
    writer.into_bytes()
}

fn query(statement: &str) -> Request {
    Request::Query(Query::new(statement, Consistency::One))
}

#[tokio::test]
async fn concurrent_requests_resolve_out_of_order() {
    let (connection, mut server) = connect(ConnectionConfig::default());

    let statements = ["USE ks1", "USE ks2", "USE ks3"];
    let handles: Vec<_> = statements
        .iter()
        .map(|statement| connection.send(&query(statement)).unwrap())
        .collect();

    let mut received = Vec::new();
    for _ in 0..statements.len() {
        match next_request(&mut server).await {
            (stream_id, Request::Query(query)) => received.push((stream_id, query.query)),
            (_, other) => panic!("expected a query, got {other:?}"),
        }
    }

    for (stream_id, statement) in received.iter().rev() {
        server
            .send(response(*stream_id, Opcode::Result, echo(statement)))
            .await
            .unwrap();
    }

    for (statement, handle) in statements.iter().zip(handles) {
        let response = handle.await.unwrap();
        assert_eq!(response.opcode, Opcode::Result);
        assert_eq!(response.body, echo(statement));
    }
    assert_eq!(connection.outstanding(), 0);
}

#[tokio::test]
async fn error_frames_fail_with_the_server_error() {
    let (connection, mut server) = connect(ConnectionConfig::default());

    let server_task = tokio::spawn(async move {
        let (stream_id, _) = next_request(&mut server).await;
        let mut writer = FrameWriter::new();
        writer.write_i32(0x2200);
        writer.write_string("unconfigured table t").unwrap();
        server
            .send(response(stream_id, Opcode::Error, writer.into_bytes()))
            .await
            .unwrap();
        server
    });

    match connection.call(&query("SELECT * FROM t")).await {
        Err(CallError::Request(RequestError::Server(error))) => {
            assert_eq!(error.code, ErrorCode::Invalid);
            assert_eq!(error.message, "unconfigured table t");
        }
        other => panic!("expected a server error, got {other:?}"),
    }

    let _server = server_task.await.unwrap();
}

#[tokio::test]
async fn batches_reach_the_server_intact() {
    let (connection, mut server) = connect(ConnectionConfig::default());

    let children = ["INSERT a", "INSERT b"]
        .map(|statement| Request::Query(Query::new(statement, Consistency::Quorum)));
    let batch = Batch::from_requests(BatchType::Unlogged, children, Consistency::Quorum)
        .unwrap()
        .tracing(true);
    let handle = connection.send(&Request::Batch(batch.clone())).unwrap();

    let frame = server.next().await.unwrap().unwrap();
    assert!(frame.header.flags.contains(HeaderFlags::TRACING));
    assert_eq!(
        Request::decode(frame.header.opcode, frame.body.clone()).unwrap(),
        Request::Batch(batch)
    );

    server
        .send(response(frame.header.stream_id, Opcode::Result, echo("ok")))
        .await
        .unwrap();
    assert!(handle.await.is_ok());
}

#[tokio::test]
async fn events_are_forwarded() {
    let (mut connection, mut server) = connect(ConnectionConfig::default());
    let mut events = connection.events().unwrap();
    assert!(connection.events().is_none());

    let register = Request::Register(Register::new([EventType::SchemaChange]));
    let handle = connection.send(&register).unwrap();

    let (stream_id, request) = next_request(&mut server).await;
    assert_eq!(request, register);
    server
        .send(response(stream_id, Opcode::Ready, Bytes::new()))
        .await
        .unwrap();
    assert_eq!(handle.await.unwrap().opcode, Opcode::Ready);

    let mut writer = FrameWriter::new();
    writer.write_string("SCHEMA_CHANGE").unwrap();
    server
        .send(response(-1, Opcode::Event, writer.into_bytes()))
        .await
        .unwrap();

    let event = events.next().await.unwrap();
    assert!(event.is_event());
    assert_eq!(event.stream_id, -1);
}

#[tokio::test]
async fn peer_going_away_fails_outstanding_requests() {
    let (connection, mut server) = connect(ConnectionConfig::default());

    let first = connection.send(&query("SELECT 1")).unwrap();
    let second = connection.send(&query("SELECT 2")).unwrap();
    next_request(&mut server).await;
    next_request(&mut server).await;
    drop(server);

    assert_eq!(first.await.unwrap_err(), RequestError::ConnectionClosed);
    assert_eq!(second.await.unwrap_err(), RequestError::ConnectionClosed);
    assert!(connection.is_closed());
    assert_eq!(
        connection.send(&query("SELECT 3")).unwrap_err(),
        SendError::Closed
    );
}

#[tokio::test]
async fn close_fails_outstanding_requests() {
    let (connection, _server) = connect(ConnectionConfig::default());
    let handle = connection.send(&Request::Options).unwrap();

    connection.close();

    assert_eq!(handle.await.unwrap_err(), RequestError::ConnectionClosed);
    connection.shutdown().await;
}

#[tokio::test]
async fn running_out_of_stream_ids_is_reported_to_the_sender() {
    let (connection, mut server) = connect(ConnectionConfig::default().max_streams(1));

    let first = connection.send(&Request::Options).unwrap();
    assert_eq!(
        connection.send(&Request::Options).unwrap_err(),
        SendError::Mux(MuxError::ExhaustedStreamIds { capacity: 1 })
    );

    let (stream_id, _) = next_request(&mut server).await;
    server
        .send(response(stream_id, Opcode::Supported, Bytes::from_static(&[0, 0])))
        .await
        .unwrap();
    first.await.unwrap();

    assert!(connection.send(&Request::Options).is_ok());
}

#[tokio::test]
async fn timed_out_requests_release_their_stream_id() {
    let config = ConnectionConfig::default()
        .max_streams(1)
        .request_timeout(Some(Duration::from_millis(50)))
        .sweep_interval(Duration::from_millis(5));
    let (mut connection, mut server) = connect(config);
    let mut events = connection.events().unwrap();

    let handle = connection.send(&query("SELECT slow")).unwrap();
    let (stream_id, _) = next_request(&mut server).await;

    assert_eq!(handle.await.unwrap_err(), RequestError::Timeout);
    assert_eq!(connection.outstanding(), 0);

    // a late answer is dropped, and the EVENT behind it proves it was read
    server
        .send(response(stream_id, Opcode::Result, echo("late")))
        .await
        .unwrap();
    server
        .send(response(-1, Opcode::Event, Bytes::new()))
        .await
        .unwrap();
    events.next().await.unwrap();

    assert_eq!(connection.multiplexer().dropped_responses(), 1);
    assert!(connection.send(&Request::Options).is_ok());
}

#[tokio::test]
async fn awaited_timeouts_release_their_stream_id() {
    let config = ConnectionConfig::default()
        .max_streams(1)
        .request_timeout(None);
    let (connection, mut server) = connect(config);

    let pending = connection.submit(&query("SELECT slow")).unwrap();
    next_request(&mut server).await;

    assert_eq!(
        pending.timeout(Duration::from_millis(20)).await,
        Err(RequestError::Timeout)
    );
    assert_eq!(connection.outstanding(), 0);

    let outcome = connection
        .call_with_timeout(&query("SELECT slow"), Duration::from_millis(20))
        .await;
    assert!(matches!(
        outcome,
        Err(CallError::Request(RequestError::Timeout))
    ));
    assert_eq!(connection.outstanding(), 0);
    assert!(connection.send(&Request::Options).is_ok());
}

#[tokio::test]
async fn answered_requests_ignore_a_later_expiry() {
    let (connection, mut server) = connect(ConnectionConfig::default().max_streams(1));

    let pending = connection.submit(&Request::Options).unwrap();
    let (stream_id, _) = next_request(&mut server).await;
    server
        .send(response(stream_id, Opcode::Supported, Bytes::from_static(&[0, 0])))
        .await
        .unwrap();

    let answer = pending.timeout(Duration::from_secs(5)).await.unwrap();
    assert_eq!(answer.opcode, Opcode::Supported);
    assert_eq!(pending.wait(Some(Duration::ZERO)).unwrap().opcode, Opcode::Supported);
}

#[tokio::test]
async fn zero_sweep_interval_is_usable() {
    let config = ConnectionConfig::default()
        .request_timeout(Some(Duration::from_millis(20)))
        .sweep_interval(Duration::ZERO);
    let (connection, _server) = connect(config);

    let handle = connection.send(&Request::Options).unwrap();
    assert_eq!(
        handle.timeout(Duration::from_secs(5)).await,
        Err(RequestError::Timeout)
    );
    assert_eq!(connection.outstanding(), 0);
}
