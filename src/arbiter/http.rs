//! Registration listener: a single `POST /register` endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Take};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;

use super::actor::RosterHandle;
use crate::event::{Event, RegistrationRequest};
use crate::logging::{error, info, obj, v_err, v_str, warn, Domain};
use crate::roster::ContestError;
use crate::shutdown::Shutdown;

pub const REGISTER_PATH: &str = "/register";

const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 64;
/// Request line plus headers.
const MAX_HEAD_BYTES: u64 = 16 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: format!("{}\n", body),
        }
    }

    fn json(body: String) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body,
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            409 => "Conflict",
            413 => "Payload Too Large",
            _ => "Internal Server Error",
        }
    }

    fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn new_competitor_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// Validate a registration body, admit the competitor, and describe the result.
pub async fn register(roster: &RosterHandle, body: &[u8]) -> Response {
    let request: RegistrationRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(err) => {
            warn(Domain::Http, "registration_decode_failed", obj(&[("error", v_err(&err))]));
            return Response::text(500, "internal server error");
        }
    };
    if !request.is_complete() {
        return Response::text(400, "bad request");
    }

    let competitor = request.into_competitor(new_competitor_id());
    match roster.submit(Event::Registration(competitor.clone())).await {
        Ok(()) => match serde_json::to_string(&competitor) {
            Ok(body) => Response::json(body),
            Err(err) => {
                error(Domain::Http, "registration_encode_failed", obj(&[("error", v_err(&err))]));
                Response::text(500, "internal server error")
            }
        },
        Err(ContestError::AlreadyStarted | ContestError::Finished) => Response::text(409, "conflict"),
        Err(err) => {
            error(
                Domain::Http,
                "registration_rejected",
                obj(&[("name", v_str(&competitor.name)), ("error", v_err(&err))]),
            );
            Response::text(500, "internal server error")
        }
    }
}

/// Read one line of the request head. Running out of head budget in the
/// middle of a line is answered with 413.
async fn next_head_line<R: AsyncBufRead + Unpin>(head: &mut Take<R>, line: &mut String) -> Result<usize, Response> {
    line.clear();
    let read = head
        .read_line(line)
        .await
        .map_err(|_| Response::text(400, "bad request"))?;
    if read > 0 && !line.ends_with('\n') && head.limit() == 0 {
        return Err(Response::text(413, "payload too large"));
    }
    Ok(read)
}

async fn read_request<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<Request>, Response> {
    let mut head = (&mut *reader).take(MAX_HEAD_BYTES);
    let mut line = String::new();
    if next_head_line(&mut head, &mut line).await? == 0 {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(Response::text(400, "bad request"));
    };
    let method = method.to_string();
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut content_length = 0usize;
    let mut headers = 0;
    loop {
        if next_head_line(&mut head, &mut line).await? == 0 {
            return Err(Response::text(400, "bad request"));
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        headers += 1;
        if headers > MAX_HEADERS {
            return Err(Response::text(400, "bad request"));
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().map_err(|_| Response::text(400, "bad request"))?;
            }
        }
    }

    if content_length > MAX_BODY_BYTES {
        return Err(Response::text(413, "payload too large"));
    }
    let mut body = vec![0u8; content_length];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|_| Response::text(400, "bad request"))?;

    Ok(Some(Request { method, path, body }))
}

async fn route(roster: &RosterHandle, request: Request) -> Response {
    if request.path != REGISTER_PATH {
        return Response::text(404, "not found");
    }
    if request.method != "POST" {
        return Response::text(405, "method not allowed");
    }
    register(roster, &request.body).await
}

async fn handle_connection(stream: TcpStream, roster: RosterHandle) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let response = match read_request(&mut reader).await {
        Ok(Some(request)) => route(&roster, request).await,
        Ok(None) => return Ok(()),
        Err(rejection) => rejection,
    };
    info(
        Domain::Http,
        "response",
        obj(&[("status", json!(response.status))]),
    );
    let mut stream = reader.into_inner();
    stream
        .write_all(response.to_http().as_bytes())
        .await
        .context("write registration response")?;
    stream.shutdown().await.context("close registration connection")?;
    Ok(())
}

/// Serve registrations until `shutdown` fires, then give in-flight requests
/// up to `grace` to finish.
pub async fn serve(
    listener: TcpListener,
    roster: RosterHandle,
    shutdown: Shutdown,
    grace: Duration,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info(Domain::Http, "listening", obj(&[("addr", v_str(&addr.to_string()))]));
    }
    let mut inflight: JoinSet<Result<()>> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let roster = roster.clone();
                    inflight.spawn(async move {
                        timeout(REQUEST_TIMEOUT, handle_connection(stream, roster))
                            .await
                            .context("registration request timed out")?
                    });
                }
                Err(err) => warn(Domain::Http, "accept_failed", obj(&[("error", v_err(&err))])),
            },
            Some(done) = inflight.join_next(), if !inflight.is_empty() => log_finished(done),
        }
    }

    drop(listener);
    let drained = timeout(grace, async {
        while let Some(done) = inflight.join_next().await {
            log_finished(done);
        }
    })
    .await;
    if drained.is_err() {
        warn(
            Domain::Http,
            "drain_timeout",
            obj(&[("aborted", json!(inflight.len()))]),
        );
        inflight.abort_all();
    }
    info(Domain::Http, "stopped", obj(&[]));
    Ok(())
}

fn log_finished(done: Result<Result<()>, tokio::task::JoinError>) {
    match done {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn(Domain::Http, "connection_failed", obj(&[("error", v_str(&format!("{:#}", err)))])),
        Err(err) => warn(Domain::Http, "connection_panicked", obj(&[("error", v_err(&err))])),
    }
}
