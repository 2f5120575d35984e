//! In-process mock log service, used by this crate's integration tests
//! and by `htap-mvcc`/`htap-coordinator` to exercise durability without a
//! real replicated-log cluster. Mirrors the role the teacher's
//! in-memory commit-log backend plays for its own tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use htap_common::{Lsn, ShardId, Timestamp};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::wire::{Request, Response};

struct State {
    shard_id: ShardId,
    records: VecDeque<(Lsn, Vec<u8>)>,
    next_lsn: u64,
    truncated_lsn: u64,
    tso: u64,
}

/// A running mock log service bound to `127.0.0.1:<port>`.
pub struct MockLogService {
    pub addr: String,
    state: Arc<Mutex<State>>,
    /// Remaining `Connect` attempts that should fail with shard-not-found,
    /// to exercise the client's reset-and-retry path.
    fail_connects: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockLogService {
    pub async fn spawn(shard_id: ShardId) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock log service");
        let addr = listener.local_addr().expect("local addr").to_string();
        let state = Arc::new(Mutex::new(State {
            shard_id,
            records: VecDeque::new(),
            next_lsn: 1,
            truncated_lsn: 0,
            tso: 0,
        }));
        let fail_connects = Arc::new(AtomicUsize::new(0));

        let accept_state = state.clone();
        let accept_fail = fail_connects.clone();
        let task = tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let state = accept_state.clone();
                let fail_connects = accept_fail.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(socket, state, fail_connects).await;
                });
            }
        });

        Self {
            addr,
            state,
            fail_connects,
            task,
        }
    }

    /// Makes the next `n` `Connect`/`ConnectReadOnly` handshakes fail with
    /// a shard-not-found response.
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

async fn serve_connection(
    mut socket: tokio::net::TcpStream,
    state: Arc<Mutex<State>>,
    fail_connects: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    loop {
        let len = match socket.read_u32().await {
            Ok(len) => len as usize,
            Err(_) => return Ok(()),
        };
        let mut body = vec![0u8; len];
        socket.read_exact(&mut body).await?;
        let req: Request = match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                let resp = Response::err(format!("bad request: {e}"));
                write_response(&mut socket, &resp).await?;
                continue;
            }
        };
        let resp = handle(&state, &fail_connects, req);
        write_response(&mut socket, &resp).await?;
    }
}

async fn write_response(socket: &mut tokio::net::TcpStream, resp: &Response) -> std::io::Result<()> {
    let body = serde_json::to_vec(resp).expect("response always serializable");
    socket.write_u32(body.len() as u32).await?;
    socket.write_all(&body).await?;
    socket.flush().await
}

fn handle(state: &Arc<Mutex<State>>, fail_connects: &Arc<AtomicUsize>, req: Request) -> Response {
    match req {
        Request::Connect { shard_id, .. } | Request::ConnectReadOnly { shard_id, .. } => {
            let remaining = fail_connects.load(Ordering::SeqCst);
            if remaining > 0 {
                fail_connects.store(remaining - 1, Ordering::SeqCst);
                return Response::shard_not_found(shard_id);
            }
            let st = state.lock();
            if st.shard_id != shard_id {
                return Response::shard_not_found(shard_id);
            }
            Response::ok()
        }
        Request::Append { shard_id, payload, .. } => {
            let mut st = state.lock();
            if st.shard_id != shard_id {
                return Response::shard_not_found(shard_id);
            }
            let lsn = Lsn(st.next_lsn);
            st.next_lsn += 1;
            st.records.push_back((lsn, payload));
            let mut resp = Response::ok();
            resp.lsn = Some(lsn);
            resp
        }
        Request::Read { shard_id, lsn, max_size } => {
            let st = state.lock();
            if st.shard_id != shard_id {
                return Response::shard_not_found(shard_id);
            }
            if lsn.0 != 0 && lsn.0 <= st.truncated_lsn {
                return Response::err(format!("lsn {} has been truncated", lsn.0));
            }
            let mut records = Vec::new();
            let mut size = 0usize;
            let mut next = lsn;
            for (rec_lsn, payload) in st.records.iter() {
                if rec_lsn.0 < lsn.0 {
                    continue;
                }
                if size + payload.len() > max_size && !records.is_empty() {
                    break;
                }
                size += payload.len();
                records.push((*rec_lsn, payload.clone()));
                next = Lsn(rec_lsn.0 + 1);
            }
            let mut resp = Response::ok();
            resp.last_lsn = Some(next);
            resp.records = records;
            resp
        }
        Request::Truncate { shard_id, lsn } => {
            let mut st = state.lock();
            if st.shard_id != shard_id {
                return Response::shard_not_found(shard_id);
            }
            st.truncated_lsn = st.truncated_lsn.max(lsn.0);
            st.records.retain(|(rec_lsn, _)| rec_lsn.0 > st.truncated_lsn);
            Response::ok()
        }
        Request::GetTruncate { shard_id } => {
            let st = state.lock();
            if st.shard_id != shard_id {
                return Response::shard_not_found(shard_id);
            }
            let mut resp = Response::ok();
            resp.lsn = Some(Lsn(st.truncated_lsn));
            resp
        }
        Request::TsoUpdate { count } => {
            let mut st = state.lock();
            let first = st.tso + 1;
            st.tso += count.max(1);
            let mut resp = Response::ok();
            resp.tso_value = Some(Timestamp(first));
            resp
        }
    }
}
