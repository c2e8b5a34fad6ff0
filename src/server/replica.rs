//! Shardset per-group server replica: shared state, setup, and the client
//! command submit path.
//!
//! One `ShardServer` is one replica of one group. Only the replica whose
//! consensus engine reports leadership accepts work; everything else answers
//! `WrongLeader` and lets the client rotate.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use crate::consensus::{
    ApplyReceiver, ConsensusEngine, LogIndex, ReplicaId,
};
use crate::ctrl::{Config, ConfigNum, CtrlStub, Gid};
use crate::server::{
    gen_nonce, ClientId, ErrCode, Op, OpKind, ReqNum, Session, SessionKey,
    LOCAL_CLIENT,
};
use crate::utils::{tcp_bind_with_retry, ShardsetError};

use rmp_serde::encode::to_vec as encode_to_vec;

use serde::Deserialize;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};

/// Configuration parameters struct.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Interval between commit-wait polls in millisecs.
    pub commit_poll_interval_ms: u64,

    /// Overall bound on waiting for a proposal to commit in millisecs. Kept
    /// short so clients quickly rotate off a deposed leader.
    pub commit_timeout_ms: u64,

    /// Interval between controller polls in millisecs.
    pub config_poll_interval_ms: u64,

    /// Backoff between migration pull rounds in millisecs.
    pub migrate_backoff_ms: u64,

    /// Persisted log size in bytes beyond which a snapshot is taken.
    /// 0 means never snapshot.
    pub max_log_size: usize,
}

#[allow(clippy::derivable_impls)]
impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            commit_poll_interval_ms: 10,
            commit_timeout_ms: 30,
            config_poll_interval_ms: 100,
            migrate_backoff_ms: 100,
            max_log_size: 0,
        }
    }
}

/// State owned exclusively by the state mutex.
pub(crate) struct ServerState {
    /// The key-value map. Keys of shards this group does not own may linger
    /// after migrations; they are unreachable through the ownership filter.
    pub kv: HashMap<String, String>,

    /// Per-(client, shard) dedup sessions.
    pub sessions: HashMap<SessionKey, Session>,

    /// Log index -> applied command descriptor, kept so waiters can check
    /// whether their slot was filled by their own proposal.
    pub log_record: HashMap<LogIndex, Op>,

    /// Slots whose waiter has been released; eligible for GC at snapshot
    /// time.
    pub confirmed: HashSet<LogIndex>,

    /// Configuration this group currently operates under.
    pub config: Config,

    /// Highest log index applied to the state machine.
    pub last_applied: LogIndex,

    /// Request number counter for self-proposed configuration changes.
    pub local_req_num: ReqNum,
}

/// Reply content shaped after a command resolves, before it is narrowed to
/// the caller-specific wire reply.
#[derive(Debug, PartialEq, Eq, Clone)]
pub(crate) struct OpOutcome {
    /// Resolution code.
    pub err: ErrCode,

    /// Fetched value for a successful `Get`.
    pub value: Option<String>,

    /// Config num echoed back for configuration changes.
    pub config_num: ConfigNum,
}

impl OpOutcome {
    /// Shapes a non-OK outcome.
    pub fn fail(err: ErrCode) -> Self {
        OpOutcome {
            err,
            value: None,
            config_num: 0,
        }
    }
}

/// Shard group server replica module.
pub struct ShardServer {
    /// My replica ID within the group.
    pub(crate) me: ReplicaId,

    /// My group's ID.
    pub(crate) gid: Gid,

    /// Configuration parameters struct.
    pub(crate) config: ServerConfig,

    /// Handle to the consensus engine backing this group.
    pub(crate) engine: Arc<dyn ConsensusEngine>,

    /// Stub to the shard controller.
    pub(crate) ctrl: CtrlStub,

    /// State mutex; owns everything in `ServerState`.
    pub(crate) mu: Mutex<ServerState>,

    /// Client admission mutex; held by every client-facing handler and for
    /// the entirety of a configuration advance. Lock order: `ck_mu` before
    /// `mu`.
    pub(crate) ck_mu: Mutex<()>,

    /// Set upon `kill()`; checked at every loop head.
    pub(crate) dead: AtomicBool,

    /// Actual bound address of the client API listener.
    api_addr: SocketAddr,

    /// Actual bound address of the group-to-group listener.
    peer_addr: SocketAddr,

    /// Join handles of all long-lived threads spawned by this replica.
    pub(crate) handles: StdMutex<Vec<JoinHandle<()>>>,
}

// ShardServer public API implementation
impl ShardServer {
    /// Creates a new group server replica: binds its two listeners, then
    /// spawns the client API acceptor, the group-to-group acceptor, the
    /// apply loop, and the config poller.
    #[allow(clippy::too_many_arguments)]
    pub async fn new_and_setup(
        me: ReplicaId,
        gid: Gid,
        api_addr: SocketAddr,
        peer_addr: SocketAddr,
        ctrl_addr: SocketAddr,
        engine: Arc<dyn ConsensusEngine>,
        apply_rx: ApplyReceiver,
        config_str: Option<&str>,
    ) -> Result<Arc<Self>, ShardsetError> {
        let config = parsed_config!(config_str => ServerConfig;
                                    commit_poll_interval_ms,
                                    commit_timeout_ms,
                                    config_poll_interval_ms,
                                    migrate_backoff_ms,
                                    max_log_size)?;

        let api_listener = tcp_bind_with_retry(api_addr, 1).await?;
        let peer_listener = tcp_bind_with_retry(peer_addr, 1).await?;

        let server = Arc::new(ShardServer {
            me,
            gid,
            config,
            engine,
            ctrl: CtrlStub::new(ctrl_addr),
            mu: Mutex::new(ServerState {
                kv: HashMap::new(),
                sessions: HashMap::new(),
                log_record: HashMap::new(),
                confirmed: HashSet::new(),
                config: Config::empty(),
                last_applied: 0,
                local_req_num: 1,
            }),
            ck_mu: Mutex::new(()),
            dead: AtomicBool::new(false),
            api_addr: api_listener.local_addr()?,
            peer_addr: peer_listener.local_addr()?,
            handles: StdMutex::new(vec![]),
        });

        {
            let mut handles = server.handles.lock().unwrap();
            handles.push(tokio::spawn(Self::api_acceptor_task(
                server.clone(),
                api_listener,
            )));
            handles.push(tokio::spawn(Self::peer_acceptor_task(
                server.clone(),
                peer_listener,
            )));
            handles.push(tokio::spawn(Self::applier_task(
                server.clone(),
                apply_rx,
            )));
            handles.push(tokio::spawn(Self::poller_task(server.clone())));
        }

        pf_info!(me; "group {} replica set up (api '{}', peer '{}')",
                     gid, server.api_addr, server.peer_addr);
        Ok(server)
    }

    /// Actual bound address of the client API listener.
    pub fn api_addr(&self) -> SocketAddr {
        self.api_addr
    }

    /// Actual bound address of the group-to-group listener.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Configuration epoch this replica currently operates under.
    pub async fn config_num(&self) -> ConfigNum {
        self.mu.lock().await.config.num
    }

    /// Shuts this replica down: marks it dead, detaches it from the
    /// consensus engine, and aborts all its threads.
    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
        self.engine.kill();
        for handle in self.handles.lock().unwrap().drain(..) {
            handle.abort();
        }
        pf_debug!(self.me; "group {} replica killed", self.gid);
    }

    /// True if `kill()` has been called.
    pub(crate) fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }
}

// ShardServer command submit path implementation
impl ShardServer {
    /// Submits one command through the consensus log and waits for its
    /// resolution. This is the single entrance for client KV operations and
    /// self-proposed configuration changes alike.
    pub(crate) async fn handle_command(
        &self,
        client: ClientId,
        req_num: ReqNum,
        kind: OpKind,
    ) -> Result<OpOutcome, ShardsetError> {
        let shard = kind.shard();
        let (op, index) = {
            let st = self.mu.lock().await;

            if !self.engine.get_state().1 {
                return Ok(OpOutcome::fail(ErrCode::WrongLeader));
            }

            if client != LOCAL_CLIENT && st.config.shards[shard] != self.gid {
                pf_debug!(self.me; "shard {} not owned under config {}",
                                   shard, st.config.num);
                return Ok(OpOutcome::fail(ErrCode::WrongGroup));
            }

            // dedup fast-path: this exact request has already been applied,
            // and its log record still carries the session's nonce
            if let Some(session) = st.sessions.get(&(client, shard)) {
                if session.last_op.req_num == req_num {
                    let nonce_match = session.last_index.is_some_and(|last| {
                        st.log_record.get(&last).map(|op| op.nonce)
                            == Some(session.last_op.nonce)
                    });
                    if nonce_match {
                        pf_debug!(self.me; "request [{}]${} already completed",
                                           client, req_num);
                        return Ok(Self::success_commit(&st, &kind));
                    }
                }
            }

            let op = Op {
                nonce: gen_nonce(),
                req_num,
                client,
                shard,
                kind,
            };
            let data = encode_to_vec(&op)?;
            match self.engine.start(data) {
                None => {
                    return Ok(OpOutcome::fail(ErrCode::WrongLeader));
                }
                Some((index, _term)) => {
                    pf_trace!(self.me; "started {} [{}]${} at #{}",
                                       op.kind.name(), client, req_num, index);
                    (op, index)
                }
            }
        };

        self.wait_for_commit(op, index).await
    }

    /// Waits for the slot at `index` to be applied, polling under the state
    /// mutex, and decides success by nonce comparison.
    async fn wait_for_commit(
        &self,
        op: Op,
        index: LogIndex,
    ) -> Result<OpOutcome, ShardsetError> {
        let started = Instant::now();
        let poll = Duration::from_millis(self.config.commit_poll_interval_ms);
        let bound = Duration::from_millis(self.config.commit_timeout_ms);

        while !self.is_dead() {
            {
                let mut st = self.mu.lock().await;
                if st.last_applied >= index {
                    let slot_nonce =
                        st.log_record.get(&index).map(|rec| rec.nonce);
                    if let Some(nonce) = slot_nonce {
                        st.confirmed.insert(index);
                        if nonce == op.nonce {
                            return Ok(Self::success_commit(&st, &op.kind));
                        }
                        pf_debug!(self.me; "slot #{} stolen from [{}]${}",
                                           index, op.client, op.req_num);
                        return Ok(OpOutcome::fail(ErrCode::CommitConflict));
                    }
                    // slot compacted away before we observed it: keep
                    // polling until the bound and let the client retry
                }
            }

            if started.elapsed() > bound {
                pf_debug!(self.me; "timed out waiting on slot #{}", index);
                return Ok(OpOutcome::fail(ErrCode::CommitTimeout));
            }
            time::sleep(poll).await;
        }

        Ok(OpOutcome::fail(ErrCode::CommitTimeout))
    }

    /// Shapes the successful reply under the state mutex. Reading `Get` from
    /// current state is safe here because the caller holds the mutex and
    /// `last_applied` has passed the command's slot.
    pub(crate) fn success_commit(st: &ServerState, kind: &OpKind) -> OpOutcome {
        match kind {
            OpKind::Get { key } => OpOutcome {
                err: ErrCode::Ok,
                value: Some(st.kv.get(key).cloned().unwrap_or_default()),
                config_num: 0,
            },
            OpKind::Put { .. } | OpKind::Append { .. } => OpOutcome {
                err: ErrCode::Ok,
                value: None,
                config_num: 0,
            },
            OpKind::ChangeConfig { .. } => OpOutcome {
                err: ErrCode::Ok,
                value: None,
                config_num: st.config.num,
            },
        }
    }

    /// Entrance for configuration-change proposals (self-proposed by the
    /// config poller). Must not be called while holding the state mutex.
    pub(crate) async fn handle_change_config(
        &self,
        next: Config,
    ) -> Result<OpOutcome, ShardsetError> {
        let req_num = {
            let mut st = self.mu.lock().await;
            if next.num < st.config.num {
                return Ok(OpOutcome {
                    err: ErrCode::HigherConfigNum,
                    value: None,
                    config_num: st.config.num,
                });
            }
            if next.num == st.config.num {
                return Ok(OpOutcome {
                    err: ErrCode::Ok,
                    value: None,
                    config_num: st.config.num,
                });
            }
            let req_num = st.local_req_num;
            st.local_req_num += 1;
            req_num
        };

        self.handle_command(
            LOCAL_CLIENT,
            req_num,
            OpKind::ChangeConfig { config: next },
        )
        .await
    }
}
