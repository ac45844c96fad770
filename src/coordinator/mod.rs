// SPDX-License-Identifier: GPL-3.0-or-later

//! C2 — MP coordinator.
//!
//! Presents `get_slave(node, process)`, keeps the message-handler
//! registry, runs one reception thread per connection, replicates state
//! variables each frame, and hides master/slave asymmetries. Grounded in
//! `ve_mp.h`/`ve_mp.c`.

mod statevar;

pub use statevar::{StateVar, StateVarFlags};

use std::collections::HashMap;
use std::io::Write as _;
use std::net::SocketAddr;
use std::os::unix::net::UnixStream;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use tracing::{debug, error, info, warn};

use crate::env::{Environment, Frame, UserProfile};
use crate::error::{CoordinatorError, TransportError};
use crate::transport::spawn::SpawnHelper;
use crate::transport::{
    self, best_effort_local_address, inject_slave_args, Channel, Connection, Packet, PacketHeader,
    RecvOutcome, SpawnMethod, SYSDEP_TAG_BESTADDR, SYSDEP_TAG_CONNUDP, SYSDEP_TAG_UDP_ACK,
};

/// Reserved message classes (§4.2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MsgClass {
    Data = 0,
    Ctrl = 1,
    Location = 2,
    Env = 3,
    Profile = 4,
    State = 5,
    Init = 6,
    Sysdep = 7,
    Render = 8,
    Audio = 9,
}

impl MsgClass {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => MsgClass::Data,
            1 => MsgClass::Ctrl,
            2 => MsgClass::Location,
            3 => MsgClass::Env,
            4 => MsgClass::Profile,
            5 => MsgClass::State,
            6 => MsgClass::Init,
            7 => MsgClass::Sysdep,
            8 => MsgClass::Render,
            9 => MsgClass::Audio,
            _ => return None,
        })
    }
}

/// CTRL sub-tags used during frame replication.
pub const CTRL_RENDER: u32 = 0;
pub const CTRL_SWAP: u32 = 1;

pub const DTAG_ANY: i64 = -1;
pub const DMSG_ANY: i64 = -1;

pub type Handler = Arc<dyn Fn(&Coordinator, u32, &Packet) + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct HandlerKey(i64, i64);

#[derive(Default)]
struct HandlerTable {
    exact: HashMap<(u32, u32), Handler>,
    wildcard: Vec<(HandlerKey, Handler)>,
}

impl HandlerTable {
    fn register(&mut self, class: i64, tag: i64, handler: Handler) {
        if class == DMSG_ANY || tag == DTAG_ANY {
            self.wildcard.push((HandlerKey(class, tag), handler));
        } else {
            self.exact.insert((class as u32, tag as u32), handler);
        }
    }

    fn lookup(&self, class: u32, tag: u32) -> Option<Handler> {
        if let Some(h) = self.exact.get(&(class, tag)) {
            return Some(h.clone());
        }
        for (key, h) in &self.wildcard {
            let class_ok = key.0 == DMSG_ANY || key.0 as u32 == class;
            let tag_ok = key.1 == DTAG_ANY || key.1 as u32 == tag;
            if class_ok && tag_ok {
                return Some(h.clone());
            }
        }
        None
    }
}

/// A registered slave. `id` is dense, assigned in order of first
/// request (§3, §8 invariant 3).
pub struct SlaveRecord {
    pub id: u32,
    pub method: SpawnMethod,
    pub node: String,
    pub process: String,
    pub connection: Arc<Connection>,
    recv_thread: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct SlaveKeyTable {
    by_key: HashMap<(String, String), u32>,
    next_id: u32,
}

enum Mode {
    Master,
    Slave { id: u32, connection: Arc<Connection> },
}

/// The single explicit coordinator value (§9 "Process-wide mutable
/// state"): a master/slave-mode flag, a slave table, a state-variable
/// list, and handler lists, with its own construction/teardown instead
/// of implicit globals.
pub struct Coordinator {
    mode: RwLock<Mode>,
    slaves: RwLock<Vec<Arc<SlaveRecord>>>,
    key_table: Mutex<SlaveKeyTable>,
    slave_handlers: RwLock<HandlerTable>,
    master_handlers: RwLock<HandlerTable>,
    state_vars: RwLock<Vec<StateVar>>,
    slave_guard: std::sync::atomic::AtomicBool,
    argv_template: Vec<String>,
    spawn_helper: Arc<SpawnHelper>,
    /// In-process coordinator handles for any `thread`-method slaves
    /// spawned by this master, keyed by slave id. A thread slave has no
    /// separate OS process, so its own `Coordinator` (in `Mode::Slave`)
    /// lives here rather than behind a pipe to another executable.
    thread_slaves: RwLock<HashMap<u32, Arc<Coordinator>>>,
    /// Origin/eye frame pair: on a master, the next pair `push_frame`
    /// replicates; on a slave, the pair most recently pushed down from
    /// the master (§4.2 "Frame replication", "LOCATION... copies the
    /// incoming frame pair into the process's origin and default-eye").
    location: RwLock<Option<(Frame, Frame)>>,
    /// Cached environment/profile, set by `push_env`/`push_profile` on a
    /// master or by the ENV/PROFILE slave handlers on a slave, so a
    /// late-joining slave's process-of-record matches what was last
    /// broadcast (§3 Lifecycle: "must be rebroadcast to any slave
    /// created after a profile reload").
    environment: RwLock<Option<Environment>>,
    profile: RwLock<Option<UserProfile>>,
    /// (process, node) pair learned from the one-shot INIT message
    /// (§4.2 "INIT (one-shot, initializes self-description)").
    self_description: RwLock<Option<(String, String)>>,
}

impl Coordinator {
    /// Must be called exactly once very early on every process (§4.1
    /// `slave_init`). `argv` is the process's own argv; a slave strips
    /// the sentinel before returning a ready-to-use coordinator.
    pub fn init(argv: &[String]) -> Result<Arc<Coordinator>, CoordinatorError> {
        let (slave_id, stripped) = transport::slave_init(argv)?;
        let spawn_helper = Arc::new(SpawnHelper::new().map_err(TransportError::Io)?);

        let mode = match slave_id {
            Some(id) => {
                let fd = std::env::var("VE_SLAVE_FD")
                    .ok()
                    .and_then(|s| s.parse::<i32>().ok())
                    .unwrap_or(3);
                let stream = unsafe {
                    use std::os::fd::FromRawFd;
                    UnixStream::from_raw_fd(fd)
                };
                let connection = Arc::new(transport::connection_from_stream(
                    SpawnMethod::Local,
                    "auto",
                    &stripped[0],
                    stream,
                ));
                Mode::Slave { id, connection }
            }
            None => Mode::Master,
        };

        let coord = Arc::new(Coordinator {
            mode: RwLock::new(mode),
            slaves: RwLock::new(Vec::new()),
            key_table: Mutex::new(SlaveKeyTable::default()),
            slave_handlers: RwLock::new(HandlerTable::default()),
            master_handlers: RwLock::new(HandlerTable::default()),
            state_vars: RwLock::new(Vec::new()),
            slave_guard: std::sync::atomic::AtomicBool::new(true),
            argv_template: stripped,
            spawn_helper,
            thread_slaves: RwLock::new(HashMap::new()),
            location: RwLock::new(None),
            environment: RwLock::new(None),
            profile: RwLock::new(None),
            self_description: RwLock::new(None),
        });

        coord.install_builtin_handlers();

        if let Mode::Slave { connection, .. } = &*coord.mode.read().unwrap() {
            let coord2 = coord.clone();
            let conn = connection.clone();
            std::thread::spawn(move || coord2.slave_reception_loop(conn));
        }

        Ok(coord)
    }

    /// Constructs a master-mode coordinator directly, for use in tests
    /// and the thread-slave demo binary where no real argv is involved.
    pub fn new_master_for_tests() -> Arc<Coordinator> {
        let spawn_helper = Arc::new(SpawnHelper::new().expect("spawn helper"));
        let coord = Arc::new(Coordinator {
            mode: RwLock::new(Mode::Master),
            slaves: RwLock::new(Vec::new()),
            key_table: Mutex::new(SlaveKeyTable::default()),
            slave_handlers: RwLock::new(HandlerTable::default()),
            master_handlers: RwLock::new(HandlerTable::default()),
            state_vars: RwLock::new(Vec::new()),
            slave_guard: std::sync::atomic::AtomicBool::new(true),
            argv_template: vec!["ve_test".to_string()],
            spawn_helper,
            thread_slaves: RwLock::new(HashMap::new()),
            location: RwLock::new(None),
            environment: RwLock::new(None),
            profile: RwLock::new(None),
            self_description: RwLock::new(None),
        });
        coord.install_builtin_handlers();
        coord
    }

    pub fn is_master(&self) -> bool {
        matches!(*self.mode.read().unwrap(), Mode::Master)
    }

    pub fn self_id(&self) -> Option<u32> {
        match &*self.mode.read().unwrap() {
            Mode::Master => None,
            Mode::Slave { id, .. } => Some(*id),
        }
    }

    pub fn slave_guard(&self) -> bool {
        self.slave_guard.load(Ordering::SeqCst)
    }

    pub fn set_slave_guard(&self, on: bool) {
        self.slave_guard.store(on, Ordering::SeqCst);
    }

    /// Registers a slave (or master-local) handler. `class`/`tag` may be
    /// `DMSG_ANY`/`DTAG_ANY` for wildcard matches; first match wins
    /// (exact before wildcard).
    pub fn add_slave_handler(&self, class: i64, tag: i64, handler: Handler) {
        self.slave_handlers.write().unwrap().register(class, tag, handler);
    }

    pub fn add_master_handler(&self, class: i64, tag: i64, handler: Handler) {
        self.master_handlers.write().unwrap().register(class, tag, handler);
    }

    /// Installs the slave-side handlers §4.2 requires every coordinator
    /// to carry from construction time: INIT, LOCATION, ENV, PROFILE,
    /// STATE, and SYSDEP (itself dispatching CONNUDP/BESTADDR/UDP_ACK).
    fn install_builtin_handlers(self: &Arc<Self>) {
        self.add_slave_handler(
            MsgClass::State as i64,
            DTAG_ANY,
            Arc::new(move |coord, _from, pkt| coord.handle_state_push(pkt)),
        );
        self.add_slave_handler(
            MsgClass::Init as i64,
            DTAG_ANY,
            Arc::new(move |coord, _from, pkt| coord.handle_init(pkt)),
        );
        self.add_slave_handler(
            MsgClass::Location as i64,
            DTAG_ANY,
            Arc::new(move |coord, _from, pkt| coord.handle_location_push(pkt)),
        );
        self.add_slave_handler(
            MsgClass::Env as i64,
            DTAG_ANY,
            Arc::new(move |coord, _from, pkt| coord.handle_env_push(pkt)),
        );
        self.add_slave_handler(
            MsgClass::Profile as i64,
            DTAG_ANY,
            Arc::new(move |coord, _from, pkt| coord.handle_profile_push(pkt)),
        );
        self.add_slave_handler(
            MsgClass::Sysdep as i64,
            DTAG_ANY,
            Arc::new(move |coord, _from, pkt| coord.handle_sysdep(pkt)),
        );
    }

    fn handle_state_push(&self, pkt: &Packet) {
        let vars = self.state_vars.read().unwrap();
        if let Some(var) = vars.iter().find(|v| v.tag as u32 == pkt.header.tag) {
            if let Err(e) = var.copy_in(&pkt.payload) {
                warn!(tag = pkt.header.tag, error = %e, "state variable push rejected");
            }
        } else {
            warn!(tag = pkt.header.tag, "state push for unregistered tag");
        }
    }

    /// One-shot: the first INIT message sets this process's
    /// self-description, later ones are ignored (§4.2).
    fn handle_init(&self, pkt: &Packet) {
        let mut desc = self.self_description.write().unwrap();
        if desc.is_some() {
            return;
        }
        let process = read_padded(&pkt.payload[0..128.min(pkt.payload.len())]);
        let node = read_padded(&pkt.payload[128.min(pkt.payload.len())..256.min(pkt.payload.len())]);
        info!(process, node, "self-description initialized");
        *desc = Some((process, node));
    }

    fn handle_location_push(&self, pkt: &Packet) {
        match rmp_serde::from_slice::<(Frame, Frame)>(&pkt.payload) {
            Ok(pair) => *self.location.write().unwrap() = Some(pair),
            Err(e) => warn!(error = %e, "malformed LOCATION push"),
        }
    }

    fn handle_env_push(&self, pkt: &Packet) {
        match Environment::from_msgpack(&pkt.payload) {
            Ok(env) => *self.environment.write().unwrap() = Some(env),
            Err(e) => warn!(error = %e, "malformed ENV push"),
        }
    }

    fn handle_profile_push(&self, pkt: &Packet) {
        match UserProfile::from_msgpack(&pkt.payload) {
            Ok(profile) => *self.profile.write().unwrap() = Some(profile),
            Err(e) => warn!(error = %e, "malformed PROFILE push"),
        }
    }

    /// Dispatches a SYSDEP sub-message by tag (§6): CONNUDP and BESTADDR
    /// drive fast-channel negotiation, UDP_ACK needs no slave-side
    /// reaction (it only ever flows slave -> master).
    fn handle_sysdep(&self, pkt: &Packet) {
        match pkt.header.tag {
            SYSDEP_TAG_BESTADDR if pkt.payload.is_empty() => self.handle_bestaddr_query(),
            SYSDEP_TAG_CONNUDP => self.handle_connudp(pkt),
            SYSDEP_TAG_UDP_ACK => {}
            other => debug!(tag = other, "unhandled SYSDEP sub-message"),
        }
    }

    /// Replies to a BESTADDR query with our own best-effort address
    /// (§6). Only meaningful on a slave; a master never receives one.
    fn handle_bestaddr_query(&self) {
        let Mode::Slave { connection, .. } = &*self.mode.read().unwrap() else {
            return;
        };
        let addr = format!("{}\0", best_effort_local_address());
        let result = connection.send(Packet {
            header: PacketHeader {
                seq: 0,
                channel: Channel::Reliable as u32,
                msg_class: MsgClass::Sysdep as u32,
                tag: SYSDEP_TAG_BESTADDR,
                payload_len: addr.len() as u32,
            },
            payload: addr.into_bytes(),
        });
        if let Err(e) = result {
            warn!(error = %e, "failed to answer BESTADDR query");
        }
    }

    /// Parses "addr port key check\0" and completes the fast-channel
    /// handshake on the slave side (§6 CONNUDP).
    fn handle_connudp(&self, pkt: &Packet) {
        let Mode::Slave { connection, .. } = &*self.mode.read().unwrap() else {
            return;
        };
        let text = String::from_utf8_lossy(&pkt.payload);
        let text = text.trim_end_matches('\0');
        let mut parts = text.split_whitespace();
        let (Some(addr), Some(port), Some(key), Some(check)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            warn!(payload = %text, "malformed CONNUDP payload");
            return;
        };
        let (Ok(port), Ok(key), Ok(check)) = (port.parse::<u16>(), key.parse::<u32>(), check.parse::<u32>())
        else {
            warn!(payload = %text, "malformed CONNUDP payload");
            return;
        };
        if check != key.wrapping_mul(2_654_435_761).wrapping_add(1) {
            warn!("CONNUDP check word mismatch, refusing fast channel");
            return;
        }
        let peer: SocketAddr = match format!("{addr}:{port}").parse() {
            Ok(p) => p,
            Err(e) => {
                warn!(addr, port, error = %e, "unparseable CONNUDP address");
                return;
            }
        };
        if let Err(e) = connection.accept_fast_channel(peer, key) {
            warn!(error = %e, "failed to accept fast channel");
        }
    }

    /// `get_slave(node, process)`. `auto`/empty means "system chooses".
    /// `unique` always forces a brand-new slave. Existing (node,process)
    /// pairs return the same dense id on every call (§8 invariant 3).
    pub fn get_slave(
        self: &Arc<Self>,
        node: &str,
        process: &str,
        allow_fail: bool,
    ) -> Result<u32, CoordinatorError> {
        let node = normalize(node);
        let process = normalize(process);

        if process != "unique" {
            let existing = {
                let table = self.key_table.lock().unwrap();
                table.by_key.get(&(node.clone(), process.clone())).copied()
            };
            if let Some(id) = existing {
                return Ok(id);
            }
        }

        let method = classify(&node, &process);
        let id = {
            let mut table = self.key_table.lock().unwrap();
            let id = table.next_id;
            table.next_id += 1;
            if process != "unique" {
                table.by_key.insert((node.clone(), process.clone()), id);
            }
            id
        };

        match self.bring_up_slave(id, method, &node, &process) {
            Ok(record) => {
                self.slaves.write().unwrap().push(record);
                Ok(id)
            }
            Err(e) => {
                error!(node = %node, process = %process, error = %e, "slave bring-up failed");
                if allow_fail {
                    Err(CoordinatorError::BringUpFailed(node, process, e.to_string()))
                } else {
                    panic!("fatal: slave bring-up failed for ({node}, {process}): {e}");
                }
            }
        }
    }

    fn bring_up_slave(
        self: &Arc<Self>,
        id: u32,
        method: SpawnMethod,
        node: &str,
        process: &str,
    ) -> Result<Arc<SlaveRecord>, TransportError> {
        let connection = match method {
            SpawnMethod::Thread => self.spawn_thread_slave(id)?,
            SpawnMethod::Local => {
                let argv = inject_slave_args(&self.argv_template, id);
                self.spawn_helper.spawn_local(id, &argv, &[])?
            }
            SpawnMethod::Remote => {
                let argv = inject_slave_args(&self.argv_template, id);
                self.spawn_helper.spawn_remote(id, node, &argv)?
            }
        };
        let connection = Arc::new(connection);

        if method != SpawnMethod::Thread {
            self.send_init(&connection, process, node)?;
            connection.prepare()?;
        }

        let record = Arc::new(SlaveRecord {
            id,
            method,
            node: node.to_string(),
            process: process.to_string(),
            connection: connection.clone(),
            recv_thread: Mutex::new(None),
        });

        let this = self.clone();
        let conn = connection.clone();
        let handle = std::thread::spawn(move || this.master_reception_loop(conn, id));
        *record.recv_thread.lock().unwrap() = Some(handle);

        info!(id, node, process, ?method, "slave brought up");
        Ok(record)
    }

    fn spawn_thread_slave(self: &Arc<Self>, id: u32) -> Result<Connection, TransportError> {
        let (master_end, slave_end) = UnixStream::pair().map_err(TransportError::Io)?;
        let master_conn = transport::connection_from_stream(
            SpawnMethod::Thread,
            "auto",
            "auto",
            master_end,
        );
        let slave_conn = Arc::new(transport::connection_from_stream(
            SpawnMethod::Thread,
            "auto",
            "auto",
            slave_end,
        ));

        // A thread slave has no separate process; its own Coordinator
        // (in Mode::Slave) is kept in-process so the application can
        // register state variables and callbacks on it directly.
        let slave_coord = Arc::new(Coordinator {
            mode: RwLock::new(Mode::Slave { id, connection: slave_conn.clone() }),
            slaves: RwLock::new(Vec::new()),
            key_table: Mutex::new(SlaveKeyTable::default()),
            slave_handlers: RwLock::new(HandlerTable::default()),
            master_handlers: RwLock::new(HandlerTable::default()),
            state_vars: RwLock::new(Vec::new()),
            slave_guard: std::sync::atomic::AtomicBool::new(true),
            argv_template: self.argv_template.clone(),
            spawn_helper: self.spawn_helper.clone(),
            thread_slaves: RwLock::new(HashMap::new()),
            location: RwLock::new(None),
            environment: RwLock::new(None),
            profile: RwLock::new(None),
            self_description: RwLock::new(None),
        });
        slave_coord.install_builtin_handlers();
        self.thread_slaves.write().unwrap().insert(id, slave_coord.clone());

        let conn_for_loop = slave_conn.clone();
        std::thread::spawn(move || slave_coord.slave_reception_loop(conn_for_loop));

        Ok(master_conn)
    }

    /// Returns the in-process `Coordinator` for a `thread`-method slave,
    /// so tests and the application can register state variables and
    /// callbacks on the slave side directly (§8 scenario 1).
    pub fn thread_slave_handle(&self, id: u32) -> Option<Arc<Coordinator>> {
        self.thread_slaves.read().unwrap().get(&id).cloned()
    }

    fn send_init(
        &self,
        connection: &Connection,
        process: &str,
        node: &str,
    ) -> Result<(), TransportError> {
        let mut payload = vec![0u8; 256];
        write_padded(&mut payload[0..128], process);
        write_padded(&mut payload[128..256], node);
        connection.send(Packet {
            header: PacketHeader {
                seq: 0,
                channel: Channel::Reliable as u32,
                msg_class: MsgClass::Init as u32,
                tag: 0,
                payload_len: payload.len() as u32,
            },
            payload,
        })
    }

    fn master_reception_loop(self: Arc<Self>, connection: Arc<Connection>, slave_id: u32) {
        loop {
            match connection.recv(Some(std::time::Duration::from_secs(1))) {
                Ok(RecvOutcome::Packet(pkt)) => {
                    let Some(class) = MsgClass::from_u32(pkt.header.msg_class) else {
                        continue;
                    };
                    if let Some(handler) =
                        self.master_handlers.read().unwrap().lookup(class as u32, pkt.header.tag)
                    {
                        handler(&self, slave_id, &pkt);
                    }
                }
                Ok(RecvOutcome::Timeout) => continue,
                Err(e) => {
                    warn!(slave_id, error = %e, "slave connection lost");
                    self.slaves.write().unwrap().retain(|s| s.id != slave_id);
                    return;
                }
            }
        }
    }

    fn slave_reception_loop(self: Arc<Self>, connection: Arc<Connection>) {
        loop {
            match connection.recv(Some(std::time::Duration::from_secs(1))) {
                Ok(RecvOutcome::Packet(pkt)) => {
                    let Some(class) = MsgClass::from_u32(pkt.header.msg_class) else {
                        continue;
                    };
                    if let Some(handler) =
                        self.slave_handlers.read().unwrap().lookup(class as u32, pkt.header.tag)
                    {
                        handler(&self, 0, &pkt);
                    }
                }
                Ok(RecvOutcome::Timeout) => continue,
                Err(e) => {
                    error!(error = %e, "master connection lost; exiting reception loop");
                    return;
                }
            }
        }
    }

    /// Registers a state variable. Post-init registration carries no
    /// synchronization guarantees (§3).
    pub fn add_state_var(&self, var: StateVar) -> Result<(), CoordinatorError> {
        let mut vars = self.state_vars.write().unwrap();
        if vars.iter().any(|v| v.tag == var.tag) {
            return Err(CoordinatorError::DuplicateStateVar(var.tag));
        }
        vars.push(var);
        Ok(())
    }

    /// Pushes a message of class DATA directly to `slave_id` if this is
    /// the master, or — on a slave — back to the master, honoring the
    /// slave guard (§4.2 end-to-end scenario 5).
    pub fn push_data(&self, tag: u32, payload: Vec<u8>, channel: Channel) -> Result<(), CoordinatorError> {
        self.push_message(MsgClass::Data, tag, payload, channel)
    }

    pub fn push_message(
        &self,
        class: MsgClass,
        tag: u32,
        payload: Vec<u8>,
        channel: Channel,
    ) -> Result<(), CoordinatorError> {
        match &*self.mode.read().unwrap() {
            Mode::Master => {
                for slave in self.slaves.read().unwrap().iter() {
                    slave
                        .connection
                        .send(Packet {
                            header: PacketHeader {
                                seq: 0,
                                channel: channel as u32,
                                msg_class: class as u32,
                                tag,
                                payload_len: payload.len() as u32,
                            },
                            payload: payload.clone(),
                        })
                        .map_err(CoordinatorError::Transport)?;
                }
                Ok(())
            }
            Mode::Slave { connection, .. } => {
                if self.slave_guard() {
                    return Ok(());
                }
                connection
                    .send(Packet {
                        header: PacketHeader {
                            seq: 0,
                            channel: channel as u32,
                            msg_class: class as u32,
                            tag,
                            payload_len: payload.len() as u32,
                        },
                        payload,
                    })
                    .map_err(CoordinatorError::Transport)
            }
        }
    }

    /// Sets the origin/eye frame pair a master pushes on the next frame
    /// (§4.2 "Frame replication").
    pub fn set_location(&self, origin: Frame, eye: Frame) {
        *self.location.write().unwrap() = Some((origin, eye));
    }

    pub fn location(&self) -> Option<(Frame, Frame)> {
        *self.location.read().unwrap()
    }

    /// Pushes the current origin/eye frame pair as a FAST LOCATION
    /// message, if one has been set. A no-op otherwise — an application
    /// that never moves the viewer never needs to push anything.
    fn push_location(&self) -> Result<(), CoordinatorError> {
        let Some(pair) = *self.location.read().unwrap() else {
            return Ok(());
        };
        let payload = rmp_serde::to_vec(&pair)
            .map_err(|e| CoordinatorError::Serialization("location".into(), e.to_string()))?;
        self.push_message(MsgClass::Location, 0, payload, Channel::Fast)
    }

    /// Pushes an environment to every slave and caches it so a
    /// subsequently spawned slave's own rebroadcast reflects the latest
    /// version (§3 Lifecycle).
    pub fn push_env(&self, env: &Environment) -> Result<(), CoordinatorError> {
        let payload = rmp_serde::to_vec(env)
            .map_err(|e| CoordinatorError::Serialization("environment".into(), e.to_string()))?;
        *self.environment.write().unwrap() = Some(env.clone());
        self.push_message(MsgClass::Env, 0, payload, Channel::Reliable)
    }

    /// Pushes a user profile to every slave and caches it, mirroring
    /// `push_env` (§3 Lifecycle).
    pub fn push_profile(&self, profile: &UserProfile) -> Result<(), CoordinatorError> {
        let payload = rmp_serde::to_vec(profile)
            .map_err(|e| CoordinatorError::Serialization("profile".into(), e.to_string()))?;
        *self.profile.write().unwrap() = Some(profile.clone());
        self.push_message(MsgClass::Profile, 0, payload, Channel::Reliable)
    }

    /// One render tick's worth of replication (§4.2 "Frame
    /// replication"): push AUTO state vars on FAST, then origin/eye
    /// frames, then CTRL RENDER, then CTRL SWAP. Fire-and-forget; the
    /// render subsystem owns its own completion semantics.
    pub fn push_frame(&self) -> Result<(), CoordinatorError> {
        if !self.is_master() {
            return Ok(());
        }
        let vars: Vec<StateVar> = self
            .state_vars
            .read()
            .unwrap()
            .iter()
            .filter(|v| v.flags.contains(StateVarFlags::AUTO))
            .cloned()
            .collect();
        for var in vars {
            let payload = var.snapshot();
            self.push_message(MsgClass::State, var.tag as u32, payload, Channel::Fast)?;
        }
        self.push_location()?;
        self.push_message(MsgClass::Ctrl, CTRL_RENDER, Vec::new(), Channel::Reliable)?;
        self.push_message(MsgClass::Ctrl, CTRL_SWAP, Vec::new(), Channel::Reliable)?;
        Ok(())
    }

    pub fn slave_count(&self) -> usize {
        self.slaves.read().unwrap().len()
    }

    pub fn slave_by_id(&self, id: u32) -> Option<Arc<SlaveRecord>> {
        self.slaves.read().unwrap().iter().find(|s| s.id == id).cloned()
    }

    pub fn shutdown(&self) {
        self.spawn_helper.kill_all();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn normalize(s: &str) -> String {
    if s.is_empty() {
        "auto".to_string()
    } else {
        s.to_string()
    }
}

/// Slave naming rule from §4.2: both auto -> thread; node auto, process
/// named -> local; node a real hostname -> remote.
fn classify(node: &str, process: &str) -> SpawnMethod {
    let _ = process;
    if node == "auto" {
        if process == "auto" {
            SpawnMethod::Thread
        } else {
            SpawnMethod::Local
        }
    } else {
        SpawnMethod::Remote
    }
}

fn write_padded(dst: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

/// Reads a NUL-padded fixed-width field back out as a `String`,
/// trimming everything from the first NUL onward.
fn read_padded(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}
