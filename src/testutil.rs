//! In-process mock device server for tests.
//!
//! Two layers: [`spawn_scripted_server`] hands a raw server-side WebSocket
//! to a test closure for exact frame-level scripting, and [`MockDevice`]
//! emulates enough of a usb2snes server (memory map, file store, CMD
//! staging execution, savestate flags) to run the high-level operations
//! end to end over a real loopback socket.

// ============================================================================
// Imports
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::console::{Console, ConsoleOptions};
use crate::memory::map::{SAVESTATE_INTERFACE_LEGACY, SAVESTATE_INTERFACE_MODERN};
use crate::transport::{connection::Transport, endpoint, Endpoint, RequestChannel};

// ============================================================================
// Types
// ============================================================================

type ServerWs = WebSocketStream<TcpStream>;
type ServerSink = SplitSink<ServerWs, Message>;
type ServerStream = SplitStream<ServerWs>;

/// Cap on mock reply/data frames, so multi-frame accumulation is always
/// exercised.
const FRAME_CAP: usize = 8 * 1024;
const FILE_FRAME_CAP: usize = 700;

/// Aborts the server task on drop.
pub(crate) struct ServerGuard {
    handle: JoinHandle<()>,
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ============================================================================
// Scripted Server
// ============================================================================

/// Binds a loopback WebSocket server and hands the first accepted
/// connection to `script`.
pub(crate) async fn spawn_scripted_server<F, Fut>(script: F) -> (String, ServerGuard)
where
    F: FnOnce(ServerWs) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let handle = tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await
            && let Ok(ws) = tokio_tungstenite::accept_async(stream).await
        {
            script(ws).await;
        }
    });

    (format!("ws://127.0.0.1:{port}"), ServerGuard { handle })
}

/// Dials `url` and wraps the connection in a [`RequestChannel`].
pub(crate) async fn connect_channel(url: &str) -> RequestChannel {
    let stream = endpoint::open_stream(&Endpoint::direct(url), Duration::from_secs(2))
        .await
        .expect("connect");
    RequestChannel::new(Transport::new(stream))
}

// ============================================================================
// MockDevice
// ============================================================================

#[derive(Default)]
struct DeviceState {
    memory: HashMap<u32, u8>,
    files: HashMap<String, Vec<u8>>,
    dirs: HashSet<String>,
    firmware: String,
    devices: Vec<String>,
    control_log: Vec<String>,
    cmd_writes: usize,
    upload_announcements: usize,
    discard_uploads: bool,
    stall_downloads: bool,
    drop_connection_after: Option<usize>,
    savestates_enabled: bool,
    attached: Option<String>,
}

/// A loopback usb2snes server emulating device semantics.
#[derive(Clone)]
pub(crate) struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
    url: String,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MockDevice {
    /// Binds the server and starts accepting connections.
    pub(crate) async fn spawn() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let state = Arc::new(Mutex::new(DeviceState {
            firmware: "11.0".to_string(),
            devices: vec![
                "SD2SNES COM3".to_string(),
                "RetroArch Emu".to_string(),
                "COM4".to_string(),
            ],
            ..DeviceState::default()
        }));
        let tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_state = Arc::clone(&state);
        let accept_tasks = Arc::clone(&tasks);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    let state = Arc::clone(&accept_state);
                    accept_tasks.lock().push(tokio::spawn(serve(ws, state)));
                }
            }
        });
        tasks.lock().push(accept);

        Self {
            state,
            url: format!("ws://127.0.0.1:{port}"),
            tasks,
        }
    }

    pub(crate) fn url(&self) -> String {
        self.url.clone()
    }

    /// Connects and attaches a console with default options.
    pub(crate) async fn attached_console(&self, device: &str) -> Console {
        self.attached_console_with(device, ConsoleOptions::default())
            .await
    }

    /// Connects and attaches a console with custom options.
    pub(crate) async fn attached_console_with(
        &self,
        device: &str,
        options: ConsoleOptions,
    ) -> Console {
        let console = Console::builder()
            .url(self.url())
            .options(options)
            .connect()
            .await
            .expect("connect");
        console.attach(device).await.expect("attach");
        console
    }

    // ------------------------------------------------------------------
    // State accessors for assertions and scenario setup
    // ------------------------------------------------------------------

    pub(crate) fn poke(&self, address: u32, bytes: &[u8]) {
        let mut state = self.state.lock();
        for (i, byte) in bytes.iter().enumerate() {
            state.memory.insert(address + i as u32, *byte);
        }
    }

    pub(crate) fn peek(&self, address: u32, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        (0..len)
            .map(|i| *state.memory.get(&(address + i as u32)).unwrap_or(&0))
            .collect()
    }

    pub(crate) fn add_dir(&self, path: &str) {
        self.state.lock().dirs.insert(path.to_string());
    }

    pub(crate) fn has_dir(&self, path: &str) -> bool {
        self.state.lock().dirs.contains(path)
    }

    pub(crate) fn insert_file(&self, path: &str, data: Vec<u8>) {
        self.state.lock().files.insert(path.to_string(), data);
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    pub(crate) fn attached_device(&self) -> Option<String> {
        self.state.lock().attached.clone()
    }

    pub(crate) fn set_firmware(&self, version: &str) {
        self.state.lock().firmware = version.to_string();
    }

    pub(crate) fn firmware(&self) -> String {
        self.state.lock().firmware.clone()
    }

    pub(crate) fn control_log(&self) -> Vec<String> {
        self.state.lock().control_log.clone()
    }

    pub(crate) fn cmd_writes(&self) -> usize {
        self.state.lock().cmd_writes
    }

    pub(crate) fn upload_announcements(&self) -> usize {
        self.state.lock().upload_announcements
    }

    pub(crate) fn set_discard_uploads(&self, on: bool) {
        self.state.lock().discard_uploads = on;
    }

    pub(crate) fn set_stall_downloads(&self, on: bool) {
        self.state.lock().stall_downloads = on;
    }

    pub(crate) fn set_drop_connection_after(&self, bytes: usize) {
        self.state.lock().drop_connection_after = Some(bytes);
    }

    pub(crate) fn enable_savestates(&self) {
        self.state.lock().savestates_enabled = true;
    }

    /// Kills every open connection (and the accept loop), simulating the
    /// server going away.
    pub(crate) fn close_connections(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Installs a test subscriber once, honoring `RUST_LOG`.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

// ============================================================================
// Connection Handler
// ============================================================================

async fn serve(ws: ServerWs, state: Arc<Mutex<DeviceState>>) {
    let (mut write, mut read) = ws.split();

    while let Some(Ok(message)) = read.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            // Binary frames outside an opcode handler mean a client bug.
            Message::Binary(data) => panic!("unexpected binary frame of {} bytes", data.len()),
            _ => continue,
        };

        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
            continue;
        };
        let opcode = value["Opcode"].as_str().unwrap_or_default().to_string();
        let space = value["Space"].as_str().unwrap_or("SNES").to_string();
        let operands: Vec<String> = value["Operands"]
            .as_array()
            .map(|a| {
                a.iter()
                    .map(|v| v.as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let keep_going =
            handle_opcode(&mut write, &mut read, &state, &opcode, &space, &operands).await;
        if !keep_going {
            break;
        }
    }
}

async fn handle_opcode(
    write: &mut ServerSink,
    read: &mut ServerStream,
    state: &Arc<Mutex<DeviceState>>,
    opcode: &str,
    space: &str,
    operands: &[String],
) -> bool {
    match opcode {
        "DeviceList" => {
            let devices = state.lock().devices.clone();
            send_results(write, &devices).await;
        }

        "Attach" => {
            state.lock().attached = operands.first().cloned();
        }

        "Info" => {
            let firmware = state.lock().firmware.clone();
            send_results(
                write,
                &[
                    firmware,
                    "usb2snes-mock".to_string(),
                    "/rom/current.smc".to_string(),
                    "FEAT_DMA".to_string(),
                ],
            )
            .await;
        }

        "Name" | "Boot" | "Menu" | "Reset" => {
            let mut entry = opcode.to_string();
            if let Some(operand) = operands.first() {
                entry.push(' ');
                entry.push_str(operand);
            }
            state.lock().control_log.push(entry);
        }

        "GetAddress" => {
            let mut data = Vec::new();
            {
                let locked = state.lock();
                for pair in operands.chunks_exact(2) {
                    let address = hex(&pair[0]);
                    let size = hex(&pair[1]) as usize;
                    for i in 0..size {
                        data.push(*locked.memory.get(&(address + i as u32)).unwrap_or(&0));
                    }
                }
            }
            for frame in frames(&data, FRAME_CAP) {
                if write.send(Message::Binary(frame.into())).await.is_err() {
                    return false;
                }
            }
        }

        "PutAddress" => {
            let total: usize = operands
                .chunks_exact(2)
                .map(|pair| hex(&pair[1]) as usize)
                .sum();
            let Some(data) = read_binary(read, total).await else {
                return false;
            };

            if space == "CMD" {
                state.lock().cmd_writes += 1;
                execute_staged_program(state, &data);
            } else {
                let mut offset = 0usize;
                {
                    let mut locked = state.lock();
                    for pair in operands.chunks_exact(2) {
                        let address = hex(&pair[0]);
                        let size = hex(&pair[1]) as usize;
                        for i in 0..size {
                            locked.memory.insert(address + i as u32, data[offset + i]);
                        }
                        offset += size;
                    }
                }
                settle_savestate_flags(state);
            }
        }

        "PutFile" => {
            let path = operands.first().cloned().unwrap_or_default();
            let size = operands.get(1).map(|s| hex(s) as usize).unwrap_or(0);
            state.lock().upload_announcements += 1;

            let data = if size > 0 {
                match read_binary(read, size).await {
                    Some(data) => data,
                    None => return false,
                }
            } else {
                Vec::new()
            };

            let mut locked = state.lock();
            if !locked.discard_uploads {
                locked.files.insert(path, data);
            }
        }

        "GetFile" => {
            let path = operands.first().cloned().unwrap_or_default();
            let (data, stall, drop_after) = {
                let locked = state.lock();
                (
                    locked.files.get(&path).cloned(),
                    locked.stall_downloads,
                    locked.drop_connection_after,
                )
            };
            // A missing file gets no reply at all; the real device goes
            // silent.
            let Some(data) = data else { return true };

            send_results(write, &[format!("{:x}", data.len())]).await;
            if stall {
                return true;
            }

            let mut sent = 0usize;
            for frame in frames(&data, FILE_FRAME_CAP) {
                if let Some(limit) = drop_after
                    && sent >= limit
                {
                    let _ = write.close().await;
                    return false;
                }
                sent += frame.len();
                if write.send(Message::Binary(frame.into())).await.is_err() {
                    return false;
                }
            }
        }

        "List" => {
            let path = operands.first().cloned().unwrap_or_default();
            let entries = list_entries(state, &path);
            send_results(write, &entries).await;
        }

        "MakeDir" => {
            if let Some(path) = operands.first() {
                state.lock().dirs.insert(path.clone());
            }
        }

        "Remove" => {
            if let Some(path) = operands.first() {
                let mut locked = state.lock();
                locked.files.remove(path);
                locked.dirs.remove(path);
            }
        }

        other => panic!("mock device got unknown opcode {other:?}"),
    }
    true
}

// ============================================================================
// Opcode Helpers
// ============================================================================

async fn send_results(write: &mut ServerSink, results: &[String]) {
    let reply = serde_json::json!({ "Results": results });
    let _ = write.send(Message::Text(reply.to_string().into())).await;
}

async fn read_binary(read: &mut ServerStream, total: usize) -> Option<Vec<u8>> {
    let mut data = Vec::with_capacity(total);
    while data.len() < total {
        match read.next().await {
            Some(Ok(Message::Binary(chunk))) => data.extend_from_slice(&chunk),
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(other)) => panic!("expected binary data, got {other:?}"),
            Some(Err(_)) => return None,
        }
    }
    Some(data)
}

fn frames(data: &[u8], cap: usize) -> Vec<Vec<u8>> {
    if data.is_empty() {
        return Vec::new();
    }
    data.chunks(cap).map(<[u8]>::to_vec).collect()
}

fn hex(field: &str) -> u32 {
    u32::from_str_radix(field, 16).unwrap_or_else(|_| panic!("bad hex operand {field:?}"))
}

/// Interprets the staged 65816 program: applies each `LDA #imm` /
/// `STA long` pair, mapping console WRAM addresses back to the flat
/// protocol space.
fn execute_staged_program(state: &Arc<Mutex<DeviceState>>, program: &[u8]) {
    let mut locked = state.lock();
    let mut i = 6; // skip the prologue
    while i + 5 < program.len() && program[i] == 0xA9 && program[i + 2] == 0x8F {
        let value = program[i + 1];
        let target = u32::from(program[i + 3])
            | (u32::from(program[i + 4]) << 8)
            | (u32::from(program[i + 5]) << 16);
        if (0x7E_0000..0x80_0000).contains(&target) {
            locked
                .memory
                .insert(crate::memory::map::WRAM_START + (target - 0x7E_0000), value);
        }
        i += 6;
    }
}

/// Emulates the firmware clearing savestate trigger flags shortly after
/// they are set.
fn settle_savestate_flags(state: &Arc<Mutex<DeviceState>>) {
    let interfaces = [SAVESTATE_INTERFACE_LEGACY, SAVESTATE_INTERFACE_MODERN];
    let pending: Vec<u32> = {
        let locked = state.lock();
        if !locked.savestates_enabled {
            return;
        }
        interfaces
            .into_iter()
            .filter(|iface| {
                *locked.memory.get(iface).unwrap_or(&0) != 0
                    || *locked.memory.get(&(iface + 1)).unwrap_or(&0) != 0
            })
            .collect()
    };

    for iface in pending {
        let state = Arc::clone(state);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut locked = state.lock();
            locked.memory.insert(iface, 0);
            locked.memory.insert(iface + 1, 0);
        });
    }
}

/// Lists the immediate children of `path`, dot entries included (the
/// client is expected to filter them).
fn list_entries(state: &Arc<Mutex<DeviceState>>, path: &str) -> Vec<String> {
    let locked = state.lock();
    let prefix = if path.is_empty() || path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    };

    let mut results = vec![
        "0".to_string(),
        ".".to_string(),
        "0".to_string(),
        "..".to_string(),
    ];
    for dir in &locked.dirs {
        if let Some(rest) = dir.strip_prefix(&prefix)
            && !rest.is_empty()
            && !rest.contains('/')
        {
            results.push("0".to_string());
            results.push(rest.to_string());
        }
    }
    for file in locked.files.keys() {
        if let Some(rest) = file.strip_prefix(&prefix)
            && !rest.is_empty()
            && !rest.contains('/')
        {
            results.push("1".to_string());
            results.push(rest.to_string());
        }
    }
    results
}
