//! Daemon backend: an MPD-protocol media daemon over TCP.
//!
//! The daemon does the decoding; we only send transport commands. It never
//! pushes notifications, so while a track runs a poller thread asks for
//! `status` and synthesizes the end-of-stream continuation when the daemon
//! reports `state: stop`.
//!
//! Every command goes through `Link::call`, which reconnects and retries the
//! failed command exactly once before giving up with `Connection`.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::{AudioBackend, EndOfStream, StreamInfo};
use crate::error::{PlayerError, PlayerResult};
use crate::models::Track;
use crate::volume;

const IO_TIMEOUT: Duration = Duration::from_secs(3);
/// The poller never runs slower than this.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

type Pairs = Vec<(String, String)>;

/// One reply from the daemon.
#[derive(Debug, PartialEq)]
enum Reply {
    Ok(Pairs),
    /// `ACK [code@index] {command} message`
    Ack(String),
}

pub struct DaemonBackend {
    link: Arc<Link>,
    music_dir: Option<PathBuf>,
    poll_interval: Duration,
    status: Arc<Mutex<StatusCache>>,
    poller: Mutex<Option<Poller>>,
}

#[derive(Debug, Default)]
struct StatusCache {
    active: bool,
    elapsed: Duration,
    length: Option<Duration>,
}

struct Poller {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl DaemonBackend {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            link: Arc::new(Link::new(address.into())),
            music_dir: None,
            poll_interval: Duration::from_millis(500),
            status: Arc::new(Mutex::new(StatusCache::default())),
            poller: Mutex::new(None),
        }
    }

    /// Paths under `dir` are sent relative to it, which is how the daemon
    /// addresses its own library.
    pub fn with_music_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.music_dir = Some(dir.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.min(MAX_POLL_INTERVAL);
        self
    }

    /// Check the daemon answers. Used at startup to fail early.
    pub fn ping(&self) -> PlayerResult<()> {
        self.exec("ping").map(|_| ())
    }

    fn exec(&self, command: &str) -> PlayerResult<Pairs> {
        match self.link.call(command)? {
            Reply::Ok(pairs) => Ok(pairs),
            Reply::Ack(msg) => {
                log::warn!("rondo: daemon rejected {:?}: {}", command, msg);
                Err(PlayerError::State("daemon rejected the command"))
            }
        }
    }

    fn uri_for(&self, path: &Path) -> String {
        self.music_dir
            .as_deref()
            .and_then(|dir| path.strip_prefix(dir).ok())
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Cancel the status poller and wait for it to exit. A poller calling
    /// this from its own continuation is already on its way out.
    fn stop_poller(&self) {
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            poller.cancel.store(true, Ordering::SeqCst);
            poller.thread.thread().unpark();
            if poller.thread.thread().id() != thread::current().id() {
                let _ = poller.thread.join();
            }
        }
    }

    fn spawn_poller(&self, on_end: EndOfStream) -> PlayerResult<()> {
        let cancel = Arc::new(AtomicBool::new(false));
        let link = Arc::clone(&self.link);
        let status = Arc::clone(&self.status);
        let interval = self.poll_interval;
        let thread_cancel = Arc::clone(&cancel);

        let thread = thread::Builder::new()
            .name("rondo-daemon-poll".into())
            .spawn(move || poll_status(&link, &status, &thread_cancel, interval, on_end))
            .map_err(|e| PlayerError::Connection(e.to_string()))?;

        *self.poller.lock() = Some(Poller { cancel, thread });
        Ok(())
    }
}

impl Drop for DaemonBackend {
    fn drop(&mut self) {
        self.stop_poller();
    }
}

impl AudioBackend for DaemonBackend {
    fn start(&self, track: &Track, volume: f64, on_end: EndOfStream) -> PlayerResult<StreamInfo> {
        self.stop_poller();
        *self.status.lock() = StatusCache::default();

        let uri = self.uri_for(track.path());
        self.exec("clear")?;
        match self.link.call(&format!("add {}", quote(&uri)))? {
            Reply::Ok(_) => {}
            Reply::Ack(msg) => return Err(PlayerError::io(track.path(), msg)),
        }
        self.exec(&format!("setvol {}", volume::volume_to_percent(volume)))?;
        self.exec("play")?;

        let status = parse_status(&self.exec("status")?);
        *self.status.lock() = StatusCache {
            active: true,
            elapsed: status.elapsed,
            length: status.length,
        };

        self.spawn_poller(on_end)?;
        Ok(StreamInfo {
            length: status.length,
        })
    }

    fn pause(&self) -> PlayerResult<()> {
        self.exec("pause 1").map(|_| ())
    }

    fn resume(&self) -> PlayerResult<()> {
        self.exec("pause 0").map(|_| ())
    }

    fn close(&self) -> PlayerResult<()> {
        self.stop_poller();
        *self.status.lock() = StatusCache::default();
        self.exec("stop").map(|_| ())
    }

    fn seek(&self, position: Duration) -> PlayerResult<()> {
        self.exec(&format!("seekcur {:.3}", position.as_secs_f64()))?;
        let mut status = self.status.lock();
        if status.active {
            status.elapsed = position;
        }
        Ok(())
    }

    fn set_volume(&self, volume: f64) -> PlayerResult<()> {
        self.exec(&format!("setvol {}", volume::volume_to_percent(volume)))
            .map(|_| ())
    }

    fn position(&self) -> Option<Duration> {
        let status = self.status.lock();
        status.active.then_some(status.elapsed)
    }

    fn length(&self) -> Option<Duration> {
        let status = self.status.lock();
        if status.active {
            status.length
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Status polling
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq)]
struct Status {
    state: String,
    elapsed: Duration,
    length: Option<Duration>,
}

fn parse_status(pairs: &Pairs) -> Status {
    let mut status = Status::default();
    for (key, value) in pairs {
        match key.as_str() {
            "state" => status.state = value.clone(),
            "elapsed" => {
                if let Some(secs) = value.parse::<f64>().ok().filter(|s| s.is_finite()) {
                    status.elapsed = Duration::from_secs_f64(secs.max(0.0));
                }
            }
            "duration" => {
                status.length = value
                    .parse::<f64>()
                    .ok()
                    .filter(|secs| secs.is_finite() && *secs > 0.0)
                    .map(Duration::from_secs_f64);
            }
            // Older daemons only report "time: elapsed:total" in whole seconds.
            "time" if status.length.is_none() => {
                if let Some((_, total)) = value.split_once(':') {
                    status.length = total
                        .parse::<u64>()
                        .ok()
                        .filter(|secs| *secs > 0)
                        .map(Duration::from_secs);
                }
            }
            _ => {}
        }
    }
    status
}

fn poll_status(
    link: &Link,
    cache: &Mutex<StatusCache>,
    cancel: &AtomicBool,
    interval: Duration,
    on_end: EndOfStream,
) {
    let mut reported_failure = false;

    loop {
        thread::park_timeout(interval);
        if cancel.load(Ordering::SeqCst) {
            return;
        }

        let pairs = match link.call("status") {
            Ok(Reply::Ok(pairs)) => pairs,
            Ok(Reply::Ack(msg)) => {
                log::warn!("rondo: daemon rejected status: {}", msg);
                continue;
            }
            Err(e) => {
                if !reported_failure {
                    log::warn!("rondo: status poll failed: {}", e);
                    reported_failure = true;
                }
                continue;
            }
        };
        reported_failure = false;
        let status = parse_status(&pairs);

        {
            let mut cache = cache.lock();
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            if status.state == "stop" {
                *cache = StatusCache::default();
            } else {
                cache.elapsed = status.elapsed;
                if status.length.is_some() {
                    cache.length = status.length;
                }
                continue;
            }
        }

        log::debug!("rondo: daemon reports stopped");
        on_end();
        return;
    }
}

// ---------------------------------------------------------------------------
// Control connection
// ---------------------------------------------------------------------------

struct Link {
    address: String,
    conn: Mutex<Option<Connection>>,
}

impl Link {
    fn new(address: String) -> Self {
        Self {
            address,
            conn: Mutex::new(None),
        }
    }

    /// Send one command. On an I/O failure the connection is dropped,
    /// reopened, and the command retried once.
    fn call(&self, command: &str) -> PlayerResult<Reply> {
        let mut conn = self.conn.lock();
        let mut last_err = String::new();

        for attempt in 0..2 {
            if conn.is_none() {
                match Connection::open(&self.address) {
                    Ok(c) => *conn = Some(c),
                    Err(e) => {
                        last_err = e.to_string();
                        continue;
                    }
                }
            }
            let Some(c) = conn.as_mut() else { continue };
            match c.command(command) {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    if attempt == 0 {
                        log::info!("rondo: daemon link lost ({}), reconnecting", e);
                    }
                    last_err = e.to_string();
                    *conn = None;
                }
            }
        }

        Err(PlayerError::Connection(format!("{}: {}", self.address, last_err)))
    }
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Connection {
    fn open(address: &str) -> std::io::Result<Self> {
        let addr = address.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "address did not resolve")
        })?;
        let stream = TcpStream::connect_timeout(&addr, IO_TIMEOUT)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        let mut conn = Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        };
        let greeting = conn.read_line()?;
        if !greeting.starts_with("OK MPD") {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unexpected greeting: {}", greeting),
            ));
        }
        Ok(conn)
    }

    fn read_line(&mut self) -> std::io::Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn command(&mut self, command: &str) -> std::io::Result<Reply> {
        self.writer.write_all(command.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        let mut pairs = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == "OK" {
                return Ok(Reply::Ok(pairs));
            }
            if let Some(ack) = line.strip_prefix("ACK ") {
                return Ok(Reply::Ack(ack.to_string()));
            }
            if let Some((key, value)) = line.split_once(": ") {
                pairs.push((key.to_string(), value.to_string()));
            }
        }
    }
}

/// Quote an argument for the daemon's command line.
fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
