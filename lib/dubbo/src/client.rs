//! Pipelined bench client: one non-blocking connection, `pipe_n` requests
//! kept in flight, `req_n` requests total, driven by a single-threaded
//! readiness loop. Reconnects on any transport failure and keeps going until
//! the request budget is spent or a stop is signalled.

use crate::buffer::Buffer;
use crate::codec::{self, CodecStyle, Request, Response};
use crate::frame;
use crate::logging;
use crate::shared::{resolve_addr, ErrorType, ErrorUtils, NetworkError, NetworkResult};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const BUF_INIT_SIZE: usize = 1024;
const CONN: Token = Token(0);

// Upper bound on a single poll wait, so stop signals and deadlines are
// noticed promptly.
const TICK: Duration = Duration::from_millis(100);

const PROGRESS_EVERY: usize = 1000;

/// Invocation target and call shape, shared by the sync and bench paths.
pub struct InvokeArgs {
    pub host: String,
    pub port: u16,
    pub service: String,
    pub method: String,
    pub json_args: String,
    pub json_attach: String,
    pub timeout: Duration,
    pub style: CodecStyle,
}

/// Bench-mode knobs.
pub struct BenchArgs {
    /// Pipeline window: maximum requests in flight.
    pub pipe_n: usize,
    /// Total request budget.
    pub req_n: usize,
    /// Print every request and response.
    pub verbose: bool,
}

/// End-of-run accounting.
#[derive(Debug)]
pub struct Summary {
    pub elapsed: Duration,
    pub reqs: usize,
    pub ok_n: usize,
    pub ko_n: usize,
}

impl Summary {
    pub fn qps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs < 0.001 {
            0.0
        } else {
            self.reqs as f64 / secs
        }
    }

    /// The bold-green end-of-run line, on stderr.
    pub fn print(&self) {
        eprintln!(
            "\x1b[1;32m[SUMMARY]\x1b[0m COST {:.2}s, REQ {}, SUCC {}, FAIL {}, QPS {:.0}",
            self.elapsed.as_secs_f64(),
            self.reqs,
            self.ok_n,
            self.ko_n,
            self.qps()
        );
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum State {
    Disconnected,
    Connecting,
    Connected,
}

pub struct Client {
    args: InvokeArgs,
    addr: SocketAddr,

    poll: Poll,
    events: Events,
    stream: Option<TcpStream>,
    state: State,
    // Armed while connecting, and while waiting to retry a failed connect.
    deadline: Option<Instant>,

    rcv_buf: Buffer,
    snd_buf: Buffer,

    req_n: usize,
    req_left: usize,
    ok_n: usize,
    ko_n: usize,
    pipe_n: usize,
    pipe_left: usize,

    verbose: bool,
    start: Instant,

    log: logging::Logger,
}

impl Client {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        args: InvokeArgs,
        bench: BenchArgs,
        log: L,
    ) -> NetworkResult<Client> {
        let log = match log.into() {
            Some(log) => log.new(logging::o!()),
            None => logging::Logger::root(logging::Discard, logging::o!()),
        };

        let addr = resolve_addr(&args.host, args.port)?;

        // The window never needs to exceed the total budget.
        let pipe_n = bench.pipe_n.min(bench.req_n);

        Ok(Client {
            args,
            addr,
            poll: Poll::new().map_err(NetworkError::from)?,
            events: Events::with_capacity(1024),
            stream: None,
            state: State::Disconnected,
            deadline: None,
            rcv_buf: Buffer::new(BUF_INIT_SIZE),
            snd_buf: Buffer::new(BUF_INIT_SIZE),
            req_n: bench.req_n,
            req_left: bench.req_n,
            ok_n: 0,
            ko_n: 0,
            pipe_n,
            pipe_left: pipe_n,
            verbose: bench.verbose,
            start: Instant::now(),
            log,
        })
    }

    /// Drives the bench until the request budget is spent or `stop` is set,
    /// then tears the connection down and returns the summary.
    pub fn run(&mut self, stop: &AtomicBool) -> NetworkResult<Summary> {
        self.start = Instant::now();
        self.connect()?;

        while self.req_left > 0 && !stop.load(Ordering::Relaxed) {
            let timeout = match self.deadline {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(TICK),
                None => TICK,
            };

            if let Err(err) = self.poll.poll(&mut self.events, Some(timeout)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            let mut readable = false;
            let mut writable = false;
            for event in self.events.iter() {
                if event.token() == CONN {
                    // A peer close surfaces as read-closed; route it through
                    // the read path so it is handled like a zero-byte read.
                    readable |= event.is_readable() || event.is_read_closed();
                    writable |= event.is_writable();
                }
            }

            match self.state {
                State::Connecting => {
                    if writable {
                        self.on_connect_ready();
                    } else if self.deadline_passed() {
                        logging::error!(self.log, "connect timed out"; "peer" => %self.addr);
                        self.reconnect();
                    }
                }
                State::Connected => {
                    if readable {
                        self.on_readable();
                    }
                    if writable && self.state == State::Connected {
                        self.on_writable();
                    }
                }
                State::Disconnected => {
                    // A previous connect attempt failed outright; retry once
                    // the backoff deadline passes.
                    if self.deadline_passed() {
                        self.reconnect();
                    }
                }
            }
        }

        Ok(self.finish())
    }

    fn deadline_passed(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Starts a non-blocking connect and arms the connect deadline. Success
    /// is confirmed by the first writable readiness event.
    fn connect(&mut self) -> NetworkResult<()> {
        let mut stream = TcpStream::connect(self.addr).map_err(NetworkError::from)?;
        stream.set_nodelay(true).map_err(NetworkError::from)?;

        self.poll
            .registry()
            .register(&mut stream, CONN, Interest::READABLE | Interest::WRITABLE)
            .map_err(NetworkError::from)?;

        self.stream = Some(stream);
        self.state = State::Connecting;
        self.deadline = Some(Instant::now() + self.args.timeout);

        logging::debug!(self.log, "connecting"; "peer" => %self.addr);
        Ok(())
    }

    /// First writable readiness on a connecting socket: either the connect
    /// finished, failed, or the event was spurious.
    fn on_connect_ready(&mut self) {
        let stream = self
            .stream
            .as_ref()
            .expect("Connecting state requires a stream");

        match stream.take_error() {
            Ok(None) => match stream.peer_addr() {
                Ok(_) => self.on_connected(),
                Err(ref err) if err.kind() == io::ErrorKind::NotConnected => {
                    // Not actually established yet; keep waiting.
                }
                Err(err) => {
                    logging::error!(self.log, "connect failed"; "err" => %err);
                    self.reconnect();
                }
            },
            Ok(Some(err)) | Err(err) => {
                logging::error!(self.log, "connect failed"; "err" => %err);
                self.reconnect();
            }
        }
    }

    fn on_connected(&mut self) {
        self.state = State::Connected;
        self.deadline = None;
        logging::debug!(self.log, "connected"; "peer" => %self.addr);

        self.pipe_send();
    }

    /// Readable readiness: drain the socket, then account every complete
    /// frame that landed in the receive buffer.
    fn on_readable(&mut self) {
        match self.receive() {
            Ok(_) => self.process_frames(),
            Err(err) => {
                logging::error!(self.log, "read failed"; "err" => ?err);
                self.reconnect();
            }
        }
    }

    /// Writable readiness: flush whatever is left in the send buffer.
    fn on_writable(&mut self) {
        if self.flush().has_failed() {
            self.reconnect();
        }
    }

    /// Reads until the socket would block. Zero bytes means the server went
    /// away.
    fn receive(&mut self) -> NetworkResult<usize> {
        let mut total = 0;

        loop {
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return Err(NetworkError::Fatal(ErrorType::Disconnected)),
            };

            match self.rcv_buf.read_from(stream) {
                Ok(0) => return Err(NetworkError::Fatal(ErrorType::Disconnected)),
                Ok(n) => total += n,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
        }

        logging::trace!(self.log, "received"; "bytes" => total);
        Ok(total)
    }

    /// Writes the send buffer out until empty or the socket would block.
    /// `Wait` is not a failure; the next writable event resumes the drain.
    fn flush(&mut self) -> NetworkResult<usize> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(NetworkError::Fatal(ErrorType::Disconnected)),
        };

        let mut sent = 0;
        while self.snd_buf.readable() > 0 {
            match stream.write(self.snd_buf.peek()) {
                Ok(0) => return Err(NetworkError::Fatal(ErrorType::Disconnected)),
                Ok(n) => {
                    self.snd_buf.retrieve(n);
                    sent += n;
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Ok(sent)
    }

    /// Accounts every complete frame currently buffered: frees the pipeline
    /// slot, updates the counters and tops the window back up.
    fn process_frames(&mut self) {
        while self.req_left > 0 {
            if self.rcv_buf.readable() < frame::HEADER_SIZE {
                return;
            }

            match frame::remaining(&self.rcv_buf) {
                Ok(0) => {}
                Ok(_) => return,
                Err(err) => {
                    logging::error!(self.log, "malformed frame"; "err" => ?err);
                    self.reconnect();
                    return;
                }
            }

            self.pipe_left += 1;
            self.req_left -= 1;

            let completed = self.req_n - self.req_left;
            if completed % PROGRESS_EVERY == 0 {
                logging::info!(self.log, "progress"; "completed" => completed);
            }

            match codec::decode_response(&mut self.rcv_buf, self.args.style) {
                Ok(res) => {
                    if res.ok {
                        self.ok_n += 1;
                    } else {
                        self.ko_n += 1;
                    }

                    if self.verbose {
                        print_response(&res);
                    }

                    if self.req_left == 0 {
                        return;
                    }

                    self.pipe_send();
                    if self.state != State::Connected {
                        return;
                    }
                }
                Err(err) => {
                    self.ko_n += 1;
                    logging::error!(self.log, "failed to decode response"; "err" => ?err);
                    self.reconnect();
                    return;
                }
            }
        }
    }

    /// Tops the pipeline up to the window, while the remaining budget has
    /// room for more in-flight requests.
    fn pipe_send(&mut self) {
        while self.pipe_left > 0 {
            let outstanding = self.pipe_n - self.pipe_left;
            if self.req_left <= outstanding {
                return;
            }

            if !self.send_req() {
                return;
            }
            self.pipe_left -= 1;
        }
    }

    /// Encodes one request onto the send buffer and starts draining it.
    /// Returns false if the connection had to be torn down.
    fn send_req(&mut self) -> bool {
        let req = Request::new(
            &self.args.service,
            &self.args.method,
            &self.args.json_args,
            Some(&self.args.json_attach),
        )
        .expect("Arguments were validated up front")
        .with_style(self.args.style);

        if self.verbose {
            println!("<req>[seq={}]", req.reqid());
        }

        let buf = req.encode().expect("Arguments were validated up front");
        self.snd_buf.append(buf.peek());

        if self.flush().has_failed() {
            self.reconnect();
            return false;
        }
        true
    }

    /// Drops the connection and resets all per-connection state. The request
    /// budget survives; in-flight requests are re-sent on the next
    /// connection.
    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            drop(self.poll.registry().deregister(&mut stream));
        }

        self.state = State::Disconnected;
        self.deadline = None;
        self.rcv_buf.retrieve_all();
        self.snd_buf.retrieve_all();
        self.pipe_left = self.pipe_n;
    }

    fn reconnect(&mut self) {
        self.close();
        logging::info!(self.log, "reconnecting"; "peer" => %self.addr);

        if let Err(err) = self.connect() {
            logging::error!(self.log, "reconnect failed"; "err" => ?err);
            // Try again after a timeout's worth of backoff.
            self.deadline = Some(Instant::now() + self.args.timeout);
        }
    }

    fn finish(&mut self) -> Summary {
        self.close();

        Summary {
            elapsed: self.start.elapsed(),
            reqs: self.req_n - self.req_left,
            ok_n: self.ok_n,
            ko_n: self.ko_n,
        }
    }
}

fn print_response(res: &Response) {
    if res.is_event {
        println!("<res seq={}> [EVT]", res.reqid);
    } else if res.data.is_some() {
        if res.ok {
            println!(
                "<res seq={}> [\x1b[1;32mSUCC\x1b[0m] {}",
                res.reqid,
                res.render_data()
            );
        } else {
            println!(
                "<res seq={}> [\x1b[1;31mFAIL\x1b[0m] [\x1b[1;31m{}\x1b[0m] {}",
                res.reqid,
                res.desc,
                res.render_data()
            );
        }
    } else {
        println!("<res seq={}> [\x1b[1;32mSUCC\x1b[0m] NULL", res.reqid);
    }
}
