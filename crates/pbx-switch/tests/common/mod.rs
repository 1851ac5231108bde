//! Test harness: a real exchange on an ephemeral localhost port plus a
//! line-oriented client for driving scenarios over TCP.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use pbx_switch::{Pbx, serve_on};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE_WINDOW: Duration = Duration::from_millis(200);

/// A running exchange bound to an ephemeral localhost port.
pub struct TestExchange {
    pub pbx: Arc<Pbx>,
    pub port: u16,
    shutting_down: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl TestExchange {
    pub fn start(max_extensions: usize) -> TestExchange {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
        let port = listener.local_addr().expect("listener local addr").port();
        let pbx = Arc::new(Pbx::new(max_extensions));
        let shutting_down = Arc::new(AtomicBool::new(false));

        let acceptor = {
            let pbx = Arc::clone(&pbx);
            let flag = Arc::clone(&shutting_down);
            thread::Builder::new()
                .name("pbx-acceptor".to_string())
                .spawn(move || serve_on(listener, pbx, flag).expect("serve_on failed"))
                .expect("spawn acceptor thread")
        };

        TestExchange {
            pbx,
            port,
            shutting_down,
            acceptor: Some(acceptor),
        }
    }

    pub fn connect(&self) -> TestClient {
        TestClient::connect(self.port)
    }

    /// Trigger the graceful shutdown path and wait for quiescence.
    pub fn shutdown(&mut self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(handle) = self.acceptor.take() {
            handle.join().expect("acceptor thread panicked");
        }
    }
}

impl Drop for TestExchange {
    fn drop(&mut self) {
        // Let a leaked acceptor wind down even if the test never shut down
        self.shutting_down.store(true, Ordering::SeqCst);
    }
}

/// One client connection speaking the wire protocol.
pub struct TestClient {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl TestClient {
    pub fn connect(port: u16) -> TestClient {
        let stream = TcpStream::connect(("127.0.0.1", port)).expect("connect to exchange");
        stream
            .set_read_timeout(Some(RECV_TIMEOUT))
            .expect("set read timeout");
        let reader = BufReader::new(stream.try_clone().expect("clone client stream"));
        TestClient { stream, reader }
    }

    /// Send one CRLF-terminated command line.
    pub fn send(&mut self, line: &str) {
        self.stream
            .write_all(format!("{}\r\n", line).as_bytes())
            .expect("send command");
        self.stream.flush().expect("flush command");
    }

    /// Receive one notification line, stripped of its trailing LF.
    pub fn recv(&mut self) -> String {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).expect("read notification");
        assert!(n > 0, "connection closed while expecting a notification");
        line.trim_end_matches('\n').to_string()
    }

    /// Assert that nothing arrives within a short window.
    pub fn expect_silence(&mut self) {
        self.stream
            .set_read_timeout(Some(SILENCE_WINDOW))
            .expect("set silence timeout");
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => panic!("connection closed while expecting silence"),
            Ok(_) => panic!("unexpected notification: {:?}", line),
            Err(e) => assert!(
                matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
                "unexpected read error: {}",
                e
            ),
        }
        self.stream
            .set_read_timeout(Some(RECV_TIMEOUT))
            .expect("restore read timeout");
    }

    /// Drain the connection until the server closes it.
    pub fn expect_eof(&mut self) {
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => return,
                // Shutdown-path notifications may or may not get through
                Ok(_) => continue,
                Err(e) if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::BrokenPipe) => return,
                Err(e) => panic!("unexpected read error while draining: {}", e),
            }
        }
    }
}
