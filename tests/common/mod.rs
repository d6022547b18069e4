//! Scripted Horizons telnet service for integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use sbspk::Config;

pub const EMAIL: &str = "observer@example.org";

const IAC: u8 = 255;
const DO: u8 = 253;
const ECHO: u8 = 1;

/// One step of a scripted conversation
#[derive(Debug, Clone)]
pub enum Step {
    /// Bytes written to the client as they are
    Send(Vec<u8>),
    /// Kernel bytes; IAC is doubled on the wire
    Payload(Vec<u8>),
    /// The next line the client must write, without CR LF
    ExpectLine(String),
    /// Hang up
    Close,
}

pub fn send(text: impl AsRef<[u8]>) -> Step {
    Step::Send(text.as_ref().to_vec())
}

pub fn expect(line: &str) -> Step {
    Step::ExpectLine(line.to_string())
}

/// Serves one script per accepted connection, in order
pub struct MockHorizons {
    port: u16,
    received: Arc<Mutex<Vec<String>>>,
    _server: JoinHandle<()>,
}

impl MockHorizons {
    pub async fn start(scripts: Vec<Vec<Step>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);

        let server = tokio::spawn(async move {
            for script in scripts {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                // Sequential: the next client waits until this conversation ends
                serve(socket, script, Arc::clone(&log)).await;
            }
        });

        Self {
            port,
            received,
            _server: server,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Every line received so far, across connections
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Configuration pointing at this service
    pub fn config(&self, output_dir: &Path) -> Config {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = self.port;
        config.server.connect_timeout = Duration::from_secs(2);
        config.session.email = EMAIL.to_string();
        config.session.start_date = "2020-01-01".to_string();
        config.session.stop_date = "2020-02-01".to_string();
        config.session.timeout = Duration::from_secs(2);
        config.output_dir = output_dir.to_path_buf();
        config
    }
}

async fn serve(socket: TcpStream, script: Vec<Step>, log: Arc<Mutex<Vec<String>>>) {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    if writer.write_all(&[IAC, DO, ECHO]).await.is_err() {
        return;
    }

    for step in script {
        match step {
            Step::Send(bytes) => {
                if writer.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            Step::Payload(bytes) => {
                if writer.write_all(&escape(&bytes)).await.is_err() {
                    return;
                }
            }
            Step::ExpectLine(expected) => {
                let mut raw = Vec::new();
                match reader.read_until(b'\n', &mut raw).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
                let line = String::from_utf8_lossy(&strip_negotiation(&raw))
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                log.lock().unwrap().push(line.clone());
                if line != expected {
                    // Wrong answer: go silent so the client times out
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    return;
                }
            }
            Step::Close => break,
        }
    }
    writer.shutdown().await.ok();
}

fn escape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &byte in bytes {
        out.push(byte);
        if byte == IAC {
            out.push(IAC);
        }
    }
    out
}

/// Drop the client's three-byte option replies
fn strip_negotiation(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == IAC {
            i += 3;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

pub const BANNER: &str = "\r\n*******************************************************************************\r\n JPL/HORIZONS                      433 Eros (A898 PA)             2024-Jan-10 12:00:00\r\n Rec #:     433 (+COV) Soln.date: 2021-Oct-14_07:54:07   # obs: 9130 (1893-2021)\r\n*******************************************************************************\r\n";

pub const CANDIDATES: &str = "\r\n Matching small-bodies:\r\n\r\n    Record #  Epoch-yr  >MATCH DESIG<  Primary Desig  Name\r\n    --------  --------  -------------  -------------  -------------------------\r\n     2000001            A899 OF        A899 OF        Ceres\r\n     2000002            A802 FA        A802 FA        Pallas\r\n\r\n (2 matches. To SELECT, enter record # (integer), followed by semi-colon.)\r\n";

/// Main menu and paging, then `search`, then the kernel options up to the
/// transfer announcement, then `transfer`
pub fn negotiation(object: &str, search: Vec<Step>, transfer: Vec<Step>) -> Vec<Step> {
    let mut steps = vec![
        send("\r\n Welcome to JPL Horizons\r\n\r\nHorizons> "),
        expect("PAGE"),
        send("\r\n PAGING toggled OFF\r\n\r\nHorizons> "),
        expect(object),
    ];
    steps.extend(search);
    steps.extend([
        send(BANNER),
        send(" Select ... [A]gain, [N]ew-case, [F]tp, [K]ermit, [S]PK, [E]phemeris ?, <cr>: "),
        expect("s"),
        send("\r\n Unique SPK object ID: 2000433\r\n\r\n Enter your Internet e-mail address [?]: "),
        expect(EMAIL),
        send("\r\n Confirm e-mail address [Yes<cr>, No] : "),
        expect("yes"),
        send("\r\n Set SPK text transfer format [YES, NO, ?] : "),
        expect("NO"),
        send("\r\n Enter SPK object START [ yyyy-mm-dd ] : "),
        expect("2020-01-01"),
        send("\r\n Enter SPK object STOP [ yyyy-mm-dd ] : "),
        expect("2020-02-01"),
        send("\r\n Add more objects to file [YES, NO, ?] : "),
        expect("no"),
    ]);
    steps.extend(transfer);
    steps
}

pub fn byte_count_transfer(payload: &[u8]) -> Vec<Step> {
    vec![
        send(format!("\r\n SPK binary transfer: {} bytes\r\n", payload.len())),
        Step::Payload(payload.to_vec()),
        Step::Close,
    ]
}

/// A kernel-sized payload that includes IAC bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..=255u8).cycle().take(len).collect()
}
