#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modbus_client::ClientConfig;
use register_catalog::encode_f32;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// How the fake meter answers the next request.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Registers,
    Exception(u8),
    Silence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Request {
        transaction: u16,
        unit: u8,
        function: u8,
        address: u16,
        count: u16,
    },
    Response {
        transaction: u16,
    },
    /// Another request arrived before the previous one was answered.
    Overlap {
        transaction: u16,
    },
}

/// A Modbus TCP meter speaking raw MBAP frames, so tests can see the wire.
#[derive(Clone, Default)]
pub struct ScriptedMeter {
    registers: Arc<Mutex<HashMap<u16, u16>>>,
    script: Arc<Mutex<VecDeque<Reply>>>,
    events: Arc<Mutex<Vec<WireEvent>>>,
    response_delay: Arc<Mutex<Duration>>,
    connections: Arc<AtomicU32>,
    disconnects: Arc<AtomicU32>,
}

impl ScriptedMeter {
    pub async fn start() -> (Self, SocketAddr) {
        let meter = Self::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = meter.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                server.connections.fetch_add(1, Ordering::Relaxed);
                let connection = server.clone();
                tokio::spawn(async move {
                    let _ = connection.serve(stream).await;
                    connection.disconnects.fetch_add(1, Ordering::Relaxed);
                });
            }
        });

        (meter, addr)
    }

    /// Stores `value` the way the Emonio does: low-order register first.
    pub fn set_float(&self, address: u16, value: f32) {
        self.set_registers(address, &encode_f32(value, true));
    }

    pub fn set_registers(&self, address: u16, words: &[u16]) {
        let mut registers = self.registers.lock().unwrap();
        for (offset, word) in words.iter().enumerate() {
            registers.insert(address + offset as u16, *word);
        }
    }

    pub fn push_reply(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.lock().unwrap() = delay;
    }

    pub fn events(&self) -> Vec<WireEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn connections(&self) -> u32 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Connections the client has closed, seen as EOF on the meter side.
    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::Relaxed)
    }

    /// Waits up to one second for `count` closed connections.
    pub async fn wait_for_disconnects(&self, count: u32) -> u32 {
        for _ in 0..100 {
            if self.disconnects() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.disconnects()
    }

    fn record(&self, event: WireEvent) {
        self.events.lock().unwrap().push(event);
    }

    async fn serve(&self, mut stream: TcpStream) -> std::io::Result<()> {
        loop {
            let mut header = [0u8; 7];
            stream.read_exact(&mut header).await?;
            let transaction = u16::from_be_bytes([header[0], header[1]]);
            let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
            let unit = header[6];

            let mut pdu = vec![0u8; length.saturating_sub(1)];
            stream.read_exact(&mut pdu).await?;
            let function = pdu[0];
            let address = u16::from_be_bytes([pdu[1], pdu[2]]);
            let count = u16::from_be_bytes([pdu[3], pdu[4]]);
            self.record(WireEvent::Request {
                transaction,
                unit,
                function,
                address,
                count,
            });

            let delay = *self.response_delay.lock().unwrap();
            if !delay.is_zero() {
                let mut peeked = [0u8; 1];
                if let Ok(Ok(read)) = tokio::time::timeout(delay, stream.peek(&mut peeked)).await {
                    if read > 0 {
                        self.record(WireEvent::Overlap { transaction });
                    }
                }
            }

            let reply = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Reply::Registers);
            let body = match reply {
                Reply::Silence => continue,
                Reply::Exception(code) => vec![function | 0x80, code],
                Reply::Registers => self.register_body(function, address, count),
            };

            let mut frame = Vec::with_capacity(7 + body.len());
            frame.extend_from_slice(&transaction.to_be_bytes());
            frame.extend_from_slice(&[0, 0]);
            frame.extend_from_slice(&((body.len() + 1) as u16).to_be_bytes());
            frame.push(unit);
            frame.extend_from_slice(&body);
            stream.write_all(&frame).await?;
            self.record(WireEvent::Response { transaction });
        }
    }

    fn register_body(&self, function: u8, address: u16, count: u16) -> Vec<u8> {
        let registers = self.registers.lock().unwrap();
        let mut body = vec![function, (count * 2) as u8];
        for offset in 0..count {
            let word = registers.get(&(address + offset)).copied().unwrap_or(0);
            body.extend_from_slice(&word.to_be_bytes());
        }
        body
    }
}

pub fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        request_timeout_ms: 250,
        connect_timeout_ms: 250,
        ..ClientConfig::default()
    }
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
