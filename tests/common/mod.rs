//! In-process simulated Modbus TCP slave for integration scenarios.
//!
//! Listens on an ephemeral local port and serves a small register/coil
//! store. Supports the eight standard functions plus two scripted
//! behaviors used by the tests: answering busy for the next N requests,
//! and rejecting addresses at or above [`SimulatedSlave::ILLEGAL_BASE`]
//! with IllegalDataAddress.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Store {
    coils: HashMap<u16, bool>,
    discrete_inputs: HashMap<u16, bool>,
    holding: HashMap<u16, u16>,
    input: HashMap<u16, u16>,
}

pub struct SimulatedSlave {
    addr: SocketAddr,
    store: Arc<RwLock<Store>>,
    busy_responses: Arc<AtomicU32>,
    accept_task: JoinHandle<()>,
}

impl SimulatedSlave {
    /// Addresses from here up answer IllegalDataAddress.
    pub const ILLEGAL_BASE: u16 = 60000;

    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(RwLock::new(Store::default()));
        let busy_responses = Arc::new(AtomicU32::new(0));

        let task_store = store.clone();
        let task_busy = busy_responses.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let store = task_store.clone();
                let busy = task_busy.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(stream, store, busy).await;
                });
            }
        });

        Self {
            addr,
            store,
            busy_responses,
            accept_task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Answer the next `count` requests with a SlaveDeviceBusy exception.
    pub fn set_busy_responses(&self, count: u32) {
        self.busy_responses.store(count, Ordering::SeqCst);
    }

    pub async fn set_holding(&self, address: u16, value: u16) {
        self.store.write().await.holding.insert(address, value);
    }

    pub async fn holding(&self, address: u16) -> u16 {
        self.store
            .read()
            .await
            .holding
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    pub async fn set_input(&self, address: u16, value: u16) {
        self.store.write().await.input.insert(address, value);
    }

    pub async fn set_coil(&self, address: u16, value: bool) {
        self.store.write().await.coils.insert(address, value);
    }

    pub async fn coil(&self, address: u16) -> bool {
        self.store
            .read()
            .await
            .coils
            .get(&address)
            .copied()
            .unwrap_or(false)
    }

    pub async fn set_discrete_input(&self, address: u16, value: bool) {
        self.store
            .write()
            .await
            .discrete_inputs
            .insert(address, value);
    }
}

impl Drop for SimulatedSlave {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    store: Arc<RwLock<Store>>,
    busy: Arc<AtomicU32>,
) -> std::io::Result<()> {
    loop {
        let mut header = [0u8; 7];
        if stream.read_exact(&mut header).await.is_err() {
            return Ok(());
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; length.saturating_sub(1)];
        stream.read_exact(&mut pdu).await?;

        let unit = header[6];
        if pdu.is_empty() {
            return Ok(());
        }
        log::debug!("slave request: unit={} pdu={:02X?}", unit, pdu);
        let response_pdu = if busy
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            vec![pdu[0] | 0x80, 0x06]
        } else {
            handle_pdu(&pdu, &store).await
        };

        let mut frame = Vec::with_capacity(7 + response_pdu.len());
        frame.extend_from_slice(&header[0..4]);
        frame.extend_from_slice(&((response_pdu.len() + 1) as u16).to_be_bytes());
        frame.push(unit);
        frame.extend_from_slice(&response_pdu);
        stream.write_all(&frame).await?;
    }
}

fn exception(function: u8, code: u8) -> Vec<u8> {
    vec![function | 0x80, code]
}

async fn handle_pdu(pdu: &[u8], store: &Arc<RwLock<Store>>) -> Vec<u8> {
    if pdu.is_empty() {
        return Vec::new();
    }
    let function = pdu[0];
    if pdu.len() < 5 {
        return exception(function, 0x03);
    }
    let address = u16::from_be_bytes([pdu[1], pdu[2]]);

    if address >= SimulatedSlave::ILLEGAL_BASE {
        return exception(function, 0x02);
    }

    match function {
        // Bit reads.
        0x01 | 0x02 => {
            let quantity = u16::from_be_bytes([pdu[3], pdu[4]]);
            if quantity == 0 || quantity > 2000 {
                return exception(function, 0x03);
            }
            let store = store.read().await;
            let table = if function == 0x01 {
                &store.coils
            } else {
                &store.discrete_inputs
            };
            let mut bytes = vec![0u8; (quantity as usize + 7) / 8];
            for i in 0..quantity {
                if table.get(&(address + i)).copied().unwrap_or(false) {
                    bytes[i as usize / 8] |= 1 << (i % 8);
                }
            }
            let mut out = vec![function, bytes.len() as u8];
            out.extend_from_slice(&bytes);
            out
        }
        // Register reads.
        0x03 | 0x04 => {
            let quantity = u16::from_be_bytes([pdu[3], pdu[4]]);
            if quantity == 0 || quantity > 125 {
                return exception(function, 0x03);
            }
            let store = store.read().await;
            let table = if function == 0x03 {
                &store.holding
            } else {
                &store.input
            };
            let mut out = vec![function, (quantity * 2) as u8];
            for i in 0..quantity {
                let value = table.get(&(address + i)).copied().unwrap_or(0);
                out.extend_from_slice(&value.to_be_bytes());
            }
            out
        }
        0x05 => {
            let value = u16::from_be_bytes([pdu[3], pdu[4]]);
            if value != 0x0000 && value != 0xFF00 {
                return exception(function, 0x03);
            }
            store
                .write()
                .await
                .coils
                .insert(address, value == 0xFF00);
            pdu.to_vec()
        }
        0x06 => {
            let value = u16::from_be_bytes([pdu[3], pdu[4]]);
            store.write().await.holding.insert(address, value);
            pdu.to_vec()
        }
        0x0F => {
            let quantity = u16::from_be_bytes([pdu[3], pdu[4]]);
            if pdu.len() < 6 || quantity == 0 || quantity > 1968 {
                return exception(function, 0x03);
            }
            let data = &pdu[6..];
            let mut store = store.write().await;
            for i in 0..quantity as usize {
                if i / 8 >= data.len() {
                    return exception(function, 0x03);
                }
                let bit = (data[i / 8] >> (i % 8)) & 1 != 0;
                store.coils.insert(address + i as u16, bit);
            }
            let mut out = vec![function];
            out.extend_from_slice(&pdu[1..5]);
            out
        }
        0x10 => {
            let quantity = u16::from_be_bytes([pdu[3], pdu[4]]);
            if pdu.len() < 6 || quantity == 0 || quantity > 123 {
                return exception(function, 0x03);
            }
            let data = &pdu[6..];
            if data.len() < quantity as usize * 2 {
                return exception(function, 0x03);
            }
            let mut store = store.write().await;
            for i in 0..quantity as usize {
                let value = u16::from_be_bytes([data[i * 2], data[i * 2 + 1]]);
                store.holding.insert(address + i as u16, value);
            }
            let mut out = vec![function];
            out.extend_from_slice(&pdu[1..5]);
            out
        }
        _ => exception(function, 0x01),
    }
}

/// Initialize test logging once; safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
