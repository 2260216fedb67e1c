//! Transaction manager: pairs each request with its response.
//!
//! One transaction at a time per connection. The transport and framing
//! state sit behind a `tokio::sync::Mutex`, so concurrent callers queue
//! instead of interleaving frames on the wire. A per-call deadline covers
//! the send and every receive attempt of one exchange.
//!
//! TCP responses are matched by transaction id; a stale id is logged and
//! discarded, and the wait continues until the deadline. RTU has no id,
//! so the lock's strict turn-taking is the matching mechanism; a frame
//! from an unexpected slave is a protocol error.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{ModbusError, ModbusResult};
use crate::frame::{self, Framing};
use crate::protocol::{ModbusRequest, ModbusResponse};
use crate::settings::RetryPolicy;
use crate::transport::{ModbusTransport, TransportStats};

struct Inner<T> {
    transport: T,
    framing: Framing,
}

/// Serialized request/response engine over a transport.
pub struct Transaction<T: ModbusTransport> {
    inner: Mutex<Inner<T>>,
    /// Deadline for one full exchange, `None` = wait forever.
    response_timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl<T: ModbusTransport> Transaction<T> {
    pub fn new(
        transport: T,
        framing: Framing,
        response_timeout: Option<Duration>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner { transport, framing }),
            response_timeout,
            retry,
        }
    }

    pub async fn connect(&self) -> ModbusResult<bool> {
        self.inner.lock().await.transport.connect().await
    }

    pub async fn disconnect(&self) -> ModbusResult<()> {
        self.inner.lock().await.transport.disconnect().await
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.transport.is_connected()
    }

    pub async fn stats(&self) -> TransportStats {
        self.inner.lock().await.transport.stats()
    }

    /// Execute one request, retrying on `SlaveDeviceBusy` per the retry
    /// policy. Every other failure surfaces on the first occurrence.
    pub async fn execute(&self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        request.validate()?;

        let mut attempts_left = self.retry.retries;
        loop {
            match self.execute_once(request).await {
                Err(ModbusError::Exception { code: 0x06, .. }) if attempts_left > 0 => {
                    warn!(
                        slave_id = request.slave_id,
                        attempts_left, "slave busy, retrying"
                    );
                    attempts_left -= 1;
                    tokio::time::sleep(self.retry.delay()).await;
                }
                other => return other,
            }
        }
    }

    async fn execute_once(&self, request: &ModbusRequest) -> ModbusResult<ModbusResponse> {
        let mut inner = self.inner.lock().await;
        let deadline = self.response_timeout.map(|t| Instant::now() + t);

        let tid = inner.framing.next_tid();
        let frame = match inner.framing {
            Framing::Rtu => frame::rtu::encode_request(request)?,
            Framing::Tcp { .. } => frame::tcp::encode_request(tid, request)?,
        };
        inner.transport.send(&frame).await?;

        let response = loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(ModbusError::timeout(
                            "awaiting matching response",
                            self.response_timeout
                                .map(|t| t.as_millis() as u64)
                                .unwrap_or(0),
                        ));
                    }
                    Some(left)
                }
                None => None,
            };

            let raw = inner.transport.receive(remaining).await?;

            match inner.framing {
                Framing::Rtu => {
                    let response = frame::rtu::decode_response(&raw, request.function)?;
                    if response.slave_id != request.slave_id {
                        return Err(ModbusError::protocol(format!(
                            "response from slave {} while awaiting slave {}",
                            response.slave_id, request.slave_id
                        )));
                    }
                    break response;
                }
                Framing::Tcp { .. } => {
                    let (response_tid, response) =
                        frame::tcp::decode_response(&raw, request.function)?;
                    if response_tid != tid {
                        warn!(
                            expected = tid,
                            received = response_tid,
                            "discarding response with stale transaction id"
                        );
                        continue;
                    }
                    break response;
                }
            }
        };

        if let Some(exception) = response.exception {
            return Err(ModbusError::exception(
                request.function.to_u8(),
                exception.to_u8(),
            ));
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::crc16;
    use crate::protocol::ModbusFunction;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Scripted transport: records sends, replays queued receive frames.
    struct MockTransport {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Vec<u8>>,
        connected: bool,
    }

    impl MockTransport {
        fn new(replies: Vec<Vec<u8>>) -> Self {
            Self {
                sent: Vec::new(),
                replies: replies.into(),
                connected: true,
            }
        }
    }

    #[async_trait]
    impl ModbusTransport for MockTransport {
        async fn connect(&mut self) -> ModbusResult<bool> {
            self.connected = true;
            Ok(true)
        }

        async fn disconnect(&mut self) -> ModbusResult<()> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn send(&mut self, frame: &[u8]) -> ModbusResult<()> {
            self.sent.push(frame.to_vec());
            Ok(())
        }

        async fn receive(&mut self, limit: Option<Duration>) -> ModbusResult<Vec<u8>> {
            match self.replies.pop_front() {
                Some(frame) => Ok(frame),
                None => Err(ModbusError::timeout(
                    "receive frame",
                    limit.map(|t| t.as_millis() as u64).unwrap_or(0),
                )),
            }
        }

        fn stats(&self) -> TransportStats {
            TransportStats::default()
        }
    }

    fn rtu_frame(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&crc16(body).to_le_bytes());
        frame
    }

    fn tcp_frame(tid: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&tid.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
        frame.push(unit);
        frame.extend_from_slice(pdu);
        frame
    }

    fn read_request() -> ModbusRequest {
        ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 1)
    }

    #[tokio::test]
    async fn test_rtu_exchange() {
        let transport = MockTransport::new(vec![rtu_frame(&[0x01, 0x03, 0x02, 0x12, 0x34])]);
        let transaction = Transaction::new(
            transport,
            Framing::Rtu,
            Some(Duration::from_millis(100)),
            RetryPolicy::default(),
        );

        let response = transaction.execute(&read_request()).await.unwrap();
        assert_eq!(response.parse_registers().unwrap(), vec![0x1234]);
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_send() {
        let transaction = Transaction::new(
            MockTransport::new(vec![]),
            Framing::Rtu,
            Some(Duration::from_millis(100)),
            RetryPolicy::default(),
        );

        let bad = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 65530, 10);
        let err = transaction.execute(&bad).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidAddress { .. }));
        assert!(transaction.inner.lock().await.transport.sent.is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_crc_surfaces_without_retry() {
        let mut bad = rtu_frame(&[0x01, 0x03, 0x02, 0x12, 0x34]);
        bad[3] ^= 0x40;
        let transaction = Transaction::new(
            MockTransport::new(vec![bad]),
            Framing::Rtu,
            Some(Duration::from_millis(100)),
            RetryPolicy {
                retries: 3,
                wait_to_retry_ms: 1,
            },
        );

        let err = transaction.execute(&read_request()).await.unwrap_err();
        assert!(matches!(err, ModbusError::CrcMismatch { .. }));
        // CRC failures are never retried.
        assert_eq!(transaction.inner.lock().await.transport.sent.len(), 1);
        assert!(transaction.is_connected().await);
        transaction.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_slave_id_is_protocol_error() {
        let transport = MockTransport::new(vec![rtu_frame(&[0x02, 0x03, 0x02, 0x12, 0x34])]);
        let transaction = Transaction::new(
            transport,
            Framing::Rtu,
            Some(Duration::from_millis(100)),
            RetryPolicy::default(),
        );

        let err = transaction.execute(&read_request()).await.unwrap_err();
        assert!(matches!(err, ModbusError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_stale_transaction_id_discarded_then_timeout() {
        // The only reply carries tid 0x0099, never the one we assigned.
        let transport = MockTransport::new(vec![tcp_frame(0x0099, 1, &[0x03, 0x02, 0x12, 0x34])]);
        let transaction = Transaction::new(
            transport,
            Framing::tcp(),
            Some(Duration::from_millis(50)),
            RetryPolicy::default(),
        );

        let err = transaction.execute(&read_request()).await.unwrap_err();
        assert!(matches!(err, ModbusError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_matching_transaction_id_accepted() {
        // First assigned tid is 1.
        let transport = MockTransport::new(vec![tcp_frame(1, 1, &[0x03, 0x02, 0xBE, 0xEF])]);
        let transaction = Transaction::new(
            transport,
            Framing::tcp(),
            Some(Duration::from_millis(100)),
            RetryPolicy::default(),
        );

        let response = transaction.execute(&read_request()).await.unwrap();
        assert_eq!(response.parse_registers().unwrap(), vec![0xBEEF]);
    }

    #[tokio::test]
    async fn test_slave_busy_retried_until_success() {
        let busy = rtu_frame(&[0x01, 0x83, 0x06]);
        let ok = rtu_frame(&[0x01, 0x03, 0x02, 0x00, 0x2A]);
        let transport = MockTransport::new(vec![busy.clone(), busy, ok]);
        let transaction = Transaction::new(
            transport,
            Framing::Rtu,
            Some(Duration::from_millis(100)),
            RetryPolicy {
                retries: 3,
                wait_to_retry_ms: 1,
            },
        );

        let response = transaction.execute(&read_request()).await.unwrap();
        assert_eq!(response.parse_registers().unwrap(), vec![42]);
        assert_eq!(transaction.inner.lock().await.transport.sent.len(), 3);
    }

    #[tokio::test]
    async fn test_slave_busy_exhausts_retries() {
        let busy = rtu_frame(&[0x01, 0x83, 0x06]);
        let transport = MockTransport::new(vec![busy.clone(), busy.clone(), busy]);
        let transaction = Transaction::new(
            transport,
            Framing::Rtu,
            Some(Duration::from_millis(100)),
            RetryPolicy {
                retries: 2,
                wait_to_retry_ms: 1,
            },
        );

        let err = transaction.execute(&read_request()).await.unwrap_err();
        assert!(matches!(err, ModbusError::Exception { code: 0x06, .. }));
    }

    #[tokio::test]
    async fn test_other_exceptions_not_retried() {
        let illegal = rtu_frame(&[0x01, 0x83, 0x02]);
        let transport = MockTransport::new(vec![illegal, rtu_frame(&[0x01, 0x03, 0x02, 0, 0])]);
        let transaction = Transaction::new(
            transport,
            Framing::Rtu,
            Some(Duration::from_millis(100)),
            RetryPolicy {
                retries: 3,
                wait_to_retry_ms: 1,
            },
        );

        let err = transaction.execute(&read_request()).await.unwrap_err();
        assert!(matches!(err, ModbusError::Exception { code: 0x02, .. }));
        assert_eq!(transaction.inner.lock().await.transport.sent.len(), 1);
    }
}
