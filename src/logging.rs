//! Optional callback-based exchange logging.
//!
//! The engine itself logs through `tracing`; this module exists for hosts
//! that want a structured feed of every request/response pair, for example
//! a terminal UI or a capture file. The logger is a plain collaborator: the
//! default is [`CallbackLogger::disabled`] and nothing in the engine
//! requires one to be attached.

use std::sync::Arc;

use crate::protocol::{ModbusRequest, ModbusResponse};

/// Severity levels for the callback logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// How exchanges are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Hex dump of the payload only.
    Raw,
    /// Field-by-field description.
    Interpreted,
    /// Interpreted at info, raw at debug.
    Both,
}

/// Receives a level and a formatted message.
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Exchange logger driving an optional callback.
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode: LoggingMode::Interpreted,
        }
    }

    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Timestamped stderr/stdout logger.
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error | LogLevel::Warn => {
                    eprintln!("[{}] {}: {}", timestamp, level.as_str(), message)
                }
                LogLevel::Info | LogLevel::Debug => {
                    println!("[{}] {}: {}", timestamp, level.as_str(), message)
                }
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Logger that drops everything.
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level as u8 <= self.min_level as u8
    }

    /// Log an outgoing request.
    pub fn log_request(&self, request: &ModbusRequest) {
        if !self.should_log(LogLevel::Info) {
            return;
        }

        match self.mode {
            LoggingMode::Raw => {
                self.log(
                    LogLevel::Info,
                    &format!("request -> {}", hex::encode_upper(&request.data)),
                );
            }
            LoggingMode::Interpreted => {
                self.log(LogLevel::Info, &Self::describe_request(request));
            }
            LoggingMode::Both => {
                self.log(LogLevel::Info, &Self::describe_request(request));
                self.log(
                    LogLevel::Debug,
                    &format!("request -> {}", hex::encode_upper(&request.data)),
                );
            }
        }
    }

    /// Log an incoming response.
    pub fn log_response(&self, response: &ModbusResponse) {
        if !self.should_log(LogLevel::Info) {
            return;
        }

        match self.mode {
            LoggingMode::Raw => {
                self.log(
                    LogLevel::Info,
                    &format!("response <- {}", hex::encode_upper(&response.data)),
                );
            }
            LoggingMode::Interpreted => {
                self.log(LogLevel::Info, &Self::describe_response(response));
            }
            LoggingMode::Both => {
                self.log(LogLevel::Info, &Self::describe_response(response));
                self.log(
                    LogLevel::Debug,
                    &format!("response <- {}", hex::encode_upper(&response.data)),
                );
            }
        }
    }

    fn describe_request(request: &ModbusRequest) -> String {
        format!(
            "request -> slave {}, {}, address {}, quantity {}",
            request.slave_id, request.function, request.address, request.quantity
        )
    }

    fn describe_response(response: &ModbusResponse) -> String {
        if let Some(exception) = response.exception {
            return format!(
                "response <- slave {}, {}, {}",
                response.slave_id, response.function, exception
            );
        }

        let detail = match response.parse_registers() {
            Ok(registers) if !registers.is_empty() => {
                let shown = registers.len().min(8);
                format!("registers {:?}", &registers[..shown])
            }
            _ => format!("data {}", hex::encode_upper(&response.data)),
        };
        format!(
            "response <- slave {}, {}, {}",
            response.slave_id, response.function, detail
        )
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}
