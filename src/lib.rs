//! SensorLogger records several independent sensor streams (two positioning
//! receivers and one inertial/orientation unit, by default) to one CSV file
//! per device, without losing or mangling a reading, and shuts down without
//! leaving anything unwritten.
//!
//! Each device gets its own pipeline:
//!
//! ```text
//! device ─▶ Driver ─push─▶ reading queue ─pop─▶ LogWriter ─▶ <device>.csv
//! ```
//!
//! The [driver](driver::Driver) thread does the blocking device I/O; the
//! [writer](log_writer::LogWriter) thread does the file I/O, flushing after
//! every row. They share only the [queue](reading_queue) and the process-wide
//! [exit signal](exit_signal::ExitSignal). The [session](session) wires the
//! pipelines together and owns the stop sequence: drivers first, then the
//! exit signal, then a join on every writer once it has drained its queue.

#![warn(missing_docs)]

pub mod args;
pub mod config;
pub mod driver;
pub mod error;
pub mod exit_signal;
pub mod frame_decoder;
pub mod interrupt;
pub mod log_writer;
pub mod logging;
pub mod reading;
pub mod reading_queue;
pub mod serial_driver;
pub mod session;
pub mod simulated_driver;
