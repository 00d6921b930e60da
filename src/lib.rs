//! # GNSS Tracker Library
//!
//! Location telemetry agent for a small Linux board with a UART GNSS receiver.
//!
//! The tracker decodes the receiver's NMEA stream, keeps a WiFi or LTE link
//! up, and periodically posts the latest fix as JSON, recovering from
//! receiver, radio and transport failures without ever stopping.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod gnss;
pub mod indicator;
pub mod scheduler;
pub mod serial;
pub mod uplink;
