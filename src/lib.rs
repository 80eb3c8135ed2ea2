#![forbid(unsafe_code)]

//! Device model of the Xilinx ZynqMP real-time clock (RTC).
//!
//! Guest-visible time is virtualized as `tick_offset + host monotonic seconds`;
//! the offset is the only quantity that defines guest time skew relative to the
//! host, and it is recomputed from a portable civil-time snapshot after every
//! snapshot restore so that restoring never double-counts wall-clock time spent
//! outside the guest.

pub mod clock;
pub mod irq;
pub mod regblock;
pub mod rtc;
pub mod snapshot;

pub use rtc::{RtcCallbacks, RtcConfig, RtcDateTime, ZynqMpRtc};
