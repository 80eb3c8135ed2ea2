use std::cell::Cell;
use std::rc::Rc;

use zynqmp_rtc::clock::ManualClock;
use zynqmp_rtc::irq::IrqLine;
use zynqmp_rtc::rtc::{
    REG_ALARM, REG_CALIB_READ, REG_CALIB_WRITE, REG_CURRENT_TIME, REG_RTC_INT_EN,
    REG_RTC_INT_MASK, REG_RTC_INT_STATUS, REG_SAFETY_CHK, REG_SET_TIME_WRITE, RTC_INT_ALARM,
};
use zynqmp_rtc::snapshot::{IoSnapshot, SnapshotError, SnapshotWriter};
use zynqmp_rtc::{RtcCallbacks, RtcConfig, ZynqMpRtc};

#[derive(Clone)]
struct TestIrq(Rc<Cell<bool>>);

impl TestIrq {
    fn new() -> Self {
        Self(Rc::new(Cell::new(false)))
    }

    fn level(&self) -> bool {
        self.0.get()
    }
}

impl IrqLine for TestIrq {
    fn set_level(&self, level: bool) {
        self.0.set(level);
    }
}

fn rtc_with_lines(
    wall_secs: i64,
    now_ns: u64,
) -> (ZynqMpRtc<ManualClock>, ManualClock, TestIrq, TestIrq) {
    let clock = ManualClock::new();
    clock.set_wall_clock_secs(wall_secs);
    clock.set_ns(now_ns);

    let irq_rtc = TestIrq::new();
    let irq_addr_error = TestIrq::new();
    let rtc = ZynqMpRtc::new_with_callbacks_and_clock(
        RtcConfig::default(),
        RtcCallbacks {
            irq_rtc: Box::new(irq_rtc.clone()),
            irq_addr_error: Box::new(irq_addr_error.clone()),
        },
        clock.clone(),
    );
    (rtc, clock, irq_rtc, irq_addr_error)
}

#[test]
fn snapshot_roundtrip_preserves_registers_time_and_irq() {
    let (mut src, src_clock, _, _) = rtc_with_lines(1_600_000_000, 0);

    src.mmio_write(REG_ALARM, 0x1234_5678);
    src.mmio_write(REG_SAFETY_CHK, 0x5555_aaaa);
    src.mmio_write(REG_CALIB_WRITE, 0x0007_7777);
    src.mmio_write(REG_RTC_INT_EN, RTC_INT_ALARM);
    src.raise_rtc_interrupt(RTC_INT_ALARM);

    // Time marches on before the save; the snapshot still records the civil
    // time captured at attach, which is what the restore pins to.
    src_clock.advance_ns(100 * 1_000_000_000);
    assert_eq!(src.mmio_read(REG_CURRENT_TIME), 1_600_000_100);

    let snap = src.save_state();

    // Restore on a "different host": unrelated wall clock, monotonic clock
    // already far along.
    let (mut dst, dst_clock, irq_rtc, irq_addr_error) = rtc_with_lines(999, 5_000 * 1_000_000_000);
    dst.load_state(&snap).unwrap();

    assert_eq!(dst.mmio_read(REG_ALARM), 0x1234_5678);
    assert_eq!(dst.mmio_read(REG_SAFETY_CHK), 0x5555_aaaa);
    assert_eq!(dst.mmio_read(REG_CALIB_READ), 0x0007_7777);
    assert_eq!(dst.mmio_read(REG_RTC_INT_MASK), 0x1);
    assert_eq!(dst.mmio_read(REG_RTC_INT_STATUS), RTC_INT_ALARM);

    // Guest time resumes at the snapshot's civil time, not at the civil time
    // plus the 100 seconds that elapsed on the source host.
    assert_eq!(dst.mmio_read(REG_CURRENT_TIME), 1_600_000_000);
    dst_clock.advance_ns(7 * 1_000_000_000);
    assert_eq!(dst.mmio_read(REG_CURRENT_TIME), 1_600_000_007);

    // Pending unmasked status re-drives the line on the restored instance.
    assert!(irq_rtc.level());
    assert!(!irq_addr_error.level());
}

#[test]
fn guest_set_time_is_not_persisted() {
    let (mut src, _, _, _) = rtc_with_lines(1_600_000_000, 0);

    src.mmio_write(REG_SET_TIME_WRITE, 42);
    assert_eq!(src.mmio_read(REG_CURRENT_TIME), 42);

    let snap = src.save_state();

    let (mut dst, _, _, _) = rtc_with_lines(0, 0);
    dst.load_state(&snap).unwrap();

    // The offset is rebuilt from the civil snapshot taken at attach; a raw
    // offset tied to the source host's monotonic clock is never carried over.
    assert_eq!(dst.mmio_read(REG_CURRENT_TIME), 1_600_000_000);
}

#[test]
fn restore_overrides_prior_offset() {
    let (mut src, _, _, _) = rtc_with_lines(1_000, 0);
    let snap = src.save_state();

    let (mut dst, dst_clock, _, _) = rtc_with_lines(9_999_999, 0);
    dst.mmio_write(REG_SET_TIME_WRITE, 123_456_789);
    dst_clock.advance_ns(50 * 1_000_000_000);

    dst.load_state(&snap).unwrap();
    assert_eq!(dst.mmio_read(REG_CURRENT_TIME), 1_000);
}

#[test]
fn rejects_excessive_register_count() {
    const TAG_REGS: u16 = 1;

    let mut w = SnapshotWriter::new(
        <ZynqMpRtc<ManualClock> as IoSnapshot>::DEVICE_ID,
        <ZynqMpRtc<ManualClock> as IoSnapshot>::DEVICE_VERSION,
    );
    w.field_bytes(TAG_REGS, u32::MAX.to_le_bytes().to_vec());

    let (mut rtc, _, _, _) = rtc_with_lines(0, 0);
    let err = rtc
        .load_state(&w.finish())
        .expect_err("snapshot should reject excessive register count");
    assert_eq!(err, SnapshotError::InvalidFieldEncoding("rtc register count"));
}

#[test]
fn rejects_foreign_device_and_newer_major() {
    let (mut rtc, _, _, _) = rtc_with_lines(0, 0);

    let foreign = SnapshotWriter::new(
        *b"HPET",
        <ZynqMpRtc<ManualClock> as IoSnapshot>::DEVICE_VERSION,
    )
    .finish();
    assert_eq!(
        rtc.load_state(&foreign).unwrap_err(),
        SnapshotError::DeviceIdMismatch {
            expected: *b"ZRTC",
            found: *b"HPET",
        }
    );

    let newer = SnapshotWriter::new(
        <ZynqMpRtc<ManualClock> as IoSnapshot>::DEVICE_ID,
        zynqmp_rtc::snapshot::SnapshotVersion::new(2, 0),
    )
    .finish();
    assert_eq!(
        rtc.load_state(&newer).unwrap_err(),
        SnapshotError::UnsupportedDeviceMajorVersion {
            expected: 1,
            found: 2,
        }
    );
}
