//! Interrupt line outputs.

/// A level-triggered interrupt line driven by a device model.
///
/// Implementations route the level to whatever interrupt controller the
/// platform wires the device to; devices only ever assert or deassert.
pub trait IrqLine {
    fn set_level(&self, level: bool);
}

/// Disconnected interrupt line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIrq;

impl IrqLine for NoIrq {
    fn set_level(&self, _level: bool) {}
}
