//! Data-driven 32-bit register block engine.
//!
//! Each register is described declaratively by a [`RegisterAccessInfo`]: reset
//! value, read-only / write-one-to-clear / reserved bit masks, and optional
//! access hooks. The [`RegisterBank`] trait supplies the dispatch machinery so
//! device models only implement the side effects that are actually
//! device-specific.
//!
//! Write ordering: the `pre_write` hook transforms the incoming value first,
//! then the masks are applied and the result committed, then `post_write` runs
//! with the committed value. A `post_write` hook on a write-one-to-clear
//! register therefore observes the already-cleared status bits.

pub type PreWriteHook<D> = fn(&mut D, u32) -> u32;
pub type PostWriteHook<D> = fn(&mut D, u32);
pub type PostReadHook<D> = fn(&D, u32) -> u32;

/// Access metadata for one 32-bit register.
pub struct RegisterAccessInfo<D> {
    pub name: &'static str,
    /// Value applied by [`RegisterBank::register_reset`].
    pub reset: u32,
    /// Bits the guest cannot change.
    pub ro: u32,
    /// Bits cleared by writing 1; writing 0 leaves them unchanged.
    pub w1c: u32,
    /// Reserved bits: not writable, otherwise unmodeled.
    pub rsvd: u32,
    /// Transforms the incoming value before masks are applied; the return
    /// value is what the engine goes on to commit.
    pub pre_write: Option<PreWriteHook<D>>,
    /// Runs after the masked value has been committed.
    pub post_write: Option<PostWriteHook<D>>,
    /// Overrides the value returned to the bus without altering stored state.
    pub post_read: Option<PostReadHook<D>>,
}

// Manual impls: `derive` would require `D: Copy`, but only fn pointers are
// stored so the metadata is always copyable.
impl<D> Clone for RegisterAccessInfo<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for RegisterAccessInfo<D> {}

impl<D> RegisterAccessInfo<D> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            reset: 0,
            ro: 0,
            w1c: 0,
            rsvd: 0,
            pre_write: None,
            post_write: None,
            post_read: None,
        }
    }

    pub const fn reset(mut self, value: u32) -> Self {
        self.reset = value;
        self
    }

    pub const fn ro(mut self, mask: u32) -> Self {
        self.ro = mask;
        self
    }

    pub const fn w1c(mut self, mask: u32) -> Self {
        self.w1c = mask;
        self
    }

    pub const fn rsvd(mut self, mask: u32) -> Self {
        self.rsvd = mask;
        self
    }

    pub const fn pre_write(mut self, hook: PreWriteHook<D>) -> Self {
        self.pre_write = Some(hook);
        self
    }

    pub const fn post_write(mut self, hook: PostWriteHook<D>) -> Self {
        self.post_write = Some(hook);
        self
    }

    pub const fn post_read(mut self, hook: PostReadHook<D>) -> Self {
        self.post_read = Some(hook);
        self
    }
}

/// A device exposing a bank of 32-bit registers driven by
/// [`RegisterAccessInfo`] metadata.
///
/// Implementors provide raw storage and the descriptor lookup (which may vary
/// with immutable device configuration, e.g. a hardware revision); the
/// provided methods implement masked reads, writes, and reset.
pub trait RegisterBank: Sized {
    /// Descriptor for register `index`, or `None` for holes in the block.
    fn descriptor(&self, index: usize) -> Option<RegisterAccessInfo<Self>>;

    fn raw_reg(&self, index: usize) -> u32;

    fn set_raw_reg(&mut self, index: usize, value: u32);

    /// Dispatches a read. Holes read as zero.
    fn register_read(&self, index: usize) -> u32 {
        let Some(info) = self.descriptor(index) else {
            return 0;
        };
        let stored = self.raw_reg(index);
        match info.post_read {
            Some(hook) => hook(self, stored),
            None => stored,
        }
    }

    /// Dispatches a write. Holes swallow the write.
    fn register_write(&mut self, index: usize, value: u32) {
        let Some(info) = self.descriptor(index) else {
            return;
        };

        let value = match info.pre_write {
            Some(hook) => hook(self, value),
            None => value,
        };

        let old = self.raw_reg(index);
        // Read-only, reserved, and W1C bits all keep their stored value on a
        // plain write; W1C bits written as 1 are then cleared.
        let keep = info.ro | info.rsvd | info.w1c;
        let mut new = (value & !keep) | (old & keep);
        new &= !(value & info.w1c);

        self.set_raw_reg(index, new);
        if let Some(hook) = info.post_write {
            hook(self, new);
        }
    }

    /// Applies the descriptor's reset value. Holes are left untouched.
    fn register_reset(&mut self, index: usize) {
        if let Some(info) = self.descriptor(index) {
            self.set_raw_reg(index, info.reset);
        }
    }
}
