//! Scoped flush-to-zero for one processing block.
//!
//! [`DenormalGuard::new`] saves the thread's floating-point control word, turns
//! on flush-to-zero / denormals-are-zero and masks every FP exception. The
//! saved word is written back on drop, so every exit path restores it.

#[cfg(target_arch = "x86_64")]
const MXCSR_DAZ_FTZ: u32 = 0x8040;
#[cfg(target_arch = "x86_64")]
const MXCSR_EXCEPTION_MASK: u32 = 0x1F80;

#[cfg(target_arch = "aarch64")]
const FPCR_FZ: u64 = 1 << 24;

pub struct DenormalGuard {
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    saved: u64,
}

impl DenormalGuard {
    #[inline]
    pub fn new() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            let saved = read_mxcsr();
            write_mxcsr(saved | MXCSR_DAZ_FTZ | MXCSR_EXCEPTION_MASK);
            Self {
                saved: saved as u64,
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            let saved = read_fpcr();
            write_fpcr(saved | FPCR_FZ);
            Self { saved }
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            Self {}
        }
    }

    /// Whether subnormals are currently being flushed on this thread.
    pub fn flushing() -> bool {
        #[cfg(target_arch = "x86_64")]
        {
            read_mxcsr() & MXCSR_DAZ_FTZ == MXCSR_DAZ_FTZ
        }

        #[cfg(target_arch = "aarch64")]
        {
            read_fpcr() & FPCR_FZ != 0
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            false
        }
    }
}

impl Default for DenormalGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DenormalGuard {
    #[inline]
    fn drop(&mut self) {
        #[cfg(target_arch = "x86_64")]
        write_mxcsr(self.saved as u32);

        #[cfg(target_arch = "aarch64")]
        write_fpcr(self.saved);
    }
}

// MXCSR only affects the calling thread
#[cfg(target_arch = "x86_64")]
#[inline]
#[allow(deprecated)]
fn read_mxcsr() -> u32 {
    unsafe { std::arch::x86_64::_mm_getcsr() }
}

#[cfg(target_arch = "x86_64")]
#[inline]
#[allow(deprecated)]
fn write_mxcsr(value: u32) {
    unsafe { std::arch::x86_64::_mm_setcsr(value) }
}

#[cfg(target_arch = "aarch64")]
#[inline]
fn read_fpcr() -> u64 {
    let value: u64;
    unsafe {
        std::arch::asm!("mrs {}, fpcr", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

#[cfg(target_arch = "aarch64")]
#[inline]
fn write_fpcr(value: u64) {
    unsafe {
        std::arch::asm!("msr fpcr, {}", in(reg) value, options(nomem, nostack, preserves_flags));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    fn test_guard_flushes_and_restores() {
        let before = DenormalGuard::flushing();
        {
            let _guard = DenormalGuard::new();
            assert!(DenormalGuard::flushing());

            let tiny = std::hint::black_box(f32::MIN_POSITIVE);
            let product = std::hint::black_box(tiny * 0.5);
            assert_eq!(product, 0.0);
        }
        assert_eq!(DenormalGuard::flushing(), before);
    }

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    fn test_restored_on_early_exit() {
        fn bails_out(flag: bool) -> Option<()> {
            let _guard = DenormalGuard::new();
            if flag {
                return None;
            }
            Some(())
        }

        let before = DenormalGuard::flushing();
        assert!(bails_out(true).is_none());
        assert_eq!(DenormalGuard::flushing(), before);
    }
}
