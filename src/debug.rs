//! Realtime-safe diagnostics.
//!
//! `rig_log!` formats into a fixed-size line and pushes it onto a lock-free
//! ring without touching the heap. Lines are written out later by
//! [`drain_to_file`] from the background task. Everything compiles to nothing
//! without the `debug` feature.

use std::fmt;

#[cfg(feature = "debug")]
pub mod ring {
    use once_cell::sync::OnceCell;
    use std::cell::UnsafeCell;
    use std::fmt;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const RING_LINES: usize = 128;
    const LINE_BYTES: usize = 256;

    #[derive(Copy, Clone)]
    struct Line {
        len: usize,
        bytes: [u8; LINE_BYTES],
    }

    impl Line {
        const EMPTY: Line = Line {
            len: 0,
            bytes: [0; LINE_BYTES],
        };

        fn as_str(&self) -> &str {
            std::str::from_utf8(&self.bytes[..self.len]).unwrap_or("<invalid utf-8>")
        }
    }

    impl fmt::Write for Line {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let room = LINE_BYTES - self.len;
            // Cut on a char boundary so the line stays valid utf-8
            let mut n = s.len().min(room);
            while !s.is_char_boundary(n) {
                n -= 1;
            }
            self.bytes[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
            self.len += n;
            Ok(())
        }
    }

    /// Single producer (audio thread), single consumer (background task).
    struct Ring {
        write: AtomicUsize,
        read: AtomicUsize,
        dropped: AtomicUsize,
        lines: Box<[UnsafeCell<Line>]>,
    }

    unsafe impl Sync for Ring {}

    impl Ring {
        fn new() -> Self {
            Self {
                write: AtomicUsize::new(0),
                read: AtomicUsize::new(0),
                dropped: AtomicUsize::new(0),
                lines: (0..RING_LINES).map(|_| UnsafeCell::new(Line::EMPTY)).collect(),
            }
        }

        fn push(&self, line: &Line) {
            let write = self.write.load(Ordering::Relaxed);
            let next = (write + 1) % RING_LINES;
            if next == self.read.load(Ordering::Acquire) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            unsafe {
                *self.lines[write].get() = *line;
            }
            self.write.store(next, Ordering::Release);
        }

        fn pop(&self) -> Option<Line> {
            let read = self.read.load(Ordering::Relaxed);
            if read == self.write.load(Ordering::Acquire) {
                return None;
            }
            let line = unsafe { *self.lines[read].get() };
            self.read.store((read + 1) % RING_LINES, Ordering::Release);
            Some(line)
        }
    }

    static RING: OnceCell<Ring> = OnceCell::new();
    static ENABLED: AtomicBool = AtomicBool::new(false);

    /// Allocate the ring. Call once from a non-realtime context.
    pub fn init() {
        RING.get_or_init(Ring::new);
        ENABLED.store(true, Ordering::Relaxed);
    }

    pub fn push_args(args: fmt::Arguments) {
        if !ENABLED.load(Ordering::Relaxed) {
            return;
        }
        let Some(ring) = RING.get() else {
            return;
        };
        let mut line = Line::EMPTY;
        let _ = fmt::write(&mut line, args);
        ring.push(&line);
    }

    /// Hand every pending line to `sink`, oldest first.
    pub fn drain(mut sink: impl FnMut(&str)) {
        let Some(ring) = RING.get() else {
            return;
        };
        while let Some(line) = ring.pop() {
            if line.len > 0 {
                sink(line.as_str());
            }
        }
        let dropped = ring.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            let msg = format!("({dropped} lines dropped, ring full)");
            sink(&msg);
        }
    }

    pub fn log_path() -> PathBuf {
        std::env::temp_dir().join("namrig.log")
    }

    pub fn drain_to_file() {
        if !ENABLED.load(Ordering::Relaxed) {
            return;
        }
        let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path())
        else {
            return;
        };
        drain(|line| {
            let _ = writeln!(file, "{line}");
        });
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_lines_come_out_in_order() {
            init();
            push_args(format_args!("first {}", 1));
            push_args(format_args!("second {}", 2));
            let mut seen = Vec::new();
            drain(|l| seen.push(l.to_string()));
            assert!(seen.contains(&"first 1".to_string()));
            assert!(seen.contains(&"second 2".to_string()));
        }

        #[test]
        fn test_long_lines_are_truncated() {
            let mut line = Line::EMPTY;
            let long = "é".repeat(LINE_BYTES);
            let _ = fmt::Write::write_str(&mut line, &long);
            assert!(line.len <= LINE_BYTES);
            assert!(line.as_str().chars().all(|c| c == 'é'));
        }
    }
}

#[cfg(feature = "debug")]
pub(crate) fn rig_log_inner(args: fmt::Arguments) {
    ring::push_args(args);
}

#[cfg(not(feature = "debug"))]
pub(crate) fn rig_log_inner(_args: fmt::Arguments) {}

/// Write pending realtime log lines out. No-op without the `debug` feature.
pub fn flush() {
    #[cfg(feature = "debug")]
    ring::drain_to_file();
}

#[macro_export]
macro_rules! rig_log {
    ($($arg:tt)*) => {
        $crate::debug::rig_log_inner(format_args!($($arg)*))
    };
}
